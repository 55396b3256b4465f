//! SSM Parameter Store lookups.
//!
//! `{{ ssm "/app/db/password" }}` resolves a parameter (decrypted);
//! `{{ ssm "/app/subnets" 1 }}` picks one element of a `StringList`.
//! Parameters are fetched once per plugin instance.

use super::{Plugin, PluginContext, TemplatePlugin};
use crate::error::{Error, Result};
use crate::runner;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// A fetched parameter
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Parameter {
    /// `String`, `StringList` or `SecureString`
    #[serde(rename = "Type", default)]
    pub kind: String,
    /// Decrypted value
    pub value: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetParameterOutput {
    parameter: Parameter,
}

type Fetch = Box<dyn Fn(&str) -> Result<Parameter> + Send + Sync>;

/// Cached parameter lookups
pub struct Ssm {
    fetch: Fetch,
    cache: Mutex<HashMap<String, Parameter>>,
}

/// Factory registered as `ssm`
pub fn build(_plugin: &Plugin, ctx: &PluginContext) -> Result<Arc<dyn TemplatePlugin>> {
    let region = ctx.region.clone();
    Ok(Arc::new(Ssm::with_fetch(move |name| {
        fetch_with_cli(name, &region)
    })))
}

fn fetch_with_cli(name: &str, region: &str) -> Result<Parameter> {
    let mut args = vec![
        "ssm",
        "get-parameter",
        "--name",
        name,
        "--with-decryption",
        "--output",
        "json",
    ];
    if !region.is_empty() {
        args.extend(["--region", region]);
    }
    let out = runner::run_capture("aws", &args)
        .map_err(|e| Error::plugin(format!("failed to get parameter {name}: {e}")))?;
    let parsed: GetParameterOutput = serde_json::from_str(&out)?;
    Ok(parsed.parameter)
}

impl Ssm {
    /// Lookups backed by a custom fetch function
    pub fn with_fetch<F>(fetch: F) -> Self
    where
        F: Fn(&str) -> Result<Parameter> + Send + Sync + 'static,
    {
        Self {
            fetch: Box::new(fetch),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn parameter(&self, name: &str) -> Result<Parameter> {
        if let Some(hit) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Ok(hit.clone());
        }
        let parameter = (self.fetch)(name)?;
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), parameter.clone());
        Ok(parameter)
    }
}

impl TemplatePlugin for Ssm {
    fn lookup(&self, args: &[String]) -> Result<String> {
        match args {
            [name] => Ok(self.parameter(name)?.value),
            [name, index] => {
                let parameter = self.parameter(name)?;
                if parameter.kind != "StringList" {
                    return Err(Error::plugin(format!(
                        "parameter {name} is {}, not StringList",
                        parameter.kind
                    )));
                }
                let index: usize = index
                    .parse()
                    .map_err(|_| Error::plugin(format!("invalid index {index:?}")))?;
                parameter
                    .value
                    .split(',')
                    .nth(index)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        Error::plugin(format!("parameter {name} has no element {index}"))
                    })
            }
            _ => Err(Error::plugin("ssm requires a parameter name and an optional index")),
        }
    }
}
