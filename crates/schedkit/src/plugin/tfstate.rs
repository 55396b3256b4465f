//! Terraform state lookups.
//!
//! Resolves addresses against a v4 state file:
//!
//! - `aws_ecs_cluster.main.name`
//! - `data.aws_caller_identity.current.account_id`
//! - `module.jobs.aws_sqs_queue.dlq["reports"].arn`
//! - `aws_subnet.private[0].id`
//! - `output.cluster_name`

use super::{Plugin, PluginContext, TemplatePlugin};
use crate::error::{Error, Result};
use log::debug;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct State {
    #[serde(default)]
    resources: Vec<Resource>,
    #[serde(default)]
    outputs: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct Resource {
    #[serde(default)]
    module: Option<String>,
    #[serde(default)]
    mode: String,
    #[serde(rename = "type")]
    kind: String,
    name: String,
    #[serde(default)]
    instances: Vec<Instance>,
}

#[derive(Debug, Deserialize)]
struct Instance {
    #[serde(default)]
    index_key: Option<Value>,
    #[serde(default)]
    attributes: Value,
}

#[derive(Debug, Clone, PartialEq)]
enum Index {
    Number(u64),
    Key(String),
}

impl Index {
    fn matches(&self, key: &Value) -> bool {
        match (self, key) {
            (Index::Number(n), Value::Number(k)) => k.as_u64() == Some(*n),
            (Index::Key(s), Value::String(k)) => s == k,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Segment {
    name: String,
    indexes: Vec<Index>,
}

/// Lookups against one loaded state file
#[derive(Debug)]
pub struct TfState {
    state: State,
}

/// Factory registered as `tfstate`
///
/// Reads the state from `config.path` (relative to the config file) or
/// fetches it from `config.url`.
pub fn build(plugin: &Plugin, ctx: &PluginContext) -> Result<Arc<dyn TemplatePlugin>> {
    if let Some(path) = plugin.config_str("path")? {
        let path = ctx.dir.join(shellexpand::tilde(path).into_owned());
        return Ok(Arc::new(TfState::from_path(&path)?));
    }
    if let Some(url) = plugin.config_str("url")? {
        return Ok(Arc::new(TfState::from_url(url)?));
    }
    Err(Error::plugin(
        "tfstate plugin requires path or url for tfstate location",
    ))
}

impl TfState {
    /// Parse state JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let state = serde_json::from_str(json)
            .map_err(|e| Error::plugin(format!("invalid tfstate: {e}")))?;
        Ok(Self { state })
    }

    /// Read a local state file
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!("reading tfstate from {}", path.display());
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::plugin(format!("failed to read tfstate {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// Fetch a remote state file over HTTP(S)
    pub fn from_url(url: &str) -> Result<Self> {
        debug!("fetching tfstate from {url}");
        let agent = ureq::Agent::new_with_defaults();
        let state: State = agent.get(url).call()?.body_mut().read_json()?;
        Ok(Self { state })
    }

    /// Resolve an address to a string
    pub fn lookup_address(&self, address: &str) -> Result<String> {
        let segments = parse_address(address)?;
        let value = self
            .resolve(&segments)
            .ok_or_else(|| Error::plugin(format!("{address} is not found in tfstate")))?;
        Ok(match value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        })
    }

    fn resolve(&self, segments: &[Segment]) -> Option<&Value> {
        if let Some(first) = segments.first()
            && first.name == "output"
        {
            let output = segments.get(1)?;
            let value = self.state.outputs.get(&output.name)?.get("value")?;
            let value = index_into(value, &output.indexes)?;
            return walk(value, &segments[2..]);
        }

        let mut rest = segments;
        let mut module = Vec::new();
        while let Some(seg) = rest.first()
            && seg.name == "module"
        {
            let name = rest.get(1)?;
            module.push(format!("module.{}{}", name.name, render_indexes(&name.indexes)));
            rest = &rest[2..];
        }
        let mode = if rest.first()?.name == "data" {
            rest = &rest[1..];
            "data"
        } else {
            "managed"
        };
        let kind = rest.first()?;
        let name = rest.get(1)?;
        let module = if module.is_empty() {
            None
        } else {
            Some(module.join("."))
        };

        let resource = self.state.resources.iter().find(|r| {
            r.mode == mode && r.kind == kind.name && r.name == name.name && r.module == module
        })?;
        let instance = match name.indexes.as_slice() {
            [] => resource
                .instances
                .iter()
                .find(|i| i.index_key.is_none())
                .or_else(|| resource.instances.first())?,
            [index] => resource
                .instances
                .iter()
                .find(|i| i.index_key.as_ref().is_some_and(|k| index.matches(k)))?,
            _ => return None,
        };
        walk(&instance.attributes, &rest[2..])
    }
}

impl TemplatePlugin for TfState {
    fn lookup(&self, args: &[String]) -> Result<String> {
        match args {
            [address] => self.lookup_address(address),
            _ => Err(Error::plugin("tfstate requires exactly one address")),
        }
    }
}

fn walk<'a>(mut value: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    for seg in segments {
        value = value.get(&seg.name)?;
        value = index_into(value, &seg.indexes)?;
    }
    Some(value)
}

fn index_into<'a>(mut value: &'a Value, indexes: &[Index]) -> Option<&'a Value> {
    for index in indexes {
        value = match index {
            Index::Number(n) => value.get(usize::try_from(*n).ok()?)?,
            Index::Key(k) => value.get(k)?,
        };
    }
    Some(value)
}

fn render_indexes(indexes: &[Index]) -> String {
    indexes
        .iter()
        .map(|i| match i {
            Index::Number(n) => format!("[{n}]"),
            Index::Key(k) => format!("[\"{k}\"]"),
        })
        .collect()
}

/// Split an address into dot-separated segments with bracket indexes
fn parse_address(address: &str) -> Result<Vec<Segment>> {
    let invalid = || Error::plugin(format!("invalid tfstate address {address:?}"));
    let mut segments = Vec::new();
    let mut chars = address.chars().peekable();

    loop {
        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if c == '.' || c == '[' {
                break;
            }
            name.push(c);
            chars.next();
        }
        if name.is_empty() {
            return Err(invalid());
        }

        let mut indexes = Vec::new();
        while chars.peek() == Some(&'[') {
            chars.next();
            let mut raw = String::new();
            let mut quoted = false;
            loop {
                match chars.next() {
                    Some('"') => quoted = !quoted,
                    Some(']') if !quoted => break,
                    Some(c) => raw.push(c),
                    None => return Err(invalid()),
                }
            }
            let index = match raw.parse::<u64>() {
                Ok(n) => Index::Number(n),
                Err(_) => Index::Key(raw),
            };
            indexes.push(index);
        }
        segments.push(Segment { name, indexes });

        match chars.next() {
            None => break,
            Some('.') => {}
            Some(_) => return Err(invalid()),
        }
    }
    Ok(segments)
}
