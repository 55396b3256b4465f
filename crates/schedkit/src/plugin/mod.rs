//! Template plugins resolving external lookups.
//!
//! A config lists plugins by kind:
//!
//! ```yaml
//! plugins:
//!   - name: tfstate
//!     config:
//!       path: terraform.tfstate
//!   - name: ssm
//!     func_prefix: prod_
//! ```
//!
//! Each entry is built through the [`PluginRegistry`] and exposes one
//! template function named `func_prefix + kind` for the second pass.

pub mod ssm;
pub mod tfstate;

use crate::error::{Error, Result};
use crate::template::Evaluator;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// A plugin entry of the config
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plugin {
    /// Plugin kind, e.g. `tfstate`
    pub name: String,
    /// Kind-specific settings
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
    /// Prefix of the registered function name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub func_prefix: String,
}

impl Plugin {
    /// Name of the template function this plugin registers
    pub fn function_name(&self) -> String {
        format!("{}{}", self.func_prefix, self.name.to_ascii_lowercase())
    }

    /// String setting, if present
    ///
    /// A present value of another type is an error.
    pub fn config_str(&self, key: &str) -> Result<Option<&str>> {
        match self.config.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(Error::plugin(format!(
                "{} plugin requires {key} as a string",
                self.name
            ))),
        }
    }
}

/// Environment a plugin is built in
#[derive(Debug, Clone, Default)]
pub struct PluginContext {
    /// Directory of the config file; relative plugin paths resolve here
    pub dir: PathBuf,
    /// Region from the config
    pub region: String,
}

/// A constructed plugin
pub trait TemplatePlugin: Send + Sync {
    /// Resolve a lookup key (plus optional arguments) to a string
    fn lookup(&self, args: &[String]) -> Result<String>;
}

/// Builds a plugin from its config entry
pub type PluginFactory =
    Arc<dyn Fn(&Plugin, &PluginContext) -> Result<Arc<dyn TemplatePlugin>> + Send + Sync>;

/// Maps plugin kinds to factories
#[derive(Default, Clone)]
pub struct PluginRegistry {
    factories: BTreeMap<String, PluginFactory>,
}

impl PluginRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `tfstate` and `ssm` plugins
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let builtins: [(&str, PluginFactory); 2] = [
            ("tfstate", Arc::new(tfstate::build)),
            ("ssm", Arc::new(ssm::build)),
        ];
        for (kind, factory) in builtins {
            // Builtin kinds are distinct, valid identifiers
            let _ = registry.register(kind, factory);
        }
        registry
    }

    /// Register a factory for `kind`
    ///
    /// Kinds are lowercase identifiers and can be registered once.
    pub fn register(&mut self, kind: &str, factory: PluginFactory) -> Result<()> {
        let valid = !kind.is_empty()
            && kind
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if !valid {
            return Err(Error::plugin(format!("invalid plugin kind {kind:?}")));
        }
        if self.factories.contains_key(kind) {
            return Err(Error::plugin(format!("plugin {kind} is already registered")));
        }
        self.factories.insert(kind.to_string(), factory);
        Ok(())
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Build one plugin
    pub fn build(&self, plugin: &Plugin, ctx: &PluginContext) -> Result<Arc<dyn TemplatePlugin>> {
        let factory = self
            .factories
            .get(&plugin.name.to_ascii_lowercase())
            .ok_or_else(|| {
                let kinds = self.kinds();
                let mut message = format!("plugin {} is not available", plugin.name);
                if !kinds.is_empty() {
                    message.push_str(&format!(" (known: {})", kinds.join(", ")));
                }
                Error::plugin(message)
            })?;
        factory(plugin, ctx)
    }

    /// Build every plugin and register its function with the evaluator
    pub fn setup(
        &self,
        plugins: &[Plugin],
        ctx: &PluginContext,
        evaluator: &mut Evaluator,
    ) -> Result<()> {
        for plugin in plugins {
            let built = self.build(plugin, ctx)?;
            let name = plugin.function_name();
            debug!("setting up plugin {} as {name}", plugin.name);
            evaluator.register(&name, Arc::new(move |args: &[String]| built.lookup(args)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    impl TemplatePlugin for Fixed {
        fn lookup(&self, args: &[String]) -> Result<String> {
            Ok(format!("{}:{}", self.0, args.join(",")))
        }
    }

    fn fixed_factory(value: &'static str) -> PluginFactory {
        Arc::new(move |_: &Plugin, _: &PluginContext| -> Result<Arc<dyn TemplatePlugin>> {
            Ok(Arc::new(Fixed(value)))
        })
    }

    fn plugin(name: &str, prefix: &str) -> Plugin {
        Plugin {
            name: name.to_string(),
            func_prefix: prefix.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_builtins_registered() {
        assert_eq!(PluginRegistry::with_builtins().kinds(), vec!["ssm", "tfstate"]);
    }

    #[test]
    fn test_register_validates_kind() {
        let mut registry = PluginRegistry::new();
        assert!(registry.register("vault", fixed_factory("v")).is_ok());
        assert!(registry.register("vault", fixed_factory("v")).is_err());
        assert!(registry.register("Bad Kind", fixed_factory("v")).is_err());
        assert!(registry.register("", fixed_factory("v")).is_err());
    }

    #[test]
    fn test_unknown_plugin() {
        let registry = PluginRegistry::new();
        let err = registry
            .build(&plugin("consul", ""), &PluginContext::default())
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "plugin error: plugin consul is not available");

        let err = PluginRegistry::with_builtins()
            .build(&plugin("consul", ""), &PluginContext::default())
            .err()
            .unwrap();
        assert_eq!(
            err.to_string(),
            "plugin error: plugin consul is not available (known: ssm, tfstate)"
        );
    }

    #[test]
    fn test_setup_registers_prefixed_functions() {
        let mut registry = PluginRegistry::new();
        registry.register("vault", fixed_factory("v")).unwrap();
        let mut evaluator = Evaluator::with_env(|_| None);
        registry
            .setup(
                &[plugin("vault", ""), plugin("Vault", "prod_")],
                &PluginContext::default(),
                &mut evaluator,
            )
            .unwrap();

        assert!(evaluator.is_registered("vault"));
        assert!(evaluator.is_registered("prod_vault"));
        let out = evaluator
            .second_pass(r#"{{ prod_vault "db" }}"#)
            .unwrap();
        assert_eq!(out, "v:db");
    }

    #[test]
    fn test_config_str() {
        let mut p = plugin("tfstate", "");
        p.config.insert("path".into(), serde_json::json!("state.json"));
        p.config.insert("url".into(), serde_json::json!(42));
        assert_eq!(p.config_str("path").unwrap(), Some("state.json"));
        assert!(p.config_str("url").is_err());
        assert_eq!(p.config_str("missing").unwrap(), None);
    }
}
