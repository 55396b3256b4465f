//! Config loading: templating, parsing, validation and default merging.
//!
//! A config file is rendered in two passes around its plugin setup:
//!
//! 1. jsonnet evaluation, for `.jsonnet`/`.libsonnet` files
//! 2. first template pass (`env`, `must_env`; everything else deferred)
//! 3. parse, then validate every schedule expression
//! 4. build the configured plugins and register their functions
//! 5. second template pass over the first-pass output, then parse again
//! 6. fill account and tracking id, merge shared defaults into each rule

use crate::cron;
use crate::error::{Error, Result};
use crate::plugin::{Plugin, PluginContext, PluginRegistry};
use crate::rule::{BaseConfig, Rule};
use crate::runner;
use crate::template::Evaluator;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A loaded config file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Role shared by rules that name none
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role: String,
    /// Shared region, cluster and tracking id
    #[serde(flatten)]
    pub base: BaseConfig,
    /// Scheduled rules
    #[serde(default)]
    pub rules: Vec<Rule>,
    /// Template plugins
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<Plugin>,
    /// Directory of the config file
    #[serde(skip)]
    pub dir: PathBuf,
}

impl Config {
    /// Rule with the given name
    pub fn rule_by_name(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.name == name)
    }

    /// The named rule, or every rule when no name is given
    pub fn select(&self, name: Option<&str>) -> Result<Vec<&Rule>> {
        match name {
            Some(name) => self
                .rule_by_name(name)
                .map(|rule| vec![rule])
                .ok_or_else(|| Error::RuleNotFound(name.to_string())),
            None => Ok(self.rules.iter().collect()),
        }
    }

    /// Names of every rule, in config order
    pub fn rule_names(&self) -> Vec<String> {
        self.rules.iter().map(|r| r.name.clone()).collect()
    }
}

/// Source format, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// `.yaml`, `.yml` and anything unrecognized
    Yaml,
    /// `.json`
    Json,
    /// `.jsonnet` or `.libsonnet`, evaluated to JSON
    Jsonnet,
}

impl ConfigFormat {
    /// Format for a path
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::Json,
            Some("jsonnet" | "libsonnet") => Self::Jsonnet,
            _ => Self::Yaml,
        }
    }

    fn parse(self, text: &str) -> Result<Config> {
        let parsed = match self {
            Self::Yaml => serde_yaml::from_str(text).map_err(|e| e.to_string()),
            Self::Json | Self::Jsonnet => serde_json::from_str(text).map_err(|e| e.to_string()),
        };
        parsed.map_err(|message| Error::ConfigParse { message })
    }
}

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Loads config files with a plugin registry and environment
#[derive(Clone)]
pub struct Loader {
    registry: PluginRegistry,
    env: EnvLookup,
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

impl Loader {
    /// Loader with the builtin plugins and the process environment
    pub fn new() -> Self {
        Self {
            registry: PluginRegistry::with_builtins(),
            env: Arc::new(|key| std::env::var(key).ok()),
        }
    }

    /// Replace the plugin registry
    pub fn with_registry(mut self, registry: PluginRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replace the environment lookup
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(lookup);
        self
    }

    fn evaluator(&self) -> Evaluator {
        let env = Arc::clone(&self.env);
        Evaluator::with_env(move |key| env(key))
    }

    /// Load a config from raw bytes
    ///
    /// `path` selects the format and anchors relative plugin paths; it is
    /// not read.
    pub fn load(&self, src: &[u8], account_id: &str, path: &Path) -> Result<Config> {
        let format = ConfigFormat::from_path(path);
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

        let text = match format {
            ConfigFormat::Jsonnet => evaluate_jsonnet(src, &dir)?,
            _ => String::from_utf8(src.to_vec()).map_err(|e| Error::ConfigParse {
                message: format!("{} is not valid UTF-8: {e}", path.display()),
            })?,
        };

        let mut evaluator = self.evaluator();
        let first = evaluator.first_pass(&text)?;
        let config = format.parse(&first)?;
        cron::validate_rules(&config.rules)?;

        let ctx = PluginContext {
            dir: dir.clone(),
            region: config.base.region.clone(),
        };
        self.registry.setup(&config.plugins, &ctx, &mut evaluator)?;

        let second = evaluator.second_pass(&first)?;
        let mut config = format.parse(&second)?;
        config.dir = dir;
        if config.base.tracking_id.is_empty() {
            config.base.tracking_id.clone_from(&config.base.cluster);
        }
        config.base.account_id = account_id.to_string();

        let base = config.base.clone();
        let role = config.role.clone();
        for rule in &mut config.rules {
            rule.merge_base_config(&base, &role);
        }
        debug!("loaded {} rule(s) from {}", config.rules.len(), path.display());
        Ok(config)
    }

    /// Read and load a config file; `~` is expanded
    pub fn load_file(&self, path: &Path, account_id: &str) -> Result<Config> {
        let path = PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned());
        if !path.is_file() {
            return Err(Error::ConfigNotFound(path));
        }
        let src = fs::read(&path)?;
        self.load(&src, account_id, &path)
    }
}

/// Load a config file with the builtin plugins and the process environment
pub fn load_config_file(path: &Path, account_id: &str) -> Result<Config> {
    Loader::new().load_file(path, account_id)
}

fn evaluate_jsonnet(src: &[u8], dir: &Path) -> Result<String> {
    let dir = dir.to_string_lossy().into_owned();
    let mut args = Vec::new();
    if !dir.is_empty() {
        args.extend(["-J", dir.as_str()]);
    }
    args.push("-");
    runner::run_with_input("jsonnet", &args, src).map_err(|e| Error::ConfigParse {
        message: format!("jsonnet evaluation failed: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Deferred;

    const YAML: &str = r#"
region: us-east-1
cluster: {{ env "CLUSTER" "main" }}
role: shared
rules:
  - name: nightly
    scheduleExpression: cron(0 0 * * ? *)
    taskDefinition: report
    containerOverrides:
      - name: app
        command: [report]
        environment:
          APP_ENV: {{ env "APP_ENV" "dev" }}
          DB_PASSWORD: {{ must_env "DB_PASSWORD" }}
  - name: hourly
    scheduleExpression: rate(1 hour)
    taskDefinition: sync
    role: custom
    cluster: other
"#;

    fn loader() -> Loader {
        Loader::new().with_env(|key| match key {
            "APP_ENV" => Some("prod".to_string()),
            _ => None,
        })
    }

    #[test]
    fn test_load_yaml_merges_defaults() {
        let config = loader()
            .load(YAML.as_bytes(), "123456789012", Path::new("ecschedule.yaml"))
            .unwrap();

        assert_eq!(config.base.tracking_id, "main");
        assert_eq!(config.base.account_id, "123456789012");
        let nightly = config.rule_by_name("nightly").unwrap();
        assert_eq!(nightly.base.cluster, "main");
        assert_eq!(nightly.base.region, "us-east-1");
        assert_eq!(nightly.target.role, "shared");
        assert_eq!(nightly.role_arn(), "arn:aws:iam::123456789012:role/shared");

        let hourly = config.rule_by_name("hourly").unwrap();
        assert_eq!(hourly.base.cluster, "other");
        assert_eq!(hourly.base.tracking_id, "main");
        assert_eq!(hourly.target.role, "custom");
    }

    #[test]
    fn test_undefined_must_env_stays_deferred() {
        let config = loader()
            .load(YAML.as_bytes(), "123456789012", Path::new("ecschedule.yml"))
            .unwrap();
        let env = &config.rule_by_name("nightly").unwrap().target.container_overrides[0].environment;
        assert_eq!(env["APP_ENV"], "prod");
        assert_eq!(
            Deferred::scan(&env["DB_PASSWORD"]),
            vec![Deferred::Env("DB_PASSWORD".into())]
        );
    }

    #[test]
    fn test_load_json() {
        let json = r#"{
            "region": "us-east-1",
            "cluster": "main",
            "trackingId": "team-a",
            "rules": [{"name": "r", "scheduleExpression": "rate(5 minutes)", "taskDefinition": "t", "taskCount": 3}]
        }"#;
        let config = loader()
            .load(json.as_bytes(), "123456789012", Path::new("conf/ecschedule.json"))
            .unwrap();
        assert_eq!(config.dir, Path::new("conf"));
        assert_eq!(config.base.tracking_id, "team-a");
        assert_eq!(config.rules[0].task_count(), 3);
        assert_eq!(config.rules[0].base.tracking_id, "team-a");
    }

    #[test]
    fn test_invalid_schedules_are_aggregated() {
        let yaml = r"
cluster: main
rules:
  - name: ok
    scheduleExpression: rate(1 day)
  - name: bad1
    scheduleExpression: cron(0 0 * * *)
  - name: bad2
    scheduleExpression: every day
";
        let err = loader()
            .load(yaml.as_bytes(), "1", Path::new("c.yaml"))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("rule \"bad1\""));
        assert!(message.contains("rule \"bad2\""));
        assert!(!message.contains("rule \"ok\""));
    }

    #[test]
    fn test_unknown_plugin_is_fatal() {
        let yaml = "cluster: main\nplugins:\n  - name: consul\nrules: []\n";
        let err = loader()
            .load(yaml.as_bytes(), "1", Path::new("c.yaml"))
            .unwrap_err();
        assert_eq!(err.to_string(), "plugin error: plugin consul is not available (known: ssm, tfstate)");
    }

    #[test]
    fn test_parse_error() {
        let err = loader()
            .load(b"rules: [", "1", Path::new("c.yaml"))
            .unwrap_err();
        assert!(matches!(err, Error::ConfigParse { .. }));
    }

    #[test]
    fn test_tfstate_plugin_resolved_in_second_pass() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("terraform.tfstate"),
            r#"{"version": 4, "resources": [{"mode": "managed", "type": "aws_ecs_cluster", "name": "main",
                "instances": [{"attributes": {"name": "batch"}}]}]}"#,
        )
        .unwrap();
        let path = dir.path().join("ecschedule.yaml");
        fs::write(
            &path,
            r#"
region: us-east-1
cluster: {{ tfstate "aws_ecs_cluster.main.name" }}
plugins:
  - name: tfstate
    config:
      path: terraform.tfstate
rules:
  - name: nightly
    scheduleExpression: cron(0 0 * * ? *)
    taskDefinition: report
"#,
        )
        .unwrap();

        let config = loader().load_file(&path, "123456789012").unwrap();
        assert_eq!(config.base.cluster, "batch");
        assert_eq!(config.rules[0].base.cluster, "batch");
        assert_eq!(config.dir, dir.path());
    }

    #[test]
    fn test_plugin_key_from_env() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("terraform.tfstate"),
            r#"{"version": 4, "resources": [{"mode": "managed", "type": "aws_ecs_cluster", "name": "batch",
                "instances": [{"attributes": {"name": "nightly-batch"}}]}]}"#,
        )
        .unwrap();
        let path = dir.path().join("ecschedule.yaml");
        fs::write(
            &path,
            r#"
region: us-east-1
cluster: {{ tfstate (env "CLUSTER_ADDRESS" "aws_ecs_cluster.main.name") }}
plugins:
  - name: tfstate
    config:
      path: terraform.tfstate
rules:
  - name: nightly
    scheduleExpression: cron(0 0 * * ? *)
    taskDefinition: report
"#,
        )
        .unwrap();

        let config = Loader::new()
            .with_env(|key| (key == "CLUSTER_ADDRESS").then(|| "aws_ecs_cluster.batch.name".to_string()))
            .load_file(&path, "123456789012")
            .unwrap();
        assert_eq!(config.base.cluster, "nightly-batch");
        assert_eq!(config.rules[0].base.cluster, "nightly-batch");
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = loader()
            .load_file(&dir.path().join("missing.yaml"), "1")
            .unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound(_)));
    }

    #[test]
    fn test_select() {
        let config = loader()
            .load(YAML.as_bytes(), "1", Path::new("c.yaml"))
            .unwrap();
        assert_eq!(config.select(None).unwrap().len(), 2);
        assert_eq!(config.select(Some("hourly")).unwrap()[0].name, "hourly");
        assert_eq!(
            config.select(Some("nope")).unwrap_err().to_string(),
            "no rules found for nope"
        );
        assert_eq!(config.rule_names(), vec!["nightly", "hourly"]);
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.json")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path(Path::new("a.libsonnet")), ConfigFormat::Jsonnet);
        assert_eq!(ConfigFormat::from_path(Path::new("a.yml")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.conf")), ConfigFormat::Yaml);
    }
}
