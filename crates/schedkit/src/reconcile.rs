//! Apply, delete and run rules against the remote platform.
//!
//! Every mutating path validates first: deferred environment variables and
//! external references left in the rule abort before any remote write, and
//! `apply` also checks that the task definition exists. Writes happen in a
//! fixed order and are never rolled back; a failure after the first write
//! surfaces as [`Error::PartialApply`].

use crate::arn::TRACKING_TAG_KEY;
use crate::backend::Clients;
use crate::backend::types::Tag;
use crate::diff::{self, DiffFormat, format_diff};
use crate::error::{Error, Result};
use crate::fetch::RuleGetter;
use crate::rule::Rule;
use crate::template::Deferred;
use log::{debug, info};

/// What `apply` or `delete` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Remote state already matched
    NoChange,
    /// Changes were only logged; carries the rendered diff
    DryRun(String),
    /// Changes were written
    Applied,
}

/// Drives remote changes for individual rules
#[derive(Clone)]
pub struct Reconciler {
    clients: Clients,
}

impl Reconciler {
    /// Reconciler talking to `clients`
    pub fn new(clients: Clients) -> Self {
        Self { clients }
    }

    /// The clients in use
    pub fn clients(&self) -> &Clients {
        &self.clients
    }

    /// Remote reader scoped to a rule's account, region and cluster
    pub fn getter(&self, rule: &Rule) -> RuleGetter {
        RuleGetter::for_rule(self.clients.events.clone(), rule)
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Fail if the rule still contains undefined environment variables
    pub fn validate_env(rule: &Rule) -> Result<()> {
        let names: Vec<String> = deferred_in(rule)?
            .into_iter()
            .filter_map(|d| match d {
                Deferred::Env(name) => Some(name),
                Deferred::Call { .. } => None,
            })
            .collect();
        match names.as_slice() {
            [] => Ok(()),
            [name] => Err(Error::UnresolvedEnv(format!(
                "environment variable {name} is not defined"
            ))),
            _ => Err(Error::UnresolvedEnv(format!(
                "environment variables {} are not defined",
                names.join(" and ")
            ))),
        }
    }

    /// Fail if the rule still contains unresolved external lookups
    pub fn validate_references(rule: &Rule) -> Result<()> {
        let json = serde_json::to_string(rule)?;
        let mut calls: Vec<String> = Vec::new();
        for d in Deferred::scan(&json) {
            let call = d.to_string();
            if matches!(d, Deferred::Call { .. }) && !calls.contains(&call) {
                calls.push(call);
            }
        }
        match calls.as_slice() {
            [] => Ok(()),
            [call] => Err(Error::UnresolvedReference(format!(
                "external reference {call} is not resolved"
            ))),
            _ => Err(Error::UnresolvedReference(format!(
                "external references {} are not resolved",
                calls.join(" and ")
            ))),
        }
    }

    /// Fail if the rule's task definition does not exist
    pub fn validate_task_definition(&self, rule: &Rule) -> Result<()> {
        let arn = rule.task_definition_arn();
        if self.clients.ecs.describe_task_definition(&arn)? {
            Ok(())
        } else {
            Err(Error::TaskDefinitionNotFound {
                task_definition: arn,
            })
        }
    }

    /// Every validation failure of a rule, as messages
    pub fn validate(&self, rule: &Rule) -> Vec<String> {
        [
            Self::validate_env(rule),
            Self::validate_references(rule),
            self.validate_task_definition(rule),
        ]
        .into_iter()
        .filter_map(|result| result.err().map(|e| e.to_string()))
        .collect()
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Remote and local YAML of a rule
    pub fn diff(&self, rule: &Rule) -> Result<(String, String)> {
        diff::diff(rule, &self.getter(rule))
    }

    /// Make the remote rule match the local one
    pub fn apply(&self, rule: &Rule, dry_run: bool) -> Result<ApplyOutcome> {
        Self::validate_env(rule)?;
        Self::validate_references(rule)?;
        self.validate_task_definition(rule)?;

        let (from, to) = self.diff(rule)?;
        if from == to {
            info!("[{}] skip applying. no differences", rule.name);
            return Ok(ApplyOutcome::NoChange);
        }
        let rendered = format_diff(&rule.name, &from, &to, DiffFormat::PrettyColored);
        info!(
            "[{}] applying following changes{}\n{rendered}",
            rule.name,
            dry_run_suffix(dry_run)
        );
        if dry_run {
            return Ok(ApplyOutcome::DryRun(rendered));
        }

        let targets = rule.put_targets_request()?;
        let events = &self.clients.events;
        events.put_rule(&rule.put_rule_request())?;
        events
            .put_targets(&targets)
            .map_err(|e| partial(rule, "put-targets", e))?;
        if rule.base.tracking_id.is_empty() {
            debug!("[{}] no tracking id, not tagging", rule.name);
        } else {
            let tag = Tag {
                key: TRACKING_TAG_KEY.to_string(),
                value: rule.base.tracking_id.clone(),
            };
            events
                .tag_resource(&rule.rule_arn(), &[tag])
                .map_err(|e| partial(rule, "tag-resource", e))?;
        }
        info!("[{}] applied", rule.name);
        Ok(ApplyOutcome::Applied)
    }

    /// Remove the remote rule and its target
    pub fn delete(&self, rule: &Rule, dry_run: bool) -> Result<ApplyOutcome> {
        let Some(remote) = self.getter(rule).fetch_remote_rule(&rule.name)? else {
            info!("[{}] rule does not exist. skip deleting", rule.name);
            return Ok(ApplyOutcome::NoChange);
        };
        let from = remote.to_yaml()?;
        let rendered = format_diff(&rule.name, &from, "", DiffFormat::PrettyColored);
        info!(
            "[{}] deleting rule{}\n{rendered}",
            rule.name,
            dry_run_suffix(dry_run)
        );
        if dry_run {
            return Ok(ApplyOutcome::DryRun(rendered));
        }

        let events = &self.clients.events;
        events.remove_targets(&rule.name, &[remote.target_id().to_string()])?;
        events
            .delete_rule(&rule.name)
            .map_err(|e| partial(rule, "delete-rule", e))?;
        info!("[{}] deleted", rule.name);
        Ok(ApplyOutcome::Applied)
    }

    /// Launch the rule's task once, returning the started task ARNs
    pub fn run(&self, rule: &Rule, dry_run: bool) -> Result<Vec<String>> {
        Self::validate_env(rule)?;
        Self::validate_references(rule)?;
        let request = rule.run_task_request();
        if dry_run {
            info!(
                "[{}] running task {}{}",
                rule.name,
                request.task_definition,
                dry_run_suffix(true)
            );
            return Ok(Vec::new());
        }

        let response = self.clients.ecs.run_task(&request)?;
        if let Some(failure) = response.failures.into_iter().next() {
            return Err(Error::RunTask {
                arn: failure.arn,
                reason: failure.reason,
            });
        }
        for arn in &response.task_arns {
            info!("[{}] started task {arn}", rule.name);
        }
        Ok(response.task_arns)
    }
}

/// Deferred values left anywhere in the rule, deduplicated, in order
///
/// Values nested in the arguments of a deferred call are included, so an
/// undefined variable used as a plugin key is reported as well.
fn deferred_in(rule: &Rule) -> Result<Vec<Deferred>> {
    let json = serde_json::to_string(rule)?;
    let mut seen = Vec::new();
    for d in Deferred::scan_nested(&json) {
        if !seen.contains(&d) {
            seen.push(d);
        }
    }
    Ok(seen)
}

fn partial(rule: &Rule, step: &str, source: Error) -> Error {
    Error::PartialApply {
        rule: rule.name.clone(),
        step: step.to_string(),
        source: Box::new(source),
    }
}

fn dry_run_suffix(dry_run: bool) -> &'static str {
    if dry_run { " (dry-run)" } else { "" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::backend::types::RunTaskFailure;
    use crate::error::ErrorCategory;
    use crate::rule::{BaseConfig, ContainerOverride, Target};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    const TASK_DEFINITION: &str = "arn:aws:ecs:us-east-1:123456789012:task-definition/report:1";
    const RULE_ARN: &str = "arn:aws:events:us-east-1:123456789012:rule/nightly";

    fn setup() -> (Arc<MemoryBackend>, Reconciler) {
        let backend = Arc::new(MemoryBackend::new("us-east-1", "123456789012"));
        backend.add_task_definition(TASK_DEFINITION);
        let reconciler = Reconciler::new(Clients::from_backend(backend.clone()));
        (backend, reconciler)
    }

    fn rule_with_env(env: &[(&str, String)]) -> Rule {
        let base = BaseConfig {
            region: "us-east-1".into(),
            cluster: "main".into(),
            tracking_id: "team-a".into(),
            account_id: "123456789012".into(),
        };
        let mut rule = Rule {
            name: "nightly".into(),
            schedule_expression: "cron(0 0 * * ? *)".into(),
            target: Target {
                task_definition: "report:1".into(),
                container_overrides: vec![ContainerOverride {
                    name: "app".into(),
                    environment: env
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), v.clone()))
                        .collect::<BTreeMap<_, _>>(),
                    ..Default::default()
                }],
                ..Default::default()
            },
            ..Default::default()
        };
        rule.merge_base_config(&base, "");
        rule
    }

    fn rule() -> Rule {
        rule_with_env(&[("APP_ENV", "prod".to_string())])
    }

    #[test]
    fn test_apply_writes_in_order() {
        let (backend, reconciler) = setup();
        let outcome = reconciler.apply(&rule(), false).unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(
            backend.calls(),
            vec![
                "put-rule nightly".to_string(),
                "put-targets nightly".to_string(),
                format!("tag-resource {RULE_ARN}"),
            ]
        );
        assert_eq!(
            backend.tags(RULE_ARN),
            vec![Tag {
                key: "ecschedule:tracking-id".into(),
                value: "team-a".into(),
            }]
        );
    }

    #[test]
    fn test_second_apply_is_a_no_op() {
        let (backend, reconciler) = setup();
        reconciler.apply(&rule(), false).unwrap();
        let calls = backend.calls().len();
        assert_eq!(reconciler.apply(&rule(), false).unwrap(), ApplyOutcome::NoChange);
        assert_eq!(backend.calls().len(), calls);
    }

    #[test]
    fn test_dry_run_never_mutates() {
        let (backend, reconciler) = setup();
        let ApplyOutcome::DryRun(rendered) = reconciler.apply(&rule(), true).unwrap() else {
            panic!("expected a dry run");
        };
        assert!(rendered.contains("\x1b[32m+name: nightly"));
        assert!(rendered.contains("+scheduleExpression: "));
        assert!(backend.calls().is_empty());
        assert!(backend.rule("nightly").is_none());
    }

    #[test]
    fn test_dry_run_in_sync_rule() {
        let (backend, reconciler) = setup();
        reconciler.apply(&rule(), false).unwrap();
        let calls = backend.calls();
        assert_eq!(reconciler.apply(&rule(), true).unwrap(), ApplyOutcome::NoChange);
        assert_eq!(backend.calls(), calls);
    }

    #[test]
    fn test_dry_run_with_drift_after_apply() {
        let (backend, reconciler) = setup();
        reconciler.apply(&rule(), false).unwrap();
        let calls = backend.calls();

        let mut changed = rule();
        changed.schedule_expression = "rate(1 hour)".into();
        let ApplyOutcome::DryRun(rendered) = reconciler.apply(&changed, true).unwrap() else {
            panic!("expected a dry run");
        };
        assert!(rendered.contains("-scheduleExpression: "));
        assert!(rendered.contains("+scheduleExpression: rate(1 hour)"));
        assert_eq!(backend.calls(), calls);
        assert_eq!(
            backend.rule("nightly").unwrap().schedule_expression.as_deref(),
            Some("cron(0 0 * * ? *)")
        );
    }

    #[test]
    fn test_unresolved_env_blocks_apply() {
        let (backend, reconciler) = setup();
        let rule = rule_with_env(&[
            ("A", Deferred::Env("DB_USER".into()).token()),
            ("B", Deferred::Env("DB_PASSWORD".into()).token()),
            ("C", Deferred::Env("DB_USER".into()).token()),
        ]);
        let err = reconciler.apply(&rule, false).unwrap_err();
        assert_eq!(
            err.to_string(),
            "environment variables DB_USER and DB_PASSWORD are not defined"
        );
        assert!(err.category().is_local());
        assert!(backend.calls().is_empty());

        let single = rule_with_env(&[("A", Deferred::Env("TOKEN".into()).token())]);
        assert_eq!(
            Reconciler::validate_env(&single).unwrap_err().to_string(),
            "environment variable TOKEN is not defined"
        );
    }

    #[test]
    fn test_unresolved_reference_blocks_apply() {
        let (backend, reconciler) = setup();
        let call = Deferred::call("tfstate", &["aws_sqs_queue.dlq.arn".to_string()]);
        let rule = rule_with_env(&[("QUEUE", call.token())]);
        let err = reconciler.apply(&rule, false).unwrap_err();
        assert_eq!(
            err.to_string(),
            "external reference tfstate \"aws_sqs_queue.dlq.arn\" is not resolved"
        );
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_undefined_plugin_key_reports_both() {
        let (backend, reconciler) = setup();
        let key = Deferred::Env("PARAM".into()).token();
        let rule = rule_with_env(&[("DB", Deferred::call("ssm", &[key]).token())]);

        let messages = reconciler.validate(&rule);
        assert_eq!(messages[0], "environment variable PARAM is not defined");
        assert_eq!(messages[1], "external reference ssm (must_env \"PARAM\") is not resolved");
        assert!(reconciler.apply(&rule, false).is_err());
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_missing_task_definition() {
        let (backend, reconciler) = setup();
        let mut rule = rule();
        rule.target.task_definition = "report:2".into();
        let err = reconciler.apply(&rule, false).unwrap_err();
        assert!(matches!(err, Error::TaskDefinitionNotFound { .. }));
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_partial_apply_is_reported() {
        let (backend, reconciler) = setup();
        backend.fail_on("put-targets");
        let err = reconciler.apply(&rule(), false).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Partial);
        assert!(backend.rule("nightly").is_some());
        assert!(backend.targets("nightly").is_empty());
    }

    #[test]
    fn test_validate_collects_everything() {
        let (_, reconciler) = setup();
        let mut rule = rule_with_env(&[
            ("A", Deferred::Env("X".into()).token()),
            ("B", Deferred::call("ssm", &["/db".to_string()]).token()),
        ]);
        rule.target.task_definition = "missing".into();
        let messages = reconciler.validate(&rule);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], "environment variable X is not defined");
        assert!(messages[1].contains("ssm \"/db\""));
        assert!(messages[2].contains("task definition not found"));
        assert!(reconciler.validate(&self::rule()).is_empty());
    }

    #[test]
    fn test_delete_removes_targets_first() {
        let (backend, reconciler) = setup();
        reconciler.apply(&rule(), false).unwrap();
        let before = backend.calls().len();

        let outcome = reconciler.delete(&rule(), true).unwrap();
        assert!(matches!(outcome, ApplyOutcome::DryRun(rendered) if rendered.contains("-name: nightly")));
        assert_eq!(backend.calls().len(), before);

        assert_eq!(reconciler.delete(&rule(), false).unwrap(), ApplyOutcome::Applied);
        assert_eq!(
            backend.calls()[before..],
            ["remove-targets nightly".to_string(), "delete-rule nightly".to_string()]
        );
        assert!(backend.rule("nightly").is_none());
        assert_eq!(reconciler.delete(&rule(), false).unwrap(), ApplyOutcome::NoChange);
    }

    #[test]
    fn test_run_task() {
        let (backend, reconciler) = setup();
        let arns = reconciler.run(&rule(), false).unwrap();
        assert_eq!(arns.len(), 1);
        assert!(arns[0].starts_with("arn:aws:ecs:us-east-1:123456789012:task/main/"));
        assert_eq!(backend.calls(), vec![format!("run-task {TASK_DEFINITION}")]);

        assert!(reconciler.run(&rule(), true).unwrap().is_empty());
        assert_eq!(backend.calls().len(), 1);
    }

    #[test]
    fn test_run_task_failure() {
        let (backend, reconciler) = setup();
        backend.set_run_failures(vec![RunTaskFailure {
            arn: TASK_DEFINITION.into(),
            reason: "MISSING".into(),
        }]);
        let err = reconciler.run(&rule(), false).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("failed to run task. Arn: \"{TASK_DEFINITION}\": MISSING")
        );
    }

    #[test]
    fn test_run_requires_resolved_env() {
        let (backend, reconciler) = setup();
        let rule = rule_with_env(&[("A", Deferred::Env("SECRET".into()).token())]);
        assert!(reconciler.run(&rule, false).is_err());
        assert!(backend.calls().is_empty());
    }
}
