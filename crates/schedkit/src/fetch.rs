//! Rebuild rules from remote state.
//!
//! A remote rule is reconstructed into the same canonical shape that
//! [`Rule::canonical`] produces locally, so the two serialize identically
//! when nothing drifted. Rules this tool could not have produced (foreign
//! account or region, several targets, another cluster, non-ECS targets)
//! reconstruct to `None`. A target whose `Input` payload cannot be decoded
//! is an error: the rule looks like ours but its overrides are corrupt.

use crate::arn::{self, ArnScope};
use crate::backend::EventsApi;
use crate::backend::types::{EventTarget, RuleSummary, TaskOverrideInput};
use crate::error::{Error, Result};
use crate::rule::{
    AwsVpcConfiguration, BaseConfig, CapacityProviderStrategyItem, ContainerOverride,
    DeadLetterConfig, NetworkConfiguration, Rule, Target, TaskOverride,
};
use log::debug;
use std::sync::Arc;

/// Reads rules of one account, region and cluster
pub struct RuleGetter {
    events: Arc<dyn EventsApi>,
    scope: ArnScope,
    cluster_arn: String,
    default_role_arn: String,
}

impl RuleGetter {
    /// Getter for the given shared settings and fallback role
    pub fn new(events: Arc<dyn EventsApi>, base: &BaseConfig, default_role: &str) -> Self {
        Self {
            events,
            scope: base.arn_scope(),
            cluster_arn: base.cluster_arn(),
            default_role_arn: arn::role_arn(&base.account_id, default_role),
        }
    }

    /// Getter matching a merged local rule
    pub fn for_rule(events: Arc<dyn EventsApi>, rule: &Rule) -> Self {
        Self::new(events, &rule.base, rule.default_role())
    }

    /// Remote rule with the exact name, if it exists and is representable
    pub fn fetch_remote_rule(&self, name: &str) -> Result<Option<Rule>> {
        let rules = self.events.list_rules(Some(name))?;
        match rules.iter().find(|r| r.name == name) {
            Some(summary) => self.get_rule(summary),
            None => {
                debug!("rule {name} does not exist remotely");
                Ok(None)
            }
        }
    }

    /// Every representable remote rule
    pub fn fetch_all_rules(&self) -> Result<Vec<Rule>> {
        let mut rules = Vec::new();
        for summary in self.events.list_rules(None)? {
            if let Some(rule) = self.get_rule(&summary)? {
                rules.push(rule);
            }
        }
        Ok(rules)
    }

    /// Reconstruct one rule from its summary and targets
    pub fn get_rule(&self, summary: &RuleSummary) -> Result<Option<Rule>> {
        if !summary.arn.starts_with(&self.scope.rule) {
            debug!("skipping {}: not in this account and region", summary.arn);
            return Ok(None);
        }
        let mut targets = self.events.list_targets_by_rule(&summary.name)?;
        if targets.len() != 1 {
            debug!("skipping {}: {} targets", summary.name, targets.len());
            return Ok(None);
        }
        let target = targets.remove(0);
        if target.arn != self.cluster_arn {
            debug!("skipping {}: targets {}", summary.name, target.arn);
            return Ok(None);
        }
        self.reconstruct(summary, target)
    }

    fn reconstruct(&self, summary: &RuleSummary, target: EventTarget) -> Result<Option<Rule>> {
        let Some(ecs) = target.ecs_parameters else {
            debug!("skipping {}: not an ECS target", summary.name);
            return Ok(None);
        };
        let scope = &self.scope;

        let overrides: TaskOverrideInput = match target.input.as_deref() {
            None | Some("") => TaskOverrideInput::default(),
            Some(input) => {
                serde_json::from_str(input).map_err(|e| Error::InvalidTargetInput {
                    rule: summary.name.clone(),
                    message: e.to_string(),
                })?
            }
        };
        let task_override = TaskOverride {
            cpu: overrides.cpu,
            memory: overrides.memory,
        };

        let role = match target.role_arn {
            Some(role) if role != self.default_role_arn => arn::strip(&scope.role, &role).to_string(),
            _ => String::new(),
        };

        Ok(Some(Rule {
            name: summary.name.clone(),
            description: summary.description.clone().unwrap_or_default(),
            schedule_expression: summary.schedule_expression.clone().unwrap_or_default(),
            disabled: summary.state.as_deref() == Some("DISABLED"),
            target: Target {
                target_id: if target.id == summary.name {
                    String::new()
                } else {
                    target.id
                },
                task_definition: arn::strip(&scope.task_definition, &ecs.task_definition_arn)
                    .to_string(),
                task_count: match ecs.task_count {
                    None | Some(1) => 0,
                    Some(n) => n,
                },
                container_overrides: overrides
                    .container_overrides
                    .into_iter()
                    .map(|co| ContainerOverride {
                        name: co.name,
                        command: co.command,
                        environment: co
                            .environment
                            .into_iter()
                            .map(|kv| (kv.name, kv.value))
                            .collect(),
                        cpu: co.cpu,
                        memory: co.memory,
                        memory_reservation: co.memory_reservation,
                    })
                    .collect(),
                task_override: (task_override.cpu.is_some() || task_override.memory.is_some())
                    .then_some(task_override),
                role,
                group: ecs.group.unwrap_or_default(),
                launch_type: ecs.launch_type.unwrap_or_default(),
                platform_version: ecs.platform_version.unwrap_or_default(),
                network_configuration: ecs.network_configuration.map(|nc| {
                    let vpc = nc.awsvpc_configuration;
                    NetworkConfiguration {
                        aws_vpc_configuration: AwsVpcConfiguration {
                            subnets: vpc.subnets,
                            security_groups: vpc.security_groups,
                            assign_public_ip: vpc.assign_public_ip.unwrap_or_default(),
                        },
                    }
                }),
                dead_letter_config: target.dead_letter_config.map(|dlc| DeadLetterConfig {
                    sqs: arn::strip(&scope.sqs, &dlc.arn).to_string(),
                }),
                propagate_tags: ecs.propagate_tags.filter(|p| !p.is_empty()),
                capacity_provider_strategy: ecs
                    .capacity_provider_strategy
                    .into_iter()
                    .map(|item| CapacityProviderStrategyItem {
                        capacity_provider: item.capacity_provider,
                        weight: item.weight,
                        base: item.base,
                    })
                    .collect(),
            },
            ..Default::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::backend::types::EcsParameters;
    use std::collections::BTreeMap;

    fn base() -> BaseConfig {
        BaseConfig {
            region: "us-east-1".into(),
            cluster: "main".into(),
            tracking_id: "main".into(),
            account_id: "123456789012".into(),
        }
    }

    fn local() -> Rule {
        let mut rule = Rule {
            name: "nightly".into(),
            description: "nightly report".into(),
            schedule_expression: "cron(0 3 * * ? *)".into(),
            target: Target {
                task_definition: "report:7".into(),
                task_count: 2,
                role: "batch".into(),
                launch_type: "FARGATE".into(),
                container_overrides: vec![ContainerOverride {
                    name: "app".into(),
                    command: vec!["report".into()],
                    environment: BTreeMap::from([("APP_ENV".to_string(), "prod".to_string())]),
                    ..Default::default()
                }],
                task_override: Some(TaskOverride {
                    cpu: Some("512".into()),
                    memory: None,
                }),
                network_configuration: Some(NetworkConfiguration {
                    aws_vpc_configuration: AwsVpcConfiguration {
                        subnets: vec!["subnet-1".into()],
                        security_groups: vec!["sg-1".into()],
                        assign_public_ip: "DISABLED".into(),
                    },
                }),
                dead_letter_config: Some(DeadLetterConfig { sqs: "dlq".into() }),
                ..Default::default()
            },
            ..Default::default()
        };
        rule.merge_base_config(&base(), "");
        rule
    }

    fn seed(backend: &MemoryBackend, rule: &Rule) {
        let request = rule.put_rule_request();
        backend.insert_rule(
            RuleSummary {
                name: request.name,
                arn: rule.rule_arn(),
                description: Some(request.description),
                schedule_expression: Some(request.schedule_expression),
                state: Some(request.state),
                role_arn: Some(request.role_arn),
            },
            vec![rule.event_target().unwrap()],
        );
    }

    fn getter(backend: Arc<MemoryBackend>) -> RuleGetter {
        RuleGetter::new(backend, &base(), arn::DEFAULT_ROLE)
    }

    #[test]
    fn test_reconstruction_matches_local_canonical() {
        let backend = Arc::new(MemoryBackend::new("us-east-1", "123456789012"));
        let rule = local();
        seed(&backend, &rule);

        let remote = getter(backend).fetch_remote_rule("nightly").unwrap().unwrap();
        assert_eq!(remote, rule.canonical());
        assert_eq!(remote.to_yaml().unwrap(), rule.canonical().to_yaml().unwrap());
    }

    #[test]
    fn test_defaults_are_omitted() {
        let backend = Arc::new(MemoryBackend::new("us-east-1", "123456789012"));
        let mut rule = local();
        rule.target.task_count = 1;
        rule.target.role = String::new();
        rule.merge_base_config(&base(), "");
        seed(&backend, &rule);

        let remote = getter(backend).fetch_remote_rule("nightly").unwrap().unwrap();
        assert_eq!(remote.target.task_count, 0);
        assert!(remote.target.role.is_empty());
        assert!(remote.target.target_id.is_empty());
        assert_eq!(remote.target.task_definition, "report:7");
        assert_eq!(remote.target.dead_letter_config.unwrap().sqs, "dlq");
    }

    #[test]
    fn test_missing_rule() {
        let backend = Arc::new(MemoryBackend::new("us-east-1", "123456789012"));
        let mut other = local();
        other.name = "nightly-extra".into();
        seed(&backend, &other);
        assert!(getter(backend).fetch_remote_rule("nightly").unwrap().is_none());
    }

    #[test]
    fn test_unrepresentable_rules_are_skipped() {
        let backend = Arc::new(MemoryBackend::new("us-east-1", "123456789012"));
        let rule = local();
        let target = rule.event_target().unwrap();
        let summary = |name: &str, arn: &str| RuleSummary {
            name: name.into(),
            arn: arn.into(),
            ..Default::default()
        };

        backend.insert_rule(
            summary("two-targets", "arn:aws:events:us-east-1:123456789012:rule/two-targets"),
            vec![target.clone(), target.clone()],
        );
        backend.insert_rule(
            summary("foreign", "arn:aws:events:eu-west-1:123456789012:rule/foreign"),
            vec![target.clone()],
        );
        backend.insert_rule(
            summary("other-cluster", "arn:aws:events:us-east-1:123456789012:rule/other-cluster"),
            vec![EventTarget {
                arn: "arn:aws:ecs:us-east-1:123456789012:cluster/other".into(),
                ..target.clone()
            }],
        );
        backend.insert_rule(
            summary("lambda", "arn:aws:events:us-east-1:123456789012:rule/lambda"),
            vec![EventTarget {
                ecs_parameters: None,
                ..target.clone()
            }],
        );

        let getter = getter(backend);
        assert!(getter.fetch_all_rules().unwrap().is_empty());
    }

    #[test]
    fn test_undecodable_input_is_an_error() {
        let backend = Arc::new(MemoryBackend::new("us-east-1", "123456789012"));
        let target = local().event_target().unwrap();
        backend.insert_rule(
            RuleSummary {
                name: "garbled".into(),
                arn: "arn:aws:events:us-east-1:123456789012:rule/garbled".into(),
                ..Default::default()
            },
            vec![EventTarget {
                input: Some("not json".into()),
                ..target
            }],
        );

        let getter = getter(backend);
        let err = getter.fetch_remote_rule("garbled").unwrap_err();
        assert!(matches!(err, Error::InvalidTargetInput { ref rule, .. } if rule == "garbled"));
        assert!(getter.fetch_all_rules().is_err());
    }

    #[test]
    fn test_fetch_all_keeps_representable() {
        let backend = Arc::new(MemoryBackend::new("us-east-1", "123456789012"));
        seed(&backend, &local());
        backend.insert_rule(
            RuleSummary {
                name: "empty".into(),
                arn: "arn:aws:events:us-east-1:123456789012:rule/empty".into(),
                ..Default::default()
            },
            Vec::new(),
        );
        let names: Vec<_> = getter(backend)
            .fetch_all_rules()
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["nightly"]);
    }

    #[test]
    fn test_minimal_target_without_input() {
        let backend = Arc::new(MemoryBackend::new("us-east-1", "123456789012"));
        backend.insert_rule(
            RuleSummary {
                name: "bare".into(),
                arn: "arn:aws:events:us-east-1:123456789012:rule/bare".into(),
                schedule_expression: Some("rate(1 day)".into()),
                state: Some("DISABLED".into()),
                ..Default::default()
            },
            vec![EventTarget {
                id: "custom-id".into(),
                arn: "arn:aws:ecs:us-east-1:123456789012:cluster/main".into(),
                ecs_parameters: Some(EcsParameters {
                    task_definition_arn: "arn:aws:ecs:us-east-1:123456789012:task-definition/t:1"
                        .into(),
                    propagate_tags: Some(String::new()),
                    ..Default::default()
                }),
                ..Default::default()
            }],
        );
        let rule = getter(backend).fetch_remote_rule("bare").unwrap().unwrap();
        assert!(rule.disabled);
        assert_eq!(rule.target.target_id, "custom-id");
        assert_eq!(rule.target.task_definition, "t:1");
        assert!(rule.target.container_overrides.is_empty());
        assert!(rule.target.task_override.is_none());
        assert!(rule.target.propagate_tags.is_none());
    }
}
