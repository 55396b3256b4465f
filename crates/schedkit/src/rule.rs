//! Rule model: a schedule trigger bound to exactly one ECS task target.
//!
//! A [`Rule`] composes a [`Target`] and a [`BaseConfig`]. Both are flattened
//! when (de)serialized, so a config file lists every field directly on the
//! rule. Shared defaults are copied in once by [`Rule::merge_base_config`].

use crate::arn::{self, DEFAULT_ROLE};
use crate::backend::types::{
    ContainerOverrideInput, DeadLetterTarget, EcsAwsVpcConfiguration, EcsNetworkConfiguration,
    EcsParameters, EventTarget, EventsAwsVpcConfiguration, EventsCapacityProvider,
    EventsNetworkConfiguration, KeyValuePair, PutRuleRequest, PutTargetsRequest, RunTaskRequest,
    TaskOverrideInput,
};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(value: &i64) -> bool {
    *value == 0
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero_i32(value: &i32) -> bool {
    *value == 0
}

/// Shared defaults inherited by every rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseConfig {
    /// AWS region
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,
    /// ECS cluster name or ARN
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster: String,
    /// Tag value scoping orphan discovery; defaults to the cluster
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tracking_id: String,
    /// Account id, supplied by the caller rather than the file
    #[serde(skip)]
    pub account_id: String,
}

impl BaseConfig {
    /// Prefixes for this account and region
    pub fn arn_scope(&self) -> arn::ArnScope {
        arn::ArnScope::new(&self.region, &self.account_id)
    }

    /// Cluster ARN
    pub fn cluster_arn(&self) -> String {
        arn::qualify(
            &arn::cluster_prefix(&self.region, &self.account_id),
            &self.cluster,
        )
    }
}

/// A scheduled task definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Rule name, unique within a config
    pub name: String,
    /// Free-form description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// `cron(...)` or `rate(...)`
    #[serde(default)]
    pub schedule_expression: String,
    /// Whether the rule is disabled
    #[serde(default, skip_serializing_if = "is_false")]
    pub disabled: bool,
    /// Task launched by the rule
    #[serde(flatten)]
    pub target: Target,
    /// Per-rule overrides of the shared defaults
    #[serde(flatten)]
    pub base: BaseConfig,
    /// Role the config falls back to; set by `merge_base_config`
    #[serde(skip)]
    pub(crate) default_role: String,
}

/// ECS task launch parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    /// Target id; defaults to the rule name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_id: String,
    /// Task definition family[:revision] or ARN
    #[serde(default)]
    pub task_definition: String,
    /// Number of tasks; values below 1 mean 1
    #[serde(default, skip_serializing_if = "is_zero")]
    pub task_count: i64,
    /// Per-container overrides
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub container_overrides: Vec<ContainerOverride>,
    /// Task-level cpu/memory overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_override: Option<TaskOverride>,
    /// Role name or ARN
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role: String,
    /// Task group
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    /// Launch type
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub launch_type: String,
    /// Fargate platform version
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub platform_version: String,
    /// awsvpc network settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_configuration: Option<NetworkConfiguration>,
    /// Dead-letter queue
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter_config: Option<DeadLetterConfig>,
    /// Tag propagation (`TASK_DEFINITION`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub propagate_tags: Option<String>,
    /// Capacity provider strategy
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capacity_provider_strategy: Vec<CapacityProviderStrategyItem>,
}

/// Overrides for one container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerOverride {
    /// Container name
    pub name: String,
    /// Command
    #[serde(default)]
    pub command: Vec<String>,
    /// Environment variables, kept sorted
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    /// CPU units
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<i32>,
    /// Hard memory limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<i32>,
    /// Soft memory limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_reservation: Option<i32>,
}

/// Task-level overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOverride {
    /// Task CPU
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    /// Task memory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

impl TaskOverride {
    fn is_empty(&self) -> bool {
        self.cpu.is_none() && self.memory.is_none()
    }
}

/// awsvpc network configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfiguration {
    /// VPC settings
    pub aws_vpc_configuration: AwsVpcConfiguration,
}

/// VPC settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsVpcConfiguration {
    /// Subnet ids
    #[serde(default)]
    pub subnets: Vec<String>,
    /// Security group ids
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_groups: Vec<String>,
    /// `ENABLED` or `DISABLED`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub assign_public_ip: String,
}

/// Dead-letter queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterConfig {
    /// Queue name or ARN
    pub sqs: String,
}

/// Capacity provider strategy item
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityProviderStrategyItem {
    /// Provider name
    pub capacity_provider: String,
    /// Relative weight
    #[serde(default, skip_serializing_if = "is_zero_i32")]
    pub weight: i32,
    /// Minimum number of tasks
    #[serde(default, skip_serializing_if = "is_zero_i32")]
    pub base: i32,
}

impl Rule {
    /// Target id, falling back to the rule name
    pub fn target_id(&self) -> &str {
        if self.target.target_id.is_empty() {
            &self.name
        } else {
            &self.target.target_id
        }
    }

    /// Task count, clamped to at least 1
    pub fn task_count(&self) -> i64 {
        self.target.task_count.max(1)
    }

    /// `ENABLED` or `DISABLED`
    pub fn state(&self) -> &'static str {
        if self.disabled { "DISABLED" } else { "ENABLED" }
    }

    /// Role the rule falls back to when it names none
    pub fn default_role(&self) -> &str {
        if self.default_role.is_empty() {
            DEFAULT_ROLE
        } else {
            &self.default_role
        }
    }

    /// Role ARN
    pub fn role_arn(&self) -> String {
        let role = if self.target.role.is_empty() {
            self.default_role()
        } else {
            &self.target.role
        };
        arn::role_arn(&self.base.account_id, role)
    }

    /// ARN of the role the rule would get without a rule-level role
    pub fn default_role_arn(&self) -> String {
        arn::role_arn(&self.base.account_id, self.default_role())
    }

    /// Rule ARN
    pub fn rule_arn(&self) -> String {
        format!(
            "{}{}",
            arn::rule_prefix(&self.base.region, &self.base.account_id),
            self.name
        )
    }

    /// Cluster ARN the target points at
    pub fn target_arn(&self) -> String {
        self.base.cluster_arn()
    }

    /// Task definition ARN
    pub fn task_definition_arn(&self) -> String {
        arn::qualify(
            &arn::task_definition_prefix(&self.base.region, &self.base.account_id),
            &self.target.task_definition,
        )
    }

    /// Dead-letter queue ARN, if configured
    pub fn dead_letter_arn(&self) -> Option<String> {
        self.target.dead_letter_config.as_ref().map(|dlc| {
            arn::qualify(
                &arn::sqs_prefix(&self.base.region, &self.base.account_id),
                &dlc.sqs,
            )
        })
    }

    /// Fill unset shared fields from the config-level defaults
    ///
    /// Rule-level values win. Afterwards region, cluster, account and
    /// tracking id are set whenever the config provides them, and the role
    /// is never empty.
    pub fn merge_base_config(&mut self, base: &BaseConfig, role: &str) {
        self.default_role = if role.is_empty() {
            DEFAULT_ROLE.to_string()
        } else {
            role.to_string()
        };
        if self.target.role.is_empty() {
            self.target.role.clone_from(&self.default_role);
        }
        if self.base.region.is_empty() {
            self.base.region.clone_from(&base.region);
        }
        if self.base.cluster.is_empty() {
            self.base.cluster.clone_from(&base.cluster);
        }
        if self.base.account_id.is_empty() {
            self.base.account_id.clone_from(&base.account_id);
        }
        if self.base.tracking_id.is_empty() {
            self.base.tracking_id.clone_from(&base.tracking_id);
        }
    }

    /// Comparable form of the rule
    ///
    /// Inherited shared fields are stripped and every value that equals its
    /// implicit default is cleared, mirroring how remote rules are rebuilt.
    pub fn canonical(&self) -> Rule {
        let scope = self.base.arn_scope();
        let mut rule = self.clone();

        let role_arn = self.role_arn();
        rule.target.role = if role_arn == self.default_role_arn() {
            String::new()
        } else {
            arn::strip(&scope.role, &role_arn).to_string()
        };
        if rule.target.target_id == rule.name {
            rule.target.target_id.clear();
        }
        rule.target.task_count = if self.task_count() == 1 {
            0
        } else {
            self.task_count()
        };
        rule.target.task_definition =
            arn::strip(&scope.task_definition, &self.task_definition_arn()).to_string();
        if let Some(dlc) = rule.target.dead_letter_config.as_mut()
            && let Some(arn) = self.dead_letter_arn()
        {
            dlc.sqs = arn::strip(&scope.sqs, &arn).to_string();
        }
        if rule.target.task_override.as_ref().is_some_and(TaskOverride::is_empty) {
            rule.target.task_override = None;
        }
        if rule.target.propagate_tags.as_deref() == Some("") {
            rule.target.propagate_tags = None;
        }

        rule.base = BaseConfig::default();
        rule.default_role.clear();
        rule
    }

    /// YAML serialization
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    // ========================================================================
    // Request mapping
    // ========================================================================

    /// Overrides sent with every launch of the task
    pub fn task_override_input(&self) -> TaskOverrideInput {
        let container_overrides = self
            .target
            .container_overrides
            .iter()
            .map(|co| ContainerOverrideInput {
                name: co.name.clone(),
                command: co.command.clone(),
                environment: co
                    .environment
                    .iter()
                    .map(|(name, value)| KeyValuePair {
                        name: name.clone(),
                        value: value.clone(),
                    })
                    .collect(),
                cpu: co.cpu,
                memory: co.memory,
                memory_reservation: co.memory_reservation,
            })
            .collect();
        let (cpu, memory) = self
            .target
            .task_override
            .as_ref()
            .map(|to| (to.cpu.clone(), to.memory.clone()))
            .unwrap_or_default();
        TaskOverrideInput {
            container_overrides,
            cpu,
            memory,
        }
    }

    /// Input of `put-rule`
    pub fn put_rule_request(&self) -> PutRuleRequest {
        PutRuleRequest {
            name: self.name.clone(),
            description: self.description.clone(),
            schedule_expression: self.schedule_expression.clone(),
            state: self.state().to_string(),
            role_arn: self.role_arn(),
        }
    }

    /// Input of `put-targets`
    pub fn put_targets_request(&self) -> Result<PutTargetsRequest> {
        Ok(PutTargetsRequest {
            rule: self.name.clone(),
            targets: vec![self.event_target()?],
        })
    }

    /// The single events target of this rule
    pub fn event_target(&self) -> Result<EventTarget> {
        let input = serde_json::to_string(&self.task_override_input())?;
        let target = &self.target;
        Ok(EventTarget {
            id: self.target_id().to_string(),
            arn: self.target_arn(),
            role_arn: Some(self.role_arn()),
            input: Some(input),
            ecs_parameters: Some(EcsParameters {
                task_definition_arn: self.task_definition_arn(),
                task_count: Some(self.task_count()),
                launch_type: non_empty(&target.launch_type),
                network_configuration: target.network_configuration.as_ref().map(|nc| {
                    let vpc = &nc.aws_vpc_configuration;
                    EventsNetworkConfiguration {
                        awsvpc_configuration: EventsAwsVpcConfiguration {
                            subnets: vpc.subnets.clone(),
                            security_groups: vpc.security_groups.clone(),
                            assign_public_ip: non_empty(&vpc.assign_public_ip),
                        },
                    }
                }),
                platform_version: non_empty(&target.platform_version),
                group: non_empty(&target.group),
                capacity_provider_strategy: self.capacity_provider_strategy(),
                propagate_tags: target.propagate_tags.clone().filter(|s| !s.is_empty()),
            }),
            dead_letter_config: self.dead_letter_arn().map(|arn| DeadLetterTarget { arn }),
        })
    }

    /// Input of `run-task`, sharing the target mapping
    pub fn run_task_request(&self) -> RunTaskRequest {
        let target = &self.target;
        RunTaskRequest {
            cluster: self.base.cluster.clone(),
            task_definition: self.task_definition_arn(),
            count: self.task_count(),
            overrides: self.task_override_input(),
            launch_type: non_empty(&target.launch_type),
            network_configuration: target.network_configuration.as_ref().map(|nc| {
                let vpc = &nc.aws_vpc_configuration;
                EcsNetworkConfiguration {
                    awsvpc_configuration: EcsAwsVpcConfiguration {
                        subnets: vpc.subnets.clone(),
                        security_groups: vpc.security_groups.clone(),
                        assign_public_ip: non_empty(&vpc.assign_public_ip),
                    },
                }
            }),
            platform_version: non_empty(&target.platform_version),
            group: non_empty(&target.group),
            capacity_provider_strategy: self.capacity_provider_strategy(),
            propagate_tags: target.propagate_tags.clone().filter(|s| !s.is_empty()),
        }
    }

    fn capacity_provider_strategy(&self) -> Vec<EventsCapacityProvider> {
        self.target
            .capacity_provider_strategy
            .iter()
            .map(|item| EventsCapacityProvider {
                capacity_provider: item.capacity_provider.clone(),
                weight: item.weight,
                base: item.base,
            })
            .collect()
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> BaseConfig {
        BaseConfig {
            region: "us-east-1".into(),
            cluster: "main".into(),
            tracking_id: "main".into(),
            account_id: "123456789012".into(),
        }
    }

    fn rule() -> Rule {
        let mut rule = Rule {
            name: "nightly".into(),
            schedule_expression: "cron(0 0 * * ? *)".into(),
            target: Target {
                task_definition: "report:3".into(),
                container_overrides: vec![ContainerOverride {
                    name: "app".into(),
                    command: vec!["report".into(), "--all".into()],
                    environment: BTreeMap::from([
                        ("ZONE".to_string(), "b".to_string()),
                        ("APP_ENV".to_string(), "prod".to_string()),
                    ]),
                    ..Default::default()
                }],
                ..Default::default()
            },
            ..Default::default()
        };
        rule.merge_base_config(&base(), "");
        rule
    }

    #[test]
    fn test_merge_fills_defaults() {
        let rule = rule();
        assert_eq!(rule.base, base());
        assert_eq!(rule.target.role, "ecsEventsRole");
        assert_eq!(rule.role_arn(), "arn:aws:iam::123456789012:role/ecsEventsRole");
    }

    #[test]
    fn test_merge_keeps_rule_values() {
        let mut rule = Rule {
            name: "x".into(),
            base: BaseConfig {
                region: "eu-west-1".into(),
                ..Default::default()
            },
            target: Target {
                role: "custom".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        rule.merge_base_config(&base(), "shared");
        assert_eq!(rule.base.region, "eu-west-1");
        assert_eq!(rule.base.cluster, "main");
        assert_eq!(rule.target.role, "custom");
        assert_eq!(rule.default_role(), "shared");
    }

    #[test]
    fn test_derived_fields() {
        let mut rule = rule();
        assert_eq!(rule.target_id(), "nightly");
        assert_eq!(rule.task_count(), 1);
        assert_eq!(rule.state(), "ENABLED");
        assert_eq!(rule.rule_arn(), "arn:aws:events:us-east-1:123456789012:rule/nightly");
        assert_eq!(rule.target_arn(), "arn:aws:ecs:us-east-1:123456789012:cluster/main");
        assert_eq!(
            rule.task_definition_arn(),
            "arn:aws:ecs:us-east-1:123456789012:task-definition/report:3"
        );

        rule.target.task_count = -4;
        rule.disabled = true;
        assert_eq!(rule.task_count(), 1);
        assert_eq!(rule.state(), "DISABLED");
    }

    #[test]
    fn test_canonical_strips_defaults() {
        let mut rule = rule();
        rule.target.target_id = "nightly".into();
        rule.target.task_count = 1;
        let canonical = rule.canonical();

        assert_eq!(canonical.base, BaseConfig::default());
        assert!(canonical.target.role.is_empty());
        assert!(canonical.target.target_id.is_empty());
        assert_eq!(canonical.target.task_count, 0);

        let yaml = canonical.to_yaml().unwrap();
        assert!(!yaml.contains("region"));
        assert!(!yaml.contains("cluster"));
        assert!(yaml.contains("name: nightly"));
    }

    #[test]
    fn test_canonical_keeps_custom_role_name() {
        let mut rule = rule();
        rule.target.role = "arn:aws:iam::123456789012:role/batch".into();
        assert_eq!(rule.canonical().target.role, "batch");
    }

    #[test]
    fn test_target_input_sorted_env() {
        let target = rule().event_target().unwrap();
        let input = target.input.unwrap();
        assert_eq!(
            input,
            r#"{"containerOverrides":[{"name":"app","command":["report","--all"],"environment":[{"name":"APP_ENV","value":"prod"},{"name":"ZONE","value":"b"}]}]}"#
        );
        assert_eq!(target.id, "nightly");
        assert_eq!(
            target.ecs_parameters.unwrap().task_definition_arn,
            "arn:aws:ecs:us-east-1:123456789012:task-definition/report:3"
        );
    }

    #[test]
    fn test_run_task_request_shares_overrides() {
        let rule = rule();
        let req = rule.run_task_request();
        assert_eq!(req.cluster, "main");
        assert_eq!(req.count, 1);
        assert_eq!(req.overrides, rule.task_override_input());
    }

    #[test]
    fn test_deserialize_flattened() {
        let yaml = r"
name: hourly
scheduleExpression: rate(1 hour)
taskDefinition: sync
taskCount: 2
cluster: other
containerOverrides:
  - name: app
    command: [sync]
";
        let rule: Rule = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rule.target.task_count, 2);
        assert_eq!(rule.base.cluster, "other");
        assert_eq!(rule.target.container_overrides[0].command, vec!["sync"]);
    }
}
