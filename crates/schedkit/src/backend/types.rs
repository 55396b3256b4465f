//! Wire types for the scheduling, compute and tag-index APIs.
//!
//! Field names follow the JSON the remote APIs use, which is why events
//! types are PascalCase while ECS types are camelCase.

use serde::{Deserialize, Serialize};

// ============================================================================
// Events
// ============================================================================

/// A rule as returned by `list-rules`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RuleSummary {
    /// Rule name
    pub name: String,
    /// Rule ARN
    pub arn: String,
    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Schedule expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_expression: Option<String>,
    /// `ENABLED` or `DISABLED`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Role used by the rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,
}

/// Input of `put-rule`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutRuleRequest {
    /// Rule name
    pub name: String,
    /// Description
    pub description: String,
    /// Schedule expression
    pub schedule_expression: String,
    /// `ENABLED` or `DISABLED`
    pub state: String,
    /// Role used by the rule
    pub role_arn: String,
}

/// A target attached to a rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EventTarget {
    /// Target id, unique within the rule
    pub id: String,
    /// Target ARN (the cluster for ECS targets)
    pub arn: String,
    /// Role used to launch the task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,
    /// JSON payload passed to the target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    /// ECS launch parameters; absent for non-ECS targets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ecs_parameters: Option<EcsParameters>,
    /// Where undeliverable events go
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter_config: Option<DeadLetterTarget>,
}

/// ECS parameters of an events target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EcsParameters {
    /// Task definition ARN
    pub task_definition_arn: String,
    /// Number of tasks to launch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_count: Option<i64>,
    /// `EC2`, `FARGATE` or `EXTERNAL`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_type: Option<String>,
    /// awsvpc network settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_configuration: Option<EventsNetworkConfiguration>,
    /// Fargate platform version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_version: Option<String>,
    /// Task group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Capacity provider strategy
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capacity_provider_strategy: Vec<EventsCapacityProvider>,
    /// `TASK_DEFINITION` to propagate tags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub propagate_tags: Option<String>,
}

/// Network configuration in the events API
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventsNetworkConfiguration {
    /// VPC settings
    #[serde(rename = "awsvpcConfiguration")]
    pub awsvpc_configuration: EventsAwsVpcConfiguration,
}

/// VPC settings in the events API
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EventsAwsVpcConfiguration {
    /// Subnet ids
    #[serde(default)]
    pub subnets: Vec<String>,
    /// Security group ids
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_groups: Vec<String>,
    /// `ENABLED` or `DISABLED`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assign_public_ip: Option<String>,
}

/// Capacity provider strategy item in the events API
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsCapacityProvider {
    /// Provider name
    pub capacity_provider: String,
    /// Relative weight
    #[serde(default)]
    pub weight: i32,
    /// Minimum number of tasks
    #[serde(default)]
    pub base: i32,
}

/// Dead-letter queue of a target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeadLetterTarget {
    /// SQS queue ARN
    pub arn: String,
}

/// Input of `put-targets`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutTargetsRequest {
    /// Rule name
    pub rule: String,
    /// Targets to upsert
    pub targets: Vec<EventTarget>,
}

/// A resource tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
    /// Tag key
    pub key: String,
    /// Tag value
    pub value: String,
}

// ============================================================================
// ECS
// ============================================================================

/// Overrides applied to a launched task
///
/// Serialized as the events target `Input` and reused for `run-task`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOverrideInput {
    /// Per-container overrides
    #[serde(default)]
    pub container_overrides: Vec<ContainerOverrideInput>,
    /// Task-level CPU
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    /// Task-level memory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// Per-container override
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerOverrideInput {
    /// Container name
    pub name: String,
    /// Command
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    /// Environment variables
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment: Vec<KeyValuePair>,
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

/// Environment variable entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValuePair {
    /// Variable name
    pub name: String,
    /// Variable value
    pub value: String,
}

/// Input of `run-task`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTaskRequest {
    /// Cluster name or ARN
    pub cluster: String,
    /// Task definition ARN
    pub task_definition: String,
    /// Number of tasks
    pub count: i64,
    /// Overrides
    pub overrides: TaskOverrideInput,
    /// Launch type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_type: Option<String>,
    /// Network settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_configuration: Option<EcsNetworkConfiguration>,
    /// Fargate platform version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_version: Option<String>,
    /// Task group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Capacity provider strategy
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capacity_provider_strategy: Vec<EventsCapacityProvider>,
    /// Tag propagation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub propagate_tags: Option<String>,
}

/// Network configuration in the ECS API
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EcsNetworkConfiguration {
    /// VPC settings
    pub awsvpc_configuration: EcsAwsVpcConfiguration,
}

/// VPC settings in the ECS API
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EcsAwsVpcConfiguration {
    /// Subnet ids
    pub subnets: Vec<String>,
    /// Security group ids
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_groups: Vec<String>,
    /// `ENABLED` or `DISABLED`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assign_public_ip: Option<String>,
}

/// Output of `run-task`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTaskResponse {
    /// ARNs of started tasks
    #[serde(default)]
    pub task_arns: Vec<String>,
    /// Failures reported by ECS
    #[serde(default)]
    pub failures: Vec<RunTaskFailure>,
}

/// A failure entry of `run-task`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTaskFailure {
    /// Resource ARN
    #[serde(default)]
    pub arn: String,
    /// Failure reason
    #[serde(default)]
    pub reason: String,
}

// ============================================================================
// Tag index
// ============================================================================

/// Structured tag-filter query (`TAG_FILTERS_1_0`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TagQuery {
    /// Resource types to search
    pub resource_type_filters: Vec<String>,
    /// Key/value filters
    pub tag_filters: Vec<TagFilter>,
}

/// One tag filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TagFilter {
    /// Tag key
    pub key: String,
    /// Accepted values
    pub values: Vec<String>,
}

impl TagQuery {
    /// Query for resources of one type carrying `key = value`
    pub fn single(resource_type: &str, key: &str, value: &str) -> Self {
        Self {
            resource_type_filters: vec![resource_type.to_string()],
            tag_filters: vec![TagFilter {
                key: key.to_string(),
                values: vec![value.to_string()],
            }],
        }
    }
}
