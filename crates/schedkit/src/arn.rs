//! ARN synthesis and parsing.
//!
//! Every ARN follows one rule: a value that already starts with `arn:` is
//! passed through untouched, anything else is qualified with the region,
//! account and resource-type prefix.

/// Role used when neither the rule nor the config names one
pub const DEFAULT_ROLE: &str = "ecsEventsRole";

/// Tag key marking rules managed by this tool
pub const TRACKING_TAG_KEY: &str = "ecschedule:tracking-id";

/// Resource type searched when listing tracked rules
pub const RULE_RESOURCE_TYPE: &str = "AWS::Events::Rule";

/// Check whether a value is already a fully-qualified ARN
pub fn is_arn(value: &str) -> bool {
    value.starts_with("arn:")
}

/// Prefix `value` unless it is already an ARN
pub fn qualify(prefix: &str, value: &str) -> String {
    if is_arn(value) {
        value.to_string()
    } else {
        format!("{prefix}{value}")
    }
}

/// Strip `prefix` from an ARN, leaving other values untouched
pub fn strip<'a>(prefix: &str, arn: &'a str) -> &'a str {
    arn.strip_prefix(prefix).unwrap_or(arn)
}

/// Last `/`-separated segment of an ARN
pub fn resource_name(arn: &str) -> &str {
    arn.rsplit('/').next().unwrap_or(arn)
}

/// `arn:aws:iam::{account}:role/`
pub fn role_prefix(account_id: &str) -> String {
    format!("arn:aws:iam::{account_id}:role/")
}

/// `arn:aws:events:{region}:{account}:rule/`
pub fn rule_prefix(region: &str, account_id: &str) -> String {
    format!("arn:aws:events:{region}:{account_id}:rule/")
}

/// `arn:aws:ecs:{region}:{account}:cluster/`
pub fn cluster_prefix(region: &str, account_id: &str) -> String {
    format!("arn:aws:ecs:{region}:{account_id}:cluster/")
}

/// `arn:aws:ecs:{region}:{account}:task-definition/`
pub fn task_definition_prefix(region: &str, account_id: &str) -> String {
    format!("arn:aws:ecs:{region}:{account_id}:task-definition/")
}

/// `arn:aws:sqs:{region}:{account}:`
pub fn sqs_prefix(region: &str, account_id: &str) -> String {
    format!("arn:aws:sqs:{region}:{account_id}:")
}

/// Role ARN for `role`, falling back to [`DEFAULT_ROLE`] when empty
pub fn role_arn(account_id: &str, role: &str) -> String {
    let role = if role.is_empty() { DEFAULT_ROLE } else { role };
    qualify(&role_prefix(account_id), role)
}

/// The set of prefixes used for one account and region
///
/// Used to invert synthesized ARNs back into the bare names a config file
/// would contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArnScope {
    /// Role prefix
    pub role: String,
    /// Rule prefix
    pub rule: String,
    /// Cluster prefix
    pub cluster: String,
    /// Task definition prefix
    pub task_definition: String,
    /// SQS queue prefix
    pub sqs: String,
}

impl ArnScope {
    /// Build the prefixes for an account and region
    pub fn new(region: &str, account_id: &str) -> Self {
        Self {
            role: role_prefix(account_id),
            rule: rule_prefix(region, account_id),
            cluster: cluster_prefix(region, account_id),
            task_definition: task_definition_prefix(region, account_id),
            sqs: sqs_prefix(region, account_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_arn_passthrough() {
        let arn = "arn:aws:iam::999999999999:role/custom";
        assert_eq!(role_arn("123456789012", arn), arn);
    }

    #[test]
    fn test_role_arn_synthesized() {
        assert_eq!(
            role_arn("123456789012", "batch"),
            "arn:aws:iam::123456789012:role/batch"
        );
        assert_eq!(
            role_arn("123456789012", ""),
            "arn:aws:iam::123456789012:role/ecsEventsRole"
        );
    }

    #[test]
    fn test_qualify_and_strip() {
        let prefix = cluster_prefix("ap-northeast-1", "123456789012");
        let arn = qualify(&prefix, "main");
        assert_eq!(arn, "arn:aws:ecs:ap-northeast-1:123456789012:cluster/main");
        assert_eq!(strip(&prefix, &arn), "main");
        assert_eq!(strip(&prefix, "other"), "other");
    }

    #[test]
    fn test_resource_name() {
        assert_eq!(
            resource_name("arn:aws:events:us-east-1:123456789012:rule/nightly"),
            "nightly"
        );
        assert_eq!(resource_name("plain"), "plain");
    }
}
