//! Real AWS backend using `aws` CLI commands.

use crate::backend::types::{
    EventTarget, PutRuleRequest, PutTargetsRequest, RuleSummary, RunTaskFailure, RunTaskRequest,
    RunTaskResponse, Tag, TagQuery,
};
use crate::backend::{EcsApi, EventsApi, ResourceIndexApi};
use crate::error::{Error, Result};
use crate::runner;
use serde::Deserialize;
use serde::de::DeserializeOwned;

/// Backend that executes real `aws` commands.
#[derive(Debug, Clone)]
pub struct AwsCli {
    /// Region passed to every call; empty uses the CLI default
    region: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListRulesOutput {
    #[serde(default)]
    rules: Vec<RuleSummary>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListTargetsOutput {
    #[serde(default)]
    targets: Vec<EventTarget>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FailedEntries {
    #[serde(default)]
    failed_entry_count: u32,
    #[serde(default)]
    failed_entries: Vec<FailedEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FailedEntry {
    #[serde(default)]
    target_id: String,
    #[serde(default)]
    error_message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunTaskOutput {
    #[serde(default)]
    tasks: Vec<LaunchedTask>,
    #[serde(default)]
    failures: Vec<RunTaskFailure>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LaunchedTask {
    task_arn: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SearchResourcesOutput {
    #[serde(default)]
    resource_identifiers: Vec<ResourceIdentifier>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResourceIdentifier {
    resource_arn: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CallerIdentity {
    account: String,
}

impl AwsCli {
    /// Create a backend for a region.
    pub fn new(region: &str) -> Self {
        Self {
            region: region.to_string(),
        }
    }

    /// Check if the `aws` CLI is installed.
    pub fn is_available() -> bool {
        runner::command_exists("aws")
    }

    /// Account id of the current credentials.
    pub fn caller_account_id(&self) -> Result<String> {
        let identity: CallerIdentity = self.call("sts", "get-caller-identity", &[])?;
        Ok(identity.account)
    }

    /// Run `aws <service> <operation> ...` and return raw stdout.
    fn run_aws(&self, service: &str, operation: &str, args: &[&str]) -> Result<String> {
        let mut full = vec![service, operation];
        full.extend_from_slice(args);
        full.extend(["--output", "json"]);
        if !self.region.is_empty() {
            full.extend(["--region", self.region.as_str()]);
        }
        runner::run_capture("aws", &full).map_err(|e| match e {
            Error::CommandFailed { message, stderr } => Error::api(
                format!("{service} {operation}"),
                if stderr.is_empty() { message } else { stderr },
            ),
            other => other,
        })
    }

    /// Run a command and decode its JSON output.
    fn call<T: DeserializeOwned>(&self, service: &str, operation: &str, args: &[&str]) -> Result<T> {
        let out = self.run_aws(service, operation, args)?;
        let out = if out.is_empty() { "{}" } else { out.as_str() };
        serde_json::from_str(out).map_err(|e| {
            Error::api(
                format!("{service} {operation}"),
                format!("unexpected output: {e}"),
            )
        })
    }

    /// Run a command taking its input as JSON.
    fn call_with_input<I, T>(&self, service: &str, operation: &str, input: &I) -> Result<T>
    where
        I: serde::Serialize,
        T: DeserializeOwned,
    {
        let json = serde_json::to_string(input)?;
        self.call(service, operation, &["--cli-input-json", &json])
    }
}

fn check_failed_entries(operation: &str, out: &FailedEntries) -> Result<()> {
    if out.failed_entry_count == 0 {
        return Ok(());
    }
    let details: Vec<String> = out
        .failed_entries
        .iter()
        .map(|f| format!("{}: {}", f.target_id, f.error_message))
        .collect();
    Err(Error::api(
        format!("events {operation}"),
        format!("{} failed entries: {}", out.failed_entry_count, details.join(", ")),
    ))
}

impl EventsApi for AwsCli {
    fn list_rules(&self, name_prefix: Option<&str>) -> Result<Vec<RuleSummary>> {
        let mut rules = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut args = Vec::new();
            if let Some(prefix) = name_prefix {
                args.extend(["--name-prefix", prefix]);
            }
            if let Some(t) = &token {
                args.extend(["--next-token", t.as_str()]);
            }
            let page: ListRulesOutput = self.call("events", "list-rules", &args)?;
            rules.extend(page.rules);
            match page.next_token {
                Some(next) if !next.is_empty() => token = Some(next),
                _ => break,
            }
        }
        Ok(rules)
    }

    fn list_targets_by_rule(&self, rule: &str) -> Result<Vec<EventTarget>> {
        let mut targets = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut args = vec!["--rule", rule];
            if let Some(t) = &token {
                args.extend(["--next-token", t.as_str()]);
            }
            let page: ListTargetsOutput = self.call("events", "list-targets-by-rule", &args)?;
            targets.extend(page.targets);
            match page.next_token {
                Some(next) if !next.is_empty() => token = Some(next),
                _ => break,
            }
        }
        Ok(targets)
    }

    fn put_rule(&self, request: &PutRuleRequest) -> Result<()> {
        let _: serde_json::Value = self.call_with_input("events", "put-rule", request)?;
        Ok(())
    }

    fn put_targets(&self, request: &PutTargetsRequest) -> Result<()> {
        let out: FailedEntries = self.call_with_input("events", "put-targets", request)?;
        check_failed_entries("put-targets", &out)
    }

    fn remove_targets(&self, rule: &str, ids: &[String]) -> Result<()> {
        let mut args = vec!["--rule", rule, "--ids"];
        args.extend(ids.iter().map(String::as_str));
        let out: FailedEntries = self.call("events", "remove-targets", &args)?;
        check_failed_entries("remove-targets", &out)
    }

    fn delete_rule(&self, name: &str) -> Result<()> {
        let _: serde_json::Value = self.call("events", "delete-rule", &["--name", name])?;
        Ok(())
    }

    fn tag_resource(&self, arn: &str, tags: &[Tag]) -> Result<()> {
        let input = serde_json::json!({ "ResourceARN": arn, "Tags": tags });
        let _: serde_json::Value = self.call_with_input("events", "tag-resource", &input)?;
        Ok(())
    }
}

impl EcsApi for AwsCli {
    fn describe_task_definition(&self, arn: &str) -> Result<bool> {
        match self.run_aws("ecs", "describe-task-definition", &["--task-definition", arn]) {
            Ok(_) => Ok(true),
            Err(Error::Api { message, .. })
                if message.contains("ClientException")
                    || message.contains("Unable to describe task definition") =>
            {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn run_task(&self, request: &RunTaskRequest) -> Result<RunTaskResponse> {
        let out: RunTaskOutput = self.call_with_input("ecs", "run-task", request)?;
        Ok(RunTaskResponse {
            task_arns: out.tasks.into_iter().map(|t| t.task_arn).collect(),
            failures: out.failures,
        })
    }
}

impl ResourceIndexApi for AwsCli {
    fn search_resources(&self, query: &TagQuery) -> Result<Vec<String>> {
        let resource_query = serde_json::json!({
            "Type": "TAG_FILTERS_1_0",
            "Query": serde_json::to_string(query)?,
        })
        .to_string();
        let mut arns = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut args = vec!["--resource-query", resource_query.as_str()];
            if let Some(t) = &token {
                args.extend(["--next-token", t.as_str()]);
            }
            let page: SearchResourcesOutput =
                self.call("resource-groups", "search-resources", &args)?;
            arns.extend(page.resource_identifiers.into_iter().map(|r| r.resource_arn));
            match page.next_token {
                Some(next) if !next.is_empty() => token = Some(next),
                _ => break,
            }
        }
        Ok(arns)
    }
}
