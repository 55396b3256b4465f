//! In-memory backend for tests.
//!
//! Keeps rules, targets, tags and task definitions in maps, records every
//! mutating call in order and can be told to fail a given operation.

use crate::arn;
use crate::backend::types::{
    EventTarget, PutRuleRequest, PutTargetsRequest, RuleSummary, RunTaskFailure, RunTaskRequest,
    RunTaskResponse, Tag, TagQuery,
};
use crate::backend::{EcsApi, EventsApi, ResourceIndexApi};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct State {
    rules: BTreeMap<String, RuleSummary>,
    targets: BTreeMap<String, Vec<EventTarget>>,
    tags: BTreeMap<String, Vec<Tag>>,
    task_definitions: BTreeSet<String>,
    run_failures: Vec<RunTaskFailure>,
    failing: BTreeSet<String>,
    calls: Vec<String>,
    launched: u64,
}

/// Backend holding remote state in memory
#[derive(Debug, Default)]
pub struct MemoryBackend {
    region: String,
    account_id: String,
    state: Mutex<State>,
}

impl MemoryBackend {
    /// Empty backend for an account and region
    pub fn new(region: &str, account_id: &str) -> Self {
        Self {
            region: region.to_string(),
            account_id: account_id.to_string(),
            state: Mutex::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed a rule with its targets
    pub fn insert_rule(&self, summary: RuleSummary, targets: Vec<EventTarget>) {
        let mut state = self.state();
        state.targets.insert(summary.name.clone(), targets);
        state.rules.insert(summary.name.clone(), summary);
    }

    /// Seed tags on a resource
    pub fn insert_tags(&self, arn: &str, tags: Vec<Tag>) {
        self.state().tags.entry(arn.to_string()).or_default().extend(tags);
    }

    /// Register an existing task definition
    pub fn add_task_definition(&self, arn: &str) {
        self.state().task_definitions.insert(arn.to_string());
    }

    /// Failures reported by subsequent `run-task` calls
    pub fn set_run_failures(&self, failures: Vec<RunTaskFailure>) {
        self.state().run_failures = failures;
    }

    /// Make every call of `operation` (e.g. `put-targets`) fail
    pub fn fail_on(&self, operation: &str) {
        self.state().failing.insert(operation.to_string());
    }

    /// Mutating calls so far, as `operation subject`
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Current rule by name
    pub fn rule(&self, name: &str) -> Option<RuleSummary> {
        self.state().rules.get(name).cloned()
    }

    /// Current targets of a rule
    pub fn targets(&self, rule: &str) -> Vec<EventTarget> {
        self.state().targets.get(rule).cloned().unwrap_or_default()
    }

    /// Current tags of a resource
    pub fn tags(&self, arn: &str) -> Vec<Tag> {
        self.state().tags.get(arn).cloned().unwrap_or_default()
    }

    fn check(state: &State, operation: &str) -> Result<()> {
        if state.failing.contains(operation) {
            return Err(Error::api(format!("events {operation}"), "injected failure"));
        }
        Ok(())
    }

    fn record(state: &mut State, operation: &str, subject: &str) -> Result<()> {
        Self::check(state, operation)?;
        state.calls.push(format!("{operation} {subject}"));
        Ok(())
    }
}

impl EventsApi for MemoryBackend {
    fn list_rules(&self, name_prefix: Option<&str>) -> Result<Vec<RuleSummary>> {
        let state = self.state();
        Self::check(&state, "list-rules")?;
        Ok(state
            .rules
            .values()
            .filter(|r| name_prefix.is_none_or(|p| r.name.starts_with(p)))
            .cloned()
            .collect())
    }

    fn list_targets_by_rule(&self, rule: &str) -> Result<Vec<EventTarget>> {
        let state = self.state();
        Self::check(&state, "list-targets-by-rule")?;
        if !state.rules.contains_key(rule) {
            return Err(Error::api(
                "events list-targets-by-rule",
                format!("Rule {rule} does not exist"),
            ));
        }
        Ok(state.targets.get(rule).cloned().unwrap_or_default())
    }

    fn put_rule(&self, request: &PutRuleRequest) -> Result<()> {
        let mut state = self.state();
        Self::record(&mut state, "put-rule", &request.name)?;
        let summary = RuleSummary {
            name: request.name.clone(),
            arn: format!(
                "{}{}",
                arn::rule_prefix(&self.region, &self.account_id),
                request.name
            ),
            description: Some(request.description.clone()).filter(|d| !d.is_empty()),
            schedule_expression: Some(request.schedule_expression.clone()),
            state: Some(request.state.clone()),
            role_arn: Some(request.role_arn.clone()),
        };
        state.targets.entry(request.name.clone()).or_default();
        state.rules.insert(request.name.clone(), summary);
        Ok(())
    }

    fn put_targets(&self, request: &PutTargetsRequest) -> Result<()> {
        let mut state = self.state();
        Self::record(&mut state, "put-targets", &request.rule)?;
        let targets = state.targets.entry(request.rule.clone()).or_default();
        for target in &request.targets {
            targets.retain(|t| t.id != target.id);
            targets.push(target.clone());
        }
        Ok(())
    }

    fn remove_targets(&self, rule: &str, ids: &[String]) -> Result<()> {
        let mut state = self.state();
        Self::record(&mut state, "remove-targets", rule)?;
        if let Some(targets) = state.targets.get_mut(rule) {
            targets.retain(|t| !ids.contains(&t.id));
        }
        Ok(())
    }

    fn delete_rule(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        Self::record(&mut state, "delete-rule", name)?;
        if state.targets.get(name).is_some_and(|t| !t.is_empty()) {
            return Err(Error::api(
                "events delete-rule",
                format!("Rule {name} can't be deleted since it has targets"),
            ));
        }
        if let Some(summary) = state.rules.remove(name) {
            state.tags.remove(&summary.arn);
        }
        state.targets.remove(name);
        Ok(())
    }

    fn tag_resource(&self, arn: &str, tags: &[Tag]) -> Result<()> {
        let mut state = self.state();
        Self::record(&mut state, "tag-resource", arn)?;
        let existing = state.tags.entry(arn.to_string()).or_default();
        for tag in tags {
            existing.retain(|t| t.key != tag.key);
            existing.push(tag.clone());
        }
        Ok(())
    }
}

impl EcsApi for MemoryBackend {
    fn describe_task_definition(&self, arn: &str) -> Result<bool> {
        let state = self.state();
        Self::check(&state, "describe-task-definition")?;
        Ok(state.task_definitions.contains(arn))
    }

    fn run_task(&self, request: &RunTaskRequest) -> Result<RunTaskResponse> {
        let mut state = self.state();
        Self::record(&mut state, "run-task", &request.task_definition)?;
        if !state.run_failures.is_empty() {
            return Ok(RunTaskResponse {
                task_arns: Vec::new(),
                failures: state.run_failures.clone(),
            });
        }
        let mut task_arns = Vec::new();
        for _ in 0..request.count.max(1) {
            state.launched += 1;
            task_arns.push(format!(
                "arn:aws:ecs:{}:{}:task/{}/{:032x}",
                self.region,
                self.account_id,
                arn::resource_name(&request.cluster),
                state.launched
            ));
        }
        Ok(RunTaskResponse {
            task_arns,
            failures: Vec::new(),
        })
    }
}

impl ResourceIndexApi for MemoryBackend {
    fn search_resources(&self, query: &TagQuery) -> Result<Vec<String>> {
        let state = self.state();
        Self::check(&state, "search-resources")?;
        let rule_arns: BTreeSet<&String> = state.rules.values().map(|r| &r.arn).collect();
        let searches_rules = query
            .resource_type_filters
            .iter()
            .any(|t| t == arn::RULE_RESOURCE_TYPE);
        if !searches_rules {
            return Ok(Vec::new());
        }
        Ok(state
            .tags
            .iter()
            .filter(|(resource, _)| rule_arns.contains(resource))
            .filter(|(_, tags)| {
                query.tag_filters.iter().all(|filter| {
                    tags.iter()
                        .any(|t| t.key == filter.key && filter.values.contains(&t.value))
                })
            })
            .map(|(resource, _)| resource.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> MemoryBackend {
        MemoryBackend::new("us-east-1", "123456789012")
    }

    fn put(backend: &MemoryBackend, name: &str) {
        backend
            .put_rule(&PutRuleRequest {
                name: name.to_string(),
                description: String::new(),
                schedule_expression: "rate(1 hour)".into(),
                state: "ENABLED".into(),
                role_arn: "arn:aws:iam::123456789012:role/ecsEventsRole".into(),
            })
            .unwrap();
    }

    #[test]
    fn test_put_and_list() {
        let b = backend();
        put(&b, "nightly");
        put(&b, "hourly");
        let names: Vec<_> = b
            .list_rules(Some("night"))
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["nightly"]);
        assert_eq!(
            b.rule("nightly").unwrap().arn,
            "arn:aws:events:us-east-1:123456789012:rule/nightly"
        );
        assert_eq!(b.calls(), vec!["put-rule nightly", "put-rule hourly"]);
    }

    #[test]
    fn test_delete_requires_removed_targets() {
        let b = backend();
        put(&b, "nightly");
        b.put_targets(&PutTargetsRequest {
            rule: "nightly".into(),
            targets: vec![EventTarget {
                id: "nightly".into(),
                ..Default::default()
            }],
        })
        .unwrap();
        assert!(b.delete_rule("nightly").is_err());
        b.remove_targets("nightly", &["nightly".to_string()]).unwrap();
        b.delete_rule("nightly").unwrap();
        assert!(b.rule("nightly").is_none());
    }

    #[test]
    fn test_injected_failure() {
        let b = backend();
        b.fail_on("put-rule");
        let err = b
            .put_rule(&PutRuleRequest {
                name: "x".into(),
                description: String::new(),
                schedule_expression: "rate(1 day)".into(),
                state: "ENABLED".into(),
                role_arn: String::new(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("injected failure"));
        assert!(b.calls().is_empty());
    }

    #[test]
    fn test_search_by_tag() {
        let b = backend();
        put(&b, "a");
        put(&b, "b");
        let tag = |v: &str| Tag {
            key: arn::TRACKING_TAG_KEY.into(),
            value: v.into(),
        };
        b.tag_resource(&b.rule("a").unwrap().arn, &[tag("main")]).unwrap();
        b.tag_resource(&b.rule("b").unwrap().arn, &[tag("other")]).unwrap();

        let query = TagQuery::single(arn::RULE_RESOURCE_TYPE, arn::TRACKING_TAG_KEY, "main");
        assert_eq!(
            b.search_resources(&query).unwrap(),
            vec!["arn:aws:events:us-east-1:123456789012:rule/a"]
        );
    }
}
