//! Backend abstraction for the remote platform.
//!
//! Three narrow traits cover the calls reconciliation needs: the schedule
//! service ([`EventsApi`]), the compute service ([`EcsApi`]) and the tag
//! index ([`ResourceIndexApi`]). [`aws_cli::AwsCli`] implements them by
//! shelling out to the `aws` CLI; [`memory::MemoryBackend`] keeps state in
//! memory for tests.

pub mod aws_cli;
pub mod memory;
pub mod types;

use crate::error::Result;
use std::sync::Arc;
use types::{
    EventTarget, PutRuleRequest, PutTargetsRequest, RuleSummary, RunTaskRequest, RunTaskResponse,
    Tag, TagQuery,
};

/// Scheduling service operations.
pub trait EventsApi: Send + Sync {
    /// List rules, optionally restricted to a name prefix.
    ///
    /// Pagination is handled by the implementation.
    fn list_rules(&self, name_prefix: Option<&str>) -> Result<Vec<RuleSummary>>;

    /// List the targets attached to a rule.
    fn list_targets_by_rule(&self, rule: &str) -> Result<Vec<EventTarget>>;

    /// Create or update a rule.
    fn put_rule(&self, request: &PutRuleRequest) -> Result<()>;

    /// Create or update targets of a rule.
    fn put_targets(&self, request: &PutTargetsRequest) -> Result<()>;

    /// Detach targets from a rule.
    fn remove_targets(&self, rule: &str, ids: &[String]) -> Result<()>;

    /// Delete a rule without targets.
    fn delete_rule(&self, name: &str) -> Result<()>;

    /// Attach tags to a resource.
    fn tag_resource(&self, arn: &str, tags: &[Tag]) -> Result<()>;
}

/// Compute service operations.
pub trait EcsApi: Send + Sync {
    /// Whether a task definition exists.
    fn describe_task_definition(&self, arn: &str) -> Result<bool>;

    /// Launch tasks once.
    fn run_task(&self, request: &RunTaskRequest) -> Result<RunTaskResponse>;
}

/// Tag index operations.
pub trait ResourceIndexApi: Send + Sync {
    /// ARNs of resources matching a tag query.
    fn search_resources(&self, query: &TagQuery) -> Result<Vec<String>>;
}

/// The clients one run talks to.
#[derive(Clone)]
pub struct Clients {
    /// Scheduling service
    pub events: Arc<dyn EventsApi>,
    /// Compute service
    pub ecs: Arc<dyn EcsApi>,
    /// Tag index
    pub index: Arc<dyn ResourceIndexApi>,
}

impl Clients {
    /// Use one backend for every service.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: EventsApi + EcsApi + ResourceIndexApi + 'static,
    {
        Self {
            events: backend.clone(),
            ecs: backend.clone(),
            index: backend,
        }
    }
}

/// Get the default backend (real `aws` CLI) for a region.
pub fn default_clients(region: &str) -> Clients {
    Clients::from_backend(Arc::new(aws_cli::AwsCli::new(region)))
}
