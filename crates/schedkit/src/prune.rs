//! Orphan discovery: tracked remote rules missing from the local config.

use crate::arn::{self, RULE_RESOURCE_TYPE, TRACKING_TAG_KEY};
use crate::backend::ResourceIndexApi;
use crate::backend::types::TagQuery;
use crate::error::Result;
use crate::fetch::RuleGetter;
use crate::reconcile::{ApplyOutcome, Reconciler};
use crate::rule::{BaseConfig, Rule};
use log::info;
use std::collections::BTreeSet;

/// Names of the rules tagged with `tracking_id`
pub fn list_tracked(index: &dyn ResourceIndexApi, tracking_id: &str) -> Result<Vec<String>> {
    let query = TagQuery::single(RULE_RESOURCE_TYPE, TRACKING_TAG_KEY, tracking_id);
    Ok(index
        .search_resources(&query)?
        .iter()
        .map(|resource| arn::resource_name(resource).to_string())
        .collect())
}

/// Tracked remote rules that the config no longer defines
///
/// Each orphan is rebuilt from remote state; names that cannot be rebuilt
/// are skipped. Any remote failure aborts the whole lookup.
pub fn extract_orphaned(
    index: &dyn ResourceIndexApi,
    getter: &RuleGetter,
    tracking_id: &str,
    local_names: &[String],
) -> Result<Vec<Rule>> {
    let local: BTreeSet<&str> = local_names.iter().map(String::as_str).collect();
    let mut orphaned = Vec::new();
    for name in list_tracked(index, tracking_id)? {
        if local.contains(name.as_str()) {
            continue;
        }
        if let Some(rule) = getter.fetch_remote_rule(&name)? {
            orphaned.push(rule);
        }
    }
    Ok(orphaned)
}

/// Delete every orphan of the config, returning their names
pub fn prune(
    reconciler: &Reconciler,
    base: &BaseConfig,
    role: &str,
    local_names: &[String],
    dry_run: bool,
) -> Result<Vec<String>> {
    let clients = reconciler.clients();
    let role = if role.is_empty() { arn::DEFAULT_ROLE } else { role };
    let getter = RuleGetter::new(clients.events.clone(), base, role);
    let orphaned = extract_orphaned(clients.index.as_ref(), &getter, &base.tracking_id, local_names)?;
    if orphaned.is_empty() {
        info!("no orphaned rules for tracking id {}", base.tracking_id);
    }

    let mut pruned = Vec::new();
    for mut rule in orphaned {
        rule.merge_base_config(base, role);
        if reconciler.delete(&rule, dry_run)? != ApplyOutcome::NoChange {
            pruned.push(rule.name);
        }
    }
    Ok(pruned)
}
