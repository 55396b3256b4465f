use anyhow::{Context as AnyhowContext, Result};
use schedkit::arn::DEFAULT_ROLE;
use schedkit::{BaseConfig, Config, RuleGetter};

use super::Session;
use crate::Context;

pub fn run(ctx: &Context) -> Result<()> {
    let session = Session::open(ctx)?;
    let config = &session.config;

    let role = if config.role.is_empty() {
        DEFAULT_ROLE
    } else {
        config.role.as_str()
    };
    let getter = RuleGetter::new(session.reconciler.clients().events.clone(), &config.base, role);
    let rules = getter
        .fetch_all_rules()
        .context("failed to fetch remote rules")?;

    let tracking_id = if config.base.tracking_id == config.base.cluster {
        String::new()
    } else {
        config.base.tracking_id.clone()
    };
    let dumped = Config {
        role: config.role.clone(),
        base: BaseConfig {
            region: config.base.region.clone(),
            cluster: config.base.cluster.clone(),
            tracking_id,
            account_id: String::new(),
        },
        rules,
        ..Default::default()
    };
    print!("{}", serde_yaml::to_string(&dumped)?);
    Ok(())
}
