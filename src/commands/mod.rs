pub mod apply;
pub mod delete;
pub mod diff;
pub mod dump;
pub mod run;
pub mod validate;

use anyhow::{Context as AnyhowContext, Result, bail};
use log::debug;
use schedkit::backend::{self, aws_cli::AwsCli};
use schedkit::{Config, Reconciler, config};

use crate::Context;
use crate::ui;

/// A loaded config plus the clients for its region
pub struct Session {
    pub config: Config,
    pub reconciler: Reconciler,
}

impl Session {
    /// Resolve the account, load the config and connect
    pub fn open(ctx: &Context) -> Result<Self> {
        if !AwsCli::is_available() {
            bail!("aws CLI not found in PATH");
        }
        let account_id = match &ctx.account_id {
            Some(id) => id.clone(),
            None => AwsCli::new("")
                .caller_account_id()
                .context("failed to resolve the AWS account id (pass --account-id to skip)")?,
        };
        debug!("using account {account_id}");

        let config = config::load_config_file(&ctx.conf, &account_id)
            .with_context(|| format!("failed to load {}", ctx.conf.display()))?;
        if config.rules.is_empty() && !ctx.quiet {
            ui::warn(&format!("no rules defined in {}", ctx.conf.display()));
        }
        let reconciler = Reconciler::new(backend::default_clients(&config.base.region));
        Ok(Self { config, reconciler })
    }
}
