use anyhow::{Context as AnyhowContext, Result};

use super::Session;
use crate::Context;
use crate::cli::RunArgs;
use crate::ui;

pub fn run(ctx: &Context, args: &RunArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let rule = session.config.select(Some(&args.rule))?[0];

    let tasks = session
        .reconciler
        .run(rule, args.dry_run)
        .with_context(|| format!("failed to run rule {}", rule.name))?;

    if !ctx.quiet && !args.dry_run {
        ui::success(&format!("started {}", ui::count(tasks.len(), "task")));
        for arn in &tasks {
            ui::kv("task", arn);
        }
    }
    Ok(())
}
