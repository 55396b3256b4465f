use anyhow::{Context as AnyhowContext, Result};
use schedkit::ApplyOutcome;

use super::Session;
use crate::Context;
use crate::cli::DeleteArgs;
use crate::ui;

pub fn run(ctx: &Context, args: &DeleteArgs) -> Result<()> {
    let session = Session::open(ctx)?;

    let mut deleted = 0;
    for rule in session.config.select(args.select.name())? {
        let outcome = session
            .reconciler
            .delete(rule, args.dry_run)
            .with_context(|| format!("failed to delete rule {}", rule.name))?;
        if outcome != ApplyOutcome::NoChange {
            deleted += 1;
        }
    }

    if !ctx.quiet {
        let verb = if args.dry_run { "would delete" } else { "deleted" };
        ui::success(&format!("{verb} {}", ui::count(deleted, "rule")));
    }
    Ok(())
}
