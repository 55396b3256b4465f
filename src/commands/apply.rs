use anyhow::{Context as AnyhowContext, Result};
use schedkit::{ApplyOutcome, prune};

use super::Session;
use crate::Context;
use crate::cli::ApplyArgs;
use crate::ui;

pub fn run(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let config = &session.config;

    let mut changed = 0;
    for rule in config.select(args.select.name())? {
        let outcome = session
            .reconciler
            .apply(rule, args.dry_run)
            .with_context(|| format!("failed to apply rule {}", rule.name))?;
        if outcome != ApplyOutcome::NoChange {
            changed += 1;
        }
    }

    let mut pruned = Vec::new();
    if args.prune {
        pruned = prune::prune(
            &session.reconciler,
            &config.base,
            &config.role,
            &config.rule_names(),
            args.dry_run,
        )
        .context("failed to prune orphaned rules")?;
    }

    if !ctx.quiet {
        let verb = if args.dry_run { "would change" } else { "changed" };
        let mut msg = format!("{} {verb}", ui::count(changed, "rule"));
        if args.prune {
            let verb = if args.dry_run { "would prune" } else { "pruned" };
            msg.push_str(&format!(", {} {verb}", ui::count(pruned.len(), "rule")));
        }
        ui::success(&msg);
    }
    Ok(())
}
