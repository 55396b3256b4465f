use anyhow::{Result, bail};

use super::Session;
use crate::Context;
use crate::cli::SelectArgs;
use crate::ui;

pub fn run(ctx: &Context, args: &SelectArgs) -> Result<()> {
    let session = Session::open(ctx)?;

    let mut invalid = Vec::new();
    for rule in session.config.select(args.name())? {
        let messages = session.reconciler.validate(rule);
        if messages.is_empty() {
            if !ctx.quiet {
                ui::success(&rule.name);
            }
            continue;
        }
        ui::error(&rule.name);
        for message in &messages {
            ui::dim(message);
        }
        invalid.push(rule.name.as_str());
    }

    if !invalid.is_empty() {
        bail!("{} failed validation", ui::count(invalid.len(), "rule"));
    }
    Ok(())
}
