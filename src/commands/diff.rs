//! Concurrent diff of selected rules against remote state.

use anyhow::{Context as AnyhowContext, Result, anyhow, bail};
use declarative::{BatchOutcome, CancelToken, DriftReport, DriftSummary, run_jobs};
use schedkit::{DiffFormat, Reconciler, Rule, format_diff};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::Session;
use crate::Context;
use crate::cli::DiffArgs;
use crate::ui;

pub fn run(ctx: &Context, args: &DiffArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let selected: Vec<Rule> = session
        .config
        .select(args.select.name())?
        .into_iter()
        .cloned()
        .collect();

    let format = if args.unified {
        DiffFormat::Unified
    } else {
        DiffFormat::PrettyColored
    };
    let outcome = compare(
        session.reconciler,
        selected,
        format,
        args.validate,
        usize::from(args.parallelism),
    );

    for report in &outcome.reports {
        print_report(ctx, report, format);
    }
    if let Some(err) = outcome.error {
        return Err(err);
    }

    if !ctx.quiet {
        ui::info(&ui::summary_line(&DriftSummary::from_reports(&outcome.reports)));
    }
    ensure_valid(&outcome)
}

/// Diff every rule on the job pool; reports come back sorted by name
fn compare(
    reconciler: Reconciler,
    rules: Vec<Rule>,
    format: DiffFormat,
    validate: bool,
    parallelism: usize,
) -> BatchOutcome {
    let names: Vec<String> = rules.iter().map(|r| r.name.clone()).collect();
    let rules: BTreeMap<String, Rule> = rules.into_iter().map(|r| (r.name.clone(), r)).collect();
    let job = diff_job(reconciler, Arc::new(rules), format, validate);
    let mut outcome = run_jobs(names, parallelism, &CancelToken::new(), job).collect();
    outcome.reports.sort_by(|a, b| a.name.cmp(&b.name));
    outcome
}

fn ensure_valid(outcome: &BatchOutcome) -> Result<()> {
    if !outcome.validation_failed {
        return Ok(());
    }
    let invalid: Vec<&str> = outcome
        .reports
        .iter()
        .filter(|r| !r.is_valid())
        .map(|r| r.name.as_str())
        .collect();
    bail!("validation failed for {}", invalid.join(", "))
}

/// Job comparing one rule, optionally validating it first
fn diff_job(
    reconciler: Reconciler,
    rules: Arc<BTreeMap<String, Rule>>,
    format: DiffFormat,
    validate: bool,
) -> impl Fn(&CancelToken, &str) -> Result<DriftReport> + Send + Sync + 'static {
    move |cancel, name| {
        let rule = rules
            .get(name)
            .ok_or_else(|| anyhow!("rule {name} is not in the config"))?;
        let errors = if validate {
            reconciler.validate(rule)
        } else {
            Vec::new()
        };
        cancel.check(name)?;
        let (from, to) = reconciler
            .diff(rule)
            .with_context(|| format!("failed to diff rule {name}"))?;
        Ok(DriftReport::new(name, format_diff(name, &from, &to, format))
            .with_validation_errors(errors))
    }
}

fn print_report(ctx: &Context, report: &DriftReport, format: DiffFormat) {
    match (report.has_drift(), format) {
        (true, DiffFormat::Unified) => print!("{}", report.diff),
        (true, DiffFormat::PrettyColored) => {
            ui::header(&report.name);
            print!("{}", report.diff);
        }
        (false, DiffFormat::PrettyColored) if !ctx.quiet => {
            ui::dim(&format!("{}: no differences", report.name));
        }
        (false, _) => {}
    }
    for message in &report.validation_errors {
        ui::error(&format!("{}: {message}", report.name));
    }
}
