mod cli;
mod commands;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::path::PathBuf;

/// Global context for the application
pub struct Context {
    pub quiet: bool,
    pub conf: PathBuf,
    pub account_id: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .format_target(false)
        .init();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let ctx = Context {
        quiet: cli.quiet,
        conf: cli.conf,
        account_id: cli.account_id,
    };

    if let Err(err) = dispatch(&ctx, cli.command) {
        ui::fatal(&err);
        std::process::exit(1);
    }
}

fn dispatch(ctx: &Context, command: Command) -> Result<()> {
    match command {
        Command::Apply(args) => commands::apply::run(ctx, &args),
        Command::Diff(args) => commands::diff::run(ctx, &args),
        Command::Delete(args) => commands::delete::run(ctx, &args),
        Command::Dump => commands::dump::run(ctx),
        Command::Run(args) => commands::run::run(ctx, &args),
        Command::Validate(args) => commands::validate::run(ctx, &args),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "ecschedule", &mut io::stdout());
            Ok(())
        }
    }
}
