use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ecschedule")]
#[command(version)]
#[command(about = "Declarative scheduled ECS tasks on EventBridge", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (YAML, JSON or Jsonnet)
    #[arg(
        short,
        long = "conf",
        env = "ECSCHEDULE_CONFIG",
        default_value = "ecschedule.yaml",
        global = true
    )]
    pub conf: PathBuf,

    /// AWS account id; resolved from the current credentials when omitted
    #[arg(long, env = "ECSCHEDULE_ACCOUNT_ID", global = true)]
    pub account_id: Option<String>,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create or update rules so remote state matches the config
    Apply(ApplyArgs),

    /// Show differences between the config and remote rules
    Diff(DiffArgs),

    /// Delete rules from the remote side
    Delete(DeleteArgs),

    /// Print remote rules of the configured cluster as a config
    Dump,

    /// Run a rule's task once, outside its schedule
    Run(RunArgs),

    /// Check rules for unresolved values and missing task definitions
    Validate(SelectArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Arguments
// ============================================================================

/// Which rules a command acts on
#[derive(Args, Clone, Debug)]
#[group(required = true, multiple = false)]
pub struct SelectArgs {
    /// Rule name
    #[arg(short, long)]
    pub rule: Option<String>,

    /// Every rule in the config
    #[arg(short, long)]
    pub all: bool,
}

impl SelectArgs {
    /// The selected rule name, `None` meaning all rules
    pub fn name(&self) -> Option<&str> {
        if self.all { None } else { self.rule.as_deref() }
    }
}

#[derive(Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub select: SelectArgs,

    /// Show changes without applying them
    #[arg(long)]
    pub dry_run: bool,

    /// Delete tracked rules missing from the config (requires --all)
    #[arg(long, requires = "all")]
    pub prune: bool,
}

#[derive(Args)]
pub struct DiffArgs {
    #[command(flatten)]
    pub select: SelectArgs,

    /// Also validate each rule and fail if any is invalid
    #[arg(long)]
    pub validate: bool,

    /// Number of rules compared concurrently
    #[arg(short = 'j', long, default_value = "1", value_parser = clap::value_parser!(u16).range(1..))]
    pub parallelism: u16,

    /// Print unified diffs instead of colored full listings
    #[arg(short, long)]
    pub unified: bool,
}

#[derive(Args)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub select: SelectArgs,

    /// Show what would be deleted without deleting
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args)]
pub struct RunArgs {
    /// Rule name
    #[arg(short, long)]
    pub rule: String,

    /// Show the task without running it
    #[arg(long)]
    pub dry_run: bool,
}
