//! # schedkit
//!
//! Pure Rust library for declaring, diffing and reconciling scheduled ECS
//! tasks triggered by EventBridge rules.
//!
//! This crate provides functionality for:
//! - Loading templated YAML/JSON/Jsonnet configs with plugin lookups
//! - Validating schedule expressions and unresolved values up front
//! - Reconstructing remote rules into the shape a config would produce
//! - Applying, deleting, running and pruning rules
//!
//! ## Example
//!
//! ```no_run
//! use schedkit::backend::{self, aws_cli::AwsCli};
//! use schedkit::{Reconciler, config};
//! use std::path::Path;
//!
//! let account = AwsCli::new("us-east-1").caller_account_id().expect("no credentials");
//! let config = config::load_config_file(Path::new("ecschedule.yaml"), &account)
//!     .expect("invalid config");
//!
//! let reconciler = Reconciler::new(backend::default_clients(&config.base.region));
//! for rule in &config.rules {
//!     reconciler.apply(rule, true).expect("apply failed");
//! }
//! ```
//!
//! ## Deferred values
//!
//! Config values that cannot be resolved while loading (an undefined
//! `must_env` variable, a lookup nobody registered) are kept as tokens and
//! reported by [`Reconciler`] before anything is written. See [`template`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arn;
pub mod backend;
pub mod config;
pub mod cron;
pub mod diff;
pub mod error;
pub mod fetch;
pub mod plugin;
pub mod prune;
pub mod reconcile;
pub mod rule;
pub mod runner;
pub mod template;

pub use config::{Config, Loader};
pub use diff::{DiffFormat, format_diff};
pub use error::{Error, ErrorCategory, Result};
pub use fetch::RuleGetter;
pub use reconcile::{ApplyOutcome, Reconciler};
pub use rule::{BaseConfig, Rule, Target};
