//! # Declarative
//!
//! Primitives for detecting drift between declared and deployed state.
//!
//! Drift detection is embarrassingly parallel: every declared resource is
//! compared against the remote side independently. This crate runs those
//! comparisons as jobs on a bounded worker pool and streams the reports back.
//!
//! ## Core Concepts
//!
//! - **DriftReport**: The outcome of one job (name, rendered diff, validation errors)
//! - **CancelToken**: Cooperative cancellation shared by every job of a run
//! - **JobHandle**: Result stream plus a single-value error slot
//! - **BatchOutcome**: Reports, error and validation flag of a finished run
//! - **DriftSummary**: Counts for presenting a finished run
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{run_jobs, CancelToken, DriftReport};
//!
//! let names = vec!["nightly-report".to_string(), "hourly-sync".to_string()];
//! let handle = run_jobs(names, 4, &CancelToken::new(), |cancel, name| {
//!     cancel.check(name)?;
//!     Ok(DriftReport::new(name, String::new()))
//! });
//!
//! let mut outcome = handle.collect();
//! outcome.reports.sort_by(|a, b| a.name.cmp(&b.name));
//! if let Some(err) = outcome.error {
//!     eprintln!("{err:#}");
//! }
//! ```
//!
//! ## Failure Isolation
//!
//! A panic inside one job never takes down the pool: it is caught at the job
//! boundary, logged with a backtrace and counted. The error slot reports the
//! first real job error, or a panic summary when only panics occurred.

pub mod context;
pub mod diff;
pub mod executor;
pub mod types;

// Re-export main types at crate root
pub use context::CancelToken;
pub use diff::DriftSummary;
pub use executor::{BatchOutcome, JobHandle, run_jobs};
pub use types::{DriftReport, JobError};
