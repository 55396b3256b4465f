//! Core types for drift detection jobs

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outcome of a single drift detection job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftReport {
    /// Name of the declared resource the job compared
    pub name: String,
    /// Rendered difference; empty when declared and deployed state agree
    pub diff: String,
    /// Problems found while validating the declaration
    pub validation_errors: Vec<String>,
}

impl DriftReport {
    /// Create a report with no validation errors
    pub fn new(name: impl Into<String>, diff: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            diff: diff.into(),
            validation_errors: Vec::new(),
        }
    }

    /// Attach validation errors
    pub fn with_validation_errors(mut self, errors: Vec<String>) -> Self {
        self.validation_errors = errors;
        self
    }

    /// Check if the job found drift
    pub fn has_drift(&self) -> bool {
        !self.diff.is_empty()
    }

    /// Check if validation passed
    pub fn is_valid(&self) -> bool {
        self.validation_errors.is_empty()
    }
}

/// Failures produced by the job pool itself rather than by a job
#[derive(Debug, Error)]
pub enum JobError {
    /// The job observed cancellation before it could finish
    #[error("job {name} cancelled")]
    Cancelled {
        /// Name of the cancelled job
        name: String,
    },

    /// Jobs panicked and produced no result
    #[error("{count} job(s) failed due to panic")]
    Panicked {
        /// Number of jobs that panicked
        count: usize,
    },

    /// The worker pool could not be created
    #[error("failed to create worker pool: {0}")]
    Pool(String),
}

impl JobError {
    /// Check whether an error chain is a cancellation
    pub fn is_cancellation(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<JobError>(),
            Some(JobError::Cancelled { .. })
        )
    }
}
