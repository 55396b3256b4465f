//! Cancellation shared between the caller and running jobs
//!
//! Cancellation is cooperative: a job blocked on a remote call is never
//! interrupted, it only observes the token at its next checkpoint.

use crate::types::JobError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    parent: Option<CancelToken>,
}

/// A cloneable cancellation flag
///
/// Child tokens observe their parent's cancellation, but cancelling a child
/// leaves the parent untouched. The job pool runs every batch under a child
/// of the caller's token so that a failing job stops its siblings without
/// cancelling unrelated work.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    /// Create a new, uncancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a token that is also cancelled when `self` is
    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                parent: Some(self.clone()),
            }),
        }
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check if this token or any ancestor was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
            || self
                .inner
                .parent
                .as_ref()
                .is_some_and(CancelToken::is_cancelled)
    }

    /// Checkpoint for jobs: error out if cancellation was requested
    pub fn check(&self, name: &str) -> anyhow::Result<()> {
        if self.is_cancelled() {
            return Err(JobError::Cancelled {
                name: name.to_string(),
            }
            .into());
        }
        Ok(())
    }
}
