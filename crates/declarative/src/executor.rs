//! Execution engine - runs drift jobs with bounded parallelism and panic isolation

use crate::context::CancelToken;
use crate::types::{DriftReport, JobError};
use log::{debug, error};
use rayon::prelude::*;
use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

/// Handle to a running batch of jobs
///
/// `results` yields one report per successful job and disconnects once every
/// job has finished. `error` receives exactly one value after that.
pub struct JobHandle {
    /// Reports of jobs that completed before any cancellation
    pub results: Receiver<DriftReport>,
    /// First job error, a panic summary, or `None`
    pub error: Receiver<Option<anyhow::Error>>,
    validation_failed: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

/// Everything a finished batch produced
#[derive(Debug)]
pub struct BatchOutcome {
    /// Reports of jobs that completed before any cancellation
    pub reports: Vec<DriftReport>,
    /// First job error, a panic summary, or `None`
    pub error: Option<anyhow::Error>,
    /// Whether any delivered report carried validation errors
    pub validation_failed: bool,
}

impl JobHandle {
    /// Check whether any report delivered so far carried validation errors
    ///
    /// Only final once `results` has disconnected; [`JobHandle::collect`]
    /// returns the settled value.
    pub fn validation_failed(&self) -> bool {
        self.validation_failed.load(Ordering::SeqCst)
    }

    /// Wait for every job and gather the reports, the error slot and the
    /// validation flag
    pub fn collect(mut self) -> BatchOutcome {
        let reports: Vec<DriftReport> = self.results.iter().collect();
        let error = self
            .error
            .recv()
            .unwrap_or_else(|_| Some(anyhow::anyhow!("job runner exited without reporting")));
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        BatchOutcome {
            reports,
            error,
            validation_failed: self.validation_failed(),
        }
    }
}

/// State shared by every job of one batch
struct RunState {
    cancel: CancelToken,
    first_error: Mutex<Option<anyhow::Error>>,
    panics: AtomicUsize,
    validation_failed: Arc<AtomicBool>,
}

impl RunState {
    /// Record a job error and stop the remaining jobs
    ///
    /// The error is stored before the token is cancelled, so the
    /// cancellation errors it triggers can never take the slot.
    fn fail(&self, name: &str, err: anyhow::Error) {
        debug!("job {name} failed: {err:#}");
        {
            let mut slot = self
                .first_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                *slot = Some(err);
            }
        }
        self.cancel.cancel();
    }

    fn finish(&self) -> Option<anyhow::Error> {
        let first = self
            .first_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if first.is_some() {
            return first;
        }
        match self.panics.load(Ordering::SeqCst) {
            0 => None,
            count => Some(JobError::Panicked { count }.into()),
        }
    }
}

/// Run `job` once per name on at most `parallelism` workers
///
/// With `parallelism <= 1` jobs run one after another in submission order.
/// Otherwise they run on a dedicated rayon pool and reports arrive in
/// completion order; callers that need stable output must sort.
///
/// The batch runs under a child of `cancel`: the first failing job cancels
/// its siblings without touching the caller's token.
pub fn run_jobs<F>(names: Vec<String>, parallelism: usize, cancel: &CancelToken, job: F) -> JobHandle
where
    F: Fn(&CancelToken, &str) -> anyhow::Result<DriftReport> + Send + Sync + 'static,
{
    // Sized to the batch so a worker never waits on a slow consumer
    let (result_tx, result_rx) = mpsc::sync_channel(names.len().max(1));
    let (error_tx, error_rx) = mpsc::sync_channel(1);
    let validation_failed = Arc::new(AtomicBool::new(false));

    let state = RunState {
        cancel: cancel.child(),
        first_error: Mutex::new(None),
        panics: AtomicUsize::new(0),
        validation_failed: Arc::clone(&validation_failed),
    };

    let worker = thread::spawn(move || {
        let pool_error = if parallelism <= 1 {
            for name in &names {
                run_one(&state, &job, name, &result_tx);
            }
            None
        } else {
            execute_parallel(&state, &job, &names, parallelism, &result_tx).err()
        };
        drop(result_tx);

        let outcome = pool_error.map(anyhow::Error::from).or_else(|| state.finish());
        let _ = error_tx.send(outcome);
    });

    JobHandle {
        results: result_rx,
        error: error_rx,
        validation_failed,
        worker: Some(worker),
    }
}

/// Execute jobs in parallel using rayon
fn execute_parallel<F>(
    state: &RunState,
    job: &F,
    names: &[String],
    parallelism: usize,
    tx: &SyncSender<DriftReport>,
) -> Result<(), JobError>
where
    F: Fn(&CancelToken, &str) -> anyhow::Result<DriftReport> + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(parallelism)
        .build()
        .map_err(|e| JobError::Pool(e.to_string()))?;

    pool.install(|| {
        names
            .par_iter()
            .for_each_with(tx.clone(), |tx, name| run_one(state, job, name, tx));
    });
    Ok(())
}

/// Run a single job behind the panic boundary
fn run_one<F>(state: &RunState, job: &F, name: &str, tx: &SyncSender<DriftReport>)
where
    F: Fn(&CancelToken, &str) -> anyhow::Result<DriftReport>,
{
    if let Err(err) = state.cancel.check(name) {
        state.fail(name, err);
        return;
    }

    match panic::catch_unwind(AssertUnwindSafe(|| job(&state.cancel, name))) {
        Ok(Ok(report)) => {
            if state.cancel.is_cancelled() {
                debug!("dropping result of {name}: batch cancelled");
                return;
            }
            if !report.is_valid() {
                state.validation_failed.store(true, Ordering::SeqCst);
            }
            // The consumer may have stopped listening; the report is discarded then
            let _ = tx.send(report);
        }
        Ok(Err(err)) => state.fail(name, err),
        Err(payload) => {
            state.panics.fetch_add(1, Ordering::SeqCst);
            error!(
                "job {name} panicked: {}\n{}",
                panic_message(payload.as_ref()),
                Backtrace::force_capture()
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_sequential_keeps_submission_order() {
        let handle = run_jobs(names(&["test1", "test2", "test3"]), 1, &CancelToken::new(), |_, name| {
            Ok(DriftReport::new(name, format!("diff for {name}")))
        });
        let BatchOutcome { reports, error, .. } = handle.collect();

        assert!(error.is_none());
        let got: Vec<&str> = reports.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(got, vec!["test1", "test2", "test3"]);
        assert_eq!(reports[1].diff, "diff for test2");
    }

    #[test]
    fn test_panic_is_isolated() {
        let handle = run_jobs(names(&["test1", "test2", "test3"]), 2, &CancelToken::new(), |_, name| {
            if name == "test2" {
                panic!("unexpected fault in {name}");
            }
            Ok(DriftReport::new(name, ""))
        });
        let BatchOutcome { mut reports, error, .. } = handle.collect();
        reports.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].name, "test1");
        assert_eq!(reports[1].name, "test3");
        let error = error.expect("panic summary");
        assert!(error.to_string().contains("failed due to panic"));
        assert!(error.to_string().starts_with("1 "));
    }

    #[test]
    fn test_error_cancels_remaining_jobs() {
        let handle = run_jobs(names(&["a", "b", "c"]), 1, &CancelToken::new(), |cancel, name| {
            cancel.check(name)?;
            if name == "b" {
                anyhow::bail!("remote call failed for {name}");
            }
            Ok(DriftReport::new(name, ""))
        });
        let BatchOutcome { reports, error, .. } = handle.collect();

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].name, "a");
        assert_eq!(error.expect("first error").to_string(), "remote call failed for b");
    }

    #[test]
    fn test_real_error_wins_over_panics() {
        let handle = run_jobs(names(&["a", "b"]), 1, &CancelToken::new(), |_, name| {
            if name == "a" {
                panic!("boom");
            }
            anyhow::bail!("hard failure")
        });
        let BatchOutcome { reports, error, .. } = handle.collect();

        assert!(reports.is_empty());
        assert_eq!(error.expect("error").to_string(), "hard failure");
    }

    #[test]
    fn test_cancelled_before_start() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let handle = run_jobs(names(&["a", "b"]), 2, &cancel, |_, name| {
            Ok(DriftReport::new(name, ""))
        });
        let BatchOutcome { reports, error, .. } = handle.collect();

        assert!(reports.is_empty());
        assert!(JobError::is_cancellation(&error.expect("cancellation")));
    }

    #[test]
    fn test_parallel_delivers_every_result() {
        let list = names(&["e", "d", "c", "b", "a"]);
        let handle = run_jobs(list, 3, &CancelToken::new(), |_, name| Ok(DriftReport::new(name, "")));
        let BatchOutcome { mut reports, error, .. } = handle.collect();
        reports.sort_by(|a, b| a.name.cmp(&b.name));

        assert!(error.is_none());
        let got: Vec<&str> = reports.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(got, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_validation_flag() {
        let handle = run_jobs(names(&["ok", "bad"]), 1, &CancelToken::new(), |_, name| {
            let report = DriftReport::new(name, "");
            if name == "bad" {
                return Ok(report.with_validation_errors(vec!["environment variable X is not defined".into()]));
            }
            Ok(report)
        });
        let (reports, error) = {
            let results = &handle.results;
            let reports: Vec<DriftReport> = results.iter().collect();
            let error = handle.error.recv().expect("error slot");
            (reports, error)
        };

        assert!(error.is_none());
        assert_eq!(reports.len(), 2);
        assert!(handle.validation_failed());
    }

    #[test]
    fn test_empty_batch() {
        let handle = run_jobs(Vec::new(), 4, &CancelToken::new(), |_, name| Ok(DriftReport::new(name, "")));
        let BatchOutcome { reports, error, .. } = handle.collect();
        assert!(reports.is_empty());
        assert!(error.is_none());
    }

    #[test]
    fn test_validation_flag_settled_by_collect() {
        let handle = run_jobs(names(&["ok", "bad", "slow"]), 2, &CancelToken::new(), |_, name| {
            thread::sleep(Duration::from_millis(50));
            let report = DriftReport::new(name, "");
            if name == "bad" {
                return Ok(report.with_validation_errors(vec!["environment variable X is not defined".into()]));
            }
            Ok(report)
        });
        let outcome = handle.collect();

        assert!(outcome.error.is_none());
        assert_eq!(outcome.reports.len(), 3);
        assert!(outcome.validation_failed);
    }

    #[test]
    fn test_parallel_error_cancels_pending_jobs() {
        let started = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&started);
        let list = names(&["fail", "a", "b", "c", "d", "e", "f", "g", "h"]);
        let handle = run_jobs(list, 2, &CancelToken::new(), move |cancel, name| {
            if name == "fail" {
                anyhow::bail!("remote call failed for {name}");
            }
            counter.fetch_add(1, Ordering::SeqCst);
            let deadline = Instant::now() + Duration::from_secs(5);
            while !cancel.is_cancelled() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            cancel.check(name)?;
            Ok(DriftReport::new(name, ""))
        });
        let outcome = handle.collect();

        assert!(outcome.reports.is_empty());
        assert_eq!(
            outcome.error.expect("first error").to_string(),
            "remote call failed for fail"
        );
        assert!(started.load(Ordering::SeqCst) < 8);
    }
}
