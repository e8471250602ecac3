//! Deadline bounded execution of archive operations.
//!
//! The action runs on its own task and keeps running when the deadline passes: a timeout
//! unblocks the caller, it does not cancel engine I/O that is already in flight.

use std::{future::Future, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{ArchiveError, Result};

/// Records the phase an operation is in, for the error reported on timeout.
#[derive(Debug, Clone)]
pub struct PhaseReporter {
    phase: Arc<Mutex<Option<String>>>,
    deadline: Option<Instant>,
}

impl PhaseReporter {
    fn new(deadline: Option<Instant>) -> Self {
        Self {
            phase: Default::default(),
            deadline,
        }
    }

    /// A reporter for actions which run without a deadline.
    pub fn unbounded() -> Self {
        Self::new(None)
    }

    /// Records `phase` as the current phase.
    ///
    /// Returns whether the deadline has already passed, so that long running actions can
    /// stop early.
    pub fn report(&self, phase: impl Into<String>) -> bool {
        *self.phase.lock() = Some(phase.into());
        self.is_timed_out()
    }

    /// Whether the deadline has passed.
    pub fn is_timed_out(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// The last recorded phase.
    pub fn phase(&self) -> Option<String> {
        self.phase.lock().clone()
    }
}

/// Runs `action` under an optional deadline.
///
/// With no deadline (or a zero one) the action is awaited directly. Otherwise the action is
/// raced against a timer. If the timer wins the result is [`ArchiveError::Timeout`] carrying
/// the last phase the action reported. If the action settles first its result is returned
/// unchanged, errors included.
pub async fn run<T, F, Fut>(timeout: Option<Duration>, action: F) -> Result<T>
where
    F: FnOnce(PhaseReporter) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let timeout = match timeout {
        None => return action(PhaseReporter::unbounded()).await,
        Some(t) if t.is_zero() => return action(PhaseReporter::unbounded()).await,
        Some(t) => t,
    };

    let reporter = PhaseReporter::new(Some(Instant::now() + timeout));
    let task = tokio::task::spawn(action(reporter.clone()));
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(res)) => res,
        Ok(Err(join_err)) => Err(anyhow::Error::from(join_err)
            .context("archive operation task failed")
            .into()),
        Err(_elapsed) => {
            let phase = reporter.phase();
            debug!(?timeout, ?phase, "operation timed out");
            Err(ArchiveError::Timeout { phase })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn no_deadline_awaits_directly() {
        let res = run(None, |_| async { Ok(42) }).await.unwrap();
        assert_eq!(res, 42);
        let res = run(Some(Duration::ZERO), |_| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok("slow")
        })
        .await
        .unwrap();
        assert_eq!(res, "slow");
    }

    #[tokio::test]
    async fn deadline_reports_last_phase() {
        let err = run(Some(Duration::from_millis(50)), |phase| async move {
            phase.report("opening");
            phase.report("reading file");
            futures::future::pending::<()>().await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.to_string(), "Timed out while reading file");
    }

    #[tokio::test]
    async fn deadline_without_phase() {
        let err = run(Some(Duration::from_millis(10)), |_| {
            futures::future::pending::<Result<()>>()
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ArchiveError::Timeout { phase: None }));
    }

    #[tokio::test]
    async fn errors_settling_first_are_not_masked() {
        let err = run(Some(Duration::from_secs(5)), |_| async {
            Err::<(), _>(ArchiveError::not_found("/missing"))
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn timed_out_action_keeps_running() {
        let done = Arc::new(AtomicBool::new(false));
        let d = done.clone();
        let err = run(Some(Duration::from_millis(20)), |phase| async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            assert!(phase.report("late write"));
            d.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        dat_archive_test::eventually(Duration::from_secs(2), || done.load(Ordering::SeqCst))
            .await
            .unwrap();
    }
}
