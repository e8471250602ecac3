//! Waiting for asynchronous side effects in tests.

use std::time::Duration;

use anyhow::{bail, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Polls `check` until it returns `true` or `timeout` elapses.
///
/// Event listeners run on their own tasks, so tests that collect events have to give them
/// a moment to be delivered.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    #[tokio::test]
    async fn eventually_succeeds() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            c.store(3, Ordering::SeqCst);
        });
        eventually(Duration::from_secs(2), || counter.load(Ordering::SeqCst) == 3)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn eventually_times_out() {
        let res = eventually(Duration::from_millis(60), || false).await;
        assert!(res.is_err());
    }
}
