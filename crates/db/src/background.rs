//! Bookkeeping shared by the two periodic tasks (health check, auto sync).

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long `stop` waits for a task to observe its cancellation.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// A spawned interval task and the token that stops it.
pub(crate) struct BackgroundTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    pub(crate) fn new(name: &'static str, cancel: CancellationToken, handle: JoinHandle<()>) -> Self {
        Self {
            name,
            cancel,
            handle,
        }
    }

    pub(crate) async fn stop(self) {
        self.cancel.cancel();
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.handle).await.is_err() {
            tracing::warn!(task = self.name, "Background task did not stop in time");
        } else {
            tracing::info!(task = self.name, "Background task stopped");
        }
    }
}

/// Holds an "in progress" flag for as long as it lives.
pub(crate) struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    /// `None` when the flag is already held.
    pub(crate) fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunningGuard(flag))
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
