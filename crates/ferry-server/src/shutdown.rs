//! Graceful shutdown: one cancellation signal plus a tracker for the tasks
//! that must finish before the process exits.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// How long tracked tasks get to finish by default.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Signals shutdown to the server, sessions and bridge, then waits for them.
#[derive(Clone, Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: TaskTracker,
}

impl ShutdownCoordinator {
    /// Fresh coordinator with no tracked tasks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled when shutdown starts.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Tracker that [`drain`](Self::drain) waits on.
    pub fn tracker(&self) -> TaskTracker {
        self.tasks.clone()
    }

    /// Spawn a task that shutdown waits for.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tasks.spawn(task)
    }

    /// Start shutting down. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has started.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Start shutting down and wait up to `timeout` for every tracked task.
    ///
    /// Returns `false` if some tasks were still running at the deadline.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.shutdown();
        let _ = self.tasks.close();
        info!(
            tasks = self.tasks.len(),
            timeout_ms = timeout.as_millis() as u64,
            "draining tasks"
        );

        if tokio::time::timeout(timeout, self.tasks.wait()).await.is_ok() {
            true
        } else {
            warn!(remaining = self.tasks.len(), "shutdown deadline passed with tasks still running");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_reaches_every_token() {
        let coord = ShutdownCoordinator::new();
        let before = coord.token();
        let via_clone = coord.clone().token();
        assert!(!coord.is_shutting_down());

        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
        assert!(before.is_cancelled());
        assert!(via_clone.is_cancelled());
    }

    #[tokio::test]
    async fn drain_waits_for_tasks_watching_the_token() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let finished = coord.spawn(async move {
            token.cancelled().await;
            "done"
        });

        assert!(coord.drain(Duration::from_secs(5)).await);
        assert_eq!(finished.await.unwrap(), "done");
    }

    #[tokio::test]
    async fn tracker_futures_are_awaited() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let tracked = coord.tracker().track_future(async move { token.cancelled().await });
        drop(tokio::spawn(tracked));

        assert!(coord.drain(Duration::from_secs(5)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_gives_up_on_stuck_tasks() {
        let coord = ShutdownCoordinator::new();
        let _stuck = coord.spawn(std::future::pending::<()>());

        assert!(!coord.drain(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn drain_without_tasks_is_immediate() {
        assert!(ShutdownCoordinator::new().drain(Duration::ZERO).await);
    }
}
