use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

/// Owns every spawned unit of work (listeners, buy retries, scheduled sells)
/// and tears them down together.
///
/// `shutdown` cancels the shared token and closes the registry; `wait`
/// resolves once every tracked task has returned, including tasks that
/// finish their current step before noticing the cancellation.
#[derive(Clone, Default)]
pub struct ShutdownCoordinator {
    cancel: CancellationToken,
    tracker: TaskTracker,
    initiated: Arc<AtomicBool>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token observed by all supervised work.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Token cancelled with the coordinator, or on its own.
    pub fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Spawn a tracked task.
    pub fn spawn<F>(&self, name: &str, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        debug!("Spawning task: {name}");
        self.tracker.spawn(task)
    }

    /// Number of tracked tasks still running.
    pub fn outstanding(&self) -> usize {
        self.tracker.len()
    }

    /// Request shutdown. Returns `false` if shutdown was already under way.
    pub fn shutdown(&self) -> bool {
        if self.initiated.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already in progress");
            return false;
        }
        info!(
            "Shutting down, cancelling {} outstanding task(s)",
            self.tracker.len()
        );
        self.tracker.close();
        self.cancel.cancel();
        true
    }

    /// Wait for every tracked task to finish. Only resolves after `shutdown`.
    pub async fn wait(&self) {
        self.tracker.wait().await;
        info!("All tasks stopped");
    }
}

/// Resolve on Ctrl+C or SIGTERM. Returns the signal name.
#[cfg(unix)]
pub async fn termination_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.map(|_| "SIGINT"),
        _ = term.recv() => Ok("SIGTERM"),
    }
}

/// Resolve on Ctrl+C. Returns the signal name.
#[cfg(not(unix))]
pub async fn termination_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|_| "Ctrl+C")
}
