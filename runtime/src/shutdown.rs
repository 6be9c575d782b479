//! Graceful shutdown for background tasks.
//!
//! Long-running loops (queue consumers, sweepers) subscribe to a broadcast
//! signal and exit their loop when it fires. The coordinator then waits for
//! their join handles up to a grace period and aborts whatever is left.
//!
//! ```rust,no_run
//! use seatkeeper_runtime::shutdown::{ShutdownCoordinator, wait_for_signal};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(30));
//! let mut shutdown_rx = coordinator.subscribe();
//! coordinator.track("sweeper", tokio::spawn(async move {
//!     let _ = shutdown_rx.recv().await;
//! }));
//!
//! wait_for_signal().await;
//! coordinator.shutdown().await;
//! # }
//! ```

use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Broadcasts a shutdown signal and waits for tracked tasks to finish.
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a coordinator with the given grace period.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            tasks: Vec::new(),
            timeout,
        }
    }

    /// Receiver that yields once shutdown starts.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Sender half, for components that want to subscribe later.
    #[must_use]
    pub fn sender(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Wait for `handle` during [`Self::shutdown`].
    pub fn track(&mut self, name: &'static str, handle: JoinHandle<()>) {
        info!(task = name, "Tracking background task");
        self.tasks.push((name, handle));
    }

    /// Number of tracked tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Signal shutdown and wait for tracked tasks.
    ///
    /// Tasks still running when the grace period ends are aborted. Returns the
    /// names of tasks that did not finish cleanly.
    pub async fn shutdown(self) -> Vec<&'static str> {
        info!(
            tasks = self.tasks.len(),
            timeout = ?self.timeout,
            "Initiating graceful shutdown"
        );

        if self.shutdown_tx.send(()).is_err() {
            warn!("No active shutdown signal receivers");
        }

        let deadline = tokio::time::Instant::now() + self.timeout;
        let mut failed = Vec::new();

        for (name, mut handle) in self.tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => info!(task = name, "Task stopped"),
                Ok(Err(e)) => {
                    error!(task = name, error = %e, "Task ended abnormally");
                    failed.push(name);
                }
                Err(_) => {
                    error!(task = name, "Task did not stop within grace period, aborting");
                    handle.abort();
                    failed.push(name);
                }
            }
        }

        if failed.is_empty() {
            info!("All tasks shut down successfully");
        }
        failed
    }
}

/// Wait for Ctrl+C or SIGTERM.
pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler, waiting for Ctrl+C only");
                ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c().await;
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C"),
        Err(e) => error!(error = %e, "Failed to wait for Ctrl+C"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tracked_task_sees_signal_and_stops() {
        let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        let mut rx = coordinator.subscribe();
        coordinator.track(
            "listener",
            tokio::spawn(async move {
                let _ = rx.recv().await;
            }),
        );
        assert_eq!(coordinator.task_count(), 1);

        let failed = coordinator.shutdown().await;
        assert!(failed.is_empty());
    }

    #[tokio::test]
    async fn stuck_task_is_aborted_after_grace_period() {
        let mut coordinator = ShutdownCoordinator::new(Duration::from_millis(50));
        coordinator.track(
            "stuck",
            tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }),
        );

        let failed = coordinator.shutdown().await;
        assert_eq!(failed, vec!["stuck"]);
    }

    #[tokio::test]
    async fn shutdown_without_tasks_is_clean() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        assert!(coordinator.shutdown().await.is_empty());
    }
}
