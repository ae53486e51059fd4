//! Background idle-session sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use super::manager::SessionManager;

/// Handle for the running sweep task.
struct SweepHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    join_handle: JoinHandle<()>,
}

impl SweepHandle {
    async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.join_handle.await;
    }
}

/// Periodically terminates idle sessions.
///
/// `start` is idempotent: while a sweep task runs, further calls do
/// nothing.
pub struct SessionSweeper {
    manager: Arc<SessionManager>,
    interval: Duration,
    idle_timeout: Duration,
    handle: Mutex<Option<SweepHandle>>,
}

impl SessionSweeper {
    /// Sweeper using the manager's configured cadence and timeout.
    pub fn new(manager: Arc<SessionManager>) -> Self {
        let interval = manager.config().sweep_interval();
        let idle_timeout = manager.config().idle_timeout();
        Self::with_timing(manager, interval, idle_timeout)
    }

    pub fn with_timing(
        manager: Arc<SessionManager>,
        interval: Duration,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            manager,
            interval: interval.max(Duration::from_millis(1)),
            idle_timeout,
            handle: Mutex::new(None),
        }
    }

    /// Run one sweep now. Returns the ids terminated.
    pub async fn sweep_once(&self) -> Vec<String> {
        sweep(&self.manager, self.idle_timeout).await
    }

    /// Whether the background task is running.
    pub async fn is_running(&self) -> bool {
        self.handle.lock().await.is_some()
    }

    /// Start the background task. Returns false if it was already running.
    pub async fn start(&self) -> bool {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            tracing::debug!("session sweeper already running");
            return false;
        }

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let manager = self.manager.clone();
        let interval = self.interval;
        let idle_timeout = self.idle_timeout;

        let join_handle = tokio::spawn(async move {
            tracing::info!(
                interval_secs = interval.as_secs(),
                idle_timeout_secs = idle_timeout.as_secs(),
                "starting session sweeper"
            );

            let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        sweep(&manager, idle_timeout).await;
                    }
                    _ = &mut shutdown_rx => {
                        tracing::info!("session sweeper stopping");
                        break;
                    }
                }
            }
        });

        *handle = Some(SweepHandle {
            shutdown_tx: Some(shutdown_tx),
            join_handle,
        });
        true
    }

    /// Stop the background task and wait for it to finish. A no-op when
    /// not running.
    pub async fn stop(&self) {
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
    }
}

async fn sweep(manager: &SessionManager, idle_timeout: Duration) -> Vec<String> {
    match manager.terminate_idle(idle_timeout).await {
        Ok(terminated) => {
            if !terminated.is_empty() {
                tracing::info!(count = terminated.len(), "idle sessions terminated");
            }
            terminated
        }
        Err(e) => {
            tracing::error!(error = %e, "session sweep failed");
            Vec::new()
        }
    }
}

impl std::fmt::Debug for SessionSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSweeper")
            .field("interval", &self.interval)
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}
