//! Shutdown coordination.
//!
//! A [`ShutdownCoordinator`] owns the one cancellation token every
//! long-running task observes. The token moves from running to cancelled
//! exactly once; later triggers are logged and ignored.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    triggered: Arc<AtomicBool>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token handed to tasks at construction
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the shared token. Returns `false` if shutdown was already
    /// under way.
    pub fn trigger(&self, reason: &str) -> bool {
        if self.triggered.swap(true, Ordering::SeqCst) {
            warn!(reason, "Shutdown already in progress");
            return false;
        }

        info!(reason, "Shutting down");
        self.token.cancel();
        true
    }

    /// Trigger shutdown on every Ctrl+C (and SIGTERM on unix).
    ///
    /// Runs until the task is dropped or aborted so that repeated signals
    /// keep being absorbed instead of killing the process mid-drain.
    pub async fn listen_for_signals(self) {
        #[cfg(unix)]
        let mut terminate = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(stream) => Some(stream),
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                None
            }
        };

        loop {
            #[cfg(unix)]
            let sigterm = async {
                match terminate.as_mut() {
                    Some(stream) => {
                        stream.recv().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            };

            #[cfg(not(unix))]
            let sigterm = std::future::pending::<()>();

            tokio::select! {
                result = signal::ctrl_c() => {
                    if let Err(e) = result {
                        error!(error = %e, "Failed to listen for Ctrl+C");
                        return;
                    }
                    self.trigger("interrupt");
                }
                () = sigterm => {
                    self.trigger("terminate");
                }
            }
        }
    }
}

/// Latest deadline handed out, about thirty years ahead
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `timeout` from now, capped instead of overflowing the clock
pub fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout.min(FAR_FUTURE))
        .unwrap_or_else(|| now + Duration::from_secs(86_400))
}

/// Await a task, aborting it if `deadline` passes first.
///
/// Returns `None` if the task panicked or had to be aborted.
pub async fn join_until<T>(name: &str, mut handle: JoinHandle<T>, deadline: Instant) -> Option<T> {
    match tokio::time::timeout_at(deadline, &mut handle).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            error!(task = name, error = %e, "Task failed");
            None
        }
        Err(_) => {
            warn!(task = name, "Task did not finish before shutdown deadline, aborting");
            handle.abort();
            None
        }
    }
}
