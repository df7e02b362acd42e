//! Server-wide shutdown signal.
//!
//! One [`CancellationToken`] is shared by the HTTP listener and every
//! session. Cancelling it stops accepting upgrades and makes each live
//! session close its socket with 1001.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long [`ShutdownCoordinator::drain`] waits by default.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the shutdown token.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    /// Fresh, un-cancelled coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Clone of the shared token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Signal shutdown. Idempotent.
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            info!("shutdown requested");
        }
        self.token.cancel();
    }

    /// Whether shutdown has been signalled.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Signal shutdown, then wait up to `timeout` for `handles` to finish.
    ///
    /// Returns `true` if every task finished in time. Tasks still running at
    /// the deadline are aborted.
    pub async fn drain(&self, handles: Vec<JoinHandle<()>>, timeout: Duration) -> bool {
        self.shutdown();
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let count = aborts.len();

        if tokio::time::timeout(timeout, futures::future::join_all(handles))
            .await
            .is_ok()
        {
            info!(tasks = count, "shutdown drained");
            true
        } else {
            warn!(?timeout, tasks = count, "shutdown drain timed out, aborting");
            for abort in aborts {
                abort.abort();
            }
            false
        }
    }
}
