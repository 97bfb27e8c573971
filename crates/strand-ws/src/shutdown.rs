//! Graceful server shutdown via a shared `CancellationToken`.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Coordinates shutdown between the serve loop and per-connection tasks.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    connections: TaskTracker,
}

impl ShutdownCoordinator {
    /// New coordinator with no shutdown pending.
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            connections: TaskTracker::new(),
        }
    }

    /// Token observed by the serve loop's graceful-shutdown future.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Tracker the server registers per-connection serve tasks on.
    #[must_use]
    pub fn connections(&self) -> &TaskTracker {
        &self.connections
    }

    /// Signal shutdown to everything holding a token.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has been signalled.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Signal shutdown and wait up to `deadline` for per-connection tasks to
    /// drain. Tasks still running at the deadline are left to the runtime.
    pub async fn drain(&self, deadline: Duration) {
        self.trigger();
        let _ = self.connections.close();
        info!(deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
            "draining connections");
        if tokio::time::timeout(deadline, self.connections.wait())
            .await
            .is_err()
        {
            warn!("shutdown deadline elapsed with connections still active");
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
