use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::orchestrator::KitOrchestrator;

/// Periodic job that reclaims expired sessions.
///
/// The orchestrator never schedules its own sweeps; a host process runs
/// one of these alongside it.
pub struct SessionSweeper {
    orchestrator: Arc<KitOrchestrator>,
    interval: Duration,
    cancel: CancellationToken,
}

impl SessionSweeper {
    pub fn new(
        orchestrator: Arc<KitOrchestrator>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            orchestrator,
            interval,
            cancel,
        }
    }

    /// Run one sweep immediately. Returns the number of sessions removed.
    pub async fn sweep_once(&self) -> usize {
        self.orchestrator.cleanup_expired_sessions().await.len()
    }

    /// Run the sweep loop. Blocks until cancelled.
    pub async fn run(&self) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            timeout_secs = self.orchestrator.session_timeout().as_secs(),
            "Session sweeper started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    let removed = self.sweep_once().await;
                    debug!(removed, "Session sweep finished");
                }
                _ = self.cancel.cancelled() => {
                    info!("Session sweeper shutting down");
                    break;
                }
            }
        }
    }
}
