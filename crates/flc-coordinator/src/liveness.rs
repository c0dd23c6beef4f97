//! Periodic eviction of sessions that stopped talking.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::coordinator::Coordinator;

/// Sweeps the registry every `interval`, evicting sessions idle for longer
/// than the coordinator's liveness timeout.
pub struct LivenessMonitor {
    coordinator: Arc<Coordinator>,
    /// Time between sweeps; the idle limit itself comes from the coordinator.
    interval: Duration,
}

impl LivenessMonitor {
    pub fn new(coordinator: Arc<Coordinator>, interval: Duration) -> Self {
        Self {
            coordinator,
            interval,
        }
    }

    /// One sweep. Returns the evicted client ids.
    pub async fn sweep(&self) -> Vec<String> {
        let evicted = self.coordinator.evict_stale(chrono::Utc::now()).await;
        if !evicted.is_empty() {
            tracing::info!(count = evicted.len(), clients = ?evicted, "Evicted inactive clients");
        }
        evicted
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + self.interval, self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep().await;
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::debug!("Liveness monitor stopped");
    }
}
