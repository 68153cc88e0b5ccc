//! Periodic pass scheduling.

use super::monitor::Monitor;
use crate::domain::MonitoredEntity;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::info;

/// Runs one pass per tick. Passes never overlap; a pass that outlasts the
/// interval delays the next tick instead of queueing a burst.
pub struct Scheduler {
    monitor: Arc<Monitor>,
    entities: Arc<Vec<MonitoredEntity>>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(monitor: Arc<Monitor>, entities: Vec<MonitoredEntity>, interval: Duration) -> Self {
        Self {
            monitor,
            entities: Arc::new(entities),
            interval,
        }
    }

    /// Tick until `shutdown` resolves. The first pass starts immediately.
    ///
    /// An in-flight pass is dropped at its next await point on shutdown;
    /// each state write is atomic so nothing half-written survives.
    pub async fn run_until<F>(&self, shutdown: F) -> u64
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let mut passes = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested during pass, abandoning it");
                    break;
                }
                _ = self.monitor.run_pass(&self.entities) => {
                    passes += 1;
                }
            }
        }

        info!(passes, "Scheduler stopped");
        passes
    }
}
