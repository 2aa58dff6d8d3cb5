//! Lease renewal for in-flight records

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::running::RunningSet;
use crate::clock::Clock;
use crate::metrics::WorkerMetrics;
use crate::store::{Record, RecordId, Store};

/// Periodically renews the lease on every in-flight record
///
/// Records the store no longer reports as owned have their handler's
/// cancellation token fired; they stay in flight until the handler returns.
pub(crate) struct HeartbeatLoop<R: Record> {
    pub name: String,
    pub interval: Duration,
    pub store: Arc<dyn Store<R>>,
    pub running: Arc<RunningSet>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<WorkerMetrics>,
}

impl<R: Record> HeartbeatLoop<R> {
    pub async fn run(self, stop: CancellationToken) {
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = self.clock.sleep(self.interval) => {}
            }

            self.beat().await;
        }

        debug!(worker = %self.name, "Heartbeat loop exited");
    }

    async fn beat(&self) {
        let ids = self.running.ids();
        if ids.is_empty() {
            return;
        }

        let started = Instant::now();
        let result = self.store.heartbeat(&ids).await;
        self.metrics
            .heartbeat
            .observe(started.elapsed(), result.is_ok());

        match result {
            Ok(owned) => {
                let lost = lost_ids(&ids, &owned);
                if lost.is_empty() {
                    debug!(worker = %self.name, count = ids.len(), "Heartbeat sent");
                    return;
                }

                warn!(
                    worker = %self.name,
                    lost = ?lost,
                    "Lost lease on in-flight records"
                );
                self.metrics.record_lost_leases(lost.len());
                for id in lost {
                    self.running.cancel(id);
                }
            }
            Err(e) => {
                error!(worker = %self.name, error = %e, "Heartbeat failed");
            }
        }
    }
}

fn lost_ids(sent: &[RecordId], owned: &[RecordId]) -> Vec<RecordId> {
    sent.iter()
        .copied()
        .filter(|id| !owned.contains(id))
        .collect()
}
