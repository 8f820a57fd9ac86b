// Fixed-cadence snapshot publication. The watch channel is the rendering
// boundary: consumers borrow the latest snapshot and never touch store locks.

use blotter_common::{MetricsCollector, PortfolioSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::store::PortfolioStore;

pub type SnapshotReceiver = watch::Receiver<Option<Arc<PortfolioSnapshot>>>;

pub struct SnapshotPublisher {
    store: Arc<PortfolioStore>,
    interval: Duration,
    snapshot_tx: watch::Sender<Option<Arc<PortfolioSnapshot>>>,
    metrics: Arc<MetricsCollector>,
}

impl SnapshotPublisher {
    pub fn new(
        store: Arc<PortfolioStore>,
        interval: Duration,
        metrics: Arc<MetricsCollector>,
    ) -> (Self, SnapshotReceiver) {
        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        (
            Self {
                store,
                interval,
                snapshot_tx,
                metrics,
            },
            snapshot_rx,
        )
    }

    /// Publishes a fresh snapshot every tick until shutdown. A slow consumer
    /// only ever delays itself; it sees the newest value on its next borrow.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut was_healthy = true;
        info!(
            interval_ms = self.interval.as_millis() as u64,
            "snapshot publisher started"
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = Arc::new(self.store.snapshot());
                    if snapshot.healthy != was_healthy {
                        if snapshot.healthy {
                            info!(sequence = snapshot.sequence, "feed health restored");
                        } else {
                            warn!(sequence = snapshot.sequence, "feed health degraded");
                        }
                        was_healthy = snapshot.healthy;
                    }
                    self.metrics.record_snapshot(
                        snapshot.sequence,
                        snapshot.positions.len(),
                        snapshot.orders.len(),
                    );
                    debug!(
                        sequence = snapshot.sequence,
                        positions = snapshot.positions.len(),
                        orders = snapshot.orders.len(),
                        healthy = snapshot.healthy,
                        "snapshot published"
                    );
                    let _ = self.snapshot_tx.send(Some(snapshot));
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("snapshot publisher stopped");
    }
}
