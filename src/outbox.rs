use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::capabilities::{DeliveryClient, KeyValueStore, KvError, KvKey};
use crate::model::AlertPayload;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("storage error: {0}")]
    Storage(#[from] KvError),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub attempted: usize,
    pub delivered: usize,
    pub retained: usize,
    /// Alerts enqueued while the pass was running; kept for the next pass.
    pub arrived_during_drain: usize,
}

/// Durable FIFO of undelivered alerts, persisted as one JSON array under a
/// single key.
///
/// Every operation reads the whole slot, works on the in-memory copy and writes
/// the whole slot back. `io_lock` makes each read-modify-write atomic with
/// respect to the others; `drain_lock` keeps drain passes from overlapping.
pub struct AlertQueue {
    store: Arc<dyn KeyValueStore>,
    key: KvKey,
    io_lock: Mutex<()>,
    drain_lock: Mutex<()>,
}

impl AlertQueue {
    pub fn new(store: Arc<dyn KeyValueStore>, key: KvKey) -> Self {
        Self {
            store,
            key,
            io_lock: Mutex::new(()),
            drain_lock: Mutex::new(()),
        }
    }

    pub fn key(&self) -> &KvKey {
        &self.key
    }

    /// Absent or unparseable content reads as an empty queue. Only a failing
    /// store is an error, so callers never overwrite data they could not read.
    async fn load(&self) -> Result<Vec<AlertPayload>, QueueError> {
        let Some(raw) = self.store.get(&self.key).await? else {
            return Ok(Vec::new());
        };

        let values: Vec<serde_json::Value> = match serde_json::from_str(&raw) {
            Ok(values) => values,
            Err(e) => {
                warn!(key = %self.key.as_str(), error = %e, "persisted queue is corrupt, treating as empty");
                return Ok(Vec::new());
            }
        };

        let total = values.len();
        let items: Vec<AlertPayload> = values
            .into_iter()
            .filter_map(|value| match serde_json::from_value(value) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(error = %e, "dropping malformed queued alert");
                    None
                }
            })
            .collect();

        if items.len() != total {
            warn!(
                kept = items.len(),
                dropped = total - items.len(),
                "persisted queue had malformed entries"
            );
        }
        Ok(items)
    }

    async fn persist(&self, items: &[AlertPayload]) -> Result<(), QueueError> {
        let raw =
            serde_json::to_string(items).map_err(|e| QueueError::Serialization(e.to_string()))?;
        self.store.set(&self.key, raw).await?;
        Ok(())
    }

    /// Appends one alert. Returns the new queue length.
    #[instrument(skip(self, payload), fields(source = %payload.source()))]
    pub async fn enqueue(&self, payload: AlertPayload) -> Result<usize, QueueError> {
        let _io = self.io_lock.lock().await;
        let mut items = self.load().await?;
        items.push(payload);
        self.persist(&items).await?;
        info!(queued = items.len(), "alert queued");
        Ok(items.len())
    }

    /// Snapshot of the queued alerts in send order.
    pub async fn pending(&self) -> Result<Vec<AlertPayload>, QueueError> {
        let _io = self.io_lock.lock().await;
        self.load().await
    }

    pub async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.pending().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.pending().await?.is_empty())
    }

    /// Drops every queued alert.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<(), QueueError> {
        let _drain = self.drain_lock.lock().await;
        let _io = self.io_lock.lock().await;
        self.store.remove(&self.key).await?;
        info!("alert queue cleared");
        Ok(())
    }

    /// Attempts every alert present when the pass starts, in FIFO order, and
    /// keeps the ones that failed in their original relative order. Alerts
    /// enqueued mid-pass are not attempted; they are appended behind the
    /// retained ones at write-back. Nothing is written until the pass ends.
    #[instrument(skip(self, client))]
    pub async fn drain(&self, client: &dyn DeliveryClient) -> Result<DrainReport, QueueError> {
        let _drain = self.drain_lock.lock().await;

        let snapshot = {
            let _io = self.io_lock.lock().await;
            self.load().await?
        };
        if snapshot.is_empty() {
            return Ok(DrainReport::default());
        }

        let mut retained = Vec::new();
        for item in &snapshot {
            if let Err(e) = client.send(item).await {
                warn!(
                    source = %item.source(),
                    timestamp = %item.timestamp(),
                    error = %e,
                    "failed to send queued alert, keeping it for the next reconnect"
                );
                retained.push(item.clone());
            }
        }

        let _io = self.io_lock.lock().await;
        let current = self.load().await?;
        let arrivals = arrivals_since(&snapshot, current);

        let report = DrainReport {
            attempted: snapshot.len(),
            delivered: snapshot.len() - retained.len(),
            retained: retained.len(),
            arrived_during_drain: arrivals.len(),
        };

        retained.extend(arrivals);
        self.persist(&retained).await?;

        info!(
            attempted = report.attempted,
            delivered = report.delivered,
            retained = report.retained,
            arrived = report.arrived_during_drain,
            "queue drain finished"
        );
        Ok(report)
    }
}

/// Entries of `current` that were not part of the drained `snapshot`.
fn arrivals_since(snapshot: &[AlertPayload], current: Vec<AlertPayload>) -> Vec<AlertPayload> {
    if current.len() >= snapshot.len() && current[..snapshot.len()] == *snapshot {
        return current[snapshot.len()..].to_vec();
    }
    warn!("queue was modified outside the drain, merging by content");
    current
        .into_iter()
        .filter(|item| !snapshot.contains(item))
        .collect()
}
