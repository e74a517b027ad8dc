//! DB Change Capture (C5): a dedicated `LISTEN docflow_changes`
//! connection that republishes each payload onto the `db.changes` bus
//! topic. Reconnects with capped exponential backoff on transport loss;
//! no backlog replay and no gap marker on reconnect, per spec.md §4.5 —
//! consumers must treat `db.changes` as hint-only.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use sqlx::postgres::PgListener;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::bus::{DbChangeEvent, EventBus, DB_CHANGES_TOPIC};
use crate::db::change_feed::CHANNEL;
use crate::ids::UserId;
use crate::metrics::MetricsRegistry;

#[derive(Debug, thiserror::Error)]
pub enum ChangeCaptureError {
    #[error("metadata store unavailable: {0}")]
    Database(#[from] sqlx::Error),

    #[error("bus unavailable: {0}")]
    Bus(String),
}

#[derive(Debug, Deserialize)]
struct RawChangeNotification {
    table: String,
    operation: String,
    record_id: String,
    owner_id: String,
    summary: serde_json::Value,
}

pub struct ChangeCapture {
    metadata_url: String,
    bus: Arc<dyn EventBus>,
    metrics: Arc<MetricsRegistry>,
}

impl ChangeCapture {
    pub fn new(metadata_url: String, bus: Arc<dyn EventBus>, metrics: Arc<MetricsRegistry>) -> Self {
        Self { metadata_url, bus, metrics }
    }

    /// Runs until `shutdown` resolves. Reconnects indefinitely with
    /// capped exponential backoff; callers that want a bounded run
    /// should race this against their own timeout.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: tokio::sync::oneshot::Receiver<()>) -> Result<(), ChangeCaptureError> {
        let mut backoff_ms: u64 = 200;

        loop {
            if shutdown.try_recv().is_ok() {
                return Ok(());
            }

            match self.listen_until_error(&mut shutdown).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    self.metrics.cdc_reconnects_total.inc();
                    warn!(error = %e, backoff_ms, "change capture listener lost connection, reconnecting");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = (backoff_ms * 2).min(30_000);
                }
            }
        }
    }

    async fn listen_until_error(
        &self,
        shutdown: &mut tokio::sync::oneshot::Receiver<()>,
    ) -> Result<(), ChangeCaptureError> {
        let mut listener = PgListener::connect(&self.metadata_url).await?;
        listener.listen(CHANNEL).await?;
        info!("change capture listening on {CHANNEL}");

        loop {
            tokio::select! {
                _ = &mut *shutdown => return Ok(()),
                notification = listener.recv() => {
                    let notification = notification?;
                    self.handle_payload(notification.payload()).await;
                }
            }
        }
    }

    async fn handle_payload(&self, payload: &str) {
        self.metrics.cdc_notifications_total.inc();

        let raw: RawChangeNotification = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "dropping malformed change notification");
                return;
            }
        };

        let owner_id: Uuid = match raw.owner_id.parse() {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "dropping change notification with malformed owner_id");
                return;
            }
        };

        let event = DbChangeEvent::RowChanged {
            event_id: Uuid::new_v4(),
            table: raw.table,
            operation: raw.operation,
            record_id: raw.record_id,
            owner_id: UserId::from(owner_id),
            summary: raw.summary,
            at: Utc::now(),
        };

        let encoded = match serde_json::to_string(&event) {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "failed to encode db.changes event");
                return;
            }
        };

        if let Err(e) = self.bus.publish(DB_CHANGES_TOPIC, &encoded).await {
            error!(error = %e, "failed to publish db.changes event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_notification_deserializes_change_feed_shape() {
        let payload = r#"{"table":"tasks","operation":"update","record_id":"t1","owner_id":"u1","summary":{"status":"completed"}}"#;
        let raw: RawChangeNotification = serde_json::from_str(payload).unwrap();
        assert_eq!(raw.table, "tasks");
        assert_eq!(raw.operation, "update");
    }
}
