//! Realtime Gateway (C8): fans `task.updates` and `db.changes` bus events
//! out to the connected websocket client(s) for the event's owner (§4.8).

pub mod envelope;
pub mod registry;
pub mod session;

pub use envelope::{EnvelopeKind, GatewayEnvelope};
pub use registry::ConnectionRegistry;
pub use session::{Deliver, GatewaySession};

use std::sync::Arc;

use futures_util::StreamExt;
use tracing::warn;

use crate::bus::{DbChangeEvent, EventBus, TaskUpdateEvent, DB_CHANGES_TOPIC, TASK_UPDATES_TOPIC};

/// Subscribes to both bus topics and forwards every event to its owner's
/// open channels. Each topic gets its own subscription loop; the two run
/// concurrently and never block each other, matching §4.4's "no ordering
/// guaranteed across topics".
pub async fn run_fanout(bus: Arc<dyn EventBus>, registry: Arc<ConnectionRegistry>) {
    let task_updates = {
        let bus = bus.clone();
        let registry = registry.clone();
        tokio::spawn(async move { fanout_task_updates(bus, registry).await })
    };
    let db_changes = tokio::spawn(async move { fanout_db_changes(bus, registry).await });

    let _ = tokio::join!(task_updates, db_changes);
}

async fn fanout_task_updates(bus: Arc<dyn EventBus>, registry: Arc<ConnectionRegistry>) {
    let mut stream = match bus.subscribe(TASK_UPDATES_TOPIC).await {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to subscribe to task.updates, fanout disabled");
            return;
        }
    };

    while let Some(payload) = stream.next().await {
        let event: TaskUpdateEvent = match serde_json::from_str(&payload) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "dropping malformed task.updates payload");
                continue;
            }
        };
        let TaskUpdateEvent::StatusChanged { owner_id, .. } = &event;
        let data = serde_json::to_value(&event).unwrap_or(serde_json::Value::Null);
        registry.broadcast(*owner_id, GatewayEnvelope::task_update(data));
    }
}

async fn fanout_db_changes(bus: Arc<dyn EventBus>, registry: Arc<ConnectionRegistry>) {
    let mut stream = match bus.subscribe(DB_CHANGES_TOPIC).await {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to subscribe to db.changes, fanout disabled");
            return;
        }
    };

    while let Some(payload) = stream.next().await {
        let event: DbChangeEvent = match serde_json::from_str(&payload) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "dropping malformed db.changes payload");
                continue;
            }
        };
        let DbChangeEvent::RowChanged { owner_id, .. } = &event;
        let data = serde_json::to_value(&event).unwrap_or(serde_json::Value::Null);
        registry.broadcast(*owner_id, GatewayEnvelope::db_change(data));
    }
}
