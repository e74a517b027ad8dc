//! Typed event families for the two bus topics (§4.4, §9 redesign
//! guidance: tagged variants per event family, never untyped JSON maps).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::TaskStatus;
use crate::ids::{TaskId, UserId};

pub const TASK_UPDATES_TOPIC: &str = "task.updates";
pub const DB_CHANGES_TOPIC: &str = "db.changes";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TaskUpdateEvent {
    #[serde(rename = "status_changed")]
    StatusChanged {
        event_id: Uuid,
        task_id: TaskId,
        owner_id: UserId,
        status: TaskStatus,
        error_message: Option<String>,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DbChangeEvent {
    #[serde(rename = "row_changed")]
    RowChanged {
        event_id: Uuid,
        table: String,
        operation: String,
        record_id: String,
        owner_id: UserId,
        summary: serde_json::Value,
        at: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_update_round_trips_through_json() {
        let event = TaskUpdateEvent::StatusChanged {
            event_id: Uuid::new_v4(),
            task_id: TaskId::new(),
            owner_id: UserId::new(),
            status: TaskStatus::Completed,
            error_message: None,
            at: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"status_changed\""));
        let back: TaskUpdateEvent = serde_json::from_str(&json).unwrap();
        let TaskUpdateEvent::StatusChanged { status, .. } = back;
        assert_eq!(status, TaskStatus::Completed);
    }
}
