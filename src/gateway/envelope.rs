//! Wire envelope for every message sent to a websocket client (§4.8):
//! `{type: task_update|db_change|pong|welcome, data, timestamp}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayEnvelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    TaskUpdate,
    DbChange,
    Pong,
    Welcome,
}

impl GatewayEnvelope {
    pub fn welcome() -> Self {
        Self { kind: EnvelopeKind::Welcome, data: Value::Null, timestamp: Utc::now() }
    }

    pub fn pong() -> Self {
        Self { kind: EnvelopeKind::Pong, data: Value::Null, timestamp: Utc::now() }
    }

    pub fn task_update(data: Value) -> Self {
        Self { kind: EnvelopeKind::TaskUpdate, data, timestamp: Utc::now() }
    }

    pub fn db_change(data: Value) -> Self {
        Self { kind: EnvelopeKind::DbChange, data, timestamp: Utc::now() }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("envelope serialization is infallible")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_tags_type_as_snake_case() {
        let json = GatewayEnvelope::welcome().to_json();
        assert!(json.contains("\"type\":\"welcome\""));
    }
}
