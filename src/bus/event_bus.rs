//! The pub/sub bus trait (C4). Subscribers receive events in publish
//! order per topic; no ordering is guaranteed across topics (§4.4).

use async_trait::async_trait;
use futures_util::stream::BoxStream;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bus unavailable: {0}")]
    Unavailable(String),

    #[error("malformed event payload: {0}")]
    MalformedPayload(String),
}

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BusError>;

    async fn subscribe(&self, topic: &str) -> Result<BoxStream<'static, String>, BusError>;
}
