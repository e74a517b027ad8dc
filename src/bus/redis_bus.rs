//! Redis Pub/Sub implementation of [`EventBus`].

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tracing::instrument;

use super::event_bus::{BusError, EventBus};

pub struct RedisEventBus {
    client: redis::Client,
}

impl RedisEventBus {
    pub fn connect(url: &str) -> Result<Self, BusError> {
        let client = redis::Client::open(url).map_err(|e| BusError::Unavailable(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    #[instrument(skip(self, payload))]
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BusError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))?;

        redis::cmd("PUBLISH")
            .arg(topic)
            .arg(payload)
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn subscribe(&self, topic: &str) -> Result<BoxStream<'static, String>, BusError> {
        let pubsub_conn = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))?;

        let mut pubsub = pubsub_conn;
        pubsub
            .subscribe(topic)
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))?;

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move { msg.get_payload::<String>().ok() });

        Ok(stream.boxed())
    }
}
