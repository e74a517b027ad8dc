//! Redis-backed [`WorkQueue`] using `BRPOPLPUSH ocr:tasks
//! ocr:tasks:processing` for at-least-once delivery: a popped task_id
//! lands in the processing list until a worker acknowledges it by
//! removing it (see [`RedisWorkQueue::acknowledge`]); anything left
//! there past the visibility timeout is reclaimed by
//! [`RedisWorkQueue::reclaim_stuck`], which the stuck-task reaper (C12)
//! polls.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{instrument, warn};
use uuid::Uuid;

use super::work_queue::{QueueError, WorkQueue};
use crate::ids::TaskId;

pub const QUEUE_KEY: &str = "ocr:tasks";
pub const PROCESSING_KEY: &str = "ocr:tasks:processing";
/// Hash of `task_id -> unix seconds entered processing`, maintained
/// alongside `PROCESSING_KEY` so [`RedisWorkQueue::reclaim_stuck`] can
/// tell how long an entry has sat there; a plain Redis list carries no
/// per-element metadata of its own.
pub const PROCESSING_ENTERED_AT_KEY: &str = "ocr:tasks:processing:entered_at";

pub struct RedisWorkQueue {
    conn: ConnectionManager,
}

impl RedisWorkQueue {
    pub async fn connect(url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(url).map_err(|e| QueueError::Unavailable(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;
        Ok(Self { conn })
    }

    /// Removes `task_id` from the processing list once the worker has
    /// durably recorded its result (§4.7 step 7-8). Not part of the
    /// `WorkQueue` trait because acknowledgement is specific to the
    /// visibility-timeout delivery scheme, not to queueing in general.
    #[instrument(skip(self))]
    pub async fn acknowledge(&self, task_id: TaskId) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let key = task_id.0.to_string();
        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &key).await.map_err(|e| QueueError::Unavailable(e.to_string()))?;
        conn.hdel::<_, _, ()>(PROCESSING_ENTERED_AT_KEY, &key)
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))
    }

    /// Scans the processing list for entries older than `older_than` and
    /// moves each back onto `ocr:tasks` — the visibility-timeout
    /// reclaim the stuck-task reaper (C12) drives on an interval. A task
    /// whose worker died before calling `acknowledge` (or before even
    /// reaching the DB's `cas_to_processing`) would otherwise sit in
    /// `ocr:tasks:processing` forever, since nothing else ever removes it.
    #[instrument(skip(self))]
    pub async fn reclaim_stuck(&self, older_than: Duration) -> Result<Vec<TaskId>, QueueError> {
        let mut conn = self.conn.clone();
        let now = now_unix_secs();
        let cutoff = now.saturating_sub(older_than.as_secs());

        let entered_at: Vec<(String, u64)> = conn
            .hgetall(PROCESSING_ENTERED_AT_KEY)
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;

        let mut reclaimed = Vec::new();
        for (raw_id, entered) in entered_at {
            if entered > cutoff {
                continue;
            }
            let task_id = match Uuid::parse_str(&raw_id) {
                Ok(id) => TaskId::from(id),
                Err(e) => {
                    warn!(error = %e, raw_id, "dropping malformed task id found in the processing list");
                    conn.hdel::<_, _, ()>(PROCESSING_ENTERED_AT_KEY, &raw_id)
                        .await
                        .map_err(|e| QueueError::Unavailable(e.to_string()))?;
                    continue;
                }
            };

            conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &raw_id).await.map_err(|e| QueueError::Unavailable(e.to_string()))?;
            conn.hdel::<_, _, ()>(PROCESSING_ENTERED_AT_KEY, &raw_id)
                .await
                .map_err(|e| QueueError::Unavailable(e.to_string()))?;
            conn.lpush::<_, _, ()>(QUEUE_KEY, &raw_id).await.map_err(|e| QueueError::Unavailable(e.to_string()))?;
            reclaimed.push(task_id);
        }

        Ok(reclaimed)
    }
}

fn now_unix_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[async_trait]
impl WorkQueue for RedisWorkQueue {
    #[instrument(skip(self))]
    async fn push(&self, task_id: TaskId) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(QUEUE_KEY, task_id.0.to_string())
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))
    }

    #[instrument(skip(self))]
    async fn blocking_pop(&self, timeout: Duration) -> Result<Option<TaskId>, QueueError> {
        let mut conn = self.conn.clone();
        let result: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(QUEUE_KEY)
            .arg(PROCESSING_KEY)
            .arg(timeout.as_secs_f64().max(1.0) as usize)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;

        match result {
            None => Ok(None),
            Some(raw) => {
                let task_id = Uuid::parse_str(&raw)
                    .map(TaskId::from)
                    .map_err(|e| QueueError::Unavailable(format!("malformed task id on queue: {e}")))?;
                conn.hset::<_, _, _, ()>(PROCESSING_ENTERED_AT_KEY, &raw, now_unix_secs())
                    .await
                    .map_err(|e| QueueError::Unavailable(e.to_string()))?;
                Ok(Some(task_id))
            }
        }
    }

    #[instrument(skip(self))]
    async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn.clone();
        conn.llen(QUEUE_KEY)
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))
    }
}
