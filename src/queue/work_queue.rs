//! The work queue trait (C3): a single logical FIFO `ocr:tasks` with
//! blocking pop and at-least-once delivery (spec.md §4.3).

use std::time::Duration;

use async_trait::async_trait;

use crate::ids::TaskId;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn push(&self, task_id: TaskId) -> Result<(), QueueError>;

    async fn blocking_pop(&self, timeout: Duration) -> Result<Option<TaskId>, QueueError>;

    async fn depth(&self) -> Result<u64, QueueError>;
}
