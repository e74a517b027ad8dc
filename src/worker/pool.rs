//! OCR Worker Pool (C7): each worker is a single-flight processor —
//! parallelism comes from running N worker processes, not N tasks per
//! process (spec.md §4.7 concurrency floor).

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::bus::{EventBus, TaskUpdateEvent, TASK_UPDATES_TOPIC};
use crate::capabilities::{CapabilityError, OcrCapability};
use crate::db::TasksRepository;
use crate::domain::{OcrResult, TaskStatus};
use crate::ids::{ResultId, TaskId, UserId};
use crate::metrics::MetricsRegistry;
use crate::queue::RedisWorkQueue;
use crate::store::{keys, ObjectStore};

/// §4.7 step 7: "if under limit (e.g., 3)".
const MAX_ATTEMPTS: i32 = 3;

pub struct WorkerLoop {
    queue: Arc<RedisWorkQueue>,
    db: Arc<dyn TasksRepository>,
    store: Arc<dyn ObjectStore>,
    bus: Arc<dyn EventBus>,
    ocr: Arc<dyn OcrCapability>,
    metrics: Arc<MetricsRegistry>,
}

impl WorkerLoop {
    pub fn new(
        queue: Arc<RedisWorkQueue>,
        db: Arc<dyn TasksRepository>,
        store: Arc<dyn ObjectStore>,
        bus: Arc<dyn EventBus>,
        ocr: Arc<dyn OcrCapability>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self { queue, db, store, bus, ocr, metrics }
    }

    /// Runs forever, `blocking_pop`-ing tasks until `shutdown` resolves.
    pub async fn run(&self, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        loop {
            if shutdown.try_recv().is_ok() {
                return;
            }

            match self.queue.blocking_pop(Duration::from_secs(5)).await {
                Ok(Some(task_id)) => self.process_one(task_id).await,
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, "blocking_pop failed, backing off");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        }
    }

    #[instrument(skip(self))]
    async fn process_one(&self, task_id: TaskId) {
        // Step 2: load Task. A worker that pops a task_id it cannot find
        // in the metadata store treats the message as spurious and drops
        // it (§4.6 ordering invariant).
        let task = match self.db.get_task(task_id).await {
            Ok(t) => t,
            Err(e) => {
                warn!(%task_id, error = %e, "dropping spurious task_id not present in metadata store");
                self.acknowledge(task_id).await;
                return;
            }
        };

        if task.status != TaskStatus::Queued {
            info!(%task_id, status = ?task.status, "task already picked up or terminal, dropping");
            self.acknowledge(task_id).await;
            return;
        }

        // Step 3: CAS queued -> processing.
        let won = match self.db.cas_to_processing(task_id).await {
            Ok(won) => won,
            Err(e) => {
                warn!(%task_id, error = %e, "cas_to_processing failed");
                return;
            }
        };
        if !won {
            info!(%task_id, "lost the CAS race, dropping");
            self.acknowledge(task_id).await;
            return;
        }

        // Step 4: publish processing.
        self.publish_status(task_id, task.owner_id, TaskStatus::Processing, None).await;

        let start = Instant::now();

        // Step 5: download original, invoke OCR.
        let file = match self.db.get_file(task.file_id).await {
            Ok(f) => f,
            Err(e) => {
                self.fail_or_retry(task_id, task.owner_id, task.attempt_count, &format!("file lookup failed: {e}"))
                    .await;
                return;
            }
        };

        let bytes = match self.store.get(&file.object_key).await {
            Ok(b) => b,
            Err(e) => {
                self.fail_or_retry(task_id, task.owner_id, task.attempt_count, &format!("original download failed: {e}"))
                    .await;
                return;
            }
        };

        let output = match self.ocr.run(&bytes, &file.mime_type, &task.processing_config).await {
            Ok(out) => out,
            Err(CapabilityError::Transient(msg)) => {
                self.fail_or_retry(task_id, task.owner_id, task.attempt_count, &msg).await;
                return;
            }
            Err(e) => {
                self.fail_task(task_id, task.owner_id, &e.to_string()).await;
                return;
            }
        };

        // Step 6: write result bytes under results/….
        let result_key = keys::result_key(&task.owner_id.to_string(), task_id, "html");
        if let Err(e) = self.store.put(&result_key, output.html.clone().into_bytes(), "text/html", None).await {
            self.fail_or_retry(task_id, task.owner_id, task.attempt_count, &format!("result upload failed: {e}"))
                .await;
            return;
        }

        let result = OcrResult {
            id: ResultId::new(),
            task_id,
            result_object_key: result_key,
            page_count: output.page_count,
            word_count: output.word_count,
            confidence_score: output.confidence,
            processing_time_ms: start.elapsed().as_millis() as i64,
            created_at: Utc::now(),
        };

        // Step 7: Result insert + Task completed, in one transaction.
        if let Err(e) = self.db.complete_task(task_id, &result).await {
            self.fail_or_retry(task_id, task.owner_id, task.attempt_count, &format!("result commit failed: {e}"))
                .await;
            return;
        }

        self.acknowledge(task_id).await;
        self.metrics.tasks_completed_total.inc();
        self.metrics.task_processing_seconds.observe(start.elapsed().as_secs_f64());

        // Step 8: publish completed.
        self.publish_status(task_id, task.owner_id, TaskStatus::Completed, None).await;
    }

    /// Retryable-class failure handling for §4.7 step 7: bump the
    /// attempt counter, and either republish to the queue tail or fail
    /// the task outright once the retry budget is exhausted.
    async fn fail_or_retry(&self, task_id: TaskId, owner_id: UserId, attempt_count: i32, message: &str) {
        if attempt_count + 1 >= MAX_ATTEMPTS {
            self.fail_task(task_id, owner_id, message).await;
            return;
        }

        match self.db.requeue_for_retry(task_id).await {
            Ok(_) => {
                self.acknowledge(task_id).await;
                if let Err(e) = self.queue.push(task_id).await {
                    warn!(%task_id, error = %e, "failed to republish retried task to queue tail");
                }
                self.metrics.tasks_requeued_total.inc();
                self.publish_status(task_id, owner_id, TaskStatus::Queued, None).await;
            }
            Err(e) => {
                warn!(%task_id, error = %e, "requeue_for_retry failed, falling back to fail_task");
                self.fail_task(task_id, owner_id, message).await;
            }
        }
    }

    async fn fail_task(&self, task_id: TaskId, owner_id: UserId, message: &str) {
        if let Err(e) = self.db.fail_task(task_id, message).await {
            warn!(%task_id, error = %e, "fail_task write failed");
        }
        self.acknowledge(task_id).await;
        self.metrics.tasks_failed_total.inc();
        self.publish_status(task_id, owner_id, TaskStatus::Failed, Some(message.to_string())).await;
    }

    async fn publish_status(&self, task_id: TaskId, owner_id: UserId, status: TaskStatus, error_message: Option<String>) {
        let event = TaskUpdateEvent::StatusChanged {
            event_id: Uuid::new_v4(),
            task_id,
            owner_id,
            status,
            error_message,
            at: Utc::now(),
        };
        match serde_json::to_string(&event) {
            Ok(payload) => {
                if let Err(e) = self.bus.publish(TASK_UPDATES_TOPIC, &payload).await {
                    self.metrics.bus_publish_errors_total.inc();
                    warn!(%task_id, error = %e, "failed to publish task.updates event");
                } else {
                    self.metrics.bus_publish_total.inc();
                }
            }
            Err(e) => warn!(%task_id, error = %e, "failed to encode task.updates event"),
        }
    }

    async fn acknowledge(&self, task_id: TaskId) {
        if let Err(e) = self.queue.acknowledge(task_id).await {
            warn!(%task_id, error = %e, "failed to acknowledge task on the processing list");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::MAX_ATTEMPTS;

    #[test]
    fn retry_budget_matches_spec() {
        assert_eq!(MAX_ATTEMPTS, 3);
    }
}
