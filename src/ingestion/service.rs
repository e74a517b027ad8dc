//! Ingestion Service (C6): validates an upload, persists its File+Task
//! metadata, writes the original bytes to the object store, and enqueues
//! the task for the worker pool. Implements spec.md §4.6's five steps.

use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{instrument, warn};

use crate::capabilities::CreditCheckCapability;
use crate::config::AppConfig;
use crate::db::{MetaError, TasksRepository};
use crate::domain::{File as FileEntity, ProcessingConfig, Task, TaskStatus};
use crate::ids::{FileId, FolderId, TaskId, UserId};
use crate::metrics::MetricsRegistry;
use crate::queue::WorkQueue;
use crate::store::{keys, ObjectStore};

const ALLOWED_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "image/png",
    "image/jpeg",
    "image/tiff",
    "image/webp",
];

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("object store error: {0}")]
    StorageError(String),

    #[error("metadata store error: {0}")]
    MetadataError(String),

    #[error("service overloaded")]
    ServiceOverloaded,
}

impl From<MetaError> for IngestError {
    fn from(e: MetaError) -> Self {
        match e {
            MetaError::Conflict(msg) => IngestError::Conflict(msg),
            other => IngestError::MetadataError(other.to_string()),
        }
    }
}

/// Queue depth above which new uploads are rejected with
/// `ServiceOverloaded` rather than piling onto an already-backed-up
/// worker pool (§5 Backpressure).
const HIGH_WATER_MARK: u64 = 10_000;

pub struct IngestionService {
    db: Arc<dyn TasksRepository>,
    store: Arc<dyn ObjectStore>,
    queue: Arc<dyn WorkQueue>,
    credit_check: Arc<dyn CreditCheckCapability>,
    metrics: Arc<MetricsRegistry>,
    max_upload_bytes: u64,
}

impl IngestionService {
    pub fn new(
        db: Arc<dyn TasksRepository>,
        store: Arc<dyn ObjectStore>,
        queue: Arc<dyn WorkQueue>,
        credit_check: Arc<dyn CreditCheckCapability>,
        metrics: Arc<MetricsRegistry>,
        config: &AppConfig,
    ) -> Self {
        Self {
            db,
            store,
            queue,
            credit_check,
            metrics,
            max_upload_bytes: config.max_upload_bytes,
        }
    }

    #[instrument(skip(self, file_bytes, filename))]
    pub async fn upload(
        &self,
        owner_id: UserId,
        file_bytes: Vec<u8>,
        filename: &str,
        mime: &str,
        processing_config: ProcessingConfig,
        folder_id: Option<FolderId>,
        idempotency_key: Option<String>,
    ) -> Result<TaskId, IngestError> {
        if let Some(key) = idempotency_key.as_deref() {
            if let Some(existing) = self.db.find_by_idempotency_key(owner_id, key).await? {
                return Ok(existing);
            }
        }

        if !ALLOWED_MIME_TYPES.contains(&mime) {
            return Err(IngestError::ValidationFailed(format!("unsupported mime type: {mime}")));
        }
        if file_bytes.len() as u64 > self.max_upload_bytes {
            return Err(IngestError::ValidationFailed(format!(
                "file exceeds the {}-byte upload cap",
                self.max_upload_bytes
            )));
        }
        let approved = self
            .credit_check
            .check(owner_id)
            .await
            .map_err(|e| IngestError::ValidationFailed(e.to_string()))?;
        if !approved {
            return Err(IngestError::ValidationFailed("insufficient credit balance".into()));
        }

        let depth = self.queue.depth().await.unwrap_or(0);
        if depth > HIGH_WATER_MARK {
            return Err(IngestError::ServiceOverloaded);
        }

        // Step 1: content hash.
        let content_hash = format!("{:x}", Sha256::digest(&file_bytes));

        // Step 2: allocate ids and the object key they'll be stored under.
        let file_id = FileId::new();
        let task_id = TaskId::new();
        let created_at = Utc::now();
        let object_key = keys::upload_key(&owner_id.to_string(), created_at, file_id, filename);

        let file = FileEntity {
            id: file_id,
            owner_id,
            filename: filename.to_string(),
            mime_type: mime.to_string(),
            size_bytes: file_bytes.len() as i64,
            content_hash,
            object_key: object_key.clone(),
            created_at,
        };

        let task = Task {
            id: task_id,
            owner_id,
            file_id,
            folder_id,
            status: TaskStatus::Queued,
            error_message: None,
            attempt_count: 0,
            processing_config,
            idempotency_key,
            created_at,
            updated_at: created_at,
        };

        // Step 3: File + Task in one transaction.
        self.db.insert_file_and_task(&file, &task).await?;

        // Step 4: write the original bytes; a failure here is compensated
        // by failing the task outright rather than leaving it queued
        // against an object that was never written.
        if let Err(e) = self.store.put(&object_key, file_bytes, mime, None).await {
            warn!(error = %e, %task_id, "object store write failed, marking task failed");
            self.db.mark_failed_on_conflict(task_id).await?;
            return Err(IngestError::StorageError(e.to_string()));
        }

        // Step 5: enqueue. A soft failure here is tolerated — the task
        // stays `queued` in the metadata store and the stuck-queued
        // reaper sweep will re-enqueue it.
        if let Err(e) = self.queue.push(task_id).await {
            warn!(error = %e, %task_id, "queue push failed, leaving task for the reaper to recover");
        }

        self.metrics.tasks_ingested_total.inc();
        Ok(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::AlwaysAllowCreditCheck;
    use crate::domain::{OcrResult, ProcessingMode};
    use crate::queue::QueueError;
    use crate::store::{LifecycleRule, ObjectMetadata, StoreError};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FakeTasksRepo {
        inserted: Mutex<Vec<(FileEntity, Task)>>,
    }

    #[async_trait]
    impl TasksRepository for FakeTasksRepo {
        async fn insert_file_and_task(&self, file: &FileEntity, task: &Task) -> Result<(), MetaError> {
            self.inserted.lock().unwrap().push((file.clone(), task.clone()));
            Ok(())
        }
        async fn find_by_idempotency_key(&self, owner_id: UserId, key: &str) -> Result<Option<TaskId>, MetaError> {
            Ok(self
                .inserted
                .lock()
                .unwrap()
                .iter()
                .find(|(_, t)| t.owner_id == owner_id && t.idempotency_key.as_deref() == Some(key))
                .map(|(_, t)| t.id))
        }
        async fn get_task(&self, _id: TaskId) -> Result<Task, MetaError> {
            unimplemented!()
        }
        async fn get_file(&self, _id: FileId) -> Result<FileEntity, MetaError> {
            unimplemented!()
        }
        async fn list_tasks(&self, _owner_id: UserId) -> Result<Vec<Task>, MetaError> {
            unimplemented!()
        }
        async fn list_stuck_queued(&self, _older_than: chrono::DateTime<Utc>) -> Result<Vec<TaskId>, MetaError> {
            unimplemented!()
        }
        async fn list_stuck_processing(&self, _older_than: chrono::DateTime<Utc>) -> Result<Vec<TaskId>, MetaError> {
            unimplemented!()
        }
        async fn cas_to_processing(&self, _task_id: TaskId) -> Result<bool, MetaError> {
            unimplemented!()
        }
        async fn complete_task(&self, _task_id: TaskId, _result: &OcrResult) -> Result<(), MetaError> {
            unimplemented!()
        }
        async fn fail_task(&self, _task_id: TaskId, _error_message: &str) -> Result<(), MetaError> {
            Ok(())
        }
        async fn requeue_for_retry(&self, _task_id: TaskId) -> Result<i32, MetaError> {
            unimplemented!()
        }
        async fn mark_failed_on_conflict(&self, _task_id: TaskId) -> Result<(), MetaError> {
            Ok(())
        }
        async fn delete_task_cascade(&self, _task_id: TaskId) -> Result<(FileEntity, Option<OcrResult>), MetaError> {
            unimplemented!()
        }
    }

    struct FakeStore {
        fail_put: bool,
    }

    #[async_trait]
    impl ObjectStore for FakeStore {
        async fn put(&self, _key: &str, _bytes: Vec<u8>, _content_type: &str, _hint: Option<&str>) -> Result<String, StoreError> {
            if self.fail_put {
                Err(StoreError::ObjectStoreUnavailable("down".into()))
            } else {
                Ok("etag".into())
            }
        }
        async fn get(&self, _key: &str) -> Result<Vec<u8>, StoreError> {
            unimplemented!()
        }
        async fn head(&self, _key: &str) -> Result<ObjectMetadata, StoreError> {
            unimplemented!()
        }
        async fn presign_get(&self, _key: &str, _ttl: Duration) -> Result<String, StoreError> {
            unimplemented!()
        }
        async fn presign_put(&self, _key: &str, _ttl: Duration, _content_type: &str) -> Result<String, StoreError> {
            unimplemented!()
        }
        async fn tag(&self, _key: &str, _tags: &[(String, String)]) -> Result<(), StoreError> {
            unimplemented!()
        }
        async fn untag(&self, _key: &str, _tag_names: &[String]) -> Result<(), StoreError> {
            unimplemented!()
        }
        async fn declare_lifecycle(&self, _rules: &[LifecycleRule]) -> Result<(), StoreError> {
            unimplemented!()
        }
    }

    struct FakeQueue {
        pushed: Mutex<Vec<TaskId>>,
    }

    #[async_trait]
    impl WorkQueue for FakeQueue {
        async fn push(&self, task_id: TaskId) -> Result<(), QueueError> {
            self.pushed.lock().unwrap().push(task_id);
            Ok(())
        }
        async fn blocking_pop(&self, _timeout: Duration) -> Result<Option<TaskId>, QueueError> {
            unimplemented!()
        }
        async fn depth(&self) -> Result<u64, QueueError> {
            Ok(0)
        }
    }

    fn processing_config() -> ProcessingConfig {
        ProcessingConfig { modes: vec![ProcessingMode::Text], field_selectors: HashMap::new() }
    }

    #[tokio::test]
    async fn happy_upload_enqueues_task() {
        let db = Arc::new(FakeTasksRepo { inserted: Mutex::new(Vec::new()) });
        let store = Arc::new(FakeStore { fail_put: false });
        let queue = Arc::new(FakeQueue { pushed: Mutex::new(Vec::new()) });
        let svc = IngestionService::new(
            db.clone(),
            store,
            queue.clone(),
            Arc::new(AlwaysAllowCreditCheck),
            Arc::new(MetricsRegistry::new()),
            &AppConfig::default(),
        );

        let task_id = svc
            .upload(UserId::new(), b"hello".to_vec(), "invoice.pdf", "application/pdf", processing_config(), None, None)
            .await
            .unwrap();

        assert_eq!(queue.pushed.lock().unwrap()[0], task_id);
        assert_eq!(db.inserted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn oversize_upload_is_rejected_before_any_write() {
        let db = Arc::new(FakeTasksRepo { inserted: Mutex::new(Vec::new()) });
        let store = Arc::new(FakeStore { fail_put: false });
        let queue = Arc::new(FakeQueue { pushed: Mutex::new(Vec::new()) });
        let mut cfg = AppConfig::default();
        cfg.max_upload_bytes = 4;
        let svc = IngestionService::new(
            db.clone(),
            store,
            queue,
            Arc::new(AlwaysAllowCreditCheck),
            Arc::new(MetricsRegistry::new()),
            &cfg,
        );

        let err = svc
            .upload(UserId::new(), b"hello".to_vec(), "invoice.pdf", "application/pdf", processing_config(), None, None)
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::ValidationFailed(_)));
        assert!(db.inserted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unsupported_mime_type_is_rejected() {
        let db = Arc::new(FakeTasksRepo { inserted: Mutex::new(Vec::new()) });
        let store = Arc::new(FakeStore { fail_put: false });
        let queue = Arc::new(FakeQueue { pushed: Mutex::new(Vec::new()) });
        let svc = IngestionService::new(
            db,
            store,
            queue,
            Arc::new(AlwaysAllowCreditCheck),
            Arc::new(MetricsRegistry::new()),
            &AppConfig::default(),
        );

        let err = svc
            .upload(UserId::new(), b"hello".to_vec(), "archive.zip", "application/zip", processing_config(), None, None)
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn object_store_failure_marks_task_failed_and_never_enqueues() {
        let db = Arc::new(FakeTasksRepo { inserted: Mutex::new(Vec::new()) });
        let store = Arc::new(FakeStore { fail_put: true });
        let queue = Arc::new(FakeQueue { pushed: Mutex::new(Vec::new()) });
        let svc = IngestionService::new(
            db.clone(),
            store,
            queue.clone(),
            Arc::new(AlwaysAllowCreditCheck),
            Arc::new(MetricsRegistry::new()),
            &AppConfig::default(),
        );

        let err = svc
            .upload(UserId::new(), b"hello".to_vec(), "invoice.pdf", "application/pdf", processing_config(), None, None)
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::StorageError(_)));
        assert!(queue.pushed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn replayed_idempotency_key_returns_existing_task_without_reingesting() {
        let db = Arc::new(FakeTasksRepo { inserted: Mutex::new(Vec::new()) });
        let store = Arc::new(FakeStore { fail_put: false });
        let queue = Arc::new(FakeQueue { pushed: Mutex::new(Vec::new()) });
        let svc = IngestionService::new(
            db.clone(),
            store,
            queue.clone(),
            Arc::new(AlwaysAllowCreditCheck),
            Arc::new(MetricsRegistry::new()),
            &AppConfig::default(),
        );
        let owner_id = UserId::new();

        let first = svc
            .upload(
                owner_id,
                b"hello".to_vec(),
                "invoice.pdf",
                "application/pdf",
                processing_config(),
                None,
                Some("retry-key-1".into()),
            )
            .await
            .unwrap();

        let second = svc
            .upload(
                owner_id,
                b"hello again, same upload replayed".to_vec(),
                "invoice.pdf",
                "application/pdf",
                processing_config(),
                None,
                Some("retry-key-1".into()),
            )
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(db.inserted.lock().unwrap().len(), 1);
        assert_eq!(queue.pushed.lock().unwrap().len(), 1);
    }
}
