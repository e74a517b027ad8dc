//! `DownloadService` (C9): authorized access to the original upload, the
//! OCR result, the editor preview, and per-page images — grounded on the
//! teacher's resource-acquisition idiom but retargeted onto pre-signed
//! redirects and streamed bodies instead of in-process buffers.

use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;

use crate::db::{MetaError, TasksRepository, VersionsRepository};
use crate::domain::{TaskStatus, VersionContent};
use crate::error::AppError;
use crate::ids::{TaskId, UserId};
use crate::permissions::PermissionService;
use crate::store::ObjectStore;

/// §4.1: "`presign_get` defaults to 1-hour TTL".
const PRESIGN_TTL: Duration = Duration::from_secs(3600);

pub enum Download {
    Redirect(String),
    Stream { bytes: Vec<u8>, content_type: &'static str },
}

pub struct DownloadService {
    db: Arc<dyn TasksRepository>,
    versions: Arc<dyn VersionsRepository>,
    store: Arc<dyn ObjectStore>,
    permissions: Arc<PermissionService>,
}

impl DownloadService {
    pub fn new(
        db: Arc<dyn TasksRepository>,
        versions: Arc<dyn VersionsRepository>,
        store: Arc<dyn ObjectStore>,
        permissions: Arc<PermissionService>,
    ) -> Self {
        Self { db, versions, store, permissions }
    }

    async fn authorize(&self, caller: UserId, task_id: TaskId) -> Result<(), AppError> {
        let allowed = self
            .permissions
            .check(caller, task_id)
            .await
            .map_err(|e| AppError::MetadataError(e.to_string()))?;
        if !allowed {
            return Err(AppError::Forbidden(format!("{caller} may not access task {task_id}")));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn original(&self, caller: UserId, task_id: TaskId) -> Result<Download, AppError> {
        self.authorize(caller, task_id).await?;
        let task = self.db.get_task(task_id).await.map_err(to_app_error)?;
        let file = self.db.get_file(task.file_id).await.map_err(to_app_error)?;
        let url = self
            .store
            .presign_get(&file.object_key, PRESIGN_TTL)
            .await
            .map_err(|e| AppError::StorageError(e.to_string()))?;
        Ok(Download::Redirect(url))
    }

    /// §4.9: result access is only valid once the task is `completed`.
    #[instrument(skip(self))]
    pub async fn result(&self, caller: UserId, task_id: TaskId) -> Result<Download, AppError> {
        self.authorize(caller, task_id).await?;
        let task = self.db.get_task(task_id).await.map_err(to_app_error)?;
        if task.status != TaskStatus::Completed {
            return Err(AppError::Conflict(format!("task {task_id} has no completed result")));
        }
        let result_key = crate::store::keys::result_key(&task.owner_id.to_string(), task_id, "html");
        let url = self
            .store
            .presign_get(&result_key, PRESIGN_TTL)
            .await
            .map_err(|e| AppError::StorageError(e.to_string()))?;
        Ok(Download::Redirect(url))
    }

    /// Streams the latest editor HTML, falling back to the original
    /// version whenever the latest row is flagged corrupted by the
    /// version engine's read algorithm.
    #[instrument(skip(self))]
    pub async fn preview(&self, caller: UserId, task_id: TaskId) -> Result<Download, AppError> {
        self.authorize(caller, task_id).await?;
        let latest = self.versions.get_latest(task_id).await.map_err(to_app_error)?;
        let bytes = self.resolve_content(&latest.content).await?;
        Ok(Download::Stream { bytes, content_type: "text/html" })
    }

    /// §4.9: thumbnail/preview of page `n`, if one was generated at OCR
    /// time. Page images aren't modeled as their own entity, so this
    /// reaches directly into the deterministic object key the worker
    /// wrote them under.
    #[instrument(skip(self))]
    pub async fn page_image(&self, caller: UserId, task_id: TaskId, page: u32) -> Result<Download, AppError> {
        self.authorize(caller, task_id).await?;
        let task = self.db.get_task(task_id).await.map_err(to_app_error)?;
        let key = format!("results/{}/{}/pages/{page}.png", task.owner_id, task_id);
        let url = self
            .store
            .presign_get(&key, PRESIGN_TTL)
            .await
            .map_err(|e| AppError::StorageError(e.to_string()))?;
        Ok(Download::Redirect(url))
    }

    async fn resolve_content(&self, content: &VersionContent) -> Result<Vec<u8>, AppError> {
        match content {
            VersionContent::Inline(bytes) => Ok(bytes.clone()),
            VersionContent::ObjectKey(key) => {
                self.store.get(key).await.map_err(|e| AppError::StorageError(e.to_string()))
            }
        }
    }
}

fn to_app_error(e: MetaError) -> AppError {
    match e {
        MetaError::NotFound(what) => AppError::NotFound(what),
        MetaError::Conflict(what) => AppError::Conflict(what),
        other => AppError::MetadataError(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::db::{PermissionsRepository, TasksRepository};
    use crate::domain::{DocumentVersion, EditPermission, File, OcrResult, ProcessingConfig, Task};
    use crate::ids::{FileId, PermissionId, VersionId};
    use crate::metrics::MetricsRegistry;
    use crate::store::{LifecycleRule, ObjectMetadata, StoreError};
    use chrono::Utc;

    struct FakeTasks {
        task: Task,
        file: File,
    }

    #[async_trait]
    impl TasksRepository for FakeTasks {
        async fn insert_file_and_task(&self, _: &File, _: &Task) -> Result<(), MetaError> {
            unimplemented!()
        }
        async fn find_by_idempotency_key(&self, _: UserId, _: &str) -> Result<Option<TaskId>, MetaError> {
            unimplemented!()
        }
        async fn get_task(&self, id: TaskId) -> Result<Task, MetaError> {
            if id == self.task.id {
                Ok(self.task.clone())
            } else {
                Err(MetaError::NotFound("task".into()))
            }
        }
        async fn get_file(&self, _: FileId) -> Result<File, MetaError> {
            Ok(self.file.clone())
        }
        async fn list_tasks(&self, _: UserId) -> Result<Vec<Task>, MetaError> {
            unimplemented!()
        }
        async fn list_stuck_queued(&self, _: chrono::DateTime<Utc>) -> Result<Vec<TaskId>, MetaError> {
            unimplemented!()
        }
        async fn list_stuck_processing(&self, _: chrono::DateTime<Utc>) -> Result<Vec<TaskId>, MetaError> {
            unimplemented!()
        }
        async fn cas_to_processing(&self, _: TaskId) -> Result<bool, MetaError> {
            unimplemented!()
        }
        async fn complete_task(&self, _: TaskId, _: &OcrResult) -> Result<(), MetaError> {
            unimplemented!()
        }
        async fn fail_task(&self, _: TaskId, _: &str) -> Result<(), MetaError> {
            unimplemented!()
        }
        async fn requeue_for_retry(&self, _: TaskId) -> Result<i32, MetaError> {
            unimplemented!()
        }
        async fn mark_failed_on_conflict(&self, _: TaskId) -> Result<(), MetaError> {
            unimplemented!()
        }
        async fn delete_task_cascade(&self, _: TaskId) -> Result<(File, Option<OcrResult>), MetaError> {
            unimplemented!()
        }
    }

    #[derive(Default)]
    struct FakePermissions;

    #[async_trait]
    impl PermissionsRepository for FakePermissions {
        async fn grant(&self, _: &EditPermission) -> Result<(), MetaError> {
            unimplemented!()
        }
        async fn revoke(&self, _: PermissionId, _: &str) -> Result<(), MetaError> {
            unimplemented!()
        }
        async fn active_permission(&self, _: UserId, _: TaskId) -> Result<Option<EditPermission>, MetaError> {
            Ok(None)
        }
    }

    struct FakeVersions {
        latest: DocumentVersion,
    }

    #[async_trait]
    impl VersionsRepository for FakeVersions {
        async fn get_latest(&self, _: TaskId) -> Result<DocumentVersion, MetaError> {
            Ok(self.latest.clone())
        }
        async fn list_versions(&self, _: TaskId) -> Result<Vec<DocumentVersion>, MetaError> {
            unimplemented!()
        }
        async fn get_original(&self, _: TaskId) -> Result<DocumentVersion, MetaError> {
            unimplemented!()
        }
        async fn insert_snapshot(&self, _: &DocumentVersion) -> Result<(), MetaError> {
            unimplemented!()
        }
        async fn overwrite_latest(
            &self,
            _: VersionId,
            _: &VersionContent,
            _: &str,
            _: i32,
            _: i32,
            _: chrono::DateTime<Utc>,
        ) -> Result<(), MetaError> {
            unimplemented!()
        }
    }

    struct FakeStore;

    #[async_trait]
    impl ObjectStore for FakeStore {
        async fn put(&self, _: &str, _: Vec<u8>, _: &str, _: Option<&str>) -> Result<String, StoreError> {
            unimplemented!()
        }
        async fn get(&self, _: &str) -> Result<Vec<u8>, StoreError> {
            unimplemented!()
        }
        async fn head(&self, _: &str) -> Result<ObjectMetadata, StoreError> {
            unimplemented!()
        }
        async fn presign_get(&self, key: &str, _: Duration) -> Result<String, StoreError> {
            Ok(format!("https://example.com/{key}?sig=x"))
        }
        async fn presign_put(&self, _: &str, _: Duration, _: &str) -> Result<String, StoreError> {
            unimplemented!()
        }
        async fn tag(&self, _: &str, _: &[(String, String)]) -> Result<(), StoreError> {
            unimplemented!()
        }
        async fn untag(&self, _: &str, _: &[String]) -> Result<(), StoreError> {
            unimplemented!()
        }
        async fn declare_lifecycle(&self, _: &[LifecycleRule]) -> Result<(), StoreError> {
            unimplemented!()
        }
    }

    fn build(task_status: TaskStatus) -> (DownloadService, UserId, TaskId) {
        let owner = UserId::new();
        let task = Task {
            id: TaskId::new(),
            owner_id: owner,
            file_id: FileId::new(),
            folder_id: None,
            status: task_status,
            error_message: None,
            attempt_count: 0,
            processing_config: ProcessingConfig { modes: vec![], field_selectors: HashMap::new() },
            idempotency_key: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let task_id = task.id;
        let file = File {
            id: task.file_id,
            owner_id: owner,
            filename: "invoice.pdf".into(),
            mime_type: "application/pdf".into(),
            size_bytes: 10,
            content_hash: "abc".into(),
            object_key: "uploads/x".into(),
            created_at: Utc::now(),
        };
        let latest = DocumentVersion {
            id: VersionId::new(),
            task_id,
            version_number: 1,
            is_latest: true,
            is_original: true,
            is_draft: false,
            content: VersionContent::Inline(b"<html></html>".to_vec()),
            content_checksum: "x".into(),
            character_count: 13,
            word_count: 1,
            edited_by: owner,
            edited_at: Utc::now(),
            session_id: None,
        };

        let db = Arc::new(FakeTasks { task, file });
        let versions = Arc::new(FakeVersions { latest });
        let store = Arc::new(FakeStore);
        let permissions_repo: Arc<dyn PermissionsRepository> = Arc::new(FakePermissions);
        let permissions = Arc::new(PermissionService::new(db.clone(), permissions_repo, Arc::new(MetricsRegistry::new())));

        (DownloadService::new(db, versions, store, permissions), owner, task_id)
    }

    #[tokio::test]
    async fn owner_gets_a_presigned_redirect_for_the_original() {
        let (service, owner, task_id) = build(TaskStatus::Completed);
        match service.original(owner, task_id).await.unwrap() {
            Download::Redirect(url) => assert!(url.contains("uploads/x")),
            _ => panic!("expected a redirect"),
        }
    }

    #[tokio::test]
    async fn result_is_refused_before_the_task_completes() {
        let (service, owner, task_id) = build(TaskStatus::Processing);
        let err = service.result(owner, task_id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn stranger_is_forbidden_from_the_preview() {
        let (service, _owner, task_id) = build(TaskStatus::Completed);
        let err = service.preview(UserId::new(), task_id).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn preview_streams_inline_version_content() {
        let (service, owner, task_id) = build(TaskStatus::Completed);
        match service.preview(owner, task_id).await.unwrap() {
            Download::Stream { bytes, content_type } => {
                assert_eq!(content_type, "text/html");
                assert_eq!(bytes, b"<html></html>");
            }
            _ => panic!("expected a stream"),
        }
    }
}
