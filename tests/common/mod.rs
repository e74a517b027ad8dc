//! Shared in-memory fakes for the cross-module scenario tests. One
//! `InMemoryMeta` backs every repository trait so a scenario can drive
//! `IngestionService`, `VersionEngine`, and `PermissionService` against
//! the same state, the way a single Postgres connection would.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, BoxStream};

use docflow_platform::bus::{BusError, EventBus};
use docflow_platform::db::{
    AuditRepository, MetaError, PermissionsRepository, SessionsRepository, TasksRepository, VersionsRepository,
};
use docflow_platform::domain::{
    AuditRecord, DocumentVersion, EditPermission, EditSession, File, OcrResult, Task,
};
use docflow_platform::ids::{FileId, PermissionId, SessionId, TaskId, UserId};
use docflow_platform::queue::{QueueError, WorkQueue};
use docflow_platform::store::{LifecycleRule, ObjectMetadata, ObjectStore, StoreError};

#[derive(Default)]
pub struct InMemoryMeta {
    pub tasks: Mutex<HashMap<TaskId, Task>>,
    pub files: Mutex<HashMap<FileId, File>>,
    pub results: Mutex<HashMap<TaskId, OcrResult>>,
    pub versions: Mutex<HashMap<TaskId, Vec<DocumentVersion>>>,
    pub sessions: Mutex<HashMap<SessionId, EditSession>>,
    pub permissions: Mutex<HashMap<PermissionId, EditPermission>>,
    pub audit: Mutex<Vec<AuditRecord>>,
}

#[async_trait]
impl TasksRepository for InMemoryMeta {
    async fn insert_file_and_task(&self, file: &File, task: &Task) -> Result<(), MetaError> {
        self.files.lock().unwrap().insert(file.id, file.clone());
        self.tasks.lock().unwrap().insert(task.id, task.clone());
        Ok(())
    }

    async fn find_by_idempotency_key(&self, owner_id: UserId, key: &str) -> Result<Option<TaskId>, MetaError> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .values()
            .find(|t| t.owner_id == owner_id && t.idempotency_key.as_deref() == Some(key))
            .map(|t| t.id))
    }

    async fn get_task(&self, id: TaskId) -> Result<Task, MetaError> {
        self.tasks.lock().unwrap().get(&id).cloned().ok_or_else(|| MetaError::NotFound("task".into()))
    }

    async fn get_file(&self, id: FileId) -> Result<File, MetaError> {
        self.files.lock().unwrap().get(&id).cloned().ok_or_else(|| MetaError::NotFound("file".into()))
    }

    async fn list_tasks(&self, owner_id: UserId) -> Result<Vec<Task>, MetaError> {
        Ok(self.tasks.lock().unwrap().values().filter(|t| t.owner_id == owner_id).cloned().collect())
    }

    async fn list_stuck_queued(&self, _older_than: DateTime<Utc>) -> Result<Vec<TaskId>, MetaError> {
        unimplemented!("not exercised by the scenario tests")
    }

    async fn list_stuck_processing(&self, older_than: DateTime<Utc>) -> Result<Vec<TaskId>, MetaError> {
        use docflow_platform::domain::TaskStatus;
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.status == TaskStatus::Processing && t.updated_at < older_than)
            .map(|t| t.id)
            .collect())
    }

    async fn cas_to_processing(&self, task_id: TaskId) -> Result<bool, MetaError> {
        use docflow_platform::domain::TaskStatus;
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks.get_mut(&task_id).ok_or_else(|| MetaError::NotFound("task".into()))?;
        if task.status == TaskStatus::Queued {
            task.status = TaskStatus::Processing;
            task.updated_at = Utc::now();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn complete_task(&self, task_id: TaskId, result: &OcrResult) -> Result<(), MetaError> {
        use docflow_platform::domain::TaskStatus;
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks.get_mut(&task_id).ok_or_else(|| MetaError::NotFound("task".into()))?;
        task.status = TaskStatus::Completed;
        task.updated_at = Utc::now();
        self.results.lock().unwrap().insert(task_id, result.clone());
        Ok(())
    }

    async fn fail_task(&self, task_id: TaskId, error_message: &str) -> Result<(), MetaError> {
        use docflow_platform::domain::TaskStatus;
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks.get_mut(&task_id).ok_or_else(|| MetaError::NotFound("task".into()))?;
        task.status = TaskStatus::Failed;
        task.error_message = Some(error_message.to_string());
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn requeue_for_retry(&self, task_id: TaskId) -> Result<i32, MetaError> {
        use docflow_platform::domain::TaskStatus;
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks.get_mut(&task_id).ok_or_else(|| MetaError::NotFound("task".into()))?;
        task.status = TaskStatus::Queued;
        task.attempt_count += 1;
        task.updated_at = Utc::now();
        Ok(task.attempt_count)
    }

    async fn mark_failed_on_conflict(&self, task_id: TaskId) -> Result<(), MetaError> {
        self.fail_task(task_id, "conflict").await
    }

    async fn delete_task_cascade(&self, task_id: TaskId) -> Result<(File, Option<OcrResult>), MetaError> {
        let task = self.tasks.lock().unwrap().remove(&task_id).ok_or_else(|| MetaError::NotFound("task".into()))?;
        let file = self.files.lock().unwrap().get(&task.file_id).cloned().ok_or_else(|| MetaError::NotFound("file".into()))?;
        let result = self.results.lock().unwrap().remove(&task_id);
        Ok((file, result))
    }
}

#[async_trait]
impl VersionsRepository for InMemoryMeta {
    async fn get_latest(&self, task_id: TaskId) -> Result<DocumentVersion, MetaError> {
        self.versions
            .lock()
            .unwrap()
            .get(&task_id)
            .and_then(|vs| vs.iter().find(|v| v.is_latest).cloned())
            .ok_or_else(|| MetaError::NotFound("latest version".into()))
    }

    async fn list_versions(&self, task_id: TaskId) -> Result<Vec<DocumentVersion>, MetaError> {
        Ok(self.versions.lock().unwrap().get(&task_id).cloned().unwrap_or_default())
    }

    async fn get_original(&self, task_id: TaskId) -> Result<DocumentVersion, MetaError> {
        self.versions
            .lock()
            .unwrap()
            .get(&task_id)
            .and_then(|vs| vs.iter().find(|v| v.is_original).cloned())
            .ok_or_else(|| MetaError::NotFound("original version".into()))
    }

    async fn insert_snapshot(&self, version: &DocumentVersion) -> Result<(), MetaError> {
        let mut all = self.versions.lock().unwrap();
        let rows = all.entry(version.task_id).or_default();
        for row in rows.iter_mut() {
            row.is_latest = false;
        }
        rows.push(version.clone());
        Ok(())
    }

    async fn overwrite_latest(
        &self,
        version_id: docflow_platform::ids::VersionId,
        content: &docflow_platform::domain::VersionContent,
        content_checksum: &str,
        character_count: i32,
        word_count: i32,
        edited_at: DateTime<Utc>,
    ) -> Result<(), MetaError> {
        let mut all = self.versions.lock().unwrap();
        for rows in all.values_mut() {
            if let Some(row) = rows.iter_mut().find(|v| v.id == version_id) {
                row.content = clone_content(content);
                row.content_checksum = content_checksum.to_string();
                row.character_count = character_count;
                row.word_count = word_count;
                row.edited_at = edited_at;
                return Ok(());
            }
        }
        Err(MetaError::NotFound("version".into()))
    }
}

fn clone_content(content: &docflow_platform::domain::VersionContent) -> docflow_platform::domain::VersionContent {
    use docflow_platform::domain::VersionContent::*;
    match content {
        Inline(bytes) => Inline(bytes.clone()),
        ObjectKey(key) => ObjectKey(key.clone()),
    }
}

#[async_trait]
impl SessionsRepository for InMemoryMeta {
    async fn get_active_session(&self, user_id: UserId, task_id: TaskId) -> Result<Option<EditSession>, MetaError> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .values()
            .find(|s| s.user_id == user_id && s.task_id == task_id && s.ended_at.is_none())
            .cloned())
    }

    async fn get_session(&self, id: SessionId) -> Result<EditSession, MetaError> {
        self.sessions.lock().unwrap().get(&id).cloned().ok_or_else(|| MetaError::NotFound("session".into()))
    }

    async fn start_session(&self, session: &EditSession) -> Result<(), MetaError> {
        self.sessions.lock().unwrap().insert(session.id, session.clone());
        Ok(())
    }

    async fn end_session(
        &self,
        id: SessionId,
        ended_at: DateTime<Utc>,
        published_version_id: Option<docflow_platform::ids::VersionId>,
    ) -> Result<(), MetaError> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(&id).ok_or_else(|| MetaError::NotFound("session".into()))?;
        session.ended_at = Some(ended_at);
        if published_version_id.is_some() {
            session.published_version_id = published_version_id;
        }
        Ok(())
    }

    async fn touch_session(&self, id: SessionId, versions_created_delta: i32) -> Result<(), MetaError> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(&id).ok_or_else(|| MetaError::NotFound("session".into()))?;
        session.last_activity_at = Utc::now();
        session.versions_created += versions_created_delta;
        Ok(())
    }

    async fn list_idle_sessions(&self, idle_since: DateTime<Utc>) -> Result<Vec<SessionId>, MetaError> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.ended_at.is_none() && s.last_activity_at < idle_since)
            .map(|s| s.id)
            .collect())
    }
}

#[async_trait]
impl PermissionsRepository for InMemoryMeta {
    async fn grant(&self, permission: &EditPermission) -> Result<(), MetaError> {
        self.permissions.lock().unwrap().insert(permission.id, permission.clone());
        Ok(())
    }

    async fn revoke(&self, permission_id: PermissionId, reason: &str) -> Result<(), MetaError> {
        let mut permissions = self.permissions.lock().unwrap();
        let permission = permissions.get_mut(&permission_id).ok_or_else(|| MetaError::NotFound("permission".into()))?;
        permission.is_active = false;
        permission.revoked_at = Some(Utc::now());
        permission.revoked_reason = Some(reason.to_string());
        Ok(())
    }

    async fn active_permission(&self, user_id: UserId, task_id: TaskId) -> Result<Option<EditPermission>, MetaError> {
        let now = Utc::now();
        Ok(self
            .permissions
            .lock()
            .unwrap()
            .values()
            .find(|p| p.user_id == user_id && p.task_id == task_id && p.is_currently_valid(now))
            .cloned())
    }
}

#[async_trait]
impl AuditRepository for InMemoryMeta {
    async fn record(&self, entry: &AuditRecord) -> Result<(), MetaError> {
        self.audit.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn for_task(&self, task_id: TaskId) -> Result<Vec<AuditRecord>, MetaError> {
        Ok(self.audit.lock().unwrap().iter().filter(|r| r.task_id == task_id).cloned().collect())
    }
}

/// In-memory object store recording every tag/untag/put call so a
/// scenario can assert on the soft-delete lifecycle contract without a
/// live S3 bucket.
#[derive(Default)]
pub struct FakeObjectStore {
    pub objects: Mutex<HashMap<String, Vec<u8>>>,
    pub tags: Mutex<HashMap<String, Vec<(String, String)>>>,
    pub declared_rules: Mutex<Vec<LifecycleRule>>,
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str, _encryption_key_hint: Option<&str>) -> Result<String, StoreError> {
        self.objects.lock().unwrap().insert(key.to_string(), bytes);
        Ok(format!("etag-{key}"))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.objects.lock().unwrap().get(key).cloned().ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn head(&self, key: &str) -> Result<ObjectMetadata, StoreError> {
        let objects = self.objects.lock().unwrap();
        let bytes = objects.get(key).ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        Ok(ObjectMetadata {
            content_type: "application/octet-stream".into(),
            size_bytes: bytes.len() as i64,
            tags: self.tags.lock().unwrap().get(key).cloned().unwrap_or_default(),
            last_modified: Utc::now(),
        })
    }

    async fn presign_get(&self, key: &str, _ttl: Duration) -> Result<String, StoreError> {
        Ok(format!("https://example.invalid/{key}"))
    }

    async fn presign_put(&self, key: &str, _ttl: Duration, _content_type: &str) -> Result<String, StoreError> {
        Ok(format!("https://example.invalid/{key}"))
    }

    async fn tag(&self, key: &str, tags: &[(String, String)]) -> Result<(), StoreError> {
        self.tags.lock().unwrap().entry(key.to_string()).or_default().extend(tags.iter().cloned());
        Ok(())
    }

    async fn untag(&self, key: &str, tag_names: &[String]) -> Result<(), StoreError> {
        if let Some(existing) = self.tags.lock().unwrap().get_mut(key) {
            existing.retain(|(name, _)| !tag_names.contains(name));
        }
        Ok(())
    }

    async fn declare_lifecycle(&self, rules: &[LifecycleRule]) -> Result<(), StoreError> {
        *self.declared_rules.lock().unwrap() = rules.to_vec();
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeQueue {
    pub pending: Mutex<Vec<TaskId>>,
}

#[async_trait]
impl WorkQueue for FakeQueue {
    async fn push(&self, task_id: TaskId) -> Result<(), QueueError> {
        self.pending.lock().unwrap().push(task_id);
        Ok(())
    }

    async fn blocking_pop(&self, _timeout: Duration) -> Result<Option<TaskId>, QueueError> {
        Ok(self.pending.lock().unwrap().pop())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        Ok(self.pending.lock().unwrap().len() as u64)
    }
}

#[derive(Default)]
pub struct FakeBus {
    pub published: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl EventBus for FakeBus {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BusError> {
        self.published.lock().unwrap().push((topic.to_string(), payload.to_string()));
        Ok(())
    }

    async fn subscribe(&self, _topic: &str) -> Result<BoxStream<'static, String>, BusError> {
        Ok(Box::pin(stream::empty()))
    }
}
