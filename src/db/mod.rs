//! The metadata store (C2): a `sqlx::PgPool` behind narrow per-aggregate
//! repository traits, grounded on the teacher's `Manager { config, state,
//! metrics }` shape — here the "state" is the pool itself, already an
//! `Arc`-backed handle, so there's no extra `Arc<RwLock<_>>` to add.
//! Cross-entity writes that must be atomic run inside one
//! `sqlx::Transaction` and emit a change notification (`change_feed`) in
//! the same transaction as the write they describe.

pub mod change_feed;
pub mod models;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::domain::*;
use crate::ids::*;
use change_feed::{notify, ChangeNotification};
use models::*;

#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("malformed processing_config: {0}")]
    MalformedConfig(#[from] serde_json::Error),
}

fn row_not_found(e: sqlx::Error, what: &str) -> MetaError {
    match e {
        sqlx::Error::RowNotFound => MetaError::NotFound(what.to_string()),
        other => MetaError::Database(other),
    }
}

pub struct PgMetadataStore {
    pool: PgPool,
}

impl PgMetadataStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
pub trait UsersRepository: Send + Sync {
    async fn get_user(&self, id: UserId) -> Result<User, MetaError>;
}

#[async_trait]
impl UsersRepository for PgMetadataStore {
    async fn get_user(&self, id: UserId) -> Result<User, MetaError> {
        sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map(User::from)
            .map_err(|e| row_not_found(e, "user"))
    }
}

#[async_trait]
pub trait FoldersRepository: Send + Sync {
    async fn create_folder(
        &self,
        owner_id: UserId,
        name: &str,
        color: Option<&str>,
        description: Option<&str>,
    ) -> Result<Folder, MetaError>;
    async fn list_folders(&self, owner_id: UserId) -> Result<Vec<Folder>, MetaError>;
    async fn get_folder(&self, id: FolderId) -> Result<Folder, MetaError>;
    async fn delete_folder(&self, id: FolderId) -> Result<(), MetaError>;
}

#[async_trait]
impl FoldersRepository for PgMetadataStore {
    async fn create_folder(
        &self,
        owner_id: UserId,
        name: &str,
        color: Option<&str>,
        description: Option<&str>,
    ) -> Result<Folder, MetaError> {
        let id = FolderId::new();
        let created_at = Utc::now();

        sqlx::query(
            "INSERT INTO folders (id, owner_id, name, color, description, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(id)
        .bind(owner_id)
        .bind(name)
        .bind(color)
        .bind(description)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(Folder {
            id,
            owner_id,
            name: name.to_string(),
            color: color.map(str::to_string),
            description: description.map(str::to_string),
            created_at,
        })
    }

    async fn list_folders(&self, owner_id: UserId) -> Result<Vec<Folder>, MetaError> {
        sqlx::query_as::<_, FolderRow>(
            "SELECT * FROM folders WHERE owner_id = $1 ORDER BY created_at DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map(|rows| rows.into_iter().map(Folder::from).collect())
        .map_err(MetaError::from)
    }

    async fn get_folder(&self, id: FolderId) -> Result<Folder, MetaError> {
        sqlx::query_as::<_, FolderRow>("SELECT * FROM folders WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map(Folder::from)
            .map_err(|e| row_not_found(e, "folder"))
    }

    async fn delete_folder(&self, id: FolderId) -> Result<(), MetaError> {
        sqlx::query("DELETE FROM folders WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
pub trait TasksRepository: Send + Sync {
    /// Steps 2-3 of the ingestion algorithm (§4.6): allocates File+Task
    /// rows in one transaction and notifies. Fails with `Conflict` on a
    /// unique-constraint clash.
    async fn insert_file_and_task(&self, file: &File, task: &Task) -> Result<(), MetaError>;

    /// Idempotency-key replay lookup (§4.6 supplement): `None` when the
    /// caller sent no key, or no task with that key exists yet for this
    /// owner.
    async fn find_by_idempotency_key(&self, owner_id: UserId, key: &str) -> Result<Option<TaskId>, MetaError>;

    async fn get_task(&self, id: TaskId) -> Result<Task, MetaError>;
    async fn get_file(&self, id: FileId) -> Result<File, MetaError>;
    async fn list_tasks(&self, owner_id: UserId) -> Result<Vec<Task>, MetaError>;
    async fn list_stuck_queued(&self, older_than: DateTime<Utc>) -> Result<Vec<TaskId>, MetaError>;
    async fn list_stuck_processing(&self, older_than: DateTime<Utc>) -> Result<Vec<TaskId>, MetaError>;

    /// CAS `queued -> processing`. Returns `true` iff this call performed
    /// the transition.
    async fn cas_to_processing(&self, task_id: TaskId) -> Result<bool, MetaError>;

    /// Transactional Result insert + Task.status=completed (§4.7 step 7).
    async fn complete_task(&self, task_id: TaskId, result: &OcrResult) -> Result<(), MetaError>;

    async fn fail_task(&self, task_id: TaskId, error_message: &str) -> Result<(), MetaError>;

    /// Retry path: increments the attempt counter and returns the task to
    /// `queued` so another pop can pick it up.
    async fn requeue_for_retry(&self, task_id: TaskId) -> Result<i32, MetaError>;

    async fn mark_failed_on_conflict(&self, task_id: TaskId) -> Result<(), MetaError>;

    async fn delete_task_cascade(&self, task_id: TaskId) -> Result<(File, Option<OcrResult>), MetaError>;
}

#[async_trait]
impl TasksRepository for PgMetadataStore {
    async fn insert_file_and_task(&self, file: &File, task: &Task) -> Result<(), MetaError> {
        let mut tx = self.pool.begin().await?;

        let insert_file = sqlx::query(
            "INSERT INTO files (id, owner_id, filename, mime_type, size_bytes, content_hash, object_key, created_at)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8)",
        )
        .bind(file.id)
        .bind(file.owner_id)
        .bind(&file.filename)
        .bind(&file.mime_type)
        .bind(file.size_bytes)
        .bind(&file.content_hash)
        .bind(&file.object_key)
        .bind(file.created_at)
        .execute(&mut *tx)
        .await;

        if let Err(sqlx::Error::Database(db_err)) = &insert_file {
            if db_err.is_unique_violation() {
                return Err(MetaError::Conflict("file or task already exists".into()));
            }
        }
        insert_file?;

        let config_json = serde_json::to_value(&task.processing_config)?;
        let insert_task = sqlx::query(
            "INSERT INTO tasks (id, owner_id, file_id, folder_id, status, error_message, attempt_count, processing_config, idempotency_key, created_at, updated_at)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)",
        )
        .bind(task.id)
        .bind(task.owner_id)
        .bind(task.file_id)
        .bind(task.folder_id)
        .bind(task.status)
        .bind(&task.error_message)
        .bind(task.attempt_count)
        .bind(config_json)
        .bind(&task.idempotency_key)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&mut *tx)
        .await;

        if let Err(sqlx::Error::Database(db_err)) = &insert_task {
            if db_err.is_unique_violation() {
                return Err(MetaError::Conflict("file or task already exists".into()));
            }
        }
        insert_task?;

        notify(
            &mut tx,
            &ChangeNotification {
                table: "tasks",
                operation: "insert",
                record_id: task.id.to_string(),
                owner_id: task.owner_id.to_string(),
                summary: serde_json::json!({"status": "queued"}),
            },
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_idempotency_key(&self, owner_id: UserId, key: &str) -> Result<Option<TaskId>, MetaError> {
        let row = sqlx::query("SELECT id FROM tasks WHERE owner_id = $1 AND idempotency_key = $2")
            .bind(owner_id)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<TaskId, _>("id")))
    }

    async fn get_task(&self, id: TaskId) -> Result<Task, MetaError> {
        let row = sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| row_not_found(e, "task"))?;
        Ok(row.try_into()?)
    }

    async fn get_file(&self, id: FileId) -> Result<File, MetaError> {
        sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map(File::from)
            .map_err(|e| row_not_found(e, "file"))
    }

    async fn list_tasks(&self, owner_id: UserId) -> Result<Vec<Task>, MetaError> {
        let rows = sqlx::query_as::<_, TaskRow>(
            "SELECT * FROM tasks WHERE owner_id = $1 ORDER BY created_at DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Task::try_from).collect::<Result<_, _>>().map_err(MetaError::from)
    }

    async fn list_stuck_queued(&self, older_than: DateTime<Utc>) -> Result<Vec<TaskId>, MetaError> {
        let rows = sqlx::query("SELECT id FROM tasks WHERE status = 'queued' AND created_at < $1")
            .bind(older_than)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.get::<TaskId, _>("id")).collect())
    }

    async fn list_stuck_processing(&self, older_than: DateTime<Utc>) -> Result<Vec<TaskId>, MetaError> {
        let rows =
            sqlx::query("SELECT id FROM tasks WHERE status = 'processing' AND updated_at < $1")
                .bind(older_than)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|r| r.get::<TaskId, _>("id")).collect())
    }

    async fn cas_to_processing(&self, task_id: TaskId) -> Result<bool, MetaError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE tasks SET status = 'processing', updated_at = $2
             WHERE id = $1 AND status = 'queued'",
        )
        .bind(task_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        let cas_succeeded = result.rows_affected() == 1;
        if cas_succeeded {
            let task = sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE id = $1")
                .bind(task_id)
                .fetch_one(&mut *tx)
                .await?;

            notify(
                &mut tx,
                &ChangeNotification {
                    table: "tasks",
                    operation: "update",
                    record_id: task_id.to_string(),
                    owner_id: task.owner_id.to_string(),
                    summary: serde_json::json!({"status": "processing"}),
                },
            )
            .await?;
        }

        tx.commit().await?;
        Ok(cas_succeeded)
    }

    async fn complete_task(&self, task_id: TaskId, result: &OcrResult) -> Result<(), MetaError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO results (id, task_id, result_object_key, page_count, word_count, confidence_score, processing_time_ms, created_at)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
             ON CONFLICT (task_id) DO UPDATE SET
                result_object_key = EXCLUDED.result_object_key,
                page_count = EXCLUDED.page_count,
                word_count = EXCLUDED.word_count,
                confidence_score = EXCLUDED.confidence_score,
                processing_time_ms = EXCLUDED.processing_time_ms,
                created_at = EXCLUDED.created_at",
        )
        .bind(result.id)
        .bind(result.task_id)
        .bind(&result.result_object_key)
        .bind(result.page_count)
        .bind(result.word_count)
        .bind(result.confidence_score)
        .bind(result.processing_time_ms)
        .bind(result.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE tasks SET status = 'completed', updated_at = $2 WHERE id = $1")
            .bind(task_id)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        let task = sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE id = $1")
            .bind(task_id)
            .fetch_one(&mut *tx)
            .await?;

        notify(
            &mut tx,
            &ChangeNotification {
                table: "tasks",
                operation: "update",
                record_id: task_id.to_string(),
                owner_id: task.owner_id.to_string(),
                summary: serde_json::json!({"status": "completed"}),
            },
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn fail_task(&self, task_id: TaskId, error_message: &str) -> Result<(), MetaError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE tasks SET status = 'failed', error_message = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(task_id)
        .bind(error_message)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        let task = sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE id = $1")
            .bind(task_id)
            .fetch_one(&mut *tx)
            .await?;

        notify(
            &mut tx,
            &ChangeNotification {
                table: "tasks",
                operation: "update",
                record_id: task_id.to_string(),
                owner_id: task.owner_id.to_string(),
                summary: serde_json::json!({"status": "failed", "error": error_message}),
            },
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn requeue_for_retry(&self, task_id: TaskId) -> Result<i32, MetaError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "UPDATE tasks SET status = 'queued', attempt_count = attempt_count + 1, updated_at = $2
             WHERE id = $1
             RETURNING attempt_count, owner_id",
        )
        .bind(task_id)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        let attempt_count: i32 = row.get("attempt_count");
        let owner_id: UserId = row.get("owner_id");

        notify(
            &mut tx,
            &ChangeNotification {
                table: "tasks",
                operation: "update",
                record_id: task_id.to_string(),
                owner_id: owner_id.to_string(),
                summary: serde_json::json!({"status": "queued", "attempt_count": attempt_count}),
            },
        )
        .await?;

        tx.commit().await?;
        Ok(attempt_count)
    }

    async fn mark_failed_on_conflict(&self, task_id: TaskId) -> Result<(), MetaError> {
        self.fail_task(task_id, "object store write failed").await
    }

    async fn delete_task_cascade(&self, task_id: TaskId) -> Result<(File, Option<OcrResult>), MetaError> {
        let mut tx = self.pool.begin().await?;

        let task = sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE id = $1")
            .bind(task_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| row_not_found(e, "task"))?;

        let file = sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE id = $1")
            .bind(task.file_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| row_not_found(e, "file"))?;

        let result_row = sqlx::query_as::<_, ResultRow>("SELECT * FROM results WHERE task_id = $1")
            .bind(task_id)
            .fetch_optional(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM document_versions WHERE task_id = $1")
            .bind(task_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM results WHERE task_id = $1")
            .bind(task_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(task_id)
            .execute(&mut *tx)
            .await?;

        notify(
            &mut tx,
            &ChangeNotification {
                table: "tasks",
                operation: "delete",
                record_id: task_id.to_string(),
                owner_id: task.owner_id.to_string(),
                summary: serde_json::json!({}),
            },
        )
        .await?;

        tx.commit().await?;

        Ok((File::from(file), result_row.map(OcrResult::from)))
    }
}

#[async_trait]
pub trait VersionsRepository: Send + Sync {
    async fn get_latest(&self, task_id: TaskId) -> Result<DocumentVersion, MetaError>;
    async fn list_versions(&self, task_id: TaskId) -> Result<Vec<DocumentVersion>, MetaError>;
    async fn get_original(&self, task_id: TaskId) -> Result<DocumentVersion, MetaError>;

    /// Writes a brand new row and flips `is_latest` under a per-task row
    /// lock, per §4.10 step 3-4 (the "snapshot" branch).
    async fn insert_snapshot(&self, version: &DocumentVersion) -> Result<(), MetaError>;

    /// Overwrites the current latest row's content/checksum in place
    /// (the "overwrite" branch of §4.10 step 3).
    async fn overwrite_latest(
        &self,
        version_id: VersionId,
        content: &VersionContent,
        content_checksum: &str,
        character_count: i32,
        word_count: i32,
        edited_at: DateTime<Utc>,
    ) -> Result<(), MetaError>;
}

#[async_trait]
impl VersionsRepository for PgMetadataStore {
    async fn get_latest(&self, task_id: TaskId) -> Result<DocumentVersion, MetaError> {
        sqlx::query_as::<_, VersionRow>(
            "SELECT * FROM document_versions WHERE task_id = $1 AND is_latest = true",
        )
        .bind(task_id)
        .fetch_one(&self.pool)
        .await
        .map(DocumentVersion::from)
        .map_err(|e| row_not_found(e, "latest version"))
    }

    async fn list_versions(&self, task_id: TaskId) -> Result<Vec<DocumentVersion>, MetaError> {
        sqlx::query_as::<_, VersionRow>(
            "SELECT * FROM document_versions WHERE task_id = $1 ORDER BY version_number ASC",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .map(|rows| rows.into_iter().map(DocumentVersion::from).collect())
        .map_err(MetaError::from)
    }

    async fn get_original(&self, task_id: TaskId) -> Result<DocumentVersion, MetaError> {
        sqlx::query_as::<_, VersionRow>(
            "SELECT * FROM document_versions WHERE task_id = $1 AND is_original = true",
        )
        .bind(task_id)
        .fetch_one(&self.pool)
        .await
        .map(DocumentVersion::from)
        .map_err(|e| row_not_found(e, "original version"))
    }

    async fn insert_snapshot(&self, version: &DocumentVersion) -> Result<(), MetaError> {
        let mut tx = self.pool.begin().await?;

        // Per-task row lock so the is_latest flip is race-free under
        // concurrent saves for the same task (§5 "protected by a
        // per-task row lock within the save transaction").
        sqlx::query("SELECT id FROM tasks WHERE id = $1 FOR UPDATE")
            .bind(version.task_id)
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query("UPDATE document_versions SET is_latest = false WHERE task_id = $1 AND is_latest = true")
            .bind(version.task_id)
            .execute(&mut *tx)
            .await?;

        let (inline, object_key) = match &version.content {
            VersionContent::Inline(bytes) => (Some(bytes.clone()), None),
            VersionContent::ObjectKey(key) => (None, Some(key.clone())),
        };

        sqlx::query(
            "INSERT INTO document_versions
                (id, task_id, version_number, is_latest, is_original, is_draft,
                 content_inline, content_object_key, content_checksum,
                 character_count, word_count, edited_by, edited_at, session_id)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)",
        )
        .bind(version.id)
        .bind(version.task_id)
        .bind(version.version_number)
        .bind(version.is_latest)
        .bind(version.is_original)
        .bind(version.is_draft)
        .bind(inline)
        .bind(object_key)
        .bind(&version.content_checksum)
        .bind(version.character_count)
        .bind(version.word_count)
        .bind(version.edited_by)
        .bind(version.edited_at)
        .bind(version.session_id)
        .execute(&mut *tx)
        .await?;

        let task = sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE id = $1")
            .bind(version.task_id)
            .fetch_one(&mut *tx)
            .await?;

        notify(
            &mut tx,
            &ChangeNotification {
                table: "document_versions",
                operation: "insert",
                record_id: version.id.to_string(),
                owner_id: task.owner_id.to_string(),
                summary: serde_json::json!({"version_number": version.version_number}),
            },
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn overwrite_latest(
        &self,
        version_id: VersionId,
        content: &VersionContent,
        content_checksum: &str,
        character_count: i32,
        word_count: i32,
        edited_at: DateTime<Utc>,
    ) -> Result<(), MetaError> {
        let (inline, object_key) = match content {
            VersionContent::Inline(bytes) => (Some(bytes.clone()), None),
            VersionContent::ObjectKey(key) => (None, Some(key.clone())),
        };

        sqlx::query(
            "UPDATE document_versions SET
                content_inline = $2, content_object_key = $3, content_checksum = $4,
                character_count = $5, word_count = $6, edited_at = $7
             WHERE id = $1",
        )
        .bind(version_id)
        .bind(inline)
        .bind(object_key)
        .bind(content_checksum)
        .bind(character_count)
        .bind(word_count)
        .bind(edited_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
pub trait SessionsRepository: Send + Sync {
    async fn get_active_session(&self, user_id: UserId, task_id: TaskId) -> Result<Option<EditSession>, MetaError>;
    async fn get_session(&self, id: SessionId) -> Result<EditSession, MetaError>;
    async fn start_session(&self, session: &EditSession) -> Result<(), MetaError>;
    async fn end_session(
        &self,
        id: SessionId,
        ended_at: DateTime<Utc>,
        published_version_id: Option<VersionId>,
    ) -> Result<(), MetaError>;
    async fn touch_session(&self, id: SessionId, versions_created_delta: i32) -> Result<(), MetaError>;
    async fn list_idle_sessions(&self, idle_since: DateTime<Utc>) -> Result<Vec<SessionId>, MetaError>;
}

#[async_trait]
impl SessionsRepository for PgMetadataStore {
    async fn get_active_session(&self, user_id: UserId, task_id: TaskId) -> Result<Option<EditSession>, MetaError> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT * FROM edit_sessions WHERE user_id = $1 AND task_id = $2 AND ended_at IS NULL",
        )
        .bind(user_id)
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(EditSession::from))
    }

    async fn get_session(&self, id: SessionId) -> Result<EditSession, MetaError> {
        sqlx::query_as::<_, SessionRow>("SELECT * FROM edit_sessions WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map(EditSession::from)
            .map_err(|e| row_not_found(e, "session"))
    }

    async fn start_session(&self, session: &EditSession) -> Result<(), MetaError> {
        sqlx::query(
            "INSERT INTO edit_sessions
                (id, task_id, user_id, started_at, ended_at, last_activity_at,
                 versions_created, view_type, draft_version_id, published_version_id)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)",
        )
        .bind(session.id)
        .bind(session.task_id)
        .bind(session.user_id)
        .bind(session.started_at)
        .bind(session.ended_at)
        .bind(session.last_activity_at)
        .bind(session.versions_created)
        .bind(session.view_type)
        .bind(session.draft_version_id)
        .bind(session.published_version_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn end_session(
        &self,
        id: SessionId,
        ended_at: DateTime<Utc>,
        published_version_id: Option<VersionId>,
    ) -> Result<(), MetaError> {
        sqlx::query(
            "UPDATE edit_sessions SET ended_at = $2, published_version_id = COALESCE($3, published_version_id)
             WHERE id = $1",
        )
        .bind(id)
        .bind(ended_at)
        .bind(published_version_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn touch_session(&self, id: SessionId, versions_created_delta: i32) -> Result<(), MetaError> {
        sqlx::query(
            "UPDATE edit_sessions SET last_activity_at = $2, versions_created = versions_created + $3
             WHERE id = $1",
        )
        .bind(id)
        .bind(Utc::now())
        .bind(versions_created_delta)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_idle_sessions(&self, idle_since: DateTime<Utc>) -> Result<Vec<SessionId>, MetaError> {
        let rows = sqlx::query(
            "SELECT id FROM edit_sessions WHERE ended_at IS NULL AND last_activity_at < $1",
        )
        .bind(idle_since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.get::<SessionId, _>("id")).collect())
    }
}

#[async_trait]
pub trait PermissionsRepository: Send + Sync {
    async fn grant(&self, permission: &EditPermission) -> Result<(), MetaError>;
    async fn revoke(&self, permission_id: PermissionId, reason: &str) -> Result<(), MetaError>;
    async fn active_permission(&self, user_id: UserId, task_id: TaskId) -> Result<Option<EditPermission>, MetaError>;
}

#[async_trait]
impl PermissionsRepository for PgMetadataStore {
    async fn grant(&self, permission: &EditPermission) -> Result<(), MetaError> {
        sqlx::query(
            "INSERT INTO edit_permissions
                (id, task_id, user_id, granted_by, granted_at, expires_at, is_active, revoked_at, revoked_reason)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)",
        )
        .bind(permission.id)
        .bind(permission.task_id)
        .bind(permission.user_id)
        .bind(permission.granted_by)
        .bind(permission.granted_at)
        .bind(permission.expires_at)
        .bind(permission.is_active)
        .bind(permission.revoked_at)
        .bind(&permission.revoked_reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn revoke(&self, permission_id: PermissionId, reason: &str) -> Result<(), MetaError> {
        sqlx::query(
            "UPDATE edit_permissions SET is_active = false, revoked_at = $2, revoked_reason = $3 WHERE id = $1",
        )
        .bind(permission_id)
        .bind(Utc::now())
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn active_permission(&self, user_id: UserId, task_id: TaskId) -> Result<Option<EditPermission>, MetaError> {
        let row = sqlx::query_as::<_, PermissionRow>(
            "SELECT * FROM edit_permissions
             WHERE user_id = $1 AND task_id = $2 AND is_active = true
               AND (expires_at IS NULL OR expires_at > now())
             LIMIT 1",
        )
        .bind(user_id)
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(EditPermission::from))
    }
}

#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn record(&self, entry: &AuditRecord) -> Result<(), MetaError>;
    async fn for_task(&self, task_id: TaskId) -> Result<Vec<AuditRecord>, MetaError>;
}

#[async_trait]
impl AuditRepository for PgMetadataStore {
    async fn record(&self, entry: &AuditRecord) -> Result<(), MetaError> {
        sqlx::query(
            "INSERT INTO audit_records
                (id, task_id, user_id, action, version_id, session_id, details, ip, user_agent, at)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)",
        )
        .bind(entry.id)
        .bind(entry.task_id)
        .bind(entry.user_id)
        .bind(entry.action)
        .bind(entry.version_id)
        .bind(entry.session_id)
        .bind(&entry.details)
        .bind(&entry.ip)
        .bind(&entry.user_agent)
        .bind(entry.at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn for_task(&self, task_id: TaskId) -> Result<Vec<AuditRecord>, MetaError> {
        sqlx::query_as::<_, AuditRow>(
            "SELECT * FROM audit_records WHERE task_id = $1 ORDER BY at DESC",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .map(|rows| rows.into_iter().map(AuditRecord::from).collect())
        .map_err(MetaError::from)
    }
}
