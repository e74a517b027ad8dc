//! `sqlx::FromRow` row shapes and their conversion into the domain types
//! of `crate::domain`. Kept separate from the domain module so a column
//! rename only touches this file.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;

use crate::domain::*;
use crate::ids::*;

#[derive(Debug, FromRow)]
pub struct UserRow {
    pub id: UserId,
    pub display_name: String,
    pub email: String,
    pub credit_balance: i64,
    pub created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(r: UserRow) -> Self {
        User {
            id: r.id,
            display_name: r.display_name,
            email: r.email,
            credit_balance: r.credit_balance,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct FolderRow {
    pub id: FolderId,
    pub owner_id: UserId,
    pub name: String,
    pub color: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<FolderRow> for Folder {
    fn from(r: FolderRow) -> Self {
        Folder {
            id: r.id,
            owner_id: r.owner_id,
            name: r.name,
            color: r.color,
            description: r.description,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct FileRow {
    pub id: FileId,
    pub owner_id: UserId,
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub content_hash: String,
    pub object_key: String,
    pub created_at: DateTime<Utc>,
}

impl From<FileRow> for File {
    fn from(r: FileRow) -> Self {
        File {
            id: r.id,
            owner_id: r.owner_id,
            filename: r.filename,
            mime_type: r.mime_type,
            size_bytes: r.size_bytes,
            content_hash: r.content_hash,
            object_key: r.object_key,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct TaskRow {
    pub id: TaskId,
    pub owner_id: UserId,
    pub file_id: FileId,
    pub folder_id: Option<FolderId>,
    pub status: TaskStatus,
    pub error_message: Option<String>,
    pub attempt_count: i32,
    pub processing_config: Value,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for Task {
    type Error = serde_json::Error;

    fn try_from(r: TaskRow) -> Result<Self, Self::Error> {
        Ok(Task {
            id: r.id,
            owner_id: r.owner_id,
            file_id: r.file_id,
            folder_id: r.folder_id,
            status: r.status,
            error_message: r.error_message,
            attempt_count: r.attempt_count,
            processing_config: serde_json::from_value(r.processing_config)?,
            idempotency_key: r.idempotency_key,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct ResultRow {
    pub id: ResultId,
    pub task_id: TaskId,
    pub result_object_key: String,
    pub page_count: i32,
    pub word_count: i32,
    pub confidence_score: f64,
    pub processing_time_ms: i64,
    pub created_at: DateTime<Utc>,
}

impl From<ResultRow> for OcrResult {
    fn from(r: ResultRow) -> Self {
        OcrResult {
            id: r.id,
            task_id: r.task_id,
            result_object_key: r.result_object_key,
            page_count: r.page_count,
            word_count: r.word_count,
            confidence_score: r.confidence_score,
            processing_time_ms: r.processing_time_ms,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct VersionRow {
    pub id: VersionId,
    pub task_id: TaskId,
    pub version_number: i32,
    pub is_latest: bool,
    pub is_original: bool,
    pub is_draft: bool,
    pub content_inline: Option<Vec<u8>>,
    pub content_object_key: Option<String>,
    pub content_checksum: String,
    pub character_count: i32,
    pub word_count: i32,
    pub edited_by: UserId,
    pub edited_at: DateTime<Utc>,
    pub session_id: Option<SessionId>,
}

impl From<VersionRow> for DocumentVersion {
    fn from(r: VersionRow) -> Self {
        let content = match r.content_object_key {
            Some(key) => VersionContent::ObjectKey(key),
            None => VersionContent::Inline(r.content_inline.unwrap_or_default()),
        };

        DocumentVersion {
            id: r.id,
            task_id: r.task_id,
            version_number: r.version_number,
            is_latest: r.is_latest,
            is_original: r.is_original,
            is_draft: r.is_draft,
            content,
            content_checksum: r.content_checksum,
            character_count: r.character_count,
            word_count: r.word_count,
            edited_by: r.edited_by,
            edited_at: r.edited_at,
            session_id: r.session_id,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct SessionRow {
    pub id: SessionId,
    pub task_id: TaskId,
    pub user_id: UserId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
    pub versions_created: i32,
    pub view_type: ViewType,
    pub draft_version_id: Option<VersionId>,
    pub published_version_id: Option<VersionId>,
}

impl From<SessionRow> for EditSession {
    fn from(r: SessionRow) -> Self {
        EditSession {
            id: r.id,
            task_id: r.task_id,
            user_id: r.user_id,
            started_at: r.started_at,
            ended_at: r.ended_at,
            last_activity_at: r.last_activity_at,
            versions_created: r.versions_created,
            view_type: r.view_type,
            draft_version_id: r.draft_version_id,
            published_version_id: r.published_version_id,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct PermissionRow {
    pub id: PermissionId,
    pub task_id: TaskId,
    pub user_id: UserId,
    pub granted_by: UserId,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
}

impl From<PermissionRow> for EditPermission {
    fn from(r: PermissionRow) -> Self {
        EditPermission {
            id: r.id,
            task_id: r.task_id,
            user_id: r.user_id,
            granted_by: r.granted_by,
            granted_at: r.granted_at,
            expires_at: r.expires_at,
            is_active: r.is_active,
            revoked_at: r.revoked_at,
            revoked_reason: r.revoked_reason,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct AuditRow {
    pub id: AuditId,
    pub task_id: TaskId,
    pub user_id: UserId,
    pub action: AuditAction,
    pub version_id: Option<VersionId>,
    pub session_id: Option<SessionId>,
    pub details: Value,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub at: DateTime<Utc>,
}

impl From<AuditRow> for AuditRecord {
    fn from(r: AuditRow) -> Self {
        AuditRecord {
            id: r.id,
            task_id: r.task_id,
            user_id: r.user_id,
            action: r.action,
            version_id: r.version_id,
            session_id: r.session_id,
            details: r.details,
            ip: r.ip,
            user_agent: r.user_agent,
            at: r.at,
        }
    }
}
