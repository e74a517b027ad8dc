//! Request/response shapes for the HTTP surface. Every successful
//! response is wrapped in the `{success, data}` envelope of spec.md §6;
//! failures go through [`crate::error::AppError`]'s `ResponseError` impl
//! instead, so no error variant lives here.

use serde::{Deserialize, Serialize};

use crate::domain::{AuditRecord, DocumentVersion, Folder, ProcessingConfig, Task, TaskStatus, ViewType};
use crate::ids::{FolderId, SessionId, TaskId, UserId};

#[derive(Debug, Serialize)]
pub struct ApiEnvelope<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data }
    }
}

#[derive(Debug, Deserialize)]
pub struct UploadMetadata {
    pub filename: String,
    pub mime: String,
    pub processing_config: ProcessingConfig,
    pub folder_id: Option<FolderId>,
    /// Client-supplied replay guard: a retried multipart upload carrying
    /// the same key short-circuits to the task created by the first
    /// attempt instead of ingesting twice.
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TaskCreatedResponse {
    pub task_id: TaskId,
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<Task>,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

impl TaskListResponse {
    pub fn from_tasks(tasks: Vec<Task>) -> Self {
        let completed = tasks.iter().filter(|t| t.status == TaskStatus::Completed).count();
        let failed = tasks.iter().filter(|t| t.status == TaskStatus::Failed).count();
        let total = tasks.len();
        Self { tasks, total, completed, failed }
    }
}

#[derive(Debug, Serialize)]
pub struct TaskDetailResponse {
    #[serde(flatten)]
    pub task: Task,
    pub versions: Vec<DocumentVersion>,
    pub audit: Vec<AuditRecord>,
}

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub view_type: ViewType,
}

#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub session_id: SessionId,
}

#[derive(Debug, Deserialize)]
pub struct EndSessionRequest {
    pub final_html: Option<String>,
    #[serde(default = "default_outcome")]
    pub outcome: String,
}

fn default_outcome() -> String {
    "closed".to_string()
}

#[derive(Debug, Deserialize)]
pub struct SaveVersionRequest {
    pub html: String,
}

#[derive(Debug, Serialize)]
pub struct SaveVersionResponse {
    pub version_number: i32,
    pub is_snapshot: bool,
}

#[derive(Debug, Deserialize)]
pub struct DownloadResultRequest {
    pub html: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateFolderRequest {
    pub name: String,
    pub color: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FolderListResponse {
    pub folders: Vec<Folder>,
}

#[derive(Debug, Deserialize)]
pub struct GrantPermissionRequest {
    pub user_id: UserId,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Serialize)]
pub struct GrantPermissionResponse {
    pub permission_id: crate::ids::PermissionId,
}

pub const HEADER_VERSION_NUMBER: &str = "X-Version-Number";
pub const HEADER_CONTENT_SOURCE: &str = "X-Content-Source";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_list_response_counts_by_status() {
        use crate::domain::ProcessingConfig;
        use crate::ids::{FileId, TaskId, UserId};
        use chrono::Utc;
        use std::collections::HashMap;

        let owner = UserId::new();
        let mk = |status: TaskStatus| Task {
            id: TaskId::new(),
            owner_id: owner,
            file_id: FileId::new(),
            folder_id: None,
            status,
            error_message: None,
            attempt_count: 0,
            processing_config: ProcessingConfig { modes: vec![], field_selectors: HashMap::new() },
            idempotency_key: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let resp = TaskListResponse::from_tasks(vec![
            mk(TaskStatus::Completed),
            mk(TaskStatus::Failed),
            mk(TaskStatus::Queued),
        ]);
        assert_eq!(resp.total, 3);
        assert_eq!(resp.completed, 1);
        assert_eq!(resp.failed, 1);
    }
}
