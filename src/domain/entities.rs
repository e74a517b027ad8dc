//! The entity contracts of §3. These are plain data types shared by every
//! repository and service; the repository traits in `crate::db` are what
//! enforce the transactional invariants around them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ids::{FileId, FolderId, PermissionId, ResultId, SessionId, TaskId, UserId, VersionId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub email: String,
    pub credit_balance: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Folder {
    pub id: FolderId,
    pub owner_id: UserId,
    pub name: String,
    pub color: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    pub id: FileId,
    pub owner_id: UserId,
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub content_hash: String,
    pub object_key: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "task_status", rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    /// §3: `queued -> processing -> {completed, failed}`. `Processing ->
    /// Queued` is the one allowed "backward" edge — it's the retry path
    /// of §4.7 step 7, not a regression of a terminal state. The
    /// invariant that actually matters (testable property 1) is that
    /// `completed`/`failed` never transition anywhere.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Queued, Processing) | (Processing, Completed) | (Processing, Failed) | (Processing, Queued)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Which OCR modes run and which fields they extract; immutable once the
/// task is enqueued (§3 Task.processing_config).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    pub modes: Vec<ProcessingMode>,
    pub field_selectors: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    Kvp,
    Anon,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub owner_id: UserId,
    pub file_id: FileId,
    pub folder_id: Option<FolderId>,
    pub status: TaskStatus,
    pub error_message: Option<String>,
    pub attempt_count: i32,
    pub processing_config: ProcessingConfig,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrResult {
    pub id: ResultId,
    pub task_id: TaskId,
    pub result_object_key: String,
    pub page_count: i32,
    pub word_count: i32,
    pub confidence_score: f64,
    pub processing_time_ms: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentVersion {
    pub id: VersionId,
    pub task_id: TaskId,
    pub version_number: i32,
    pub is_latest: bool,
    pub is_original: bool,
    pub is_draft: bool,
    pub content: VersionContent,
    pub content_checksum: String,
    pub character_count: i32,
    pub word_count: i32,
    pub edited_by: UserId,
    pub edited_at: DateTime<Utc>,
    pub session_id: Option<SessionId>,
}

/// §3: "content bytes are immutable once written"; inline for drafts and
/// small payloads, otherwise an object-store key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VersionContent {
    Inline(Vec<u8>),
    ObjectKey(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "view_type", rename_all = "snake_case")]
pub enum ViewType {
    OriginalView,
    ViewOnly,
    Edit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Active,
    Ending,
    Ended,
}

impl SessionState {
    /// §3: "Only one transition is legal from any prior state into `ended`."
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!((self, next), (Active, Ending) | (Active, Ended) | (Ending, Ended))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditSession {
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

impl EditSession {
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditPermission {
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

impl EditPermission {
    pub fn is_currently_valid(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map_or(true, |exp| exp > now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "audit_action", rename_all = "snake_case")]
pub enum AuditAction {
    OpenViewer,
    StartSession,
    AutoSave,
    Publish,
    Revert,
    Download,
    Delete,
    GrantPermission,
    RevokePermission,
    CorruptionFallback,
}

use crate::ids::AuditId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: AuditId,
    pub task_id: TaskId,
    pub user_id: UserId,
    pub action: AuditAction,
    pub version_id: Option<VersionId>,
    pub session_id: Option<SessionId>,
    pub details: serde_json::Value,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_forbids_backward_transitions() {
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Processing));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Queued));
        assert!(!TaskStatus::Processing.can_transition_to(TaskStatus::Queued));
    }

    #[test]
    fn terminal_states_are_completed_and_failed() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
    }

    #[test]
    fn session_state_only_one_path_to_ended() {
        assert!(SessionState::Active.can_transition_to(SessionState::Ending));
        assert!(SessionState::Ending.can_transition_to(SessionState::Ended));
        assert!(SessionState::Active.can_transition_to(SessionState::Ended));
        assert!(!SessionState::Ended.can_transition_to(SessionState::Active));
    }

    #[test]
    fn expired_permission_is_not_valid() {
        let now = Utc::now();
        let perm = EditPermission {
            id: PermissionId::new(),
            task_id: TaskId::new(),
            user_id: UserId::new(),
            granted_by: UserId::new(),
            granted_at: now - chrono::Duration::hours(2),
            expires_at: Some(now - chrono::Duration::hours(1)),
            is_active: true,
            revoked_at: None,
            revoked_reason: None,
        };
        assert!(!perm.is_currently_valid(now));
    }

    #[test]
    fn revoked_permission_is_not_valid_even_before_expiry() {
        let now = Utc::now();
        let perm = EditPermission {
            id: PermissionId::new(),
            task_id: TaskId::new(),
            user_id: UserId::new(),
            granted_by: UserId::new(),
            granted_at: now - chrono::Duration::hours(2),
            expires_at: Some(now + chrono::Duration::hours(1)),
            is_active: false,
            revoked_at: Some(now),
            revoked_reason: Some("owner revoked".into()),
        };
        assert!(!perm.is_currently_valid(now));
    }
}
