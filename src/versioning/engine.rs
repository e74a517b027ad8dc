//! Document Version Engine (C10): auto-save snapshot/overwrite decision,
//! corruption-fallback reads, and the edit-session state machine,
//! grounded on the teacher's `VersionManager` transactional-write shape
//! but narrowed from free-text diff/merge to the task/session/checksum
//! model spec.md §4.10 defines.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{instrument, warn};

use crate::capabilities::{CapabilityError, PdfRenderCapability};
use crate::db::{MetaError, SessionsRepository, VersionsRepository};
use crate::domain::{AuditAction, DocumentVersion, EditSession, SessionState, ViewType, VersionContent};
use crate::ids::{SessionId, TaskId, UserId, VersionId};
use crate::metrics::MetricsRegistry;
use crate::permissions::{AuditLog, PermissionError, PermissionService};
use crate::store::{keys, ObjectStore};

/// Inline vs. object-key split for `VersionContent`, an implementation
/// detail the domain model leaves open ("inline for drafts and small
/// payloads, otherwise an object-store key").
const INLINE_CONTENT_LIMIT_BYTES: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    #[error("no active session for this task and user")]
    NoActiveSession,

    #[error("session {0} has already ended")]
    SessionEnded(SessionId),

    #[error("session {0} is not owned by the calling user")]
    NotSessionOwner(SessionId),

    /// §4.10/§6, scenario S6: the caller's `EditPermission` expired or was
    /// revoked after the session was opened — the session can outlive the
    /// grant for the whole idle-timeout window, so every save re-checks.
    #[error("{0} may not edit task {1}")]
    NotPermitted(UserId, TaskId),

    #[error("pdf render capability failed: {0}")]
    RenderFailed(String),

    #[error(transparent)]
    Store(#[from] crate::store::StoreError),

    #[error(transparent)]
    Meta(#[from] MetaError),

    #[error(transparent)]
    Permission(#[from] PermissionError),
}

pub struct SaveOutcome {
    pub version_number: i32,
    pub is_snapshot: bool,
}

pub struct LatestRead {
    pub content: Vec<u8>,
    pub version_number: i32,
    pub source: &'static str,
}

pub struct VersionEngine {
    versions: Arc<dyn VersionsRepository>,
    sessions: Arc<dyn SessionsRepository>,
    store: Arc<dyn ObjectStore>,
    render: Arc<dyn PdfRenderCapability>,
    audit: Arc<AuditLog>,
    permissions: Arc<PermissionService>,
    metrics: Arc<MetricsRegistry>,
    snapshot_window: Duration,
}

impl VersionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        versions: Arc<dyn VersionsRepository>,
        sessions: Arc<dyn SessionsRepository>,
        store: Arc<dyn ObjectStore>,
        render: Arc<dyn PdfRenderCapability>,
        audit: Arc<AuditLog>,
        permissions: Arc<PermissionService>,
        metrics: Arc<MetricsRegistry>,
        snapshot_window: Duration,
    ) -> Self {
        Self { versions, sessions, store, render, audit, permissions, metrics, snapshot_window }
    }

    /// §4.10 "Session lifecycle": idempotent per (user, task) while no
    /// active session exists; a pre-existing one is ended with
    /// `outcome=superseded` before the new one opens.
    #[instrument(skip(self))]
    pub async fn start_session(
        &self,
        task_id: TaskId,
        user_id: UserId,
        view_type: ViewType,
    ) -> Result<SessionId, VersionError> {
        if let Some(existing) = self.sessions.get_active_session(user_id, task_id).await? {
            self.sessions.end_session(existing.id, Utc::now(), None).await?;
            self.audit
                .record(
                    task_id,
                    user_id,
                    AuditAction::StartSession,
                    None,
                    Some(existing.id),
                    serde_json::json!({"outcome": "superseded"}),
                )
                .await
                .ok();
        }

        let session = EditSession {
            id: SessionId::new(),
            task_id,
            user_id,
            started_at: Utc::now(),
            ended_at: None,
            last_activity_at: Utc::now(),
            versions_created: 0,
            view_type,
            draft_version_id: None,
            published_version_id: None,
        };
        self.sessions.start_session(&session).await?;

        self.audit
            .record(task_id, user_id, AuditAction::StartSession, None, Some(session.id), serde_json::json!({}))
            .await
            .ok();

        Ok(session.id)
    }

    /// §4.10 save algorithm, steps 1-5.
    #[instrument(skip(self, html))]
    pub async fn save(
        &self,
        session_id: SessionId,
        caller: UserId,
        html: String,
    ) -> Result<SaveOutcome, VersionError> {
        let session = self.sessions.get_session(session_id).await?;
        if session.user_id != caller {
            return Err(VersionError::NotSessionOwner(session_id));
        }
        if !session.is_active() {
            return Err(VersionError::SessionEnded(session_id));
        }
        // S6: the session can outlive the grant for the whole idle-timeout
        // window, so the permission is re-checked on every save, not just
        // at session start.
        if !self.permissions.check(caller, session.task_id).await? {
            return Err(VersionError::NotPermitted(caller, session.task_id));
        }

        let checksum = content_checksum(html.as_bytes());
        let latest = self.versions.get_latest(session.task_id).await?;

        if latest.content_checksum == checksum {
            return Ok(SaveOutcome { version_number: latest.version_number, is_snapshot: false });
        }

        let now = Utc::now();
        let stale = now.signed_duration_since(latest.edited_at).to_std().unwrap_or(Duration::ZERO) > self.snapshot_window;
        let snapshot = stale || latest.is_original;

        let content = self.store_content(session.task_id, latest.version_number + 1, html.as_bytes()).await?;
        let character_count = html.chars().count() as i32;
        let word_count = html.split_whitespace().count() as i32;

        let version_number = if snapshot {
            let version = DocumentVersion {
                id: VersionId::new(),
                task_id: session.task_id,
                version_number: latest.version_number + 1,
                is_latest: true,
                is_original: false,
                is_draft: true,
                content,
                content_checksum: checksum,
                character_count,
                word_count,
                edited_by: caller,
                edited_at: now,
                session_id: Some(session_id),
            };
            self.versions.insert_snapshot(&version).await?;
            version.version_number
        } else {
            self.versions
                .overwrite_latest(latest.id, &content, &checksum, character_count, word_count, now)
                .await?;
            latest.version_number
        };

        self.sessions.touch_session(session_id, if snapshot { 1 } else { 0 }).await?;
        self.metrics.versions_saved_total.inc();

        self.audit
            .record(
                session.task_id,
                caller,
                AuditAction::AutoSave,
                None,
                Some(session_id),
                serde_json::json!({"version_number": version_number, "is_snapshot": snapshot}),
            )
            .await
            .ok();

        Ok(SaveOutcome { version_number, is_snapshot: snapshot })
    }

    /// §4.10 read algorithm, steps 1-3.
    #[instrument(skip(self))]
    pub async fn latest(&self, task_id: TaskId) -> Result<LatestRead, VersionError> {
        let latest = self.versions.get_latest(task_id).await?;
        let bytes = self.resolve_content(&latest.content).await?;

        if !looks_like_editor_html(&bytes) {
            warn!(%task_id, version = latest.version_number, "latest version failed the html sniff, falling back to original");
            self.metrics.corruption_fallbacks_total.inc();
            self.audit
                .record(
                    task_id,
                    latest.edited_by,
                    AuditAction::CorruptionFallback,
                    Some(latest.id),
                    None,
                    serde_json::json!({"version_number": latest.version_number}),
                )
                .await
                .ok();

            let original = self.versions.get_original(task_id).await?;
            let original_bytes = self.resolve_content(&original.content).await?;
            return Ok(LatestRead { content: original_bytes, version_number: original.version_number, source: "original_fallback" });
        }

        Ok(LatestRead { content: bytes, version_number: latest.version_number, source: "latest" })
    }

    pub async fn list(&self, task_id: TaskId) -> Result<Vec<DocumentVersion>, VersionError> {
        Ok(self.versions.list_versions(task_id).await?)
    }

    /// §4.10: "MUST succeed even when invoked via best-effort beacons at
    /// page unload" — a save failure here is logged, never propagated.
    #[instrument(skip(self, final_html))]
    pub async fn end_session(
        &self,
        session_id: SessionId,
        caller: UserId,
        final_html: Option<String>,
        outcome: &str,
    ) -> Result<(), VersionError> {
        let session = self.sessions.get_session(session_id).await?;
        if session.user_id != caller {
            return Err(VersionError::NotSessionOwner(session_id));
        }

        let mut published_version_id = None;
        if let Some(html) = final_html {
            match self.save(session_id, caller, html).await {
                Ok(save) if save.is_snapshot => {
                    if let Ok(latest) = self.versions.get_latest(session.task_id).await {
                        published_version_id = Some(latest.id);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(%session_id, error = %e, "best-effort final save on session end failed"),
            }
        }

        self.sessions.end_session(session_id, Utc::now(), published_version_id).await?;

        self.audit
            .record(
                session.task_id,
                caller,
                AuditAction::Publish,
                published_version_id,
                Some(session_id),
                serde_json::json!({"outcome": outcome}),
            )
            .await
            .ok();

        Ok(())
    }

    /// §4.10: `result.download` renders current editor content to PDF and
    /// records a `reason=download` version.
    #[instrument(skip(self, html))]
    pub async fn download_result(&self, task_id: TaskId, caller: UserId, html: String) -> Result<Vec<u8>, VersionError> {
        let pdf_bytes = self.render.render_pdf(&html).await.map_err(render_error)?;

        let latest = self.versions.get_latest(task_id).await?;
        let checksum = content_checksum(html.as_bytes());
        let content = self.store_content(task_id, latest.version_number + 1, html.as_bytes()).await?;

        let version = DocumentVersion {
            id: VersionId::new(),
            task_id,
            version_number: latest.version_number + 1,
            is_latest: true,
            is_original: false,
            is_draft: false,
            content,
            content_checksum: checksum,
            character_count: html.chars().count() as i32,
            word_count: html.split_whitespace().count() as i32,
            edited_by: caller,
            edited_at: Utc::now(),
            session_id: None,
        };
        self.versions.insert_snapshot(&version).await?;
        self.metrics.versions_saved_total.inc();

        self.audit
            .record(task_id, caller, AuditAction::Download, Some(version.id), None, serde_json::json!({}))
            .await
            .ok();

        Ok(pdf_bytes)
    }

    async fn store_content(&self, task_id: TaskId, version_number: i32, bytes: &[u8]) -> Result<VersionContent, VersionError> {
        if bytes.len() <= INLINE_CONTENT_LIMIT_BYTES {
            return Ok(VersionContent::Inline(bytes.to_vec()));
        }
        let key = keys::version_key(task_id, version_number);
        self.store.put(&key, bytes.to_vec(), "text/html", None).await?;
        Ok(VersionContent::ObjectKey(key))
    }

    async fn resolve_content(&self, content: &VersionContent) -> Result<Vec<u8>, VersionError> {
        match content {
            VersionContent::Inline(bytes) => Ok(bytes.clone()),
            VersionContent::ObjectKey(key) => Ok(self.store.get(key).await?),
        }
    }
}

fn content_checksum(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{digest:x}")
}

/// §4.10 step 3: "a binary magic number or embed tag indicating the
/// original binary artifact" makes a version row corrupted. A real
/// editor HTML payload is UTF-8 text that doesn't open with a known
/// binary signature.
fn looks_like_editor_html(bytes: &[u8]) -> bool {
    const BINARY_MAGIC_PREFIXES: &[&[u8]] = &[b"%PDF-", &[0x89, b'P', b'N', b'G'], &[0xFF, 0xD8, 0xFF]];

    if BINARY_MAGIC_PREFIXES.iter().any(|magic| bytes.starts_with(magic)) {
        return false;
    }
    std::str::from_utf8(bytes).is_ok()
}

fn render_error(e: CapabilityError) -> VersionError {
    VersionError::RenderFailed(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniff_rejects_embedded_pdf_bytes() {
        assert!(!looks_like_editor_html(b"%PDF-1.4 ..."));
    }

    #[test]
    fn sniff_accepts_plain_html() {
        assert!(looks_like_editor_html(b"<html><body>hi</body></html>"));
    }

    #[test]
    fn checksum_is_stable_for_identical_content() {
        assert_eq!(content_checksum(b"hello"), content_checksum(b"hello"));
        assert_ne!(content_checksum(b"hello"), content_checksum(b"world"));
    }
}
