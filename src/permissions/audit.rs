//! `AuditLog` (C11): append-only audit trail, grounded on the teacher's
//! `AuditManager` shape but narrowed to a single insert and a read-only
//! query — no update/delete method exists on this type at all, which is
//! what makes audit immutability a compile-time property.

use std::sync::Arc;

use chrono::Utc;
use tracing::instrument;

use crate::db::{AuditRepository, MetaError};
use crate::domain::{AuditAction, AuditRecord};
use crate::ids::{AuditId, SessionId, TaskId, UserId, VersionId};

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error(transparent)]
    Store(#[from] MetaError),
}

pub struct AuditLog {
    repo: Arc<dyn AuditRepository>,
}

impl AuditLog {
    pub fn new(repo: Arc<dyn AuditRepository>) -> Self {
        Self { repo }
    }

    #[instrument(skip(self, details))]
    pub async fn record(
        &self,
        task_id: TaskId,
        user_id: UserId,
        action: AuditAction,
        version_id: Option<VersionId>,
        session_id: Option<SessionId>,
        details: serde_json::Value,
    ) -> Result<(), AuditError> {
        let entry = AuditRecord {
            id: AuditId::new(),
            task_id,
            user_id,
            action,
            version_id,
            session_id,
            details,
            ip: None,
            user_agent: None,
            at: Utc::now(),
        };
        self.repo.record(&entry).await?;
        Ok(())
    }

    pub async fn for_task(&self, task_id: TaskId) -> Result<Vec<AuditRecord>, AuditError> {
        Ok(self.repo.for_task(task_id).await?)
    }
}
