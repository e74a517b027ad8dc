//! `PermissionService` (C11): owner-or-active-grant authorization,
//! grounded on the teacher's `PermissionManager` shape but narrowed from a
//! generic role/policy engine down to the single rule spec.md defines.

use std::sync::Arc;

use chrono::Utc;
use tracing::instrument;

use crate::db::{MetaError, PermissionsRepository, TasksRepository};
use crate::domain::EditPermission;
use crate::ids::{PermissionId, TaskId, UserId};
use crate::metrics::MetricsRegistry;

#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("permission not found")]
    PermissionNotFound,

    #[error(transparent)]
    Store(#[from] MetaError),
}

pub struct PermissionService {
    db: Arc<dyn TasksRepository>,
    permissions: Arc<dyn PermissionsRepository>,
    metrics: Arc<MetricsRegistry>,
}

impl PermissionService {
    pub fn new(
        db: Arc<dyn TasksRepository>,
        permissions: Arc<dyn PermissionsRepository>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self { db, permissions, metrics }
    }

    #[instrument(skip(self))]
    pub async fn grant(
        &self,
        task_id: TaskId,
        user_id: UserId,
        granted_by: UserId,
        expires_at: Option<chrono::DateTime<Utc>>,
    ) -> Result<EditPermission, PermissionError> {
        self.db.get_task(task_id).await.map_err(|_| PermissionError::TaskNotFound(task_id))?;

        let permission = EditPermission {
            id: PermissionId::new(),
            task_id,
            user_id,
            granted_by,
            granted_at: Utc::now(),
            expires_at,
            is_active: true,
            revoked_at: None,
            revoked_reason: None,
        };
        self.permissions.grant(&permission).await?;
        Ok(permission)
    }

    #[instrument(skip(self))]
    pub async fn revoke(&self, permission_id: PermissionId, reason: &str) -> Result<(), PermissionError> {
        self.permissions.revoke(permission_id, reason).await?;
        Ok(())
    }

    /// §4.11: `caller = owner(task) OR active_permission(caller, task)`.
    #[instrument(skip(self))]
    pub async fn check(&self, user_id: UserId, task_id: TaskId) -> Result<bool, PermissionError> {
        let task = self.db.get_task(task_id).await.map_err(|_| PermissionError::TaskNotFound(task_id))?;

        if task.owner_id == user_id {
            self.metrics.permission_checks_total.with_label_values(&["granted"]).inc();
            return Ok(true);
        }

        let granted = self.permissions.active_permission(user_id, task_id).await?.is_some();
        let outcome = if granted { "granted" } else { "denied" };
        self.metrics.permission_checks_total.with_label_values(&[outcome]).inc();
        Ok(granted)
    }
}
