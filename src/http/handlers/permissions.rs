//! `/api/tasks/{task_id}/permissions` — grant/revoke (§6, C11). Beyond the
//! spec's literal endpoint table, but a direct exposure of a capability
//! `PermissionService` already provides.

use actix_web::{web, HttpRequest, HttpResponse};

use crate::db::TasksRepository;
use crate::error::{AppError, AppResult};
use crate::http::auth::authenticate;
use crate::http::dto::{ApiEnvelope, GrantPermissionRequest, GrantPermissionResponse};
use crate::http::state::AppState;
use crate::ids::{PermissionId, TaskId};
use crate::permissions::PermissionError;

/// `POST /api/tasks/{task_id}/permissions` — owner-only.
pub async fn grant(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<TaskId>,
    body: web::Json<GrantPermissionRequest>,
) -> AppResult<HttpResponse> {
    let caller = authenticate(&req, &state).await?;
    let task_id = path.into_inner();

    let task = state.db.get_task(task_id).await.map_err(|e| AppError::MetadataError(e.to_string()))?;
    if task.owner_id != caller {
        return Err(AppError::Forbidden(format!("{caller} may not grant access to task {task_id}")));
    }

    let permission = state
        .permissions
        .grant(task_id, body.user_id, caller, body.expires_at)
        .await
        .map_err(to_app_error)?;

    Ok(HttpResponse::Ok().json(ApiEnvelope::ok(GrantPermissionResponse { permission_id: permission.id })))
}

/// `DELETE /api/tasks/{task_id}/permissions/{permission_id}` — owner-only.
pub async fn revoke(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(TaskId, PermissionId)>,
) -> AppResult<HttpResponse> {
    let caller = authenticate(&req, &state).await?;
    let (task_id, permission_id) = path.into_inner();

    let task = state.db.get_task(task_id).await.map_err(|e| AppError::MetadataError(e.to_string()))?;
    if task.owner_id != caller {
        return Err(AppError::Forbidden(format!("{caller} may not revoke access to task {task_id}")));
    }

    state.permissions.revoke(permission_id, "revoked by owner").await.map_err(to_app_error)?;
    Ok(HttpResponse::Ok().json(ApiEnvelope::ok(serde_json::json!({ "revoked": true }))))
}

fn to_app_error(e: PermissionError) -> AppError {
    match e {
        PermissionError::TaskNotFound(id) => AppError::NotFound(format!("task {id}")),
        PermissionError::PermissionNotFound => AppError::NotFound("permission not found".into()),
        PermissionError::Store(e) => AppError::MetadataError(e.to_string()),
    }
}
