//! `/api/versions/{task_id}/*` handlers (§6, §4.10).

use actix_web::{web, HttpRequest, HttpResponse};

use crate::db::VersionsRepository;
use crate::error::{AppError, AppResult};
use crate::http::auth::authenticate;
use crate::http::dto::{ApiEnvelope, SaveVersionRequest, SaveVersionResponse, HEADER_CONTENT_SOURCE, HEADER_VERSION_NUMBER};
use crate::http::state::AppState;
use crate::ids::{SessionId, TaskId};
use crate::versioning::VersionError;

fn to_app_error(e: VersionError) -> AppError {
    match e {
        VersionError::NotPermitted(caller, task_id) => {
            AppError::Forbidden(format!("{caller} may not edit task {task_id}"))
        }
        VersionError::NotSessionOwner(session_id) => {
            AppError::Forbidden(format!("session {session_id} is not owned by the caller"))
        }
        VersionError::SessionEnded(session_id) => AppError::ValidationFailed(format!("session {session_id} has ended")),
        VersionError::NoActiveSession => AppError::ValidationFailed("no active session for this task".into()),
        VersionError::Permission(e) => AppError::MetadataError(e.to_string()),
        VersionError::RenderFailed(e) => AppError::MetadataError(e),
        VersionError::Store(e) => AppError::MetadataError(e.to_string()),
        VersionError::Meta(e) => AppError::MetadataError(e.to_string()),
    }
}

/// `POST /api/versions/{task_id}/save` — the request body carries the
/// session id alongside the html, since saves are addressed by session,
/// not task (§4.10 step 0).
#[derive(Debug, serde::Deserialize)]
pub struct SaveRequestBody {
    pub session_id: SessionId,
    #[serde(flatten)]
    pub save: SaveVersionRequest,
}

pub async fn save(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<TaskId>,
    body: web::Json<SaveRequestBody>,
) -> AppResult<HttpResponse> {
    let caller = authenticate(&req, &state).await?;
    let task_id = path.into_inner();

    if !state.permissions.check(caller, task_id).await.map_err(|e| AppError::MetadataError(e.to_string()))? {
        return Err(AppError::Forbidden(format!("{caller} may not edit task {task_id}")));
    }

    let outcome =
        state.versions.save(body.session_id, caller, body.save.html.clone()).await.map_err(to_app_error)?;

    Ok(HttpResponse::Ok().json(ApiEnvelope::ok(SaveVersionResponse {
        version_number: outcome.version_number,
        is_snapshot: outcome.is_snapshot,
    })))
}

/// `GET /api/versions/{task_id}/latest` → HTML body, `X-Version-Number`
/// and `X-Content-Source` headers.
pub async fn latest(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<TaskId>,
) -> AppResult<HttpResponse> {
    let caller = authenticate(&req, &state).await?;
    let task_id = path.into_inner();

    if !state.permissions.check(caller, task_id).await.map_err(|e| AppError::MetadataError(e.to_string()))? {
        return Err(AppError::Forbidden(format!("{caller} may not view task {task_id}")));
    }

    let read = state.versions.latest(task_id).await.map_err(|e| AppError::MetadataError(e.to_string()))?;

    Ok(HttpResponse::Ok()
        .content_type("text/html")
        .insert_header((HEADER_VERSION_NUMBER, read.version_number.to_string()))
        .insert_header((HEADER_CONTENT_SOURCE, read.source))
        .body(read.content))
}

/// `GET /api/versions/{task_id}` — the full version history, beyond the
/// table's minimal listing, useful for a client-side revision picker.
pub async fn list(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<TaskId>,
) -> AppResult<HttpResponse> {
    let caller = authenticate(&req, &state).await?;
    let task_id = path.into_inner();

    if !state.permissions.check(caller, task_id).await.map_err(|e| AppError::MetadataError(e.to_string()))? {
        return Err(AppError::Forbidden(format!("{caller} may not view task {task_id}")));
    }

    let versions = state.db.list_versions(task_id).await.map_err(|e| AppError::MetadataError(e.to_string()))?;
    Ok(HttpResponse::Ok().json(ApiEnvelope::ok(versions)))
}
