//! `/api/sessions/{task_id}/*` handlers (§6, §4.10).

use actix_web::{web, HttpRequest, HttpResponse};

use crate::db::{SessionsRepository, VersionsRepository};
use crate::error::{AppError, AppResult};
use crate::http::auth::authenticate;
use crate::http::dto::{ApiEnvelope, DownloadResultRequest, EndSessionRequest, StartSessionRequest, StartSessionResponse};
use crate::http::state::AppState;
use crate::ids::TaskId;
use crate::versioning::VersionError;

/// `POST /api/sessions/{task_id}/start`.
pub async fn start(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<TaskId>,
    body: web::Json<StartSessionRequest>,
) -> AppResult<HttpResponse> {
    let caller = authenticate(&req, &state).await?;
    let task_id = path.into_inner();

    if !state.permissions.check(caller, task_id).await.map_err(|e| AppError::MetadataError(e.to_string()))? {
        return Err(AppError::Forbidden(format!("{caller} may not edit task {task_id}")));
    }

    let session_id = state
        .versions
        .start_session(task_id, caller, body.view_type)
        .await
        .map_err(to_app_error)?;

    Ok(HttpResponse::Ok().json(ApiEnvelope::ok(StartSessionResponse { session_id })))
}

/// `POST /api/sessions/{task_id}/end` — sendBeacon-tolerant: the caller
/// identifies the session implicitly by (user, task), since a beacon on
/// page unload cannot carry a session id reliably.
pub async fn end(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<TaskId>,
    body: web::Json<EndSessionRequest>,
) -> AppResult<HttpResponse> {
    let caller = authenticate(&req, &state).await?;
    let task_id = path.into_inner();

    let session = state
        .db
        .get_active_session(caller, task_id)
        .await
        .map_err(|e| AppError::MetadataError(e.to_string()))?
        .ok_or(AppError::NotFound("no active session for this user and task".into()))?;

    state
        .versions
        .end_session(session.id, caller, body.final_html.clone(), &body.outcome)
        .await
        .map_err(to_app_error)?;

    Ok(HttpResponse::Ok().json(ApiEnvelope::ok(serde_json::json!({ "ok": true }))))
}

/// `POST /api/sessions/{task_id}/download-result` → PDF stream, version
/// number echoed in `X-Version-Number`.
pub async fn download_result(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<TaskId>,
    body: web::Json<DownloadResultRequest>,
) -> AppResult<HttpResponse> {
    let caller = authenticate(&req, &state).await?;
    let task_id = path.into_inner();

    if !state.permissions.check(caller, task_id).await.map_err(|e| AppError::MetadataError(e.to_string()))? {
        return Err(AppError::Forbidden(format!("{caller} may not render task {task_id}")));
    }

    let pdf_bytes = state.versions.download_result(task_id, caller, body.html.clone()).await.map_err(to_app_error)?;
    let latest = state.db.get_latest(task_id).await.map_err(|e| AppError::MetadataError(e.to_string()))?;

    Ok(HttpResponse::Ok()
        .content_type("application/pdf")
        .insert_header((crate::http::dto::HEADER_VERSION_NUMBER, latest.version_number.to_string()))
        .body(pdf_bytes))
}

fn to_app_error(e: VersionError) -> AppError {
    match e {
        VersionError::NoActiveSession => AppError::NotFound("no active session".into()),
        VersionError::SessionEnded(id) => AppError::Conflict(format!("session {id} has already ended")),
        VersionError::NotSessionOwner(id) => AppError::Forbidden(format!("not the owner of session {id}")),
        VersionError::NotPermitted(caller, task_id) => {
            AppError::Forbidden(format!("{caller} may not edit task {task_id}"))
        }
        VersionError::RenderFailed(m) => AppError::MetadataError(m),
        VersionError::Store(e) => AppError::StorageError(e.to_string()),
        VersionError::Meta(e) => AppError::MetadataError(e.to_string()),
        VersionError::Permission(e) => AppError::MetadataError(e.to_string()),
    }
}
