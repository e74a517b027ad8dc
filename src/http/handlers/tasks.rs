//! `/api/tasks*` handlers: upload, listing, detail, soft-delete, and the
//! three download variants (§6).

use actix_web::{web, HttpRequest, HttpResponse};
use actix_multipart::Multipart;
use futures_util::StreamExt as _;
use serde::Deserialize;

use crate::db::TasksRepository;
use crate::download::Download;
use crate::error::{AppError, AppResult};
use crate::http::auth::authenticate;
use crate::http::dto::{ApiEnvelope, TaskCreatedResponse, TaskDetailResponse, TaskListResponse, UploadMetadata};
use crate::http::state::AppState;
use crate::ids::TaskId;

/// `POST /api/tasks` (multipart: `file`, `metadata` as JSON text).
pub async fn upload(
    req: HttpRequest,
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> AppResult<HttpResponse> {
    let owner_id = authenticate(&req, &state).await?;

    let mut file_bytes: Option<Vec<u8>> = None;
    let mut metadata: Option<UploadMetadata> = None;

    while let Some(field) = payload.next().await {
        let mut field = field.map_err(|e| AppError::ValidationFailed(format!("malformed multipart body: {e}")))?;
        let name = field.content_disposition().and_then(|cd| cd.get_name()).unwrap_or("").to_string();

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| AppError::ValidationFailed(format!("malformed multipart chunk: {e}")))?;
            bytes.extend_from_slice(&chunk);
        }

        match name.as_str() {
            "file" => file_bytes = Some(bytes),
            "metadata" => {
                metadata = Some(
                    serde_json::from_slice(&bytes)
                        .map_err(|e| AppError::ValidationFailed(format!("malformed metadata field: {e}")))?,
                )
            }
            _ => {}
        }
    }

    let file_bytes = file_bytes.ok_or_else(|| AppError::ValidationFailed("missing `file` part".into()))?;
    let metadata = metadata.ok_or_else(|| AppError::ValidationFailed("missing `metadata` part".into()))?;

    let task_id = state
        .ingestion
        .upload(
            owner_id,
            file_bytes,
            &metadata.filename,
            &metadata.mime,
            metadata.processing_config,
            metadata.folder_id,
            metadata.idempotency_key,
        )
        .await
        .map_err(|e| to_app_error(e))?;

    Ok(HttpResponse::Ok().json(ApiEnvelope::ok(TaskCreatedResponse { task_id })))
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub owner_id: Option<crate::ids::UserId>,
}

/// `GET /api/tasks?owner_id=…`.
pub async fn list(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<ListTasksQuery>,
) -> AppResult<HttpResponse> {
    let caller = authenticate(&req, &state).await?;
    let owner_id = query.owner_id.unwrap_or(caller);

    let tasks = state.db.list_tasks(owner_id).await.map_err(to_meta_error)?;
    Ok(HttpResponse::Ok().json(ApiEnvelope::ok(TaskListResponse::from_tasks(tasks))))
}

/// `GET /api/tasks/{id}`.
pub async fn detail(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<TaskId>,
) -> AppResult<HttpResponse> {
    let caller = authenticate(&req, &state).await?;
    let task_id = path.into_inner();

    if !state.permissions.check(caller, task_id).await.map_err(to_permission_error)? {
        return Err(AppError::Forbidden(format!("{caller} may not view task {task_id}")));
    }

    let task = state.db.get_task(task_id).await.map_err(to_meta_error)?;
    let versions = state.versions.list(task_id).await.map_err(to_version_error)?;
    let audit = state.audit.for_task(task_id).await.map_err(|e| AppError::MetadataError(e.to_string()))?;

    Ok(HttpResponse::Ok().json(ApiEnvelope::ok(TaskDetailResponse { task, versions, audit })))
}

/// `DELETE /api/tasks/{id}` — hard-deletes the Task/Result/DocumentVersion
/// rows and tags the underlying objects `deleted=true` (§4.12).
pub async fn delete(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<TaskId>,
) -> AppResult<HttpResponse> {
    let caller = authenticate(&req, &state).await?;
    let task_id = path.into_inner();

    let task = state.db.get_task(task_id).await.map_err(to_meta_error)?;
    if task.owner_id != caller {
        return Err(AppError::Forbidden(format!("{caller} may not delete task {task_id}")));
    }

    let (file, result) = state.db.delete_task_cascade(task_id).await.map_err(to_meta_error)?;

    let deleted_tag = [("deleted".to_string(), "true".to_string())];
    if let Err(e) = state.store.tag(&file.object_key, &deleted_tag).await {
        tracing::warn!(%task_id, error = %e, "failed to tag deleted original object");
    }
    if let Some(result) = result {
        if let Err(e) = state.store.tag(&result.result_object_key, &deleted_tag).await {
            tracing::warn!(%task_id, error = %e, "failed to tag deleted result object");
        }
    }

    Ok(HttpResponse::Ok().json(ApiEnvelope::ok(serde_json::json!({ "deleted": true }))))
}

/// `GET /api/tasks/{id}/download` → 302 to a pre-signed URL of the original.
pub async fn download_original(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<TaskId>,
) -> AppResult<HttpResponse> {
    let caller = authenticate(&req, &state).await?;
    match state.download.original(caller, path.into_inner()).await? {
        Download::Redirect(url) => Ok(HttpResponse::Found().insert_header(("Location", url)).finish()),
        Download::Stream { bytes, content_type } => Ok(HttpResponse::Ok().content_type(content_type).body(bytes)),
    }
}

/// `GET /api/tasks/{id}/preview` → `text/html` stream.
pub async fn preview(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<TaskId>,
) -> AppResult<HttpResponse> {
    let caller = authenticate(&req, &state).await?;
    match state.download.preview(caller, path.into_inner()).await? {
        Download::Stream { bytes, content_type } => Ok(HttpResponse::Ok().content_type(content_type).body(bytes)),
        Download::Redirect(url) => Ok(HttpResponse::Found().insert_header(("Location", url)).finish()),
    }
}

/// `GET /api/tasks/{id}/page-image/{n}` → image stream (redirect to a
/// pre-signed URL, matching the original/result endpoints).
pub async fn page_image(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(TaskId, u32)>,
) -> AppResult<HttpResponse> {
    let caller = authenticate(&req, &state).await?;
    let (task_id, page) = path.into_inner();
    match state.download.page_image(caller, task_id, page).await? {
        Download::Redirect(url) => Ok(HttpResponse::Found().insert_header(("Location", url)).finish()),
        Download::Stream { bytes, content_type } => Ok(HttpResponse::Ok().content_type(content_type).body(bytes)),
    }
}

fn to_app_error(e: crate::ingestion::IngestError) -> AppError {
    use crate::ingestion::IngestError;
    match e {
        IngestError::ValidationFailed(m) => AppError::ValidationFailed(m),
        IngestError::Conflict(m) => AppError::Conflict(m),
        IngestError::StorageError(m) => AppError::StorageError(m),
        IngestError::MetadataError(m) => AppError::MetadataError(m),
        IngestError::ServiceOverloaded => AppError::ServiceOverloaded,
    }
}

fn to_meta_error(e: crate::db::MetaError) -> AppError {
    use crate::db::MetaError;
    match e {
        MetaError::NotFound(m) => AppError::NotFound(m),
        MetaError::Conflict(m) => AppError::Conflict(m),
        other => AppError::MetadataError(other.to_string()),
    }
}

fn to_permission_error(e: crate::permissions::PermissionError) -> AppError {
    AppError::MetadataError(e.to_string())
}

fn to_version_error(e: crate::versioning::VersionError) -> AppError {
    AppError::MetadataError(e.to_string())
}
