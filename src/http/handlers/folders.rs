//! `/api/folders` CRUD (§6: "Folder CRUD under `/api/folders`").

use actix_web::{web, HttpRequest, HttpResponse};

use crate::db::FoldersRepository;
use crate::error::{AppError, AppResult};
use crate::http::auth::authenticate;
use crate::http::dto::{ApiEnvelope, CreateFolderRequest, FolderListResponse};
use crate::http::state::AppState;
use crate::ids::FolderId;

pub async fn create(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<CreateFolderRequest>,
) -> AppResult<HttpResponse> {
    let caller = authenticate(&req, &state).await?;
    let folder = state
        .db
        .create_folder(caller, &body.name, body.color.as_deref(), body.description.as_deref())
        .await
        .map_err(to_app_error)?;
    Ok(HttpResponse::Ok().json(ApiEnvelope::ok(folder)))
}

pub async fn list(req: HttpRequest, state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let caller = authenticate(&req, &state).await?;
    let folders = state.db.list_folders(caller).await.map_err(to_app_error)?;
    Ok(HttpResponse::Ok().json(ApiEnvelope::ok(FolderListResponse { folders })))
}

pub async fn get(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<FolderId>,
) -> AppResult<HttpResponse> {
    let caller = authenticate(&req, &state).await?;
    let folder = state.db.get_folder(path.into_inner()).await.map_err(to_app_error)?;
    if folder.owner_id != caller {
        return Err(AppError::Forbidden(format!("{caller} may not view folder {}", folder.id)));
    }
    Ok(HttpResponse::Ok().json(ApiEnvelope::ok(folder)))
}

pub async fn delete(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<FolderId>,
) -> AppResult<HttpResponse> {
    let caller = authenticate(&req, &state).await?;
    let folder_id = path.into_inner();
    let folder = state.db.get_folder(folder_id).await.map_err(to_app_error)?;
    if folder.owner_id != caller {
        return Err(AppError::Forbidden(format!("{caller} may not delete folder {folder_id}")));
    }
    state.db.delete_folder(folder_id).await.map_err(to_app_error)?;
    Ok(HttpResponse::Ok().json(ApiEnvelope::ok(serde_json::json!({ "deleted": true }))))
}

fn to_app_error(e: crate::db::MetaError) -> AppError {
    use crate::db::MetaError;
    match e {
        MetaError::NotFound(m) => AppError::NotFound(m),
        MetaError::Conflict(m) => AppError::Conflict(m),
        other => AppError::MetadataError(other.to_string()),
    }
}
