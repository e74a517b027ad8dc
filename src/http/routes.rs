//! Route table for the HTTP + gateway server (§6).

use actix_web::{web, HttpResponse};

use crate::http::handlers::{folders, permissions, sessions, tasks, versions, ws};
use crate::http::state::AppState;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/healthz", web::get().to(healthz))
        .route("/metrics", web::get().to(metrics))
        .route("/api/ws", web::get().to(ws::connect))
        .service(
            web::scope("/api/tasks")
                .route("", web::post().to(tasks::upload))
                .route("", web::get().to(tasks::list))
                .route("/{id}", web::get().to(tasks::detail))
                .route("/{id}", web::delete().to(tasks::delete))
                .route("/{id}/download", web::get().to(tasks::download_original))
                .route("/{id}/preview", web::get().to(tasks::preview))
                .route("/{id}/page-image/{n}", web::get().to(tasks::page_image))
                .route("/{id}/permissions", web::post().to(permissions::grant))
                .route("/{id}/permissions/{permission_id}", web::delete().to(permissions::revoke)),
        )
        .service(
            web::scope("/api/sessions")
                .route("/{task_id}/start", web::post().to(sessions::start))
                .route("/{task_id}/end", web::post().to(sessions::end))
                .route("/{task_id}/download-result", web::post().to(sessions::download_result)),
        )
        .service(
            web::scope("/api/versions")
                .route("/{task_id}/save", web::post().to(versions::save))
                .route("/{task_id}/latest", web::get().to(versions::latest))
                .route("/{task_id}", web::get().to(versions::list)),
        )
        .service(
            web::scope("/api/folders")
                .route("", web::post().to(folders::create))
                .route("", web::get().to(folders::list))
                .route("/{id}", web::get().to(folders::get))
                .route("/{id}", web::delete().to(folders::delete)),
        );
}

async fn healthz() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

async fn metrics(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().content_type("text/plain; version=0.0.4").body(state.metrics.render())
}
