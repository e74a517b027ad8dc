//! `docflow-reaper`: lifecycle sweeps process (§4.12) — stuck-queued
//! re-enqueue, stuck-processing timeout, idle-session close, plus the
//! one-time object-store lifecycle declaration at startup.

use std::sync::Arc;

use aws_sdk_s3::Client as S3Client;
use docflow_platform::capabilities::{CapabilityError, PdfRenderCapability};
use docflow_platform::config::AppConfig;
use docflow_platform::db::PgMetadataStore;
use docflow_platform::metrics::MetricsRegistry;
use docflow_platform::permissions::{AuditLog, PermissionService};
use docflow_platform::queue::RedisWorkQueue;
use docflow_platform::reaper::LifecycleReaper;
use docflow_platform::store::{ObjectStore, S3ObjectStore};
use docflow_platform::versioning::VersionEngine;
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let config = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return std::process::ExitCode::from(1);
        }
    };

    let pool = match PgPoolOptions::new().max_connections(5).connect(&config.metadata_url).await {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to metadata store");
            return std::process::ExitCode::from(2);
        }
    };
    let db = Arc::new(PgMetadataStore::new(pool));

    let queue = match RedisWorkQueue::connect(&config.queue_url).await {
        Ok(q) => Arc::new(q),
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to work queue");
            return std::process::ExitCode::from(2);
        }
    };

    let aws_cfg = aws_config::load_from_env().await;
    let store: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::new(S3Client::new(&aws_cfg), &config.object_store));

    let metrics = Arc::new(MetricsRegistry::new());
    let audit = Arc::new(AuditLog::new(db.clone()));
    let permissions = Arc::new(PermissionService::new(db.clone(), db.clone(), metrics.clone()));
    // The reaper only ever ends sessions with no final HTML (idle-timeout
    // closes don't render a PDF), so this capability is never invoked.
    let render: Arc<dyn PdfRenderCapability> = Arc::new(NeverInvokedRender);
    let versions = Arc::new(VersionEngine::new(
        db.clone(),
        db.clone(),
        store.clone(),
        render,
        audit,
        permissions,
        metrics.clone(),
        config.snapshot_window,
    ));

    let reaper = LifecycleReaper::new(
        db.clone(),
        db,
        queue,
        store,
        versions,
        metrics,
        config.worker_task_timeout,
        config.session_idle_timeout,
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(());
    });

    tracing::info!("starting docflow-reaper");
    reaper.run(shutdown_rx).await;
    std::process::ExitCode::from(130)
}

struct NeverInvokedRender;

#[async_trait::async_trait]
impl PdfRenderCapability for NeverInvokedRender {
    async fn render_pdf(&self, _html: &str) -> Result<Vec<u8>, CapabilityError> {
        Err(CapabilityError::Permanent("reaper never renders PDFs".into()))
    }
}
