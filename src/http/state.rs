//! Wires every component into the shapes the HTTP handlers and the
//! websocket gateway need. One `AppState` is built at server startup and
//! shared behind a `web::Data` handle, the same way the teacher's binaries
//! build a single `Manager` per component and clone its `Arc` into every
//! task that needs it.

use std::sync::Arc;

use sqlx::PgPool;

use crate::bus::EventBus;
use crate::capabilities::{AuthCapability, CreditCheckCapability, PdfRenderCapability};
use crate::config::AppConfig;
use crate::db::PgMetadataStore;
use crate::download::DownloadService;
use crate::error::AppResult;
use crate::gateway::ConnectionRegistry;
use crate::ingestion::IngestionService;
use crate::metrics::MetricsRegistry;
use crate::permissions::{AuditLog, PermissionService};
use crate::queue::{RedisWorkQueue, WorkQueue};
use crate::store::ObjectStore;
use crate::versioning::VersionEngine;

pub struct AppState {
    pub db: Arc<PgMetadataStore>,
    pub store: Arc<dyn ObjectStore>,
    pub queue: Arc<RedisWorkQueue>,
    pub bus: Arc<dyn EventBus>,
    pub metrics: Arc<MetricsRegistry>,
    pub auth: Arc<dyn AuthCapability>,
    pub ingestion: Arc<IngestionService>,
    pub download: Arc<DownloadService>,
    pub versions: Arc<VersionEngine>,
    pub permissions: Arc<PermissionService>,
    pub audit: Arc<AuditLog>,
    pub registry: Arc<ConnectionRegistry>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub async fn build(
        config: &AppConfig,
        pool: PgPool,
        store: Arc<dyn ObjectStore>,
        auth: Arc<dyn AuthCapability>,
        render: Arc<dyn PdfRenderCapability>,
        credit_check: Arc<dyn CreditCheckCapability>,
    ) -> AppResult<Self> {
        let metrics = Arc::new(MetricsRegistry::new());
        let db = Arc::new(PgMetadataStore::new(pool));
        let queue = Arc::new(RedisWorkQueue::connect(&config.queue_url).await.map_err(|e| {
            crate::error::AppError::QueueError(e.to_string())
        })?);
        let bus: Arc<dyn EventBus> =
            Arc::new(crate::bus::RedisEventBus::connect(&config.bus_url).map_err(|e| {
                crate::error::AppError::BusError(e.to_string())
            })?);

        let audit = Arc::new(AuditLog::new(db.clone()));
        let permissions = Arc::new(PermissionService::new(db.clone(), db.clone(), metrics.clone()));
        let versions = Arc::new(VersionEngine::new(
            db.clone(),
            db.clone(),
            store.clone(),
            render,
            audit.clone(),
            permissions.clone(),
            metrics.clone(),
            config.snapshot_window,
        ));
        let download = Arc::new(DownloadService::new(db.clone(), db.clone(), store.clone(), permissions.clone()));
        let ingestion = Arc::new(IngestionService::new(
            db.clone(),
            store.clone(),
            queue.clone() as Arc<dyn WorkQueue>,
            credit_check,
            metrics.clone(),
            config,
        ));

        Ok(Self {
            db,
            store,
            queue,
            bus,
            metrics,
            auth,
            ingestion,
            download,
            versions,
            permissions,
            audit,
            registry: Arc::new(ConnectionRegistry::new()),
        })
    }
}
