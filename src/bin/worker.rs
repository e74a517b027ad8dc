//! `docflow-worker`: OCR worker pool process (§4.7). Run N of these for N
//! units of parallelism — each process is single-flight.

use std::sync::Arc;

use aws_sdk_s3::Client as S3Client;
use clap::Parser;
use docflow_platform::bus::{EventBus, RedisEventBus};
use docflow_platform::capabilities::{HttpOcrCapability, OcrCapability};
use docflow_platform::config::AppConfig;
use docflow_platform::db::PgMetadataStore;
use docflow_platform::metrics::MetricsRegistry;
use docflow_platform::queue::RedisWorkQueue;
use docflow_platform::store::{ObjectStore, S3ObjectStore};
use docflow_platform::worker::WorkerLoop;
use sqlx::postgres::PgPoolOptions;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, env = "OCR_SERVICE_URL")]
    ocr_url: String,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

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

    let bus: Arc<dyn EventBus> = match RedisEventBus::connect(&config.bus_url) {
        Ok(b) => Arc::new(b),
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to event bus");
            return std::process::ExitCode::from(2);
        }
    };

    let aws_cfg = aws_config::load_from_env().await;
    let store: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::new(S3Client::new(&aws_cfg), &config.object_store));

    let ocr: Arc<dyn OcrCapability> = Arc::new(HttpOcrCapability::new(reqwest::Client::new(), cli.ocr_url));

    let metrics = Arc::new(MetricsRegistry::new());

    let worker = WorkerLoop::new(queue, db, store, bus, ocr, metrics);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(());
    });

    tracing::info!("starting docflow-worker");
    worker.run(shutdown_rx).await;
    std::process::ExitCode::from(130)
}
