//! `docflow-cdc`: LISTEN/NOTIFY change-capture process (§4.5).

use std::sync::Arc;

use docflow_platform::bus::{EventBus, RedisEventBus};
use docflow_platform::cdc::ChangeCapture;
use docflow_platform::config::AppConfig;
use docflow_platform::metrics::MetricsRegistry;

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

    let bus: Arc<dyn EventBus> = match RedisEventBus::connect(&config.bus_url) {
        Ok(b) => Arc::new(b),
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to event bus");
            return std::process::ExitCode::from(2);
        }
    };

    let metrics = Arc::new(MetricsRegistry::new());
    let capture = ChangeCapture::new(config.metadata_url.clone(), bus, metrics);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(());
    });

    tracing::info!("starting docflow-cdc");
    match capture.run(shutdown_rx).await {
        Ok(()) => std::process::ExitCode::from(130),
        Err(e) => {
            tracing::error!(error = %e, "change capture exited with error");
            std::process::ExitCode::from(1)
        }
    }
}
