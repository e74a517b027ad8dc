//! `docflow-server`: HTTP + websocket gateway process (§6).

use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use aws_sdk_s3::Client as S3Client;
use clap::Parser;
use docflow_platform::capabilities::{
    AlwaysAllowCreditCheck, AuthCapability, CreditCheckCapability, HttpAuthCapability, HttpPdfRenderCapability,
    PdfRenderCapability,
};
use docflow_platform::config::AppConfig;
use docflow_platform::gateway::run_fanout;
use docflow_platform::http::{routes, AppState};
use docflow_platform::store::{ObjectStore, S3ObjectStore};
use sqlx::postgres::PgPoolOptions;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: String,

    #[arg(long, env = "AUTH_SERVICE_URL")]
    auth_url: Option<String>,

    #[arg(long, env = "PDF_RENDER_SERVICE_URL")]
    render_url: Option<String>,
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

    let pool = match PgPoolOptions::new().max_connections(20).connect(&config.metadata_url).await {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to metadata store");
            return std::process::ExitCode::from(2);
        }
    };

    let aws_cfg = aws_config::load_from_env().await;
    let store: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::new(S3Client::new(&aws_cfg), &config.object_store));

    let http_client = reqwest::Client::new();
    let auth: Arc<dyn AuthCapability> = match &cli.auth_url {
        Some(url) => Arc::new(HttpAuthCapability::new(http_client.clone(), url.clone())),
        None => {
            tracing::warn!("AUTH_SERVICE_URL not set, every request will be unauthenticated");
            Arc::new(UnconfiguredAuth)
        }
    };
    let render: Arc<dyn PdfRenderCapability> = match &cli.render_url {
        Some(url) => Arc::new(HttpPdfRenderCapability::new(http_client.clone(), url.clone())),
        None => {
            tracing::warn!("PDF_RENDER_SERVICE_URL not set, render requests will fail");
            Arc::new(UnconfiguredPdfRender)
        }
    };
    let credit_check: Arc<dyn CreditCheckCapability> = Arc::new(AlwaysAllowCreditCheck);

    let state = match AppState::build(&config, pool, store, auth, render, credit_check).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to assemble application state");
            return std::process::ExitCode::from(2);
        }
    };
    let state = web::Data::new(state);

    let bus = state.bus.clone();
    let registry = state.registry.clone();
    tokio::spawn(async move { run_fanout(bus, registry).await });

    tracing::info!(bind = %cli.bind, "starting docflow-server");

    let bind = cli.bind.clone();
    let server = HttpServer::new(move || App::new().app_data(state.clone()).configure(routes::configure)).bind(&bind);

    let server = match server {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to bind");
            return std::process::ExitCode::from(2);
        }
    };

    match server.run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server exited with error");
            std::process::ExitCode::from(1)
        }
    }
}

struct UnconfiguredAuth;

#[async_trait::async_trait]
impl AuthCapability for UnconfiguredAuth {
    async fn validate(
        &self,
        _session_token: &str,
    ) -> Result<docflow_platform::capabilities::AuthenticatedIdentity, docflow_platform::capabilities::CapabilityError>
    {
        Err(docflow_platform::capabilities::CapabilityError::Unauthenticated)
    }
}

struct UnconfiguredPdfRender;

#[async_trait::async_trait]
impl PdfRenderCapability for UnconfiguredPdfRender {
    async fn render_pdf(&self, _html: &str) -> Result<Vec<u8>, docflow_platform::capabilities::CapabilityError> {
        Err(docflow_platform::capabilities::CapabilityError::Permanent(
            "no PDF render service configured".into(),
        ))
    }
}
