//! ThaiGold - Thai gold price service
//!
//! Polls the gold price sources on an adaptive schedule and serves the
//! latest price, history and statistics over HTTP.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use thaigold::config::AppConfig;
use thaigold::service::GoldService;

fn init_tracing(format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.logging.format);

    tracing::info!("🥇 ThaiGold v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(config = %config, "Configuration loaded");

    let service = Arc::new(GoldService::from_config(&config)?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = service.spawn_scheduler(shutdown_rx);

    serve(&config, service.clone()).await?;

    tracing::info!("Shutting down...");
    shutdown_tx.send(true).ok();
    scheduler.await.context("Scheduler task panicked")?;

    tracing::info!("👋 ThaiGold stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}

#[cfg(feature = "api")]
async fn serve(config: &AppConfig, service: Arc<GoldService>) -> Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("🌐 HTTP API listening on http://{}", addr);

    axum::serve(listener, thaigold::api::create_router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")
}

#[cfg(not(feature = "api"))]
async fn serve(_config: &AppConfig, _service: Arc<GoldService>) -> Result<()> {
    shutdown_signal().await;
    Ok(())
}
