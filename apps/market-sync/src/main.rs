//! Market Sync Binary
//!
//! Starts the live market data sync engine.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-sync
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `FEED_URL`: WebSocket endpoint of the market data feed
//!
//! ## Optional
//! - `FEED_API_KEY`: Bearer credential for the feed
//! - `FEED_RECONNECT_DELAY_MS`: Fixed reconnect delay (default: 5000)
//! - `FEED_IDLE_TIMEOUT_SECS`: Silent-connection timeout, 0 disables (default: 0)
//! - `SYNC_DEFAULT_REFRESH_MS`: Default live range period (default: 5000)
//! - `SYNC_OUTPUT_DIR`: Snapshot output directory (default: ./live-ranges)
//! - `SYNC_LIVE_RANGES`: Live ranges created at start-up
//! - `SYNC_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: market-sync)
//! - `RUST_LOG`: Log filter (default: market_sync=info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use market_sync::infrastructure::health::{HealthServer, HealthServerState};
use market_sync::infrastructure::telemetry;
use market_sync::{
    JsonFeedCodec, JsonFileRenderer, SyncConfig, SyncEngine, WebSocketTransport, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Err means a provider is already installed, which is fine
    let _ = rustls::crypto::ring::default_provider().install_default();

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting market sync");

    init_metrics().context("failed to install metrics recorder")?;

    let config = SyncConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let transport = WebSocketTransport::new(config.feed.url.clone(), config.feed.credentials.clone());
    let renderer = JsonFileRenderer::new(config.sync.output_dir.clone());
    let engine = Arc::new(SyncEngine::new(
        config.engine_config(),
        Arc::new(transport),
        Arc::new(JsonFeedCodec::new()),
        Arc::new(renderer),
    ));

    engine.signals().disconnected.connect(|()| {
        tracing::warn!("Feed disconnected, live ranges will go stale until reconnect");
    });

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&engine),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    engine.start();

    for range in &config.sync.live_ranges {
        if let Err(e) = engine.create_live_range(
            range.id.clone(),
            range.securities.clone(),
            range.fields.clone(),
            range.period,
        ) {
            tracing::error!(range_id = %range.id, error = %e, "Failed to create configured live range");
        }
    }

    tracing::info!(live_ranges = engine.status().live_ranges, "Market sync ready");

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, engine.shutdown())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Engine shutdown timed out"
        );
    }
    if let Err(e) = health_task.await {
        tracing::warn!(error = %e, "Health server task ended abnormally");
    }

    tracing::info!("Market sync stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &SyncConfig) {
    tracing::info!(
        feed_url = %config.feed.url,
        authenticated = config.feed.credentials.is_some(),
        reconnect_delay_ms = u64::try_from(config.feed.reconnect_delay.as_millis()).unwrap_or(u64::MAX),
        idle_timeout_secs = config.feed.idle_timeout.map(|d| d.as_secs()),
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        output_dir = %config.sync.output_dir.display(),
        default_refresh_ms = u64::try_from(config.sync.default_refresh.as_millis()).unwrap_or(u64::MAX),
        live_ranges = config.sync.live_ranges.len(),
        "Live range settings"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
