//! News API proxy
//!
//! Single-binary Rust service that:
//! 1. Loads a pool of newsdata.io API keys from the environment
//! 2. Serves search, category and top-headline endpoints
//! 3. Sends each upstream call with the current key, blocking keys that hit
//!    their quota (429) or get rejected (403) and rotating past failures
//! 4. Exposes key pool status, a manual reset, health and Prometheus metrics

mod admin;
mod config;
mod error;
mod metrics;
mod news;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use key_pool::{RetryDriver, Rotator};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metrics_exporter_prometheus::PrometheusHandle;

use crate::admin::{AdminState, build_admin_router};
use crate::config::Config;
use crate::metrics::ServiceMetrics;
use crate::news::{NewsState, build_news_router};

/// How long in-flight requests may drain after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state for the health and metrics handlers
#[derive(Clone)]
struct AppState {
    rotator: Arc<Rotator>,
    metrics: ServiceMetrics,
    prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
///
/// Applies a concurrency limit layer based on `max_connections`, plus a CORS
/// layer when a browser origin is configured.
fn build_router(
    state: AppState,
    news: NewsState,
    max_connections: usize,
    cors_origin: Option<HeaderValue>,
) -> Router {
    let admin = AdminState::new(state.rotator.clone());
    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .merge(build_news_router(news))
        .merge(build_admin_router(admin))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections));

    if let Some(origin) = cors_origin {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods([Method::GET, Method::POST]),
        );
    }
    router
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting news-proxy");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let rotator = Arc::new(
        Rotator::with_system_clock(config.keys.api_keys.iter().map(|k| k.expose().clone()))
            .context("failed to build API key pool")?,
    );

    let max_attempts = config.max_attempts(rotator.len());
    info!(
        listen_addr = %config.server.listen_addr,
        base_url = %config.upstream.base_url,
        keys = rotator.len(),
        max_attempts,
        "configuration loaded"
    );

    let cors_origin = config
        .server
        .cors_origin
        .as_deref()
        .map(HeaderValue::from_str)
        .transpose()
        .context("invalid cors_origin")?;

    let metrics = ServiceMetrics::new();

    let news_state = NewsState {
        client: reqwest::Client::new(),
        driver: RetryDriver::new(rotator.clone()),
        base_url: config.upstream.base_url.clone(),
        key_param: config.upstream.key_param.clone(),
        timeout: Duration::from_secs(config.upstream.timeout_secs),
        max_attempts,
        metrics: metrics.clone(),
    };

    let app_state = AppState {
        rotator,
        metrics,
        prometheus: prometheus_handle,
    };

    let app = build_router(
        app_state,
        news_state,
        config.server.max_connections,
        cors_origin,
    );

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;

    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: key pool availability, uptime, requests served.
/// Returns 200 while at least one key is usable, 503 when every key is blocked.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.rotator.snapshot().await;
    let status = snapshot.status();
    let status_code = if status == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    let body = serde_json::json!({
        "status": status,
        "credentials_total": snapshot.total_credentials,
        "credentials_available": snapshot.available(),
        "credentials_blocked": snapshot.blocked(),
        "uptime_seconds": state.metrics.started_at.elapsed().as_secs(),
        "requests_served": state.metrics.requests_total.load(Ordering::Relaxed),
        "errors_total": state.metrics.errors_total.load(Ordering::Relaxed),
    });

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint, rendered in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
