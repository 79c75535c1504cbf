//! Universal Proxy - SSRF-guarded forward proxy with resource rewriting
//!
//! This is the main entry point for the proxy service. It loads configuration,
//! wires the reqwest-backed fetch pipeline into the proxy handler and serves it
//! over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::http::HeaderName;
use tokio::signal;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use universal_proxy::api::create_router;
use universal_proxy::config::AppConfig;
use universal_proxy::fetch::ReqwestClient;
use universal_proxy::logging::init_logging;
use universal_proxy::proxy::ProxyHandler;
use universal_proxy::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load()?;

    // Initialize logging
    init_logging(&config.log_level)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Universal Proxy"
    );

    if config.metrics.enabled {
        universal_proxy::metrics::init_metrics()?;
        info!("Prometheus metrics initialized");
    }

    let client = ReqwestClient::new(config.proxy.max_redirects)
        .context("Failed to build HTTP client")?;
    let handler = ProxyHandler::new(Arc::new(client), &config.proxy);
    info!(
        route_prefix = %config.proxy.route_prefix,
        attempt_timeout_ms = config.proxy.attempt_timeout_ms,
        max_retries = config.proxy.max_retries,
        "Proxy handler initialized"
    );

    let state = Arc::new(AppState {
        config: config.clone(),
        handler,
        started_at: Instant::now(),
    });

    // Build the router with all routes and middleware
    let x_request_id = HeaderName::from_static("x-request-id");
    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid));

    // Bind to address
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!(%addr, "Listening on");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Start server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Universal Proxy stopped");
    Ok(())
}

/// Handle shutdown signals gracefully
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutting down...");
}
