//! API module for Universal Proxy
//!
//! Provides HTTP endpoints for:
//! - Proxied fetches (every path not listed below)
//! - Health checks
//! - Prometheus metrics

mod error;
mod handlers;

use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, routing::get, Router};

use crate::AppState;

pub use error::ApiError;
pub use handlers::proxy::{into_http, to_event};

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    // Preflights go to the proxy handler on every path
    let preflight = handlers::proxy::proxy_request;

    let mut router = Router::new()
        // Health check
        .route(
            "/health",
            get(handlers::health::health_check).options(preflight),
        );

    if state.config.metrics.enabled {
        router = router.route(
            "/metrics",
            get(crate::metrics::metrics_handler).options(preflight),
        );
    }

    router
        // Everything else is a proxy call, OPTIONS preflights included
        .fallback(handlers::proxy::proxy_request)
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .with_state(state)
}
