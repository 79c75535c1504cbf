//! Universal Proxy library
//!
//! A stateless forward proxy: fetches a caller-specified URL, rewrites HTML and
//! CSS resource references so follow-up requests flow back through the proxy,
//! and returns the result with a controlled set of headers.

use std::time::Instant;

pub mod api;
pub mod config;
pub mod fetch;
pub mod guard;
pub mod headers;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod proxy;
pub mod rewrite;

/// Application state shared across all handlers
pub struct AppState {
    pub config: config::AppConfig,
    pub handler: proxy::ProxyHandler,
    pub started_at: Instant,
}
