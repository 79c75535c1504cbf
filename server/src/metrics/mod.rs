//! Prometheus metrics export
//!
//! Recording functions are no-ops until [`init_metrics`] installs the recorder.

use std::time::Duration;

use axum::{http::StatusCode, response::IntoResponse};
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder (idempotent)
pub fn init_metrics() -> anyhow::Result<()> {
    METRICS_HANDLE.get_or_try_init(|| -> anyhow::Result<PrometheusHandle> {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full("uproxy_request_duration_seconds".to_string()),
                &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 95.0],
            )?
            .install_recorder()?;
        Ok(handle)
    })?;
    Ok(())
}

/// Record a completed proxy call
pub fn record_request(method: &str, status: u16, duration: Duration) {
    counter!(
        "uproxy_requests_total",
        "method" => method.to_ascii_uppercase(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("uproxy_request_duration_seconds").record(duration.as_secs_f64());
}

/// Record one upstream attempt, including retries
pub fn record_upstream_attempt() {
    counter!("uproxy_upstream_attempts_total").increment(1);
}

/// Record a call that ended in an error response
pub fn record_failure(kind: &'static str) {
    counter!("uproxy_failures_total", "kind" => kind).increment(1);
}

/// Record a rewrite and whether it succeeded
pub fn record_rewrite(kind: &'static str, success: bool) {
    let outcome = if success { "success" } else { "fallback" };
    counter!("uproxy_rewrites_total", "kind" => kind, "outcome" => outcome).increment(1);
}

/// Prometheus metrics endpoint handler
pub async fn metrics_handler() -> impl IntoResponse {
    match METRICS_HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [("Content-Type", "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
