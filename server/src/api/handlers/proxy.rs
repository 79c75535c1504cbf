//! Proxy endpoint
//!
//! Maps an HTTP request onto a [`ProxyEvent`] and the resulting
//! [`ProxyResponse`] back onto HTTP.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::Response,
};

use crate::api::ApiError;
use crate::models::{ProxyEvent, ProxyResponse};
use crate::AppState;

/// Catch-all handler for proxied paths
pub async fn proxy_request(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let event = to_event(&method, &uri, &headers, &body);
    let response = state.handler.handle(event).await;
    into_http(response)
}

/// Build the inbound call shape; the path stays percent-encoded
pub fn to_event(method: &Method, uri: &Uri, headers: &HeaderMap, body: &[u8]) -> ProxyEvent {
    let mut collected: HashMap<String, String> = HashMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        collected
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }

    let mut event = ProxyEvent::new(method.as_str(), uri.path());
    event.headers = collected;
    if body.is_empty() {
        event
    } else {
        event.with_binary_body(body)
    }
}

/// Turn the outbound call shape into an HTTP response
pub fn into_http(response: ProxyResponse) -> Result<Response, ApiError> {
    let status = StatusCode::from_u16(response.status_code)
        .map_err(|_| ApiError::InvalidStatus(response.status_code))?;
    let body = response.body_bytes()?;

    let mut builder = axum::http::Response::builder().status(status);
    for (name, value) in &response.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    Ok(builder.body(Body::from(body))?)
}
