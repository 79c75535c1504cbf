//! Proxy request orchestration
//!
//! Drives one call through validation, header sanitization, the upstream
//! fetch and optional rewriting, and always produces a response: failures are
//! mapped to a JSON error body with the matching status code.

mod error;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use percent_encoding::percent_decode_str;
use reqwest::{Method, StatusCode};
use tracing::{error, info, warn};

use crate::config::ProxySettings;
use crate::fetch::{FetchOutcome, FetchPipeline, HttpClient};
use crate::headers::allowed_headers_value;
use crate::models::{ErrorBody, ProxyEvent, ProxyResponse};
use crate::rewrite::ContentRewriter;
use crate::{guard, headers};

pub use error::ProxyError;

/// Methods advertised to browsers
pub const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, PATCH, OPTIONS";

/// Methods a caller may use; anything else is rejected before going upstream
pub const STANDARD_METHODS: &[&str] = &["GET", "HEAD", "POST", "PUT", "DELETE", "PATCH", "OPTIONS"];

/// Preflight cache lifetime in seconds
pub const PREFLIGHT_MAX_AGE: &str = "86400";

/// Upstream headers copied onto the response
pub const PRESERVED_RESPONSE_HEADERS: &[&str] = &["cache-control", "expires", "last-modified", "etag"];

/// Cache policy used when upstream sends none
pub const DEFAULT_CACHE_CONTROL: &str = "public, max-age=3600";

/// CORS headers present on every response
pub fn cors_headers() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("access-control-allow-origin".to_string(), "*".to_string()),
        ("access-control-allow-methods".to_string(), ALLOWED_METHODS.to_string()),
        ("access-control-allow-headers".to_string(), allowed_headers_value()),
    ])
}

impl ProxyResponse {
    /// Answer to a CORS preflight
    pub fn preflight() -> Self {
        let mut headers = cors_headers();
        headers.insert("access-control-max-age".to_string(), PREFLIGHT_MAX_AGE.to_string());
        headers.insert("vary".to_string(), "Origin".to_string());

        Self {
            status_code: 200,
            headers,
            body: String::new(),
            is_base64_encoded: false,
        }
    }

    /// JSON error response for a failed call
    pub fn from_error(err: &ProxyError) -> Self {
        let mut headers = cors_headers();
        headers.insert("content-type".to_string(), "application/json".to_string());

        let body = serde_json::to_string(&ErrorBody::new(err.to_string()))
            .unwrap_or_else(|_| r#"{"error":"Proxy request failed"}"#.to_string());

        Self {
            status_code: err.status_code(),
            headers,
            body,
            is_base64_encoded: false,
        }
    }
}

/// Stateless handler for proxy calls
#[derive(Clone)]
pub struct ProxyHandler {
    pipeline: FetchPipeline,
    rewriter: ContentRewriter,
    route_prefix: String,
}

impl ProxyHandler {
    pub fn new(client: Arc<dyn HttpClient>, settings: &ProxySettings) -> Self {
        Self {
            pipeline: FetchPipeline::new(client, settings.retry_policy()),
            rewriter: ContentRewriter::new(settings.route_prefix.clone()),
            route_prefix: settings.route_prefix.clone(),
        }
    }

    pub fn route_prefix(&self) -> &str {
        &self.route_prefix
    }

    /// Handle one call; never fails
    pub async fn handle(&self, event: ProxyEvent) -> ProxyResponse {
        let started = Instant::now();

        if event.method.eq_ignore_ascii_case("OPTIONS") {
            return ProxyResponse::preflight();
        }

        let response = match self.forward(&event, started).await {
            Ok(response) => response,
            Err(err) => {
                error!(
                    error = %err,
                    kind = err.kind(),
                    details = ?err,
                    duration_ms = started.elapsed().as_millis() as u64,
                    target_url = %event.path,
                    "Proxy request failed"
                );
                crate::metrics::record_failure(err.kind());
                ProxyResponse::from_error(&err)
            }
        };

        crate::metrics::record_request(
            method_label(&event.method),
            response.status_code,
            started.elapsed(),
        );
        response
    }

    async fn forward(&self, event: &ProxyEvent, started: Instant) -> Result<ProxyResponse, ProxyError> {
        let method = parse_method(&event.method)?;
        let target_url = self.target_url(&event.path)?;
        let target = guard::validate(&target_url)?;

        info!(
            method = %event.method,
            target_url = %target_url,
            user_agent = %caller_header(event, "user-agent").unwrap_or("unknown"),
            "Proxy request started"
        );

        let outbound_headers = headers::filter(&event.headers);
        let body = request_body(event)?;

        let outcome = self
            .pipeline
            .execute(&target, method, outbound_headers, body)
            .await?;

        if outcome.is_error_status() {
            warn!(
                status = outcome.status,
                status_text = StatusCode::from_u16(outcome.status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or_default(),
                target_url = %target_url,
                "Upstream returned error status"
            );
        }

        let needs_rewriting = ContentRewriter::applies_to(outcome.status, &outcome.content_type);
        let body = if needs_rewriting {
            self.rewriter
                .rewrite(&outcome.body, &outcome.content_type, &target_url)
        } else {
            outcome.body.clone()
        };

        info!(
            status = outcome.status,
            content_type = %outcome.content_type,
            response_size = outcome.body.len(),
            needs_rewriting,
            duration_ms = started.elapsed().as_millis() as u64,
            "Proxy request completed"
        );

        Ok(ProxyResponse {
            status_code: outcome.status,
            headers: response_headers(&outcome),
            body: STANDARD.encode(body),
            is_base64_encoded: true,
        })
    }

    /// Strip the route prefix and percent-decode the remainder once
    fn target_url(&self, path: &str) -> Result<String, ProxyError> {
        let encoded = path.strip_prefix(self.route_prefix.as_str()).unwrap_or(path);
        if encoded.is_empty() {
            return Err(ProxyError::MissingTarget);
        }
        Ok(percent_decode_str(encoded).decode_utf8()?.into_owned())
    }
}

fn parse_method(raw: &str) -> Result<Method, ProxyError> {
    let known = method_label(raw);
    if known == "OTHER" {
        return Err(ProxyError::InvalidMethod(raw.to_string()));
    }
    Method::from_bytes(known.as_bytes()).map_err(|_| ProxyError::InvalidMethod(raw.to_string()))
}

/// Bounded metrics label: the standard method name or `OTHER`
fn method_label(raw: &str) -> &'static str {
    STANDARD_METHODS
        .iter()
        .find(|m| m.eq_ignore_ascii_case(raw))
        .copied()
        .unwrap_or("OTHER")
}

fn caller_header<'a>(event: &'a ProxyEvent, name: &str) -> Option<&'a str> {
    event
        .headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn request_body(event: &ProxyEvent) -> Result<Option<Vec<u8>>, ProxyError> {
    match event.body.as_deref() {
        None | Some("") => Ok(None),
        Some(body) if event.is_base64_encoded => Ok(Some(STANDARD.decode(body)?)),
        Some(body) => Ok(Some(body.as_bytes().to_vec())),
    }
}

fn response_headers(outcome: &FetchOutcome) -> BTreeMap<String, String> {
    let mut headers = cors_headers();
    headers.insert("content-type".to_string(), outcome.content_type.clone());
    headers.insert("vary".to_string(), "Origin".to_string());

    for name in PRESERVED_RESPONSE_HEADERS {
        if let Some(value) = outcome.header(name).filter(|v| !v.is_empty()) {
            headers.insert(name.to_string(), value.to_string());
        }
    }

    headers
        .entry("cache-control".to_string())
        .or_insert_with(|| DEFAULT_CACHE_CONTROL.to_string());

    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    use crate::fetch::{FetchError, MockHttpClient, ResponseHeaders, UpstreamResponse};

    fn handler(client: MockHttpClient) -> ProxyHandler {
        ProxyHandler::new(Arc::new(client), &ProxySettings::default())
    }

    fn upstream(status: u16, headers: &[(&str, &str)], body: &str) -> UpstreamResponse {
        UpstreamResponse {
            status,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<ResponseHeaders>(),
            body: body.as_bytes().to_vec(),
        }
    }

    fn error_message(response: &ProxyResponse) -> String {
        let value: serde_json::Value = serde_json::from_str(&response.body).unwrap();
        assert!(value["timestamp"].is_string());
        value["error"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_options_short_circuits() {
        let mut client = MockHttpClient::new();
        client.expect_send().never();

        let response = handler(client)
            .handle(ProxyEvent::new("OPTIONS", "/anything/at/all"))
            .await;

        assert_eq!(response.status_code, 200);
        assert_eq!(response.body, "");
        assert_eq!(response.header("Access-Control-Allow-Origin"), Some("*"));
        assert_eq!(response.header("access-control-allow-methods"), Some(ALLOWED_METHODS));
        assert_eq!(
            response.header("access-control-allow-headers"),
            Some(allowed_headers_value().as_str())
        );
        assert_eq!(response.header("access-control-max-age"), Some("86400"));
    }

    #[tokio::test]
    async fn test_html_page_is_rewritten_and_base64_encoded() {
        let mut client = MockHttpClient::new();
        client
            .expect_send()
            .withf(|req| req.url.as_str() == "https://example.com/" && req.method == Method::GET)
            .times(1)
            .returning(|_| {
                Ok(upstream(
                    200,
                    &[("content-type", "text/html; charset=utf-8"), ("etag", "\"v1\"")],
                    r#"<html><head></head><body><img src="/logo.png"></body></html>"#,
                ))
            });

        let response = handler(client)
            .handle(ProxyEvent::new("GET", "/proxy/https%3A%2F%2Fexample.com%2F"))
            .await;

        assert_eq!(response.status_code, 200);
        assert!(response.is_base64_encoded);
        assert_eq!(response.header("content-type"), Some("text/html; charset=utf-8"));
        assert_eq!(response.header("etag"), Some("\"v1\""));
        assert_eq!(response.header("cache-control"), Some(DEFAULT_CACHE_CONTROL));
        assert_eq!(response.header("vary"), Some("Origin"));

        let body = String::from_utf8(response.body_bytes().unwrap()).unwrap();
        assert!(body.contains(r#"<base href="/proxy/https%3A%2F%2Fexample.com/">"#));
        assert!(body.contains(r#"<img src="/proxy/https%3A%2F%2Fexample.com%2Flogo.png">"#));
    }

    #[tokio::test]
    async fn test_upstream_error_status_is_mirrored_without_rewrite() {
        let mut client = MockHttpClient::new();
        client.expect_send().times(1).returning(|_| {
            Ok(upstream(
                404,
                &[("content-type", "text/html"), ("cache-control", "no-store")],
                r#"<head></head><a href="/home">"#,
            ))
        });

        let response = handler(client)
            .handle(ProxyEvent::new("GET", "/proxy/https%3A%2F%2Fexample.com%2Fmissing"))
            .await;

        assert_eq!(response.status_code, 404);
        assert_eq!(response.header("cache-control"), Some("no-store"));
        assert_eq!(
            response.body_bytes().unwrap(),
            br#"<head></head><a href="/home">"#.to_vec()
        );
    }

    #[tokio::test]
    async fn test_binary_passthrough_defaults_content_type() {
        let mut client = MockHttpClient::new();
        client
            .expect_send()
            .returning(|_| Ok(UpstreamResponse {
                status: 200,
                headers: ResponseHeaders::new(),
                body: vec![0, 159, 146, 150],
            }));

        let response = handler(client)
            .handle(ProxyEvent::new("GET", "/proxy/https%3A%2F%2Fexample.com%2Fblob"))
            .await;

        assert_eq!(response.header("content-type"), Some("application/octet-stream"));
        assert_eq!(response.body_bytes().unwrap(), vec![0, 159, 146, 150]);
    }

    #[tokio::test]
    async fn test_blocked_target_returns_403() {
        let mut client = MockHttpClient::new();
        client.expect_send().never();

        let response = handler(client)
            .handle(ProxyEvent::new("GET", "/proxy/http%3A%2F%2F127.0.0.1%2Fadmin"))
            .await;

        assert_eq!(response.status_code, 403);
        assert!(!response.is_base64_encoded);
        assert_eq!(response.header("content-type"), Some("application/json"));
        assert_eq!(response.header("access-control-allow-origin"), Some("*"));
        assert!(error_message(&response).contains("127.0.0.1"));
    }

    #[tokio::test]
    async fn test_missing_target_returns_400() {
        let mut client = MockHttpClient::new();
        client.expect_send().never();

        let response = handler(client).handle(ProxyEvent::new("GET", "/proxy/")).await;

        assert_eq!(response.status_code, 400);
        assert_eq!(error_message(&response), "Missing target URL");
    }

    #[tokio::test]
    async fn test_path_without_prefix_is_validated_as_is() {
        let mut client = MockHttpClient::new();
        client.expect_send().never();

        let response = handler(client).handle(ProxyEvent::new("GET", "/elsewhere")).await;

        assert_eq!(response.status_code, 403);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_failure_returns_500_after_retries() {
        let mut client = MockHttpClient::new();
        client
            .expect_send()
            .times(3)
            .returning(|_| Err(FetchError::Network("connection refused".into())));

        let response = handler(client)
            .handle(ProxyEvent::new("GET", "/proxy/https%3A%2F%2Fexample.com%2F"))
            .await;

        assert_eq!(response.status_code, 500);
        assert!(error_message(&response).contains("connection refused"));
    }

    #[tokio::test]
    async fn test_timeout_returns_504() {
        let mut client = MockHttpClient::new();
        client
            .expect_send()
            .returning(|_| Err(FetchError::Timeout(std::time::Duration::from_secs(30))));
        let settings = ProxySettings {
            max_retries: 0,
            ..ProxySettings::default()
        };

        let response = ProxyHandler::new(Arc::new(client), &settings)
            .handle(ProxyEvent::new("GET", "/proxy/https%3A%2F%2Fexample.com%2F"))
            .await;

        assert_eq!(response.status_code, 504);
    }

    #[tokio::test]
    async fn test_forwards_sanitized_headers_and_decoded_body() {
        let mut client = MockHttpClient::new();
        client
            .expect_send()
            .withf(|req| {
                req.method == Method::POST
                    && req.headers.get("x-api-key") == Some("k")
                    && req.headers.get("user-agent") == Some("tester/1.0")
                    && !req.headers.contains("x-forwarded-for")
                    && req.body.as_deref() == Some([1u8, 2, 3].as_slice())
            })
            .times(1)
            .returning(|_| Ok(upstream(201, &[("content-type", "application/json")], "{}")));

        let event = ProxyEvent::new("post", "/proxy/https%3A%2F%2Fapi.example.com%2Fv1%2Fitems")
            .with_header("X-Api-Key", "k")
            .with_header("User-Agent", "tester/1.0")
            .with_header("X-Forwarded-For", "1.2.3.4")
            .with_binary_body(&[1, 2, 3]);

        let response = handler(client).handle(event).await;

        assert_eq!(response.status_code, 201);
        assert_eq!(response.body_bytes().unwrap(), b"{}");
    }

    #[tokio::test]
    async fn test_bad_base64_body_returns_500() {
        let mut client = MockHttpClient::new();
        client.expect_send().never();

        let mut event = ProxyEvent::new("POST", "/proxy/https%3A%2F%2Fexample.com%2F");
        event.body = Some("***not base64***".to_string());
        event.is_base64_encoded = true;

        let response = handler(client).handle(event).await;

        assert_eq!(response.status_code, 500);
        assert!(error_message(&response).starts_with("Failed to decode request body"));
    }

    #[tokio::test]
    async fn test_unknown_method_never_reaches_upstream() {
        let mut client = MockHttpClient::new();
        client.expect_send().never();

        let response = handler(client)
            .handle(ProxyEvent::new("FOO", "/proxy/https%3A%2F%2Fexample.com%2F"))
            .await;

        assert_eq!(response.status_code, 500);
        assert_eq!(error_message(&response), "Unsupported HTTP method: FOO");
    }

    #[test]
    fn test_method_label_is_bounded() {
        assert_eq!(method_label("get"), "GET");
        assert_eq!(method_label("HEAD"), "HEAD");
        assert_eq!(method_label("RANDOM3"), "OTHER");
        assert_eq!(parse_method("patch").unwrap(), Method::PATCH);
        assert!(matches!(parse_method("TRACE"), Err(ProxyError::InvalidMethod(_))));
    }

    #[tokio::test]
    async fn test_expires_and_last_modified_are_preserved() {
        let mut client = MockHttpClient::new();
        client.expect_send().times(1).returning(|_| {
            Ok(upstream(
                200,
                &[
                    ("content-type", "application/json"),
                    ("expires", "Thu, 01 Jan 2026 00:00:00 GMT"),
                    ("last-modified", "Wed, 31 Dec 2025 00:00:00 GMT"),
                    ("set-cookie", "a=b"),
                ],
                "{}",
            ))
        });

        let response = handler(client)
            .handle(ProxyEvent::new("GET", "/proxy/https%3A%2F%2Fexample.com%2Fdata"))
            .await;

        assert_eq!(response.header("expires"), Some("Thu, 01 Jan 2026 00:00:00 GMT"));
        assert_eq!(response.header("last-modified"), Some("Wed, 31 Dec 2025 00:00:00 GMT"));
        assert_eq!(response.header("set-cookie"), None);
        assert_eq!(response.header("cache-control"), Some(DEFAULT_CACHE_CONTROL));
    }

    #[tokio::test]
    async fn test_empty_user_agent_is_replaced_upstream() {
        let mut client = MockHttpClient::new();
        client
            .expect_send()
            .withf(|req| req.headers.get("user-agent") == Some(crate::headers::DEFAULT_USER_AGENT))
            .times(1)
            .returning(|_| Ok(upstream(204, &[], "")));

        let event = ProxyEvent::new("GET", "/proxy/https%3A%2F%2Fexample.com%2F")
            .with_header("User-Agent", "");
        let response = handler(client).handle(event).await;

        assert_eq!(response.status_code, 204);
    }

    #[test]
    fn test_target_url_is_decoded_once() {
        let handler = handler(MockHttpClient::new());
        assert_eq!(
            handler
                .target_url("/proxy/https%3A%2F%2Fexample.com%2Fa%3Fq%3D%2525")
                .unwrap(),
            "https://example.com/a?q=%25"
        );
        assert!(matches!(
            handler.target_url("/proxy/%FF"),
            Err(ProxyError::TargetEncoding(_))
        ));
    }
}
