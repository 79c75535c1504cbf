//! Outbound fetch pipeline
//!
//! Sends the sanitized request upstream through an injected [`HttpClient`],
//! with a per-attempt timeout and exponential backoff between attempts. Only
//! transport failures are retried; an upstream 4xx/5xx is a successful fetch
//! and is passed through untouched.

pub mod retry;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::{Client, Method};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::guard::ValidatedUrl;
use crate::headers::OutboundHeaders;

pub use retry::{retry_with_timeout, AttemptTimedOut, Backoff, RetryPolicy};

/// Content type assumed when upstream sends none
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Default redirect hop limit
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

/// Transport-level failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Network(String),
}

impl FetchError {
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Timeout(_) => "timeout",
            FetchError::Network(_) => "network",
        }
    }
}

impl From<AttemptTimedOut> for FetchError {
    fn from(err: AttemptTimedOut) -> Self {
        FetchError::Timeout(err.0)
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Network(err.to_string())
    }
}

/// Upstream response headers, lowercase names, repeated values joined with `", "`
pub type ResponseHeaders = BTreeMap<String, String>;

/// One outbound call as handed to the client
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: OutboundHeaders,
    pub body: Option<Vec<u8>>,
}

/// Fully buffered upstream response
#[derive(Debug, Clone, Default)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: ResponseHeaders,
    pub body: Vec<u8>,
}

/// HTTP transport used by the pipeline
///
/// Implementations follow redirects and decode response compression on their
/// own; the pipeline only sees the final, buffered response.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<UpstreamResponse, FetchError>;
}

/// [`HttpClient`] backed by `reqwest`
pub struct ReqwestClient {
    client: Client,
}

impl ReqwestClient {
    pub fn new(max_redirects: usize) -> Result<Self, FetchError> {
        let client = Client::builder()
            .redirect(Policy::limited(max_redirects))
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: OutboundRequest) -> Result<UpstreamResponse, FetchError> {
        let mut builder = self.client.request(request.method, request.url);

        for (name, value) in request.headers.iter() {
            // reqwest negotiates encoding and sizes the body itself; it only
            // decodes bodies for encodings it asked for.
            if name == "accept-encoding" || name == "content-length" {
                continue;
            }
            builder = builder.header(name, value);
        }

        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let body = response.bytes().await?.to_vec();

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

fn collect_headers(map: &reqwest::header::HeaderMap) -> ResponseHeaders {
    let mut headers = ResponseHeaders::new();
    for name in map.keys() {
        let values: Vec<&str> = map
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        if !values.is_empty() {
            headers.insert(name.as_str().to_string(), values.join(", "));
        }
    }
    headers
}

/// Result of a successful fetch
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub status: u16,
    pub headers: ResponseHeaders,
    pub body: Vec<u8>,
    pub content_type: String,
}

impl FetchOutcome {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_error_status(&self) -> bool {
        self.status >= 400
    }
}

impl From<UpstreamResponse> for FetchOutcome {
    fn from(response: UpstreamResponse) -> Self {
        let content_type = response
            .headers
            .get("content-type")
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        Self {
            status: response.status,
            headers: response.headers,
            body: response.body,
            content_type,
        }
    }
}

/// Retried, time-bounded upstream fetch
#[derive(Clone)]
pub struct FetchPipeline {
    client: Arc<dyn HttpClient>,
    policy: RetryPolicy,
}

impl FetchPipeline {
    pub fn new(client: Arc<dyn HttpClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch `url`, retrying transport failures under the pipeline's policy
    pub async fn execute(
        &self,
        url: &ValidatedUrl,
        method: Method,
        headers: OutboundHeaders,
        body: Option<Vec<u8>>,
    ) -> Result<FetchOutcome, FetchError> {
        let request = OutboundRequest {
            method,
            url: url.as_url().clone(),
            headers,
            body,
        };
        let client = &self.client;

        let response = retry_with_timeout(&self.policy, |attempt| {
            let request = request.clone();
            async move {
                debug!(
                    attempt = attempt + 1,
                    method = %request.method,
                    url = %request.url,
                    "Sending upstream request"
                );
                crate::metrics::record_upstream_attempt();
                client.send(request).await
            }
        })
        .await?;

        Ok(FetchOutcome::from(response))
    }
}
