//! Proxy error handling

use thiserror::Error;

use crate::fetch::FetchError;
use crate::guard::UrlError;

/// Every way a proxy call can fail
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Missing target URL")]
    MissingTarget,

    #[error("Target URL is not valid percent-encoded UTF-8: {0}")]
    TargetEncoding(#[from] std::str::Utf8Error),

    #[error(transparent)]
    Url(#[from] UrlError),

    #[error("Unsupported HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Failed to decode request body: {0}")]
    BodyDecode(#[from] base64::DecodeError),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl ProxyError {
    /// HTTP status reported to the caller
    pub fn status_code(&self) -> u16 {
        match self {
            ProxyError::Url(_) => 403,
            ProxyError::Fetch(FetchError::Timeout(_)) => 504,
            ProxyError::MissingTarget => 400,
            _ => 500,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::MissingTarget => "missing_target",
            ProxyError::TargetEncoding(_) => "target_encoding",
            ProxyError::Url(UrlError::BlockedAddress(_)) => "blocked_address",
            ProxyError::Url(UrlError::InvalidPort(_)) => "invalid_port",
            ProxyError::Url(_) => "invalid_url",
            ProxyError::InvalidMethod(_) => "invalid_method",
            ProxyError::BodyDecode(_) => "body_decode",
            ProxyError::Fetch(err) => err.kind(),
        }
    }
}
