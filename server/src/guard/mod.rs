//! SSRF guard for proxy targets
//!
//! Validates a caller-supplied URL against the protocol, address-range and
//! port policy before anything is sent upstream. Checks are made against the
//! literal host only; names are never resolved here, so a DNS name that points
//! at a private address is not caught by this layer.

use once_cell::sync::Lazy;
use regex::RegexSet;
use thiserror::Error;
use url::{Host, Url};

/// Schemes the proxy will forward to
pub const ALLOWED_PROTOCOLS: &[&str] = &["http", "https"];

/// Host patterns that are never proxied (loopback, RFC 1918, link-local, IPv6 ULA/link-local)
pub const BLOCKED_HOST_PATTERNS: &[&str] = &[
    r"^127\.",
    r"^10\.",
    r"^172\.(1[6-9]|2[0-9]|3[0-1])\.",
    r"^192\.168\.",
    r"^169\.254\.",
    r"^::1$",
    r"^fc00:",
    r"^fe80:",
];

/// Lowest explicit port accepted
pub const MIN_PORT: u16 = 80;

static BLOCKED_HOSTS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new(BLOCKED_HOST_PATTERNS).expect("blocked host patterns are valid")
});

/// Reasons a target URL is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlError {
    #[error("URL validation failed: {0}")]
    Invalid(String),

    #[error("URL validation failed: protocol not allowed: {0}:")]
    UnsupportedProtocol(String),

    #[error("URL validation failed: access to internal address denied: {0}")]
    BlockedAddress(String),

    #[error("URL validation failed: invalid port: {0}")]
    InvalidPort(u16),
}

/// A target URL that passed every policy check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUrl {
    url: Url,
}

impl ValidatedUrl {
    pub fn as_url(&self) -> &Url {
        &self.url
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Hostname as matched by the policy (IPv6 without brackets)
    pub fn host(&self) -> String {
        policy_hostname(&self.url).unwrap_or_default()
    }

    /// Explicit port, `None` when the URL uses the scheme default
    pub fn port(&self) -> Option<u16> {
        self.url.port()
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn into_url(self) -> Url {
        self.url
    }
}

impl std::fmt::Display for ValidatedUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// Validate and normalize a proxy target
pub fn validate(raw: &str) -> Result<ValidatedUrl, UrlError> {
    let url = Url::parse(raw).map_err(|e| UrlError::Invalid(format!("{}: {}", e, raw)))?;

    if !ALLOWED_PROTOCOLS.contains(&url.scheme()) {
        return Err(UrlError::UnsupportedProtocol(url.scheme().to_string()));
    }

    let hostname = policy_hostname(&url)
        .ok_or_else(|| UrlError::Invalid(format!("missing host: {}", raw)))?;

    if is_blocked_host(&hostname) {
        return Err(UrlError::BlockedAddress(hostname));
    }

    if let Some(port) = url.port() {
        if port < MIN_PORT {
            return Err(UrlError::InvalidPort(port));
        }
    }

    Ok(ValidatedUrl { url })
}

/// Whether a bare hostname matches any blocked address pattern
pub fn is_blocked_host(hostname: &str) -> bool {
    BLOCKED_HOSTS.is_match(hostname)
}

fn policy_hostname(url: &Url) -> Option<String> {
    match url.host()? {
        Host::Domain(domain) => Some(domain.to_string()),
        Host::Ipv4(addr) => Some(addr.to_string()),
        Host::Ipv6(addr) => Some(addr.to_string()),
    }
}
