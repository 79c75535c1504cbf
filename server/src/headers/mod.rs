//! Inbound header sanitization
//!
//! Only a fixed allow-list of caller headers is forwarded upstream. Hop-by-hop,
//! forwarding and CDN identity headers are always stripped.

use std::collections::{BTreeMap, HashMap};

/// Headers a caller may forward upstream
pub const ALLOWED_HEADERS: &[&str] = &[
    "accept",
    "accept-encoding",
    "accept-language",
    "authorization",
    "cache-control",
    "content-length",
    "content-type",
    "cookie",
    "origin",
    "referer",
    "user-agent",
    "x-requested-with",
    "x-api-key",
    "x-auth-token",
];

/// Headers that are never forwarded, even if allowed
pub const FILTERED_HEADERS: &[&str] = &[
    "host",
    "connection",
    "via",
    "x-forwarded-for",
    "x-forwarded-proto",
    "x-forwarded-host",
    "x-amz-cf-id",
    "x-amz-trace-id",
    "x-real-ip",
    "cf-ray",
    "cf-connecting-ip",
];

/// User agent sent when the caller supplied none
pub const DEFAULT_USER_AGENT: &str = "Universal-Proxy/1.0";

/// `ALLOWED_HEADERS` as a single header value
pub fn allowed_headers_value() -> String {
    ALLOWED_HEADERS.join(", ")
}

/// Sanitized request headers, keyed by lowercase name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundHeaders {
    inner: BTreeMap<String, String>,
}

impl OutboundHeaders {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.inner
    }
}

/// Build the outbound header set from raw caller headers
pub fn filter(raw: &HashMap<String, String>) -> OutboundHeaders {
    let mut inner: BTreeMap<String, String> = raw
        .iter()
        .filter_map(|(name, value)| {
            let name = name.to_ascii_lowercase();
            is_forwardable(&name).then(|| (name, value.clone()))
        })
        .collect();

    // An empty user-agent counts as missing
    if inner.get("user-agent").map_or(true, |v| v.is_empty()) {
        inner.insert("user-agent".to_string(), DEFAULT_USER_AGENT.to_string());
    }

    OutboundHeaders { inner }
}

fn is_forwardable(lower_name: &str) -> bool {
    ALLOWED_HEADERS.contains(&lower_name) && !FILTERED_HEADERS.contains(&lower_name)
}
