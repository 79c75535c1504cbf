//! Content rewriting for proxied documents
//!
//! HTML and CSS bodies have their resource references rewritten so the
//! browser keeps routing through the proxy. Everything else passes through
//! unchanged. Rewriting never fails a request: on any error the original bytes
//! are returned and a warning is logged.

pub mod css;
pub mod html;
pub mod urls;

use thiserror::Error;
use tracing::{info, warn};

/// Default proxy routing prefix
pub const DEFAULT_PROXY_BASE: &str = "/proxy/";

/// Content types handled by the HTML rewriter
pub const HTML_CONTENT_TYPES: &[&str] = &["text/html", "application/xhtml+xml"];

/// Content types handled by the CSS rewriter
pub const CSS_CONTENT_TYPES: &[&str] = &["text/css"];

/// Rewritable document kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Html,
    Css,
}

impl ContentKind {
    /// Detect from a `content-type` value (case-insensitive substring match)
    pub fn detect(content_type: &str) -> Option<Self> {
        let lower = content_type.to_ascii_lowercase();
        if HTML_CONTENT_TYPES.iter().any(|t| lower.contains(t)) {
            Some(ContentKind::Html)
        } else if CSS_CONTENT_TYPES.iter().any(|t| lower.contains(t)) {
            Some(ContentKind::Css)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Html => "html",
            ContentKind::Css => "css",
        }
    }
}

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("Body is not valid UTF-8: {0}")]
    Decode(#[from] std::str::Utf8Error),
}

/// Rewrites documents against a fixed proxy prefix
#[derive(Debug, Clone)]
pub struct ContentRewriter {
    proxy_base: String,
}

impl Default for ContentRewriter {
    fn default() -> Self {
        Self::new(DEFAULT_PROXY_BASE)
    }
}

impl ContentRewriter {
    pub fn new(proxy_base: impl Into<String>) -> Self {
        Self {
            proxy_base: proxy_base.into(),
        }
    }

    pub fn proxy_base(&self) -> &str {
        &self.proxy_base
    }

    /// Whether a response with this status and content type gets rewritten
    pub fn applies_to(status: u16, content_type: &str) -> bool {
        status == 200 && ContentKind::detect(content_type).is_some()
    }

    /// Rewrite `body`, falling back to the original bytes on failure
    pub fn rewrite(&self, body: &[u8], content_type: &str, original_url: &str) -> Vec<u8> {
        let Some(kind) = ContentKind::detect(content_type) else {
            return body.to_vec();
        };

        match self.try_rewrite(kind, body, original_url) {
            Ok(rewritten) => {
                info!(
                    kind = kind.as_str(),
                    original_size = body.len(),
                    rewritten_size = rewritten.len(),
                    target_url = %original_url,
                    "Content rewritten"
                );
                crate::metrics::record_rewrite(kind.as_str(), true);
                rewritten.into_bytes()
            }
            Err(err) => {
                warn!(
                    kind = kind.as_str(),
                    error = %err,
                    target_url = %original_url,
                    "Content rewrite failed, returning original body"
                );
                crate::metrics::record_rewrite(kind.as_str(), false);
                body.to_vec()
            }
        }
    }

    /// Rewrite without fallback
    pub fn try_rewrite(
        &self,
        kind: ContentKind,
        body: &[u8],
        original_url: &str,
    ) -> Result<String, RewriteError> {
        let text = std::str::from_utf8(body)?;
        Ok(match kind {
            ContentKind::Html => html::rewrite(text, original_url, &self.proxy_base),
            ContentKind::Css => css::rewrite(text, original_url, &self.proxy_base),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_kinds_case_insensitively() {
        assert_eq!(ContentKind::detect("text/html; charset=utf-8"), Some(ContentKind::Html));
        assert_eq!(ContentKind::detect("Application/XHTML+XML"), Some(ContentKind::Html));
        assert_eq!(ContentKind::detect("TEXT/CSS"), Some(ContentKind::Css));
        assert_eq!(ContentKind::detect("application/json"), None);
        assert_eq!(ContentKind::detect("text/javascript"), None);
    }

    #[test]
    fn test_applies_only_to_ok_documents() {
        assert!(ContentRewriter::applies_to(200, "text/html"));
        assert!(!ContentRewriter::applies_to(404, "text/html"));
        assert!(!ContentRewriter::applies_to(206, "text/css"));
        assert!(!ContentRewriter::applies_to(200, "image/png"));
    }

    #[test]
    fn test_rewrites_css_body() {
        let rewriter = ContentRewriter::default();
        let out = rewriter.rewrite(
            b"a { background: url(/bg.png) }",
            "text/css",
            "https://example.com/style.css",
        );
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#"a { background: url("/proxy/https%3A%2F%2Fexample.com%2Fbg.png") }"#
        );
    }

    #[test]
    fn test_custom_prefix() {
        let rewriter = ContentRewriter::new("/p/");
        let out = rewriter.rewrite(
            br#"<img src="/x.png">"#,
            "text/html",
            "https://example.com/",
        );
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#"<img src="/p/https%3A%2F%2Fexample.com%2Fx.png">"#
        );
    }

    #[test]
    fn test_invalid_utf8_falls_back_to_original() {
        let rewriter = ContentRewriter::default();
        let body = b"<head>\xff\xfe<img src=\"/x.png\">".to_vec();
        assert_eq!(
            rewriter.rewrite(&body, "text/html", "https://example.com/"),
            body
        );
        assert!(matches!(
            rewriter.try_rewrite(ContentKind::Html, &body, "https://example.com/"),
            Err(RewriteError::Decode(_))
        ));
    }

    #[test]
    fn test_other_types_pass_through() {
        let rewriter = ContentRewriter::default();
        let body = br#"{"url": "/x"}"#;
        assert_eq!(
            rewriter.rewrite(body, "application/json", "https://example.com/"),
            body.to_vec()
        );
    }
}
