//! Reference classification and proxy wrapping

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

/// Bytes left unescaped by URI-component encoding
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Percent-encode a full URL so it fits in a single path segment
pub fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}

/// `scheme://host[:port]` of `url`, or an empty string if it does not parse
pub fn origin(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return String::new();
    };
    let host = parsed.host_str().unwrap_or_default();
    match parsed.port() {
        Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
        None => format!("{}://{}", parsed.scheme(), host),
    }
}

/// Directory part of the URL path, always ending in `/`
pub fn directory_path(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return "/".to_string();
    };
    let path = parsed.path();
    match path.rfind('/') {
        Some(idx) if idx > 0 => path[..=idx].to_string(),
        _ => "/".to_string(),
    }
}

/// Resolve `reference` against `base`; returns the reference unchanged when either fails to parse
pub fn resolve(base: &str, reference: &str) -> String {
    Url::parse(base)
        .and_then(|base| base.join(reference))
        .map(|url| url.to_string())
        .unwrap_or_else(|_| reference.to_string())
}

/// Route an absolute URL through the proxy
pub fn to_proxy_url(absolute: &str, proxy_base: &str) -> String {
    format!("{}{}", proxy_base, encode_component(absolute))
}

/// How a reference found in a document relates to the document's URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference {
    /// `http://`, `https://` or `//`
    Absolute,
    /// Starts with a single `/`
    RootRelative,
    Relative,
    /// Matches one of the caller's skip prefixes
    Skipped,
}

impl Reference {
    pub fn classify(value: &str, skip_prefixes: &[&str]) -> Self {
        if value.starts_with("http://") || value.starts_with("https://") || value.starts_with("//") {
            Reference::Absolute
        } else if value.starts_with('/') {
            Reference::RootRelative
        } else if skip_prefixes.iter().any(|p| value.starts_with(p)) {
            Reference::Skipped
        } else {
            Reference::Relative
        }
    }
}

/// Base URLs a document's references resolve against
#[derive(Debug, Clone)]
pub struct DocumentBase {
    origin: String,
    directory: String,
}

impl DocumentBase {
    pub fn new(document_url: &str) -> Self {
        Self {
            origin: origin(document_url),
            directory: directory_path(document_url),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Absolute form of `value`, or `None` when it should be left as is
    pub fn absolutize(&self, value: &str, skip_prefixes: &[&str]) -> Option<String> {
        match Reference::classify(value, skip_prefixes) {
            Reference::Absolute => Some(match value.strip_prefix("//") {
                Some(rest) => format!("https://{}", rest),
                None => value.to_string(),
            }),
            Reference::RootRelative => Some(format!("{}{}", self.origin, value)),
            Reference::Relative => Some(resolve(
                &format!("{}{}", self.origin, self.directory),
                value,
            )),
            Reference::Skipped => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_component_matches_uri_component_rules() {
        assert_eq!(
            encode_component("https://example.com/a?b=c&d"),
            "https%3A%2F%2Fexample.com%2Fa%3Fb%3Dc%26d"
        );
        assert_eq!(encode_component("a-b_c.d!e~f*g'h(i)j"), "a-b_c.d!e~f*g'h(i)j");
        assert_eq!(encode_component("a b#é"), "a%20b%23%C3%A9");
    }

    #[test]
    fn test_origin_keeps_explicit_port() {
        assert_eq!(origin("https://example.com/a/b"), "https://example.com");
        assert_eq!(origin("http://example.com:8080/x"), "http://example.com:8080");
        assert_eq!(origin("http://example.com:80/x"), "http://example.com");
        assert_eq!(origin("::not a url"), "");
    }

    #[test]
    fn test_directory_path() {
        assert_eq!(directory_path("https://example.com/a/b/page.html"), "/a/b/");
        assert_eq!(directory_path("https://example.com/a/b/"), "/a/b/");
        assert_eq!(directory_path("https://example.com/page.html"), "/");
        assert_eq!(directory_path("https://example.com"), "/");
        assert_eq!(directory_path("garbage"), "/");
    }

    #[test]
    fn test_resolve_then_wrap() {
        let base = DocumentBase::new("https://example.com/a/b/page.html");
        let absolute = base.absolutize("../img/a.png", &[]).unwrap();
        assert_eq!(absolute, "https://example.com/a/img/a.png");
        assert_eq!(
            to_proxy_url(&absolute, "/proxy/"),
            "/proxy/https%3A%2F%2Fexample.com%2Fa%2Fimg%2Fa.png"
        );
    }

    #[test]
    fn test_absolutize_by_kind() {
        let base = DocumentBase::new("http://example.com:8080/docs/index.html");
        assert_eq!(
            base.absolutize("//cdn.example.net/x.js", &[]).as_deref(),
            Some("https://cdn.example.net/x.js")
        );
        assert_eq!(
            base.absolutize("http://other.org/y", &[]).as_deref(),
            Some("http://other.org/y")
        );
        assert_eq!(
            base.absolutize("/static/app.css", &[]).as_deref(),
            Some("http://example.com:8080/static/app.css")
        );
        assert_eq!(
            base.absolutize("img/logo.png", &[]).as_deref(),
            Some("http://example.com:8080/docs/img/logo.png")
        );
        assert_eq!(base.absolutize("#top", &["#"]), None);
    }

    #[test]
    fn test_skip_prefixes_only_apply_to_relative_references() {
        assert_eq!(Reference::classify("data:image/png;base64,AA", &["data:"]), Reference::Skipped);
        assert_eq!(Reference::classify("data:x", &[]), Reference::Relative);
        assert_eq!(Reference::classify("/#frag", &["#"]), Reference::RootRelative);
    }

    #[test]
    fn test_resolve_falls_back_to_reference() {
        assert_eq!(resolve("not a base", "x.png"), "x.png");
    }
}
