//! CSS `url(...)` rewriting

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::urls::{to_proxy_url, DocumentBase};

const CSS_SKIP: &[&str] = &["#", "data:"];

static CSS_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)url\s*\(\s*['"]?([^'")]+)['"]?\s*\)"#).expect("css url pattern is valid")
});

/// Rewrite every `url(...)` in `css` to route through `proxy_base`
pub fn rewrite(css: &str, document_url: &str, proxy_base: &str) -> String {
    let base = DocumentBase::new(document_url);

    CSS_URL
        .replace_all(css, |caps: &Captures| match base.absolutize(&caps[1], CSS_SKIP) {
            Some(absolute) => format!(r#"url("{}")"#, to_proxy_url(&absolute, proxy_base)),
            None => caps[0].to_string(),
        })
        .into_owned()
}
