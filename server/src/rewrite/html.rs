//! HTML reference rewriting
//!
//! Tag-attribute pattern matching rather than a DOM parse. Known blind spots:
//! `srcset`, inline `style` attributes, `<style>` blocks and single-quoted
//! attribute values are not rewritten.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::urls::{encode_component, to_proxy_url, DocumentBase};

/// One rewritable tag/attribute pair
struct TagRule {
    pattern: Regex,
    /// Prefixes of relative values that are left alone
    skip: &'static [&'static str],
}

impl TagRule {
    fn new(tag: &str, attribute: &str, skip: &'static [&'static str]) -> Self {
        let pattern = Regex::new(&format!(
            r#"(?i)(<{tag}[^>]+{attribute}="?)([^"\s>]+)("?[^>]*>)"#
        ))
        .expect("tag rule pattern is valid");
        Self { pattern, skip }
    }
}

const RESOURCE_SKIP: &[&str] = &["#", "data:", "javascript:"];
const FORM_SKIP: &[&str] = &["#", "javascript:"];
const ANCHOR_SKIP: &[&str] = &["#", "mailto:", "tel:", "javascript:"];

static TAG_RULES: Lazy<Vec<TagRule>> = Lazy::new(|| {
    vec![
        TagRule::new("link", "href", RESOURCE_SKIP),
        TagRule::new("script", "src", RESOURCE_SKIP),
        TagRule::new("img", "src", RESOURCE_SKIP),
        TagRule::new("form", "action", FORM_SKIP),
        TagRule::new("a", "href", ANCHOR_SKIP),
    ]
});

static HEAD_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(<head[^>]*>)").expect("head pattern is valid"));

/// Rewrite tag references in `html` to route through `proxy_base`
pub fn rewrite(html: &str, document_url: &str, proxy_base: &str) -> String {
    let base = DocumentBase::new(document_url);

    let mut output = html.to_string();
    for rule in TAG_RULES.iter() {
        output = rule
            .pattern
            .replace_all(&output, |caps: &Captures| {
                match base.absolutize(&caps[2], rule.skip) {
                    Some(absolute) => format!(
                        "{}{}{}",
                        &caps[1],
                        to_proxy_url(&absolute, proxy_base),
                        &caps[3]
                    ),
                    None => caps[0].to_string(),
                }
            })
            .into_owned();
    }

    if !output.contains("<base ") {
        let base_tag = format!(
            r#"<base href="{}{}/">"#,
            proxy_base,
            encode_component(base.origin())
        );
        output = HEAD_OPEN
            .replace(&output, |caps: &Captures| format!("{}\n  {}", &caps[1], base_tag))
            .into_owned();
    }

    output
}
