//! Lightweight query surface over a fetched page
//!
//! Strategies only need visible text, links and a few attributes, so the
//! markup is scanned with regular expressions instead of building a DOM.

use std::sync::LazyLock;

use regex::Regex;
use reqwest::Url;

static SCRIPT_OR_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script>|<style\b[^>]*>.*?</style>|<!--.*?-->")
        .expect("valid script regex")
});

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"));

static ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\b[^>]*?\bhref\s*=\s*["']([^"']*)["'][^>]*>(.*?)</a>"#)
        .expect("valid anchor regex")
});

static NUMERIC_ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#(x[0-9a-fA-F]+|[0-9]+);").expect("valid entity regex"));

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// A hyperlink with its target resolved against the page URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub href: String,
    pub text: String,
}

/// A fetched page: its final URL plus raw markup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    url: String,
    html: String,
}

impl Document {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: html.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    /// Visible text with scripts, styles and tags removed and whitespace collapsed
    pub fn text(&self) -> String {
        let without_scripts = SCRIPT_OR_STYLE.replace_all(&self.html, " ");
        let without_tags = TAG.replace_all(&without_scripts, " ");
        let decoded = decode_entities(&without_tags);
        WHITESPACE.replace_all(&decoded, " ").trim().to_string()
    }

    /// Every anchor with an href; relative targets are resolved against the page URL
    pub fn links(&self) -> Vec<Link> {
        let base = Url::parse(&self.url).ok();

        ANCHOR
            .captures_iter(&self.html)
            .filter_map(|caps| {
                let href = decode_entities(caps[1].trim());
                let href = resolve(base.as_ref(), &href)?;
                let inner = TAG.replace_all(&caps[2], " ");
                let text = WHITESPACE
                    .replace_all(&decode_entities(&inner), " ")
                    .trim()
                    .to_string();
                Some(Link { href, text })
            })
            .collect()
    }

    /// Values of `attr` on every `tag` element, in document order
    pub fn attribute_values(&self, tag: &str, attr: &str) -> Vec<String> {
        let pattern = format!(
            r#"(?is)<{}\b[^>]*?\b{}\s*=\s*["']([^"']*)["']"#,
            regex::escape(tag),
            regex::escape(attr)
        );
        let Ok(regex) = Regex::new(&pattern) else {
            return Vec::new();
        };
        regex
            .captures_iter(&self.html)
            .map(|caps| decode_entities(&caps[1]))
            .collect()
    }

    /// `content` of the `<meta>` element whose `name` or `property` equals `name`
    pub fn meta_content(&self, name: &str) -> Option<String> {
        let pattern = format!(
            r#"(?is)<meta\b[^>]*?\b(?:name|property)\s*=\s*["']{}["'][^>]*?\bcontent\s*=\s*["']([^"']*)["']"#,
            regex::escape(name)
        );
        let regex = Regex::new(&pattern).ok()?;
        regex
            .captures(&self.html)
            .map(|caps| decode_entities(&caps[1]))
    }
}

fn resolve(base: Option<&Url>, href: &str) -> Option<String> {
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    match base {
        Some(base) => base.join(href).ok().map(String::from),
        None => Url::parse(href).ok().map(String::from),
    }
}

fn decode_entities(text: &str) -> String {
    let named = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'");

    let numeric = NUMERIC_ENTITY.replace_all(&named, |caps: &regex::Captures<'_>| {
        let code = &caps[1];
        let value = match code.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => code.parse().ok(),
        };
        value
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });

    // Last, so "&amp;lt;" stays "&lt;"
    numeric.replace("&amp;", "&")
}
