//! Request and result records exchanged with the detection pipeline

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Deserializer, Serialize};

use crate::detection::error::DetectionError;
use crate::version::VersionValue;

/// Longest accepted software name, in characters
pub const MAX_NAME_LENGTH: usize = 100;

static NAME_CHARSET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9\s\-_\.\+\(\)]+$").expect("valid name regex"));

static HOST_CHARSET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9\-\.]+$").expect("valid host regex"));

/// A piece of software whose current version should be detected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoftwareRequest {
    pub name: String,
    /// Absolute http(s) URL; scheme-less input is stored as `https://`
    #[serde(deserialize_with = "deserialize_url")]
    pub url: String,
    /// Name of the strategy to prefer, if it accepts the request
    #[serde(default, alias = "strategyHint")]
    pub strategy: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl SoftwareRequest {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: normalize_url(&url.into()),
            strategy: None,
            metadata: None,
        }
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    /// Lowercased URL, the form strategies match domains against
    pub fn url_lower(&self) -> String {
        self.url.to_lowercase()
    }

    /// Check the name charset/length and that the URL is an absolute
    /// http(s) URL with a plausible host
    pub fn validate(&self) -> Result<(), DetectionError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(DetectionError::Validation("name is empty".to_string()));
        }
        if name.chars().count() > MAX_NAME_LENGTH {
            return Err(DetectionError::Validation(format!(
                "name is longer than {} characters",
                MAX_NAME_LENGTH
            )));
        }
        if !NAME_CHARSET.is_match(name) {
            return Err(DetectionError::Validation(format!(
                "name contains unsupported characters: {}",
                name
            )));
        }

        let url = self.url.trim();
        if url.is_empty() {
            return Err(DetectionError::Validation("url is empty".to_string()));
        }
        if !has_http_scheme(url) {
            return Err(DetectionError::Validation(format!(
                "url is not an absolute http(s) url: {}",
                url
            )));
        }
        let parsed = Url::parse(url)
            .map_err(|e| DetectionError::Validation(format!("invalid url {}: {}", url, e)))?;

        match parsed.host_str() {
            Some(host) if HOST_CHARSET.is_match(host) => Ok(()),
            _ => Err(DetectionError::Validation(format!(
                "url has no valid host: {}",
                url
            ))),
        }
    }
}

fn has_http_scheme(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Trim `url` and prefix `https://` when it carries no scheme at all
fn normalize_url(url: &str) -> String {
    let url = url.trim();
    if url.is_empty() || has_http_scheme(url) || url.contains("://") {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}

fn deserialize_url<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(|url| normalize_url(&url))
}

/// Unnormalized output of a successful strategy run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRelease {
    pub version: String,
    pub download_url: Option<String>,
    pub release_date: Option<DateTime<Utc>>,
    pub file_size: Option<String>,
    pub checksum: Option<String>,
    /// Where the version came from, e.g. "github_api" or "page_text"
    pub source: String,
}

impl RawRelease {
    pub fn new(version: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            source: source.into(),
            ..Default::default()
        }
    }
}

/// Outcome of one detection, successful or not
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub name: String,
    pub version: Option<VersionValue>,
    pub download_url: Option<String>,
    pub release_date: Option<DateTime<Utc>>,
    pub file_size: Option<String>,
    pub checksum: Option<String>,
    pub success: bool,
    /// Present iff `success` is false
    pub error: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub strategy: Option<String>,
}

impl DetectionResult {
    pub fn succeeded(
        name: impl Into<String>,
        version: VersionValue,
        raw: RawRelease,
        strategy: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: Some(version),
            download_url: raw.download_url,
            release_date: raw.release_date,
            file_size: raw.file_size,
            checksum: raw.checksum,
            success: true,
            error: None,
            detected_at: Utc::now(),
            strategy: Some(strategy.into()),
        }
    }

    pub fn failed(name: impl Into<String>, error: &DetectionError, strategy: Option<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            download_url: None,
            release_date: None,
            file_size: None,
            checksum: None,
            success: false,
            error: Some(error.to_string()),
            detected_at: Utc::now(),
            strategy,
        }
    }

    /// Normalized version text, if detection succeeded
    pub fn version_string(&self) -> Option<String> {
        self.version.as_ref().map(ToString::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Chrome", "https://www.google.com/chrome/")]
    #[case("Visual Studio Code (x64)", "code.visualstudio.com")]
    #[case("node_js-18.x+lts", "http://nodejs.org/en/download")]
    #[case("local", "http://localhost:8080/releases")]
    fn validate_accepts_well_formed_requests(#[case] name: &str, #[case] url: &str) {
        assert_eq!(SoftwareRequest::new(name, url).validate(), Ok(()));
    }

    #[rstest]
    #[case("", "https://example.com")]
    #[case("   ", "https://example.com")]
    #[case("Bad/Name", "https://example.com")]
    #[case("微信", "https://example.com")]
    #[case("Chrome", "")]
    #[case("Chrome", "https://")]
    #[case("Chrome", "https://exa_mple.com")]
    fn validate_rejects_malformed_requests(#[case] name: &str, #[case] url: &str) {
        let result = SoftwareRequest::new(name, url).validate();

        assert!(matches!(result, Err(DetectionError::Validation(_))));
    }

    #[rstest]
    #[case("code.visualstudio.com", "https://code.visualstudio.com")]
    #[case("  tool.example.com/download ", "https://tool.example.com/download")]
    #[case("HTTP://Example.com/x", "HTTP://Example.com/x")]
    #[case("ftp://files.example.com", "ftp://files.example.com")]
    #[case("", "")]
    fn normalize_url_adds_https_to_scheme_less_urls(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_url(input), expected);
    }

    #[test]
    fn new_stores_normalized_url() {
        let request = SoftwareRequest::new("Tool", "tool.example.com/download");

        assert_eq!(request.url, "https://tool.example.com/download");
        assert_eq!(request.validate(), Ok(()));
    }

    #[rstest]
    #[case("tool.example.com/download")]
    #[case("ftp://files.example.com/tool.zip")]
    fn validate_rejects_urls_that_are_not_absolute_http(#[case] url: &str) {
        let request = SoftwareRequest {
            url: url.to_string(),
            ..SoftwareRequest::new("Tool", "https://placeholder.example.com")
        };

        let result = request.validate();

        assert!(matches!(result, Err(DetectionError::Validation(_))));
    }

    #[test]
    fn request_deserialization_normalizes_url() {
        let request: SoftwareRequest = serde_json::from_value(serde_json::json!({
            "name": "Zoom",
            "url": "zoom.us/download"
        }))
        .unwrap();

        assert_eq!(request.url, "https://zoom.us/download");
    }

    #[test]
    fn validate_rejects_overlong_name() {
        let name = "a".repeat(MAX_NAME_LENGTH + 1);

        let result = SoftwareRequest::new(name, "https://example.com").validate();

        assert!(matches!(result, Err(DetectionError::Validation(_))));
    }

    #[test]
    fn request_deserializes_strategy_hint_alias() {
        let request: SoftwareRequest = serde_json::from_value(serde_json::json!({
            "name": "Zoom",
            "url": "https://zoom.us/download",
            "strategyHint": "zoom"
        }))
        .unwrap();

        assert_eq!(request.strategy.as_deref(), Some("zoom"));
        assert_eq!(request.metadata, None);
    }

    #[test]
    fn failed_result_carries_error_and_no_version() {
        let result = DetectionResult::failed(
            "Zoom",
            &DetectionError::Fetch("unreachable".into()),
            Some("zoom".into()),
        );

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Fetch error: unreachable"));
        assert_eq!(result.version_string(), None);
    }
}
