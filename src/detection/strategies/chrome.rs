//! Google Chrome: version-history API first, download page second

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::detection::error::DetectionError;
use crate::detection::strategies::{builtin_pattern, first_capture};
use crate::detection::strategy::{Collaborators, Strategy, StrategyStats};
use crate::detection::types::{RawRelease, SoftwareRequest};

/// Default version-history endpoint for the stable macOS channel
const DEFAULT_API_URL: &str =
    "https://versionhistory.googleapis.com/v1/chrome/platforms/mac/channels/stable/versions";

const DOWNLOAD_URL: &str = "https://www.google.com/chrome/";

const DOMAINS: &[&str] = &["google.com/chrome", "chrome.google.com"];

#[derive(Debug, Deserialize)]
struct VersionHistory {
    #[serde(default)]
    versions: Vec<VersionEntry>,
}

#[derive(Debug, Deserialize)]
struct VersionEntry {
    version: String,
}

pub struct ChromeStrategy {
    api_url: String,
    page_patterns: Vec<Regex>,
    stats: StrategyStats,
}

impl ChromeStrategy {
    /// Creates a ChromeStrategy querying a custom version-history URL
    pub fn new(api_url: &str) -> Self {
        Self {
            api_url: api_url.to_string(),
            page_patterns: vec![
                builtin_pattern(r"(?i)Chrome\s+(\d+\.\d+\.\d+\.\d+)"),
                builtin_pattern(r"(?i)版本\s+(\d+\.\d+\.\d+\.\d+)"),
                builtin_pattern(r"(?i)Version\s+(\d+\.\d+\.\d+\.\d+)"),
            ],
            stats: StrategyStats::new("chrome"),
        }
    }

    async fn detect_via_api(&self, collaborators: &Collaborators) -> Result<RawRelease, DetectionError> {
        let response = collaborators
            .api
            .request_json(&self.api_url, &[])
            .await
            .ok_or_else(|| DetectionError::Fetch("Chrome version API unreachable".to_string()))?;

        if !response.is_success() {
            return Err(DetectionError::Fetch(format!(
                "Chrome version API returned status {}",
                response.status
            )));
        }

        let history: VersionHistory = serde_json::from_value(response.body)
            .map_err(|e| DetectionError::Parse(format!("unexpected Chrome API response: {}", e)))?;
        let latest = history
            .versions
            .into_iter()
            .next()
            .ok_or_else(|| DetectionError::Parse("Chrome API listed no versions".to_string()))?;

        Ok(RawRelease {
            download_url: Some(DOWNLOAD_URL.to_string()),
            ..RawRelease::new(latest.version, "chrome_api")
        })
    }

    async fn detect_via_page(
        &self,
        request: &SoftwareRequest,
        collaborators: &Collaborators,
    ) -> Result<RawRelease, DetectionError> {
        let document = collaborators
            .fetcher
            .fetch_static(&request.url)
            .await
            .ok_or_else(|| DetectionError::Fetch(format!("could not fetch {}", request.url)))?;

        let text = document.text();
        let version = self
            .page_patterns
            .iter()
            .find_map(|pattern| first_capture(pattern, &text))
            .ok_or_else(|| DetectionError::Parse("no Chrome version on page".to_string()))?;

        Ok(RawRelease {
            download_url: Some(request.url.clone()),
            ..RawRelease::new(version, "chrome_web")
        })
    }
}

impl Default for ChromeStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL)
    }
}

#[async_trait::async_trait]
impl Strategy for ChromeStrategy {
    fn name(&self) -> &str {
        "chrome"
    }

    fn can_handle(&self, request: &SoftwareRequest) -> bool {
        let url = request.url_lower();
        DOMAINS.iter().any(|d| url.contains(d))
    }

    fn priority(&self, _request: &SoftwareRequest) -> i32 {
        85
    }

    async fn detect(
        &self,
        request: &SoftwareRequest,
        collaborators: &Collaborators,
    ) -> Result<RawRelease, DetectionError> {
        match self.detect_via_api(collaborators).await {
            Ok(raw) => return Ok(raw),
            Err(e) => debug!("Chrome API detection failed, trying page: {}", e),
        }
        self.detect_via_page(request, collaborators).await
    }

    fn stats(&self) -> &StrategyStats {
        &self.stats
    }

    fn supported_software(&self) -> Vec<String> {
        vec!["Google Chrome".to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{ApiResponse, Document, MockApiClient, MockContentFetcher};
    use crate::version::VersionParser;
    use serde_json::json;
    use std::sync::Arc;

    fn request() -> SoftwareRequest {
        SoftwareRequest::new("Chrome", "https://www.google.com/chrome/")
    }

    fn collaborators(api: MockApiClient, fetcher: MockContentFetcher) -> Collaborators {
        Collaborators {
            fetcher: Arc::new(fetcher),
            api: Arc::new(api),
            parser: Arc::new(VersionParser::new()),
        }
    }

    #[tokio::test]
    async fn detect_uses_first_api_version() {
        let mut api = MockApiClient::new();
        api.expect_request_json()
            .withf(|url, _| url == "http://versions.test/stable")
            .times(1)
            .returning(|_, _| {
                Some(ApiResponse::new(
                    200,
                    json!({"versions": [{"version": "121.0.6167.85"}, {"version": "120.0.6099.109"}]}),
                ))
            });
        let mut fetcher = MockContentFetcher::new();
        fetcher.expect_fetch_static().never();

        let raw = ChromeStrategy::new("http://versions.test/stable")
            .detect(&request(), &collaborators(api, fetcher))
            .await
            .unwrap();

        assert_eq!(raw.version, "121.0.6167.85");
        assert_eq!(raw.source, "chrome_api");
        assert_eq!(raw.download_url.as_deref(), Some(DOWNLOAD_URL));
    }

    #[tokio::test]
    async fn detect_falls_back_to_page_when_api_fails() {
        let mut api = MockApiClient::new();
        api.expect_request_json()
            .returning(|_, _| Some(ApiResponse::new(503, serde_json::Value::Null)));
        let mut fetcher = MockContentFetcher::new();
        fetcher
            .expect_fetch_static()
            .times(1)
            .returning(|url| Some(Document::new(url, "<p>Chrome 120.0.6099.109</p>")));

        let raw = ChromeStrategy::default()
            .detect(&request(), &collaborators(api, fetcher))
            .await
            .unwrap();

        assert_eq!(raw.version, "120.0.6099.109");
        assert_eq!(raw.source, "chrome_web");
    }

    #[tokio::test]
    async fn detect_fails_when_api_and_page_fail() {
        let mut api = MockApiClient::new();
        api.expect_request_json().returning(|_, _| None);
        let mut fetcher = MockContentFetcher::new();
        fetcher.expect_fetch_static().returning(|_| None);

        let result = ChromeStrategy::default()
            .detect(&request(), &collaborators(api, fetcher))
            .await;

        assert!(matches!(result, Err(DetectionError::Fetch(_))));
    }

    #[test]
    fn can_handle_matches_chrome_urls_only() {
        let strategy = ChromeStrategy::default();

        assert!(strategy.can_handle(&request()));
        assert!(strategy.can_handle(&SoftwareRequest::new("Chrome", "https://chrome.google.com/webstore")));
        assert!(!strategy.can_handle(&SoftwareRequest::new("Docs", "https://docs.google.com")));
    }
}
