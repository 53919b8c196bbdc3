//! Catch-all strategy for pages without a dedicated strategy

use regex::Regex;
use tracing::{debug, info};

use crate::detection::error::DetectionError;
use crate::detection::strategies::{FALLBACK_STRATEGY, builtin_pattern, first_capture, longest_capture};
use crate::detection::strategy::{Collaborators, Strategy, StrategyStats};
use crate::detection::types::{RawRelease, SoftwareRequest};
use crate::fetch::Document;
use crate::version::VersionParser;

/// Link text or target fragments suggesting a download, most specific first
const DOWNLOAD_KEYWORDS: &[&str] = &[
    "download", "下载", "立即下载", "mac下载", "免费下载", "dmg", "pkg", "zip", "installer", "get",
    "install",
];

const MAC_KEYWORDS: &[&str] = &[
    "mac", "macos", "osx", "darwin", "apple", "macintosh", ".dmg", ".pkg", ".app",
];

const ARCHIVE_EXTENSIONS: &[&str] = &[".dmg", ".pkg", ".zip", ".tar.gz"];

pub struct GenericStrategy {
    version_patterns: Vec<Regex>,
    stats: StrategyStats,
}

impl Default for GenericStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl GenericStrategy {
    pub fn new() -> Self {
        Self {
            version_patterns: vec![
                builtin_pattern(r"(?i)v?(\d+\.\d+\.\d+(?:\.\d+)?)"),
                builtin_pattern(r"(\d{4}\.\d+\.\d+)"),
                builtin_pattern(r"版本\s*[：:]\s*(\d+\.\d+\.\d+)"),
                builtin_pattern(r"(?i)version\s*[：:]\s*(\d+\.\d+\.\d+)"),
                builtin_pattern(r"(\d+\.\d+)"),
                builtin_pattern(r"(?i)Build\s+(\d+\.\d+)"),
                builtin_pattern(r"(?i)Release\s+(\d+\.\d+)"),
            ],
            stats: StrategyStats::new(FALLBACK_STRATEGY),
        }
    }

    /// Version from page text, else from a link target
    fn find_version(&self, document: &Document, parser: &VersionParser) -> Option<String> {
        let text = document.text();
        let from_text = self
            .version_patterns
            .iter()
            .filter_map(|pattern| longest_capture(pattern, &text))
            .find(|version| parser.is_valid(version));
        if from_text.is_some() {
            return from_text;
        }

        document.links().iter().find_map(|link| {
            self.version_patterns
                .iter()
                .filter_map(|pattern| first_capture(pattern, &link.href))
                .find(|version| parser.is_valid(version))
                .inspect(|version| debug!("Found version {} in link {}", version, link.href))
        })
    }

    fn find_download_url(document: &Document) -> Option<String> {
        let links = document.links();

        for keyword in DOWNLOAD_KEYWORDS {
            let by_text = links.iter().find(|l| l.text.to_lowercase().contains(keyword));
            let by_href = || links.iter().find(|l| l.href.to_lowercase().contains(keyword));
            if let Some(link) = by_text.or_else(by_href) {
                return Some(link.href.clone());
            }
        }

        links
            .iter()
            .find(|l| {
                let haystack = format!("{} {}", l.href, l.text).to_lowercase();
                MAC_KEYWORDS.iter().any(|k| haystack.contains(k))
            })
            .or_else(|| {
                links.iter().find(|l| {
                    let href = l.href.to_lowercase();
                    ARCHIVE_EXTENSIONS.iter().any(|ext| href.contains(ext))
                })
            })
            .map(|l| l.href.clone())
    }

    fn inspect(
        &self,
        document: &Document,
        request: &SoftwareRequest,
        parser: &VersionParser,
        source: &str,
    ) -> Option<RawRelease> {
        let version = self.find_version(document, parser)?;
        info!("Found version {} for {} on {}", version, request.name, source);

        Some(RawRelease {
            download_url: Some(
                Self::find_download_url(document).unwrap_or_else(|| request.url.clone()),
            ),
            ..RawRelease::new(version, source)
        })
    }
}

#[async_trait::async_trait]
impl Strategy for GenericStrategy {
    fn name(&self) -> &str {
        FALLBACK_STRATEGY
    }

    fn can_handle(&self, _request: &SoftwareRequest) -> bool {
        true
    }

    fn priority(&self, _request: &SoftwareRequest) -> i32 {
        1
    }

    async fn detect(
        &self,
        request: &SoftwareRequest,
        collaborators: &Collaborators,
    ) -> Result<RawRelease, DetectionError> {
        let mut fetched = false;

        if let Some(document) = collaborators.fetcher.fetch_static(&request.url).await {
            fetched = true;
            if let Some(raw) = self.inspect(&document, request, &collaborators.parser, "static_page") {
                return Ok(raw);
            }
            debug!("No version in static page of {}, trying rendered page", request.url);
        }

        if let Some(document) = collaborators.fetcher.fetch_rendered(&request.url).await {
            fetched = true;
            if let Some(raw) = self.inspect(&document, request, &collaborators.parser, "dynamic_page") {
                return Ok(raw);
            }
        }

        if fetched {
            Err(DetectionError::Parse(format!("no version found on {}", request.url)))
        } else {
            Err(DetectionError::Fetch(format!("could not fetch {}", request.url)))
        }
    }

    fn stats(&self) -> &StrategyStats {
        &self.stats
    }

    fn supported_software(&self) -> Vec<String> {
        vec!["Any software with a public download page".to_string()]
    }
}
