//! GitHub releases strategy
//!
//! Order of attempts: `releases/latest` API, the `tags` API when the
//! repository has no release (404), then the public releases page.

use std::fmt;

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Deserialize;
use tracing::debug;

use crate::detection::error::DetectionError;
use crate::detection::strategy::{Collaborators, Strategy, StrategyStats};
use crate::detection::types::{RawRelease, SoftwareRequest};

/// Default base URL for GitHub API
const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Default base URL for GitHub web pages
const DEFAULT_WEB_BASE: &str = "https://github.com";

/// Asset name fragments that identify a macOS download
const MAC_KEYWORDS: &[&str] = &["mac", "macos", "darwin", "osx", ".dmg", ".pkg"];

/// Response from GitHub `releases/latest` API
#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    html_url: Option<String>,
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    assets: Vec<Asset>,
}

#[derive(Debug, Deserialize)]
struct Asset {
    name: String,
    #[serde(default)]
    size: u64,
    browser_download_url: String,
}

#[derive(Debug, Deserialize)]
struct Tag {
    name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Repository {
    owner: String,
    repo: String,
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// Extract owner/repo from a github.com URL or a `<owner>.github.io` site
fn parse_repository(url: &str) -> Option<Repository> {
    let absolute = if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{}", url)
    };
    let parsed = Url::parse(&absolute).ok()?;
    let host = parsed.host_str()?.to_lowercase();

    if host == "github.com" || host.ends_with(".github.com") {
        let mut segments = parsed.path_segments()?.filter(|s| !s.is_empty());
        let owner = segments.next()?;
        let repo = segments.next()?.trim_end_matches(".git");
        return Some(Repository {
            owner: owner.to_string(),
            repo: repo.to_string(),
        });
    }

    let owner = host.strip_suffix(".github.io")?;
    Some(Repository {
        owner: owner.to_string(),
        repo: host.clone(),
    })
}

/// Strip `v`/`version`/`release`/`r` prefixes from a tag
fn version_from_tag(tag: &str) -> String {
    let trimmed = tag.trim();
    for prefix in ["version", "release", "v", "r"] {
        let Some(head) = trimmed.get(..prefix.len()) else {
            continue;
        };
        let rest = &trimmed[prefix.len()..];
        if head.eq_ignore_ascii_case(prefix) && rest.starts_with(|c: char| c.is_ascii_digit()) {
            return rest.to_string();
        }
    }
    trimmed.to_string()
}

/// Human-readable size, e.g. "92.3 MB"
pub fn format_file_size(size_bytes: u64) -> String {
    let mut size = size_bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{:.1} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1} TB", size)
}

fn is_mac_asset(name: &str) -> bool {
    let name = name.to_lowercase();
    MAC_KEYWORDS.iter().any(|k| name.contains(k))
}

pub struct GitHubStrategy {
    api_base: String,
    web_base: String,
    token: Option<String>,
    stats: StrategyStats,
}

impl GitHubStrategy {
    /// Creates a GitHubStrategy with custom API and web base URLs
    pub fn new(api_base: &str, web_base: &str) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            web_base: web_base.trim_end_matches('/').to_string(),
            token: None,
            stats: StrategyStats::new("github"),
        }
    }

    /// Authenticate API calls for higher rate limits
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![(
            "Accept".to_string(),
            "application/vnd.github+json".to_string(),
        )];
        if let Some(token) = &self.token {
            headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
        }
        headers
    }

    async fn detect_via_api(
        &self,
        repository: &Repository,
        collaborators: &Collaborators,
    ) -> Result<RawRelease, DetectionError> {
        let url = format!("{}/repos/{}/releases/latest", self.api_base, repository);
        let response = collaborators
            .api
            .request_json(&url, &self.headers())
            .await
            .ok_or_else(|| DetectionError::Fetch(format!("GitHub API unreachable for {}", repository)))?;

        match response.status {
            200 => {}
            404 => return self.detect_via_tags(repository, collaborators).await,
            status => {
                return Err(DetectionError::Fetch(format!(
                    "GitHub API returned status {} for {}",
                    status, repository
                )));
            }
        }

        let release: Release = serde_json::from_value(response.body)
            .map_err(|e| DetectionError::Parse(format!("unexpected GitHub release: {}", e)))?;

        let mac_asset = release.assets.iter().find(|a| is_mac_asset(&a.name));
        let download_url = mac_asset
            .or_else(|| release.assets.first())
            .map(|a| a.browser_download_url.clone())
            .or(release.html_url);
        let file_size = mac_asset
            .filter(|a| a.size > 0)
            .map(|a| format_file_size(a.size));

        Ok(RawRelease {
            version: version_from_tag(&release.tag_name),
            download_url,
            release_date: release.published_at,
            file_size,
            checksum: None,
            source: "github_api".to_string(),
        })
    }

    async fn detect_via_tags(
        &self,
        repository: &Repository,
        collaborators: &Collaborators,
    ) -> Result<RawRelease, DetectionError> {
        debug!("{} has no releases, trying tags", repository);

        let url = format!("{}/repos/{}/tags", self.api_base, repository);
        let response = collaborators
            .api
            .request_json(&url, &self.headers())
            .await
            .filter(|r| r.is_success())
            .ok_or_else(|| DetectionError::Fetch(format!("GitHub tags unavailable for {}", repository)))?;

        let tags: Vec<Tag> = serde_json::from_value(response.body)
            .map_err(|e| DetectionError::Parse(format!("unexpected GitHub tags: {}", e)))?;
        let latest = tags
            .into_iter()
            .next()
            .ok_or_else(|| DetectionError::Parse(format!("{} has no tags", repository)))?;

        Ok(RawRelease {
            download_url: Some(format!(
                "{}/{}/archive/{}.zip",
                self.web_base, repository, latest.name
            )),
            ..RawRelease::new(version_from_tag(&latest.name), "github_tags_api")
        })
    }

    async fn detect_via_web(
        &self,
        repository: &Repository,
        collaborators: &Collaborators,
    ) -> Result<RawRelease, DetectionError> {
        let releases_url = format!("{}/{}/releases", self.web_base, repository);
        let document = collaborators
            .fetcher
            .fetch_static(&releases_url)
            .await
            .ok_or_else(|| DetectionError::Fetch(format!("could not fetch {}", releases_url)))?;

        let links = document.links();
        let tag = links
            .iter()
            .find_map(|link| {
                let (_, tag) = link.href.split_once("/releases/tag/")?;
                let tag = tag.split(['/', '?', '#']).next()?;
                (!tag.is_empty()).then(|| tag.to_string())
            })
            .ok_or_else(|| DetectionError::Parse(format!("no release found on {}", releases_url)))?;

        let downloads: Vec<&str> = links
            .iter()
            .map(|link| link.href.as_str())
            .filter(|href| href.contains("/releases/download/"))
            .collect();
        let download_url = downloads
            .iter()
            .find(|href| is_mac_asset(href))
            .or(downloads.first())
            .map(|href| href.to_string())
            .unwrap_or(releases_url);

        Ok(RawRelease {
            download_url: Some(download_url),
            ..RawRelease::new(version_from_tag(&tag), "github_web")
        })
    }
}

impl Default for GitHubStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE, DEFAULT_WEB_BASE)
    }
}

#[async_trait::async_trait]
impl Strategy for GitHubStrategy {
    fn name(&self) -> &str {
        "github"
    }

    fn can_handle(&self, request: &SoftwareRequest) -> bool {
        let url = request.url_lower();
        url.contains("github.com") || url.contains("github.io")
    }

    fn priority(&self, request: &SoftwareRequest) -> i32 {
        let url = request.url_lower();
        if url.contains("github.com") {
            90
        } else if url.contains("github.io") {
            70
        } else {
            0
        }
    }

    async fn detect(
        &self,
        request: &SoftwareRequest,
        collaborators: &Collaborators,
    ) -> Result<RawRelease, DetectionError> {
        let repository = parse_repository(&request.url).ok_or_else(|| {
            DetectionError::Validation(format!("not a GitHub repository URL: {}", request.url))
        })?;

        match self.detect_via_api(&repository, collaborators).await {
            Ok(raw) => return Ok(raw),
            Err(e) => debug!("GitHub API detection failed for {}: {}", repository, e),
        }
        self.detect_via_web(&repository, collaborators).await
    }

    fn stats(&self) -> &StrategyStats {
        &self.stats
    }

    fn supported_software(&self) -> Vec<String> {
        ["VS Code", "Atom", "Homebrew", "Docker Desktop"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }
}
