//! Pattern-driven strategy for vendor download pages
//!
//! Each vendor is described as data: the URL fragments it applies to, a
//! priority, and one or more pattern sets picked by URL keyword.

use regex::Regex;
use tracing::debug;

use crate::detection::error::DetectionError;
use crate::detection::strategies::{builtin_pattern, first_capture, longest_capture};
use crate::detection::strategy::{Collaborators, Strategy, StrategyStats};
use crate::detection::types::{RawRelease, SoftwareRequest};

/// How a version is pulled out of page text
enum Extractor {
    /// First group of the first match
    First(Regex),
    /// Longest first-group capture among all matches
    Longest(Regex),
    /// A 20xx year, only when the page mentions `marker` (lowercase)
    YearWhenMentioned { marker: &'static str, year: Regex },
}

impl Extractor {
    fn first(pattern: &str) -> Self {
        Self::First(builtin_pattern(pattern))
    }

    fn longest(pattern: &str) -> Self {
        Self::Longest(builtin_pattern(pattern))
    }

    fn extract(&self, text: &str, lowered: &str) -> Option<String> {
        match self {
            Self::First(regex) => first_capture(regex, text),
            Self::Longest(regex) => longest_capture(regex, text),
            Self::YearWhenMentioned { marker, year } => lowered
                .contains(marker)
                .then(|| first_capture(year, text))
                .flatten(),
        }
    }
}

/// Pattern set used when the request URL contains one of `url_keywords`
struct Variant {
    /// Empty means "any URL"
    url_keywords: &'static [&'static str],
    source: &'static str,
    extractors: Vec<Extractor>,
}

impl Variant {
    fn matches(&self, url: &str) -> bool {
        self.url_keywords.is_empty() || self.url_keywords.iter().any(|k| url.contains(k))
    }
}

pub struct PageStrategy {
    name: &'static str,
    /// Request applies if its URL contains any of these
    domains: &'static [&'static str],
    /// ...and all of these
    required: &'static [&'static str],
    priority: i32,
    variants: Vec<Variant>,
    supported: &'static [&'static str],
    stats: StrategyStats,
}

impl PageStrategy {
    fn new(
        name: &'static str,
        domains: &'static [&'static str],
        priority: i32,
        variants: Vec<Variant>,
        supported: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            domains,
            required: &[],
            priority,
            variants,
            supported,
            stats: StrategyStats::new(name),
        }
    }

    fn requiring(mut self, required: &'static [&'static str]) -> Self {
        self.required = required;
        self
    }

    pub fn microsoft() -> Self {
        Self::new(
            "microsoft",
            &["microsoft.com", "office.com", "visualstudio.com"],
            80,
            vec![
                Variant {
                    url_keywords: &["office", "microsoft-365"],
                    source: "microsoft_office",
                    extractors: vec![
                        Extractor::first(r"(?i)Office\s+(\d{4})"),
                        Extractor::first(r"(?i)版本\s+(\d+\.\d+)"),
                    ],
                },
                Variant {
                    url_keywords: &["visualstudio"],
                    source: "microsoft_vs",
                    extractors: vec![
                        Extractor::first(r"(?i)Visual\s+Studio\s+(\d{4})"),
                        Extractor::first(r"(?i)VS\s+(\d{4})"),
                        Extractor::first(r"(?i)版本\s+(\d+\.\d+\.\d+)"),
                    ],
                },
                Variant {
                    url_keywords: &[],
                    source: "microsoft_generic",
                    extractors: vec![
                        Extractor::longest(r"(\d+\.\d+\.\d+\.\d+)"),
                        Extractor::longest(r"(\d+\.\d+\.\d+)"),
                        Extractor::longest(r"\b(\d{4})\b"),
                        Extractor::first(r"版本\s+(\d+\.\d+)"),
                    ],
                },
            ],
            &["Microsoft Office", "Visual Studio", "Visual Studio Code"],
        )
    }

    pub fn adobe() -> Self {
        Self::new(
            "adobe",
            &["adobe.com"],
            75,
            vec![Variant {
                url_keywords: &[],
                source: "adobe_web",
                extractors: vec![
                    Extractor::YearWhenMentioned {
                        marker: "creative cloud",
                        year: builtin_pattern(r"(20\d{2})"),
                    },
                    Extractor::first(r"\b(\d{4})\b"),
                    Extractor::first(r"CC\s+(\d{4})"),
                    Extractor::first(r"(\d+\.\d+)"),
                ],
            }],
            &["Adobe Photoshop", "Adobe Illustrator"],
        )
    }

    pub fn jetbrains() -> Self {
        Self::new(
            "jetbrains",
            &["jetbrains.com"],
            75,
            vec![Variant {
                url_keywords: &[],
                source: "jetbrains_web",
                extractors: vec![
                    Extractor::first(r"(\d{4}\.\d+\.\d+)"),
                    Extractor::first(r"(\d{4}\.\d+)"),
                    Extractor::first(r"版本\s+(\d+\.\d+)"),
                ],
            }],
            &["PyCharm", "IntelliJ IDEA"],
        )
    }

    pub fn vscode() -> Self {
        Self::new(
            "vscode",
            &["code.visualstudio.com"],
            85,
            vec![Variant {
                url_keywords: &[],
                source: "vscode_web",
                extractors: vec![
                    Extractor::first(r"(\d+\.\d+\.\d+)"),
                    Extractor::first(r"Version\s+(\d+\.\d+)"),
                ],
            }],
            &["Visual Studio Code"],
        )
    }

    pub fn zoom() -> Self {
        Self::new(
            "zoom",
            &["zoom.us"],
            75,
            vec![Variant {
                url_keywords: &[],
                source: "zoom_web",
                extractors: vec![
                    Extractor::first(r"(\d+\.\d+\.\d+)"),
                    Extractor::first(r"Version\s+(\d+\.\d+)"),
                ],
            }],
            &["Zoom"],
        )
    }

    pub fn firefox() -> Self {
        Self::new(
            "firefox",
            &["mozilla.org"],
            85,
            vec![Variant {
                url_keywords: &[],
                source: "firefox_web",
                extractors: vec![
                    Extractor::first(r"Firefox\s+(\d+\.\d+)"),
                    Extractor::first(r"(\d+\.\d+\.\d+)"),
                ],
            }],
            &["Mozilla Firefox"],
        )
        .requiring(&["firefox"])
    }
}

#[async_trait::async_trait]
impl Strategy for PageStrategy {
    fn name(&self) -> &str {
        self.name
    }

    fn can_handle(&self, request: &SoftwareRequest) -> bool {
        let url = request.url_lower();
        self.domains.iter().any(|d| url.contains(d)) && self.required.iter().all(|r| url.contains(r))
    }

    fn priority(&self, _request: &SoftwareRequest) -> i32 {
        self.priority
    }

    async fn detect(
        &self,
        request: &SoftwareRequest,
        collaborators: &Collaborators,
    ) -> Result<RawRelease, DetectionError> {
        let url = request.url_lower();
        let variant = self
            .variants
            .iter()
            .find(|v| v.matches(&url))
            .ok_or_else(|| DetectionError::Internal(format!("{} has no pattern set", self.name)))?;

        let document = collaborators
            .fetcher
            .fetch_static(&request.url)
            .await
            .ok_or_else(|| DetectionError::Fetch(format!("could not fetch {}", request.url)))?;

        let text = document.text();
        let lowered = text.to_lowercase();
        let version = variant
            .extractors
            .iter()
            .find_map(|extractor| extractor.extract(&text, &lowered))
            .ok_or_else(|| {
                DetectionError::Parse(format!("no {} version found on {}", self.name, request.url))
            })?;

        debug!("{} found version {} via {}", self.name, version, variant.source);
        Ok(RawRelease {
            download_url: Some(request.url.clone()),
            ..RawRelease::new(version, variant.source)
        })
    }

    fn stats(&self) -> &StrategyStats {
        &self.stats
    }

    fn supported_software(&self) -> Vec<String> {
        self.supported.iter().map(|s| s.to_string()).collect()
    }
}
