//! Free-form version text parsing, normalization and comparison
//!
//! Vendor pages and release APIs spell versions in many ways ("Version 1.2",
//! "v4.1.0", "Build 2024.1", "120.0.6099.109", "1.0-SNAPSHOT"). The parser
//! cleans the text, then tries an ordered list of extraction patterns where
//! the first match wins.

use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

use regex::{Captures, Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Built-in extraction patterns in priority order.
///
/// Named groups map to the components of [`VersionValue`]; patterns without
/// named groups (custom ones) are mapped positionally.
const BUILTIN_PATTERNS: &[(&str, &str)] = &[
    (
        "semantic",
        r"v?(?P<major>\d+)\.(?P<minor>\d+)\.(?P<patch>\d+)(?:\.(?P<build>\d+))?(?:-(?P<pre>[a-z0-9\-\.]+))?(?:\+(?P<meta>[a-z0-9\-\.]+))?",
    ),
    (
        "year",
        r"(?P<major>\d{4})\.(?P<minor>\d{1,2})\.(?P<patch>\d{1,2})(?:\.(?P<build>\d+))?",
    ),
    (
        "simplified",
        r"v?(?P<major>\d+)\.(?P<minor>\d+)(?:\.(?P<patch>\d+))?(?:\.(?P<build>\d+))?(?:-(?P<pre>[a-z0-9\-\.]+))?(?:\+(?P<meta>[a-z0-9\-\.]+))?",
    ),
    (
        "build",
        r"build\s+(?P<major>\d+)(?:\.(?P<minor>\d+))?(?:\.(?P<patch>\d+))?(?:\.(?P<build>\d+))?",
    ),
    (
        "release",
        r"release\s+(?P<major>\d+)(?:\.(?P<minor>\d+))?(?:\.(?P<patch>\d+))?(?:\.(?P<build>\d+))?",
    ),
    (
        "version_prefix",
        r"ver(?:sion)?\s+(?P<major>\d+)(?:\.(?P<minor>\d+))?(?:\.(?P<patch>\d+))?(?:\.(?P<build>\d+))?",
    ),
    (
        "dotted",
        r"(?P<major>\d+)\.(?P<minor>\d+)\.(?P<patch>\d+)\.(?P<build>\d+)",
    ),
    (
        "date",
        r"(?P<major>\d{4})-?(?P<minor>\d{2})-?(?P<patch>\d{2})",
    ),
    (
        "integer",
        r"^(?P<major>\d+)(?:-(?P<pre>[a-z0-9\-\.]+))?(?:\+(?P<meta>[a-z0-9\-\.]+))?$",
    ),
    // Kept for custom-pattern ordering only: `simplified` claims every text
    // this matches first, keeping `-label` and dropping `.label`.
    (
        "suffix",
        r"(?P<major>\d+)\.(?P<minor>\d+)(?:\.(?P<patch>\d+))?(?:\.(?P<build>\d+))?[-\.](?P<pre>[a-z]+)",
    ),
];

const NUMERIC_ROLES: [&str; 4] = ["major", "minor", "patch", "build"];

static BUILTIN: LazyLock<Vec<VersionPattern>> = LazyLock::new(|| {
    BUILTIN_PATTERNS
        .iter()
        .map(|(name, pattern)| {
            VersionPattern::compile(name, pattern).expect("built-in version pattern is valid")
        })
        .collect()
});

static WORD_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:version|ver|release|rel|build|版本|发布|构建)\s*[:：\-]?\s*")
        .expect("valid prefix regex")
});

static LETTER_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[vr]\s*[:\-]?\s*(\d)").expect("valid prefix regex"));

static PARENTHETICAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^)]*\)").expect("valid parenthesis regex"));

static PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\.\-\+]").expect("valid punctuation regex"));

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Structured, comparable version
///
/// Ordering compares `(major, minor, patch, build)` first; on a tie a
/// pre-release sorts below the release, and two pre-release labels compare
/// as strings. `raw` and `metadata` never take part in ordering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionValue {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub build: u64,
    pub pre_release: Option<String>,
    pub metadata: Option<String>,
    /// Cleaned input text the value was parsed from
    pub raw: String,
}

impl VersionValue {
    /// Value for text no pattern understood: zero components, cleaned text only
    pub fn unparsed(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            ..Default::default()
        }
    }

    pub fn components(&self) -> (u64, u64, u64, u64) {
        (self.major, self.minor, self.patch, self.build)
    }

    /// True if at least one numeric component is non-zero
    pub fn is_valid(&self) -> bool {
        self.components() != (0, 0, 0, 0)
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre_release.is_some()
    }
}

impl PartialEq for VersionValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for VersionValue {}

impl PartialOrd for VersionValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.components()
            .cmp(&other.components())
            .then_with(|| match (&self.pre_release, &other.pre_release) {
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => a.cmp(b),
                (None, None) => Ordering::Equal,
            })
    }
}

/// Normalized form: trailing zero components are dropped (the major one is
/// always kept), then `-pre` and `+meta` suffixes are appended. A labelled
/// version keeps at least `major.minor.patch`.
impl fmt::Display for VersionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labelled = self.pre_release.is_some() || self.metadata.is_some();
        write!(f, "{}", self.major)?;
        if labelled || self.minor > 0 || self.patch > 0 || self.build > 0 {
            write!(f, ".{}", self.minor)?;
        }
        if labelled || self.patch > 0 || self.build > 0 {
            write!(f, ".{}", self.patch)?;
        }
        if self.build > 0 {
            write!(f, ".{}", self.build)?;
        }
        if let Some(pre) = &self.pre_release {
            write!(f, "-{}", pre)?;
        }
        if let Some(meta) = &self.metadata {
            write!(f, "+{}", meta)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct VersionPattern {
    name: String,
    regex: Regex,
    named: bool,
}

impl VersionPattern {
    fn compile(name: &str, pattern: &str) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        let named = regex.capture_names().flatten().next().is_some();
        Ok(Self {
            name: name.to_string(),
            regex,
            named,
        })
    }

    fn group<'h>(&self, caps: &Captures<'h>, role: &str, position: usize) -> Option<&'h str> {
        let found = if self.named {
            caps.name(role)
        } else {
            caps.get(position)
        };
        found.map(|m| m.as_str()).filter(|s| !s.is_empty())
    }

    /// Numeric components in order; non-numeric groups are skipped (left at zero)
    fn numbers(&self, caps: &Captures<'_>) -> [Option<u64>; 4] {
        let mut numbers = [None; 4];
        for (i, role) in NUMERIC_ROLES.iter().enumerate() {
            numbers[i] = self
                .group(caps, role, i + 1)
                .filter(|s| s.chars().all(|c| c.is_ascii_digit()))
                .and_then(|s| s.parse().ok());
        }
        numbers
    }

    fn extract(&self, caps: &Captures<'_>, cleaned: &str) -> Option<VersionValue> {
        let numbers = self.numbers(caps);
        let pre_release = self
            .group(caps, "pre", 5)
            .filter(|s| !s.chars().all(|c| c.is_ascii_digit()))
            .map(str::to_string);
        let metadata = self.group(caps, "meta", 6).map(str::to_string);

        if numbers.iter().all(Option::is_none) && pre_release.is_none() {
            return None;
        }

        Some(VersionValue {
            major: numbers[0].unwrap_or(0),
            minor: numbers[1].unwrap_or(0),
            patch: numbers[2].unwrap_or(0),
            build: numbers[3].unwrap_or(0),
            pre_release,
            metadata,
            raw: cleaned.to_string(),
        })
    }
}

/// Parser holding the ordered extraction patterns
#[derive(Debug, Clone)]
pub struct VersionParser {
    patterns: Vec<VersionPattern>,
}

impl Default for VersionParser {
    fn default() -> Self {
        Self {
            patterns: BUILTIN.clone(),
        }
    }
}

impl VersionParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in patterns followed by `custom` ones (lowest priority)
    pub fn with_custom_patterns(custom: &[String]) -> Result<Self, regex::Error> {
        let mut parser = Self::default();
        for (i, pattern) in custom.iter().enumerate() {
            parser
                .patterns
                .push(VersionPattern::compile(&format!("custom_{}", i), pattern)?);
        }
        debug!(
            "Version parser initialized with {} patterns",
            parser.patterns.len()
        );
        Ok(parser)
    }

    /// Parse free-form text. Never fails: unmatched text yields a value with
    /// zero components carrying the cleaned text.
    pub fn parse(&self, text: &str) -> VersionValue {
        let cleaned = clean_version_text(text);
        if cleaned.is_empty() {
            return VersionValue::unparsed(cleaned);
        }

        for pattern in &self.patterns {
            let Some(caps) = pattern.regex.captures(&cleaned) else {
                continue;
            };
            if let Some(value) = pattern.extract(&caps, &cleaned) {
                trace!("Parsed {:?} with pattern {}: {}", text, pattern.name, value);
                return value;
            }
        }

        debug!("No version pattern matched {:?}", text);
        VersionValue::unparsed(cleaned)
    }

    /// Compare two version texts.
    ///
    /// Falls back to ordinal string comparison when either side has no
    /// non-zero component.
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        let va = self.parse(a);
        let vb = self.parse(b);
        if !va.is_valid() || !vb.is_valid() {
            return a.cmp(b);
        }
        va.cmp(&vb)
    }

    pub fn is_newer(&self, a: &str, b: &str) -> bool {
        self.compare(a, b) == Ordering::Greater
    }

    pub fn is_valid(&self, text: &str) -> bool {
        self.parse(text).is_valid()
    }

    pub fn normalize(&self, text: &str) -> String {
        self.parse(text).to_string()
    }

    /// Every distinct valid version found anywhere in `text`, newest first
    pub fn extract_all_from_text(&self, text: &str) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();

        for pattern in &self.patterns {
            for caps in pattern.regex.captures_iter(text) {
                let numbers: Vec<String> = pattern
                    .numbers(&caps)
                    .iter()
                    .flatten()
                    .map(u64::to_string)
                    .collect();
                if numbers.is_empty() {
                    continue;
                }
                let candidate = numbers.join(".");
                if !found.contains(&candidate) && self.is_valid(&candidate) {
                    found.push(candidate);
                }
            }
        }

        found.sort_by(|a, b| self.compare(b, a));
        found
    }

    /// Newest entry of `versions`; the earliest one wins among equals
    pub fn latest(&self, versions: &[String]) -> Option<String> {
        versions
            .iter()
            .fold(None::<&String>, |latest, candidate| match latest {
                Some(current) if !self.is_newer(candidate, current) => Some(current),
                _ => Some(candidate),
            })
            .cloned()
    }
}

/// Strip decorative prefixes, drop parentheticals without digits and
/// collapse punctuation to single spaces.
fn clean_version_text(text: &str) -> String {
    let trimmed = text.trim();
    let without_word = WORD_PREFIX.replace(trimmed, "");
    let without_prefix = LETTER_PREFIX.replace(&without_word, "$1");

    let without_parens = PARENTHETICAL.replace_all(&without_prefix, |caps: &Captures<'_>| {
        let group = &caps[0];
        if group.chars().any(|c| c.is_ascii_digit()) {
            group.to_string()
        } else {
            String::new()
        }
    });

    let spaced = PUNCTUATION.replace_all(&without_parens, " ");
    WHITESPACE.replace_all(&spaced, " ").trim().to_string()
}
