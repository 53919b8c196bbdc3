//! Built-in detection strategies
//!
//! Registered in this order, with `generic` always last:
//!
//! | name      | source                                   | priority |
//! |-----------|------------------------------------------|----------|
//! | github    | GitHub releases/tags API, releases page  | 90 / 70  |
//! | chrome    | version-history API, download page       | 85       |
//! | microsoft | Office / Visual Studio / other pages     | 80       |
//! | adobe     | product pages                            | 75       |
//! | jetbrains | product pages                            | 75       |
//! | vscode    | download page                            | 85       |
//! | zoom      | download page                            | 75       |
//! | firefox   | mozilla.org Firefox pages                | 85       |
//! | generic   | any page, static then rendered           | 1        |

pub mod chrome;
pub mod generic;
pub mod github;
pub mod page;

use std::sync::Arc;

use regex::Regex;

use crate::config::StrategiesConfig;
use crate::detection::strategy::Strategy;

pub use chrome::ChromeStrategy;
pub use generic::GenericStrategy;
pub use github::GitHubStrategy;
pub use page::PageStrategy;

/// Name of the catch-all strategy that custom strategies are inserted before
pub const FALLBACK_STRATEGY: &str = "generic";

/// Built-in strategies in registration order
pub fn builtin_strategies(config: &StrategiesConfig) -> Vec<Arc<dyn Strategy>> {
    vec![
        Arc::new(GitHubStrategy::default().with_token(config.github_token.clone())),
        Arc::new(ChromeStrategy::default()),
        Arc::new(PageStrategy::microsoft()),
        Arc::new(PageStrategy::adobe()),
        Arc::new(PageStrategy::jetbrains()),
        Arc::new(PageStrategy::vscode()),
        Arc::new(PageStrategy::zoom()),
        Arc::new(PageStrategy::firefox()),
        Arc::new(GenericStrategy::new()),
    ]
}

/// Compile a pattern that ships with the crate
pub(crate) fn builtin_pattern(pattern: &str) -> Regex {
    Regex::new(pattern).expect("built-in strategy pattern is valid")
}

/// First capture group of the first match
pub(crate) fn first_capture(regex: &Regex, text: &str) -> Option<String> {
    regex
        .captures(text)
        .and_then(|caps| caps.get(1).or_else(|| caps.get(0)))
        .map(|m| m.as_str().to_string())
}

/// Longest first-group capture over all matches; the earliest wins among equals
pub(crate) fn longest_capture(regex: &Regex, text: &str) -> Option<String> {
    regex
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(0)))
        .map(|m| m.as_str())
        .fold(None::<&str>, |best, candidate| match best {
            Some(current) if current.len() >= candidate.len() => Some(current),
            _ => Some(candidate),
        })
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_strategies_end_with_fallback() {
        let names: Vec<String> = builtin_strategies(&StrategiesConfig::default())
            .iter()
            .map(|s| s.name().to_string())
            .collect();

        assert_eq!(
            names,
            vec![
                "github",
                "chrome",
                "microsoft",
                "adobe",
                "jetbrains",
                "vscode",
                "zoom",
                "firefox",
                "generic"
            ]
        );
    }

    #[test]
    fn longest_capture_prefers_longer_then_earlier() {
        let regex = builtin_pattern(r"(\d+\.\d+(?:\.\d+)*)");

        assert_eq!(
            longest_capture(&regex, "1.2 then 10.20.30 then 99.88.77").as_deref(),
            Some("10.20.30")
        );
        assert_eq!(longest_capture(&regex, "none"), None);
    }

    #[test]
    fn first_capture_falls_back_to_whole_match() {
        let regex = builtin_pattern(r"\d{4}");

        assert_eq!(first_capture(&regex, "since 2024").as_deref(), Some("2024"));
    }
}
