//! Strategy trait for turning a source into a raw release record

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(test)]
use mockall::automock;
use serde::Serialize;

use crate::detection::error::DetectionError;
use crate::detection::types::{RawRelease, SoftwareRequest};
use crate::fetch::{ApiClient, ContentFetcher};
use crate::version::VersionParser;

/// Everything a strategy may use to reach the outside world
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn ContentFetcher>,
    pub api: Arc<dyn ApiClient>,
    pub parser: Arc<VersionParser>,
}

/// Success/failure counters owned by one strategy
#[derive(Debug)]
pub struct StrategyStats {
    name: String,
    successes: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time copy of [`StrategyStats`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub name: String,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: f64,
}

impl StrategyStats {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn record(&self, success: bool) {
        if success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let successes = self.successes.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        let total = successes + failures;

        StatsSnapshot {
            name: self.name.clone(),
            successes,
            failures,
            success_rate: if total == 0 {
                0.0
            } else {
                successes as f64 / total as f64
            },
        }
    }
}

/// Trait for a pluggable way of detecting versions from a class of sources
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait Strategy: Send + Sync {
    /// Registry key, e.g. "github"
    fn name(&self) -> &str;

    /// Whether this strategy knows how to handle the request's source
    fn can_handle(&self, request: &SoftwareRequest) -> bool;

    /// Selection priority for the request; higher wins
    fn priority(&self, request: &SoftwareRequest) -> i32;

    /// Detects the release of the requested software
    ///
    /// # Returns
    /// * `Ok(RawRelease)` - Unnormalized version text plus optional release details
    /// * `Err(DetectionError)` - Fetch or parse failure; leaves no partial state behind
    async fn detect(
        &self,
        request: &SoftwareRequest,
        collaborators: &Collaborators,
    ) -> Result<RawRelease, DetectionError>;

    /// Counters updated by the orchestrator once per detection
    fn stats(&self) -> &StrategyStats;

    /// Software this strategy is known to work for
    fn supported_software(&self) -> Vec<String> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reports_counts_and_rate() {
        let stats = StrategyStats::new("github");
        stats.record(true);
        stats.record(true);
        stats.record(true);
        stats.record(false);

        assert_eq!(
            stats.snapshot(),
            StatsSnapshot {
                name: "github".to_string(),
                successes: 3,
                failures: 1,
                success_rate: 0.75,
            }
        );
    }

    #[test]
    fn snapshot_of_unused_strategy_has_zero_rate() {
        assert_eq!(StrategyStats::new("zoom").snapshot().success_rate, 0.0);
    }
}
