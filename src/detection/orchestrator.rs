//! Per-request detection flow and batch scheduling

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::FutureExt;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheEngine, CacheStats};
use crate::config::{
    DEFAULT_MAX_RETRIES, DEFAULT_MAX_WORKERS, DEFAULT_TASK_TIMEOUT_MS, DetectorConfig,
    TrackerConfig,
};
use crate::detection::error::{DetectionError, SetupError};
use crate::detection::registry::{StrategyInfo, StrategyRegistry};
use crate::detection::strategy::{Collaborators, StatsSnapshot, Strategy};
use crate::detection::types::{DetectionResult, SoftwareRequest};
use crate::fetch::HttpClient;
use crate::notify::{NotificationSink, sinks_from_config};
use crate::version::VersionParser;

/// Cache key for `request`: its name plus the first 8 bytes of the URL's SHA-256
pub fn cache_key(request: &SoftwareRequest) -> String {
    let digest = Sha256::digest(request.url.as_bytes());
    format!("version:{}:{}", request.name, hex::encode(&digest[..8]))
}

/// Statistics across the cache and every registered strategy
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestratorStats {
    pub cache: CacheStats,
    pub strategies: Vec<StatsSnapshot>,
}

pub struct DetectionOrchestrator {
    registry: RwLock<StrategyRegistry>,
    cache: CacheEngine,
    collaborators: Collaborators,
    sinks: Vec<Box<dyn NotificationSink>>,
    max_retries: u32,
    max_workers: usize,
    task_timeout: Duration,
}

impl DetectionOrchestrator {
    pub fn new(registry: StrategyRegistry, cache: CacheEngine, collaborators: Collaborators) -> Self {
        Self {
            registry: RwLock::new(registry),
            cache,
            collaborators,
            sinks: Vec::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            max_workers: DEFAULT_MAX_WORKERS,
            task_timeout: Duration::from_millis(DEFAULT_TASK_TIMEOUT_MS),
        }
    }

    /// Wire up the HTTP collaborators, cache, built-in strategies and sinks
    pub fn from_config(config: &TrackerConfig) -> Result<Self, SetupError> {
        let http = Arc::new(HttpClient::new(&config.fetch)?);
        let parser = VersionParser::with_custom_patterns(&config.detector.version_patterns)?;
        let collaborators = Collaborators {
            fetcher: http.clone(),
            api: http,
            parser: Arc::new(parser),
        };

        let orchestrator = Self::new(
            StrategyRegistry::with_builtins(&config.strategies),
            CacheEngine::from_config(&config.cache)?,
            collaborators,
        )
        .with_detector_config(&config.detector)
        .with_sinks(sinks_from_config(&config.notifications));

        info!(
            "Detection pipeline ready: {} cache, {} workers, {} attempts per request",
            config.cache.backend.as_str(),
            orchestrator.max_workers,
            orchestrator.max_retries
        );
        Ok(orchestrator)
    }

    /// Apply retry, pool and timeout limits; zero retries or workers are raised to one
    pub fn with_detector_config(mut self, config: &DetectorConfig) -> Self {
        self.max_retries = config.max_retries.max(1);
        self.max_workers = config.max_workers.max(1);
        self.task_timeout = Duration::from_millis(config.task_timeout_ms);
        self
    }

    pub fn with_sinks(mut self, sinks: Vec<Box<dyn NotificationSink>>) -> Self {
        self.sinks = sinks;
        self
    }

    /// Detect the current version of one piece of software.
    ///
    /// Always yields a result. Only successful results are cached, and a
    /// cache hit is returned as stored without touching any collaborator.
    pub async fn detect_one(&self, request: &SoftwareRequest) -> DetectionResult {
        if let Err(e) = request.validate() {
            warn!("Rejected request {:?}: {}", request.name, e);
            return DetectionResult::failed(&request.name, &e, None);
        }

        let key = cache_key(request);
        let outcome = self
            .cache
            .get_or_set(
                &key,
                move || async move {
                    let result = self.execute(request).await;
                    self.notify(&result).await;
                    if result.success {
                        Ok(Some(result))
                    } else {
                        Err(result)
                    }
                },
                None,
            )
            .await;

        match outcome {
            Ok(Some(result)) => result,
            Ok(None) => DetectionResult::failed(
                &request.name,
                &DetectionError::Internal("detection produced no result".to_string()),
                None,
            ),
            Err(failed) => failed,
        }
    }

    /// Detect every request, yielding exactly one result per request.
    ///
    /// Concurrent mode runs at most `max_workers` detections at a time and
    /// returns results in completion order. Sequential mode keeps input order.
    /// Either way a detection exceeding the task timeout becomes a failed result.
    pub async fn detect_batch(
        self: &Arc<Self>,
        requests: Vec<SoftwareRequest>,
        concurrent: bool,
    ) -> Vec<DetectionResult> {
        info!(
            "Detecting {} requests ({})",
            requests.len(),
            if concurrent { "concurrent" } else { "sequential" }
        );

        let mut results = Vec::with_capacity(requests.len());
        if !concurrent {
            for request in &requests {
                results.push(self.detect_with_timeout(request).await);
            }
            return results;
        }

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = FuturesUnordered::new();
        for request in requests {
            let orchestrator = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let name = request.name.clone();
            let handle = tokio::spawn(async move {
                // The semaphore is never closed, so acquiring only waits
                let _permit = semaphore.acquire_owned().await.ok();
                orchestrator.detect_with_timeout(&request).await
            });
            tasks.push(async move { (name, handle.await) });
        }

        while let Some((name, joined)) = tasks.next().await {
            results.push(joined.unwrap_or_else(|e| {
                error!("Detection task for {} aborted: {}", name, e);
                DetectionResult::failed(
                    name,
                    &DetectionError::Internal(format!("detection task aborted: {}", e)),
                    None,
                )
            }));
        }
        results
    }

    /// Add or replace a strategy; it becomes selectable for later requests
    pub fn register_strategy(&self, strategy: Arc<dyn Strategy>) {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(strategy);
    }

    pub fn strategies(&self) -> Vec<StrategyInfo> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .describe()
    }

    pub fn statistics(&self) -> OrchestratorStats {
        OrchestratorStats {
            cache: self.cache.stats(),
            strategies: self
                .registry
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .stats(),
        }
    }

    pub fn clear_cache(&self) -> bool {
        self.cache.clear()
    }

    async fn detect_with_timeout(&self, request: &SoftwareRequest) -> DetectionResult {
        match tokio::time::timeout(self.task_timeout, self.detect_one(request)).await {
            Ok(result) => result,
            Err(_) => {
                let ms = self.task_timeout.as_millis() as u64;
                warn!("Detection of {} timed out after {} ms", request.name, ms);
                DetectionResult::failed(&request.name, &DetectionError::Timeout(ms), None)
            }
        }
    }

    fn select(&self, request: &SoftwareRequest) -> Result<Arc<dyn Strategy>, DetectionError> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .select(request)
    }

    /// Select once, then run the bounded retry loop against that strategy.
    ///
    /// Every attempt records one outcome in the strategy's counters.
    async fn execute(&self, request: &SoftwareRequest) -> DetectionResult {
        info!("Detecting version of {} from {}", request.name, request.url);

        let strategy = match self.select(request) {
            Ok(strategy) => strategy,
            Err(e) => {
                error!("No strategy for {}: {}", request.name, e);
                return DetectionResult::failed(&request.name, &e, None);
            }
        };
        let strategy_name = strategy.name().to_string();

        let mut attempt = 1;
        let error = loop {
            let outcome = self.attempt(strategy.as_ref(), request).await;
            strategy.stats().record(outcome.is_ok());
            match outcome {
                Ok(result) => {
                    info!(
                        "Detected {} {} via {}",
                        request.name,
                        result.version_string().unwrap_or_default(),
                        strategy_name
                    );
                    return result;
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    warn!(
                        "Attempt {}/{} for {} via {} failed: {}",
                        attempt, self.max_retries, request.name, strategy_name, e
                    );
                    attempt += 1;
                }
                Err(e) => break e,
            }
        };

        error!(
            "Detection of {} via {} failed after {} attempt(s): {}",
            request.name, strategy_name, attempt, error
        );
        DetectionResult::failed(&request.name, &error, Some(strategy_name))
    }

    /// One strategy run, with panics contained and the version normalized
    async fn attempt(
        &self,
        strategy: &dyn Strategy,
        request: &SoftwareRequest,
    ) -> Result<DetectionResult, DetectionError> {
        let outcome = AssertUnwindSafe(async {
            strategy.detect(request, &self.collaborators).await
        })
        .catch_unwind()
        .await;

        let raw = match outcome {
            Ok(raw) => raw?,
            Err(panic) => {
                return Err(DetectionError::Internal(format!(
                    "strategy {} panicked: {}",
                    strategy.name(),
                    panic_message(panic.as_ref())
                )));
            }
        };

        let version = self.collaborators.parser.parse(&raw.version);
        if !version.is_valid() {
            return Err(DetectionError::Parse(format!(
                "unrecognized version text {:?}",
                raw.version
            )));
        }
        debug!("Normalized {:?} to {} ({})", raw.version, version, raw.source);

        Ok(DetectionResult::succeeded(
            &request.name,
            version,
            raw,
            strategy.name(),
        ))
    }

    async fn notify(&self, result: &DetectionResult) {
        for sink in &self.sinks {
            if !sink.notify(result).await {
                debug!("Notification sink {} did not deliver {}", sink.name(), result.name);
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryBackend;
    use crate::detection::strategy::{MockStrategy, StrategyStats};
    use crate::detection::types::RawRelease;
    use crate::fetch::{MockApiClient, MockContentFetcher};
    use crate::notify::MockNotificationSink;
    use rstest::rstest;

    fn collaborators() -> Collaborators {
        Collaborators {
            fetcher: Arc::new(MockContentFetcher::new()),
            api: Arc::new(MockApiClient::new()),
            parser: Arc::new(VersionParser::new()),
        }
    }

    fn detector_config() -> DetectorConfig {
        DetectorConfig {
            max_retries: 3,
            max_workers: 4,
            task_timeout_ms: 200,
            version_patterns: Vec::new(),
        }
    }

    /// Accepts every request and answers `detect` with `outcome`, exactly `times` times
    fn scripted_strategy<F>(times: usize, outcome: F) -> MockStrategy
    where
        F: Fn() -> Result<RawRelease, DetectionError> + Send + 'static,
    {
        let mut strategy = MockStrategy::new();
        strategy.expect_name().return_const("scripted".to_string());
        strategy.expect_can_handle().return_const(true);
        strategy.expect_priority().return_const(50);
        strategy
            .expect_stats()
            .return_const(StrategyStats::new("scripted"));
        strategy.expect_supported_software().returning(Vec::new);
        strategy
            .expect_detect()
            .times(times)
            .returning(move |_, _| outcome());
        strategy
    }

    fn orchestrator(strategy: MockStrategy) -> DetectionOrchestrator {
        let mut registry = StrategyRegistry::new();
        registry.register(Arc::new(strategy));
        DetectionOrchestrator::new(
            registry,
            CacheEngine::new(Arc::new(MemoryBackend::new(100)), None),
            collaborators(),
        )
        .with_detector_config(&detector_config())
    }

    fn request() -> SoftwareRequest {
        SoftwareRequest::new("Tool", "https://tool.example.com/download")
    }

    fn scripted_stats(orchestrator: &DetectionOrchestrator) -> StatsSnapshot {
        orchestrator.statistics().strategies[0].clone()
    }

    #[test]
    fn cache_key_is_stable_and_url_sensitive() {
        let a = cache_key(&request());
        let b = cache_key(&request());
        let c = cache_key(&SoftwareRequest::new("Tool", "https://tool.example.com/other"));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("version:Tool:"));
        assert_eq!(a.len(), "version:Tool:".len() + 16);
    }

    #[tokio::test]
    async fn detect_one_normalizes_and_caches_success() {
        let orchestrator = orchestrator(scripted_strategy(1, || {
            Ok(RawRelease {
                download_url: Some("https://tool.example.com/tool.dmg".to_string()),
                ..RawRelease::new("v2.5", "page_text")
            })
        }));

        let first = orchestrator.detect_one(&request()).await;
        let second = orchestrator.detect_one(&request()).await;

        assert!(first.success);
        assert_eq!(first.version_string().as_deref(), Some("2.5"));
        assert_eq!(first.strategy.as_deref(), Some("scripted"));
        assert_eq!(first, second);
        assert!(orchestrator.cache.exists(&cache_key(&request())));
        assert_eq!(scripted_stats(&orchestrator).successes, 1);
    }

    #[tokio::test]
    async fn detect_one_retries_retryable_errors_then_fails_without_caching() {
        let orchestrator = orchestrator(scripted_strategy(3, || {
            Err(DetectionError::Fetch("connection refused".to_string()))
        }));

        let result = orchestrator.detect_one(&request()).await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Fetch error: connection refused"));
        assert_eq!(result.strategy.as_deref(), Some("scripted"));
        assert!(!orchestrator.cache.exists(&cache_key(&request())));

        let stats = scripted_stats(&orchestrator);
        assert_eq!((stats.successes, stats.failures), (0, 3));
    }

    #[tokio::test]
    async fn each_attempt_is_recorded_in_strategy_stats() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let orchestrator = orchestrator(scripted_strategy(2, move || {
            if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                Err(DetectionError::Parse("page still loading".to_string()))
            } else {
                Ok(RawRelease::new("4.0.1", "page_text"))
            }
        }));

        let result = orchestrator.detect_one(&request()).await;

        assert!(result.success);
        let stats = scripted_stats(&orchestrator);
        assert_eq!((stats.successes, stats.failures), (1, 1));
        assert_eq!(stats.success_rate, 0.5);
    }

    #[rstest]
    #[case(DetectionError::Validation("bad".to_string()))]
    #[case(DetectionError::Internal("boom".to_string()))]
    #[tokio::test]
    async fn detect_one_does_not_retry_fatal_errors(#[case] error: DetectionError) {
        let orchestrator = orchestrator(scripted_strategy(1, move || Err(error.clone())));

        let result = orchestrator.detect_one(&request()).await;

        assert!(!result.success);
    }

    #[tokio::test]
    async fn detect_one_treats_unparseable_version_as_retryable_parse_error() {
        let orchestrator =
            orchestrator(scripted_strategy(3, || Ok(RawRelease::new("latest", "page_text"))));

        let result = orchestrator.detect_one(&request()).await;

        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("Parse error"));
    }

    struct PanickingStrategy {
        stats: StrategyStats,
    }

    #[async_trait::async_trait]
    impl Strategy for PanickingStrategy {
        fn name(&self) -> &str {
            "panicking"
        }

        fn can_handle(&self, _request: &SoftwareRequest) -> bool {
            true
        }

        fn priority(&self, _request: &SoftwareRequest) -> i32 {
            50
        }

        async fn detect(
            &self,
            _request: &SoftwareRequest,
            _collaborators: &Collaborators,
        ) -> Result<RawRelease, DetectionError> {
            panic!("selector exploded")
        }

        fn stats(&self) -> &StrategyStats {
            &self.stats
        }
    }

    #[tokio::test]
    async fn detect_one_contains_strategy_panic() {
        let mut registry = StrategyRegistry::new();
        registry.register(Arc::new(PanickingStrategy {
            stats: StrategyStats::new("panicking"),
        }));
        let orchestrator = DetectionOrchestrator::new(
            registry,
            CacheEngine::new(Arc::new(MemoryBackend::new(10)), None),
            collaborators(),
        );

        let result = orchestrator.detect_one(&request()).await;

        assert!(!result.success);
        let error = result.error.unwrap();
        assert!(error.starts_with("Internal error"));
        assert!(error.contains("selector exploded"));
        assert_eq!(orchestrator.statistics().strategies[0].failures, 1);
    }

    #[tokio::test]
    async fn detect_one_rejects_invalid_request_before_selection() {
        let orchestrator = orchestrator(scripted_strategy(0, || unreachable!()));

        let result = orchestrator
            .detect_one(&SoftwareRequest::new("", "https://tool.example.com"))
            .await;

        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("Validation error"));
        assert_eq!(result.strategy, None);
    }

    #[tokio::test]
    async fn detect_one_reports_missing_strategy() {
        let orchestrator = DetectionOrchestrator::new(
            StrategyRegistry::new(),
            CacheEngine::new(Arc::new(MemoryBackend::new(10)), None),
            collaborators(),
        );

        let result = orchestrator.detect_one(&request()).await;

        assert_eq!(
            result.error.as_deref(),
            Some("No strategy available for Tool")
        );
    }

    #[tokio::test]
    async fn fresh_results_are_notified_but_cache_hits_are_not() {
        let mut sink = MockNotificationSink::new();
        sink.expect_name().return_const("mock".to_string());
        sink.expect_notify().times(1).returning(|_| false);

        let orchestrator =
            orchestrator(scripted_strategy(1, || Ok(RawRelease::new("1.0.0", "page_text"))))
                .with_sinks(vec![Box::new(sink)]);

        assert!(orchestrator.detect_one(&request()).await.success);
        assert!(orchestrator.detect_one(&request()).await.success);
    }

    #[tokio::test]
    async fn register_strategy_takes_part_in_selection() {
        let orchestrator = DetectionOrchestrator::new(
            StrategyRegistry::new(),
            CacheEngine::new(Arc::new(MemoryBackend::new(10)), None),
            collaborators(),
        );

        orchestrator.register_strategy(Arc::new(scripted_strategy(1, || {
            Ok(RawRelease::new("3.1.4", "page_text"))
        })));

        let result = orchestrator.detect_one(&request()).await;
        assert_eq!(result.version_string().as_deref(), Some("3.1.4"));
        let described = orchestrator.strategies();
        assert_eq!(described[0].name, "scripted");
        assert!(described[0].supported_software.is_empty());
        assert_eq!(described[0].stats.successes, 1);
    }

    #[rstest]
    #[case(true)]
    #[case(false)]
    #[tokio::test]
    async fn detect_batch_yields_one_result_per_request(#[case] concurrent: bool) {
        let orchestrator = Arc::new(orchestrator(scripted_strategy(3, || {
            Ok(RawRelease::new("1.2.3", "page_text"))
        })));
        let requests = vec![
            SoftwareRequest::new("A", "https://a.example.com"),
            SoftwareRequest::new("B", "https://b.example.com"),
            SoftwareRequest::new("C", "https://c.example.com"),
            SoftwareRequest::new("", "https://invalid.example.com"),
        ];

        let results = orchestrator.detect_batch(requests, concurrent).await;

        assert_eq!(results.len(), 4);
        assert_eq!(results.iter().filter(|r| r.success).count(), 3);
        if !concurrent {
            let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
            assert_eq!(names, vec!["A", "B", "C", ""]);
        }
    }
}
