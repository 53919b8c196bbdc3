//! Fake collaborators and pipeline builders for integration tests

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tempfile::TempDir;

use release_tracker::cache::{CacheEngine, MemoryBackend, SqliteBackend};
use release_tracker::config::{DetectorConfig, StrategiesConfig};
use release_tracker::detection::{Collaborators, DetectionOrchestrator, StrategyRegistry};
use release_tracker::fetch::{ApiClient, ApiResponse, ContentFetcher, Document};
use release_tracker::version::VersionParser;

/// Serves the same HTML for every static fetch; rendering is unavailable
pub struct StaticPageFetcher {
    html: String,
    calls: AtomicUsize,
}

impl StaticPageFetcher {
    pub fn new(html: &str) -> Self {
        Self {
            html: html.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentFetcher for StaticPageFetcher {
    async fn fetch_static(&self, url: &str) -> Option<Document> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Some(Document::new(url, &self.html))
    }

    async fn fetch_rendered(&self, _url: &str) -> Option<Document> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        None
    }
}

/// Every fetch fails, as if the host were down
#[derive(Default)]
pub struct UnreachableFetcher {
    static_calls: AtomicUsize,
    rendered_calls: AtomicUsize,
}

impl UnreachableFetcher {
    pub fn static_calls(&self) -> usize {
        self.static_calls.load(Ordering::SeqCst)
    }

    pub fn rendered_calls(&self) -> usize {
        self.rendered_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentFetcher for UnreachableFetcher {
    async fn fetch_static(&self, _url: &str) -> Option<Document> {
        self.static_calls.fetch_add(1, Ordering::SeqCst);
        None
    }

    async fn fetch_rendered(&self, _url: &str) -> Option<Document> {
        self.rendered_calls.fetch_add(1, Ordering::SeqCst);
        None
    }
}

/// Hangs forever on URLs containing `stuck_marker`, serves `html` otherwise
pub struct NeverReturningFetcher {
    stuck_marker: String,
    html: String,
}

impl NeverReturningFetcher {
    pub fn new(stuck_marker: &str, html: &str) -> Self {
        Self {
            stuck_marker: stuck_marker.to_string(),
            html: html.to_string(),
        }
    }
}

#[async_trait]
impl ContentFetcher for NeverReturningFetcher {
    async fn fetch_static(&self, url: &str) -> Option<Document> {
        if url.contains(&self.stuck_marker) {
            std::future::pending::<()>().await;
        }
        Some(Document::new(url, &self.html))
    }

    async fn fetch_rendered(&self, _url: &str) -> Option<Document> {
        None
    }
}

/// API adapter with no reachable endpoints
#[derive(Default)]
pub struct NullApi {
    calls: AtomicUsize,
}

impl NullApi {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ApiClient for NullApi {
    async fn request_json(&self, _url: &str, _headers: &[(String, String)]) -> Option<ApiResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        None
    }
}

pub fn detector_config(task_timeout_ms: u64) -> DetectorConfig {
    DetectorConfig {
        max_retries: 3,
        max_workers: 4,
        task_timeout_ms,
        version_patterns: Vec::new(),
    }
}

/// Built-in strategies over the given fakes, with an in-memory cache
pub fn create_test_orchestrator(
    fetcher: Arc<dyn ContentFetcher>,
    api: Arc<dyn ApiClient>,
    detector: &DetectorConfig,
) -> Arc<DetectionOrchestrator> {
    let collaborators = Collaborators {
        fetcher,
        api,
        parser: Arc::new(VersionParser::new()),
    };
    let orchestrator = DetectionOrchestrator::new(
        StrategyRegistry::with_builtins(&StrategiesConfig::default()),
        CacheEngine::new(Arc::new(MemoryBackend::new(100)), None),
        collaborators,
    )
    .with_detector_config(detector);
    Arc::new(orchestrator)
}

/// Sqlite-backed cache engine in a temporary directory
pub fn create_test_sqlite_cache() -> (TempDir, CacheEngine) {
    let temp_dir = TempDir::new().unwrap();
    let backend = SqliteBackend::new(&temp_dir.path().join("cache.db")).unwrap();
    (temp_dir, CacheEngine::new(Arc::new(backend), None))
}
