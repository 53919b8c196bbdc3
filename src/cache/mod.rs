//! Detection result cache with TTL expiry and pluggable backends
//!
//! Backends store opaque JSON strings; [`CacheEngine`] adds typed access,
//! statistics and the `get_or_set` combinator. Backend failures are logged
//! and treated as misses so the cache never fails a detection.

pub mod error;
pub mod memory;
pub mod sqlite;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::{CacheBackendKind, CacheConfig, cache_db_path};

pub use error::CacheError;
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

/// Storage for serialized cache values
///
/// Implementations serialize their own mutations; expiry is lazy (checked on read).
pub trait CacheBackend: Send + Sync {
    fn kind(&self) -> &'static str;

    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store `value`; `None` ttl means the entry never expires
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;

    fn delete(&self, key: &str) -> Result<bool, CacheError>;

    fn clear(&self) -> Result<(), CacheError>;

    fn exists(&self, key: &str) -> Result<bool, CacheError>;

    fn len(&self) -> Result<usize, CacheError>;
}

/// Snapshot of cache usage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub backend: &'static str,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub hit_rate: f64,
    pub entries: usize,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
}

pub struct CacheEngine {
    backend: Arc<dyn CacheBackend>,
    default_ttl: Option<Duration>,
    counters: Counters,
}

impl CacheEngine {
    pub fn new(backend: Arc<dyn CacheBackend>, default_ttl: Option<Duration>) -> Self {
        Self {
            backend,
            default_ttl,
            counters: Counters::default(),
        }
    }

    /// Build the configured backend; a zero TTL disables expiry
    pub fn from_config(config: &CacheConfig) -> Result<Self, CacheError> {
        let backend: Arc<dyn CacheBackend> = match config.backend {
            CacheBackendKind::Memory => Arc::new(MemoryBackend::new(config.max_entries)),
            CacheBackendKind::Sqlite => {
                let path = config.path.clone().unwrap_or_else(cache_db_path);
                Arc::new(SqliteBackend::new(&path)?)
            }
        };
        let ttl = (config.ttl_secs > 0).then(|| Duration::from_secs(config.ttl_secs));
        Ok(Self::new(backend, ttl))
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.backend.get(key) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Cache read failed for {}: {}", key, e);
                None
            }
        };

        let value = raw.and_then(|raw| match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Discarding undecodable cache entry {}: {}", key, e);
                None
            }
        });

        if value.is_some() {
            debug!("Cache hit: {}", key);
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            debug!("Cache miss: {}", key);
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    /// Store `value`, using the default TTL when `ttl` is `None`
    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> bool {
        let result = serde_json::to_string(value)
            .map_err(CacheError::from)
            .and_then(|raw| self.backend.set(key, &raw, ttl.or(self.default_ttl)));

        match result {
            Ok(()) => {
                self.counters.sets.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                warn!("Cache write failed for {}: {}", key, e);
                false
            }
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        self.backend.delete(key).unwrap_or_else(|e| {
            warn!("Cache delete failed for {}: {}", key, e);
            false
        })
    }

    pub fn exists(&self, key: &str) -> bool {
        self.backend.exists(key).unwrap_or_else(|e| {
            warn!("Cache lookup failed for {}: {}", key, e);
            false
        })
    }

    /// Remove every entry and reset the statistics
    pub fn clear(&self) -> bool {
        self.counters.hits.store(0, Ordering::Relaxed);
        self.counters.misses.store(0, Ordering::Relaxed);
        self.counters.sets.store(0, Ordering::Relaxed);

        match self.backend.clear() {
            Ok(()) => true,
            Err(e) => {
                warn!("Cache clear failed: {}", e);
                false
            }
        }
    }

    /// Return the cached value, or run `factory` once and cache what it produces.
    ///
    /// `Ok(None)` from the factory is returned without caching; an `Err` is
    /// passed through and nothing is stored.
    pub async fn get_or_set<T, E, F, Fut>(
        &self,
        key: &str,
        factory: F,
        ttl: Option<Duration>,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        if let Some(cached) = self.get(key) {
            return Ok(Some(cached));
        }

        let value = factory().await?;
        if let Some(value) = &value {
            self.set(key, value, ttl);
        }
        Ok(value)
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        CacheStats {
            backend: self.backend.kind(),
            hits,
            misses,
            sets: self.counters.sets.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            entries: self.backend.len().unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    struct BrokenBackend;

    impl CacheBackend for BrokenBackend {
        fn kind(&self) -> &'static str {
            "broken"
        }
        fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::LockPoisoned)
        }
        fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> Result<(), CacheError> {
            Err(CacheError::LockPoisoned)
        }
        fn delete(&self, _key: &str) -> Result<bool, CacheError> {
            Err(CacheError::LockPoisoned)
        }
        fn clear(&self) -> Result<(), CacheError> {
            Err(CacheError::LockPoisoned)
        }
        fn exists(&self, _key: &str) -> Result<bool, CacheError> {
            Err(CacheError::LockPoisoned)
        }
        fn len(&self) -> Result<usize, CacheError> {
            Err(CacheError::LockPoisoned)
        }
    }

    fn memory_engine(ttl: Option<Duration>) -> CacheEngine {
        CacheEngine::new(Arc::new(MemoryBackend::new(100)), ttl)
    }

    #[test]
    fn typed_round_trip_counts_hits_and_misses() {
        let engine = memory_engine(None);

        assert_eq!(engine.get::<Vec<u32>>("k"), None);
        assert!(engine.set("k", &vec![1u32, 2, 3], None));
        assert_eq!(engine.get::<Vec<u32>>("k"), Some(vec![1, 2, 3]));

        let stats = engine.stats();
        assert_eq!(stats.backend, "memory");
        assert_eq!((stats.hits, stats.misses, stats.sets), (1, 1, 1));
        assert_eq!(stats.hit_rate, 0.5);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn default_ttl_applies_when_none_given() {
        let engine = memory_engine(Some(Duration::from_millis(20)));

        engine.set("k", &"v", None);
        assert_eq!(engine.get::<String>("k").as_deref(), Some("v"));

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(engine.get::<String>("k"), None);
    }

    #[test]
    fn clear_resets_statistics() {
        let engine = memory_engine(None);
        engine.set("k", &1, None);
        engine.get::<i32>("k");

        assert!(engine.clear());

        let stats = engine.stats();
        assert_eq!((stats.hits, stats.misses, stats.sets, stats.entries), (0, 0, 0, 0));
    }

    #[test]
    fn backend_failures_degrade_to_miss() {
        let engine = CacheEngine::new(Arc::new(BrokenBackend), None);

        assert_eq!(engine.get::<String>("k"), None);
        assert!(!engine.set("k", &"v", None));
        assert!(!engine.exists("k"));
        assert!(!engine.delete("k"));
        assert_eq!(engine.stats().misses, 1);
    }

    #[tokio::test]
    async fn get_or_set_calls_factory_once_and_caches() {
        let engine = memory_engine(None);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: Result<Option<String>, ()> = engine
                .get_or_set(
                    "k",
                    || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(Some("computed".to_string()))
                    },
                    None,
                )
                .await;
            assert_eq!(value, Ok(Some("computed".to_string())));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn get_or_set_does_not_cache_absent_or_failed_values() {
        let engine = memory_engine(None);

        let absent: Result<Option<String>, ()> =
            engine.get_or_set("k", || async { Ok(None) }, None).await;
        let failed: Result<Option<String>, &str> =
            engine.get_or_set("k", || async { Err("boom") }, None).await;

        assert_eq!(absent, Ok(None));
        assert_eq!(failed, Err("boom"));
        assert!(!engine.exists("k"));
    }

    #[test]
    fn from_config_builds_sqlite_backend() {
        let temp_dir = TempDir::new().unwrap();
        let config = CacheConfig {
            backend: CacheBackendKind::Sqlite,
            path: Some(temp_dir.path().join("cache.db")),
            ..Default::default()
        };

        let engine = CacheEngine::from_config(&config).unwrap();

        assert!(engine.set("k", &"v", None));
        assert_eq!(engine.stats().backend, "sqlite");
    }
}
