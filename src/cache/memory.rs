//! Bounded in-process backend with lazy expiry and LRU eviction

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::cache::CacheBackend;
use crate::cache::error::CacheError;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
    /// Logical clock value of the most recent read or write
    last_access: u64,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    clock: u64,
}

impl Inner {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn evict_least_recent(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            debug!("Evicting least recently used cache entry: {}", key);
            self.entries.remove(&key);
        }
    }
}

pub struct MemoryBackend {
    inner: Mutex<Inner>,
    max_entries: usize,
}

impl MemoryBackend {
    /// `max_entries` is clamped to at least one
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_entries: max_entries.max(1),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, CacheError> {
        self.inner.lock().map_err(|_| CacheError::LockPoisoned)
    }
}

impl CacheBackend for MemoryBackend {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut inner = self.lock()?;
        let now = Instant::now();

        let expired = match inner.entries.get(key) {
            None => return Ok(None),
            Some(entry) => entry.is_expired(now),
        };
        if expired {
            inner.entries.remove(key);
            return Ok(None);
        }

        let tick = inner.tick();
        Ok(inner.entries.get_mut(key).map(|entry| {
            entry.last_access = tick;
            entry.value.clone()
        }))
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut inner = self.lock()?;

        if !inner.entries.contains_key(key) && inner.entries.len() >= self.max_entries {
            inner.evict_least_recent();
        }

        let last_access = inner.tick();
        inner.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                // A TTL past the clock's range never expires
                expires_at: ttl.and_then(|ttl| Instant::now().checked_add(ttl)),
                last_access,
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.lock()?.entries.remove(key).is_some())
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.lock()?.entries.clear();
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut inner = self.lock()?;
        let expired = match inner.entries.get(key) {
            None => return Ok(false),
            Some(entry) => entry.is_expired(Instant::now()),
        };
        if expired {
            inner.entries.remove(key);
        }
        Ok(!expired)
    }

    fn len(&self) -> Result<usize, CacheError> {
        Ok(self.lock()?.entries.len())
    }
}
