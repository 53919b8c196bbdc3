use indexmap::IndexMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

// =============================================================================
// Defaults
// =============================================================================

/// Total detection attempts per request
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Batch worker pool size
pub const DEFAULT_MAX_WORKERS: usize = 10;

/// Per-task timeout for batch detection in milliseconds (30 seconds)
pub const DEFAULT_TASK_TIMEOUT_MS: u64 = 30_000;

/// Cache time-to-live in seconds (1 hour)
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

/// Entry bound of the in-memory cache
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 1000;

/// Timeout for a single HTTP request in milliseconds (30 seconds)
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 30_000;

/// Base delay between HTTP retries in milliseconds, doubled on every attempt
pub const DEFAULT_FETCH_RETRY_DELAY_MS: u64 = 1000;

pub const DEFAULT_USER_AGENT: &str = concat!("release-tracker/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackerConfig {
    pub detector: DetectorConfig,
    pub cache: CacheConfig,
    pub fetch: FetchConfig,
    pub strategies: StrategiesConfig,
    pub notifications: NotificationsConfig,
    pub logging: LoggingConfig,
}

/// Orchestrator settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct DetectorConfig {
    /// Total attempts per request, including the first one
    pub max_retries: u32,
    pub max_workers: usize,
    pub task_timeout_ms: u64,
    /// Extra version patterns tried after the built-in ones
    pub version_patterns: Vec<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            max_workers: DEFAULT_MAX_WORKERS,
            task_timeout_ms: DEFAULT_TASK_TIMEOUT_MS,
            version_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    #[default]
    Memory,
    Sqlite,
}

impl CacheBackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Sqlite => "sqlite",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "sqlite" | "disk" => Some(Self::Sqlite),
            _ => None,
        }
    }
}

/// Cache-related configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    pub ttl_secs: u64,
    pub max_entries: usize,
    /// Database file for the sqlite backend, defaults to [`cache_db_path`]
    pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Memory,
            ttl_secs: DEFAULT_CACHE_TTL_SECS,
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            path: None,
        }
    }
}

/// HTTP collaborator configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct FetchConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub user_agent: String,
    /// Prerender service prefix used for pages that need script execution
    pub render_endpoint: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_FETCH_RETRY_DELAY_MS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            render_endpoint: None,
        }
    }
}

/// Strategy tuning
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct StrategiesConfig {
    /// Priority overrides keyed by strategy name
    pub priorities: IndexMap<String, i32>,
    pub github_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct NotificationsConfig {
    pub enabled: bool,
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    /// Also write logs to [`log_path`]
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: true,
        }
    }
}

impl TrackerConfig {
    /// Load from `path`, or from `<data_dir>/config.json` when it exists,
    /// then apply `TRACKER_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = config_path();
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from environment-style variables; unparseable values are ignored
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup("TRACKER_CACHE_TYPE") {
            match CacheBackendKind::parse(&value) {
                Some(kind) => self.cache.backend = kind,
                None => warn!("Ignoring unknown TRACKER_CACHE_TYPE: {}", value),
            }
        }
        if let Some(value) = lookup("TRACKER_CACHE_TTL") {
            match value.trim().parse() {
                Ok(ttl) => self.cache.ttl_secs = ttl,
                Err(_) => warn!("Ignoring invalid TRACKER_CACHE_TTL: {}", value),
            }
        }
        if let Some(value) = lookup("TRACKER_MAX_WORKERS") {
            match value.trim().parse() {
                Ok(workers) if workers > 0 => self.detector.max_workers = workers,
                _ => warn!("Ignoring invalid TRACKER_MAX_WORKERS: {}", value),
            }
        }
        if let Some(value) = lookup("TRACKER_LOG_LEVEL") {
            self.logging.level = value.trim().to_lowercase();
        }
        if let Some(value) = lookup("TRACKER_GITHUB_TOKEN") {
            self.strategies.github_token = Some(value);
        }
        if let Some(value) = lookup("TRACKER_WEBHOOK_URL") {
            self.notifications.webhook_url = Some(value);
            self.notifications.enabled = true;
        }
    }
}

/// Returns the path to the data directory for release-tracker.
/// Uses $XDG_DATA_HOME/release-tracker if XDG_DATA_HOME is set,
/// otherwise falls back to ~/.local/share/release-tracker,
/// or ./release-tracker if neither is available.
pub fn data_dir() -> PathBuf {
    data_dir_with_env(std::env::var("XDG_DATA_HOME").ok(), dirs::home_dir())
}

pub fn config_path() -> PathBuf {
    data_dir().join("config.json")
}

/// Returns the default path of the sqlite cache database.
pub fn cache_db_path() -> PathBuf {
    data_dir().join("cache.db")
}

/// Returns the path to the log file.
pub fn log_path() -> PathBuf {
    data_dir().join("release-tracker.log")
}

fn data_dir_with_env(xdg_data_home: Option<String>, home_dir: Option<PathBuf>) -> PathBuf {
    let data_dir = xdg_data_home
        .map(PathBuf::from)
        .or_else(|| home_dir.map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));

    data_dir.join("release-tracker")
}
