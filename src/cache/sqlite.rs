//! SQLite-backed persistent cache backend

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::cache::CacheBackend;
use crate::cache::error::CacheError;

/// Schema migrations
/// Each version contains a list of SQL statements to execute
const MIGRATIONS: &[&[&str]] = &[
    // v1: index for purging expired rows
    &["CREATE INDEX IF NOT EXISTS idx_cache_expires_at ON cache_entries(expires_at)"],
];

pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    pub fn new(db_path: &Path) -> Result<Self, CacheError> {
        info!("Initializing cache database at {:?}", db_path);

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;

        // Enable WAL mode for better concurrency
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let backend = Self {
            conn: Mutex::new(conn),
        };
        backend.create_schema()?;
        info!("Cache database initialized");

        Ok(backend)
    }

    /// Acquire database connection lock with proper error handling
    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
        self.conn.lock().map_err(|_| CacheError::LockPoisoned)
    }

    /// Current timestamp in milliseconds since UNIX epoch
    fn current_timestamp_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn create_schema(&self) -> Result<(), CacheError> {
        let conn = self.lock_conn()?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at INTEGER,
                last_accessed INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
            [],
        )?;

        Self::apply_migrations(&conn)?;

        debug!("Cache schema ready");
        Ok(())
    }

    /// Apply pending migrations based on user_version pragma
    fn apply_migrations(conn: &Connection) -> Result<(), CacheError> {
        let current_version: i32 =
            conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        for (i, statements) in MIGRATIONS.iter().enumerate() {
            let version = (i + 1) as i32;
            if version > current_version {
                for sql in *statements {
                    conn.execute(sql, [])?;
                }
                debug!("Applied migration v{}", version);
            }
        }

        let target_version = MIGRATIONS.len() as i32;
        if target_version > current_version {
            conn.pragma_update(None, "user_version", target_version)?;
            debug!("Updated schema version to v{}", target_version);
        }

        Ok(())
    }

    /// Delete every expired row, returning how many were removed
    pub fn purge_expired(&self) -> Result<usize, CacheError> {
        let conn = self.lock_conn()?;
        let removed = conn.execute(
            "DELETE FROM cache_entries WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            [Self::current_timestamp_ms()],
        )?;
        debug!("Purged {} expired cache entries", removed);
        Ok(removed)
    }
}

impl CacheBackend for SqliteBackend {
    fn kind(&self) -> &'static str {
        "sqlite"
    }

    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let conn = self.lock_conn()?;
        let now = Self::current_timestamp_ms();

        let row: Option<(String, Option<i64>)> = conn
            .query_row(
                "SELECT value, expires_at FROM cache_entries WHERE key = ?1",
                [key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((_, Some(expires_at))) if expires_at <= now => {
                conn.execute("DELETE FROM cache_entries WHERE key = ?1", [key])?;
                Ok(None)
            }
            Some((value, _)) => {
                conn.execute(
                    "UPDATE cache_entries SET last_accessed = ?1 WHERE key = ?2",
                    params![now, key],
                )?;
                Ok(Some(value))
            }
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let conn = self.lock_conn()?;
        let now = Self::current_timestamp_ms();
        // A TTL past the i64 millisecond range is stored without expiry
        let expires_at = ttl
            .and_then(|ttl| i64::try_from(ttl.as_millis()).ok())
            .and_then(|ttl_ms| now.checked_add(ttl_ms));

        conn.execute(
            r#"
            INSERT INTO cache_entries (key, value, expires_at, last_accessed, created_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at,
                last_accessed = excluded.last_accessed
            "#,
            params![key, value, expires_at, now],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let conn = self.lock_conn()?;
        let removed = conn.execute("DELETE FROM cache_entries WHERE key = ?1", [key])?;
        Ok(removed > 0)
    }

    fn clear(&self) -> Result<(), CacheError> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM cache_entries", [])?;
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let conn = self.lock_conn()?;
        let expires_at: Option<Option<i64>> = conn
            .query_row(
                "SELECT expires_at FROM cache_entries WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;

        match expires_at {
            None => Ok(false),
            Some(Some(at)) if at <= Self::current_timestamp_ms() => {
                conn.execute("DELETE FROM cache_entries WHERE key = ?1", [key])?;
                Ok(false)
            }
            Some(_) => Ok(true),
        }
    }

    fn len(&self) -> Result<usize, CacheError> {
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| {
            row.get(0)
        })?;
        Ok(count as usize)
    }
}
