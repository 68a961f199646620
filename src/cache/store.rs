//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::sync::Mutex;

/// Build the cache key for a request.
///
/// Parameters are sorted before joining so that equivalent requests with
/// differently-ordered parameters map to the same key, and percent-encoded
/// with the same serializer the transport uses, so a value containing `&` or
/// `=` cannot collide with a different parameter set. Keys keep the path as
/// a literal prefix; `clear_prefix` depends on that.
pub fn fingerprint(path: &str, params: &[(String, String)]) -> String {
  if params.is_empty() {
    return path.to_string();
  }

  let mut pairs: Vec<&(String, String)> = params.iter().collect();
  pairs.sort();

  let mut query = url::form_urlencoded::Serializer::new(String::new());
  for (k, v) in pairs {
    query.append_pair(k, v);
  }
  format!("{}?{}", path, query.finish())
}

/// Trait for persistent cache backends.
pub trait CacheStore: Send + Sync {
  /// Get the cached payload for a key, if any.
  fn get(&self, key: &str) -> Result<Option<Value>>;

  /// Store a payload under a key, replacing any previous entry.
  fn set(&self, key: &str, payload: &Value) -> Result<()>;

  /// Remove every entry whose key starts with the given path prefix.
  /// Used when a domain object is deleted so stale list/detail caches
  /// cannot resurrect it.
  fn clear_prefix(&self, prefix: &str) -> Result<()>;

  /// When the entry for a key was stored, if present.
  fn stored_at(&self, key: &str) -> Result<Option<DateTime<Utc>>>;
}

/// SQLite-backed persistent cache.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

/// Schema for the response cache table.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS response_cache (
    cache_key TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SqliteStore {
  /// Open the cache at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open an in-memory cache. Used in tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open cache database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Get the default database path.
  fn default_path() -> Result<std::path::PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("warung").join("cache.db"))
  }
}

impl CacheStore for SqliteStore {
  fn get(&self, key: &str) -> Result<Option<Value>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let raw: Option<String> = conn
      .query_row(
        "SELECT payload FROM response_cache WHERE cache_key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry: {}", e))?;

    match raw {
      Some(text) => {
        let payload = serde_json::from_str(&text)
          .map_err(|e| eyre!("Failed to deserialize cache entry {}: {}", key, e))?;
        Ok(Some(payload))
      }
      None => Ok(None),
    }
  }

  fn set(&self, key: &str, payload: &Value) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let text =
      serde_json::to_string(payload).map_err(|e| eyre!("Failed to serialize payload: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO response_cache (cache_key, payload, stored_at)
         VALUES (?, ?, datetime('now'))",
        params![key, text],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    Ok(())
  }

  fn clear_prefix(&self, prefix: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // substr comparison instead of LIKE: prefixes are URL paths and may
    // contain LIKE metacharacters (%, _).
    conn
      .execute(
        "DELETE FROM response_cache WHERE substr(cache_key, 1, length(?1)) = ?1",
        params![prefix],
      )
      .map_err(|e| eyre!("Failed to clear cache prefix {}: {}", prefix, e))?;

    Ok(())
  }

  fn stored_at(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let raw: Option<String> = conn
      .query_row(
        "SELECT stored_at FROM response_cache WHERE cache_key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache timestamp: {}", e))?;

    raw.map(|s| parse_datetime(&s)).transpose()
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
