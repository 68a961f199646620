//! Token store trait and SQLite implementation.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Mutex;

/// Durable storage for the access/refresh token pair.
///
/// Operations are async because real backends sit on device storage, but
/// they carry no retry or network semantics of their own.
#[async_trait]
pub trait TokenStore: Send + Sync {
  async fn access_token(&self) -> Result<Option<String>>;

  async fn refresh_token(&self) -> Result<Option<String>>;

  /// Store both tokens atomically. Never persists one half of the pair.
  async fn set_tokens(&self, access: &str, refresh: &str) -> Result<()>;

  async fn clear_tokens(&self) -> Result<()>;
}

/// SQLite-backed token store.
///
/// A single-row table holds the pair, so `set_tokens` is one statement and
/// the atomicity invariant comes from SQLite itself.
pub struct SqliteTokenStore {
  conn: Mutex<Connection>,
}

/// Schema for the token table. `id` is pinned to 1 so there is exactly one
/// row to replace.
const TOKEN_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS auth_tokens (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    access_token TEXT NOT NULL,
    refresh_token TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SqliteTokenStore {
  /// Open the token store at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create token store directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open token store at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open an in-memory token store. Used in tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open token store: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(TOKEN_SCHEMA)
      .map_err(|e| eyre!("Failed to run token store migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Get the default database path.
  fn default_path() -> Result<std::path::PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("warung").join("auth.db"))
  }

  fn read_column(&self, column: &str) -> Result<Option<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let sql = format!("SELECT {} FROM auth_tokens WHERE id = 1", column);
    conn
      .query_row(&sql, [], |row| row.get(0))
      .optional()
      .map_err(|e| eyre!("Failed to read token: {}", e))
  }
}

#[async_trait]
impl TokenStore for SqliteTokenStore {
  async fn access_token(&self) -> Result<Option<String>> {
    self.read_column("access_token")
  }

  async fn refresh_token(&self) -> Result<Option<String>> {
    self.read_column("refresh_token")
  }

  async fn set_tokens(&self, access: &str, refresh: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO auth_tokens (id, access_token, refresh_token, updated_at)
         VALUES (1, ?, ?, datetime('now'))",
        params![access, refresh],
      )
      .map_err(|e| eyre!("Failed to store tokens: {}", e))?;

    Ok(())
  }

  async fn clear_tokens(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM auth_tokens WHERE id = 1", [])
      .map_err(|e| eyre!("Failed to clear tokens: {}", e))?;

    Ok(())
  }
}

/// In-memory token store for tests and ephemeral sessions.
pub struct MemoryTokenStore {
  pair: Mutex<Option<(String, String)>>,
}

impl MemoryTokenStore {
  pub fn new() -> Self {
    Self {
      pair: Mutex::new(None),
    }
  }

  pub fn with_tokens(access: &str, refresh: &str) -> Self {
    Self {
      pair: Mutex::new(Some((access.to_string(), refresh.to_string()))),
    }
  }
}

impl Default for MemoryTokenStore {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
  async fn access_token(&self) -> Result<Option<String>> {
    let pair = self
      .pair
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(pair.as_ref().map(|(a, _)| a.clone()))
  }

  async fn refresh_token(&self) -> Result<Option<String>> {
    let pair = self
      .pair
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(pair.as_ref().map(|(_, r)| r.clone()))
  }

  async fn set_tokens(&self, access: &str, refresh: &str) -> Result<()> {
    let mut pair = self
      .pair
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    *pair = Some((access.to_string(), refresh.to_string()));
    Ok(())
  }

  async fn clear_tokens(&self) -> Result<()> {
    let mut pair = self
      .pair
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    *pair = None;
    Ok(())
  }
}
