//! SQLite storage layer
//!
//! Async-safe SQLite operations via spawn_blocking.
//! rusqlite::Connection is not Sync, so it lives behind Arc<Mutex<>>.

use crate::util::errors::{GatewayError, GatewayResult};
use log::warn;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::task::spawn_blocking;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS token_refresh_progress (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    running INTEGER NOT NULL DEFAULT 0,
    current INTEGER NOT NULL DEFAULT 0,
    total INTEGER NOT NULL DEFAULT 0,
    success INTEGER NOT NULL DEFAULT 0,
    failed INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS request_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    time TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    ip TEXT,
    model TEXT,
    duration REAL,
    status INTEGER,
    key_name TEXT,
    token_suffix TEXT,
    error TEXT
);

CREATE INDEX IF NOT EXISTS idx_request_logs_timestamp ON request_logs(timestamp);
"#;

/// Async-safe SQLite store shared by the settings, progress, and
/// request-log services.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the gateway database.
    pub fn open(path: &Path) -> GatewayResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| GatewayError::storage(format!("failed to open {:?}: {}", path, e)))?;
        Self::from_connection(conn)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> GatewayResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| GatewayError::storage(format!("failed to open in-memory db: {}", e)))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> GatewayResult<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| GatewayError::storage(format!("schema init failed: {}", e)))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    pub async fn call<F, T>(&self, f: F) -> GatewayResult<T>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(|poisoned| {
                warn!("sqlite mutex poisoned, recovering");
                poisoned.into_inner()
            });
            f(&mut guard).map_err(|e| GatewayError::storage(e.to_string()))
        })
        .await
        .map_err(|e| GatewayError::storage(format!("spawn_blocking failed: {}", e)))?
    }
}
