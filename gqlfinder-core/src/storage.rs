// Durable key/value storage for the aggregator

use crate::error::{Result, StoreError};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Well-known key holding the tab -> records mapping.
pub const ENDPOINTS_KEY: &str = "endpoints";

/// Keyed JSON storage owned by the aggregator.
pub trait Storage: Send {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&mut self, key: &str, value: &Value) -> Result<()>;
}

pub struct SqliteStorage {
    conn: Connection,
}

fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

impl SqliteStorage {
    pub fn drop(path: &Path) -> Result<()> {
        fs::remove_file(path)?;
        Ok(())
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            ",
        )?;

        let storage = SqliteStorage { conn };
        storage.init_schema()?;
        Ok(storage)
    }

    pub fn open_in_memory() -> Result<Self> {
        let storage = SqliteStorage {
            conn: Connection::open_in_memory()?,
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS storage (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,  -- JSON document
                updated_at INTEGER NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    pub fn get_connection(&self) -> &Connection {
        &self.conn
    }
}

impl Storage for SqliteStorage {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM storage WHERE key = ?1")?;

        let raw: Option<String> = stmt.query_row(params![key], |row| row.get(0)).optional()?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn set(&mut self, key: &str, value: &Value) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.conn.execute(
            "INSERT INTO storage (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, raw, current_timestamp()],
        )?;
        Ok(())
    }
}

/// In-process storage. Clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<String, Value>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &Value) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        entries.insert(key.to_string(), value.clone());
        Ok(())
    }
}
