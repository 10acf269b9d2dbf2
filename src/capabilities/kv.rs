use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

pub const MAX_KEY_LENGTH: usize = 512;
pub const MAX_VALUE_SIZE: usize = 10 * 1024 * 1024;

/// A validated storage slot name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KvKey(String);

impl KvKey {
    pub fn new(key: impl Into<String>) -> Result<Self, KvError> {
        let key = key.into();
        Self::validate_key(&key)?;
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate_key(key: &str) -> Result<(), KvError> {
        if key.trim().is_empty() {
            return Err(KvError::InvalidKey {
                key: key.to_string(),
                reason: "key cannot be empty".to_string(),
            });
        }

        if key.len() > MAX_KEY_LENGTH {
            return Err(KvError::InvalidKey {
                key: key.chars().take(50).collect::<String>() + "...",
                reason: format!("key exceeds maximum length of {} bytes", MAX_KEY_LENGTH),
            });
        }

        if key.contains("..") || key.starts_with('/') || key.starts_with('\\') {
            return Err(KvError::InvalidKey {
                key: key.to_string(),
                reason: "key cannot look like a path".to_string(),
            });
        }

        if key.chars().any(|c| c.is_control()) {
            return Err(KvError::InvalidKey {
                key: key.escape_default().to_string(),
                reason: "key contains invalid control characters".to_string(),
            });
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KvError {
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("value too large: {size} bytes exceeds maximum of {max} bytes")]
    ValueTooLarge { size: usize, max: usize },

    #[error("storage error: {message} (code: {code:?})")]
    Storage {
        code: StorageErrorCode,
        message: String,
    },
}

impl KvError {
    pub fn storage(code: StorageErrorCode, message: impl Into<String>) -> Self {
        Self::Storage {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageErrorCode {
    Unavailable,
    QuotaExceeded,
    Locked,
    IoError,
}

/// A string key-value slot store that outlives the process (browser local
/// storage, a SQLite file, ...). Values are opaque strings to the store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &KvKey) -> Result<Option<String>, KvError>;
    async fn set(&self, key: &KvKey, value: String) -> Result<(), KvError>;
    async fn remove(&self, key: &KvKey) -> Result<(), KvError>;
}

fn check_value_size(value: &str) -> Result<(), KvError> {
    if value.len() > MAX_VALUE_SIZE {
        return Err(KvError::ValueTooLarge {
            size: value.len(),
            max: MAX_VALUE_SIZE,
        });
    }
    Ok(())
}

/// Process-local store for hosts without durable storage, and for tests.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    slots: Mutex<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, KvError> {
        self.slots
            .lock()
            .map_err(|_| KvError::storage(StorageErrorCode::Locked, "memory store lock poisoned"))
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &KvKey) -> Result<Option<String>, KvError> {
        Ok(self.lock()?.get(key.as_str()).cloned())
    }

    async fn set(&self, key: &KvKey, value: String) -> Result<(), KvError> {
        check_value_size(&value)?;
        self.lock()?.insert(key.as_str().to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &KvKey) -> Result<(), KvError> {
        self.lock()?.remove(key.as_str());
        Ok(())
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use self::sqlite::SqliteKvStore;

#[cfg(not(target_arch = "wasm32"))]
mod sqlite {
    use super::*;
    use rusqlite::{params, Connection, OptionalExtension};
    use std::path::Path;

    /// Durable store backed by a single SQLite table.
    pub struct SqliteKvStore {
        conn: Mutex<Connection>,
    }

    fn io_error(e: rusqlite::Error) -> KvError {
        KvError::storage(StorageErrorCode::IoError, e.to_string())
    }

    impl SqliteKvStore {
        pub fn open(path: impl AsRef<Path>) -> Result<Self, KvError> {
            let conn = Connection::open(path).map_err(io_error)?;
            Self::with_connection(conn)
        }

        pub fn open_in_memory() -> Result<Self, KvError> {
            let conn = Connection::open_in_memory().map_err(io_error)?;
            Self::with_connection(conn)
        }

        fn with_connection(conn: Connection) -> Result<Self, KvError> {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS kv (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );
                "#,
            )
            .map_err(io_error)?;
            Ok(Self {
                conn: Mutex::new(conn),
            })
        }

        fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, KvError> {
            self.conn
                .lock()
                .map_err(|_| KvError::storage(StorageErrorCode::Locked, "sqlite connection lock poisoned"))
        }
    }

    #[async_trait]
    impl KeyValueStore for SqliteKvStore {
        async fn get(&self, key: &KvKey) -> Result<Option<String>, KvError> {
            let conn = self.lock()?;
            conn.query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![key.as_str()],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(io_error)
        }

        async fn set(&self, key: &KvKey, value: String) -> Result<(), KvError> {
            check_value_size(&value)?;
            let conn = self.lock()?;
            conn.execute(
                r#"
                INSERT INTO kv (key, value) VALUES (?1, ?2)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value
                "#,
                params![key.as_str(), value],
            )
            .map_err(io_error)?;
            Ok(())
        }

        async fn remove(&self, key: &KvKey) -> Result<(), KvError> {
            let conn = self.lock()?;
            conn.execute("DELETE FROM kv WHERE key = ?1", params![key.as_str()])
                .map_err(io_error)?;
            Ok(())
        }
    }
}
