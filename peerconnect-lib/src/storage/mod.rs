//! Persisted key-value storage.
//!
//! The peer connect core only needs a handful of string values to survive
//! restarts (seeds, the last-known discovery address and the auto-connect
//! set). Host applications plug their own backend in through
//! [`KeyValueStore`]; two reference backends ship with the crate.

mod file;

pub use file::JsonFileStore;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Storage error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// String key-value storage.
///
/// A missing key means "not yet established" and is never an error.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Delete a value. Deleting a missing key succeeds.
    async fn remove(&self, key: &str) -> StorageResult<()>;
}

/// In-memory storage.
///
/// This is useful for testing and short-lived processes.
/// Data is not persisted across restarts.
#[derive(Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.values.read().map(|v| v.len()).unwrap_or(0)
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let values = self
            .values
            .read()
            .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut values = self
            .values
            .write()
            .map_err(|e| StorageError::Other(e.to_string()))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let mut values = self
            .values
            .write()
            .map_err(|e| StorageError::Other(e.to_string()))?;
        values.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        assert_eq!(store.get("seed").await.unwrap(), None);

        store.set("seed", "abc").await.unwrap();
        assert_eq!(store.get("seed").await.unwrap().as_deref(), Some("abc"));

        store.set("seed", "def").await.unwrap();
        assert_eq!(store.get("seed").await.unwrap().as_deref(), Some("def"));
        assert_eq!(store.len(), 1);

        store.remove("seed").await.unwrap();
        store.remove("seed").await.unwrap();
        assert_eq!(store.get("seed").await.unwrap(), None);
    }
}
