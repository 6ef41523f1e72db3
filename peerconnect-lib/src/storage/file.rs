//! File-backed key-value storage.

use super::{KeyValueStore, StorageError, StorageResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Storage keeping every key in a single JSON object file.
///
/// Each write is a read-modify-write of the whole file. Writes go to a
/// sibling temporary file first and are then renamed over the target, so a
/// crash never leaves a half-written document behind.
pub struct JsonFileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles issued through this handle.
    lock: Mutex<()>,
}

impl JsonFileStore {
    /// Create a store backed by `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> StorageResult<BTreeMap<String, String>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, values: &BTreeMap<String, String>) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let bytes = serde_json::to_vec_pretty(values)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StorageError::Io(format!("{}: {}", self.path.display(), e)))
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let _guard = self.lock.lock().await;
        let mut values = self.load().await?;
        values.insert(key.to_string(), value.to_string());
        self.persist(&values).await
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let _guard = self.lock.lock().await;
        let mut values = self.load().await?;
        if values.remove(key).is_some() {
            self.persist(&values).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("absent.json"));
        assert_eq!(store.get("anything").await.unwrap(), None);
        store.remove("anything").await.unwrap();
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn values_survive_a_new_handle() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("peerconnect.json");

        let store = JsonFileStore::new(&path);
        store.set("meerkat-dapp-seed", "seed-1").await.unwrap();
        store.set("cardano-peer-discovery-id", "seed-2").await.unwrap();
        store.remove("cardano-peer-discovery-id").await.unwrap();
        drop(store);

        let reopened = JsonFileStore::new(&path);
        assert_eq!(
            reopened.get("meerkat-dapp-seed").await.unwrap().as_deref(),
            Some("seed-1")
        );
        assert_eq!(reopened.get("cardano-peer-discovery-id").await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_file_is_a_serialization_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, b"not json").unwrap();

        let store = JsonFileStore::new(&path);
        let err = store.get("key").await.unwrap_err();
        assert!(matches!(err, StorageError::Serialization(_)));
    }
}
