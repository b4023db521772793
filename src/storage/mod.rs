pub mod sled_store;
pub mod sqlite;

pub use sled_store::SledBlobStore;
pub use sqlite::SqliteBlobStore;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::config::{StorageBackend, StorageSettings};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Corrupt entry at {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Key/value blob storage shared by ingestion, the model registry and
/// prediction snapshots.
///
/// Writes are durable once the returned future resolves. Keys are plain
/// `/`-separated strings; `list` returns them in ascending byte order.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Unconditional write (snapshots only; never used for artifacts)
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

    /// Atomically replace the value at `key` if it currently equals
    /// `expected`. `expected == None` means "create only if absent".
    /// Returns false when the current value did not match.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Vec<u8>>,
        new: Vec<u8>,
    ) -> Result<bool, StorageError>;

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Key layout
pub mod keys {
    pub const RAW_PREFIX: &str = "raw_data/";
    pub const CURRENT_YEAR_PREFIX: &str = "current_year/";
    pub const PREDICTIONS_PREFIX: &str = "predictions/";
    pub const ARTIFACT_PREFIX: &str = "models/artifacts/";
    pub const METADATA_PREFIX: &str = "models/metadata/";
    pub const LATEST_POINTER: &str = "models/latest";

    pub fn raw(timestamp: &str) -> String {
        format!("{}{}", RAW_PREFIX, timestamp)
    }

    pub fn current_year(year: i32) -> String {
        format!("{}{}", CURRENT_YEAR_PREFIX, year)
    }

    pub fn predictions(year: i32, version: &str) -> String {
        format!("{}{}/{}", PREDICTIONS_PREFIX, year, version)
    }

    pub fn artifact(version: &str) -> String {
        format!("{}{}", ARTIFACT_PREFIX, version)
    }

    pub fn metadata(version: &str) -> String {
        format!("{}{}", METADATA_PREFIX, version)
    }
}

pub async fn open_store(settings: &StorageSettings) -> Result<Arc<dyn BlobStore>, StorageError> {
    match settings.backend {
        StorageBackend::Sled => {
            info!("Opening sled blob store at {}", settings.sled_path);
            Ok(Arc::new(SledBlobStore::open(&settings.sled_path)?))
        }
        StorageBackend::Sqlite => {
            info!("Opening SQLite blob store at {}", settings.sqlite_url);
            Ok(Arc::new(SqliteBlobStore::connect(&settings.sqlite_url).await?))
        }
    }
}

/// Behaviour every backend must share
#[cfg(test)]
pub(crate) async fn exercise_store(store: &dyn BlobStore) {
    assert_eq!(store.get("missing").await.unwrap(), None);

    store.put("raw_data/2", b"two".to_vec()).await.unwrap();
    store.put("raw_data/1", b"one".to_vec()).await.unwrap();
    store.put("other/1", b"x".to_vec()).await.unwrap();
    assert_eq!(store.get("raw_data/1").await.unwrap(), Some(b"one".to_vec()));

    let listed = store.list("raw_data/").await.unwrap();
    assert_eq!(listed, vec!["raw_data/1".to_string(), "raw_data/2".to_string()]);

    // create-only
    assert!(store.compare_and_swap("k", None, b"a".to_vec()).await.unwrap());
    assert!(!store.compare_and_swap("k", None, b"b".to_vec()).await.unwrap());
    assert_eq!(store.get("k").await.unwrap(), Some(b"a".to_vec()));

    // conditional replace
    assert!(!store
        .compare_and_swap("k", Some(b"stale".to_vec()), b"c".to_vec())
        .await
        .unwrap());
    assert!(store
        .compare_and_swap("k", Some(b"a".to_vec()), b"c".to_vec())
        .await
        .unwrap());
    assert_eq!(store.get("k").await.unwrap(), Some(b"c".to_vec()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(keys::raw("20240101_120000"), "raw_data/20240101_120000");
        assert_eq!(keys::current_year(2024), "current_year/2024");
        assert_eq!(keys::predictions(2024, "0001"), "predictions/2024/0001");
        assert!(keys::artifact("0001").starts_with(keys::ARTIFACT_PREFIX));
        assert!(keys::metadata("0001").starts_with(keys::METADATA_PREFIX));
    }

    #[tokio::test]
    async fn test_open_store_sqlite_memory() {
        let settings = StorageSettings {
            backend: StorageBackend::Sqlite,
            sqlite_url: "sqlite::memory:".to_string(),
            ..StorageSettings::default()
        };
        let store = open_store(&settings).await.unwrap();
        exercise_store(store.as_ref()).await;
    }
}
