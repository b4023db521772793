use async_trait::async_trait;
use tracing::debug;

use super::{BlobStore, StorageError};

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

/// Embedded blob store; sled's native compare-and-swap backs the
/// conditional writes.
pub struct SledBlobStore {
    db: sled::Db,
}

impl SledBlobStore {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Throwaway store removed on drop
    #[cfg(test)]
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }
}

#[async_trait]
impl BlobStore for SledBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.db.get(key.as_bytes())?.map(|value| value.to_vec()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.db.insert(key.as_bytes(), value)?;
        self.db.flush()?;
        debug!("sled: wrote {}", key);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Vec<u8>>,
        new: Vec<u8>,
    ) -> Result<bool, StorageError> {
        let outcome = self
            .db
            .compare_and_swap(key.as_bytes(), expected.as_deref(), Some(new))?;

        match outcome {
            Ok(()) => {
                self.db.flush()?;
                debug!("sled: swapped {}", key);
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, _) = entry?;
            let key = String::from_utf8(key.to_vec()).map_err(|e| StorageError::Corrupt {
                key: prefix.to_string(),
                reason: e.to_string(),
            })?;
            keys.push(key);
        }
        Ok(keys)
    }
}
