use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};

use super::{BlobStore, StorageError};

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

/// Blob store on a single SQLite table. Conditional writes are single
/// statements, so SQLite's write lock makes them atomic.
pub struct SqliteBlobStore {
    pool: SqlitePool,
}

impl SqliteBlobStore {
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        info!("Initializing SQLite blob store at: {}", url);

        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        // every connection to ":memory:" is a separate database
        let in_memory = url.contains(":memory:");
        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None::<std::time::Duration>)
                .max_lifetime(None::<std::time::Duration>)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        let store = Self { pool };
        store.create_schema().await?;
        Ok(store)
    }

    async fn create_schema(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blobs (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for SqliteBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let row = sqlx::query("SELECT value FROM blobs WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| row.get::<Vec<u8>, _>("value")))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO blobs (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        debug!("sqlite: wrote {}", key);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Vec<u8>>,
        new: Vec<u8>,
    ) -> Result<bool, StorageError> {
        let result = match expected {
            None => {
                sqlx::query(
                    "INSERT INTO blobs (key, value) VALUES (?, ?) ON CONFLICT(key) DO NOTHING",
                )
                .bind(key)
                .bind(new)
                .execute(&self.pool)
                .await?
            }
            Some(current) => {
                sqlx::query("UPDATE blobs SET value = ? WHERE key = ? AND value = ?")
                    .bind(new)
                    .bind(key)
                    .bind(current)
                    .execute(&self.pool)
                    .await?
            }
        };

        let swapped = result.rows_affected() == 1;
        if swapped {
            debug!("sqlite: swapped {}", key);
        }
        Ok(swapped)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let rows = sqlx::query("SELECT key FROM blobs WHERE substr(key, 1, ?) = ? ORDER BY key")
            .bind(prefix.chars().count() as i64)
            .bind(prefix)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(|row| row.get::<String, _>("key")).collect())
    }
}
