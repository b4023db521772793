pub mod file;
pub mod http;
pub mod normalize;
pub mod retry;

pub use file::load_rows;
pub use http::StatsFeedClient;
pub use normalize::{dedupe_records, normalize_rows, RawStatRow};
pub use retry::RetryPolicy;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{PipelineError, PipelineResult};
use crate::storage::{keys, BlobStore};
use crate::types::PlayerSeasonRecord;

/// Supplies deduplicated, well-formed season records to the pipeline
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn load_records(&self) -> PipelineResult<Vec<PlayerSeasonRecord>>;
}

/// One ingestion run as persisted under `raw_data/`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSnapshot {
    pub ingested_at: DateTime<Utc>,
    pub records: Vec<PlayerSeasonRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSummary {
    pub raw_key: String,
    pub current_year_key: Option<String>,
    pub new_records: usize,
    pub total_records: usize,
    pub players_by_year: BTreeMap<i32, usize>,
    pub players_by_position: BTreeMap<String, usize>,
}

/// Reads the most recent `raw_data/` snapshot
pub struct SnapshotRecordSource {
    store: Arc<dyn BlobStore>,
}

impl SnapshotRecordSource {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    async fn latest_snapshot(&self) -> PipelineResult<Option<IngestSnapshot>> {
        let snapshots = self.store.list(keys::RAW_PREFIX).await?;
        let Some(key) = snapshots.last() else {
            return Ok(None);
        };
        let bytes = self
            .store
            .get(key)
            .await?
            .ok_or_else(|| PipelineError::DataNotFound(format!("snapshot {} vanished", key)))?;
        let snapshot = serde_json::from_slice(&bytes).map_err(|e| {
            PipelineError::RegistryUnavailable(format!("corrupt snapshot {}: {}", key, e))
        })?;
        debug!("Using raw snapshot {}", key);
        Ok(Some(snapshot))
    }
}

#[async_trait]
impl RecordSource for SnapshotRecordSource {
    async fn load_records(&self) -> PipelineResult<Vec<PlayerSeasonRecord>> {
        match self.latest_snapshot().await? {
            Some(snapshot) => Ok(snapshot.records),
            None => Err(PipelineError::DataNotFound(
                "no player data has been ingested".to_string(),
            )),
        }
    }
}

/// Writes ingested records: a full raw snapshot keyed by timestamp plus the
/// latest season on its own.
pub struct IngestStore {
    store: Arc<dyn BlobStore>,
    source: SnapshotRecordSource,
}

impl IngestStore {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            source: SnapshotRecordSource::new(store.clone()),
            store,
        }
    }

    /// Merge `records` over the previous snapshot (new rows win per
    /// player and year) and persist the result.
    pub async fn save(&self, records: Vec<PlayerSeasonRecord>) -> PipelineResult<IngestSummary> {
        if records.is_empty() {
            return Err(PipelineError::DataNotFound(
                "nothing to ingest after normalization".to_string(),
            ));
        }
        let new_records = records.len();

        let mut merged = records;
        if let Some(previous) = self.source.latest_snapshot().await? {
            merged.extend(previous.records);
        }
        let mut merged = dedupe_records(merged);
        merged.sort_by(|a, b| a.year.cmp(&b.year).then_with(|| a.player.cmp(&b.player)));

        let now = Utc::now();
        let raw_key = keys::raw(&now.format("%Y%m%d_%H%M%S_%6f").to_string());
        let snapshot = IngestSnapshot {
            ingested_at: now,
            records: merged,
        };
        self.store.put(&raw_key, encode(&snapshot)?).await?;

        let current_year = snapshot.records.iter().map(|r| r.year).max();
        let current_year_key = match current_year {
            Some(year) => {
                let key = keys::current_year(year);
                let current = IngestSnapshot {
                    ingested_at: now,
                    records: snapshot
                        .records
                        .iter()
                        .filter(|r| r.year == year)
                        .cloned()
                        .collect(),
                };
                self.store.put(&key, encode(&current)?).await?;
                Some(key)
            }
            None => None,
        };

        let mut players_by_year = BTreeMap::new();
        let mut players_by_position = BTreeMap::new();
        for record in &snapshot.records {
            *players_by_year.entry(record.year).or_insert(0) += 1;
            *players_by_position.entry(record.position.clone()).or_insert(0) += 1;
        }

        info!(
            "Ingested {} records ({} total) into {}",
            new_records,
            snapshot.records.len(),
            raw_key
        );

        Ok(IngestSummary {
            raw_key,
            current_year_key,
            new_records,
            total_records: snapshot.records.len(),
            players_by_year,
            players_by_position,
        })
    }
}

fn encode<T: Serialize>(value: &T) -> PipelineResult<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|e| PipelineError::RegistryUnavailable(format!("serialization failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SledBlobStore;
    use crate::testing::record;

    #[tokio::test]
    async fn test_empty_store_has_no_data() {
        let store: Arc<dyn BlobStore> = Arc::new(SledBlobStore::temporary().unwrap());
        let err = SnapshotRecordSource::new(store).load_records().await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::DataNotFoundError);
    }

    #[tokio::test]
    async fn test_save_writes_raw_and_current_year() {
        let store: Arc<dyn BlobStore> = Arc::new(SledBlobStore::temporary().unwrap());
        let ingest = IngestStore::new(store.clone());

        let summary = ingest
            .save(vec![
                record("A", 2022, "KC", "QB", 280.0),
                record("A", 2023, "KC", "QB", 300.0),
                record("B", 2023, "NE", "WR", 150.0),
            ])
            .await
            .unwrap();

        assert_eq!(summary.total_records, 3);
        assert_eq!(summary.current_year_key.as_deref(), Some("current_year/2023"));
        assert_eq!(summary.players_by_year[&2023], 2);

        let current = store.get("current_year/2023").await.unwrap().unwrap();
        let current: IngestSnapshot = serde_json::from_slice(&current).unwrap();
        assert_eq!(current.records.len(), 2);
    }

    #[tokio::test]
    async fn test_later_ingest_overrides_and_extends() {
        let store: Arc<dyn BlobStore> = Arc::new(SledBlobStore::temporary().unwrap());
        let ingest = IngestStore::new(store.clone());

        ingest
            .save(vec![record("A", 2022, "KC", "QB", 280.0)])
            .await
            .unwrap();
        ingest
            .save(vec![
                record("A", 2022, "KC", "QB", 285.5),
                record("A", 2023, "KC", "QB", 300.0),
            ])
            .await
            .unwrap();

        let records = SnapshotRecordSource::new(store).load_records().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].fantasy_points, 285.5);
    }
}
