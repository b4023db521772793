use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::artifact::{LatestPointer, ModelArtifact, TrainedModel, VersionId, VersionMetadata, VersionSelector};
use crate::error::{PipelineError, PipelineResult};
use crate::storage::{keys, BlobStore};

/// Attempts at claiming a fresh version id before giving up
const MAX_VERSION_CLAIMS: u32 = 16;

/// Versioned artifact store with a compare-and-swap "latest" pointer.
///
/// Publishing writes the artifact and its metadata under a version id that
/// has never been used, and only then moves the pointer. Readers resolve the
/// pointer first, so they see either the previous complete version or the
/// new one.
pub struct ModelRegistry {
    store: Arc<dyn BlobStore>,
    max_publish_attempts: u32,
}

impl ModelRegistry {
    pub fn new(store: Arc<dyn BlobStore>, max_publish_attempts: u32) -> Self {
        Self {
            store,
            max_publish_attempts: max_publish_attempts.max(1),
        }
    }

    pub async fn publish(&self, model: TrainedModel) -> PipelineResult<VersionId> {
        let (artifact, checksum, size) = self.write_artifact(model).await?;
        let version = artifact.version;

        let metadata = VersionMetadata::describe(&artifact, checksum.clone(), size);
        let metadata_bytes = encode(&metadata)?;
        if !self
            .store
            .compare_and_swap(&keys::metadata(&version.to_string()), None, metadata_bytes)
            .await?
        {
            return Err(PipelineError::PublishConflict {
                version: version.to_string(),
                reason: "metadata already exists".to_string(),
            });
        }

        self.advance_latest(version, checksum).await?;
        info!(
            "Published model {} (run {}, MAE {:.2}, R² {:.3})",
            version, artifact.model.run_id, artifact.model.metrics.mae, artifact.model.metrics.r2
        );
        Ok(version)
    }

    /// Claim an unused version id by creating its artifact key
    async fn write_artifact(&self, model: TrainedModel) -> PipelineResult<(ModelArtifact, String, usize)> {
        let highest = self.highest_version().await?;
        let now = VersionId::new(Utc::now().timestamp_micros().max(0) as u64);
        let mut candidate = match highest {
            Some(highest) if highest >= now => highest.next(),
            _ => now,
        };

        let mut artifact = ModelArtifact {
            version: candidate,
            published_at: Utc::now(),
            model,
        };

        for _ in 0..MAX_VERSION_CLAIMS {
            artifact.version = candidate;
            let bytes = encode(&artifact)?;
            let checksum = checksum(&bytes);
            let size = bytes.len();

            if self
                .store
                .compare_and_swap(&keys::artifact(&candidate.to_string()), None, bytes)
                .await?
            {
                debug!("Wrote artifact {} ({} bytes)", candidate, size);
                return Ok((artifact, checksum, size));
            }
            debug!("Version {} already claimed, bumping", candidate);
            candidate = candidate.next();
        }

        Err(PipelineError::PublishConflict {
            version: candidate.to_string(),
            reason: format!("could not claim a version id in {} attempts", MAX_VERSION_CLAIMS),
        })
    }

    async fn advance_latest(&self, version: VersionId, checksum: String) -> PipelineResult<()> {
        let pointer = LatestPointer {
            version,
            checksum,
            updated_at: Utc::now(),
        };
        let new_bytes = encode(&pointer)?;

        for attempt in 1..=self.max_publish_attempts {
            let current = self.store.get(keys::LATEST_POINTER).await?;
            if let Some(bytes) = &current {
                let existing: LatestPointer = decode(keys::LATEST_POINTER, bytes)?;
                if existing.version > version {
                    return Err(PipelineError::PublishConflict {
                        version: version.to_string(),
                        reason: format!("newer version {} is already latest", existing.version),
                    });
                }
            }

            if self
                .store
                .compare_and_swap(keys::LATEST_POINTER, current, new_bytes.clone())
                .await?
            {
                info!("Latest pointer -> {}", version);
                return Ok(());
            }

            warn!(
                "Latest pointer changed during publish of {} (attempt {}/{})",
                version, attempt, self.max_publish_attempts
            );
            tokio::time::sleep(Duration::from_millis(5 * attempt as u64)).await;
        }

        Err(PipelineError::PublishConflict {
            version: version.to_string(),
            reason: format!(
                "pointer update lost {} consecutive races",
                self.max_publish_attempts
            ),
        })
    }

    pub async fn load(&self, selector: VersionSelector) -> PipelineResult<ModelArtifact> {
        match selector {
            VersionSelector::Latest => {
                let pointer = self.latest_pointer().await?.ok_or_else(|| {
                    PipelineError::ModelNotFound("no model has been published".to_string())
                })?;
                self.load_verified(pointer.version, &pointer.checksum).await
            }
            VersionSelector::Pinned(version) => {
                let metadata = self.metadata(version).await?.ok_or_else(|| {
                    PipelineError::ModelNotFound(format!("version {} does not exist", version))
                })?;
                self.load_verified(version, &metadata.checksum).await
            }
        }
    }

    async fn load_verified(&self, version: VersionId, expected: &str) -> PipelineResult<ModelArtifact> {
        let key = keys::artifact(&version.to_string());
        let bytes = self.store.get(&key).await?.ok_or_else(|| {
            PipelineError::RegistryUnavailable(format!("artifact {} is missing", version))
        })?;

        let actual = checksum(&bytes);
        if actual != expected {
            return Err(PipelineError::RegistryUnavailable(format!(
                "artifact {} checksum mismatch (expected {}, got {})",
                version, expected, actual
            )));
        }

        let artifact: ModelArtifact = decode(&key, &bytes)?;
        debug!("Loaded model {}", version);
        Ok(artifact)
    }

    pub async fn latest_pointer(&self) -> PipelineResult<Option<LatestPointer>> {
        match self.store.get(keys::LATEST_POINTER).await? {
            Some(bytes) => Ok(Some(decode(keys::LATEST_POINTER, &bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn metadata(&self, version: VersionId) -> PipelineResult<Option<VersionMetadata>> {
        let key = keys::metadata(&version.to_string());
        match self.store.get(&key).await? {
            Some(bytes) => Ok(Some(decode(&key, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Metadata for every published version, oldest first
    pub async fn list_versions(&self) -> PipelineResult<Vec<VersionMetadata>> {
        let mut versions = Vec::new();
        for key in self.store.list(keys::METADATA_PREFIX).await? {
            if let Some(bytes) = self.store.get(&key).await? {
                versions.push(decode::<VersionMetadata>(&key, &bytes)?);
            }
        }
        versions.sort_by_key(|m| m.version);
        Ok(versions)
    }

    async fn highest_version(&self) -> PipelineResult<Option<VersionId>> {
        let keys = self.store.list(keys::ARTIFACT_PREFIX).await?;
        Ok(keys
            .iter()
            .filter_map(|key| key.strip_prefix(keys::ARTIFACT_PREFIX))
            .filter_map(|id| id.parse::<VersionId>().ok())
            .max())
    }
}

fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn encode<T: serde::Serialize>(value: &T) -> PipelineResult<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|e| PipelineError::RegistryUnavailable(format!("serialization failed: {}", e)))
}

fn decode<T: serde::de::DeserializeOwned>(key: &str, bytes: &[u8]) -> PipelineResult<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| PipelineError::RegistryUnavailable(format!("corrupt entry at {}: {}", key, e)))
}
