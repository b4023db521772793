use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::forest::{ForestParams, RandomForest};
use super::metrics::ModelMetrics;
use crate::error::PipelineError;

/// Model type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelType {
    RandomForest,
}

/// Registry version id: microseconds since the epoch at publish time,
/// bumped past any existing version. Rendered zero-padded so that the
/// lexical order of storage keys matches numeric order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionId(u64);

impl VersionId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for VersionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:020}", self.0)
    }
}

impl FromStr for VersionId {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| PipelineError::Validation(format!("invalid model version '{}'", s)))
    }
}

impl TryFrom<String> for VersionId {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VersionId> for String {
    fn from(version: VersionId) -> Self {
        version.to_string()
    }
}

/// Which artifact a load should resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionSelector {
    #[default]
    Latest,
    Pinned(VersionId),
}

impl FromStr for VersionSelector {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("latest") {
            Ok(Self::Latest)
        } else {
            Ok(Self::Pinned(s.parse()?))
        }
    }
}

impl std::fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::Pinned(version) => write!(f, "{}", version),
        }
    }
}

/// Output of a successful training run, before it has a version
#[derive(Debug, Serialize, Deserialize)]
pub struct TrainedModel {
    pub model_type: ModelType,
    pub forest: RandomForest,
    /// Ordered feature names the forest was fitted on
    pub feature_names: Vec<String>,
    /// Seasons whose records were labeled for training
    pub training_years: Vec<i32>,
    pub hyperparameters: ForestParams,
    pub metrics: ModelMetrics,
    pub run_id: Uuid,
    pub trained_at: DateTime<Utc>,
}

/// Published, immutable model
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: VersionId,
    pub published_at: DateTime<Utc>,
    pub model: TrainedModel,
}

/// Everything about a version except the forest itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionMetadata {
    pub version: VersionId,
    pub model_type: ModelType,
    pub run_id: Uuid,
    pub trained_at: DateTime<Utc>,
    pub published_at: DateTime<Utc>,
    pub training_years: Vec<i32>,
    pub feature_names: Vec<String>,
    pub hyperparameters: ForestParams,
    pub metrics: ModelMetrics,
    /// SHA-256 of the serialized artifact
    pub checksum: String,
    pub size_bytes: usize,
}

impl VersionMetadata {
    pub fn describe(artifact: &ModelArtifact, checksum: String, size_bytes: usize) -> Self {
        let model = &artifact.model;
        Self {
            version: artifact.version,
            model_type: model.model_type,
            run_id: model.run_id,
            trained_at: model.trained_at,
            published_at: artifact.published_at,
            training_years: model.training_years.clone(),
            feature_names: model.feature_names.clone(),
            hyperparameters: model.hyperparameters.clone(),
            metrics: model.metrics.clone(),
            checksum,
            size_bytes,
        }
    }
}

/// Contents of the mutable `models/latest` record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestPointer {
    pub version: VersionId,
    pub checksum: String,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_id_padding_orders_lexically() {
        let small = VersionId::new(999);
        let large = VersionId::new(1_000);
        assert!(small < large);
        assert!(small.to_string() < large.to_string());
        assert_eq!(small.to_string().len(), 20);
    }

    #[test]
    fn test_version_id_serde_as_string() {
        let version = VersionId::new(1_700_000_000_123_456);
        let json = serde_json::to_string(&version).unwrap();
        assert_eq!(json, "\"00001700000000123456\"");
        let restored: VersionId = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, version);
    }

    #[test]
    fn test_selector_parsing() {
        assert_eq!("latest".parse::<VersionSelector>().unwrap(), VersionSelector::Latest);
        assert_eq!(
            "42".parse::<VersionSelector>().unwrap(),
            VersionSelector::Pinned(VersionId::new(42))
        );
        let err = "v1.2".parse::<VersionSelector>().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ValidationError);
    }
}
