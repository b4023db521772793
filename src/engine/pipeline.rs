use std::path::Path;
use std::sync::Arc;
use tracing::info;

use super::{Predictor, Trainer};
use crate::analytics::Analyzer;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::ingest::{load_rows, normalize_rows, IngestStore, IngestSummary, RawStatRow, RecordSource, SnapshotRecordSource, StatsFeedClient};
use crate::ml::ModelRegistry;
use crate::storage::{open_store, BlobStore};

/// Every pipeline component wired to one blob store
pub struct Pipeline {
    pub config: PipelineConfig,
    pub registry: Arc<ModelRegistry>,
    pub ingest: IngestStore,
    pub trainer: Trainer,
    pub predictor: Predictor,
    pub analyzer: Analyzer,
}

impl Pipeline {
    pub async fn open(config: PipelineConfig) -> PipelineResult<Self> {
        let store = open_store(&config.storage).await?;
        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: PipelineConfig, store: Arc<dyn BlobStore>) -> Self {
        let source: Arc<dyn RecordSource> = Arc::new(SnapshotRecordSource::new(store.clone()));
        let registry = Arc::new(ModelRegistry::new(store.clone(), config.registry.max_publish_attempts));

        let trainer = Trainer::new(source.clone(), registry.clone(), config.training.clone());
        let predictor = Predictor::new(
            source.clone(),
            registry.clone(),
            store.clone(),
            config.prediction.clone(),
        );
        let analyzer = Analyzer::new(store.clone(), source, config.analysis.clone());

        Self {
            ingest: IngestStore::new(store),
            config,
            registry,
            trainer,
            predictor,
            analyzer,
        }
    }

    pub async fn ingest_rows(&self, rows: Vec<RawStatRow>) -> PipelineResult<IngestSummary> {
        let report = normalize_rows(rows);
        self.ingest.save(report.records).await
    }

    pub async fn ingest_file(&self, path: &Path) -> PipelineResult<IngestSummary> {
        let rows = load_rows(path)?;
        self.ingest_rows(rows).await
    }

    /// Pull `years` from the HTTP feed; `url` overrides `ingest.feed_url`
    pub async fn ingest_feed(&self, url: Option<&str>, years: &[i32]) -> PipelineResult<IngestSummary> {
        let url = url
            .or(self.config.ingest.feed_url.as_deref())
            .ok_or_else(|| PipelineError::Config("no feed URL given and ingest.feed_url is unset".to_string()))?;
        if years.is_empty() {
            return Err(PipelineError::Validation("no seasons to fetch".to_string()));
        }

        info!("Fetching {} seasons from {}", years.len(), url);
        let client = StatsFeedClient::new(url, &self.config.ingest)?;
        let rows = client.fetch_seasons(years).await?;
        self.ingest_rows(rows).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainingProfile;
    use crate::ingest::RawStatRow;
    use crate::ml::VersionSelector;
    use crate::storage::SledBlobStore;
    use crate::testing::synthetic_league;
    use crate::types::{AnalysisType, AnalyzeRequest, PredictRequest, SnapshotRequest, TrainBody};

    fn as_rows() -> Vec<RawStatRow> {
        synthetic_league(40, 2017..=2023)
            .into_iter()
            .map(|r| RawStatRow {
                player: Some(r.player),
                year: Some(r.year),
                team: Some(r.team),
                position: Some(r.position),
                fantasy_points: Some(r.fantasy_points),
                games_played: Some(r.games_played),
                age: r.age,
                experience: r.experience,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_end_to_end() {
        let mut config = PipelineConfig::default();
        config.training.profile = TrainingProfile::Quick;
        let pipeline = Pipeline::with_store(config, Arc::new(SledBlobStore::temporary().unwrap()));

        let summary = pipeline.ingest_rows(as_rows()).await.unwrap();
        assert_eq!(summary.total_records, 280);

        let request = TrainBody::default()
            .into_request(&pipeline.config.training)
            .unwrap();
        let version = pipeline.trainer.train_request(request).await.unwrap();

        let predictions = pipeline
            .predictor
            .predict(&PredictRequest {
                position: None,
                top_n: 10,
                player: None,
                version: VersionSelector::Latest,
            })
            .await
            .unwrap();
        assert_eq!(predictions.len(), 10);
        assert!(predictions.iter().all(|p| p.model_version == version));

        pipeline
            .predictor
            .snapshot(&SnapshotRequest {
                season: None,
                version: VersionSelector::Latest,
            })
            .await
            .unwrap();

        let report = pipeline
            .analyzer
            .analyze(&AnalyzeRequest {
                analysis_type: AnalysisType::All,
                season: None,
                version: None,
            })
            .await
            .unwrap();
        assert_eq!(report.metadata.model_version, Some(version));
        assert_eq!(report.predictions_analysis.unwrap().total_predictions, 40);
    }

    #[tokio::test]
    async fn test_feed_requires_url() {
        let pipeline = Pipeline::with_store(
            PipelineConfig::default(),
            Arc::new(SledBlobStore::temporary().unwrap()),
        );
        let err = pipeline.ingest_feed(None, &[2023]).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConfigError);
    }
}
