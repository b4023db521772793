use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::PredictionSettings;
use crate::error::{PipelineError, PipelineResult};
use crate::ingest::RecordSource;
use crate::ml::{build_inference_vector, FeatureVector, ModelArtifact, ModelRegistry, SeasonIndex, NUM_FEATURES};
use crate::storage::{keys, BlobStore};
use crate::types::{
    round1, PlayerSeasonRecord, Position, PredictRequest, PredictionRecord, PredictionSnapshot,
    SnapshotRequest,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionSummary {
    pub total_predictions: usize,
    pub position_breakdown: BTreeMap<Position, usize>,
    pub avg_predicted_change: f64,
    pub top_player: Option<String>,
    pub top_predicted_points: Option<f64>,
}

impl PredictionSummary {
    pub fn from_predictions(predictions: &[PredictionRecord]) -> Self {
        let mut position_breakdown = BTreeMap::new();
        for p in predictions {
            *position_breakdown.entry(p.position).or_insert(0) += 1;
        }
        let avg_predicted_change = if predictions.is_empty() {
            0.0
        } else {
            round1(predictions.iter().map(|p| p.percent_change).sum::<f64>() / predictions.len() as f64)
        };
        Self {
            total_predictions: predictions.len(),
            position_breakdown,
            avg_predicted_change,
            top_player: predictions.first().map(|p| p.player.clone()),
            top_predicted_points: predictions.first().map(|p| p.predicted_points),
        }
    }
}

/// Scores current-season records with a published model
pub struct Predictor {
    source: Arc<dyn RecordSource>,
    registry: Arc<ModelRegistry>,
    store: Arc<dyn BlobStore>,
    settings: PredictionSettings,
}

impl Predictor {
    pub fn new(
        source: Arc<dyn RecordSource>,
        registry: Arc<ModelRegistry>,
        store: Arc<dyn BlobStore>,
        settings: PredictionSettings,
    ) -> Self {
        Self {
            source,
            registry,
            store,
            settings,
        }
    }

    pub async fn predict(&self, request: &PredictRequest) -> PipelineResult<Vec<PredictionRecord>> {
        let artifact = self.registry.load(request.version).await?;
        check_schema(&artifact)?;

        let records = self.source.load_records().await?;
        let season = current_season(&records, self.settings.season)?;
        let index = SeasonIndex::new(&records);

        if let Some(name) = &request.player {
            let record = find_player(&records, name, season)
                .ok_or_else(|| PipelineError::PlayerNotFound(format!("{} has no {} season", name, season)))?;
            let Ok(position) = record.position() else {
                debug!("{} plays {}, which the model does not project", record.player, record.position);
                return Ok(Vec::new());
            };
            if request.position.map_or(false, |wanted| wanted != position) {
                return Ok(Vec::new());
            }
            let prediction = score(&artifact, &index, record)?;
            return Ok(vec![prediction]);
        }

        let predictions = score_season(&artifact, &index, &records, season, request.position)?;
        let ranked = rank_predictions(predictions, Some(request.top_n));
        info!(
            "Predicted {} players for {} with model {} (position {:?})",
            ranked.len(),
            season + 1,
            artifact.version,
            request.position
        );
        Ok(ranked)
    }

    /// Full ranking for a season, persisted for the analyzer
    pub async fn snapshot(&self, request: &SnapshotRequest) -> PipelineResult<PredictionSnapshot> {
        let artifact = self.registry.load(request.version).await?;
        check_schema(&artifact)?;

        let records = self.source.load_records().await?;
        let season = match request.season {
            Some(season) => season,
            None => current_season(&records, self.settings.season)?,
        };
        let index = SeasonIndex::new(&records);

        let predictions = rank_predictions(score_season(&artifact, &index, &records, season, None)?, None);
        if predictions.is_empty() {
            return Err(PipelineError::DataNotFound(format!("no scorable records for {}", season)));
        }

        let snapshot = PredictionSnapshot {
            season,
            model_version: artifact.version,
            generated_at: Utc::now(),
            predictions,
        };
        let key = keys::predictions(season, &artifact.version.to_string());
        let bytes = serde_json::to_vec(&snapshot)
            .map_err(|e| PipelineError::RegistryUnavailable(format!("serialization failed: {}", e)))?;
        self.store.put(&key, bytes).await?;

        info!("Stored {} predictions at {}", snapshot.predictions.len(), key);
        Ok(snapshot)
    }
}

/// The artifact must have been trained on exactly the feature layout
/// this build produces
pub fn check_schema(artifact: &ModelArtifact) -> PipelineResult<()> {
    let expected = FeatureVector::names();
    if artifact.model.feature_names != expected {
        return Err(PipelineError::FeatureSchema(format!(
            "model {} was trained on [{}], current records produce [{}]",
            artifact.version,
            artifact.model.feature_names.join(", "),
            expected.join(", ")
        )));
    }
    artifact.model.forest.check_width(NUM_FEATURES)
}

/// Season treated as "current": the configured one, else the latest on record
pub fn current_season(records: &[PlayerSeasonRecord], configured: Option<i32>) -> PipelineResult<i32> {
    match configured.or_else(|| records.iter().map(|r| r.year).max()) {
        Some(season) => Ok(season),
        None => Err(PipelineError::DataNotFound("no player records available".to_string())),
    }
}

fn find_player<'a>(records: &'a [PlayerSeasonRecord], name: &str, season: i32) -> Option<&'a PlayerSeasonRecord> {
    let name = name.trim();
    records
        .iter()
        .filter(|r| r.year == season)
        .find(|r| r.player == name)
        .or_else(|| {
            records
                .iter()
                .filter(|r| r.year == season)
                .find(|r| r.player.eq_ignore_ascii_case(name))
        })
}

fn score_season(
    artifact: &ModelArtifact,
    index: &SeasonIndex,
    records: &[PlayerSeasonRecord],
    season: i32,
    position: Option<Position>,
) -> PipelineResult<Vec<PredictionRecord>> {
    let mut predictions = Vec::new();
    let mut skipped = 0usize;

    for (player, _) in index.iter() {
        let Some(record) = index.season(player, season) else {
            continue;
        };
        let record_position = match record.position() {
            Ok(p) => p,
            Err(_) => {
                skipped += 1;
                continue;
            }
        };
        if position.map_or(false, |wanted| wanted != record_position) {
            continue;
        }
        predictions.push(score(artifact, index, record)?);
    }

    if skipped > 0 {
        warn!("Skipped {} {} records with unsupported positions", skipped, season);
    }
    debug!(
        "Scored {} of {} records for {}",
        predictions.len(),
        records.iter().filter(|r| r.year == season).count(),
        season
    );
    Ok(predictions)
}

fn score(artifact: &ModelArtifact, index: &SeasonIndex, record: &PlayerSeasonRecord) -> PipelineResult<PredictionRecord> {
    let features = build_inference_vector(index, record)?;
    let (mean, spread) = artifact.model.forest.predict_with_spread(&features.to_array())?;
    let predicted_points = round1(mean);

    Ok(PredictionRecord {
        player: record.player.clone(),
        team: record.team.clone(),
        position: features.position,
        current_points: record.fantasy_points,
        predicted_points,
        percent_change: PredictionRecord::percent_change(record.fantasy_points, predicted_points),
        confidence: confidence(mean, spread),
        age: round1(features.age),
        experience: features.experience,
        model_version: artifact.version,
    })
}

/// Inverse relative spread of the estimators, scaled to (0, 100]
pub fn confidence(mean: f64, spread: f64) -> f64 {
    let relative = spread.max(0.0) / mean.abs().max(1.0);
    round1(100.0 / (1.0 + relative))
}

/// Descending by predicted points, ties by player name ascending
pub fn rank_predictions(mut predictions: Vec<PredictionRecord>, top_n: Option<usize>) -> Vec<PredictionRecord> {
    predictions.sort_by(|a, b| {
        b.predicted_points
            .total_cmp(&a.predicted_points)
            .then_with(|| a.player.cmp(&b.player))
    });
    if let Some(n) = top_n {
        predictions.truncate(n);
    }
    predictions
}
