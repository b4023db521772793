use chrono::Utc;
use ndarray::{Array1, Array2};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::TrainingSettings;
use crate::error::{PipelineError, PipelineResult};
use crate::ingest::RecordSource;
use crate::ml::{
    build_training_set, metrics, FeatureVector, ForestParams, LabeledExample, ModelMetrics,
    ModelRegistry, ModelType, RandomForest, SeasonIndex, TrainedModel, VersionId, NUM_FEATURES,
};
use crate::types::{PlayerSeasonRecord, TrainRequest, YearWindow};

/// Fits and publishes season-over-season models
pub struct Trainer {
    source: Arc<dyn RecordSource>,
    registry: Arc<ModelRegistry>,
    settings: TrainingSettings,
    timeout: Duration,
}

impl Trainer {
    pub fn new(
        source: Arc<dyn RecordSource>,
        registry: Arc<ModelRegistry>,
        settings: TrainingSettings,
    ) -> Self {
        let timeout = Duration::from_secs(settings.timeout_secs);
        Self {
            source,
            registry,
            settings,
            timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn train_request(&self, request: TrainRequest) -> PipelineResult<VersionId> {
        let records = self.source.load_records().await?;
        let years = resolve_years(&records, &request.years)?;
        self.train_on(records, &years, request.hyperparameters).await
    }

    pub async fn train(&self, years: &BTreeSet<i32>, hyperparameters: ForestParams) -> PipelineResult<VersionId> {
        let records = self.source.load_records().await?;
        self.train_on(records, years, hyperparameters).await
    }

    async fn train_on(
        &self,
        records: Vec<PlayerSeasonRecord>,
        years: &BTreeSet<i32>,
        hyperparameters: ForestParams,
    ) -> PipelineResult<VersionId> {
        let (Some(&first), Some(&last)) = (years.first(), years.last()) else {
            return Err(PipelineError::Validation("no training years given".to_string()));
        };
        hyperparameters
            .validate()
            .map_err(|errors| PipelineError::Validation(errors.join(", ")))?;

        let earliest = self.settings.lookback_years.map(|lookback| first - lookback);
        let window: Vec<PlayerSeasonRecord> = records
            .into_iter()
            .filter(|r| r.year <= last + 1 && earliest.map_or(true, |e| r.year >= e))
            .collect();
        if !window.iter().any(|r| years.contains(&r.year)) {
            return Err(PipelineError::DataNotFound(format!(
                "no records for seasons {}-{}",
                first, last
            )));
        }

        let index = SeasonIndex::new(&window);
        let examples = build_training_set(&index, years)?;
        info!(
            "Training on seasons {:?}: {} labeled examples from {} players",
            years,
            examples.len(),
            index.player_count()
        );

        let settings = self.settings.clone();
        let training_years: Vec<i32> = years.iter().copied().collect();
        let started = Instant::now();
        let cancel = Arc::new(AtomicBool::new(false));
        let task_cancel = Arc::clone(&cancel);
        let task = tokio::task::spawn_blocking(move || {
            fit_model(examples, training_years, hyperparameters, &settings, &task_cancel)
        });

        let model = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join_error)) => {
                return Err(PipelineError::TrainingFailure(format!(
                    "training task failed: {}",
                    join_error
                )))
            }
            Err(_) => {
                cancel.store(true, Ordering::Relaxed);
                warn!("Training exceeded {:?}; nothing published", self.timeout);
                return Err(PipelineError::Timeout {
                    operation: "training".to_string(),
                    budget_ms: self.timeout.as_millis() as u64,
                });
            }
        };
        debug!("Fit finished in {:?}", started.elapsed());

        self.registry.publish(model).await
    }
}

/// Seasons to train on for a request window
pub fn resolve_years(records: &[PlayerSeasonRecord], window: &YearWindow) -> PipelineResult<BTreeSet<i32>> {
    match window {
        YearWindow::Explicit(years) => Ok(years.clone()),
        YearWindow::Recent(count) => {
            let seasons: BTreeSet<i32> = records.iter().map(|r| r.year).collect();
            let labelable: Vec<i32> = seasons
                .iter()
                .copied()
                .filter(|year| seasons.contains(&(year + 1)))
                .collect();
            if labelable.is_empty() {
                return Err(PipelineError::DataNotFound(
                    "need at least two consecutive seasons of data to train".to_string(),
                ));
            }
            let skip = labelable.len().saturating_sub(*count);
            Ok(labelable[skip..].iter().copied().collect())
        }
    }
}

/// Deterministic player-level split: a player's seasons all land on the
/// same side.
pub fn is_validation_player(player: &str, validation_pct: u8) -> bool {
    let digest = Sha256::digest(player.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix) % 100 < validation_pct as u64
}

fn to_matrix(examples: &[&LabeledExample]) -> (Array2<f64>, Array1<f64>) {
    let mut x = Array2::<f64>::zeros((examples.len(), NUM_FEATURES));
    let mut y = Array1::<f64>::zeros(examples.len());
    for (i, example) in examples.iter().enumerate() {
        for (j, value) in example.features.to_array().iter().enumerate() {
            x[[i, j]] = *value;
        }
        y[i] = example.label;
    }
    (x, y)
}

/// Gate, split, fit and evaluate. Any rejection happens here, before the
/// registry is touched. The fit stops between trees once `cancel` is set.
pub fn fit_model(
    examples: Vec<LabeledExample>,
    training_years: Vec<i32>,
    hyperparameters: ForestParams,
    settings: &TrainingSettings,
    cancel: &AtomicBool,
) -> PipelineResult<TrainedModel> {
    if examples.len() < settings.min_examples {
        return Err(PipelineError::TrainingFailure(format!(
            "only {} labeled examples, need at least {}",
            examples.len(),
            settings.min_examples
        )));
    }

    let (validation, train): (Vec<&LabeledExample>, Vec<&LabeledExample>) = examples
        .iter()
        .partition(|e| is_validation_player(&e.features.player, settings.validation_pct));
    if train.is_empty() || validation.is_empty() {
        return Err(PipelineError::TrainingFailure(format!(
            "player split left {} training and {} validation examples",
            train.len(),
            validation.len()
        )));
    }

    let (x_train, y_train) = to_matrix(&train);
    let (x_val, y_val) = to_matrix(&validation);

    let label_mean = y_train.mean().unwrap_or(0.0);
    if y_train.iter().all(|y| (y - label_mean).abs() <= f64::EPSILON) {
        return Err(PipelineError::TrainingFailure(
            "training labels have zero variance".to_string(),
        ));
    }

    let forest = RandomForest::fit_until(&x_train, &y_train, &hyperparameters, cancel)?;

    let predicted = forest.predict_batch(&x_val)?;
    let actual = y_val.to_vec();
    let r2 = metrics::r2_score(&actual, &predicted).ok_or_else(|| {
        PipelineError::TrainingFailure(
            "R² is undefined: validation labels have zero variance".to_string(),
        )
    })?;

    let feature_importance: BTreeMap<String, f64> = FeatureVector::names()
        .into_iter()
        .zip(forest.feature_importances().iter().copied())
        .collect();

    let count_players = |set: &[&LabeledExample]| {
        set.iter()
            .map(|e| e.features.player.as_str())
            .collect::<HashSet<_>>()
            .len()
    };

    let model_metrics = ModelMetrics {
        mae: metrics::mean_absolute_error(&actual, &predicted),
        rmse: metrics::root_mean_squared_error(&actual, &predicted),
        r2,
        train_samples: train.len(),
        validation_samples: validation.len(),
        train_players: count_players(&train),
        validation_players: count_players(&validation),
        feature_importance,
    };

    info!(
        "Validation: MAE {:.2}, RMSE {:.2}, R² {:.3} ({} train / {} validation)",
        model_metrics.mae,
        model_metrics.rmse,
        model_metrics.r2,
        model_metrics.train_samples,
        model_metrics.validation_samples
    );

    Ok(TrainedModel {
        model_type: ModelType::RandomForest,
        forest,
        feature_names: FeatureVector::names(),
        training_years,
        hyperparameters,
        metrics: model_metrics,
        run_id: Uuid::new_v4(),
        trained_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainingProfile;
    use crate::error::ErrorKind;
    use crate::ml::VersionSelector;
    use crate::storage::{BlobStore, SledBlobStore};
    use crate::testing::{record, synthetic_league, StaticRecords};

    fn setup(records: Vec<PlayerSeasonRecord>) -> (Trainer, Arc<ModelRegistry>) {
        let store: Arc<dyn BlobStore> = Arc::new(SledBlobStore::temporary().unwrap());
        let registry = Arc::new(ModelRegistry::new(store, 5));
        let trainer = Trainer::new(
            Arc::new(StaticRecords(records)),
            registry.clone(),
            TrainingSettings::default(),
        );
        (trainer, registry)
    }

    fn quick() -> ForestParams {
        TrainingProfile::Quick.params(&ForestParams::default())
    }

    #[test]
    fn test_split_is_stable_per_player() {
        for player in ["Player 00", "Player 17", "Someone Else"] {
            assert_eq!(is_validation_player(player, 20), is_validation_player(player, 20));
        }
        assert!(!is_validation_player("Anyone", 0));
        assert!(is_validation_player("Anyone", 100));

        let held_out = (0..200)
            .filter(|p| is_validation_player(&format!("Player {:02}", p), 20))
            .count();
        assert!(held_out > 10 && held_out < 80, "held out {}", held_out);
    }

    #[test]
    fn test_resolve_recent_window() {
        let records = synthetic_league(4, 2018..=2023);
        let years = resolve_years(&records, &YearWindow::Recent(3)).unwrap();
        // 2023 has no following season
        assert_eq!(years.into_iter().collect::<Vec<_>>(), vec![2020, 2021, 2022]);

        let single = synthetic_league(4, 2023..=2023);
        assert!(resolve_years(&single, &YearWindow::Recent(3)).is_err());
    }

    #[tokio::test]
    async fn test_train_publishes_version() {
        let (trainer, registry) = setup(synthetic_league(40, 2017..=2023));
        let years: BTreeSet<i32> = (2018..=2022).collect();

        let version = trainer.train(&years, quick()).await.unwrap();

        let artifact = registry.load(VersionSelector::Latest).await.unwrap();
        assert_eq!(artifact.version, version);
        assert_eq!(artifact.model.training_years, vec![2018, 2019, 2020, 2021, 2022]);
        assert_eq!(artifact.model.feature_names, FeatureVector::names());
        assert!(artifact.model.metrics.r2.is_finite());
        assert!(artifact.model.metrics.validation_samples > 0);
        assert_eq!(artifact.model.metrics.feature_importance.len(), NUM_FEATURES);
    }

    #[tokio::test]
    async fn test_tiny_dataset_is_rejected_without_publishing() {
        let records = vec![
            record("A", 2020, "KC", "QB", 250.0),
            record("A", 2021, "KC", "QB", 270.0),
            record("A", 2022, "KC", "QB", 290.0),
            record("A", 2023, "KC", "QB", 300.0),
        ];
        let (trainer, registry) = setup(records);
        let years: BTreeSet<i32> = [2020, 2021, 2022].into_iter().collect();

        let err = trainer.train(&years, quick()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TrainingFailure);
        assert!(err.to_string().contains("only 3 labeled examples"));
        assert!(registry.list_versions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_constant_labels_are_rejected() {
        let records: Vec<_> = synthetic_league(40, 2019..=2023)
            .into_iter()
            .map(|mut r| {
                r.fantasy_points = 100.0;
                r
            })
            .collect();
        let (trainer, registry) = setup(records);
        let years: BTreeSet<i32> = (2019..=2022).collect();

        let err = trainer.train(&years, quick()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TrainingFailure);
        assert!(registry.list_versions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_years_without_data() {
        let (trainer, _) = setup(synthetic_league(10, 2020..=2023));
        let years: BTreeSet<i32> = [1999].into_iter().collect();
        let err = trainer.train(&years, quick()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataNotFoundError);
    }

    #[tokio::test]
    async fn test_timeout_leaves_registry_untouched() {
        let (trainer, registry) = setup(synthetic_league(60, 2016..=2023));
        let trainer = trainer.with_timeout(Duration::from_millis(1));
        let years: BTreeSet<i32> = (2016..=2022).collect();
        let params = ForestParams {
            n_estimators: 300,
            ..ForestParams::default()
        };

        let err = trainer.train(&years, params).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimeoutError);
        assert!(registry.list_versions().await.unwrap().is_empty());
    }

    #[test]
    fn test_cancelled_fit_is_a_training_failure() {
        let records = synthetic_league(40, 2019..=2023);
        let index = SeasonIndex::new(&records);
        let years: BTreeSet<i32> = (2019..=2022).collect();
        let examples = build_training_set(&index, &years).unwrap();

        let cancel = AtomicBool::new(true);
        let err = fit_model(
            examples,
            years.into_iter().collect(),
            quick(),
            &TrainingSettings::default(),
            &cancel,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TrainingFailure);
        assert!(err.to_string().contains("cancelled"));
    }

    #[tokio::test]
    async fn test_train_request_uses_recent_window() {
        let (trainer, registry) = setup(synthetic_league(40, 2017..=2023));
        let request = TrainRequest {
            years: YearWindow::Recent(3),
            hyperparameters: quick(),
        };
        trainer.train_request(request).await.unwrap();

        let versions = registry.list_versions().await.unwrap();
        assert_eq!(versions[0].training_years, vec![2020, 2021, 2022]);
    }
}
