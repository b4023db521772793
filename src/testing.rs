//! Shared fixtures for unit tests

use async_trait::async_trait;
use chrono::Utc;
use ndarray::{Array1, Array2};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use uuid::Uuid;

use crate::error::PipelineResult;
use crate::ingest::RecordSource;
use crate::ml::{FeatureVector, ForestParams, ModelMetrics, ModelType, RandomForest, TrainedModel, NUM_FEATURES};
use crate::types::{PlayerSeasonRecord, Position};

const TEAMS: [&str; 8] = ["KC", "BUF", "SF", "PHI", "DAL", "MIA", "DET", "CIN"];

pub fn record(player: &str, year: i32, team: &str, position: &str, points: f64) -> PlayerSeasonRecord {
    PlayerSeasonRecord {
        player: player.to_string(),
        year,
        team: team.to_string(),
        position: position.to_string(),
        fantasy_points: points,
        games_played: 17,
        age: None,
        experience: None,
    }
}

/// Deterministic league: every player plays every season in `years`, with
/// a per-player growth rate, occasional team changes and position-typical
/// scoring levels.
pub fn synthetic_league(players: usize, years: RangeInclusive<i32>) -> Vec<PlayerSeasonRecord> {
    let first_year = *years.start();
    let mut records = Vec::new();

    for p in 0..players {
        let position = Position::all()[p % 4];
        let base = match position {
            Position::QB => 250.0,
            Position::RB => 180.0,
            Position::WR => 170.0,
            Position::TE => 110.0,
        } + ((p * 7) % 60) as f64;
        let growth = ((p % 5) as f64 - 2.0) * 8.0;
        let rookie_age = 21.0 + (p % 6) as f64;

        for year in years.clone() {
            let k = (year - first_year) as usize;
            let wiggle = ((p * 31 + k * 17) % 23) as f64;
            let team = TEAMS[(p + k / 3) % TEAMS.len()];
            records.push(PlayerSeasonRecord {
                player: format!("Player {:02}", p),
                year,
                team: team.to_string(),
                position: position.as_str().to_string(),
                fantasy_points: (base + growth * k as f64 + wiggle).max(5.0),
                games_played: 17 - (k % 3) as u32,
                age: Some(rookie_age + k as f64),
                experience: Some(k as u32),
            });
        }
    }
    records
}

/// Small forest over the production feature layout
pub fn trained_model(seed: u64) -> TrainedModel {
    let n = 40;
    let x = Array2::<f64>::from_shape_fn((n, NUM_FEATURES), |(i, j)| ((i * (j + 3) + seed as usize) % 17) as f64);
    let y = Array1::<f64>::from_shape_fn(n, |i| 100.0 + 5.0 * x[[i, 0]] + x[[i, 5]]);
    fixture_model(&x, &y, seed)
}

/// Forest whose projection rises with current-season points (feature 0)
pub fn points_model() -> TrainedModel {
    let n = 60;
    let x = Array2::<f64>::from_shape_fn((n, NUM_FEATURES), |(i, j)| if j == 0 { 100.0 + 5.0 * i as f64 } else { 0.0 });
    let y = Array1::<f64>::from_shape_fn(n, |i| x[[i, 0]] + 10.0);
    fixture_model(&x, &y, 5)
}

fn fixture_model(x: &Array2<f64>, y: &Array1<f64>, seed: u64) -> TrainedModel {
    let params = ForestParams {
        n_estimators: 8,
        max_depth: 4,
        min_samples_split: 2,
        min_samples_leaf: 1,
        max_features_fraction: 1.0,
        seed,
    };
    let forest = RandomForest::fit(x, y, &params).expect("fixture forest");

    TrainedModel {
        model_type: ModelType::RandomForest,
        forest,
        feature_names: FeatureVector::names(),
        training_years: vec![2021, 2022],
        hyperparameters: params,
        metrics: ModelMetrics {
            mae: 10.0,
            rmse: 12.0,
            r2: 0.5,
            train_samples: 32,
            validation_samples: 8,
            train_players: 16,
            validation_players: 4,
            feature_importance: BTreeMap::new(),
        },
        run_id: Uuid::new_v4(),
        trained_at: Utc::now(),
    }
}

/// In-memory record source
pub struct StaticRecords(pub Vec<PlayerSeasonRecord>);

#[async_trait]
impl RecordSource for StaticRecords {
    async fn load_records(&self) -> PipelineResult<Vec<PlayerSeasonRecord>> {
        Ok(self.0.clone())
    }
}
