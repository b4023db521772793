use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Position;
use crate::ml::VersionId;

/// Projected next-season output for one player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub player: String,
    pub team: String,
    pub position: Position,
    pub current_points: f64,
    pub predicted_points: f64,
    pub percent_change: f64,
    /// 0-100, higher when the ensemble's estimators agree
    pub confidence: f64,
    pub age: f64,
    pub experience: f64,
    pub model_version: VersionId,
}

impl PredictionRecord {
    pub fn percent_change(current: f64, predicted: f64) -> f64 {
        if current.abs() < f64::EPSILON {
            0.0
        } else {
            round1((predicted - current) / current * 100.0)
        }
    }
}

/// Full ranking persisted for the analyzer, keyed by (season, model version)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionSnapshot {
    pub season: i32,
    pub model_version: VersionId,
    pub generated_at: DateTime<Utc>,
    pub predictions: Vec<PredictionRecord>,
}

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
