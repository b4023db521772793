use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::types::{PlayerSeasonRecord, Position};

pub const NUM_FEATURES: usize = 10;

/// Column order of every feature matrix. Persisted with each artifact and
/// compared at inference time.
pub const FEATURE_NAMES: [&str; NUM_FEATURES] = [
    "current_points",
    "pos_qb",
    "pos_rb",
    "pos_wr",
    "pos_te",
    "age",
    "experience",
    "age_decline",
    "team_continuity",
    "points_trend",
];

/// Fixed-size feature vector for one player-season
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub player: String,
    pub year: i32,
    pub position: Position,
    pub current_points: f64,
    pub position_one_hot: [f64; 4],
    pub age: f64,
    pub experience: f64,
    pub age_decline: f64,
    pub team_continuity: f64,
    pub points_trend: f64,
}

impl FeatureVector {
    pub fn to_array(&self) -> [f64; NUM_FEATURES] {
        [
            self.current_points,
            self.position_one_hot[0],
            self.position_one_hot[1],
            self.position_one_hot[2],
            self.position_one_hot[3],
            self.age,
            self.experience,
            self.age_decline,
            self.team_continuity,
            self.points_trend,
        ]
    }

    pub fn names() -> Vec<String> {
        FEATURE_NAMES.iter().map(|name| name.to_string()).collect()
    }
}

/// Feature vector paired with next season's fantasy points
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledExample {
    pub features: FeatureVector,
    pub label: f64,
}

/// Build the feature vector for `record` from the player's earlier seasons.
///
/// `player_history` must hold only this player's seasons before
/// `record.year`, ascending by year. Training-set construction and
/// inference both go through this function.
pub fn build_features(
    record: &PlayerSeasonRecord,
    player_history: &[PlayerSeasonRecord],
) -> PipelineResult<FeatureVector> {
    let position = record.position()?;

    if !record.fantasy_points.is_finite() {
        return Err(PipelineError::Validation(format!(
            "{} ({}): fantasy points must be finite",
            record.player, record.year
        )));
    }

    let mut previous_year = None;
    for past in player_history {
        if past.player != record.player {
            return Err(PipelineError::Validation(format!(
                "history for {} contains a season of {}",
                record.player, past.player
            )));
        }
        if past.year >= record.year || previous_year.map_or(false, |y| past.year <= y) {
            return Err(PipelineError::Validation(format!(
                "history for {} ({}) must be strictly ascending seasons before the target year",
                record.player, record.year
            )));
        }
        previous_year = Some(past.year);
    }

    let experience = player_history
        .first()
        .map(|first| (record.year - first.year) as f64)
        .unwrap_or(0.0);

    let age = record
        .age
        .filter(|age| age.is_finite() && *age > 0.0)
        .unwrap_or_else(|| impute_age(position, experience));

    let most_recent = player_history.last();

    let team_continuity = match most_recent {
        Some(prior) if prior.team == record.team => 1.0,
        _ => 0.0,
    };

    // explicit edge case: fewer than two prior seasons means no trend
    let points_trend = match most_recent {
        Some(prior) if player_history.len() >= 2 => record.fantasy_points - prior.fantasy_points,
        _ => 0.0,
    };

    Ok(FeatureVector {
        player: record.player.clone(),
        year: record.year,
        position,
        current_points: record.fantasy_points,
        position_one_hot: position.one_hot(),
        age,
        experience,
        age_decline: age_decline_factor(age, position),
        team_continuity,
        points_trend,
    })
}

/// Rookie age for the position plus seasons already played
pub fn impute_age(position: Position, experience: f64) -> f64 {
    position.default_rookie_age() + experience.max(0.0)
}

/// 1.0 up to the position's peak age, then a linear decline to 0.
/// Non-increasing in age for every position.
pub fn age_decline_factor(age: f64, position: Position) -> f64 {
    let years_past_peak = (age - position.peak_age()).max(0.0);
    (1.0 - position.decline_rate() * years_past_peak).max(0.0)
}

/// Every player's seasons, ascending by year
#[derive(Debug, Clone, Default)]
pub struct SeasonIndex {
    by_player: BTreeMap<String, Vec<PlayerSeasonRecord>>,
}

impl SeasonIndex {
    pub fn new(records: &[PlayerSeasonRecord]) -> Self {
        let mut by_player: BTreeMap<String, Vec<PlayerSeasonRecord>> = BTreeMap::new();
        for record in records {
            by_player
                .entry(record.player.clone())
                .or_default()
                .push(record.clone());
        }
        for seasons in by_player.values_mut() {
            seasons.sort_by_key(|s| s.year);
            // first occurrence of a (player, year) wins
            seasons.dedup_by_key(|s| s.year);
        }
        Self { by_player }
    }

    pub fn seasons(&self, player: &str) -> &[PlayerSeasonRecord] {
        self.by_player.get(player).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn season(&self, player: &str, year: i32) -> Option<&PlayerSeasonRecord> {
        self.seasons(player).iter().find(|s| s.year == year)
    }

    /// Seasons strictly before `year`
    pub fn history_before(&self, player: &str, year: i32) -> &[PlayerSeasonRecord] {
        let seasons = self.seasons(player);
        let end = seasons.partition_point(|s| s.year < year);
        &seasons[..end]
    }

    pub fn player_count(&self) -> usize {
        self.by_player.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<PlayerSeasonRecord>)> {
        self.by_player.iter()
    }
}

/// Inference-time vector: same code path as training, history looked up
/// from the index.
pub fn build_inference_vector(
    index: &SeasonIndex,
    record: &PlayerSeasonRecord,
) -> PipelineResult<FeatureVector> {
    build_features(record, index.history_before(&record.player, record.year))
}

/// Labeled examples for every season in `years` that has a following
/// season on record. Seasons without next-year data are left out, as are
/// records with positions outside the model's set.
pub fn build_training_set(
    index: &SeasonIndex,
    years: &BTreeSet<i32>,
) -> PipelineResult<Vec<LabeledExample>> {
    let mut examples = Vec::new();
    let mut unlabeled = 0usize;
    let mut skipped_positions = 0usize;

    for (player, seasons) in index.iter() {
        for (i, season) in seasons.iter().enumerate() {
            if !years.contains(&season.year) {
                continue;
            }
            if season.position().is_err() {
                skipped_positions += 1;
                continue;
            }
            let label = match index.season(player, season.year + 1) {
                Some(next) => next.fantasy_points,
                None => {
                    unlabeled += 1;
                    continue;
                }
            };

            let features = build_features(season, &seasons[..i])?;
            examples.push(LabeledExample { features, label });
        }
    }

    if skipped_positions > 0 {
        warn!("Skipped {} seasons with unsupported positions", skipped_positions);
    }
    debug!(
        "Built {} labeled examples ({} seasons had no following year)",
        examples.len(),
        unlabeled
    );

    Ok(examples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{record, synthetic_league};

    #[test]
    fn test_feature_order_matches_names() {
        let r = record("A", 2023, "KC", "RB", 200.0);
        let fv = build_features(&r, &[]).unwrap();
        let arr = fv.to_array();
        assert_eq!(arr.len(), FEATURE_NAMES.len());
        assert_eq!(arr[0], 200.0);
        assert_eq!(&arr[1..5], &[0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_unknown_position_fails() {
        let r = record("Kicker", 2023, "KC", "K", 120.0);
        let err = build_features(&r, &[]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ValidationError);
    }

    #[test]
    fn test_no_history_defaults() {
        let r = record("Rookie", 2023, "NYJ", "WR", 150.0);
        let fv = build_features(&r, &[]).unwrap();
        assert_eq!(fv.experience, 0.0);
        assert_eq!(fv.team_continuity, 0.0);
        assert_eq!(fv.points_trend, 0.0);
    }

    #[test]
    fn test_trend_zero_with_one_prior_season() {
        let history = vec![record("A", 2022, "KC", "QB", 100.0)];
        let r = record("A", 2023, "KC", "QB", 300.0);
        let fv = build_features(&r, &history).unwrap();
        assert_eq!(fv.points_trend, 0.0);
        assert_eq!(fv.experience, 1.0);
        assert_eq!(fv.team_continuity, 1.0);
    }

    #[test]
    fn test_trend_uses_most_recent_prior_season() {
        let history = vec![
            record("A", 2020, "BUF", "QB", 250.0),
            record("A", 2022, "KC", "QB", 280.0),
        ];
        let r = record("A", 2023, "MIA", "QB", 310.0);
        let fv = build_features(&r, &history).unwrap();
        assert!((fv.points_trend - 30.0).abs() < 1e-9);
        assert_eq!(fv.experience, 3.0);
        assert_eq!(fv.team_continuity, 0.0);
    }

    #[test]
    fn test_history_must_precede_target() {
        let history = vec![record("A", 2023, "KC", "QB", 250.0)];
        let r = record("A", 2023, "KC", "QB", 310.0);
        assert!(build_features(&r, &history).is_err());

        let other = vec![record("B", 2022, "KC", "QB", 250.0)];
        assert!(build_features(&r, &other).is_err());
    }

    #[test]
    fn test_age_imputed_from_rookie_default() {
        let history = vec![
            record("A", 2021, "DAL", "RB", 150.0),
            record("A", 2022, "DAL", "RB", 180.0),
        ];
        let mut r = record("A", 2023, "DAL", "RB", 210.0);
        r.age = None;
        let fv = build_features(&r, &history).unwrap();
        assert_eq!(fv.age, Position::RB.default_rookie_age() + 2.0);
    }

    #[test]
    fn test_age_decline_is_monotonic() {
        for position in Position::all() {
            let mut last = f64::INFINITY;
            for tenth in 200..400 {
                let factor = age_decline_factor(tenth as f64 / 10.0, position);
                assert!(factor <= last);
                assert!((0.0..=1.0).contains(&factor));
                last = factor;
            }
        }
        // running backs lose value first
        assert!(age_decline_factor(29.0, Position::RB) < age_decline_factor(29.0, Position::QB));
        assert!(age_decline_factor(29.0, Position::WR) < age_decline_factor(29.0, Position::TE));
    }

    #[test]
    fn test_training_set_labels_and_exclusions() {
        let records = vec![
            record("A", 2021, "KC", "QB", 200.0),
            record("A", 2022, "KC", "QB", 250.0),
            record("A", 2023, "KC", "QB", 300.0),
            // gap year: 2021 has no 2022 season
            record("B", 2021, "NE", "WR", 100.0),
            record("B", 2023, "NE", "WR", 120.0),
        ];
        let index = SeasonIndex::new(&records);
        let years: BTreeSet<i32> = [2021, 2022, 2023].into_iter().collect();
        let examples = build_training_set(&index, &years).unwrap();

        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0].features.year, 2021);
        assert_eq!(examples[0].label, 250.0);
        assert_eq!(examples[1].features.year, 2022);
        assert_eq!(examples[1].label, 300.0);
    }

    #[test]
    fn test_training_and_inference_vectors_are_identical() {
        let records = synthetic_league(30, 2018..=2023);
        let index = SeasonIndex::new(&records);
        let years: BTreeSet<i32> = (2018..=2023).collect();
        let examples = build_training_set(&index, &years).unwrap();
        assert!(!examples.is_empty());

        for example in &examples {
            let season = index
                .season(&example.features.player, example.features.year)
                .unwrap();
            let inference = build_inference_vector(&index, season).unwrap();
            assert_eq!(inference, example.features);
            assert_eq!(
                inference.to_array().map(f64::to_bits),
                example.features.to_array().map(f64::to_bits)
            );
        }
    }

    #[test]
    fn test_season_index_history() {
        let records = vec![
            record("A", 2023, "KC", "QB", 300.0),
            record("A", 2021, "KC", "QB", 200.0),
            record("A", 2022, "KC", "QB", 250.0),
        ];
        let index = SeasonIndex::new(&records);
        let history = index.history_before("A", 2023);
        assert_eq!(history.iter().map(|s| s.year).collect::<Vec<_>>(), vec![2021, 2022]);
        assert!(index.history_before("A", 2021).is_empty());
        assert!(index.history_before("Nobody", 2023).is_empty());
    }
}
