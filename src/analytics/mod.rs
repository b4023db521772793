use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::AnalysisSettings;
use crate::error::{PipelineError, PipelineResult};
use crate::ingest::RecordSource;
use crate::ml::VersionId;
use crate::storage::{keys, BlobStore};
use crate::types::{
    round1, AnalysisType, AnalyzeRequest, PlayerSeasonRecord, Position, PredictionRecord,
    PredictionSnapshot,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predictions_analysis: Option<PredictionsAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub historical_analysis: Option<HistoricalAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insights: Option<Vec<String>>,
    pub metadata: AnalysisMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub analysis_type: AnalysisType,
    pub generated_at: DateTime<Utc>,
    pub season: Option<i32>,
    pub model_version: Option<VersionId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionsAnalysis {
    pub total_predictions: usize,
    pub by_position: BTreeMap<Position, PositionStats>,
    pub breakout_candidates: Vec<Mover>,
    pub risk_candidates: Vec<Mover>,
    pub avg_confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionStats {
    pub count: usize,
    pub mean_predicted: f64,
    pub median_predicted: f64,
    pub mean_current: f64,
    pub mean_percent_change: f64,
    pub mean_confidence: f64,
    pub mean_age: f64,
    pub mean_experience: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mover {
    pub player: String,
    pub position: Position,
    pub current_points: f64,
    pub predicted_points: f64,
    pub percent_change: f64,
    pub confidence: f64,
}

impl From<&PredictionRecord> for Mover {
    fn from(p: &PredictionRecord) -> Self {
        Self {
            player: p.player.clone(),
            position: p.position,
            current_points: p.current_points,
            predicted_points: p.predicted_points,
            percent_change: p.percent_change,
            confidence: p.confidence,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalAnalysis {
    pub total_records: usize,
    pub years_covered: Vec<i32>,
    pub position_counts: BTreeMap<String, usize>,
    pub top_teams: Vec<TeamCount>,
    pub avg_points_by_year: BTreeMap<i32, f64>,
    pub avg_points_by_position: BTreeMap<String, f64>,
    pub top_scorers_by_year: BTreeMap<i32, Vec<Scorer>>,
    pub points_trend_by_position: BTreeMap<String, BTreeMap<i32, f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamCount {
    pub team: String,
    pub records: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scorer {
    pub player: String,
    pub position: String,
    pub team: String,
    pub fantasy_points: f64,
}

/// Pure aggregations over predictions and season records
pub struct AnalysisCalculator;

impl AnalysisCalculator {
    pub fn predictions(predictions: &[PredictionRecord], settings: &AnalysisSettings) -> PredictionsAnalysis {
        let mut grouped: BTreeMap<Position, Vec<&PredictionRecord>> = BTreeMap::new();
        for p in predictions {
            grouped.entry(p.position).or_default().push(p);
        }

        let by_position = grouped
            .into_iter()
            .map(|(position, group)| (position, Self::position_stats(&group)))
            .collect();

        let mut by_change: Vec<&PredictionRecord> = predictions.iter().collect();
        by_change.sort_by(|a, b| {
            b.percent_change
                .total_cmp(&a.percent_change)
                .then_with(|| a.player.cmp(&b.player))
        });
        let breakout_candidates = by_change
            .iter()
            .take(settings.top_movers)
            .map(|p| Mover::from(*p))
            .collect();
        let risk_candidates = by_change
            .iter()
            .rev()
            .take(settings.top_movers)
            .map(|p| Mover::from(*p))
            .collect();

        PredictionsAnalysis {
            total_predictions: predictions.len(),
            by_position,
            breakout_candidates,
            risk_candidates,
            avg_confidence: round1(mean(predictions.iter().map(|p| p.confidence))),
        }
    }

    fn position_stats(group: &[&PredictionRecord]) -> PositionStats {
        let mut predicted: Vec<f64> = group.iter().map(|p| p.predicted_points).collect();
        predicted.sort_by(|a, b| a.total_cmp(b));

        PositionStats {
            count: group.len(),
            mean_predicted: round1(mean(predicted.iter().copied())),
            median_predicted: round1(median(&predicted)),
            mean_current: round1(mean(group.iter().map(|p| p.current_points))),
            mean_percent_change: round1(mean(group.iter().map(|p| p.percent_change))),
            mean_confidence: round1(mean(group.iter().map(|p| p.confidence))),
            mean_age: round1(mean(group.iter().map(|p| p.age))),
            mean_experience: round1(mean(group.iter().map(|p| p.experience))),
        }
    }

    pub fn historical(records: &[PlayerSeasonRecord], settings: &AnalysisSettings) -> HistoricalAnalysis {
        let years_covered: Vec<i32> = records
            .iter()
            .map(|r| r.year)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut position_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut team_counts: HashMap<&str, usize> = HashMap::new();
        let mut by_year: BTreeMap<i32, Vec<&PlayerSeasonRecord>> = BTreeMap::new();
        let mut by_position: BTreeMap<String, Vec<&PlayerSeasonRecord>> = BTreeMap::new();

        for record in records {
            *position_counts.entry(record.position.clone()).or_insert(0) += 1;
            *team_counts.entry(record.team.as_str()).or_insert(0) += 1;
            by_year.entry(record.year).or_default().push(record);
            by_position.entry(record.position.clone()).or_default().push(record);
        }

        let mut top_teams: Vec<TeamCount> = team_counts
            .into_iter()
            .map(|(team, records)| TeamCount {
                team: team.to_string(),
                records,
            })
            .collect();
        top_teams.sort_by(|a, b| b.records.cmp(&a.records).then_with(|| a.team.cmp(&b.team)));
        top_teams.truncate(settings.top_teams);

        let avg_points_by_year = by_year
            .iter()
            .map(|(year, group)| (*year, round1(mean(group.iter().map(|r| r.fantasy_points)))))
            .collect();

        let avg_points_by_position = by_position
            .iter()
            .map(|(position, group)| (position.clone(), round1(mean(group.iter().map(|r| r.fantasy_points)))))
            .collect();

        let top_scorers_by_year = by_year
            .iter()
            .map(|(year, group)| {
                let mut sorted = group.clone();
                sorted.sort_by(|a, b| {
                    b.fantasy_points
                        .total_cmp(&a.fantasy_points)
                        .then_with(|| a.player.cmp(&b.player))
                });
                let scorers = sorted
                    .into_iter()
                    .take(settings.top_scorers)
                    .map(|r| Scorer {
                        player: r.player.clone(),
                        position: r.position.clone(),
                        team: r.team.clone(),
                        fantasy_points: r.fantasy_points,
                    })
                    .collect();
                (*year, scorers)
            })
            .collect();

        let points_trend_by_position = by_position
            .iter()
            .map(|(position, group)| {
                let mut per_year: BTreeMap<i32, Vec<f64>> = BTreeMap::new();
                for r in group {
                    per_year.entry(r.year).or_default().push(r.fantasy_points);
                }
                let trend = per_year
                    .into_iter()
                    .map(|(year, points)| (year, round1(mean(points.into_iter()))))
                    .collect();
                (position.clone(), trend)
            })
            .collect();

        HistoricalAnalysis {
            total_records: records.len(),
            years_covered,
            position_counts,
            top_teams,
            avg_points_by_year,
            avg_points_by_position,
            top_scorers_by_year,
            points_trend_by_position,
        }
    }

    /// Rule-based observations. Either input may be absent.
    pub fn insights(
        predictions: Option<&[PredictionRecord]>,
        records: Option<&[PlayerSeasonRecord]>,
        settings: &AnalysisSettings,
    ) -> Vec<String> {
        let mut insights = Vec::new();

        if let Some(predictions) = predictions.filter(|p| !p.is_empty()) {
            let mut counts: BTreeMap<Position, usize> = BTreeMap::new();
            for p in predictions {
                *counts.entry(p.position).or_insert(0) += 1;
            }
            if let Some((position, count)) = counts.iter().max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0))) {
                insights.push(format!(
                    "Top predictions are dominated by {}s ({} players)",
                    position, count
                ));
            }

            let by_change = |a: &&PredictionRecord, b: &&PredictionRecord| {
                a.percent_change
                    .total_cmp(&b.percent_change)
                    .then_with(|| b.player.cmp(&a.player))
            };
            if let Some(best) = predictions.iter().max_by(by_change) {
                insights.push(format!(
                    "Biggest breakout candidate: {} ({}) with {:+.1}% change",
                    best.player, best.position, best.percent_change
                ));
            }
            if let Some(worst) = predictions.iter().min_by(by_change) {
                insights.push(format!(
                    "Highest risk player: {} ({}) with {:+.1}% change",
                    worst.player, worst.position, worst.percent_change
                ));
            }

            insights.push(format!(
                "Average age of predicted players: {:.1} years",
                mean(predictions.iter().map(|p| p.age))
            ));

            for position in Position::all() {
                let group: Vec<&PredictionRecord> =
                    predictions.iter().filter(|p| p.position == position).collect();
                let prior = mean(group.iter().map(|p| p.current_points));
                if group.is_empty() || prior <= 0.0 {
                    continue;
                }
                let predicted = mean(group.iter().map(|p| p.predicted_points));
                let change = (predicted - prior) / prior * 100.0;
                if change > settings.outperform_threshold_pct {
                    insights.push(format!(
                        "{}s are predicted to outperform their prior-year average by {:.1}% (threshold {:.0}%)",
                        position, change, settings.outperform_threshold_pct
                    ));
                } else if change < -settings.outperform_threshold_pct {
                    insights.push(format!(
                        "{}s are predicted to underperform their prior-year average by {:.1}% (threshold {:.0}%)",
                        position,
                        change.abs(),
                        settings.outperform_threshold_pct
                    ));
                }
            }
        }

        if let Some(records) = records.filter(|r| !r.is_empty()) {
            let years: BTreeSet<i32> = records.iter().map(|r| r.year).collect();
            let recent: Vec<i32> = years.iter().rev().take(settings.trend_window).rev().copied().collect();
            if recent.len() >= 2 {
                let avg_for = |year: i32| mean(records.iter().filter(|r| r.year == year).map(|r| r.fantasy_points));
                let first = avg_for(recent[0]);
                let last = avg_for(recent[recent.len() - 1]);
                let direction = if last > first { "increasing" } else { "decreasing" };
                insights.push(format!(
                    "Fantasy points trend is {} over the last {} seasons ({:.1} -> {:.1} per player)",
                    direction,
                    recent.len(),
                    first,
                    last
                ));
            }
        }

        insights
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Median of an ascending slice
fn median(sorted: &[f64]) -> f64 {
    match sorted.len() {
        0 => 0.0,
        n if n % 2 == 1 => sorted[n / 2],
        n => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
    }
}

/// Read-only analysis over stored prediction snapshots and ingested records
pub struct Analyzer {
    store: Arc<dyn BlobStore>,
    source: Arc<dyn RecordSource>,
    settings: AnalysisSettings,
}

impl Analyzer {
    pub fn new(store: Arc<dyn BlobStore>, source: Arc<dyn RecordSource>, settings: AnalysisSettings) -> Self {
        Self {
            store,
            source,
            settings,
        }
    }

    pub async fn analyze(&self, request: &AnalyzeRequest) -> PipelineResult<AnalysisReport> {
        let analysis_type = request.analysis_type;
        info!("Running {} analysis", analysis_type.as_str());

        let snapshot = if analysis_type.includes_predictions() || analysis_type.includes_insights() {
            Some(self.load_snapshot(request.season, request.version).await?)
        } else {
            None
        };

        let records = if analysis_type.includes_historical() || analysis_type.includes_insights() {
            let records = self.source.load_records().await?;
            match request.season {
                Some(season) => Some(records_through(records, season)?),
                None => Some(records),
            }
        } else {
            None
        };

        let predictions = snapshot.as_ref().map(|s| s.predictions.as_slice());

        let report = AnalysisReport {
            predictions_analysis: predictions
                .filter(|_| analysis_type.includes_predictions())
                .map(|p| AnalysisCalculator::predictions(p, &self.settings)),
            historical_analysis: records
                .as_deref()
                .filter(|_| analysis_type.includes_historical())
                .map(|r| AnalysisCalculator::historical(r, &self.settings)),
            insights: analysis_type
                .includes_insights()
                .then(|| AnalysisCalculator::insights(predictions, records.as_deref(), &self.settings)),
            metadata: AnalysisMetadata {
                analysis_type,
                generated_at: Utc::now(),
                season: snapshot.as_ref().map(|s| s.season).or(request.season),
                model_version: snapshot.as_ref().map(|s| s.model_version),
            },
        };
        Ok(report)
    }

    async fn load_snapshot(&self, season: Option<i32>, version: Option<VersionId>) -> PipelineResult<PredictionSnapshot> {
        let key = latest_snapshot_key(self.store.as_ref(), season, version)
            .await?
            .ok_or_else(|| {
                PipelineError::DataNotFound(format!(
                    "no prediction snapshot for season {} and version {}",
                    season.map_or("any".to_string(), |s| s.to_string()),
                    version.map_or("any".to_string(), |v| v.to_string())
                ))
            })?;

        let bytes = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| PipelineError::DataNotFound(format!("snapshot {} vanished", key)))?;
        let snapshot = serde_json::from_slice(&bytes).map_err(|e| {
            PipelineError::RegistryUnavailable(format!("corrupt snapshot {}: {}", key, e))
        })?;
        debug!("Analyzing snapshot {}", key);
        Ok(snapshot)
    }
}

/// Records up to and including `season`, which must itself be on record
fn records_through(records: Vec<PlayerSeasonRecord>, season: i32) -> PipelineResult<Vec<PlayerSeasonRecord>> {
    if !records.iter().any(|r| r.year == season) {
        return Err(PipelineError::DataNotFound(format!("no player records for season {}", season)));
    }
    Ok(records.into_iter().filter(|r| r.year <= season).collect())
}

/// Newest snapshot key, optionally restricted to a season and/or version
pub async fn latest_snapshot_key(
    store: &dyn BlobStore,
    season: Option<i32>,
    version: Option<VersionId>,
) -> PipelineResult<Option<String>> {
    let prefix = match season {
        Some(season) => format!("{}{}/", keys::PREDICTIONS_PREFIX, season),
        None => keys::PREDICTIONS_PREFIX.to_string(),
    };
    let version = version.map(|v| format!("/{}", v));
    Ok(store
        .list(&prefix)
        .await?
        .into_iter()
        .filter(|key| version.as_deref().map_or(true, |v| key.ends_with(v)))
        .last())
}
