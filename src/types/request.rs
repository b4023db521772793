//! Boundary request types. Raw query/body structs hold strings exactly as
//! received; `into_request` turns them into validated requests or a
//! `Validation` error.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::Position;
use crate::config::{PredictionSettings, TrainingProfile, TrainingSettings};
use crate::error::{PipelineError, PipelineResult};
use crate::ml::{ForestParams, VersionId, VersionSelector};

const MIN_SEASON: i32 = 1920;
const MAX_SEASON: i32 = 2100;

/// Seasons to train on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum YearWindow {
    /// The most recent N seasons that have a following season on record
    Recent(usize),
    Explicit(BTreeSet<i32>),
}

#[derive(Debug, Clone)]
pub struct TrainRequest {
    pub years: YearWindow,
    pub hyperparameters: ForestParams,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainBody {
    pub years: Option<Vec<i32>>,
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
    pub window: Option<usize>,
    pub profile: Option<String>,
}

impl TrainBody {
    pub fn into_request(self, settings: &TrainingSettings) -> PipelineResult<TrainRequest> {
        let years = match (self.years, self.start_year, self.end_year) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
                return Err(PipelineError::Validation(
                    "give either years or start_year/end_year, not both".to_string(),
                ))
            }
            (Some(years), None, None) => {
                if years.is_empty() {
                    return Err(PipelineError::Validation("years must not be empty".to_string()));
                }
                for year in &years {
                    check_season(*year)?;
                }
                YearWindow::Explicit(years.into_iter().collect())
            }
            (None, Some(start), Some(end)) => {
                check_season(start)?;
                check_season(end)?;
                if start > end {
                    return Err(PipelineError::Validation(format!(
                        "start_year {} is after end_year {}",
                        start, end
                    )));
                }
                YearWindow::Explicit((start..=end).collect())
            }
            (None, Some(_), None) | (None, None, Some(_)) => {
                return Err(PipelineError::Validation(
                    "start_year and end_year must be given together".to_string(),
                ))
            }
            (None, None, None) => {
                let window = self.window.unwrap_or(settings.default_window);
                if window == 0 {
                    return Err(PipelineError::Validation("window must be > 0".to_string()));
                }
                YearWindow::Recent(window)
            }
        };

        let hyperparameters = match self.profile {
            Some(name) => TrainingProfile::from_str(&name)
                .ok_or_else(|| {
                    let known: Vec<String> = TrainingProfile::all().iter().map(|p| p.name().to_lowercase()).collect();
                    PipelineError::Validation(format!(
                        "unknown training profile '{}' (expected one of {})",
                        name,
                        known.join(", ")
                    ))
                })?
                .params(&settings.forest),
            None => settings.hyperparameters(),
        };

        Ok(TrainRequest {
            years,
            hyperparameters,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictRequest {
    pub position: Option<Position>,
    pub top_n: usize,
    pub player: Option<String>,
    pub version: VersionSelector,
}

/// Raw `GET /api/predict` parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PredictQuery {
    pub top_n: Option<String>,
    pub position: Option<String>,
    pub player: Option<String>,
    pub version: Option<String>,
}

impl PredictQuery {
    pub fn into_request(self, settings: &PredictionSettings) -> PipelineResult<PredictRequest> {
        let top_n = match self.top_n.as_deref().map(str::trim) {
            None | Some("") => settings.default_top_n,
            Some(raw) => {
                let value: i64 = raw
                    .parse()
                    .map_err(|_| PipelineError::Validation(format!("top_n '{}' is not an integer", raw)))?;
                if value <= 0 {
                    return Err(PipelineError::Validation(format!("top_n must be positive, got {}", value)));
                }
                if value as u64 > settings.max_top_n as u64 {
                    return Err(PipelineError::Validation(format!(
                        "top_n must be <= {}, got {}",
                        settings.max_top_n, value
                    )));
                }
                value as usize
            }
        };

        let position = match non_blank(self.position) {
            Some(raw) => Some(Position::parse(&raw)?),
            None => None,
        };

        let version = match non_blank(self.version) {
            Some(raw) => raw.parse()?,
            None => VersionSelector::Latest,
        };

        Ok(PredictRequest {
            position,
            top_n,
            player: non_blank(self.player).map(|p| p.trim().to_string()),
            version,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisType {
    #[default]
    All,
    Predictions,
    Historical,
    Insights,
}

impl AnalysisType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisType::All => "all",
            AnalysisType::Predictions => "predictions",
            AnalysisType::Historical => "historical",
            AnalysisType::Insights => "insights",
        }
    }

    pub fn parse(s: &str) -> PipelineResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(AnalysisType::All),
            "predictions" => Ok(AnalysisType::Predictions),
            "historical" => Ok(AnalysisType::Historical),
            "insights" => Ok(AnalysisType::Insights),
            other => Err(PipelineError::Validation(format!(
                "analysis type '{}' is not one of all, predictions, historical, insights",
                other
            ))),
        }
    }

    pub fn includes_predictions(&self) -> bool {
        matches!(self, AnalysisType::All | AnalysisType::Predictions)
    }

    pub fn includes_historical(&self) -> bool {
        matches!(self, AnalysisType::All | AnalysisType::Historical)
    }

    pub fn includes_insights(&self) -> bool {
        matches!(self, AnalysisType::All | AnalysisType::Insights)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzeRequest {
    pub analysis_type: AnalysisType,
    /// Snapshot season; the latest snapshot when unset
    pub season: Option<i32>,
    pub version: Option<VersionId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalyzeQuery {
    #[serde(rename = "type")]
    pub analysis_type: Option<String>,
    pub season: Option<String>,
    pub version: Option<String>,
}

impl AnalyzeQuery {
    pub fn into_request(self) -> PipelineResult<AnalyzeRequest> {
        let analysis_type = match non_blank(self.analysis_type) {
            Some(raw) => AnalysisType::parse(&raw)?,
            None => AnalysisType::All,
        };
        let season = match non_blank(self.season) {
            Some(raw) => Some(parse_season(&raw)?),
            None => None,
        };
        let version = match non_blank(self.version) {
            Some(raw) => Some(raw.parse()?),
            None => None,
        };
        Ok(AnalyzeRequest {
            analysis_type,
            season,
            version,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SnapshotBody {
    pub season: Option<i32>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRequest {
    pub season: Option<i32>,
    pub version: VersionSelector,
}

impl SnapshotBody {
    pub fn into_request(self) -> PipelineResult<SnapshotRequest> {
        if let Some(season) = self.season {
            check_season(season)?;
        }
        let version = match non_blank(self.version) {
            Some(raw) => raw.parse()?,
            None => VersionSelector::Latest,
        };
        Ok(SnapshotRequest {
            season: self.season,
            version,
        })
    }
}

/// Parse a season list: `2019-2023`, `2019,2021,2022` or a single year
pub fn parse_years(raw: &str) -> PipelineResult<Vec<i32>> {
    let raw = raw.trim();
    if let Some((start, end)) = raw.split_once('-') {
        let start = parse_season(start)?;
        let end = parse_season(end)?;
        if start > end {
            return Err(PipelineError::Validation(format!("empty season range {}", raw)));
        }
        return Ok((start..=end).collect());
    }
    raw.split(',').map(parse_season).collect()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_season(raw: &str) -> PipelineResult<i32> {
    let season = raw
        .trim()
        .parse()
        .map_err(|_| PipelineError::Validation(format!("season '{}' is not a year", raw)))?;
    check_season(season)?;
    Ok(season)
}

fn check_season(year: i32) -> PipelineResult<()> {
    if (MIN_SEASON..=MAX_SEASON).contains(&year) {
        Ok(())
    } else {
        Err(PipelineError::Validation(format!(
            "season {} outside {}..={}",
            year, MIN_SEASON, MAX_SEASON
        )))
    }
}
