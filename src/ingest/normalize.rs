use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

use crate::types::PlayerSeasonRecord;

/// A stat row as it arrives from a feed or file. Every field is optional
/// here; `normalize_rows` decides what is usable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawStatRow {
    #[serde(alias = "Player", alias = "name")]
    pub player: Option<String>,
    #[serde(alias = "Year", alias = "season")]
    pub year: Option<i32>,
    #[serde(alias = "Team")]
    pub team: Option<String>,
    #[serde(alias = "Position", alias = "pos")]
    pub position: Option<String>,
    #[serde(alias = "Fantasy_Points", alias = "points")]
    pub fantasy_points: Option<f64>,
    #[serde(alias = "Games", alias = "games")]
    pub games_played: Option<u32>,
    #[serde(alias = "Age")]
    pub age: Option<f64>,
    #[serde(alias = "Experience")]
    pub experience: Option<u32>,
}

impl RawStatRow {
    fn into_record(self) -> Option<PlayerSeasonRecord> {
        let player = non_blank(self.player)?;
        let team = non_blank(self.team)?;
        let position = non_blank(self.position)?.to_uppercase();
        let year = self.year?;
        let fantasy_points = self.fantasy_points.filter(|p| p.is_finite())?;

        Some(PlayerSeasonRecord {
            player,
            year,
            team,
            position,
            fantasy_points,
            games_played: self.games_played.unwrap_or(0),
            age: self.age.filter(|a| a.is_finite() && *a > 0.0),
            experience: self.experience,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct NormalizeReport {
    pub records: Vec<PlayerSeasonRecord>,
    pub dropped_malformed: usize,
    pub dropped_duplicates: usize,
}

/// Drop rows missing a required field (player, team, position, year,
/// finite fantasy points) and keep the first row per (player, year).
pub fn normalize_rows(rows: Vec<RawStatRow>) -> NormalizeReport {
    let total = rows.len();
    let mut report = NormalizeReport::default();
    let mut seen: HashSet<(String, i32)> = HashSet::new();

    for row in rows {
        let Some(record) = row.into_record() else {
            report.dropped_malformed += 1;
            continue;
        };
        if !seen.insert((record.player.clone(), record.year)) {
            report.dropped_duplicates += 1;
            continue;
        }
        report.records.push(record);
    }

    info!(
        "Normalized {} rows: kept {}, dropped {} malformed, {} duplicates",
        total,
        report.records.len(),
        report.dropped_malformed,
        report.dropped_duplicates
    );
    report
}

/// Deduplicate already-normalized records, first occurrence wins
pub fn dedupe_records(records: Vec<PlayerSeasonRecord>) -> Vec<PlayerSeasonRecord> {
    let before = records.len();
    let mut seen: HashSet<(String, i32)> = HashSet::new();
    let kept: Vec<_> = records
        .into_iter()
        .filter(|r| seen.insert((r.player.clone(), r.year)))
        .collect();
    debug!("Deduplicated {} -> {} records", before, kept.len());
    kept
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(player: &str, year: i32, points: Option<f64>) -> RawStatRow {
        RawStatRow {
            player: Some(player.to_string()),
            year: Some(year),
            team: Some("KC".to_string()),
            position: Some("qb".to_string()),
            fantasy_points: points,
            games_played: Some(17),
            age: None,
            experience: None,
        }
    }

    #[test]
    fn test_malformed_rows_dropped_not_zero_filled() {
        let report = normalize_rows(vec![
            row("A", 2023, Some(300.0)),
            row("B", 2023, None),
            row("C", 2023, Some(f64::NAN)),
            RawStatRow {
                year: None,
                ..row("D", 2023, Some(10.0))
            },
        ]);
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.dropped_malformed, 3);
        assert_eq!(report.records[0].position, "QB");
    }

    #[test]
    fn test_first_row_wins_per_player_year() {
        let report = normalize_rows(vec![
            row("A", 2023, Some(300.0)),
            row("A", 2023, Some(1.0)),
            row("A", 2022, Some(250.0)),
        ]);
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.dropped_duplicates, 1);
        assert_eq!(report.records[0].fantasy_points, 300.0);
    }

    #[test]
    fn test_scraper_column_names_accepted() {
        let json = r#"[{"Player":"A","Position":"WR","Team":"MIA","Fantasy_Points":211.4,"Year":2023}]"#;
        let rows: Vec<RawStatRow> = serde_json::from_str(json).unwrap();
        let report = normalize_rows(rows);
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].team, "MIA");
        assert_eq!(report.records[0].games_played, 0);
    }
}
