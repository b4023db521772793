use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{PipelineError, PipelineResult};

/// Fantasy-relevant roster positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Position {
    QB,
    RB,
    WR,
    TE,
}

impl Position {
    pub fn as_str(&self) -> &'static str {
        match self {
            Position::QB => "QB",
            Position::RB => "RB",
            Position::WR => "WR",
            Position::TE => "TE",
        }
    }

    pub fn all() -> [Position; 4] {
        [Position::QB, Position::RB, Position::WR, Position::TE]
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "QB" => Some(Position::QB),
            "RB" => Some(Position::RB),
            "WR" => Some(Position::WR),
            "TE" => Some(Position::TE),
            _ => None,
        }
    }

    /// Strict parse used at every pipeline entry point
    pub fn parse(s: &str) -> PipelineResult<Self> {
        Self::from_str(s).ok_or_else(|| {
            PipelineError::Validation(format!(
                "unknown position '{}', expected one of QB, RB, WR, TE",
                s
            ))
        })
    }

    /// Age assumed for a player's first observed season when none is known
    pub fn default_rookie_age(&self) -> f64 {
        match self {
            Position::QB => 23.0,
            Position::RB => 22.0,
            Position::WR => 22.0,
            Position::TE => 23.0,
        }
    }

    /// Last age before production starts to decline
    pub fn peak_age(&self) -> f64 {
        match self {
            Position::RB => 26.0,
            Position::WR => 27.0,
            Position::TE => 28.0,
            Position::QB => 30.0,
        }
    }

    /// Fraction of value lost per year past peak
    pub fn decline_rate(&self) -> f64 {
        match self {
            Position::RB => 0.08,
            Position::WR => 0.06,
            Position::TE => 0.05,
            Position::QB => 0.04,
        }
    }

    pub fn one_hot(&self) -> [f64; 4] {
        let mut encoded = [0.0; 4];
        let idx = match self {
            Position::QB => 0,
            Position::RB => 1,
            Position::WR => 2,
            Position::TE => 3,
        };
        encoded[idx] = 1.0;
        encoded
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One player's stat line for one season, as delivered by ingestion.
/// Identity is (player, year).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSeasonRecord {
    pub player: String,
    pub year: i32,
    pub team: String,
    /// Raw position label; validated when features are built
    pub position: String,
    pub fantasy_points: f64,
    pub games_played: u32,
    pub age: Option<f64>,
    pub experience: Option<u32>,
}

impl PlayerSeasonRecord {
    pub fn position(&self) -> PipelineResult<Position> {
        Position::parse(&self.position)
    }
}
