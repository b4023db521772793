use serde::{Deserialize, Serialize};

use crate::ml::ForestParams;

/// Hyperparameter presets for the ensemble regressor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingProfile {
    /// Small forest for smoke runs and CI
    Quick,

    /// Matches the historical production model (200 trees, depth 12)
    /// RECOMMENDED
    Standard,

    /// More, shallower-leafed trees with feature subsampling.
    /// Slower to fit, slightly tighter spread on veterans.
    Thorough,

    /// Hyperparameters taken verbatim from `training.forest`
    Custom,
}

impl TrainingProfile {
    pub fn name(&self) -> &str {
        match self {
            Self::Quick => "Quick",
            Self::Standard => "Standard",
            Self::Thorough => "Thorough",
            Self::Custom => "Custom",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "quick" => Some(Self::Quick),
            "standard" => Some(Self::Standard),
            "thorough" => Some(Self::Thorough),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }

    pub fn all() -> Vec<TrainingProfile> {
        vec![Self::Quick, Self::Standard, Self::Thorough, Self::Custom]
    }

    /// Preset parameters; `custom` is returned for [`TrainingProfile::Custom`]
    pub fn params(&self, custom: &ForestParams) -> ForestParams {
        match self {
            Self::Quick => ForestParams {
                n_estimators: 25,
                max_depth: 6,
                min_samples_split: 4,
                min_samples_leaf: 2,
                max_features_fraction: 1.0,
                seed: 42,
            },
            Self::Standard => ForestParams::default(),
            Self::Thorough => ForestParams {
                n_estimators: 500,
                max_depth: 14,
                min_samples_split: 4,
                min_samples_leaf: 1,
                max_features_fraction: 0.8,
                seed: 42,
            },
            Self::Custom => custom.clone(),
        }
    }
}

impl Default for TrainingProfile {
    fn default() -> Self {
        Self::Standard
    }
}
