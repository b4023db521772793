use serde::{Deserialize, Serialize};

use super::profiles::TrainingProfile;
use crate::ml::ForestParams;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub storage: StorageSettings,
    pub training: TrainingSettings,
    pub prediction: PredictionSettings,
    pub analysis: AnalysisSettings,
    pub registry: RegistrySettings,
    pub ingest: IngestSettings,
    pub server: ServerSettings,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        // Storage validation
        match self.storage.backend {
            StorageBackend::Sled if self.storage.sled_path.trim().is_empty() => {
                errors.push("storage.sled_path must not be empty".to_string());
            }
            StorageBackend::Sqlite if !self.storage.sqlite_url.starts_with("sqlite:") => {
                errors.push("storage.sqlite_url must start with 'sqlite:'".to_string());
            }
            _ => {}
        }

        // Training validation
        if self.training.min_examples < 2 {
            errors.push("training.min_examples must be >= 2".to_string());
        }
        if self.training.validation_pct == 0 || self.training.validation_pct >= 100 {
            errors.push("training.validation_pct must be between 1 and 99".to_string());
        }
        if matches!(self.training.lookback_years, Some(years) if years < 2) {
            errors.push("training.lookback_years must be >= 2 (trend needs two prior seasons)".to_string());
        }
        if self.training.timeout_secs == 0 {
            errors.push("training.timeout_secs must be > 0".to_string());
        }
        if self.training.default_window == 0 {
            errors.push("training.default_window must be > 0".to_string());
        }
        if let Err(forest_errors) = self.training.hyperparameters().validate() {
            errors.extend(forest_errors.into_iter().map(|e| format!("training.forest: {}", e)));
        }

        // Prediction validation
        if self.prediction.default_top_n == 0 {
            errors.push("prediction.default_top_n must be > 0".to_string());
        }
        if self.prediction.default_top_n > self.prediction.max_top_n {
            errors.push("prediction.default_top_n must be <= prediction.max_top_n".to_string());
        }

        // Analysis validation
        if self.analysis.outperform_threshold_pct <= 0.0 {
            errors.push("analysis.outperform_threshold_pct must be > 0".to_string());
        }
        if self.analysis.trend_window < 2 {
            errors.push("analysis.trend_window must be >= 2".to_string());
        }

        // Registry validation
        if self.registry.max_publish_attempts == 0 {
            errors.push("registry.max_publish_attempts must be > 0".to_string());
        }

        // Ingest validation
        let retry = &self.ingest.retry;
        if retry.max_attempts == 0 {
            errors.push("ingest.retry.max_attempts must be > 0".to_string());
        }
        if retry.initial_backoff_ms > retry.max_backoff_ms {
            errors.push("ingest.retry.initial_backoff_ms must be <= max_backoff_ms".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sled,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub sled_path: String,
    pub sqlite_url: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sled,
            sled_path: "./data/fantasy.sled".to_string(),
            sqlite_url: "sqlite:./data/fantasy.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    pub profile: TrainingProfile,
    /// Sanity gate: fewer labeled examples than this rejects the run
    pub min_examples: usize,
    /// Share of players held out for validation
    pub validation_pct: u8,
    /// Seasons of history kept before the first training year; all
    /// history when unset
    pub lookback_years: Option<i32>,
    pub timeout_secs: u64,
    /// Seasons trained on when a request names none
    pub default_window: usize,
    /// Used when `profile` is Custom
    pub forest: ForestParams,
}

impl TrainingSettings {
    pub fn hyperparameters(&self) -> ForestParams {
        self.profile.params(&self.forest)
    }
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            profile: TrainingProfile::Standard,
            min_examples: 10,
            validation_pct: 20,
            lookback_years: None,
            timeout_secs: 300,
            default_window: 5,
            forest: ForestParams::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionSettings {
    pub default_top_n: usize,
    pub max_top_n: usize,
    /// Season treated as "current"; latest season in the data when unset
    pub season: Option<i32>,
}

impl Default for PredictionSettings {
    fn default() -> Self {
        Self {
            default_top_n: 50,
            max_top_n: 500,
            season: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub outperform_threshold_pct: f64,
    pub top_movers: usize,
    pub top_scorers: usize,
    pub top_teams: usize,
    /// Seasons considered for the league-wide trend insight
    pub trend_window: usize,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            outperform_threshold_pct: 10.0,
            top_movers: 10,
            top_scorers: 5,
            top_teams: 10,
            trend_window: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    pub max_publish_attempts: u32,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            max_publish_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// JSON stats feed; `{year}` in the URL is replaced per season
    pub feed_url: Option<String>,
    pub request_timeout_secs: u64,
    pub retry: RetrySettings,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            feed_url: None,
            request_timeout_secs: 30,
            retry: RetrySettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = PipelineConfig::default();
        config.training.validation_pct = 0;
        config.prediction.default_top_n = 0;
        config.registry.max_publish_attempts = 0;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("validation_pct")));
    }

    #[test]
    fn test_custom_forest_is_validated() {
        let mut config = PipelineConfig::default();
        config.training.profile = TrainingProfile::Custom;
        config.training.forest.n_estimators = 0;

        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.starts_with("training.forest")));
    }

    #[test]
    fn test_retry_bounds() {
        let mut config = PipelineConfig::default();
        config.ingest.retry.initial_backoff_ms = 10_000;
        config.ingest.retry.max_backoff_ms = 1_000;
        assert!(config.validate().is_err());
    }
}
