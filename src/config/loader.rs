use config::{Config, Environment, File};
use tracing::{debug, info};

use super::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};

pub const DEFAULT_CONFIG_PATH: &str = "fantasy.toml";
const ENV_PREFIX: &str = "FANTASY";

/// Load configuration: optional TOML file, then `FANTASY_*` environment
/// overrides (nested keys use `__`, e.g. `FANTASY_TRAINING__MIN_EXAMPLES`).
pub fn load_config(path: &str) -> PipelineResult<PipelineConfig> {
    if dotenvy::dotenv().is_ok() {
        debug!("Loaded .env file");
    }

    let settings = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| PipelineError::Config(e.to_string()))?;

    let config: PipelineConfig = settings
        .try_deserialize()
        .map_err(|e| PipelineError::Config(e.to_string()))?;

    config
        .validate()
        .map_err(|errors| PipelineError::Config(errors.join(", ")))?;

    info!(
        "Configuration loaded (storage={:?}, profile={})",
        config.storage.backend,
        config.training.profile.name()
    );
    Ok(config)
}

/// Render a configuration as TOML, used by `init-config`
pub fn to_toml(config: &PipelineConfig) -> PipelineResult<String> {
    toml::to_string_pretty(config).map_err(|e| PipelineError::Config(e.to_string()))
}
