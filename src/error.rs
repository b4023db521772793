use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::StorageError;

/// Error kinds surfaced to callers of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    ValidationError,
    DataNotFoundError,
    ModelNotFoundError,
    FeatureSchemaError,
    PlayerNotFoundError,
    TrainingFailure,
    PublishConflictError,
    RegistryUnavailableError,
    TimeoutError,
    RetriesExhaustedError,
    ConfigError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::DataNotFoundError => "DataNotFoundError",
            ErrorKind::ModelNotFoundError => "ModelNotFoundError",
            ErrorKind::FeatureSchemaError => "FeatureSchemaError",
            ErrorKind::PlayerNotFoundError => "PlayerNotFoundError",
            ErrorKind::TrainingFailure => "TrainingFailure",
            ErrorKind::PublishConflictError => "PublishConflictError",
            ErrorKind::RegistryUnavailableError => "RegistryUnavailableError",
            ErrorKind::TimeoutError => "TimeoutError",
            ErrorKind::RetriesExhaustedError => "RetriesExhaustedError",
            ErrorKind::ConfigError => "ConfigError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors raised by the prediction pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("No data found: {0}")]
    DataNotFound(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Feature schema mismatch: {0}")]
    FeatureSchema(String),

    #[error("Player not found: {0}")]
    PlayerNotFound(String),

    #[error("Training rejected: {0}")]
    TrainingFailure(String),

    #[error("Publish conflict for version {version}: {reason}")]
    PublishConflict { version: String, reason: String },

    #[error("Model registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("{operation} exceeded its {budget_ms}ms budget")]
    Timeout { operation: String, budget_ms: u64 },

    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Validation(_) => ErrorKind::ValidationError,
            PipelineError::DataNotFound(_) => ErrorKind::DataNotFoundError,
            PipelineError::ModelNotFound(_) => ErrorKind::ModelNotFoundError,
            PipelineError::FeatureSchema(_) => ErrorKind::FeatureSchemaError,
            PipelineError::PlayerNotFound(_) => ErrorKind::PlayerNotFoundError,
            PipelineError::TrainingFailure(_) => ErrorKind::TrainingFailure,
            PipelineError::PublishConflict { .. } => ErrorKind::PublishConflictError,
            PipelineError::RegistryUnavailable(_) => ErrorKind::RegistryUnavailableError,
            PipelineError::Timeout { .. } => ErrorKind::TimeoutError,
            PipelineError::RetriesExhausted { .. } => ErrorKind::RetriesExhaustedError,
            PipelineError::Config(_) => ErrorKind::ConfigError,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Outside of the registry, a storage failure only happens while reading or
/// writing snapshots; it is reported the same way as a registry outage.
impl From<StorageError> for PipelineError {
    fn from(err: StorageError) -> Self {
        PipelineError::RegistryUnavailable(err.to_string())
    }
}

/// Structured error payload handed to the API layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            PipelineError::Validation("bad".into()).kind(),
            ErrorKind::ValidationError
        );
        assert_eq!(
            PipelineError::PublishConflict {
                version: "1".into(),
                reason: "raced".into()
            }
            .kind(),
            ErrorKind::PublishConflictError
        );
    }

    #[test]
    fn test_error_body_formatting() {
        let err = PipelineError::Timeout {
            operation: "training".to_string(),
            budget_ms: 1500,
        };
        let body = err.to_body();
        assert_eq!(body.kind, ErrorKind::TimeoutError);
        assert!(body.message.contains("1500ms"));

        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"TimeoutError\""));
    }

    #[test]
    fn test_storage_errors_map_to_unavailable() {
        let err: PipelineError = StorageError::Backend("disk gone".into()).into();
        assert_eq!(err.kind(), ErrorKind::RegistryUnavailableError);
    }
}
