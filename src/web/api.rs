use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

use super::AppState;
use crate::engine::PredictionSummary;
use crate::error::{ErrorKind, PipelineError};
use crate::ml::{LatestPointer, VersionId, VersionMetadata};
use crate::types::{AnalyzeQuery, PredictQuery, PredictionRecord, SnapshotBody, TrainBody};

/// Pipeline error rendered as `{ "kind": ..., "message": ... }`
pub struct ApiError(pub PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        ApiError(err)
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
        ErrorKind::DataNotFoundError
        | ErrorKind::ModelNotFoundError
        | ErrorKind::PlayerNotFoundError => StatusCode::NOT_FOUND,
        ErrorKind::FeatureSchemaError | ErrorKind::PublishConflictError => StatusCode::CONFLICT,
        ErrorKind::TrainingFailure => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::TimeoutError => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::RegistryUnavailableError | ErrorKind::RetriesExhaustedError => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ErrorKind::ConfigError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.0.kind());
        if status.is_server_error() {
            error!("{}", self.0);
        } else {
            warn!("{}", self.0);
        }
        (status, Json(self.0.to_body())).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: String,
}

pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[derive(Serialize)]
pub struct TrainResponse {
    pub version: VersionId,
    pub metadata: Option<VersionMetadata>,
}

pub async fn post_train(
    State(state): State<AppState>,
    Json(body): Json<TrainBody>,
) -> ApiResult<impl IntoResponse> {
    let pipeline = &state.pipeline;
    let request = body.into_request(&pipeline.config.training)?;
    let version = pipeline.trainer.train_request(request).await?;
    let metadata = pipeline.registry.metadata(version).await?;

    info!("Training request produced model {}", version);
    Ok((StatusCode::CREATED, Json(TrainResponse { version, metadata })))
}

#[derive(Serialize)]
pub struct PredictResponse {
    pub predictions: Vec<PredictionRecord>,
    pub summary: PredictionSummary,
}

pub async fn get_predict(
    State(state): State<AppState>,
    Query(query): Query<PredictQuery>,
) -> ApiResult<Json<PredictResponse>> {
    let request = query.into_request(&state.pipeline.config.prediction)?;
    let predictions = state.pipeline.predictor.predict(&request).await?;
    let summary = PredictionSummary::from_predictions(&predictions);
    Ok(Json(PredictResponse {
        predictions,
        summary,
    }))
}

pub async fn post_snapshot(
    State(state): State<AppState>,
    Json(body): Json<SnapshotBody>,
) -> ApiResult<impl IntoResponse> {
    let request = body.into_request()?;
    let snapshot = state.pipeline.predictor.snapshot(&request).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "season": snapshot.season,
            "model_version": snapshot.model_version,
            "generated_at": snapshot.generated_at,
            "predictions": snapshot.predictions.len(),
        })),
    ))
}

pub async fn get_analyze(
    State(state): State<AppState>,
    Query(query): Query<AnalyzeQuery>,
) -> ApiResult<impl IntoResponse> {
    let request = query.into_request()?;
    let report = state.pipeline.analyzer.analyze(&request).await?;
    Ok(Json(report))
}

#[derive(Serialize)]
pub struct ModelsResponse {
    pub latest: Option<LatestPointer>,
    pub versions: Vec<VersionMetadata>,
}

pub async fn get_models(State(state): State<AppState>) -> ApiResult<Json<ModelsResponse>> {
    let latest = state.pipeline.registry.latest_pointer().await?;
    let versions = state.pipeline.registry.list_versions().await?;
    Ok(Json(ModelsResponse { latest, versions }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::ValidationError), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::PlayerNotFoundError), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::PublishConflictError), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::TrainingFailure), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status_for(ErrorKind::TimeoutError), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            status_for(ErrorKind::RegistryUnavailableError),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
