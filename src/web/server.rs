use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use super::{api, AppState};

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(api::health_check))
        // Pipeline operations
        .route("/api/train", post(api::post_train))
        .route("/api/predict", get(api::get_predict))
        .route("/api/predictions/snapshot", post(api::post_snapshot))
        .route("/api/analyze", get(api::get_analyze))
        // Registry
        .route("/api/models", get(api::get_models))
        .layer(cors)
        .with_state(state)
}

pub async fn start_api_server(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("API server starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
