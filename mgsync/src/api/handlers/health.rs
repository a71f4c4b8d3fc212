use axum::{extract::State, response::Json};

use crate::{AppState, api::models::health::HealthResponse};

#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    summary = "Service health",
    description = "Reports the service as healthy and whether Model Garden is reachable. An unreachable upstream does not make the service unhealthy; events are still accepted.",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let upstream = state.orchestrator.upstream().health_check().await;

    Json(HealthResponse {
        status: "healthy".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        upstream,
    })
}
