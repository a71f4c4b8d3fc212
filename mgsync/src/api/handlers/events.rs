use axum::{extract::State, response::Json};

use crate::{AppState, api::models::events::EventResponse, errors::Result, events::CudEvent};

#[utoipa::path(
    post,
    path = "/events",
    tag = "events",
    summary = "Ingest a CUD event",
    description = "Apply one create, update or delete event to the mirrored tables. Redelivered events are acknowledged without being applied again. Processing failures are reported in the body with status \"error\"; the HTTP status is 200 for every well-formed envelope.",
    request_body = CudEvent,
    responses(
        (status = 200, description = "Event handled", body = EventResponse),
        (status = 400, description = "Malformed event envelope"),
        (status = 422, description = "Event envelope is missing required fields"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn ingest_event(State(state): State<AppState>, Json(event): Json<CudEvent>) -> Result<Json<EventResponse>> {
    let outcome = state.ingestor.process(&event).await;
    Ok(Json(EventResponse::from(outcome)))
}
