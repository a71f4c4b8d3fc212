use axum::{
    extract::{Query, State},
    response::Json,
};

use crate::{
    AppState,
    api::models::outcomes::{OutcomePage, OutcomesQuery},
    errors::{Error, Result},
    outcomes::{EVENT_PROCESSED_STREAM, SYNC_EVENTS_STREAM},
};

#[utoipa::path(
    get,
    path = "/outcomes",
    tag = "outcomes",
    summary = "Read an outcome stream",
    description = "Page through the published outcomes of ingested events (`event_processed`) or sync cycles (`sync_events`), oldest first. Pass the returned `last_id` as `after` to fetch the next page.",
    params(OutcomesQuery),
    responses(
        (status = 200, description = "One page of outcomes", body = OutcomePage),
        (status = 400, description = "Unknown stream"),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_outcomes(State(state): State<AppState>, Query(query): Query<OutcomesQuery>) -> Result<Json<OutcomePage>> {
    if query.stream != EVENT_PROCESSED_STREAM && query.stream != SYNC_EVENTS_STREAM {
        return Err(Error::BadRequest {
            message: format!(
                "Unknown stream '{}', expected '{EVENT_PROCESSED_STREAM}' or '{SYNC_EVENTS_STREAM}'",
                query.stream
            ),
        });
    }

    let data = state
        .outcomes
        .read(&query.stream, query.pagination.after(), query.pagination.limit())
        .await?;
    let last_id = data.last().map(|entry| entry.id);

    Ok(Json(OutcomePage {
        stream: query.stream,
        data,
        last_id,
    }))
}
