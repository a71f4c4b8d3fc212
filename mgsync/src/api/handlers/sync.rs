use axum::{extract::State, http::StatusCode, response::Json};
use tokio_util::sync::CancellationToken;

use crate::{
    AppState,
    api::models::sync::{SyncRequest, TriggerAccepted},
    errors::{Error, Result},
    sync::{
        orchestrator::{SyncOutcome, SyncStatus},
        upstream::Snapshot,
    },
};

#[utoipa::path(
    post,
    path = "/sync/all",
    tag = "sync",
    summary = "Run a sync cycle",
    description = "Fetch a snapshot from Model Garden and reconcile it into local storage before responding. Without `updated_since` this is a full sync. Returns the records received, keyed by collection.",
    request_body(content = SyncRequest, description = "Optional; `updated_since` makes the cycle incremental"),
    responses(
        (status = 200, description = "Cycle completed", body = Snapshot),
        (status = 502, description = "Model Garden could not be fetched"),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn sync_all(State(state): State<AppState>, request: Option<Json<SyncRequest>>) -> Result<Json<Snapshot>> {
    let since = request.and_then(|Json(request)| request.updated_since);

    // The cycle belongs to this request; it is not cancelled by server shutdown
    match state.orchestrator.run_cycle(since, &CancellationToken::new()).await {
        SyncOutcome::Completed(report) => Ok(Json(report.details.to_snapshot())),
        SyncOutcome::Failed(failure) => Err(Error::SyncFailed { message: failure.error }),
    }
}

#[utoipa::path(
    post,
    path = "/sync/trigger",
    tag = "sync",
    summary = "Queue a sync cycle",
    description = "Queue a cycle on the background worker and return immediately. Queued cycles run one at a time.",
    request_body(content = SyncRequest, description = "Optional; `updated_since` makes the cycle incremental"),
    responses(
        (status = 202, description = "Cycle queued", body = TriggerAccepted),
        (status = 429, description = "Too many cycles already queued"),
        (status = 503, description = "The background worker is not running"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn trigger_sync(
    State(state): State<AppState>,
    request: Option<Json<SyncRequest>>,
) -> Result<(StatusCode, Json<TriggerAccepted>)> {
    let since = request.and_then(|Json(request)| request.updated_since);
    state.trigger.trigger(since)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerAccepted {
            message: "Sync cycle queued".to_string(),
            updated_since: since,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/sync/status",
    tag = "sync",
    summary = "Get sync status",
    description = "State of the orchestrator plus the most recent report and failure. Before this replica completes a cycle, the last report persisted by any replica is returned.",
    responses(
        (status = 200, description = "Current status", body = SyncStatus),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn sync_status(State(state): State<AppState>) -> Json<SyncStatus> {
    Json(state.orchestrator.status().await)
}
