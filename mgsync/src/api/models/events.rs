//! API response for event ingestion.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::events::{EventOutcome, EventStatus};
use crate::types::EntityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Error,
}

/// Acknowledgement of one CUD event. Processing failures are reported here with
/// `status: "error"` rather than through the HTTP status.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventResponse {
    pub status: ResponseStatus,
    pub message: String,
    /// What happened to the event
    pub outcome: EventStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<EntityId>,
}

impl From<EventOutcome> for EventResponse {
    fn from(outcome: EventOutcome) -> Self {
        let message = match (&outcome.status, &outcome.error) {
            (EventStatus::Failed, Some(error)) => format!("Event {} failed: {error}", outcome.event_id),
            (EventStatus::Failed, None) => format!("Event {} failed", outcome.event_id),
            (EventStatus::AlreadyProcessed, _) => format!("Event {} already processed", outcome.event_id),
            (EventStatus::NotFound, _) => format!("Event {} processed: target not found", outcome.event_id),
            _ => "Event processed successfully".to_string(),
        };

        Self {
            status: if outcome.is_success() {
                ResponseStatus::Ok
            } else {
                ResponseStatus::Error
            },
            message,
            outcome: outcome.status,
            entity_id: outcome.entity_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_outcome_is_reported_as_error() {
        let response = EventResponse::from(EventOutcome {
            event_id: "evt-1".to_string(),
            status: EventStatus::Failed,
            entity_id: Some("p-1".to_string()),
            error: Some("unsupported entity type: widget".to_string()),
        });
        assert_eq!(response.status, ResponseStatus::Error);
        assert_eq!(response.message, "Event evt-1 failed: unsupported entity type: widget");
        assert_eq!(response.entity_id.as_deref(), Some("p-1"));
    }

    #[test]
    fn test_skipped_events_are_ok() {
        let response = EventResponse::from(EventOutcome {
            event_id: "evt-2".to_string(),
            status: EventStatus::AlreadyProcessed,
            entity_id: None,
            error: None,
        });
        assert_eq!(response.status, ResponseStatus::Ok);
        assert_eq!(response.outcome, EventStatus::AlreadyProcessed);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["outcome"], "already_processed");
        assert!(json.get("entity_id").is_none());
    }
}
