//! API request/response models for sync endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Body of `POST /sync/all` and `POST /sync/trigger`. An empty body asks for a full sync.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SyncRequest {
    /// Only fetch records changed at or after this instant
    #[serde(default)]
    pub updated_since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TriggerAccepted {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_since: Option<DateTime<Utc>>,
}
