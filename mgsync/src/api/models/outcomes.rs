use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::pagination::SequencePagination;
use crate::outcomes::{EVENT_PROCESSED_STREAM, StreamEntry};

fn default_stream() -> String {
    EVENT_PROCESSED_STREAM.to_string()
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OutcomesQuery {
    /// `event_processed` (default) or `sync_events`
    #[serde(default = "default_stream")]
    pub stream: String,

    #[serde(flatten)]
    #[param(inline)]
    pub pagination: SequencePagination,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OutcomePage {
    pub stream: String,
    pub data: Vec<StreamEntry>,
    /// Sequence id to pass as `after` for the next page; absent when the page is empty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_id: Option<i64>,
}
