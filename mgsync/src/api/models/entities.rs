//! Query parameters and responses for browsing the mirrored tables.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};

use super::pagination::Pagination;
use crate::types::{EntityId, EntityKind};

/// Selects the usage table of budgets and limits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    #[default]
    Primary,
    Usage,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListEntitiesQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,

    /// Only rows owned by this parent (project for use cases, model for deployments, ...)
    pub parent_id: Option<EntityId>,

    /// `usage` lists budget or limit usage rows instead of the primary table
    #[serde(default, rename = "type")]
    pub record_type: RecordType,
}

/// One page of stored rows
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EntityPage {
    pub kind: EntityKind,
    pub record_type: RecordType,
    #[schema(value_type = Vec<Object>)]
    pub data: Vec<Value>,
    pub skip: i64,
    pub limit: i64,
}
