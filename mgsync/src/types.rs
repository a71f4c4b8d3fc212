//! Common type definitions shared by the storage layer, the reconciler and the API.
//!
//! # ID Types
//!
//! Upstream identifiers are opaque strings (often, but not always, UUIDs), so every
//! entity id is a `String` wrapped in a type alias:
//!
//! - [`ProjectId`], [`UseCaseId`], [`ModelId`], [`SubscriptionId`], [`LimitId`]: parents
//!   referenced by foreign keys
//! - [`EntityId`]: any row identifier
//!
//! # Entity kinds
//!
//! [`EntityKind`] is the closed set of the eight entity kinds the gateway mirrors. It is
//! used both for snapshot collections (in dependency order, see [`EntityKind::SYNC_ORDER`])
//! and as the parsed form of the `entity_type` tag on CUD events.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::ToSchema;

// Type aliases for IDs
pub type EntityId = String;
pub type ProjectId = EntityId;
pub type UseCaseId = EntityId;
pub type ModelId = EntityId;
pub type SubscriptionId = EntityId;
pub type LimitId = EntityId;

/// Abbreviate an id to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

/// Generate a fresh identifier for a row whose record did not carry one.
pub fn new_entity_id() -> EntityId {
    uuid::Uuid::new_v4().to_string()
}

/// The eight entity kinds mirrored from Model Garden.
///
/// Budgets and limits each cover two tables; the sub-entity is selected by the `type`
/// discriminator on the record (see [`crate::sync::records`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Project,
    #[serde(rename = "usecase", alias = "use_case")]
    UseCase,
    Budget,
    Model,
    Deployment,
    Pricing,
    Subscription,
    Limit,
}

impl EntityKind {
    /// Order in which snapshot collections are reconciled. Parents always precede children.
    pub const SYNC_ORDER: [EntityKind; 8] = [
        EntityKind::Project,
        EntityKind::UseCase,
        EntityKind::Budget,
        EntityKind::Model,
        EntityKind::Deployment,
        EntityKind::Pricing,
        EntityKind::Subscription,
        EntityKind::Limit,
    ];

    /// Tag used on inbound CUD events
    pub fn tag(self) -> &'static str {
        match self {
            EntityKind::Project => "project",
            EntityKind::UseCase => "usecase",
            EntityKind::Budget => "budget",
            EntityKind::Model => "model",
            EntityKind::Deployment => "deployment",
            EntityKind::Pricing => "pricing",
            EntityKind::Subscription => "subscription",
            EntityKind::Limit => "limit",
        }
    }

    /// Collection name in the upstream snapshot payload
    pub fn collection(self) -> &'static str {
        match self {
            EntityKind::Project => "projects",
            EntityKind::UseCase => "use_cases",
            EntityKind::Budget => "budgets",
            EntityKind::Model => "models",
            EntityKind::Deployment => "model_deployments",
            EntityKind::Pricing => "pricing",
            EntityKind::Subscription => "use_case_llm_models",
            EntityKind::Limit => "limits",
        }
    }

    /// Key used for this collection in the persisted run report
    pub fn report_key(self) -> &'static str {
        match self {
            EntityKind::Deployment => "deployments",
            EntityKind::Subscription => "subscriptions",
            other => other.collection(),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported entity type: {0}")]
pub struct UnsupportedEntityType(pub String);

impl FromStr for EntityKind {
    type Err = UnsupportedEntityType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "project" => Ok(EntityKind::Project),
            "usecase" | "use_case" => Ok(EntityKind::UseCase),
            "budget" => Ok(EntityKind::Budget),
            "model" => Ok(EntityKind::Model),
            "deployment" => Ok(EntityKind::Deployment),
            "pricing" => Ok(EntityKind::Pricing),
            "subscription" => Ok(EntityKind::Subscription),
            "limit" => Ok(EntityKind::Limit),
            _ => Err(UnsupportedEntityType(s.to_string())),
        }
    }
}

/// Action carried by a CUD event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum CudAction {
    Create,
    Update,
    Delete,
}

impl fmt::Display for CudAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CudAction::Create => "CREATE",
            CudAction::Update => "UPDATE",
            CudAction::Delete => "DELETE",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported action: {0}")]
pub struct UnsupportedAction(pub String);

impl FromStr for CudAction {
    type Err = UnsupportedAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CREATE" | "CREATED" => Ok(CudAction::Create),
            "UPDATE" | "UPDATED" => Ok(CudAction::Update),
            "DELETE" | "DELETED" => Ok(CudAction::Delete),
            _ => Err(UnsupportedAction(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_parses_event_tags() {
        assert_eq!("project".parse::<EntityKind>(), Ok(EntityKind::Project));
        assert_eq!("UseCase".parse::<EntityKind>(), Ok(EntityKind::UseCase));
        assert_eq!("use_case".parse::<EntityKind>(), Ok(EntityKind::UseCase));
        assert_eq!(" LIMIT ".parse::<EntityKind>(), Ok(EntityKind::Limit));
        assert_eq!(
            "widget".parse::<EntityKind>(),
            Err(UnsupportedEntityType("widget".to_string()))
        );
    }

    #[test]
    fn test_entity_kind_names() {
        assert_eq!(EntityKind::Deployment.collection(), "model_deployments");
        assert_eq!(EntityKind::Deployment.report_key(), "deployments");
        assert_eq!(EntityKind::Subscription.collection(), "use_case_llm_models");
        assert_eq!(EntityKind::Subscription.report_key(), "subscriptions");
        assert_eq!(EntityKind::Pricing.report_key(), "pricing");
    }

    #[test]
    fn test_sync_order_puts_parents_first() {
        let pos = |k: EntityKind| EntityKind::SYNC_ORDER.iter().position(|x| *x == k).unwrap();
        assert!(pos(EntityKind::Project) < pos(EntityKind::UseCase));
        assert!(pos(EntityKind::UseCase) < pos(EntityKind::Budget));
        assert!(pos(EntityKind::Model) < pos(EntityKind::Deployment));
        assert!(pos(EntityKind::Model) < pos(EntityKind::Pricing));
        assert!(pos(EntityKind::Model) < pos(EntityKind::Subscription));
        assert!(pos(EntityKind::UseCase) < pos(EntityKind::Subscription));
        assert!(pos(EntityKind::Subscription) < pos(EntityKind::Limit));
    }

    #[test]
    fn test_cud_action_parsing() {
        assert_eq!("create".parse::<CudAction>(), Ok(CudAction::Create));
        assert_eq!("UPDATED".parse::<CudAction>(), Ok(CudAction::Update));
        assert_eq!("Delete".parse::<CudAction>(), Ok(CudAction::Delete));
        assert!("UPSERT".parse::<CudAction>().is_err());
    }

    #[test]
    fn test_abbrev_id() {
        assert_eq!(abbrev_id("550e8400-e29b-41d4-a716-446655440000"), "550e8400");
        assert_eq!(abbrev_id("proj-1"), "proj-1");
    }
}
