//! Typed entity records.
//!
//! Snapshot records and event payloads arrive as JSON objects. They are parsed exactly once,
//! at the boundary, into [`EntityRecord`] (a full record, used for upserts and CREATE events)
//! or [`EntityPatch`] (a partial record, used for UPDATE events). Budgets and limits each
//! cover two tables; the `type` field on the record picks the sub-entity.

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::RecordError;
use crate::db::models::{
    budgets::{BudgetCreateDBRequest, BudgetUpdateDBRequest, BudgetUsageCreateDBRequest, BudgetUsageUpdateDBRequest},
    deployments::{DeploymentCreateDBRequest, DeploymentUpdateDBRequest},
    limits::{LimitCreateDBRequest, LimitUpdateDBRequest, LimitUsageCreateDBRequest, LimitUsageUpdateDBRequest},
    llm_models::{ModelCreateDBRequest, ModelUpdateDBRequest},
    pricing::{PricingCreateDBRequest, PricingUpdateDBRequest},
    projects::{ProjectCreateDBRequest, ProjectUpdateDBRequest},
    subscriptions::{SubscriptionCreateDBRequest, SubscriptionUpdateDBRequest},
    use_cases::{UseCaseCreateDBRequest, UseCaseUpdateDBRequest},
};
use crate::types::EntityKind;

/// Which of the two tables behind a budget or limit record is meant
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SubEntity {
    Primary,
    Usage,
}

/// Read the `type` discriminator. Absent means the primary table; kinds without
/// sub-entities ignore the field.
pub fn sub_entity(kind: EntityKind, raw: &Value) -> Result<SubEntity, RecordError> {
    let primary_tag = match kind {
        EntityKind::Budget => "budget",
        EntityKind::Limit => "limit",
        _ => return Ok(SubEntity::Primary),
    };
    match raw.get("type") {
        None | Some(Value::Null) => Ok(SubEntity::Primary),
        Some(Value::String(tag)) if tag.eq_ignore_ascii_case(primary_tag) => Ok(SubEntity::Primary),
        Some(Value::String(tag)) if tag.eq_ignore_ascii_case("usage") => Ok(SubEntity::Usage),
        Some(other) => Err(RecordError::UnknownDiscriminator {
            kind,
            value: other.to_string(),
        }),
    }
}

fn parse<T: DeserializeOwned>(kind: EntityKind, raw: &Value) -> Result<T, RecordError> {
    T::deserialize(raw).map_err(|source| RecordError::Malformed { kind, source })
}

/// A complete record of one entity
#[derive(Debug, Clone)]
pub enum EntityRecord {
    Project(ProjectCreateDBRequest),
    UseCase(UseCaseCreateDBRequest),
    Budget(BudgetCreateDBRequest),
    BudgetUsage(BudgetUsageCreateDBRequest),
    Model(ModelCreateDBRequest),
    Deployment(DeploymentCreateDBRequest),
    Pricing(PricingCreateDBRequest),
    Subscription(SubscriptionCreateDBRequest),
    Limit(LimitCreateDBRequest),
    LimitUsage(LimitUsageCreateDBRequest),
}

impl EntityRecord {
    pub fn parse(kind: EntityKind, raw: &Value) -> Result<Self, RecordError> {
        Ok(match (kind, sub_entity(kind, raw)?) {
            (EntityKind::Project, _) => EntityRecord::Project(parse(kind, raw)?),
            (EntityKind::UseCase, _) => EntityRecord::UseCase(parse(kind, raw)?),
            (EntityKind::Budget, SubEntity::Primary) => EntityRecord::Budget(parse(kind, raw)?),
            (EntityKind::Budget, SubEntity::Usage) => EntityRecord::BudgetUsage(parse(kind, raw)?),
            (EntityKind::Model, _) => EntityRecord::Model(parse(kind, raw)?),
            (EntityKind::Deployment, _) => EntityRecord::Deployment(parse(kind, raw)?),
            (EntityKind::Pricing, _) => EntityRecord::Pricing(parse(kind, raw)?),
            (EntityKind::Subscription, _) => EntityRecord::Subscription(parse(kind, raw)?),
            (EntityKind::Limit, SubEntity::Primary) => EntityRecord::Limit(parse(kind, raw)?),
            (EntityKind::Limit, SubEntity::Usage) => EntityRecord::LimitUsage(parse(kind, raw)?),
        })
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRecord::Project(_) => EntityKind::Project,
            EntityRecord::UseCase(_) => EntityKind::UseCase,
            EntityRecord::Budget(_) | EntityRecord::BudgetUsage(_) => EntityKind::Budget,
            EntityRecord::Model(_) => EntityKind::Model,
            EntityRecord::Deployment(_) => EntityKind::Deployment,
            EntityRecord::Pricing(_) => EntityKind::Pricing,
            EntityRecord::Subscription(_) => EntityKind::Subscription,
            EntityRecord::Limit(_) | EntityRecord::LimitUsage(_) => EntityKind::Limit,
        }
    }

    pub fn sub_entity(&self) -> SubEntity {
        match self {
            EntityRecord::BudgetUsage(_) | EntityRecord::LimitUsage(_) => SubEntity::Usage,
            _ => SubEntity::Primary,
        }
    }
}

/// A partial record of one entity. Absent fields are left untouched.
#[derive(Debug, Clone)]
pub enum EntityPatch {
    Project(ProjectUpdateDBRequest),
    UseCase(UseCaseUpdateDBRequest),
    Budget(BudgetUpdateDBRequest),
    BudgetUsage(BudgetUsageUpdateDBRequest),
    Model(ModelUpdateDBRequest),
    Deployment(DeploymentUpdateDBRequest),
    Pricing(PricingUpdateDBRequest),
    Subscription(SubscriptionUpdateDBRequest),
    Limit(LimitUpdateDBRequest),
    LimitUsage(LimitUsageUpdateDBRequest),
}

impl EntityPatch {
    pub fn parse(kind: EntityKind, raw: &Value) -> Result<Self, RecordError> {
        Ok(match (kind, sub_entity(kind, raw)?) {
            (EntityKind::Project, _) => EntityPatch::Project(parse(kind, raw)?),
            (EntityKind::UseCase, _) => EntityPatch::UseCase(parse(kind, raw)?),
            (EntityKind::Budget, SubEntity::Primary) => EntityPatch::Budget(parse(kind, raw)?),
            (EntityKind::Budget, SubEntity::Usage) => EntityPatch::BudgetUsage(parse(kind, raw)?),
            (EntityKind::Model, _) => EntityPatch::Model(parse(kind, raw)?),
            (EntityKind::Deployment, _) => EntityPatch::Deployment(parse(kind, raw)?),
            (EntityKind::Pricing, _) => EntityPatch::Pricing(parse(kind, raw)?),
            (EntityKind::Subscription, _) => EntityPatch::Subscription(parse(kind, raw)?),
            (EntityKind::Limit, SubEntity::Primary) => EntityPatch::Limit(parse(kind, raw)?),
            (EntityKind::Limit, SubEntity::Usage) => EntityPatch::LimitUsage(parse(kind, raw)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::budgets::UsageScope;
    use serde_json::json;

    #[test]
    fn test_budget_discriminator() {
        let budget = EntityRecord::parse(EntityKind::Budget, &json!({"use_case_id": "uc1", "budget_cents": 1000})).unwrap();
        assert!(matches!(budget, EntityRecord::Budget(ref b) if b.currency == "USD"));

        let usage = EntityRecord::parse(
            EntityKind::Budget,
            &json!({"type": "usage", "use_case_id": "uc1", "usage_period": "2025-07-01", "scope": "monthly", "used_cents": 250}),
        )
        .unwrap();
        match usage {
            EntityRecord::BudgetUsage(u) => {
                assert_eq!(u.scope, UsageScope::Monthly);
                assert_eq!(u.used_cents, 250);
            }
            other => panic!("expected budget usage, got {other:?}"),
        }

        let err = EntityRecord::parse(EntityKind::Budget, &json!({"type": "forecast", "use_case_id": "uc1"})).unwrap_err();
        assert!(matches!(err, RecordError::UnknownDiscriminator { kind: EntityKind::Budget, .. }));
    }

    #[test]
    fn test_limit_usage_accepts_date_period() {
        let record = EntityRecord::parse(
            EntityKind::Limit,
            &json!({"type": "usage", "limit_id": "l1", "scope": "daily", "usage_period": "2025-07-01", "value": 3}),
        )
        .unwrap();
        assert_eq!(record.kind(), EntityKind::Limit);
        assert_eq!(record.sub_entity(), SubEntity::Usage);
    }

    #[test]
    fn test_type_field_is_ignored_for_other_kinds() {
        let record = EntityRecord::parse(
            EntityKind::Project,
            &json!({"type": "usage", "project_name": "Alpha", "project_code": "PRJ-1"}),
        )
        .unwrap();
        assert!(matches!(record, EntityRecord::Project(_)));
    }

    #[test]
    fn test_missing_required_field_is_malformed() {
        let err = EntityRecord::parse(EntityKind::Deployment, &json!({"model_id": "m1", "deployment_name": "east"})).unwrap_err();
        assert!(matches!(err, RecordError::Malformed { kind: EntityKind::Deployment, .. }));
    }

    #[test]
    fn test_patch_distinguishes_null_from_absent() {
        let patch = EntityPatch::parse(EntityKind::Deployment, &json!({"region": null, "is_default": true})).unwrap();
        match patch {
            EntityPatch::Deployment(p) => {
                assert_eq!(p.region, Some(None));
                assert_eq!(p.endpoint, None);
                assert_eq!(p.auth_secret_manager_path, None);
                assert_eq!(p.is_default, Some(true));
            }
            other => panic!("expected deployment patch, got {other:?}"),
        }
    }
}
