//! Per-collection counters and the persisted report of one sync cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use utoipa::ToSchema;

use super::upstream::Snapshot;
use crate::types::EntityKind;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Totals {
    pub created: u64,
    pub updated: u64,
    pub errors: u64,
}

impl std::ops::AddAssign for Totals {
    fn add_assign(&mut self, other: Self) {
        self.created += other.created;
        self.updated += other.updated;
        self.errors += other.errors;
    }
}

/// Outcome of reconciling one collection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CollectionReport {
    /// Records received for the collection, as sent upstream
    #[schema(value_type = Vec<Object>)]
    pub data: Vec<Value>,
    pub created: u64,
    pub updated: u64,
    pub errors: u64,
}

impl CollectionReport {
    pub fn received(records: &[Value]) -> Self {
        Self {
            data: records.to_vec(),
            ..Default::default()
        }
    }

    pub fn totals(&self) -> Totals {
        Totals {
            created: self.created,
            updated: self.updated,
            errors: self.errors,
        }
    }
}

/// Collection reports keyed by report name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SyncDetails {
    pub projects: CollectionReport,
    pub use_cases: CollectionReport,
    pub budgets: CollectionReport,
    pub models: CollectionReport,
    pub deployments: CollectionReport,
    pub pricing: CollectionReport,
    pub subscriptions: CollectionReport,
    pub limits: CollectionReport,
}

impl SyncDetails {
    pub fn get(&self, kind: EntityKind) -> &CollectionReport {
        match kind {
            EntityKind::Project => &self.projects,
            EntityKind::UseCase => &self.use_cases,
            EntityKind::Budget => &self.budgets,
            EntityKind::Model => &self.models,
            EntityKind::Deployment => &self.deployments,
            EntityKind::Pricing => &self.pricing,
            EntityKind::Subscription => &self.subscriptions,
            EntityKind::Limit => &self.limits,
        }
    }

    pub fn get_mut(&mut self, kind: EntityKind) -> &mut CollectionReport {
        match kind {
            EntityKind::Project => &mut self.projects,
            EntityKind::UseCase => &mut self.use_cases,
            EntityKind::Budget => &mut self.budgets,
            EntityKind::Model => &mut self.models,
            EntityKind::Deployment => &mut self.deployments,
            EntityKind::Pricing => &mut self.pricing,
            EntityKind::Subscription => &mut self.subscriptions,
            EntityKind::Limit => &mut self.limits,
        }
    }

    pub fn totals(&self) -> Totals {
        let mut totals = Totals::default();
        for kind in EntityKind::SYNC_ORDER {
            totals += self.get(kind).totals();
        }
        totals
    }

    /// The received records, keyed by upstream collection name again
    pub fn to_snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot::default();
        for kind in EntityKind::SYNC_ORDER {
            *snapshot.collection_mut(kind) = self.get(kind).data.clone();
        }
        snapshot
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SyncType {
    Full,
    Incremental,
}

impl SyncType {
    pub fn for_since(since: Option<DateTime<Utc>>) -> Self {
        if since.is_some() {
            SyncType::Incremental
        } else {
            SyncType::Full
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncType::Full => "full",
            SyncType::Incremental => "incremental",
        }
    }
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Report of one completed cycle, persisted under `sync:result:{start}` and `sync:latest`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SyncReport {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
    pub sync_type: SyncType,
    pub updated_since: Option<DateTime<Utc>>,
    pub totals: Totals,
    pub details: SyncDetails,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_totals_sum_every_collection() {
        let mut details = SyncDetails::default();
        details.projects.created = 1;
        details.use_cases.created = 2;
        details.deployments.updated = 3;
        details.limits.errors = 1;
        assert_eq!(
            details.totals(),
            Totals {
                created: 3,
                updated: 3,
                errors: 1
            }
        );
    }

    #[test]
    fn test_details_serialize_with_report_keys() {
        let mut details = SyncDetails::default();
        details.get_mut(EntityKind::Subscription).data = vec![json!({"alias": "a"})];
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["subscriptions"]["data"][0]["alias"], "a");
        assert!(json.get("deployments").is_some());

        let snapshot = details.to_snapshot();
        assert_eq!(snapshot.use_case_llm_models.len(), 1);
    }
}
