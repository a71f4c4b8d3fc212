//! Ingestion of single CUD events pushed by Model Garden.
//!
//! An event names an entity kind, an action and a target id, and carries the record as its
//! payload. [`EventIngestor::process`] never fails: every event ends in an [`EventOutcome`]
//! and one record on the `event_processed` outcome stream.
//!
//! Delivery is at least once. The event id is remembered in the cache for `dedup_ttl` after a
//! successful dispatch, so redeliveries inside that window are answered with
//! `already_processed` without touching storage. Failed events are not remembered and may
//! be retried.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{error, info, instrument};
use utoipa::ToSchema;

use crate::cache::{self, Cache};
use crate::db::{
    errors::{DbError, Result as DbResult},
    models::{
        budgets::{BudgetDBResponse, BudgetUsageDBResponse},
        deployments::{DeploymentDBResponse, DeploymentUpdateDBRequest},
        limits::{LimitDBResponse, LimitUsageDBResponse},
        llm_models::ModelDBResponse,
        pricing::PricingDBResponse,
        projects::ProjectDBResponse,
        subscriptions::SubscriptionDBResponse,
        use_cases::UseCaseDBResponse,
    },
    store::{Store, Stored, UnitOfWork},
};
use crate::outcomes::{self, EVENT_PROCESSED_STREAM, OUTCOME_SOURCE, OutcomePublisher, OutcomeRecord};
use crate::sync::{
    RecordError,
    reconciler::claim_default,
    records::{EntityPatch, EntityRecord, SubEntity, sub_entity},
};
use crate::types::{
    CudAction, EntityId, EntityKind, UnsupportedAction, UnsupportedEntityType, abbrev_id,
};

/// Envelope of one CUD event
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CudEvent {
    pub event_id: String,
    /// `CREATE`, `UPDATE` or `DELETE` (`CREATED`, `UPDATED`, `DELETED` also accepted)
    pub event_type: String,
    /// `project`, `usecase`, `budget`, `model`, `deployment`, `pricing`, `subscription` or `limit`
    pub entity_type: String,
    pub entity_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub version: Option<String>,
    /// The record. Partial for updates. Budgets and limits select usage rows with `"type": "usage"`.
    #[schema(value_type = Object)]
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Created,
    Updated,
    Deleted,
    NotFound,
    AlreadyProcessed,
    Failed,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Created => "created",
            EventStatus::Updated => "updated",
            EventStatus::Deleted => "deleted",
            EventStatus::NotFound => "not_found",
            EventStatus::AlreadyProcessed => "already_processed",
            EventStatus::Failed => "failed",
        }
    }
}

/// Result of processing one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EventOutcome {
    pub event_id: String,
    pub status: EventStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EventOutcome {
    pub fn is_success(&self) -> bool {
        self.status != EventStatus::Failed
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error(transparent)]
    UnsupportedEntityType(#[from] UnsupportedEntityType),

    #[error(transparent)]
    UnsupportedAction(#[from] UnsupportedAction),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Storage(#[from] DbError),
}

#[derive(Clone)]
pub struct EventIngestor {
    store: Arc<dyn Store>,
    cache: Arc<dyn Cache>,
    publisher: Arc<dyn OutcomePublisher>,
    dedup_ttl: Duration,
}

impl EventIngestor {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<dyn Cache>,
        publisher: Arc<dyn OutcomePublisher>,
        dedup_ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            publisher,
            dedup_ttl,
        }
    }

    #[instrument(skip_all, fields(
        event_id = %event.event_id,
        event_type = %event.event_type,
        entity_type = %event.entity_type,
        entity_id = %abbrev_id(&event.entity_id),
    ))]
    pub async fn process(&self, event: &CudEvent) -> EventOutcome {
        let started = Instant::now();
        let dedup_key = cache::processed_event_key(&event.event_id);

        if cache::lookup(self.cache.as_ref(), &dedup_key).await.is_some() {
            info!("Event already processed, skipping");
            counter!("mgsync_events_total", "status" => EventStatus::AlreadyProcessed.as_str()).increment(1);
            return EventOutcome {
                event_id: event.event_id.clone(),
                status: EventStatus::AlreadyProcessed,
                entity_id: Some(event.entity_id.clone()),
                error: None,
            };
        }

        let outcome = match self.dispatch(event).await {
            Ok((status, entity_id)) => {
                let outcome = EventOutcome {
                    event_id: event.event_id.clone(),
                    status,
                    entity_id,
                    error: None,
                };
                let marker = json!({
                    "processed_at": Utc::now(),
                    "result": outcome,
                });
                cache::store(self.cache.as_ref(), &dedup_key, marker, self.dedup_ttl).await;
                outcome
            }
            Err(e) => {
                error!(error = %e, "Failed to process event");
                EventOutcome {
                    event_id: event.event_id.clone(),
                    status: EventStatus::Failed,
                    entity_id: Some(event.entity_id.clone()),
                    error: Some(e.to_string()),
                }
            }
        };

        let processing_time = started.elapsed().as_secs_f64();
        outcomes::publish(
            self.publisher.as_ref(),
            EVENT_PROCESSED_STREAM,
            OutcomeRecord {
                event_type: event.event_type.clone(),
                entity_type: event.entity_type.parse().ok(),
                entity_id: outcome.entity_id.clone(),
                event_id: Some(event.event_id.clone()),
                status: if outcome.is_success() { "success" } else { "failed" }.to_string(),
                error: outcome.error.clone(),
                processing_time,
                sync_type: None,
                totals: None,
                timestamp: Utc::now(),
                source: OUTCOME_SOURCE.to_string(),
            },
        )
        .await;

        counter!("mgsync_events_total", "status" => outcome.status.as_str()).increment(1);
        histogram!("mgsync_event_processing_seconds").record(processing_time);
        info!(status = outcome.status.as_str(), processing_time, "Event processed");
        outcome
    }

    async fn dispatch(&self, event: &CudEvent) -> Result<(EventStatus, Option<EntityId>), EventError> {
        let kind: EntityKind = event.entity_type.parse()?;
        let action: CudAction = event.event_type.parse()?;

        match action {
            CudAction::Create => {
                let mut payload = event.payload.clone();
                if !payload.contains_key("id") && !event.entity_id.trim().is_empty() {
                    payload.insert("id".to_string(), Value::String(event.entity_id.clone()));
                }
                let record = EntityRecord::parse(kind, &Value::Object(payload))?;
                let id = self.create(&record).await?;
                Ok((EventStatus::Created, Some(id)))
            }
            CudAction::Update => {
                let patch = EntityPatch::parse(kind, &Value::Object(event.payload.clone()))?;
                Ok(match self.update(&event.entity_id, &patch).await? {
                    Some(id) => (EventStatus::Updated, Some(id)),
                    None => (EventStatus::NotFound, Some(event.entity_id.clone())),
                })
            }
            CudAction::Delete => {
                let sub = sub_entity(kind, &Value::Object(event.payload.clone()))?;
                let status = if self.delete(kind, sub, &event.entity_id).await? {
                    EventStatus::Deleted
                } else {
                    EventStatus::NotFound
                };
                Ok((status, Some(event.entity_id.clone())))
            }
        }
    }

    async fn create(&self, record: &EntityRecord) -> DbResult<EntityId> {
        let mut uow = self.store.begin().await?;
        let id = match record {
            EntityRecord::Project(r) => insert::<ProjectDBResponse>(uow.as_mut(), r).await?,
            EntityRecord::UseCase(r) => insert::<UseCaseDBResponse>(uow.as_mut(), r).await?,
            EntityRecord::Budget(r) => insert::<BudgetDBResponse>(uow.as_mut(), r).await?,
            EntityRecord::BudgetUsage(r) => insert::<BudgetUsageDBResponse>(uow.as_mut(), r).await?,
            EntityRecord::Model(r) => insert::<ModelDBResponse>(uow.as_mut(), r).await?,
            EntityRecord::Deployment(r) => {
                if r.is_default {
                    claim_default(uow.as_mut(), &r.model_id, None).await?;
                }
                insert::<DeploymentDBResponse>(uow.as_mut(), r).await?
            }
            EntityRecord::Pricing(r) => insert::<PricingDBResponse>(uow.as_mut(), r).await?,
            EntityRecord::Subscription(r) => insert::<SubscriptionDBResponse>(uow.as_mut(), r).await?,
            EntityRecord::Limit(r) => insert::<LimitDBResponse>(uow.as_mut(), r).await?,
            EntityRecord::LimitUsage(r) => insert::<LimitUsageDBResponse>(uow.as_mut(), r).await?,
        };
        uow.commit().await?;
        Ok(id)
    }

    /// Apply a partial update by id. `None` when no such row exists.
    async fn update(&self, id: &str, patch: &EntityPatch) -> DbResult<Option<EntityId>> {
        let mut uow = self.store.begin().await?;
        let updated = match patch {
            EntityPatch::Project(p) => patch_row::<ProjectDBResponse>(uow.as_mut(), id, p).await?,
            EntityPatch::UseCase(p) => patch_row::<UseCaseDBResponse>(uow.as_mut(), id, p).await?,
            EntityPatch::Budget(p) => patch_row::<BudgetDBResponse>(uow.as_mut(), id, p).await?,
            EntityPatch::BudgetUsage(p) => patch_row::<BudgetUsageDBResponse>(uow.as_mut(), id, p).await?,
            EntityPatch::Model(p) => patch_row::<ModelDBResponse>(uow.as_mut(), id, p).await?,
            EntityPatch::Deployment(p) => patch_deployment(uow.as_mut(), id, p).await?,
            EntityPatch::Pricing(p) => patch_row::<PricingDBResponse>(uow.as_mut(), id, p).await?,
            EntityPatch::Subscription(p) => patch_row::<SubscriptionDBResponse>(uow.as_mut(), id, p).await?,
            EntityPatch::Limit(p) => patch_row::<LimitDBResponse>(uow.as_mut(), id, p).await?,
            EntityPatch::LimitUsage(p) => patch_row::<LimitUsageDBResponse>(uow.as_mut(), id, p).await?,
        };
        uow.commit().await?;
        Ok(updated)
    }

    async fn delete(&self, kind: EntityKind, sub: SubEntity, id: &str) -> DbResult<bool> {
        let mut uow = self.store.begin().await?;
        let deleted = match (kind, sub) {
            (EntityKind::Project, _) => remove::<ProjectDBResponse>(uow.as_mut(), id).await?,
            (EntityKind::UseCase, _) => remove::<UseCaseDBResponse>(uow.as_mut(), id).await?,
            (EntityKind::Budget, SubEntity::Primary) => remove::<BudgetDBResponse>(uow.as_mut(), id).await?,
            (EntityKind::Budget, SubEntity::Usage) => remove::<BudgetUsageDBResponse>(uow.as_mut(), id).await?,
            (EntityKind::Model, _) => remove::<ModelDBResponse>(uow.as_mut(), id).await?,
            (EntityKind::Deployment, _) => remove::<DeploymentDBResponse>(uow.as_mut(), id).await?,
            (EntityKind::Pricing, _) => remove::<PricingDBResponse>(uow.as_mut(), id).await?,
            (EntityKind::Subscription, _) => remove::<SubscriptionDBResponse>(uow.as_mut(), id).await?,
            (EntityKind::Limit, SubEntity::Primary) => remove::<LimitDBResponse>(uow.as_mut(), id).await?,
            (EntityKind::Limit, SubEntity::Usage) => remove::<LimitUsageDBResponse>(uow.as_mut(), id).await?,
        };
        uow.commit().await?;
        Ok(deleted)
    }
}

async fn insert<E: Stored>(uow: &mut dyn UnitOfWork, request: &E::Create) -> DbResult<EntityId> {
    let row = E::repository(uow).create(request).await?;
    Ok(row.id().to_string())
}

async fn patch_row<E: Stored>(uow: &mut dyn UnitOfWork, id: &str, patch: &E::Update) -> DbResult<Option<EntityId>> {
    match E::repository(uow).update(id.to_string(), patch).await {
        Ok(row) => Ok(Some(row.id().to_string())),
        Err(DbError::NotFound) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Promoting a deployment to default demotes the model's other deployments in the same unit
/// of work.
async fn patch_deployment(
    uow: &mut dyn UnitOfWork,
    id: &str,
    patch: &DeploymentUpdateDBRequest,
) -> DbResult<Option<EntityId>> {
    if patch.is_default == Some(true) {
        let model_id = match &patch.model_id {
            Some(model_id) => model_id.clone(),
            None => match uow.deployments().get_by_id(id.to_string()).await? {
                Some(existing) => existing.model_id,
                None => return Ok(None),
            },
        };
        claim_default(uow, &model_id, Some(id)).await?;
    }
    patch_row::<DeploymentDBResponse>(uow, id, patch).await
}

async fn remove<E: Stored>(uow: &mut dyn UnitOfWork, id: &str) -> DbResult<bool> {
    E::repository(uow).delete(id.to_string()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::db::in_memory::InMemoryStore;
    use crate::outcomes::MemoryOutcomeLog;

    struct Harness {
        store: InMemoryStore,
        cache: Arc<MemoryCache>,
        outcomes: MemoryOutcomeLog,
        ingestor: EventIngestor,
    }

    fn harness() -> Harness {
        let store = InMemoryStore::new();
        let cache = Arc::new(MemoryCache::default());
        let outcomes = MemoryOutcomeLog::new();
        let ingestor = EventIngestor::new(
            Arc::new(store.clone()),
            cache.clone(),
            Arc::new(outcomes.clone()),
            Duration::from_secs(3600),
        );
        Harness {
            store,
            cache,
            outcomes,
            ingestor,
        }
    }

    fn event(event_id: &str, action: &str, entity_type: &str, entity_id: &str, payload: Value) -> CudEvent {
        let Value::Object(payload) = payload else {
            panic!("payload must be an object");
        };
        CudEvent {
            event_id: event_id.to_string(),
            event_type: action.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            timestamp: Utc::now(),
            version: Some("1.0".to_string()),
            payload,
        }
    }

    fn project_created(event_id: &str) -> CudEvent {
        event(
            event_id,
            "CREATED",
            "project",
            "proj-001",
            json!({"project_name": "Credit AI", "project_code": "CREDIT_AI"}),
        )
    }

    #[test_log::test(tokio::test)]
    async fn test_create_event_inserts_row_with_event_entity_id() {
        let h = harness();

        let outcome = h.ingestor.process(&project_created("evt-1")).await;
        assert_eq!(outcome.status, EventStatus::Created);
        assert_eq!(outcome.entity_id.as_deref(), Some("proj-001"));

        let rows = h.store.rows::<ProjectDBResponse>();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "proj-001");

        let marker = h.cache.get(&cache::processed_event_key("evt-1")).await.unwrap().unwrap();
        assert_eq!(marker["result"]["status"], "created");

        let published = h.outcomes.records(EVENT_PROCESSED_STREAM);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].status, "success");
        assert_eq!(published[0].event_type, "CREATED");
        assert_eq!(published[0].entity_type, Some(EntityKind::Project));
        assert_eq!(published[0].source, OUTCOME_SOURCE);
    }

    #[tokio::test]
    async fn test_redelivered_event_is_not_applied_twice() {
        let h = harness();
        h.ingestor.process(&project_created("evt-1")).await;

        let mut redelivery = project_created("evt-1");
        redelivery.payload.insert("project_name".to_string(), json!("Renamed"));
        let outcome = h.ingestor.process(&redelivery).await;

        assert_eq!(outcome.status, EventStatus::AlreadyProcessed);
        let rows = h.store.rows::<ProjectDBResponse>();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].project_name, "Credit AI");
        assert_eq!(h.outcomes.records(EVENT_PROCESSED_STREAM).len(), 1);
    }

    #[tokio::test]
    async fn test_update_event_is_partial_and_missing_rows_are_not_found() {
        let h = harness();
        h.ingestor.process(&project_created("evt-1")).await;

        let outcome = h
            .ingestor
            .process(&event("evt-2", "UPDATE", "project", "proj-001", json!({"is_active": false})))
            .await;
        assert_eq!(outcome.status, EventStatus::Updated);
        let row = &h.store.rows::<ProjectDBResponse>()[0];
        assert!(!row.is_active);
        assert_eq!(row.project_code, "CREDIT_AI");

        let outcome = h
            .ingestor
            .process(&event("evt-3", "UPDATE", "project", "missing", json!({"is_active": true})))
            .await;
        assert_eq!(outcome.status, EventStatus::NotFound);
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn test_delete_event_cascades_and_reports_missing_rows() {
        let h = harness();
        h.ingestor.process(&project_created("evt-1")).await;
        h.ingestor
            .process(&event(
                "evt-2",
                "CREATE",
                "usecase",
                "uc-001",
                json!({"project_id": "proj-001", "use_case_name": "scoring"}),
            ))
            .await;
        assert_eq!(h.store.rows::<UseCaseDBResponse>().len(), 1);

        let outcome = h.ingestor.process(&event("evt-3", "DELETE", "project", "proj-001", json!({}))).await;
        assert_eq!(outcome.status, EventStatus::Deleted);
        assert!(h.store.rows::<UseCaseDBResponse>().is_empty());

        let outcome = h.ingestor.process(&event("evt-4", "DELETE", "project", "proj-001", json!({}))).await;
        assert_eq!(outcome.status, EventStatus::NotFound);
    }

    #[tokio::test]
    async fn test_budget_usage_events_use_the_type_discriminator() {
        let h = harness();
        h.ingestor.process(&project_created("evt-1")).await;
        h.ingestor
            .process(&event(
                "evt-2",
                "CREATE",
                "use_case",
                "uc-001",
                json!({"project_id": "proj-001", "use_case_name": "scoring"}),
            ))
            .await;

        let outcome = h
            .ingestor
            .process(&event(
                "evt-3",
                "CREATE",
                "budget",
                "bu-001",
                json!({"type": "usage", "use_case_id": "uc-001", "usage_period": "2025-07-01", "scope": "monthly", "used_cents": 250}),
            ))
            .await;
        assert_eq!(outcome.status, EventStatus::Created);
        assert_eq!(h.store.rows::<BudgetUsageDBResponse>().len(), 1);
        assert!(h.store.rows::<BudgetDBResponse>().is_empty());

        let outcome = h
            .ingestor
            .process(&event("evt-4", "DELETE", "budget", "bu-001", json!({"type": "usage"})))
            .await;
        assert_eq!(outcome.status, EventStatus::Deleted);
        assert!(h.store.rows::<BudgetUsageDBResponse>().is_empty());
    }

    #[tokio::test]
    async fn test_promoting_a_deployment_demotes_the_previous_default() {
        let h = harness();
        h.ingestor
            .process(&event("evt-1", "CREATE", "model", "m-1", json!({"model_name": "gpt-4o", "model_type": "chat"})))
            .await;
        for (n, name) in ["east", "west"].iter().enumerate() {
            let outcome = h
                .ingestor
                .process(&event(
                    &format!("evt-dep-{n}"),
                    "CREATE",
                    "deployment",
                    &format!("d-{name}"),
                    json!({"model_id": "m-1", "deployment_name": name, "endpoint": "https://example.invalid", "is_default": n == 0}),
                ))
                .await;
            assert_eq!(outcome.status, EventStatus::Created);
        }

        let outcome = h
            .ingestor
            .process(&event("evt-2", "UPDATE", "deployment", "d-west", json!({"is_default": true})))
            .await;
        assert_eq!(outcome.status, EventStatus::Updated);

        let defaults: Vec<_> = h
            .store
            .rows::<DeploymentDBResponse>()
            .into_iter()
            .filter(|d| d.is_default)
            .map(|d| d.id)
            .collect();
        assert_eq!(defaults, vec!["d-west".to_string()]);
    }

    #[test_log::test(tokio::test)]
    async fn test_unsupported_entity_type_fails_without_dedup_marker() {
        let h = harness();

        let outcome = h.ingestor.process(&event("evt-1", "CREATE", "widget", "w-1", json!({}))).await;
        assert_eq!(outcome.status, EventStatus::Failed);
        assert_eq!(outcome.error.as_deref(), Some("unsupported entity type: widget"));

        let published = h.outcomes.records(EVENT_PROCESSED_STREAM);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].status, "failed");
        assert_eq!(published[0].entity_type, None);

        // Not remembered, so a redelivery is processed (and fails) again.
        assert!(h.cache.get(&cache::processed_event_key("evt-1")).await.unwrap().is_none());
        let again = h.ingestor.process(&event("evt-1", "CREATE", "widget", "w-1", json!({}))).await;
        assert_eq!(again.status, EventStatus::Failed);
    }

    #[tokio::test]
    async fn test_unsupported_action_fails() {
        let h = harness();
        let outcome = h.ingestor.process(&event("evt-1", "UPSERT", "project", "proj-001", json!({}))).await;
        assert_eq!(outcome.status, EventStatus::Failed);
        assert_eq!(outcome.error.as_deref(), Some("unsupported action: UPSERT"));
    }

    #[tokio::test]
    async fn test_storage_failure_is_reported_as_failed_event() {
        let h = harness();
        let outcome = h
            .ingestor
            .process(&event(
                "evt-1",
                "CREATE",
                "usecase",
                "uc-001",
                json!({"project_id": "nope", "use_case_name": "orphan"}),
            ))
            .await;
        assert_eq!(outcome.status, EventStatus::Failed);
        assert!(outcome.error.unwrap().contains("Foreign key"));
        assert!(h.store.rows::<UseCaseDBResponse>().is_empty());
    }
}
