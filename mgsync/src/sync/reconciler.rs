//! Create-or-update of entity records by natural key.
//!
//! Each record runs in its own unit of work: look the natural key up, falling back to the
//! record's own id when it carries one. Insert when both miss, otherwise overwrite every
//! mutable column (never the id or `created_time`) and commit.
//! Applying the same record twice therefore creates once and updates afterwards.
//!
//! Two writers racing on the same new key both miss the lookup; the loser's insert fails
//! with a unique violation and is retried once in a fresh unit of work, where the lookup
//! now finds the winner's row.
//!
//! Deployments marked default first take the model's default lock, then clear the flag on
//! the model's other deployments, then upsert, all in one unit of work.

use std::sync::Arc;

use metrics::counter;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::records::{EntityRecord, SubEntity, sub_entity};
use super::report::{CollectionReport, SyncDetails};
use super::upstream::Snapshot;
use super::{Cancelled, RecordError};
use crate::db::{
    errors::Result as DbResult,
    handlers::EntityRepository,
    models::{
        budgets::{BudgetDBResponse, BudgetUsageDBResponse},
        deployments::{DeploymentCreateDBRequest, DeploymentDBResponse},
        limits::{LimitDBResponse, LimitUsageDBResponse},
        llm_models::ModelDBResponse,
        pricing::PricingDBResponse,
        projects::ProjectDBResponse,
        subscriptions::SubscriptionDBResponse,
        use_cases::UseCaseDBResponse,
    },
    store::{Store, Stored, UnitOfWork},
};
use crate::types::{EntityId, EntityKind, abbrev_id};

/// What an upsert did, with the id of the affected row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created(EntityId),
    Updated(EntityId),
}

impl UpsertOutcome {
    pub fn id(&self) -> &str {
        match self {
            UpsertOutcome::Created(id) | UpsertOutcome::Updated(id) => id,
        }
    }
}

/// The stored row a record targets: the row with its natural key, else the row with its own
/// id. Upstream may change a natural-key field while keeping the id.
async fn find_existing<E: Stored>(repo: &mut EntityRepository<'_, E>, request: &E::Create) -> DbResult<Option<E>> {
    if let Some(row) = repo.find_by_natural_key(&E::key_of(request)).await? {
        return Ok(Some(row));
    }
    match E::requested_id(request) {
        Some(id) => repo.get_by_id(id.to_string()).await,
        None => Ok(None),
    }
}

/// Upsert within an open unit of work
pub(crate) async fn upsert_in<E: Stored>(uow: &mut dyn UnitOfWork, request: &E::Create) -> DbResult<UpsertOutcome> {
    let mut repo = E::repository(uow);
    match find_existing::<E>(&mut repo, request).await? {
        Some(existing) => {
            let row = repo.update(existing.id().to_string(), &E::overwrite_with(request)).await?;
            Ok(UpsertOutcome::Updated(row.id().to_string()))
        }
        None => {
            let row = repo.create(request).await?;
            Ok(UpsertOutcome::Created(row.id().to_string()))
        }
    }
}

/// Serialize default flips for `model_id` and clear the flag on its deployments other than
/// `keep`. Must run in the same unit of work as the write that sets the new default.
pub(crate) async fn claim_default(uow: &mut dyn UnitOfWork, model_id: &str, keep: Option<&str>) -> DbResult<()> {
    uow.lock_default_deployments(model_id).await?;
    let cleared = uow.clear_default_deployments(model_id, keep).await?;
    if cleared > 0 {
        debug!(model_id = %abbrev_id(model_id), cleared, "Cleared previous default deployment");
    }
    Ok(())
}

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn Store>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Apply one record
    #[instrument(skip_all, fields(kind = %record.kind()), err)]
    pub async fn apply(&self, record: &EntityRecord) -> Result<UpsertOutcome, RecordError> {
        let outcome = match record {
            EntityRecord::Project(r) => self.upsert::<ProjectDBResponse>(r).await,
            EntityRecord::UseCase(r) => self.upsert::<UseCaseDBResponse>(r).await,
            EntityRecord::Budget(r) => self.upsert::<BudgetDBResponse>(r).await,
            EntityRecord::BudgetUsage(r) => self.upsert::<BudgetUsageDBResponse>(r).await,
            EntityRecord::Model(r) => self.upsert::<ModelDBResponse>(r).await,
            EntityRecord::Deployment(r) => self.upsert_deployment(r).await,
            EntityRecord::Pricing(r) => self.upsert::<PricingDBResponse>(r).await,
            EntityRecord::Subscription(r) => self.upsert::<SubscriptionDBResponse>(r).await,
            EntityRecord::Limit(r) => self.upsert::<LimitDBResponse>(r).await,
            EntityRecord::LimitUsage(r) => self.upsert::<LimitUsageDBResponse>(r).await,
        }?;
        Ok(outcome)
    }

    async fn upsert<E: Stored>(&self, request: &E::Create) -> DbResult<UpsertOutcome> {
        match self.try_upsert::<E>(request).await {
            Err(e) if e.is_unique_violation() => {
                debug!(table = E::TABLE, error = %e, "Natural key claimed concurrently, retrying as update");
                self.try_upsert::<E>(request).await
            }
            other => other,
        }
    }

    async fn try_upsert<E: Stored>(&self, request: &E::Create) -> DbResult<UpsertOutcome> {
        let mut uow = self.store.begin().await?;
        let outcome = upsert_in::<E>(uow.as_mut(), request).await?;
        uow.commit().await?;
        Ok(outcome)
    }

    async fn upsert_deployment(&self, request: &DeploymentCreateDBRequest) -> DbResult<UpsertOutcome> {
        if !request.is_default {
            return self.upsert::<DeploymentDBResponse>(request).await;
        }
        match self.try_upsert_default(request).await {
            Err(e) if e.is_unique_violation() => {
                debug!(error = %e, "Deployment claimed concurrently, retrying as update");
                self.try_upsert_default(request).await
            }
            other => other,
        }
    }

    async fn try_upsert_default(&self, request: &DeploymentCreateDBRequest) -> DbResult<UpsertOutcome> {
        let mut uow = self.store.begin().await?;
        let existing = find_existing::<DeploymentDBResponse>(&mut uow.deployments(), request).await?;
        claim_default(uow.as_mut(), &request.model_id, existing.as_ref().map(|d| d.id.as_str())).await?;
        let outcome = upsert_in::<DeploymentDBResponse>(uow.as_mut(), request).await?;
        uow.commit().await?;
        Ok(outcome)
    }

    /// Reconcile one collection. Every record is applied independently; failures are counted
    /// and logged, never propagated. Budgets and limits apply their primary records before
    /// usage records, each group in snapshot order.
    #[instrument(skip(self, records, cancel), fields(records = records.len()))]
    pub async fn reconcile_collection(
        &self,
        kind: EntityKind,
        records: &[Value],
        cancel: &CancellationToken,
    ) -> Result<CollectionReport, Cancelled> {
        let mut report = CollectionReport::received(records);

        let mut ordered: Vec<(SubEntity, usize, &Value)> = Vec::with_capacity(records.len());
        for (index, raw) in records.iter().enumerate() {
            match sub_entity(kind, raw) {
                Ok(sub) => ordered.push((sub, index, raw)),
                Err(e) => {
                    report.errors += 1;
                    warn!(collection = kind.report_key(), index, error = %e, "Skipping record");
                }
            }
        }
        // Stable, so snapshot order is kept within each group.
        ordered.sort_by_key(|(sub, _, _)| *sub);

        for (_, index, raw) in ordered {
            if cancel.is_cancelled() {
                return Err(Cancelled);
            }
            let result = match EntityRecord::parse(kind, raw) {
                Ok(record) => self.apply(&record).await,
                Err(e) => Err(e),
            };
            let outcome = match result {
                Ok(UpsertOutcome::Created(id)) => {
                    report.created += 1;
                    debug!(collection = kind.report_key(), id = %abbrev_id(&id), "Created");
                    "created"
                }
                Ok(UpsertOutcome::Updated(id)) => {
                    report.updated += 1;
                    debug!(collection = kind.report_key(), id = %abbrev_id(&id), "Updated");
                    "updated"
                }
                Err(e) => {
                    report.errors += 1;
                    warn!(collection = kind.report_key(), index, error = %e, "Failed to reconcile record");
                    "error"
                }
            };
            counter!("mgsync_records_reconciled_total", "collection" => kind.report_key(), "outcome" => outcome).increment(1);
        }

        Ok(report)
    }

    /// Reconcile every collection of a snapshot, parents before children
    pub async fn reconcile_snapshot(&self, snapshot: &Snapshot, cancel: &CancellationToken) -> Result<SyncDetails, Cancelled> {
        let mut details = SyncDetails::default();
        for kind in EntityKind::SYNC_ORDER {
            *details.get_mut(kind) = self.reconcile_collection(kind, snapshot.collection(kind), cancel).await?;
        }
        Ok(details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::in_memory::InMemoryStore;
    use crate::sync::report::Totals;
    use serde_json::json;

    fn reconciler() -> (InMemoryStore, Reconciler) {
        let store = InMemoryStore::new();
        (store.clone(), Reconciler::new(Arc::new(store)))
    }

    fn fixture() -> Snapshot {
        serde_json::from_value(json!({
            "projects": [{"id": "p1", "project_name": "Alpha", "project_code": "PRJ-1"}],
            "use_cases": [{"id": "uc1", "project_id": "p1", "use_case_name": "chatbot"}]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_applying_a_snapshot_twice_creates_then_updates() {
        let (store, reconciler) = reconciler();
        let cancel = CancellationToken::new();

        let first = reconciler.reconcile_snapshot(&fixture(), &cancel).await.unwrap();
        assert_eq!(
            first.totals(),
            Totals {
                created: 2,
                updated: 0,
                errors: 0
            }
        );

        let second = reconciler.reconcile_snapshot(&fixture(), &cancel).await.unwrap();
        assert_eq!(
            second.totals(),
            Totals {
                created: 0,
                updated: 2,
                errors: 0
            }
        );
        assert_eq!(store.rows::<ProjectDBResponse>().len(), 1);
        assert_eq!(store.rows::<UseCaseDBResponse>().len(), 1);
    }

    #[tokio::test]
    async fn test_renamed_key_with_same_id_updates_in_place() {
        let (store, reconciler) = reconciler();
        let cancel = CancellationToken::new();
        reconciler.reconcile_snapshot(&fixture(), &cancel).await.unwrap();

        let renamed = [json!({"id": "uc1", "project_id": "p1", "use_case_name": "assistant"})];
        for _ in 0..2 {
            let report = reconciler
                .reconcile_collection(EntityKind::UseCase, &renamed, &cancel)
                .await
                .unwrap();
            assert_eq!((report.created, report.updated, report.errors), (0, 1, 0));
        }

        let rows: Vec<(String, String)> = store
            .rows::<UseCaseDBResponse>()
            .into_iter()
            .map(|uc| (uc.id, uc.use_case_name))
            .collect();
        assert_eq!(rows, vec![("uc1".to_string(), "assistant".to_string())]);

        let recoded = [json!({"id": "p1", "project_name": "Alpha", "project_code": "PRJ-2"})];
        let report = reconciler
            .reconcile_collection(EntityKind::Project, &recoded, &cancel)
            .await
            .unwrap();
        assert_eq!(report.updated, 1);
        let projects = store.rows::<ProjectDBResponse>();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].project_code, "PRJ-2");
    }

    #[tokio::test]
    async fn test_bad_record_does_not_abort_the_batch() {
        let (store, reconciler) = reconciler();
        let cancel = CancellationToken::new();
        reconciler
            .reconcile_collection(
                EntityKind::Project,
                &[json!({"id": "p1", "project_name": "Alpha", "project_code": "PRJ-1"})],
                &cancel,
            )
            .await
            .unwrap();

        let records: Vec<Value> = (1..=10)
            .map(|i| {
                let project_id = if i == 5 { "missing" } else { "p1" };
                json!({"project_id": project_id, "use_case_name": format!("uc-{i}")})
            })
            .collect();
        let report = reconciler
            .reconcile_collection(EntityKind::UseCase, &records, &cancel)
            .await
            .unwrap();

        assert_eq!(report.errors, 1);
        assert_eq!(report.created + report.updated, 9);
        let names: Vec<String> = store
            .rows::<UseCaseDBResponse>()
            .into_iter()
            .map(|uc| uc.use_case_name)
            .collect();
        assert_eq!(names.len(), 9);
        assert!(!names.contains(&"uc-5".to_string()));
    }

    #[tokio::test]
    async fn test_children_before_parents_fail() {
        let (_store, reconciler) = reconciler();
        let cancel = CancellationToken::new();
        let snapshot = fixture();

        let use_cases = reconciler
            .reconcile_collection(EntityKind::UseCase, &snapshot.use_cases, &cancel)
            .await
            .unwrap();
        assert_eq!(use_cases.errors, 1);

        let details = reconciler.reconcile_snapshot(&snapshot, &cancel).await.unwrap();
        assert_eq!(details.totals().errors, 0);
    }

    #[tokio::test]
    async fn test_budget_usage_with_same_key_updates() {
        let (store, reconciler) = reconciler();
        let cancel = CancellationToken::new();
        reconciler.reconcile_snapshot(&fixture(), &cancel).await.unwrap();

        let usage = |cents: i64| {
            json!({"type": "usage", "use_case_id": "uc1", "usage_period": "2025-07-01", "scope": "monthly", "used_cents": cents})
        };
        let report = reconciler
            .reconcile_collection(EntityKind::Budget, &[usage(100), usage(250)], &cancel)
            .await
            .unwrap();
        assert_eq!((report.created, report.updated, report.errors), (1, 1, 0));

        let rows = store.rows::<BudgetUsageDBResponse>();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].used_cents, 250);
    }

    #[tokio::test]
    async fn test_usage_records_apply_after_primary_records() {
        let (_store, reconciler) = reconciler();
        let cancel = CancellationToken::new();
        let snapshot: Snapshot = serde_json::from_value(json!({
            "projects": [{"id": "p1", "project_name": "Alpha", "project_code": "PRJ-1"}],
            "use_cases": [{"id": "uc1", "project_id": "p1", "use_case_name": "chatbot"}],
            "models": [{"id": "m1", "model_name": "gpt-4o", "model_type": "chat"}],
            "use_case_llm_models": [{"id": "s1", "project_id": "p1", "use_case_id": "uc1", "model_id": "m1"}],
            "limits": [
                {"type": "usage", "limit_id": "l1", "scope": "daily", "usage_period": "2025-07-01T00:00:00Z", "value": 5},
                {"type": "limit", "id": "l1", "subscription_id": "s1", "limit_type": "requests", "scope": "daily", "limit_value": 100},
                {"type": "quota", "subscription_id": "s1"}
            ]
        }))
        .unwrap();

        let details = reconciler.reconcile_snapshot(&snapshot, &cancel).await.unwrap();
        assert_eq!((details.limits.created, details.limits.errors), (2, 1));
        assert_eq!(details.limits.data.len(), 3);
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failures_are_logged_with_snapshot_index() {
        let (_store, reconciler) = reconciler();
        let cancel = CancellationToken::new();
        let parents: Snapshot = serde_json::from_value(json!({
            "projects": [{"id": "p1", "project_name": "Alpha", "project_code": "PRJ-1"}],
            "use_cases": [{"id": "uc1", "project_id": "p1", "use_case_name": "chatbot"}],
            "models": [{"id": "m1", "model_name": "gpt-4o", "model_type": "chat"}],
            "use_case_llm_models": [{"id": "s1", "project_id": "p1", "use_case_id": "uc1", "model_id": "m1"}]
        }))
        .unwrap();
        reconciler.reconcile_snapshot(&parents, &cancel).await.unwrap();

        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let records = [
            json!({"type": "usage", "limit_id": "missing", "scope": "daily", "usage_period": "2025-07-01", "value": 5}),
            json!({"type": "limit", "id": "l1", "subscription_id": "s1", "limit_type": "requests", "scope": "daily", "limit_value": 100}),
        ];
        let report = reconciler
            .reconcile_collection(EntityKind::Limit, &records, &cancel)
            .await
            .unwrap();
        assert_eq!((report.created, report.errors), (1, 1));

        let output = String::from_utf8(logs.0.lock().clone()).unwrap();
        let failure = output
            .lines()
            .find(|line| line.contains("Failed to reconcile record"))
            .unwrap();
        assert!(failure.contains("index=0"), "{failure}");
    }

    #[tokio::test]
    async fn test_default_deployment_stays_exclusive() {
        let (store, reconciler) = reconciler();
        let cancel = CancellationToken::new();
        let deployment = |name: &str, is_default: bool| {
            json!({"model_id": "m1", "deployment_name": name, "endpoint": format!("https://{name}.example.com"), "is_default": is_default})
        };
        let models = [json!({"id": "m1", "model_name": "gpt-4o", "model_type": "chat"})];
        reconciler
            .reconcile_collection(EntityKind::Model, &models, &cancel)
            .await
            .unwrap();

        for batch in [
            vec![deployment("east", true), deployment("west", false)],
            vec![deployment("west", true)],
            vec![deployment("north", true), deployment("east", false)],
            vec![deployment("west", true), deployment("west", true)],
        ] {
            let report = reconciler
                .reconcile_collection(EntityKind::Deployment, &batch, &cancel)
                .await
                .unwrap();
            assert_eq!(report.errors, 0);
            let defaults: Vec<String> = store
                .rows::<DeploymentDBResponse>()
                .into_iter()
                .filter(|d| d.is_default)
                .map(|d| d.deployment_name)
                .collect();
            assert_eq!(defaults.len(), 1, "defaults after batch: {defaults:?}");
        }
    }

    #[tokio::test]
    async fn test_cancellation_stops_before_next_record() {
        let (store, reconciler) = reconciler();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = reconciler.reconcile_snapshot(&fixture(), &cancel).await;
        assert!(result.is_err());
        assert!(store.rows::<ProjectDBResponse>().is_empty());
    }
}
