//! One end-to-end sync cycle.
//!
//! ```text
//! Idle ──▶ Fetching ──▶ Reconciling ──▶ Reporting ──▶ Idle
//!             │              │
//!             └──────────────┴──▶ Failed ──▶ Idle
//! ```
//!
//! A fetch failure fails the cycle before any storage write. Record failures never do;
//! they are counted in the report. Cancellation stops record processing and fails the cycle,
//! leaving already-applied records in place. Failed cycles never block the next one.
//!
//! Cycles may overlap (an inline `POST /sync/all` next to a worker cycle). The reported
//! state is the phase of the most recently started cycle still in flight, and `Idle` only
//! once none is left.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;

use super::reconciler::Reconciler;
use super::report::{SyncReport, SyncType};
use super::upstream::FetchSnapshot;
use crate::cache::{self, Cache};
use crate::outcomes::{self, OUTCOME_SOURCE, OutcomePublisher, OutcomeRecord, SYNC_EVENTS_STREAM};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Fetching,
    Reconciling,
    Reporting,
    Failed,
}

/// A cycle that did not complete
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SyncFailure {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub sync_type: SyncType,
    pub updated_since: Option<DateTime<Utc>>,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    Failed(SyncFailure),
}

impl SyncOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SyncOutcome::Completed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SyncStatus {
    pub state: SyncState,
    /// Number of cycles currently running in this process
    pub active_cycles: usize,
    pub last_report: Option<SyncReport>,
    pub last_failure: Option<SyncFailure>,
    /// Start time of the most recent completed cycle, the `since` of the next incremental one
    pub last_success_started_at: Option<DateTime<Utc>>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            state: SyncState::Idle,
            active_cycles: 0,
            last_report: None,
            last_failure: None,
            last_success_started_at: None,
        }
    }
}

pub struct SyncOrchestrator {
    upstream: Arc<dyn FetchSnapshot>,
    reconciler: Reconciler,
    cache: Arc<dyn Cache>,
    publisher: Arc<dyn OutcomePublisher>,
    report_ttl: Duration,
    status: ArcSwap<SyncStatus>,
    /// Phase of each in-flight cycle, keyed by start order
    cycles: Mutex<BTreeMap<u64, SyncState>>,
    next_cycle: AtomicU64,
}

impl SyncOrchestrator {
    pub fn new(
        upstream: Arc<dyn FetchSnapshot>,
        reconciler: Reconciler,
        cache: Arc<dyn Cache>,
        publisher: Arc<dyn OutcomePublisher>,
        report_ttl: Duration,
    ) -> Self {
        Self {
            upstream,
            reconciler,
            cache,
            publisher,
            report_ttl,
            status: ArcSwap::from_pointee(SyncStatus::default()),
            cycles: Mutex::new(BTreeMap::new()),
            next_cycle: AtomicU64::new(0),
        }
    }

    /// Start time of the most recent cycle this process completed
    pub fn last_success_started_at(&self) -> Option<DateTime<Utc>> {
        self.status.load().last_success_started_at
    }

    pub fn upstream(&self) -> &Arc<dyn FetchSnapshot> {
        &self.upstream
    }

    fn update_status(&self, f: impl Fn(&mut SyncStatus)) {
        self.status.rcu(|current| {
            let mut next = SyncStatus::clone(current);
            f(&mut next);
            next
        });
    }

    /// Move `cycle` to `phase`, or retire it with `None`, and republish the state
    fn set_phase(&self, cycle: u64, phase: Option<SyncState>) {
        let mut cycles = self.cycles.lock();
        match phase {
            Some(phase) => {
                cycles.insert(cycle, phase);
            }
            None => {
                cycles.remove(&cycle);
            }
        }
        let state = cycles.values().next_back().copied().unwrap_or(SyncState::Idle);
        let active_cycles = cycles.len();
        self.update_status(|status| {
            status.state = state;
            status.active_cycles = active_cycles;
        });
    }

    /// Status of the most recent cycle. When this process has not completed one yet, the
    /// report persisted under `sync:latest` (possibly by another replica) is used.
    pub async fn status(&self) -> SyncStatus {
        let mut status = SyncStatus::clone(&self.status.load());
        if status.last_report.is_none() {
            if let Some(value) = cache::lookup(self.cache.as_ref(), cache::SYNC_LATEST_KEY).await {
                match serde_json::from_value::<SyncReport>(value) {
                    Ok(report) => status.last_report = Some(report),
                    Err(e) => warn!(error = %e, "Ignoring unreadable persisted sync report"),
                }
            }
        }
        status
    }

    /// Run one cycle. `since = None` is a full sync.
    #[instrument(skip(self, cancel), fields(sync_type = %SyncType::for_since(since)))]
    pub async fn run_cycle(&self, since: Option<DateTime<Utc>>, cancel: &CancellationToken) -> SyncOutcome {
        let start_time = Utc::now();
        let sync_type = SyncType::for_since(since);
        let failure = |error: String| SyncFailure {
            start_time,
            end_time: Utc::now(),
            sync_type,
            updated_since: since,
            error,
        };

        let cycle = self.next_cycle.fetch_add(1, Ordering::Relaxed);
        info!(updated_since = ?since, "Starting sync cycle");
        self.set_phase(cycle, Some(SyncState::Fetching));
        let fetched = tokio::select! {
            result = self.upstream.fetch(since) => result.map_err(|e| e.to_string()),
            _ = cancel.cancelled() => Err(super::Cancelled.to_string()),
        };
        let snapshot = match fetched {
            Ok(snapshot) => snapshot,
            Err(e) => return self.fail(cycle, failure(e)).await,
        };

        self.set_phase(cycle, Some(SyncState::Reconciling));
        let details = match self.reconciler.reconcile_snapshot(&snapshot, cancel).await {
            Ok(details) => details,
            Err(cancelled) => return self.fail(cycle, failure(cancelled.to_string())).await,
        };

        self.set_phase(cycle, Some(SyncState::Reporting));
        let end_time = Utc::now();
        let report = SyncReport {
            start_time,
            end_time,
            duration_seconds: (end_time - start_time).num_milliseconds() as f64 / 1000.0,
            sync_type,
            updated_since: since,
            totals: details.totals(),
            details,
        };
        self.complete(cycle, &report).await;
        SyncOutcome::Completed(report)
    }

    async fn complete(&self, cycle: u64, report: &SyncReport) {
        match serde_json::to_value(report) {
            Ok(value) => {
                cache::store(
                    self.cache.as_ref(),
                    &cache::sync_result_key(report.start_time),
                    value.clone(),
                    self.report_ttl,
                )
                .await;
                cache::store(self.cache.as_ref(), cache::SYNC_LATEST_KEY, value, self.report_ttl).await;
            }
            Err(e) => warn!(error = %e, "Failed to serialize sync report"),
        }

        outcomes::publish(
            self.publisher.as_ref(),
            SYNC_EVENTS_STREAM,
            OutcomeRecord {
                event_type: "sync_completed".to_string(),
                entity_type: None,
                entity_id: None,
                event_id: None,
                status: "completed".to_string(),
                error: None,
                processing_time: report.duration_seconds,
                sync_type: Some(report.sync_type.to_string()),
                totals: serde_json::to_value(report.totals).ok(),
                timestamp: report.end_time,
                source: OUTCOME_SOURCE.to_string(),
            },
        )
        .await;

        counter!("mgsync_sync_cycles_total", "status" => "completed").increment(1);
        histogram!("mgsync_sync_cycle_duration_seconds").record(report.duration_seconds);
        info!(
            duration_seconds = report.duration_seconds,
            created = report.totals.created,
            updated = report.totals.updated,
            errors = report.totals.errors,
            "Sync cycle completed"
        );

        let report = report.clone();
        self.update_status(move |status| {
            status.last_success_started_at = Some(report.start_time);
            status.last_report = Some(report.clone());
        });
        self.set_phase(cycle, None);
    }

    async fn fail(&self, cycle: u64, failure: SyncFailure) -> SyncOutcome {
        error!(error = %failure.error, "Sync cycle failed");
        let failed = failure.clone();
        self.update_status(move |status| status.last_failure = Some(failed.clone()));
        self.set_phase(cycle, Some(SyncState::Failed));

        let processing_time = (failure.end_time - failure.start_time).num_milliseconds() as f64 / 1000.0;
        outcomes::publish(
            self.publisher.as_ref(),
            SYNC_EVENTS_STREAM,
            OutcomeRecord {
                event_type: "sync_failed".to_string(),
                entity_type: None,
                entity_id: None,
                event_id: None,
                status: "failed".to_string(),
                error: Some(failure.error.clone()),
                processing_time,
                sync_type: Some(failure.sync_type.to_string()),
                totals: None,
                timestamp: failure.end_time,
                source: OUTCOME_SOURCE.to_string(),
            },
        )
        .await;
        counter!("mgsync_sync_cycles_total", "status" => "failed").increment(1);

        self.set_phase(cycle, None);
        SyncOutcome::Failed(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::db::in_memory::InMemoryStore;
    use crate::db::models::projects::ProjectDBResponse;
    use crate::outcomes::MemoryOutcomeLog;
    use crate::sync::report::Totals;
    use crate::sync::upstream::{FetchError, Snapshot, StaticSnapshot};
    use async_trait::async_trait;
    use serde_json::json;

    struct Unreachable;

    #[async_trait]
    impl FetchSnapshot for Unreachable {
        async fn fetch(&self, _since: Option<DateTime<Utc>>) -> Result<Snapshot, FetchError> {
            Err(FetchError::Decode(serde_json::from_str::<Snapshot>("{").unwrap_err()))
        }

        async fn health_check(&self) -> bool {
            false
        }
    }

    struct Harness {
        store: InMemoryStore,
        cache: Arc<MemoryCache>,
        outcomes: MemoryOutcomeLog,
        orchestrator: SyncOrchestrator,
    }

    fn harness(upstream: Arc<dyn FetchSnapshot>) -> Harness {
        let store = InMemoryStore::new();
        let cache = Arc::new(MemoryCache::default());
        let outcomes = MemoryOutcomeLog::new();
        let orchestrator = SyncOrchestrator::new(
            upstream,
            Reconciler::new(Arc::new(store.clone())),
            cache.clone(),
            Arc::new(outcomes.clone()),
            Duration::from_secs(3600),
        );
        Harness {
            store,
            cache,
            outcomes,
            orchestrator,
        }
    }

    fn fixture() -> Arc<dyn FetchSnapshot> {
        let snapshot = serde_json::from_value(json!({
            "projects": [{"id": "p1", "project_name": "Alpha", "project_code": "PRJ-1"}],
            "use_cases": [{"id": "uc1", "project_id": "p1", "use_case_name": "chatbot"}]
        }))
        .unwrap();
        Arc::new(StaticSnapshot::new(snapshot))
    }

    #[test_log::test(tokio::test)]
    async fn test_cycle_reports_and_publishes() {
        let h = harness(fixture());
        let cancel = CancellationToken::new();

        let SyncOutcome::Completed(first) = h.orchestrator.run_cycle(None, &cancel).await else {
            panic!("first cycle failed");
        };
        assert_eq!(
            first.totals,
            Totals {
                created: 2,
                updated: 0,
                errors: 0
            }
        );
        assert_eq!(first.sync_type, SyncType::Full);

        let SyncOutcome::Completed(second) = h.orchestrator.run_cycle(None, &cancel).await else {
            panic!("second cycle failed");
        };
        assert_eq!(
            second.totals,
            Totals {
                created: 0,
                updated: 2,
                errors: 0
            }
        );

        let latest = h.cache.get(cache::SYNC_LATEST_KEY).await.unwrap().unwrap();
        assert_eq!(latest["totals"]["updated"], 2);
        let persisted = h.cache.get(&cache::sync_result_key(first.start_time)).await.unwrap();
        assert!(persisted.is_some());

        let published = h.outcomes.records(SYNC_EVENTS_STREAM);
        assert_eq!(published.len(), 2);
        assert!(published.iter().all(|r| r.event_type == "sync_completed"));
        assert_eq!(published[0].sync_type.as_deref(), Some("full"));

        let status = h.orchestrator.status().await;
        assert_eq!(status.state, SyncState::Idle);
        assert_eq!(status.last_report, Some(second.clone()));
        assert_eq!(status.last_success_started_at, Some(second.start_time));
    }

    #[tokio::test]
    async fn test_fetch_failure_fails_cycle_without_writes() {
        let h = harness(Arc::new(Unreachable));
        let outcome = h
            .orchestrator
            .run_cycle(Some(Utc::now()), &CancellationToken::new())
            .await;

        let SyncOutcome::Failed(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.sync_type, SyncType::Incremental);
        assert!(h.store.rows::<ProjectDBResponse>().is_empty());

        let published = h.outcomes.records(SYNC_EVENTS_STREAM);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].event_type, "sync_failed");
        assert!(published[0].error.is_some());

        let status = h.orchestrator.status().await;
        assert_eq!(status.state, SyncState::Idle);
        assert!(status.last_failure.is_some());
        assert!(status.last_success_started_at.is_none());
    }

    /// Holds the first fetch until released; later fetches return at once
    #[derive(Default)]
    struct Gated {
        calls: std::sync::atomic::AtomicUsize,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl FetchSnapshot for Gated {
        async fn fetch(&self, _since: Option<DateTime<Utc>>) -> Result<Snapshot, FetchError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.release.notified().await;
            }
            Ok(Snapshot::default())
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_overlapping_cycles_stay_busy_until_both_finish() {
        let upstream = Arc::new(Gated::default());
        let h = harness(upstream.clone());
        let cancel = CancellationToken::new();

        let (slow, fast) = tokio::join!(h.orchestrator.run_cycle(None, &cancel), async {
            let outcome = h.orchestrator.run_cycle(None, &cancel).await;
            let status = h.orchestrator.status().await;
            assert_eq!(status.state, SyncState::Fetching);
            assert_eq!(status.active_cycles, 1);
            upstream.release.notify_one();
            outcome
        });
        assert!(slow.is_completed());
        assert!(fast.is_completed());

        let status = h.orchestrator.status().await;
        assert_eq!(status.state, SyncState::Idle);
        assert_eq!(status.active_cycles, 0);
    }

    #[tokio::test]
    async fn test_cancelled_cycle_fails() {
        let h = harness(fixture());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = h.orchestrator.run_cycle(None, &cancel).await;
        assert!(!outcome.is_completed());
        assert_eq!(h.outcomes.records(SYNC_EVENTS_STREAM)[0].event_type, "sync_failed");
    }

    #[tokio::test]
    async fn test_status_falls_back_to_persisted_report() {
        let h = harness(fixture());
        h.orchestrator.run_cycle(None, &CancellationToken::new()).await;

        let other = SyncOrchestrator::new(
            fixture(),
            Reconciler::new(Arc::new(h.store.clone())),
            h.cache.clone(),
            Arc::new(MemoryOutcomeLog::new()),
            Duration::from_secs(3600),
        );
        let status = other.status().await;
        assert_eq!(status.last_report.map(|r| r.totals.created), Some(2));
        assert!(status.last_success_started_at.is_none());
    }
}
