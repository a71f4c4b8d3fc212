//! Background worker running sync cycles.
//!
//! One task owns the schedule. Until shutdown it waits for the next scheduled tick or for a
//! manual trigger from the HTTP layer. Cycles run one at a time inside the worker, so a
//! scheduled cycle never overlaps another scheduled or queued cycle; `POST /sync/all` runs
//! its cycle inline and may overlap.
//!
//! Scheduled ticks only run a cycle while this replica holds leadership. Manual triggers
//! always run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::orchestrator::SyncOrchestrator;
use crate::cache::Cache;

/// Queued manual triggers beyond this are rejected
const TRIGGER_QUEUE_CAPACITY: usize = 16;

/// How soon a follower looks again, so a newly elected leader does not wait a full interval
const FOLLOWER_RECHECK: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Run scheduled cycles; manual triggers are served either way
    pub enabled: bool,
    pub interval: Duration,
    /// Scheduled cycles ask only for records changed since the last completed cycle started
    pub incremental: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerRequest {
    pub updated_since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TriggerError {
    #[error("too many sync cycles are already queued")]
    QueueFull,
    #[error("sync scheduler is not running")]
    Stopped,
}

/// Handle for queueing cycles on the background worker
#[derive(Clone)]
pub struct SyncTrigger {
    tx: mpsc::Sender<TriggerRequest>,
}

impl SyncTrigger {
    pub fn trigger(&self, updated_since: Option<DateTime<Utc>>) -> Result<(), TriggerError> {
        self.tx.try_send(TriggerRequest { updated_since }).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TriggerError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => TriggerError::Stopped,
        })
    }
}

pub struct SyncScheduler {
    orchestrator: Arc<SyncOrchestrator>,
    cache: Arc<dyn Cache>,
    settings: SchedulerSettings,
    is_leader: Arc<AtomicBool>,
    triggers: mpsc::Receiver<TriggerRequest>,
}

impl SyncScheduler {
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        cache: Arc<dyn Cache>,
        settings: SchedulerSettings,
        is_leader: Arc<AtomicBool>,
    ) -> (Self, SyncTrigger) {
        let (tx, triggers) = mpsc::channel(TRIGGER_QUEUE_CAPACITY);
        let scheduler = Self {
            orchestrator,
            cache,
            settings,
            is_leader,
            triggers,
        };
        (scheduler, SyncTrigger { tx })
    }

    /// Run until `shutdown` fires. Shutdown also cancels the cycle in flight.
    #[instrument(skip_all, fields(interval = ?self.settings.interval, incremental = self.settings.incremental))]
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(enabled = self.settings.enabled, "Sync scheduler started");
        // The first scheduled cycle runs straight away.
        let mut next_tick = Instant::now();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                Some(request) = self.triggers.recv() => {
                    info!(updated_since = ?request.updated_since, "Running triggered sync cycle");
                    self.orchestrator.run_cycle(request.updated_since, &shutdown).await;
                }

                _ = tokio::time::sleep_until(next_tick), if self.settings.enabled => {
                    if self.is_leader.load(Ordering::Relaxed) {
                        self.run_scheduled(&shutdown).await;
                        next_tick = Instant::now() + self.settings.interval;
                    } else {
                        debug!("Not leader, skipping scheduled sync cycle");
                        next_tick = Instant::now() + self.settings.interval.min(FOLLOWER_RECHECK);
                    }
                }
            }
        }

        info!("Sync scheduler stopped");
    }

    async fn run_scheduled(&self, shutdown: &CancellationToken) {
        let since = if self.settings.incremental {
            self.orchestrator.last_success_started_at()
        } else {
            None
        };
        self.orchestrator.run_cycle(since, shutdown).await;

        match self.cache.purge_expired().await {
            Ok(0) => {}
            Ok(purged) => debug!(purged, "Purged expired cache entries"),
            Err(e) => warn!(error = %e, "Failed to purge expired cache entries"),
        }
    }
}
