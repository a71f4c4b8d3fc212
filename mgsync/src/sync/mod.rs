//! Snapshot synchronization with Model Garden.
//!
//! A cycle fetches a snapshot through [`upstream::FetchSnapshot`], reconciles the eight
//! collections in dependency order with [`reconciler::Reconciler`], persists the
//! [`report::SyncReport`] and publishes a `sync_completed` or `sync_failed` outcome.
//! [`orchestrator::SyncOrchestrator`] runs one cycle; [`scheduler::SyncScheduler`] owns the
//! background worker that runs them on a timer and on demand.
//!
//! Full syncs are additive: rows missing from a snapshot are left alone. Only DELETE
//! events remove rows.

pub mod orchestrator;
pub mod reconciler;
pub mod records;
pub mod report;
pub mod scheduler;
pub mod upstream;

use crate::db::errors::DbError;
use crate::types::EntityKind;

/// Failure to apply one record. Counted against its collection; never fails the cycle.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("malformed {kind} record: {source}")]
    Malformed {
        kind: EntityKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown {kind} record type: {value}")]
    UnknownDiscriminator { kind: EntityKind, value: String },

    #[error(transparent)]
    Storage(#[from] DbError),
}

/// A cycle was cancelled before all records were applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("sync cycle cancelled")]
pub struct Cancelled;
