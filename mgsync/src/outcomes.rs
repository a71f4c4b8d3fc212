//! Append-only outcome streams.
//!
//! Every ingested event produces one record on [`EVENT_PROCESSED_STREAM`] and every sync
//! cycle one record on [`SYNC_EVENTS_STREAM`]. Downstream consumers page through a stream by
//! sequence id. Publishing is best effort: [`publish`] logs failures and never propagates
//! them into the operation being reported.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use tracing::{debug, instrument, warn};
use utoipa::ToSchema;

use crate::types::EntityKind;

pub const EVENT_PROCESSED_STREAM: &str = "event_processed";
pub const SYNC_EVENTS_STREAM: &str = "sync_events";

/// Value of [`OutcomeRecord::source`] on everything this service publishes
pub const OUTCOME_SOURCE: &str = "synchronize_api";

/// One published outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OutcomeRecord {
    /// The CUD action on `event_processed` records; `sync_completed` or `sync_failed` on cycles
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<EntityKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Seconds spent on the operation
    pub processing_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub totals: Option<Value>,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

/// A record as stored, with its position in the stream
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct StreamEntry {
    pub id: i64,
    pub stream: String,
    pub record: OutcomeRecord,
}

#[async_trait]
pub trait OutcomePublisher: Send + Sync {
    /// Append a record, returning its sequence id
    async fn append(&self, stream: &str, record: &OutcomeRecord) -> anyhow::Result<i64>;

    /// Records with a sequence id greater than `after`, oldest first
    async fn read(&self, stream: &str, after: i64, limit: i64) -> anyhow::Result<Vec<StreamEntry>>;
}

/// Append `record`, logging instead of failing
pub async fn publish(publisher: &dyn OutcomePublisher, stream: &str, record: OutcomeRecord) {
    match publisher.append(stream, &record).await {
        Ok(id) => debug!(stream, id, event_type = %record.event_type, "Published outcome"),
        Err(e) => warn!(stream, event_type = %record.event_type, error = %e, "Failed to publish outcome"),
    }
}

/// Outcome log backed by the `outcome_events` table
#[derive(Clone)]
pub struct PostgresOutcomeLog {
    pool: PgPool,
}

impl PostgresOutcomeLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct OutcomeRow {
    id: i64,
    stream: String,
    payload: Value,
}

#[async_trait]
impl OutcomePublisher for PostgresOutcomeLog {
    #[instrument(skip(self, record), fields(event_type = %record.event_type), err)]
    async fn append(&self, stream: &str, record: &OutcomeRecord) -> anyhow::Result<i64> {
        let id = sqlx::query_scalar::<_, i64>("INSERT INTO outcome_events (stream, payload) VALUES ($1, $2) RETURNING id")
            .bind(stream)
            .bind(serde_json::to_value(record)?)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    #[instrument(skip(self), err)]
    async fn read(&self, stream: &str, after: i64, limit: i64) -> anyhow::Result<Vec<StreamEntry>> {
        let rows = sqlx::query_as::<_, OutcomeRow>(
            "SELECT id, stream, payload FROM outcome_events WHERE stream = $1 AND id > $2 ORDER BY id LIMIT $3",
        )
        .bind(stream)
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(StreamEntry {
                    id: row.id,
                    stream: row.stream,
                    record: serde_json::from_value(row.payload)?,
                })
            })
            .collect()
    }
}

/// Process-local outcome log. Sequence ids are shared across streams, like the table's.
#[derive(Clone, Default)]
pub struct MemoryOutcomeLog {
    inner: Arc<RwLock<MemoryStreams>>,
}

#[derive(Default)]
struct MemoryStreams {
    next_id: i64,
    streams: HashMap<String, Vec<StreamEntry>>,
}

impl MemoryOutcomeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record of one stream
    pub fn records(&self, stream: &str) -> Vec<OutcomeRecord> {
        self.inner
            .read()
            .streams
            .get(stream)
            .map(|entries| entries.iter().map(|e| e.record.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl OutcomePublisher for MemoryOutcomeLog {
    async fn append(&self, stream: &str, record: &OutcomeRecord) -> anyhow::Result<i64> {
        let mut inner = self.inner.write();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.streams.entry(stream.to_string()).or_default().push(StreamEntry {
            id,
            stream: stream.to_string(),
            record: record.clone(),
        });
        Ok(id)
    }

    async fn read(&self, stream: &str, after: i64, limit: i64) -> anyhow::Result<Vec<StreamEntry>> {
        let inner = self.inner.read();
        Ok(inner
            .streams
            .get(stream)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.id > after)
                    .take(limit.max(0) as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(event_type: &str) -> OutcomeRecord {
        OutcomeRecord {
            event_type: event_type.to_string(),
            entity_type: Some(EntityKind::Project),
            entity_id: Some("p1".to_string()),
            event_id: Some("evt-1".to_string()),
            status: "created".to_string(),
            error: None,
            processing_time: 0.01,
            sync_type: None,
            totals: None,
            timestamp: Utc::now(),
            source: OUTCOME_SOURCE.to_string(),
        }
    }

    #[tokio::test]
    async fn test_memory_log_pages_per_stream() {
        let log = MemoryOutcomeLog::new();
        let first = log.append(EVENT_PROCESSED_STREAM, &record("event_processed")).await.unwrap();
        log.append(SYNC_EVENTS_STREAM, &record("sync_completed")).await.unwrap();
        let third = log.append(EVENT_PROCESSED_STREAM, &record("event_processed")).await.unwrap();

        let page = log.read(EVENT_PROCESSED_STREAM, 0, 10).await.unwrap();
        assert_eq!(page.iter().map(|e| e.id).collect::<Vec<_>>(), vec![first, third]);

        let rest = log.read(EVENT_PROCESSED_STREAM, first, 10).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, third);

        assert!(log.read("unknown", 0, 10).await.unwrap().is_empty());
    }

    #[test]
    fn test_record_serialization_omits_absent_fields() {
        let mut outcome = record("sync_completed");
        outcome.entity_type = None;
        outcome.entity_id = None;
        outcome.event_id = None;
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["source"], "synchronize_api");
        assert!(json.get("entity_id").is_none());
        assert!(json.get("error").is_none());
    }
}

#[cfg(all(test, feature = "postgres-tests"))]
mod postgres_tests {
    use super::*;

    #[sqlx::test]
    async fn test_postgres_log_round_trip(pool: PgPool) {
        let log = PostgresOutcomeLog::new(pool);
        let record = OutcomeRecord {
            event_type: "sync_failed".to_string(),
            entity_type: None,
            entity_id: None,
            event_id: None,
            status: "failed".to_string(),
            error: Some("upstream unavailable".to_string()),
            processing_time: 1.5,
            sync_type: Some("full".to_string()),
            totals: None,
            timestamp: Utc::now(),
            source: OUTCOME_SOURCE.to_string(),
        };
        let id = log.append(SYNC_EVENTS_STREAM, &record).await.unwrap();

        let entries = log.read(SYNC_EVENTS_STREAM, 0, 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);
        assert_eq!(entries[0].record.error.as_deref(), Some("upstream unavailable"));
        assert!(log.read(SYNC_EVENTS_STREAM, id, 10).await.unwrap().is_empty());
    }
}
