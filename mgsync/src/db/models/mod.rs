//! Database record models matching table schemas.
//!
//! Each entity module provides three shapes, following the same convention throughout:
//!
//! - `*CreateDBRequest`: a full record. Upstream snapshot records and CREATE event
//!   payloads deserialize straight into it (unknown keys are ignored).
//! - `*UpdateDBRequest`: a partial record. Absent fields are left untouched; nullable
//!   columns use `Option<Option<T>>` so an explicit `null` clears them.
//! - `*DBResponse`: a stored row, derived from `sqlx::FromRow`.
//!
//! The [`Entity`] trait ties the three together and names each kind's natural key, which
//! is what the reconciler matches on to decide insert versus update.

pub mod budgets;
pub mod deployments;
pub mod limits;
pub mod llm_models;
pub mod pricing;
pub mod projects;
pub mod subscriptions;
pub mod use_cases;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use std::fmt;

use crate::types::EntityId;

/// A stored row of one of the mirrored tables.
pub trait Entity: Clone + fmt::Debug + Send + Sync + 'static {
    /// Full record used for inserts
    type Create: fmt::Debug + Send + Sync;
    /// Partial record used for updates
    type Update: fmt::Debug + Default + Send + Sync;
    /// Natural key used to match incoming records against stored rows
    type Key: Clone + PartialEq + fmt::Debug + Send + Sync;

    const TABLE: &'static str;

    fn id(&self) -> &str;

    fn created_time(&self) -> DateTime<Utc>;

    fn updated_time(&self) -> DateTime<Utc>;

    /// Natural key of a stored row
    fn natural_key(&self) -> Self::Key;

    /// Natural key of an incoming record
    fn key_of(request: &Self::Create) -> Self::Key;

    /// Primary key an incoming record asks for, if it carries a non-empty `id`
    fn requested_id(request: &Self::Create) -> Option<&str>;

    /// Update that overwrites every mutable column with the values of `request`
    fn overwrite_with(request: &Self::Create) -> Self::Update;

    /// Identifier of the owning row used by [`ListFilter::parent_id`], if the table has one
    fn parent_id(&self) -> Option<&str>;
}

/// Filter options for listing rows of any mirrored table
#[derive(Debug, Clone)]
pub struct ListFilter {
    pub skip: i64,
    pub limit: i64,
    /// Restrict to children of one parent (project for use cases, model for deployments, ...)
    pub parent_id: Option<EntityId>,
}

impl ListFilter {
    pub fn new(skip: i64, limit: i64) -> Self {
        Self {
            skip,
            limit,
            parent_id: None,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<EntityId>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

impl Default for ListFilter {
    fn default() -> Self {
        Self::new(0, 100)
    }
}

pub(crate) fn present_id(id: &Option<EntityId>) -> Option<&str> {
    id.as_deref().map(str::trim).filter(|id| !id.is_empty())
}

/// Primary key for a new row: the upstream id when the record carries one, else a fresh UUID
pub(crate) fn assign_id(id: &Option<EntityId>) -> EntityId {
    match present_id(id) {
        Some(id) => id.to_string(),
        None => crate::types::new_entity_id(),
    }
}

pub(crate) fn default_true() -> bool {
    true
}

pub(crate) fn default_currency() -> String {
    "USD".to_string()
}

/// Deserialize a timestamp sent either as RFC 3339, as a naive date-time (taken as UTC) or
/// as a bare date (midnight UTC). Upstream usage periods arrive in all three shapes.
pub(crate) fn flexible_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_flexible_timestamp(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}

pub(crate) fn flexible_timestamp_opt<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) => parse_flexible_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}"))),
        None => Ok(None),
    }
}

fn parse_flexible_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_flexible_timestamp() {
        let expected = Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_flexible_timestamp("2025-07-01T00:00:00Z"), Some(expected));
        assert_eq!(parse_flexible_timestamp("2025-07-01T02:00:00+02:00"), Some(expected));
        assert_eq!(parse_flexible_timestamp("2025-07-01T00:00:00"), Some(expected));
        assert_eq!(parse_flexible_timestamp("2025-07-01"), Some(expected));
        assert_eq!(parse_flexible_timestamp("July 1st"), None);
    }
}
