//! Shared pagination types for API query parameters.
//!
//! Entity listings use offset pagination (`skip`, `limit`). Outcome streams are paged by
//! sequence id (`after`, `limit`).

use serde::Deserialize;
use serde_with::{DisplayFromStr, serde_as};
use utoipa::{IntoParams, ToSchema};

/// Default number of items to return per page.
pub const DEFAULT_LIMIT: i64 = 100;

/// Maximum number of items that can be requested per page.
pub const MAX_LIMIT: i64 = 1000;

/// Offset pagination: `skip` items, then return at most `limit`.
///
/// The `limit` is clamped between 1 and [`MAX_LIMIT`].
#[serde_as]
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct Pagination {
    /// Number of items to skip (default: 0)
    #[param(default = 0, minimum = 0)]
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub skip: Option<i64>,

    /// Maximum number of items to return (default: 100, max: 1000)
    #[param(default = 100, minimum = 1, maximum = 1000)]
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub limit: Option<i64>,
}

impl Pagination {
    #[inline]
    pub fn skip(&self) -> i64 {
        self.skip.unwrap_or(0).max(0)
    }

    #[inline]
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

/// Sequence pagination over an append-only stream.
#[serde_as]
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct SequencePagination {
    /// Return entries with a sequence id greater than this (default: 0, the start of the stream)
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub after: Option<i64>,

    /// Maximum number of entries to return (default: 100, max: 1000)
    #[param(default = 100, minimum = 1, maximum = 1000)]
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub limit: Option<i64>,
}

impl SequencePagination {
    #[inline]
    pub fn after(&self) -> i64 {
        self.after.unwrap_or(0).max(0)
    }

    #[inline]
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}
