//! API request/response data models.
//!
//! Request bodies and query parameters deserialize with `serde`; every type that appears in
//! the OpenAPI document derives `utoipa::ToSchema` or `utoipa::IntoParams`. Core types that
//! are returned unchanged (sync reports, outcome stream entries) live next to the code that
//! produces them and are only re-exported through the handlers.

pub mod entities;
pub mod events;
pub mod health;
pub mod outcomes;
pub mod pagination;
pub mod sync;
