//! HTTP request handlers for all API endpoints.
//!
//! Handlers are thin: they extract the request, call into the ingestor, the orchestrator or
//! the store, and shape the response. All routes are mounted under `/api/v1/model-garden`.
//!
//! # Handler Modules
//!
//! - [`events`]: CUD event ingestion
//! - [`sync`]: inline and queued sync cycles, orchestrator status
//! - [`entities`]: read-only listing of the mirrored tables
//! - [`outcomes`]: paging through the outcome streams
//! - [`health`]: readiness including upstream reachability
//!
//! # Error Handling
//!
//! Handlers return [`crate::errors::Error`], which converts to the matching HTTP status
//! and a JSON `{"message": ...}` body.

pub mod entities;
pub mod events;
pub mod health;
pub mod outcomes;
pub mod sync;
