//! HTTP API for the Model Garden sync gateway.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response data structures
//!
//! # API Structure
//!
//! Everything is mounted under `/api/v1/model-garden`:
//!
//! - **Events** (`/events`): CUD event ingestion
//! - **Sync** (`/sync/*`): run, queue and inspect sync cycles
//! - **Entities** (`/entities/{kind}`): browse the mirrored tables
//! - **Outcomes** (`/outcomes`): read the published outcome streams
//! - **Health** (`/health`): readiness and upstream reachability
//!
//! # OpenAPI Documentation
//!
//! All endpoints are documented with `utoipa`. The document is served at `/openapi.json`
//! and rendered at `/docs`.

pub mod handlers;
pub mod models;
