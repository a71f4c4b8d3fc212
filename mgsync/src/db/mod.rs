//! Database layer for the mirrored Model Garden tables.
//!
//! This module implements the data access layer using SQLx with PostgreSQL, plus an
//! in-memory backend with the same constraints for tests and local runs.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │ Reconciler / Events  │  (sync::reconciler, events)
//! └──────────┬───────────┘
//!            │
//!            ↓
//! ┌──────────────────────┐
//! │  Store / UnitOfWork  │  (db::store - one transaction per record)
//! └──────────┬───────────┘
//!            │
//!            ↓
//! ┌──────────────────────┐
//! │     Repositories     │  (db::handlers, db::in_memory)
//! └──────────┬───────────┘
//!            │
//!            ↓
//! ┌──────────────────────┐
//! │       Models         │  (db::models - rows and write requests)
//! └──────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`handlers`]: Postgres repository implementations, one per table
//! - [`models`]: Row structures and create/update requests
//! - [`store`]: The [`store::Store`] and [`store::UnitOfWork`] seams
//! - [`in_memory`]: In-memory [`store::Store`]
//! - [`errors`]: Database-specific error types
//!
//! # Example
//!
//! ```ignore
//! use mgsync::db::{handlers::{NaturalKeyLookup, Repository}, store::{PgStore, Store}};
//!
//! let store = PgStore::new(pool);
//! let mut uow = store.begin().await?;
//! if let Some(project) = uow.projects().find_by_natural_key(&"PRJ-1".to_string()).await? {
//!     println!("found {}", project.id);
//! }
//! uow.commit().await?;
//! ```
//!
//! # Migrations
//!
//! Migrations live in `migrations/` and are embedded via [`crate::migrator`]:
//!
//! ```ignore
//! mgsync::migrator().run(&pool).await?;
//! ```

pub mod errors;
pub mod handlers;
pub mod in_memory;
pub mod models;
pub mod store;
