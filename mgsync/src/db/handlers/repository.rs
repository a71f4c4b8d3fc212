//! Base repository traits for storage operations.

/// Contains the Repository trait.
///
/// A repository is a data access layer for one mirrored table. It provides methods for
/// creating, reading, updating, and deleting rows, as well as listing them with simple
/// filters. Reconciliation additionally needs to match incoming records by natural key,
/// which [`NaturalKeyLookup`] adds on top.
use crate::db::{
    errors::Result,
    models::{Entity, ListFilter},
};
use crate::types::EntityId;

/// Base repository trait providing common database operations
///
/// This trait has separate associated types for create requests, update requests, and responses.
#[async_trait::async_trait]
pub trait Repository {
    /// The request type for creating entities
    type CreateRequest;

    /// The request type for updating entities
    type UpdateRequest;

    /// The response/DTO type returned by operations
    type Response;

    /// The identifier type for lookups
    type Id: Send + Sync;

    /// The filter type for list operations
    type Filter: Send + Sync;

    /// Create a new entity
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response>;

    /// Get an entity by ID
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>>;

    /// List entities with filtering and pagination
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>>;

    /// Delete an entity by ID
    async fn delete(&mut self, id: Self::Id) -> Result<bool>;

    /// Update an entity by ID, failing with [`crate::db::errors::DbError::NotFound`] if absent
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response>;
}

/// Lookup by the natural key the reconciler matches incoming records on
#[async_trait::async_trait]
pub trait NaturalKeyLookup: Repository {
    type NaturalKey: Send + Sync;

    /// Find the row with this natural key. Where several rows share a key (budgets, which
    /// carry no unique index) the oldest one wins.
    async fn find_by_natural_key(&mut self, key: &Self::NaturalKey) -> Result<Option<Self::Response>>;
}

/// A boxed repository for entity `E`, as handed out by a [`crate::db::store::UnitOfWork`]
pub type EntityRepository<'a, E> = Box<
    dyn NaturalKeyLookup<
            CreateRequest = <E as Entity>::Create,
            UpdateRequest = <E as Entity>::Update,
            Response = E,
            Id = EntityId,
            Filter = ListFilter,
            NaturalKey = <E as Entity>::Key,
        > + Send
        + 'a,
>;
