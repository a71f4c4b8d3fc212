//! Database repository for subscription limits.

use sqlx::PgConnection;
use tracing::instrument;

use super::{NaturalKeyLookup, Repository, delete_by_id, fetch_by_id, list_rows};
use crate::db::{
    errors::{DbError, Result},
    models::{
        Entity, ListFilter, assign_id,
        limits::{LimitCreateDBRequest, LimitDBResponse, LimitUpdateDBRequest},
    },
};
use crate::types::{EntityId, SubscriptionId, abbrev_id};

pub struct Limits<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Limits<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Limits<'c> {
    type CreateRequest = LimitCreateDBRequest;
    type UpdateRequest = LimitUpdateDBRequest;
    type Response = LimitDBResponse;
    type Id = EntityId;
    type Filter = ListFilter;

    #[instrument(
        skip(self, request),
        fields(subscription_id = %abbrev_id(&request.subscription_id), limit_type = %request.limit_type, scope = %request.scope),
        err
    )]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let limit = sqlx::query_as::<_, LimitDBResponse>(
            r#"
            INSERT INTO llm_model_limits (id, subscription_id, limit_type, scope, limit_value)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(assign_id(&request.id))
        .bind(&request.subscription_id)
        .bind(&request.limit_type)
        .bind(&request.scope)
        .bind(request.limit_value)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(limit)
    }

    #[instrument(skip(self), fields(limit_id = %abbrev_id(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        fetch_by_id(&mut *self.db, LimitDBResponse::TABLE, &id).await
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        list_rows(&mut *self.db, LimitDBResponse::TABLE, Some("subscription_id"), filter).await
    }

    #[instrument(skip(self), fields(limit_id = %abbrev_id(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        delete_by_id(&mut *self.db, LimitDBResponse::TABLE, &id).await
    }

    #[instrument(skip(self, request), fields(limit_id = %abbrev_id(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let limit = sqlx::query_as::<_, LimitDBResponse>(
            r#"
            UPDATE llm_model_limits SET
                subscription_id = COALESCE($2, subscription_id),
                limit_type = COALESCE($3, limit_type),
                scope = COALESCE($4, scope),
                limit_value = COALESCE($5, limit_value),
                updated_time = clock_timestamp()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&request.subscription_id)
        .bind(&request.limit_type)
        .bind(&request.scope)
        .bind(request.limit_value)
        .fetch_optional(&mut *self.db)
        .await?;

        limit.ok_or(DbError::NotFound)
    }
}

#[async_trait::async_trait]
impl<'c> NaturalKeyLookup for Limits<'c> {
    type NaturalKey = (SubscriptionId, String, String);

    #[instrument(skip(self), err)]
    async fn find_by_natural_key(&mut self, key: &Self::NaturalKey) -> Result<Option<Self::Response>> {
        let (subscription_id, limit_type, scope) = key;
        let limit = sqlx::query_as::<_, LimitDBResponse>(
            "SELECT * FROM llm_model_limits WHERE subscription_id = $1 AND limit_type = $2 AND scope = $3",
        )
        .bind(subscription_id)
        .bind(limit_type)
        .bind(scope)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(limit)
    }
}
