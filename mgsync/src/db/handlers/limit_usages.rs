//! Database repository for limit usage.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::instrument;

use super::{NaturalKeyLookup, Repository, delete_by_id, fetch_by_id, list_rows};
use crate::db::{
    errors::{DbError, Result},
    models::{
        Entity, ListFilter, assign_id,
        limits::{LimitUsageCreateDBRequest, LimitUsageDBResponse, LimitUsageUpdateDBRequest},
    },
};
use crate::types::{EntityId, LimitId, abbrev_id};

pub struct LimitUsages<'c> {
    db: &'c mut PgConnection,
}

impl<'c> LimitUsages<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl<'c> Repository for LimitUsages<'c> {
    type CreateRequest = LimitUsageCreateDBRequest;
    type UpdateRequest = LimitUsageUpdateDBRequest;
    type Response = LimitUsageDBResponse;
    type Id = EntityId;
    type Filter = ListFilter;

    #[instrument(
        skip(self, request),
        fields(limit_id = %abbrev_id(&request.limit_id), scope = %request.scope, usage_period = %request.usage_period),
        err
    )]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let usage = sqlx::query_as::<_, LimitUsageDBResponse>(
            r#"
            INSERT INTO llm_model_limits_usage (id, limit_id, scope, usage_period, value, request_id, called_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(assign_id(&request.id))
        .bind(&request.limit_id)
        .bind(&request.scope)
        .bind(request.usage_period)
        .bind(request.value)
        .bind(&request.request_id)
        .bind(&request.called_by)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(usage)
    }

    #[instrument(skip(self), fields(usage_id = %abbrev_id(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        fetch_by_id(&mut *self.db, LimitUsageDBResponse::TABLE, &id).await
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        list_rows(&mut *self.db, LimitUsageDBResponse::TABLE, Some("limit_id"), filter).await
    }

    #[instrument(skip(self), fields(usage_id = %abbrev_id(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        delete_by_id(&mut *self.db, LimitUsageDBResponse::TABLE, &id).await
    }

    #[instrument(skip(self, request), fields(usage_id = %abbrev_id(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let usage = sqlx::query_as::<_, LimitUsageDBResponse>(
            r#"
            UPDATE llm_model_limits_usage SET
                limit_id = COALESCE($2, limit_id),
                scope = COALESCE($3, scope),
                usage_period = COALESCE($4, usage_period),
                value = COALESCE($5, value),
                request_id = CASE WHEN $6 THEN $7 ELSE request_id END,
                called_by = CASE WHEN $8 THEN $9 ELSE called_by END,
                updated_time = clock_timestamp()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&request.limit_id)
        .bind(&request.scope)
        .bind(request.usage_period)
        .bind(request.value)
        .bind(request.request_id.is_some())
        .bind(request.request_id.clone().flatten())
        .bind(request.called_by.is_some())
        .bind(request.called_by.clone().flatten())
        .fetch_optional(&mut *self.db)
        .await?;

        usage.ok_or(DbError::NotFound)
    }
}

#[async_trait::async_trait]
impl<'c> NaturalKeyLookup for LimitUsages<'c> {
    type NaturalKey = (LimitId, String, DateTime<Utc>);

    #[instrument(skip(self), err)]
    async fn find_by_natural_key(&mut self, key: &Self::NaturalKey) -> Result<Option<Self::Response>> {
        let (limit_id, scope, usage_period) = key;
        let usage = sqlx::query_as::<_, LimitUsageDBResponse>(
            "SELECT * FROM llm_model_limits_usage WHERE limit_id = $1 AND scope = $2 AND usage_period = $3",
        )
        .bind(limit_id)
        .bind(scope)
        .bind(*usage_period)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(usage)
    }
}
