//! Database repository for LLM models.

use sqlx::PgConnection;
use tracing::instrument;

use super::{NaturalKeyLookup, Repository, delete_by_id, fetch_by_id, list_rows};
use crate::db::{
    errors::{DbError, Result},
    models::{
        Entity, ListFilter, assign_id,
        llm_models::{ModelCreateDBRequest, ModelDBResponse, ModelUpdateDBRequest},
    },
};
use crate::types::{EntityId, abbrev_id};

pub struct Models<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Models<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Models<'c> {
    type CreateRequest = ModelCreateDBRequest;
    type UpdateRequest = ModelUpdateDBRequest;
    type Response = ModelDBResponse;
    type Id = EntityId;
    type Filter = ListFilter;

    #[instrument(skip(self, request), fields(model_name = %request.model_name), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let model = sqlx::query_as::<_, ModelDBResponse>(
            r#"
            INSERT INTO models (id, model_name, model_type, provider, model_input, model_output, max_content_length)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(assign_id(&request.id))
        .bind(&request.model_name)
        .bind(&request.model_type)
        .bind(&request.provider)
        .bind(&request.model_input)
        .bind(&request.model_output)
        .bind(request.max_content_length)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(model)
    }

    #[instrument(skip(self), fields(model_id = %abbrev_id(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        fetch_by_id(&mut *self.db, ModelDBResponse::TABLE, &id).await
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        list_rows(&mut *self.db, ModelDBResponse::TABLE, None, filter).await
    }

    #[instrument(skip(self), fields(model_id = %abbrev_id(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        delete_by_id(&mut *self.db, ModelDBResponse::TABLE, &id).await
    }

    #[instrument(skip(self, request), fields(model_id = %abbrev_id(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let model = sqlx::query_as::<_, ModelDBResponse>(
            r#"
            UPDATE models SET
                model_name = COALESCE($2, model_name),
                model_type = COALESCE($3, model_type),
                provider = CASE WHEN $4 THEN $5 ELSE provider END,
                model_input = CASE WHEN $6 THEN $7 ELSE model_input END,
                model_output = CASE WHEN $8 THEN $9 ELSE model_output END,
                max_content_length = CASE WHEN $10 THEN $11 ELSE max_content_length END,
                updated_time = clock_timestamp()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&request.model_name)
        .bind(&request.model_type)
        .bind(request.provider.is_some())
        .bind(request.provider.clone().flatten())
        .bind(request.model_input.is_some())
        .bind(request.model_input.clone().flatten())
        .bind(request.model_output.is_some())
        .bind(request.model_output.clone().flatten())
        .bind(request.max_content_length.is_some())
        .bind(request.max_content_length.flatten())
        .fetch_optional(&mut *self.db)
        .await?;

        model.ok_or(DbError::NotFound)
    }
}

#[async_trait::async_trait]
impl<'c> NaturalKeyLookup for Models<'c> {
    type NaturalKey = String;

    #[instrument(skip(self), err)]
    async fn find_by_natural_key(&mut self, model_name: &String) -> Result<Option<Self::Response>> {
        let model = sqlx::query_as::<_, ModelDBResponse>("SELECT * FROM models WHERE model_name = $1")
            .bind(model_name)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(model)
    }
}
