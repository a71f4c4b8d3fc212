//! Database repository for model deployments.

use sqlx::PgConnection;
use tracing::instrument;

use super::{NaturalKeyLookup, Repository, delete_by_id, fetch_by_id, list_rows};
use crate::db::{
    errors::{DbError, Result},
    models::{
        Entity, ListFilter, assign_id,
        deployments::{DeploymentCreateDBRequest, DeploymentDBResponse, DeploymentUpdateDBRequest},
    },
};
use crate::types::{EntityId, ModelId, abbrev_id};

pub struct Deployments<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Deployments<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Serialize default flips for one model until the surrounding transaction ends.
    #[instrument(skip(self), fields(model_id = %abbrev_id(model_id)), err)]
    pub async fn lock_defaults(&mut self, model_id: &str) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended('model_deployments.is_default:' || $1, 0))")
            .bind(model_id)
            .execute(&mut *self.db)
            .await?;
        Ok(())
    }

    /// Clear `is_default` on every deployment of the model except `except_id`.
    #[instrument(skip(self), fields(model_id = %abbrev_id(model_id)), err)]
    pub async fn clear_defaults(&mut self, model_id: &str, except_id: Option<&str>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE model_deployments
            SET is_default = FALSE, updated_time = clock_timestamp()
            WHERE model_id = $1 AND is_default AND ($2::text IS NULL OR id <> $2)
            "#,
        )
        .bind(model_id)
        .bind(except_id)
        .execute(&mut *self.db)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Deployments<'c> {
    type CreateRequest = DeploymentCreateDBRequest;
    type UpdateRequest = DeploymentUpdateDBRequest;
    type Response = DeploymentDBResponse;
    type Id = EntityId;
    type Filter = ListFilter;

    #[instrument(
        skip(self, request),
        fields(model_id = %abbrev_id(&request.model_id), deployment_name = %request.deployment_name, is_default = request.is_default),
        err
    )]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let deployment = sqlx::query_as::<_, DeploymentDBResponse>(
            r#"
            INSERT INTO model_deployments (
                id, model_id, deployment_name, endpoint, auth_secret_manager_path,
                region, request_per_min, token_per_min, is_default
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(assign_id(&request.id))
        .bind(&request.model_id)
        .bind(&request.deployment_name)
        .bind(&request.endpoint)
        .bind(&request.auth_secret_manager_path)
        .bind(&request.region)
        .bind(request.request_per_min)
        .bind(request.token_per_min)
        .bind(request.is_default)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(deployment)
    }

    #[instrument(skip(self), fields(deployment_id = %abbrev_id(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        fetch_by_id(&mut *self.db, DeploymentDBResponse::TABLE, &id).await
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        list_rows(&mut *self.db, DeploymentDBResponse::TABLE, Some("model_id"), filter).await
    }

    #[instrument(skip(self), fields(deployment_id = %abbrev_id(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        delete_by_id(&mut *self.db, DeploymentDBResponse::TABLE, &id).await
    }

    #[instrument(skip(self, request), fields(deployment_id = %abbrev_id(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let deployment = sqlx::query_as::<_, DeploymentDBResponse>(
            r#"
            UPDATE model_deployments SET
                model_id = COALESCE($2, model_id),
                deployment_name = COALESCE($3, deployment_name),
                endpoint = COALESCE($4, endpoint),
                auth_secret_manager_path = CASE WHEN $5 THEN $6 ELSE auth_secret_manager_path END,
                region = CASE WHEN $7 THEN $8 ELSE region END,
                request_per_min = CASE WHEN $9 THEN $10 ELSE request_per_min END,
                token_per_min = CASE WHEN $11 THEN $12 ELSE token_per_min END,
                is_default = COALESCE($13, is_default),
                updated_time = clock_timestamp()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&request.model_id)
        .bind(&request.deployment_name)
        .bind(&request.endpoint)
        .bind(request.auth_secret_manager_path.is_some())
        .bind(request.auth_secret_manager_path.clone().flatten())
        .bind(request.region.is_some())
        .bind(request.region.clone().flatten())
        .bind(request.request_per_min.is_some())
        .bind(request.request_per_min.flatten())
        .bind(request.token_per_min.is_some())
        .bind(request.token_per_min.flatten())
        .bind(request.is_default)
        .fetch_optional(&mut *self.db)
        .await?;

        deployment.ok_or(DbError::NotFound)
    }
}

#[async_trait::async_trait]
impl<'c> NaturalKeyLookup for Deployments<'c> {
    type NaturalKey = (ModelId, String);

    #[instrument(skip(self), err)]
    async fn find_by_natural_key(&mut self, key: &Self::NaturalKey) -> Result<Option<Self::Response>> {
        let (model_id, deployment_name) = key;
        let deployment = sqlx::query_as::<_, DeploymentDBResponse>(
            "SELECT * FROM model_deployments WHERE model_id = $1 AND deployment_name = $2",
        )
        .bind(model_id)
        .bind(deployment_name)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(deployment)
    }
}
