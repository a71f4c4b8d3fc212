//! Database repository for subscriptions.

use sqlx::PgConnection;
use tracing::instrument;

use super::{NaturalKeyLookup, Repository, delete_by_id, fetch_by_id, list_rows};
use crate::db::{
    errors::{DbError, Result},
    models::{
        Entity, ListFilter, assign_id,
        subscriptions::{SubscriptionCreateDBRequest, SubscriptionDBResponse, SubscriptionUpdateDBRequest},
    },
};
use crate::types::{EntityId, ModelId, ProjectId, UseCaseId, abbrev_id};

pub struct Subscriptions<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Subscriptions<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Subscriptions<'c> {
    type CreateRequest = SubscriptionCreateDBRequest;
    type UpdateRequest = SubscriptionUpdateDBRequest;
    type Response = SubscriptionDBResponse;
    type Id = EntityId;
    type Filter = ListFilter;

    #[instrument(
        skip(self, request),
        fields(
            project_id = %abbrev_id(&request.project_id),
            use_case_id = %abbrev_id(&request.use_case_id),
            model_id = %abbrev_id(&request.model_id)
        ),
        err
    )]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let subscription = sqlx::query_as::<_, SubscriptionDBResponse>(
            r#"
            INSERT INTO subscriptions (id, project_id, use_case_id, model_id, alias)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(assign_id(&request.id))
        .bind(&request.project_id)
        .bind(&request.use_case_id)
        .bind(&request.model_id)
        .bind(&request.alias)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(subscription)
    }

    #[instrument(skip(self), fields(subscription_id = %abbrev_id(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        fetch_by_id(&mut *self.db, SubscriptionDBResponse::TABLE, &id).await
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        list_rows(&mut *self.db, SubscriptionDBResponse::TABLE, Some("use_case_id"), filter).await
    }

    #[instrument(skip(self), fields(subscription_id = %abbrev_id(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        delete_by_id(&mut *self.db, SubscriptionDBResponse::TABLE, &id).await
    }

    #[instrument(skip(self, request), fields(subscription_id = %abbrev_id(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let subscription = sqlx::query_as::<_, SubscriptionDBResponse>(
            r#"
            UPDATE subscriptions SET
                project_id = COALESCE($2, project_id),
                use_case_id = COALESCE($3, use_case_id),
                model_id = COALESCE($4, model_id),
                alias = CASE WHEN $5 THEN $6 ELSE alias END,
                updated_time = clock_timestamp()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&request.project_id)
        .bind(&request.use_case_id)
        .bind(&request.model_id)
        .bind(request.alias.is_some())
        .bind(request.alias.clone().flatten())
        .fetch_optional(&mut *self.db)
        .await?;

        subscription.ok_or(DbError::NotFound)
    }
}

#[async_trait::async_trait]
impl<'c> NaturalKeyLookup for Subscriptions<'c> {
    type NaturalKey = (ProjectId, UseCaseId, ModelId);

    #[instrument(skip(self), err)]
    async fn find_by_natural_key(&mut self, key: &Self::NaturalKey) -> Result<Option<Self::Response>> {
        let (project_id, use_case_id, model_id) = key;
        let subscription = sqlx::query_as::<_, SubscriptionDBResponse>(
            "SELECT * FROM subscriptions WHERE project_id = $1 AND use_case_id = $2 AND model_id = $3",
        )
        .bind(project_id)
        .bind(use_case_id)
        .bind(model_id)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(subscription)
    }
}
