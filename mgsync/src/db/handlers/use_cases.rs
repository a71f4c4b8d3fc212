//! Database repository for use cases.

use sqlx::PgConnection;
use tracing::instrument;

use super::{NaturalKeyLookup, Repository, delete_by_id, fetch_by_id, list_rows};
use crate::db::{
    errors::{DbError, Result},
    models::{
        Entity, ListFilter, assign_id,
        use_cases::{UseCaseCreateDBRequest, UseCaseDBResponse, UseCaseUpdateDBRequest},
    },
};
use crate::types::{EntityId, ProjectId, abbrev_id};

pub struct UseCases<'c> {
    db: &'c mut PgConnection,
}

impl<'c> UseCases<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl<'c> Repository for UseCases<'c> {
    type CreateRequest = UseCaseCreateDBRequest;
    type UpdateRequest = UseCaseUpdateDBRequest;
    type Response = UseCaseDBResponse;
    type Id = EntityId;
    type Filter = ListFilter;

    #[instrument(skip(self, request), fields(project_id = %abbrev_id(&request.project_id), use_case_name = %request.use_case_name), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let use_case = sqlx::query_as::<_, UseCaseDBResponse>(
            r#"
            INSERT INTO use_cases (id, project_id, use_case_name, ad_group, is_active)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(assign_id(&request.id))
        .bind(&request.project_id)
        .bind(&request.use_case_name)
        .bind(&request.ad_group)
        .bind(request.is_active)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(use_case)
    }

    #[instrument(skip(self), fields(use_case_id = %abbrev_id(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        fetch_by_id(&mut *self.db, UseCaseDBResponse::TABLE, &id).await
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        list_rows(&mut *self.db, UseCaseDBResponse::TABLE, Some("project_id"), filter).await
    }

    #[instrument(skip(self), fields(use_case_id = %abbrev_id(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        delete_by_id(&mut *self.db, UseCaseDBResponse::TABLE, &id).await
    }

    #[instrument(skip(self, request), fields(use_case_id = %abbrev_id(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let use_case = sqlx::query_as::<_, UseCaseDBResponse>(
            r#"
            UPDATE use_cases SET
                project_id = COALESCE($2, project_id),
                use_case_name = COALESCE($3, use_case_name),
                ad_group = CASE WHEN $4 THEN $5 ELSE ad_group END,
                is_active = COALESCE($6, is_active),
                updated_time = clock_timestamp()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&request.project_id)
        .bind(&request.use_case_name)
        .bind(request.ad_group.is_some())
        .bind(request.ad_group.clone().flatten())
        .bind(request.is_active)
        .fetch_optional(&mut *self.db)
        .await?;

        use_case.ok_or(DbError::NotFound)
    }
}

#[async_trait::async_trait]
impl<'c> NaturalKeyLookup for UseCases<'c> {
    type NaturalKey = (ProjectId, String);

    #[instrument(skip(self), err)]
    async fn find_by_natural_key(&mut self, key: &Self::NaturalKey) -> Result<Option<Self::Response>> {
        let (project_id, use_case_name) = key;
        let use_case = sqlx::query_as::<_, UseCaseDBResponse>(
            "SELECT * FROM use_cases WHERE project_id = $1 AND use_case_name = $2",
        )
        .bind(project_id)
        .bind(use_case_name)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(use_case)
    }
}
