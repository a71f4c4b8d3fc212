//! Database repository for projects.

use sqlx::PgConnection;
use tracing::instrument;

use super::{NaturalKeyLookup, Repository, delete_by_id, fetch_by_id, list_rows};
use crate::db::{
    errors::Result,
    models::{
        Entity, ListFilter, assign_id,
        projects::{ProjectCreateDBRequest, ProjectDBResponse, ProjectUpdateDBRequest},
    },
};
use crate::types::{EntityId, abbrev_id};

pub struct Projects<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Projects<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Projects<'c> {
    type CreateRequest = ProjectCreateDBRequest;
    type UpdateRequest = ProjectUpdateDBRequest;
    type Response = ProjectDBResponse;
    type Id = EntityId;
    type Filter = ListFilter;

    #[instrument(skip(self, request), fields(project_code = %request.project_code), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let project = sqlx::query_as::<_, ProjectDBResponse>(
            r#"
            INSERT INTO projects (id, project_name, project_code, is_active)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(assign_id(&request.id))
        .bind(&request.project_name)
        .bind(&request.project_code)
        .bind(request.is_active)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(project)
    }

    #[instrument(skip(self), fields(project_id = %abbrev_id(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        fetch_by_id(&mut *self.db, ProjectDBResponse::TABLE, &id).await
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        list_rows(&mut *self.db, ProjectDBResponse::TABLE, None, filter).await
    }

    #[instrument(skip(self), fields(project_id = %abbrev_id(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        delete_by_id(&mut *self.db, ProjectDBResponse::TABLE, &id).await
    }

    #[instrument(skip(self, request), fields(project_id = %abbrev_id(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let project = sqlx::query_as::<_, ProjectDBResponse>(
            r#"
            UPDATE projects SET
                project_name = COALESCE($2, project_name),
                project_code = COALESCE($3, project_code),
                is_active = COALESCE($4, is_active),
                updated_time = clock_timestamp()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&request.project_name)
        .bind(&request.project_code)
        .bind(request.is_active)
        .fetch_optional(&mut *self.db)
        .await?;

        project.ok_or(crate::db::errors::DbError::NotFound)
    }
}

#[async_trait::async_trait]
impl<'c> NaturalKeyLookup for Projects<'c> {
    type NaturalKey = String;

    #[instrument(skip(self), err)]
    async fn find_by_natural_key(&mut self, project_code: &String) -> Result<Option<Self::Response>> {
        let project = sqlx::query_as::<_, ProjectDBResponse>("SELECT * FROM projects WHERE project_code = $1")
            .bind(project_code)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(project)
    }
}

#[cfg(all(test, feature = "postgres-tests"))]
mod tests {
    use super::*;
    use sqlx::PgPool;

    #[sqlx::test]
    async fn test_create_find_and_update_project(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Projects::new(&mut conn);

        let created = repo
            .create(&ProjectCreateDBRequest::builder().project_name("Alpha").project_code("PRJ-1").build())
            .await
            .unwrap();
        assert!(created.is_active);
        assert_eq!(created.created_time, created.updated_time);

        let found = repo.find_by_natural_key(&"PRJ-1".to_string()).await.unwrap().unwrap();
        assert_eq!(found.id, created.id);

        let updated = repo
            .update(
                created.id.clone(),
                &ProjectUpdateDBRequest {
                    project_name: Some("Alpha 2".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.project_name, "Alpha 2");
        assert_eq!(updated.project_code, "PRJ-1");
        assert!(updated.updated_time > created.updated_time);
    }

    #[sqlx::test]
    async fn test_upstream_id_is_kept(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Projects::new(&mut conn);

        let created = repo
            .create(
                &ProjectCreateDBRequest::builder()
                    .id("proj-001".to_string())
                    .project_name("Alpha")
                    .project_code("PRJ-1")
                    .build(),
            )
            .await
            .unwrap();
        assert_eq!(created.id, "proj-001");
    }

    #[sqlx::test]
    async fn test_duplicate_code_is_unique_violation(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Projects::new(&mut conn);
        let request = ProjectCreateDBRequest::builder().project_name("Alpha").project_code("PRJ-1").build();

        repo.create(&request).await.unwrap();
        let err = repo.create(&request).await.unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[sqlx::test]
    async fn test_update_and_delete_missing_project(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Projects::new(&mut conn);

        let err = repo
            .update("missing".to_string(), &ProjectUpdateDBRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::db::errors::DbError::NotFound));
        assert!(!repo.delete("missing".to_string()).await.unwrap());
    }
}
