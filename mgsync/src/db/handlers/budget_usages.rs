//! Database repository for use-case budget usage.

use chrono::NaiveDate;
use sqlx::PgConnection;
use tracing::instrument;

use super::{NaturalKeyLookup, Repository, delete_by_id, fetch_by_id, list_rows};
use crate::db::{
    errors::{DbError, Result},
    models::{
        Entity, ListFilter, assign_id,
        budgets::{BudgetUsageCreateDBRequest, BudgetUsageDBResponse, BudgetUsageUpdateDBRequest, UsageScope},
    },
};
use crate::types::{EntityId, UseCaseId, abbrev_id};

pub struct BudgetUsages<'c> {
    db: &'c mut PgConnection,
}

impl<'c> BudgetUsages<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl<'c> Repository for BudgetUsages<'c> {
    type CreateRequest = BudgetUsageCreateDBRequest;
    type UpdateRequest = BudgetUsageUpdateDBRequest;
    type Response = BudgetUsageDBResponse;
    type Id = EntityId;
    type Filter = ListFilter;

    #[instrument(
        skip(self, request),
        fields(use_case_id = %abbrev_id(&request.use_case_id), usage_period = %request.usage_period, scope = %request.scope),
        err
    )]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let usage = sqlx::query_as::<_, BudgetUsageDBResponse>(
            r#"
            INSERT INTO use_case_budget_usage (id, use_case_id, usage_period, scope, used_cents, currency)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(assign_id(&request.id))
        .bind(&request.use_case_id)
        .bind(request.usage_period)
        .bind(request.scope.as_str())
        .bind(request.used_cents)
        .bind(&request.currency)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(usage)
    }

    #[instrument(skip(self), fields(usage_id = %abbrev_id(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        fetch_by_id(&mut *self.db, BudgetUsageDBResponse::TABLE, &id).await
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        list_rows(&mut *self.db, BudgetUsageDBResponse::TABLE, Some("use_case_id"), filter).await
    }

    #[instrument(skip(self), fields(usage_id = %abbrev_id(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        delete_by_id(&mut *self.db, BudgetUsageDBResponse::TABLE, &id).await
    }

    #[instrument(skip(self, request), fields(usage_id = %abbrev_id(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let usage = sqlx::query_as::<_, BudgetUsageDBResponse>(
            r#"
            UPDATE use_case_budget_usage SET
                use_case_id = COALESCE($2, use_case_id),
                usage_period = COALESCE($3, usage_period),
                scope = COALESCE($4, scope),
                used_cents = COALESCE($5, used_cents),
                currency = COALESCE($6, currency),
                updated_time = clock_timestamp()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&request.use_case_id)
        .bind(request.usage_period)
        .bind(request.scope.map(UsageScope::as_str))
        .bind(request.used_cents)
        .bind(&request.currency)
        .fetch_optional(&mut *self.db)
        .await?;

        usage.ok_or(DbError::NotFound)
    }
}

#[async_trait::async_trait]
impl<'c> NaturalKeyLookup for BudgetUsages<'c> {
    type NaturalKey = (UseCaseId, NaiveDate, UsageScope);

    #[instrument(skip(self), err)]
    async fn find_by_natural_key(&mut self, key: &Self::NaturalKey) -> Result<Option<Self::Response>> {
        let (use_case_id, usage_period, scope) = key;
        let usage = sqlx::query_as::<_, BudgetUsageDBResponse>(
            "SELECT * FROM use_case_budget_usage WHERE use_case_id = $1 AND usage_period = $2 AND scope = $3",
        )
        .bind(use_case_id)
        .bind(*usage_period)
        .bind(scope.as_str())
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(usage)
    }
}

#[cfg(all(test, feature = "postgres-tests"))]
mod tests {
    use super::*;
    use crate::db::handlers::{Projects, UseCases};
    use crate::db::models::{projects::ProjectCreateDBRequest, use_cases::UseCaseCreateDBRequest};
    use sqlx::PgPool;

    #[sqlx::test]
    async fn test_usage_unique_per_period_and_scope(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let project = Projects::new(&mut conn)
            .create(&ProjectCreateDBRequest::builder().project_name("Alpha").project_code("PRJ-1").build())
            .await
            .unwrap();
        let use_case = UseCases::new(&mut conn)
            .create(
                &UseCaseCreateDBRequest::builder()
                    .project_id(project.id.clone())
                    .use_case_name("chatbot")
                    .build(),
            )
            .await
            .unwrap();

        let period = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();
        let request = BudgetUsageCreateDBRequest::builder()
            .use_case_id(use_case.id.clone())
            .usage_period(period)
            .scope(UsageScope::Monthly)
            .used_cents(1500)
            .build();

        let mut repo = BudgetUsages::new(&mut conn);
        let created = repo.create(&request).await.unwrap();
        assert_eq!(created.scope, UsageScope::Monthly);

        let err = repo.create(&request).await.unwrap_err();
        assert!(err.is_unique_violation());

        let found = repo
            .find_by_natural_key(&(use_case.id.clone(), period, UsageScope::Monthly))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, created.id);
        assert!(
            repo.find_by_natural_key(&(use_case.id, period, UsageScope::Daily))
                .await
                .unwrap()
                .is_none()
        );
    }
}
