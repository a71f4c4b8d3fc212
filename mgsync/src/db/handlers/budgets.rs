//! Database repository for use-case budgets.

use sqlx::PgConnection;
use tracing::instrument;

use super::{NaturalKeyLookup, Repository, delete_by_id, fetch_by_id, list_rows};
use crate::db::{
    errors::{DbError, Result},
    models::{
        Entity, ListFilter, assign_id,
        budgets::{BudgetCreateDBRequest, BudgetDBResponse, BudgetUpdateDBRequest},
    },
};
use crate::types::{EntityId, UseCaseId, abbrev_id};

pub struct Budgets<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Budgets<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Budgets<'c> {
    type CreateRequest = BudgetCreateDBRequest;
    type UpdateRequest = BudgetUpdateDBRequest;
    type Response = BudgetDBResponse;
    type Id = EntityId;
    type Filter = ListFilter;

    #[instrument(skip(self, request), fields(use_case_id = %abbrev_id(&request.use_case_id)), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let budget = sqlx::query_as::<_, BudgetDBResponse>(
            r#"
            INSERT INTO use_case_budget (id, use_case_id, budget_cents, currency)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(assign_id(&request.id))
        .bind(&request.use_case_id)
        .bind(request.budget_cents)
        .bind(&request.currency)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(budget)
    }

    #[instrument(skip(self), fields(budget_id = %abbrev_id(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        fetch_by_id(&mut *self.db, BudgetDBResponse::TABLE, &id).await
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        list_rows(&mut *self.db, BudgetDBResponse::TABLE, Some("use_case_id"), filter).await
    }

    #[instrument(skip(self), fields(budget_id = %abbrev_id(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        delete_by_id(&mut *self.db, BudgetDBResponse::TABLE, &id).await
    }

    #[instrument(skip(self, request), fields(budget_id = %abbrev_id(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let budget = sqlx::query_as::<_, BudgetDBResponse>(
            r#"
            UPDATE use_case_budget SET
                use_case_id = COALESCE($2, use_case_id),
                budget_cents = COALESCE($3, budget_cents),
                currency = COALESCE($4, currency),
                updated_time = clock_timestamp()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&request.use_case_id)
        .bind(request.budget_cents)
        .bind(&request.currency)
        .fetch_optional(&mut *self.db)
        .await?;

        budget.ok_or(DbError::NotFound)
    }
}

#[async_trait::async_trait]
impl<'c> NaturalKeyLookup for Budgets<'c> {
    type NaturalKey = UseCaseId;

    #[instrument(skip(self), err)]
    async fn find_by_natural_key(&mut self, use_case_id: &UseCaseId) -> Result<Option<Self::Response>> {
        let budget = sqlx::query_as::<_, BudgetDBResponse>(
            "SELECT * FROM use_case_budget WHERE use_case_id = $1 ORDER BY created_time, id LIMIT 1",
        )
        .bind(use_case_id)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(budget)
    }
}
