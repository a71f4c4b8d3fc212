//! Postgres repository implementations for the mirrored tables.
//!
//! Each repository wraps a `&mut PgConnection` (usually a transaction owned by
//! [`crate::db::store::PgUnitOfWork`]) and implements [`Repository`] plus
//! [`NaturalKeyLookup`]. Queries are built at runtime with `sqlx::query_as` and
//! `QueryBuilder`; every table name interpolated into SQL is a compile-time constant.
//!
//! ```ignore
//! let mut tx = pool.begin().await?;
//! let mut repo = Projects::new(&mut tx);
//! let project = repo.find_by_natural_key(&"PRJ-001".to_string()).await?;
//! tx.commit().await?;
//! ```

pub mod budget_usages;
pub mod budgets;
pub mod deployments;
pub mod limit_usages;
pub mod limits;
pub mod llm_models;
pub mod pricing;
pub mod projects;
pub mod repository;
pub mod subscriptions;
pub mod use_cases;

pub use budget_usages::BudgetUsages;
pub use budgets::Budgets;
pub use deployments::Deployments;
pub use limit_usages::LimitUsages;
pub use limits::Limits;
pub use llm_models::Models;
pub use pricing::Pricings;
pub use projects::Projects;
pub use repository::{EntityRepository, NaturalKeyLookup, Repository};
pub use subscriptions::Subscriptions;
pub use use_cases::UseCases;

use sqlx::{FromRow, PgConnection, QueryBuilder, postgres::PgRow};

use crate::db::{errors::Result, models::ListFilter};

pub(crate) async fn fetch_by_id<T>(db: &mut PgConnection, table: &'static str, id: &str) -> Result<Option<T>>
where
    T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
{
    let row = sqlx::query_as::<_, T>(&format!("SELECT * FROM {table} WHERE id = $1"))
        .bind(id)
        .fetch_optional(db)
        .await?;
    Ok(row)
}

pub(crate) async fn delete_by_id(db: &mut PgConnection, table: &'static str, id: &str) -> Result<bool> {
    let result = sqlx::query(&format!("DELETE FROM {table} WHERE id = $1"))
        .bind(id)
        .execute(db)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn list_rows<T>(
    db: &mut PgConnection,
    table: &'static str,
    parent_column: Option<&'static str>,
    filter: &ListFilter,
) -> Result<Vec<T>>
where
    T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
{
    let mut query = QueryBuilder::new(format!("SELECT * FROM {table} WHERE 1=1"));

    if let (Some(column), Some(parent_id)) = (parent_column, filter.parent_id.as_ref()) {
        query.push(format!(" AND {column} = "));
        query.push_bind(parent_id.clone());
    }

    query.push(" ORDER BY created_time, id LIMIT ");
    query.push_bind(filter.limit);
    query.push(" OFFSET ");
    query.push_bind(filter.skip);

    let rows = query.build_query_as::<T>().fetch_all(db).await?;
    Ok(rows)
}
