//! Units of work over the mirrored tables.
//!
//! The reconciler and the event ingestor never hold a connection themselves. They ask a
//! [`Store`] for a [`UnitOfWork`], fetch the repositories they need from it, and commit.
//! Every reconciled record gets its own unit of work, so a failing record never rolls back
//! its neighbours and a cancelled cycle leaves only fully-applied records behind.
//!
//! Two stores exist: [`PgStore`] (one Postgres transaction per unit of work) and
//! [`crate::db::in_memory::InMemoryStore`].

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use crate::db::{
    errors::Result,
    handlers::{
        BudgetUsages, Budgets, Deployments, EntityRepository, LimitUsages, Limits, Models, Pricings, Projects, Subscriptions,
        UseCases,
    },
    models::{
        Entity,
        budgets::{BudgetDBResponse, BudgetUsageDBResponse},
        deployments::DeploymentDBResponse,
        limits::{LimitDBResponse, LimitUsageDBResponse},
        llm_models::ModelDBResponse,
        pricing::PricingDBResponse,
        projects::ProjectDBResponse,
        subscriptions::SubscriptionDBResponse,
        use_cases::UseCaseDBResponse,
    },
};

/// Source of units of work
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;
}

/// A set of writes that commit together. Dropping without [`UnitOfWork::commit`] rolls back
/// where the backend supports it.
#[async_trait]
pub trait UnitOfWork: Send {
    fn projects(&mut self) -> EntityRepository<'_, ProjectDBResponse>;
    fn use_cases(&mut self) -> EntityRepository<'_, UseCaseDBResponse>;
    fn budgets(&mut self) -> EntityRepository<'_, BudgetDBResponse>;
    fn budget_usages(&mut self) -> EntityRepository<'_, BudgetUsageDBResponse>;
    fn models(&mut self) -> EntityRepository<'_, ModelDBResponse>;
    fn deployments(&mut self) -> EntityRepository<'_, DeploymentDBResponse>;
    fn pricings(&mut self) -> EntityRepository<'_, PricingDBResponse>;
    fn subscriptions(&mut self) -> EntityRepository<'_, SubscriptionDBResponse>;
    fn limits(&mut self) -> EntityRepository<'_, LimitDBResponse>;
    fn limit_usages(&mut self) -> EntityRepository<'_, LimitUsageDBResponse>;

    /// Block other units of work from flipping defaults of this model until commit
    async fn lock_default_deployments(&mut self, model_id: &str) -> Result<()>;

    /// Clear `is_default` on the model's deployments other than `except_id`
    async fn clear_default_deployments(&mut self, model_id: &str, except_id: Option<&str>) -> Result<u64>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

/// Picks the repository for an entity type out of a unit of work, so generic code can be
/// written once over [`Entity`].
pub trait Stored: Entity {
    fn repository<'a>(uow: &'a mut dyn UnitOfWork) -> EntityRepository<'a, Self>;
}

impl Stored for ProjectDBResponse {
    fn repository<'a>(uow: &'a mut dyn UnitOfWork) -> EntityRepository<'a, Self> {
        uow.projects()
    }
}

impl Stored for UseCaseDBResponse {
    fn repository<'a>(uow: &'a mut dyn UnitOfWork) -> EntityRepository<'a, Self> {
        uow.use_cases()
    }
}

impl Stored for BudgetDBResponse {
    fn repository<'a>(uow: &'a mut dyn UnitOfWork) -> EntityRepository<'a, Self> {
        uow.budgets()
    }
}

impl Stored for BudgetUsageDBResponse {
    fn repository<'a>(uow: &'a mut dyn UnitOfWork) -> EntityRepository<'a, Self> {
        uow.budget_usages()
    }
}

impl Stored for ModelDBResponse {
    fn repository<'a>(uow: &'a mut dyn UnitOfWork) -> EntityRepository<'a, Self> {
        uow.models()
    }
}

impl Stored for DeploymentDBResponse {
    fn repository<'a>(uow: &'a mut dyn UnitOfWork) -> EntityRepository<'a, Self> {
        uow.deployments()
    }
}

impl Stored for PricingDBResponse {
    fn repository<'a>(uow: &'a mut dyn UnitOfWork) -> EntityRepository<'a, Self> {
        uow.pricings()
    }
}

impl Stored for SubscriptionDBResponse {
    fn repository<'a>(uow: &'a mut dyn UnitOfWork) -> EntityRepository<'a, Self> {
        uow.subscriptions()
    }
}

impl Stored for LimitDBResponse {
    fn repository<'a>(uow: &'a mut dyn UnitOfWork) -> EntityRepository<'a, Self> {
        uow.limits()
    }
}

impl Stored for LimitUsageDBResponse {
    fn repository<'a>(uow: &'a mut dyn UnitOfWork) -> EntityRepository<'a, Self> {
        uow.limit_usages()
    }
}

/// Postgres-backed store: one transaction per unit of work
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }
}

pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    fn projects(&mut self) -> EntityRepository<'_, ProjectDBResponse> {
        Box::new(Projects::new(&mut self.tx))
    }

    fn use_cases(&mut self) -> EntityRepository<'_, UseCaseDBResponse> {
        Box::new(UseCases::new(&mut self.tx))
    }

    fn budgets(&mut self) -> EntityRepository<'_, BudgetDBResponse> {
        Box::new(Budgets::new(&mut self.tx))
    }

    fn budget_usages(&mut self) -> EntityRepository<'_, BudgetUsageDBResponse> {
        Box::new(BudgetUsages::new(&mut self.tx))
    }

    fn models(&mut self) -> EntityRepository<'_, ModelDBResponse> {
        Box::new(Models::new(&mut self.tx))
    }

    fn deployments(&mut self) -> EntityRepository<'_, DeploymentDBResponse> {
        Box::new(Deployments::new(&mut self.tx))
    }

    fn pricings(&mut self) -> EntityRepository<'_, PricingDBResponse> {
        Box::new(Pricings::new(&mut self.tx))
    }

    fn subscriptions(&mut self) -> EntityRepository<'_, SubscriptionDBResponse> {
        Box::new(Subscriptions::new(&mut self.tx))
    }

    fn limits(&mut self) -> EntityRepository<'_, LimitDBResponse> {
        Box::new(Limits::new(&mut self.tx))
    }

    fn limit_usages(&mut self) -> EntityRepository<'_, LimitUsageDBResponse> {
        Box::new(LimitUsages::new(&mut self.tx))
    }

    async fn lock_default_deployments(&mut self, model_id: &str) -> Result<()> {
        Deployments::new(&mut self.tx).lock_defaults(model_id).await
    }

    async fn clear_default_deployments(&mut self, model_id: &str, except_id: Option<&str>) -> Result<u64> {
        Deployments::new(&mut self.tx).clear_defaults(model_id, except_id).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
