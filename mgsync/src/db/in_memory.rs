//! In-memory storage implementation for the mirrored tables.
//!
//! This implementation keeps every table in one map guarded by a single lock. It enforces
//! the same rules the Postgres schema does: foreign keys, natural-key uniqueness, at most
//! one default deployment per model, and cascading deletes. It's suitable for testing and
//! single-process experiments; data is lost on restart.
//!
//! Writes are applied immediately, so a unit of work that is dropped without committing
//! does not roll back.
//!
//! # Example
//! ```ignore
//! let store = InMemoryStore::new();
//! let mut uow = store.begin().await?;
//! uow.projects().create(&request).await?;
//! uow.commit().await?;
//! assert_eq!(store.rows::<ProjectDBResponse>().len(), 1);
//! ```

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::db::{
    errors::{DbError, Result},
    handlers::{EntityRepository, NaturalKeyLookup, Repository},
    models::{
        Entity, ListFilter, assign_id,
        budgets::{BudgetDBResponse, BudgetUsageDBResponse},
        deployments::DeploymentDBResponse,
        limits::{LimitDBResponse, LimitUsageDBResponse},
        llm_models::ModelDBResponse,
        pricing::PricingDBResponse,
        projects::ProjectDBResponse,
        subscriptions::SubscriptionDBResponse,
        use_cases::UseCaseDBResponse,
    },
    store::{Store, UnitOfWork},
};
use crate::types::EntityId;

type Table<E> = BTreeMap<EntityId, E>;

/// Every mirrored table, keyed by row id
#[derive(Debug, Default)]
pub struct Tables {
    projects: Table<ProjectDBResponse>,
    use_cases: Table<UseCaseDBResponse>,
    budgets: Table<BudgetDBResponse>,
    budget_usages: Table<BudgetUsageDBResponse>,
    models: Table<ModelDBResponse>,
    deployments: Table<DeploymentDBResponse>,
    pricings: Table<PricingDBResponse>,
    subscriptions: Table<SubscriptionDBResponse>,
    limits: Table<LimitDBResponse>,
    limit_usages: Table<LimitUsageDBResponse>,
}

/// Row behaviour the in-memory store needs on top of [`Entity`]
pub trait MemoryEntity: Entity {
    fn table(tables: &Tables) -> &Table<Self>;

    fn table_mut(tables: &mut Tables) -> &mut Table<Self>;

    /// Build a new row from a create request, keeping the upstream id when present
    fn build(request: &Self::Create, now: DateTime<Utc>) -> Self;

    /// Apply a partial update and bump `updated_time`
    fn apply(&mut self, update: &Self::Update, now: DateTime<Utc>);

    /// Fail unless every parent this row references exists
    fn check_references(&self, _tables: &Tables) -> Result<()> {
        Ok(())
    }

    /// Whether two distinct rows may not coexist
    fn conflicts_with(&self, other: &Self) -> bool {
        self.natural_key() == other.natural_key()
    }

    /// Delete the rows that reference `id`
    fn cascade(_tables: &mut Tables, _id: &str) {}
}

fn require<E: MemoryEntity>(tables: &Tables, child_table: &str, id: &str) -> Result<()> {
    if E::table(tables).contains_key(id) {
        Ok(())
    } else {
        Err(DbError::foreign_key(
            child_table,
            format!("{} row {id} does not exist", E::TABLE),
        ))
    }
}

fn delete_cascade<E: MemoryEntity>(tables: &mut Tables, id: &str) -> bool {
    let removed = E::table_mut(tables).remove(id).is_some();
    if removed {
        E::cascade(tables, id);
    }
    removed
}

fn delete_children<C: MemoryEntity>(tables: &mut Tables, is_child: impl Fn(&C) -> bool) {
    let ids: Vec<EntityId> = C::table(tables)
        .values()
        .filter(|row| is_child(row))
        .map(|row| row.id().to_string())
        .collect();
    for id in ids {
        delete_cascade::<C>(tables, &id);
    }
}

impl MemoryEntity for ProjectDBResponse {
    fn table(tables: &Tables) -> &Table<Self> {
        &tables.projects
    }

    fn table_mut(tables: &mut Tables) -> &mut Table<Self> {
        &mut tables.projects
    }

    fn build(request: &Self::Create, now: DateTime<Utc>) -> Self {
        Self {
            id: assign_id(&request.id),
            project_name: request.project_name.clone(),
            project_code: request.project_code.clone(),
            is_active: request.is_active,
            created_time: now,
            updated_time: now,
        }
    }

    fn apply(&mut self, update: &Self::Update, now: DateTime<Utc>) {
        if let Some(name) = &update.project_name {
            self.project_name = name.clone();
        }
        if let Some(code) = &update.project_code {
            self.project_code = code.clone();
        }
        if let Some(active) = update.is_active {
            self.is_active = active;
        }
        self.updated_time = now;
    }

    fn cascade(tables: &mut Tables, id: &str) {
        delete_children::<UseCaseDBResponse>(tables, |row| row.project_id == id);
        delete_children::<SubscriptionDBResponse>(tables, |row| row.project_id == id);
    }
}

impl MemoryEntity for UseCaseDBResponse {
    fn table(tables: &Tables) -> &Table<Self> {
        &tables.use_cases
    }

    fn table_mut(tables: &mut Tables) -> &mut Table<Self> {
        &mut tables.use_cases
    }

    fn build(request: &Self::Create, now: DateTime<Utc>) -> Self {
        Self {
            id: assign_id(&request.id),
            project_id: request.project_id.clone(),
            use_case_name: request.use_case_name.clone(),
            ad_group: request.ad_group.clone(),
            is_active: request.is_active,
            created_time: now,
            updated_time: now,
        }
    }

    fn apply(&mut self, update: &Self::Update, now: DateTime<Utc>) {
        if let Some(project_id) = &update.project_id {
            self.project_id = project_id.clone();
        }
        if let Some(name) = &update.use_case_name {
            self.use_case_name = name.clone();
        }
        if let Some(ad_group) = &update.ad_group {
            self.ad_group = ad_group.clone();
        }
        if let Some(active) = update.is_active {
            self.is_active = active;
        }
        self.updated_time = now;
    }

    fn check_references(&self, tables: &Tables) -> Result<()> {
        require::<ProjectDBResponse>(tables, Self::TABLE, &self.project_id)
    }

    fn cascade(tables: &mut Tables, id: &str) {
        delete_children::<BudgetDBResponse>(tables, |row| row.use_case_id == id);
        delete_children::<BudgetUsageDBResponse>(tables, |row| row.use_case_id == id);
        delete_children::<SubscriptionDBResponse>(tables, |row| row.use_case_id == id);
    }
}

impl MemoryEntity for BudgetDBResponse {
    fn table(tables: &Tables) -> &Table<Self> {
        &tables.budgets
    }

    fn table_mut(tables: &mut Tables) -> &mut Table<Self> {
        &mut tables.budgets
    }

    fn build(request: &Self::Create, now: DateTime<Utc>) -> Self {
        Self {
            id: assign_id(&request.id),
            use_case_id: request.use_case_id.clone(),
            budget_cents: request.budget_cents,
            currency: request.currency.clone(),
            created_time: now,
            updated_time: now,
        }
    }

    fn apply(&mut self, update: &Self::Update, now: DateTime<Utc>) {
        if let Some(use_case_id) = &update.use_case_id {
            self.use_case_id = use_case_id.clone();
        }
        if let Some(cents) = update.budget_cents {
            self.budget_cents = cents;
        }
        if let Some(currency) = &update.currency {
            self.currency = currency.clone();
        }
        self.updated_time = now;
    }

    fn check_references(&self, tables: &Tables) -> Result<()> {
        require::<UseCaseDBResponse>(tables, Self::TABLE, &self.use_case_id)
    }

    // One budget per use case is a matching preference, not a constraint.
    fn conflicts_with(&self, _other: &Self) -> bool {
        false
    }
}

impl MemoryEntity for BudgetUsageDBResponse {
    fn table(tables: &Tables) -> &Table<Self> {
        &tables.budget_usages
    }

    fn table_mut(tables: &mut Tables) -> &mut Table<Self> {
        &mut tables.budget_usages
    }

    fn build(request: &Self::Create, now: DateTime<Utc>) -> Self {
        Self {
            id: assign_id(&request.id),
            use_case_id: request.use_case_id.clone(),
            usage_period: request.usage_period,
            scope: request.scope,
            used_cents: request.used_cents,
            currency: request.currency.clone(),
            created_time: now,
            updated_time: now,
        }
    }

    fn apply(&mut self, update: &Self::Update, now: DateTime<Utc>) {
        if let Some(use_case_id) = &update.use_case_id {
            self.use_case_id = use_case_id.clone();
        }
        if let Some(period) = update.usage_period {
            self.usage_period = period;
        }
        if let Some(scope) = update.scope {
            self.scope = scope;
        }
        if let Some(cents) = update.used_cents {
            self.used_cents = cents;
        }
        if let Some(currency) = &update.currency {
            self.currency = currency.clone();
        }
        self.updated_time = now;
    }

    fn check_references(&self, tables: &Tables) -> Result<()> {
        require::<UseCaseDBResponse>(tables, Self::TABLE, &self.use_case_id)
    }
}

impl MemoryEntity for ModelDBResponse {
    fn table(tables: &Tables) -> &Table<Self> {
        &tables.models
    }

    fn table_mut(tables: &mut Tables) -> &mut Table<Self> {
        &mut tables.models
    }

    fn build(request: &Self::Create, now: DateTime<Utc>) -> Self {
        Self {
            id: assign_id(&request.id),
            model_name: request.model_name.clone(),
            model_type: request.model_type.clone(),
            provider: request.provider.clone(),
            model_input: request.model_input.clone(),
            model_output: request.model_output.clone(),
            max_content_length: request.max_content_length,
            created_time: now,
            updated_time: now,
        }
    }

    fn apply(&mut self, update: &Self::Update, now: DateTime<Utc>) {
        if let Some(name) = &update.model_name {
            self.model_name = name.clone();
        }
        if let Some(model_type) = &update.model_type {
            self.model_type = model_type.clone();
        }
        if let Some(provider) = &update.provider {
            self.provider = provider.clone();
        }
        if let Some(input) = &update.model_input {
            self.model_input = input.clone();
        }
        if let Some(output) = &update.model_output {
            self.model_output = output.clone();
        }
        if let Some(max) = update.max_content_length {
            self.max_content_length = max;
        }
        self.updated_time = now;
    }

    fn cascade(tables: &mut Tables, id: &str) {
        delete_children::<DeploymentDBResponse>(tables, |row| row.model_id == id);
        delete_children::<PricingDBResponse>(tables, |row| row.model_id == id);
        delete_children::<SubscriptionDBResponse>(tables, |row| row.model_id == id);
    }
}

impl MemoryEntity for DeploymentDBResponse {
    fn table(tables: &Tables) -> &Table<Self> {
        &tables.deployments
    }

    fn table_mut(tables: &mut Tables) -> &mut Table<Self> {
        &mut tables.deployments
    }

    fn build(request: &Self::Create, now: DateTime<Utc>) -> Self {
        Self {
            id: assign_id(&request.id),
            model_id: request.model_id.clone(),
            deployment_name: request.deployment_name.clone(),
            endpoint: request.endpoint.clone(),
            auth_secret_manager_path: request.auth_secret_manager_path.clone(),
            region: request.region.clone(),
            request_per_min: request.request_per_min,
            token_per_min: request.token_per_min,
            is_default: request.is_default,
            created_time: now,
            updated_time: now,
        }
    }

    fn apply(&mut self, update: &Self::Update, now: DateTime<Utc>) {
        if let Some(model_id) = &update.model_id {
            self.model_id = model_id.clone();
        }
        if let Some(name) = &update.deployment_name {
            self.deployment_name = name.clone();
        }
        if let Some(endpoint) = &update.endpoint {
            self.endpoint = endpoint.clone();
        }
        if let Some(path) = &update.auth_secret_manager_path {
            self.auth_secret_manager_path = path.clone();
        }
        if let Some(region) = &update.region {
            self.region = region.clone();
        }
        if let Some(rpm) = update.request_per_min {
            self.request_per_min = rpm;
        }
        if let Some(tpm) = update.token_per_min {
            self.token_per_min = tpm;
        }
        if let Some(is_default) = update.is_default {
            self.is_default = is_default;
        }
        self.updated_time = now;
    }

    fn check_references(&self, tables: &Tables) -> Result<()> {
        require::<ModelDBResponse>(tables, Self::TABLE, &self.model_id)
    }

    fn conflicts_with(&self, other: &Self) -> bool {
        self.natural_key() == other.natural_key() || (self.is_default && other.is_default && self.model_id == other.model_id)
    }
}

impl MemoryEntity for PricingDBResponse {
    fn table(tables: &Tables) -> &Table<Self> {
        &tables.pricings
    }

    fn table_mut(tables: &mut Tables) -> &mut Table<Self> {
        &mut tables.pricings
    }

    fn build(request: &Self::Create, now: DateTime<Utc>) -> Self {
        Self {
            id: assign_id(&request.id),
            model_id: request.model_id.clone(),
            input_token_price_cpm: request.input_token_price_cpm,
            output_token_price_cpm: request.output_token_price_cpm,
            currency: request.currency.clone(),
            created_time: now,
            updated_time: now,
        }
    }

    fn apply(&mut self, update: &Self::Update, now: DateTime<Utc>) {
        if let Some(model_id) = &update.model_id {
            self.model_id = model_id.clone();
        }
        if let Some(price) = update.input_token_price_cpm {
            self.input_token_price_cpm = price;
        }
        if let Some(price) = update.output_token_price_cpm {
            self.output_token_price_cpm = price;
        }
        if let Some(currency) = &update.currency {
            self.currency = currency.clone();
        }
        self.updated_time = now;
    }

    fn check_references(&self, tables: &Tables) -> Result<()> {
        require::<ModelDBResponse>(tables, Self::TABLE, &self.model_id)
    }
}

impl MemoryEntity for SubscriptionDBResponse {
    fn table(tables: &Tables) -> &Table<Self> {
        &tables.subscriptions
    }

    fn table_mut(tables: &mut Tables) -> &mut Table<Self> {
        &mut tables.subscriptions
    }

    fn build(request: &Self::Create, now: DateTime<Utc>) -> Self {
        Self {
            id: assign_id(&request.id),
            project_id: request.project_id.clone(),
            use_case_id: request.use_case_id.clone(),
            model_id: request.model_id.clone(),
            alias: request.alias.clone(),
            created_time: now,
            updated_time: now,
        }
    }

    fn apply(&mut self, update: &Self::Update, now: DateTime<Utc>) {
        if let Some(project_id) = &update.project_id {
            self.project_id = project_id.clone();
        }
        if let Some(use_case_id) = &update.use_case_id {
            self.use_case_id = use_case_id.clone();
        }
        if let Some(model_id) = &update.model_id {
            self.model_id = model_id.clone();
        }
        if let Some(alias) = &update.alias {
            self.alias = alias.clone();
        }
        self.updated_time = now;
    }

    fn check_references(&self, tables: &Tables) -> Result<()> {
        require::<ProjectDBResponse>(tables, Self::TABLE, &self.project_id)?;
        require::<UseCaseDBResponse>(tables, Self::TABLE, &self.use_case_id)?;
        require::<ModelDBResponse>(tables, Self::TABLE, &self.model_id)
    }

    fn cascade(tables: &mut Tables, id: &str) {
        delete_children::<LimitDBResponse>(tables, |row| row.subscription_id == id);
    }
}

impl MemoryEntity for LimitDBResponse {
    fn table(tables: &Tables) -> &Table<Self> {
        &tables.limits
    }

    fn table_mut(tables: &mut Tables) -> &mut Table<Self> {
        &mut tables.limits
    }

    fn build(request: &Self::Create, now: DateTime<Utc>) -> Self {
        Self {
            id: assign_id(&request.id),
            subscription_id: request.subscription_id.clone(),
            limit_type: request.limit_type.clone(),
            scope: request.scope.clone(),
            limit_value: request.limit_value,
            created_time: now,
            updated_time: now,
        }
    }

    fn apply(&mut self, update: &Self::Update, now: DateTime<Utc>) {
        if let Some(subscription_id) = &update.subscription_id {
            self.subscription_id = subscription_id.clone();
        }
        if let Some(limit_type) = &update.limit_type {
            self.limit_type = limit_type.clone();
        }
        if let Some(scope) = &update.scope {
            self.scope = scope.clone();
        }
        if let Some(value) = update.limit_value {
            self.limit_value = value;
        }
        self.updated_time = now;
    }

    fn check_references(&self, tables: &Tables) -> Result<()> {
        require::<SubscriptionDBResponse>(tables, Self::TABLE, &self.subscription_id)
    }

    fn cascade(tables: &mut Tables, id: &str) {
        delete_children::<LimitUsageDBResponse>(tables, |row| row.limit_id == id);
    }
}

impl MemoryEntity for LimitUsageDBResponse {
    fn table(tables: &Tables) -> &Table<Self> {
        &tables.limit_usages
    }

    fn table_mut(tables: &mut Tables) -> &mut Table<Self> {
        &mut tables.limit_usages
    }

    fn build(request: &Self::Create, now: DateTime<Utc>) -> Self {
        Self {
            id: assign_id(&request.id),
            limit_id: request.limit_id.clone(),
            scope: request.scope.clone(),
            usage_period: request.usage_period,
            value: request.value,
            request_id: request.request_id.clone(),
            called_by: request.called_by.clone(),
            created_time: now,
            updated_time: now,
        }
    }

    fn apply(&mut self, update: &Self::Update, now: DateTime<Utc>) {
        if let Some(limit_id) = &update.limit_id {
            self.limit_id = limit_id.clone();
        }
        if let Some(scope) = &update.scope {
            self.scope = scope.clone();
        }
        if let Some(period) = update.usage_period {
            self.usage_period = period;
        }
        if let Some(value) = update.value {
            self.value = value;
        }
        if let Some(request_id) = &update.request_id {
            self.request_id = request_id.clone();
        }
        if let Some(called_by) = &update.called_by {
            self.called_by = called_by.clone();
        }
        self.updated_time = now;
    }

    fn check_references(&self, tables: &Tables) -> Result<()> {
        require::<LimitDBResponse>(tables, Self::TABLE, &self.limit_id)
    }
}

/// In-memory implementation of [`Store`]
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All rows of one table, oldest first
    pub fn rows<E: MemoryEntity>(&self) -> Vec<E> {
        let tables = self.tables.lock();
        sorted(E::table(&tables).values().cloned().collect())
    }
}

fn sorted<E: Entity>(mut rows: Vec<E>) -> Vec<E> {
    rows.sort_by(|a, b| (a.created_time(), a.id()).cmp(&(b.created_time(), b.id())));
    rows
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        Ok(Box::new(InMemoryUnitOfWork {
            tables: self.tables.clone(),
        }))
    }
}

pub struct InMemoryUnitOfWork {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryUnitOfWork {
    fn repository<E: MemoryEntity>(&self) -> EntityRepository<'static, E> {
        Box::new(MemoryRepository::<E> {
            tables: self.tables.clone(),
            _entity: PhantomData,
        })
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    fn projects(&mut self) -> EntityRepository<'_, ProjectDBResponse> {
        self.repository()
    }

    fn use_cases(&mut self) -> EntityRepository<'_, UseCaseDBResponse> {
        self.repository()
    }

    fn budgets(&mut self) -> EntityRepository<'_, BudgetDBResponse> {
        self.repository()
    }

    fn budget_usages(&mut self) -> EntityRepository<'_, BudgetUsageDBResponse> {
        self.repository()
    }

    fn models(&mut self) -> EntityRepository<'_, ModelDBResponse> {
        self.repository()
    }

    fn deployments(&mut self) -> EntityRepository<'_, DeploymentDBResponse> {
        self.repository()
    }

    fn pricings(&mut self) -> EntityRepository<'_, PricingDBResponse> {
        self.repository()
    }

    fn subscriptions(&mut self) -> EntityRepository<'_, SubscriptionDBResponse> {
        self.repository()
    }

    fn limits(&mut self) -> EntityRepository<'_, LimitDBResponse> {
        self.repository()
    }

    fn limit_usages(&mut self) -> EntityRepository<'_, LimitUsageDBResponse> {
        self.repository()
    }

    // Each write holds the table lock and re-checks the one-default rule, which is enough
    // to keep defaults exclusive without a separate lock.
    async fn lock_default_deployments(&mut self, _model_id: &str) -> Result<()> {
        Ok(())
    }

    async fn clear_default_deployments(&mut self, model_id: &str, except_id: Option<&str>) -> Result<u64> {
        let mut tables = self.tables.lock();
        let now = Utc::now();
        let mut cleared = 0;
        for row in tables.deployments.values_mut() {
            if row.model_id == model_id && row.is_default && Some(row.id.as_str()) != except_id {
                row.is_default = false;
                row.updated_time = bumped(row.updated_time, now);
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// `now`, nudged forward if the clock has not moved past the previous write
fn bumped(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    now.max(previous + Duration::microseconds(1))
}

struct MemoryRepository<E> {
    tables: Arc<Mutex<Tables>>,
    _entity: PhantomData<E>,
}

fn check_unique<E: MemoryEntity>(tables: &Tables, row: &E) -> Result<()> {
    let clash = E::table(tables)
        .values()
        .any(|other| other.id() != row.id() && row.conflicts_with(other));
    if clash {
        return Err(DbError::unique(
            E::TABLE,
            format!("{} row conflicts with key {:?}", E::TABLE, row.natural_key()),
        ));
    }
    Ok(())
}

#[async_trait]
impl<E: MemoryEntity> Repository for MemoryRepository<E> {
    type CreateRequest = E::Create;
    type UpdateRequest = E::Update;
    type Response = E;
    type Id = EntityId;
    type Filter = ListFilter;

    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let mut tables = self.tables.lock();
        let row = E::build(request, Utc::now());

        if E::table(&tables).contains_key(row.id()) {
            return Err(DbError::unique(E::TABLE, format!("{} row {} already exists", E::TABLE, row.id())));
        }
        row.check_references(&tables)?;
        check_unique(&tables, &row)?;

        E::table_mut(&mut tables).insert(row.id().to_string(), row.clone());
        Ok(row)
    }

    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        Ok(E::table(&self.tables.lock()).get(&id).cloned())
    }

    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let tables = self.tables.lock();
        let rows = E::table(&tables)
            .values()
            .filter(|row| match &filter.parent_id {
                Some(parent_id) => row.parent_id().is_none_or(|p| p == parent_id),
                None => true,
            })
            .cloned()
            .collect();
        Ok(sorted(rows)
            .into_iter()
            .skip(filter.skip.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }

    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        Ok(delete_cascade::<E>(&mut self.tables.lock(), &id))
    }

    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let mut tables = self.tables.lock();
        let mut row = E::table(&tables).get(&id).cloned().ok_or(DbError::NotFound)?;

        let now = bumped(row.updated_time(), Utc::now());
        row.apply(request, now);
        row.check_references(&tables)?;
        check_unique(&tables, &row)?;

        E::table_mut(&mut tables).insert(id, row.clone());
        Ok(row)
    }
}

#[async_trait]
impl<E: MemoryEntity> NaturalKeyLookup for MemoryRepository<E> {
    type NaturalKey = E::Key;

    async fn find_by_natural_key(&mut self, key: &Self::NaturalKey) -> Result<Option<Self::Response>> {
        let tables = self.tables.lock();
        let matches = E::table(&tables)
            .values()
            .filter(|row| &row.natural_key() == key)
            .cloned()
            .collect();
        Ok(sorted(matches).into_iter().next())
    }
}
