//! Database models for use-case budgets and budget usage.

use bon::Builder;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Entity, default_currency, present_id};
use crate::types::{EntityId, UseCaseId};

/// Window a usage row accounts for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageScope {
    Daily,
    Monthly,
    Yearly,
}

impl UsageScope {
    pub fn as_str(self) -> &'static str {
        match self {
            UsageScope::Daily => "daily",
            UsageScope::Monthly => "monthly",
            UsageScope::Yearly => "yearly",
        }
    }
}

impl fmt::Display for UsageScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid usage scope: {0}")]
pub struct InvalidUsageScope(String);

impl TryFrom<String> for UsageScope {
    type Error = InvalidUsageScope;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "daily" => Ok(UsageScope::Daily),
            "monthly" => Ok(UsageScope::Monthly),
            "yearly" => Ok(UsageScope::Yearly),
            _ => Err(InvalidUsageScope(value)),
        }
    }
}

/// Database request for creating a budget
#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct BudgetCreateDBRequest {
    #[serde(default)]
    pub id: Option<EntityId>,
    pub use_case_id: UseCaseId,
    /// Amount in minor currency units
    pub budget_cents: i64,
    #[serde(default = "default_currency")]
    #[builder(default = default_currency())]
    pub currency: String,
}

/// Database request for updating a budget
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetUpdateDBRequest {
    pub use_case_id: Option<UseCaseId>,
    pub budget_cents: Option<i64>,
    pub currency: Option<String>,
}

/// Database response for a budget
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct BudgetDBResponse {
    pub id: EntityId,
    pub use_case_id: UseCaseId,
    pub budget_cents: i64,
    pub currency: String,
    pub created_time: DateTime<Utc>,
    pub updated_time: DateTime<Utc>,
}

impl Entity for BudgetDBResponse {
    type Create = BudgetCreateDBRequest;
    type Update = BudgetUpdateDBRequest;
    type Key = UseCaseId;

    const TABLE: &'static str = "use_case_budget";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_time(&self) -> DateTime<Utc> {
        self.created_time
    }

    fn updated_time(&self) -> DateTime<Utc> {
        self.updated_time
    }

    fn natural_key(&self) -> UseCaseId {
        self.use_case_id.clone()
    }

    fn key_of(request: &BudgetCreateDBRequest) -> UseCaseId {
        request.use_case_id.clone()
    }

    fn requested_id(request: &BudgetCreateDBRequest) -> Option<&str> {
        present_id(&request.id)
    }

    fn overwrite_with(request: &BudgetCreateDBRequest) -> BudgetUpdateDBRequest {
        BudgetUpdateDBRequest {
            use_case_id: Some(request.use_case_id.clone()),
            budget_cents: Some(request.budget_cents),
            currency: Some(request.currency.clone()),
        }
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.use_case_id)
    }
}

/// Database request for creating a budget usage row
#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct BudgetUsageCreateDBRequest {
    #[serde(default)]
    pub id: Option<EntityId>,
    pub use_case_id: UseCaseId,
    pub usage_period: NaiveDate,
    pub scope: UsageScope,
    #[serde(default)]
    #[builder(default)]
    pub used_cents: i64,
    #[serde(default = "default_currency")]
    #[builder(default = default_currency())]
    pub currency: String,
}

/// Database request for updating a budget usage row
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetUsageUpdateDBRequest {
    pub use_case_id: Option<UseCaseId>,
    pub usage_period: Option<NaiveDate>,
    pub scope: Option<UsageScope>,
    pub used_cents: Option<i64>,
    pub currency: Option<String>,
}

/// Database response for a budget usage row
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct BudgetUsageDBResponse {
    pub id: EntityId,
    pub use_case_id: UseCaseId,
    pub usage_period: NaiveDate,
    #[sqlx(try_from = "String")]
    pub scope: UsageScope,
    pub used_cents: i64,
    pub currency: String,
    pub created_time: DateTime<Utc>,
    pub updated_time: DateTime<Utc>,
}

impl Entity for BudgetUsageDBResponse {
    type Create = BudgetUsageCreateDBRequest;
    type Update = BudgetUsageUpdateDBRequest;
    /// (use_case_id, usage_period, scope)
    type Key = (UseCaseId, NaiveDate, UsageScope);

    const TABLE: &'static str = "use_case_budget_usage";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_time(&self) -> DateTime<Utc> {
        self.created_time
    }

    fn updated_time(&self) -> DateTime<Utc> {
        self.updated_time
    }

    fn natural_key(&self) -> Self::Key {
        (self.use_case_id.clone(), self.usage_period, self.scope)
    }

    fn key_of(request: &BudgetUsageCreateDBRequest) -> Self::Key {
        (request.use_case_id.clone(), request.usage_period, request.scope)
    }

    fn requested_id(request: &BudgetUsageCreateDBRequest) -> Option<&str> {
        present_id(&request.id)
    }

    fn overwrite_with(request: &BudgetUsageCreateDBRequest) -> BudgetUsageUpdateDBRequest {
        BudgetUsageUpdateDBRequest {
            use_case_id: Some(request.use_case_id.clone()),
            usage_period: Some(request.usage_period),
            scope: Some(request.scope),
            used_cents: Some(request.used_cents),
            currency: Some(request.currency.clone()),
        }
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.use_case_id)
    }
}
