//! Database models for subscription limits and limit usage.

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::rust::double_option;

use super::{Entity, flexible_timestamp, flexible_timestamp_opt, present_id};
use crate::types::{EntityId, LimitId, SubscriptionId};

/// Database request for creating a limit
#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct LimitCreateDBRequest {
    #[serde(default)]
    pub id: Option<LimitId>,
    pub subscription_id: SubscriptionId,
    /// What is bounded, e.g. input tokens or request count
    pub limit_type: String,
    /// Window the bound applies over
    pub scope: String,
    pub limit_value: i64,
}

/// Database request for updating a limit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitUpdateDBRequest {
    pub subscription_id: Option<SubscriptionId>,
    pub limit_type: Option<String>,
    pub scope: Option<String>,
    pub limit_value: Option<i64>,
}

/// Database response for a limit
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct LimitDBResponse {
    pub id: LimitId,
    pub subscription_id: SubscriptionId,
    pub limit_type: String,
    pub scope: String,
    pub limit_value: i64,
    pub created_time: DateTime<Utc>,
    pub updated_time: DateTime<Utc>,
}

impl Entity for LimitDBResponse {
    type Create = LimitCreateDBRequest;
    type Update = LimitUpdateDBRequest;
    /// (subscription_id, limit_type, scope)
    type Key = (SubscriptionId, String, String);

    const TABLE: &'static str = "llm_model_limits";

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
        (self.subscription_id.clone(), self.limit_type.clone(), self.scope.clone())
    }

    fn key_of(request: &LimitCreateDBRequest) -> Self::Key {
        (request.subscription_id.clone(), request.limit_type.clone(), request.scope.clone())
    }

    fn requested_id(request: &LimitCreateDBRequest) -> Option<&str> {
        present_id(&request.id)
    }

    fn overwrite_with(request: &LimitCreateDBRequest) -> LimitUpdateDBRequest {
        LimitUpdateDBRequest {
            subscription_id: Some(request.subscription_id.clone()),
            limit_type: Some(request.limit_type.clone()),
            scope: Some(request.scope.clone()),
            limit_value: Some(request.limit_value),
        }
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.subscription_id)
    }
}

/// Database request for creating a limit usage row
#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct LimitUsageCreateDBRequest {
    #[serde(default)]
    pub id: Option<EntityId>,
    pub limit_id: LimitId,
    pub scope: String,
    #[serde(deserialize_with = "flexible_timestamp")]
    pub usage_period: DateTime<Utc>,
    #[serde(default)]
    #[builder(default)]
    pub value: i64,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub called_by: Option<String>,
}

/// Database request for updating a limit usage row
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitUsageUpdateDBRequest {
    pub limit_id: Option<LimitId>,
    pub scope: Option<String>,
    #[serde(default, deserialize_with = "flexible_timestamp_opt")]
    pub usage_period: Option<DateTime<Utc>>,
    pub value: Option<i64>,
    #[serde(default, with = "double_option")]
    pub request_id: Option<Option<String>>,
    #[serde(default, with = "double_option")]
    pub called_by: Option<Option<String>>,
}

/// Database response for a limit usage row
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct LimitUsageDBResponse {
    pub id: EntityId,
    pub limit_id: LimitId,
    pub scope: String,
    pub usage_period: DateTime<Utc>,
    pub value: i64,
    pub request_id: Option<String>,
    pub called_by: Option<String>,
    pub created_time: DateTime<Utc>,
    pub updated_time: DateTime<Utc>,
}

impl Entity for LimitUsageDBResponse {
    type Create = LimitUsageCreateDBRequest;
    type Update = LimitUsageUpdateDBRequest;
    /// (limit_id, scope, usage_period)
    type Key = (LimitId, String, DateTime<Utc>);

    const TABLE: &'static str = "llm_model_limits_usage";

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
        (self.limit_id.clone(), self.scope.clone(), self.usage_period)
    }

    fn key_of(request: &LimitUsageCreateDBRequest) -> Self::Key {
        (request.limit_id.clone(), request.scope.clone(), request.usage_period)
    }

    fn requested_id(request: &LimitUsageCreateDBRequest) -> Option<&str> {
        present_id(&request.id)
    }

    fn overwrite_with(request: &LimitUsageCreateDBRequest) -> LimitUsageUpdateDBRequest {
        LimitUsageUpdateDBRequest {
            limit_id: Some(request.limit_id.clone()),
            scope: Some(request.scope.clone()),
            usage_period: Some(request.usage_period),
            value: Some(request.value),
            request_id: Some(request.request_id.clone()),
            called_by: Some(request.called_by.clone()),
        }
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.limit_id)
    }
}
