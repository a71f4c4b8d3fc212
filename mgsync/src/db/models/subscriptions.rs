//! Database models for subscriptions, the (project, use case, model) links.

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::rust::double_option;

use super::{Entity, present_id};
use crate::types::{ModelId, ProjectId, SubscriptionId, UseCaseId};

/// Database request for creating a subscription
#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct SubscriptionCreateDBRequest {
    #[serde(default)]
    pub id: Option<SubscriptionId>,
    pub project_id: ProjectId,
    pub use_case_id: UseCaseId,
    pub model_id: ModelId,
    #[serde(default)]
    pub alias: Option<String>,
}

/// Database request for updating a subscription
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionUpdateDBRequest {
    pub project_id: Option<ProjectId>,
    pub use_case_id: Option<UseCaseId>,
    pub model_id: Option<ModelId>,
    #[serde(default, with = "double_option")]
    pub alias: Option<Option<String>>,
}

/// Database response for a subscription
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct SubscriptionDBResponse {
    pub id: SubscriptionId,
    pub project_id: ProjectId,
    pub use_case_id: UseCaseId,
    pub model_id: ModelId,
    pub alias: Option<String>,
    pub created_time: DateTime<Utc>,
    pub updated_time: DateTime<Utc>,
}

impl Entity for SubscriptionDBResponse {
    type Create = SubscriptionCreateDBRequest;
    type Update = SubscriptionUpdateDBRequest;
    /// (project_id, use_case_id, model_id)
    type Key = (ProjectId, UseCaseId, ModelId);

    const TABLE: &'static str = "subscriptions";

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
        (self.project_id.clone(), self.use_case_id.clone(), self.model_id.clone())
    }

    fn key_of(request: &SubscriptionCreateDBRequest) -> Self::Key {
        (request.project_id.clone(), request.use_case_id.clone(), request.model_id.clone())
    }

    fn requested_id(request: &SubscriptionCreateDBRequest) -> Option<&str> {
        present_id(&request.id)
    }

    fn overwrite_with(request: &SubscriptionCreateDBRequest) -> SubscriptionUpdateDBRequest {
        SubscriptionUpdateDBRequest {
            project_id: Some(request.project_id.clone()),
            use_case_id: Some(request.use_case_id.clone()),
            model_id: Some(request.model_id.clone()),
            alias: Some(request.alias.clone()),
        }
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.use_case_id)
    }
}
