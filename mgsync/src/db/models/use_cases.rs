//! Database models for use cases.

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::rust::double_option;

use super::{Entity, default_true, present_id};
use crate::types::{ProjectId, UseCaseId};

/// Database request for creating a new use case
#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct UseCaseCreateDBRequest {
    #[serde(default)]
    pub id: Option<UseCaseId>,
    pub project_id: ProjectId,
    pub use_case_name: String,
    /// Directory group that owns the use case
    #[serde(default)]
    pub ad_group: Option<String>,
    #[serde(default = "default_true")]
    #[builder(default = true)]
    pub is_active: bool,
}

/// Database request for updating a use case
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UseCaseUpdateDBRequest {
    pub project_id: Option<ProjectId>,
    pub use_case_name: Option<String>,
    #[serde(default, with = "double_option")]
    pub ad_group: Option<Option<String>>,
    pub is_active: Option<bool>,
}

/// Database response for a use case
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct UseCaseDBResponse {
    pub id: UseCaseId,
    pub project_id: ProjectId,
    pub use_case_name: String,
    pub ad_group: Option<String>,
    pub is_active: bool,
    pub created_time: DateTime<Utc>,
    pub updated_time: DateTime<Utc>,
}

impl Entity for UseCaseDBResponse {
    type Create = UseCaseCreateDBRequest;
    type Update = UseCaseUpdateDBRequest;
    /// (project_id, use_case_name)
    type Key = (ProjectId, String);

    const TABLE: &'static str = "use_cases";

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
        (self.project_id.clone(), self.use_case_name.clone())
    }

    fn key_of(request: &UseCaseCreateDBRequest) -> Self::Key {
        (request.project_id.clone(), request.use_case_name.clone())
    }

    fn requested_id(request: &UseCaseCreateDBRequest) -> Option<&str> {
        present_id(&request.id)
    }

    fn overwrite_with(request: &UseCaseCreateDBRequest) -> UseCaseUpdateDBRequest {
        UseCaseUpdateDBRequest {
            project_id: Some(request.project_id.clone()),
            use_case_name: Some(request.use_case_name.clone()),
            ad_group: Some(request.ad_group.clone()),
            is_active: Some(request.is_active),
        }
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.project_id)
    }
}
