//! Database models for projects.

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Entity, default_true, present_id};
use crate::types::ProjectId;

/// Database request for creating a new project
#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct ProjectCreateDBRequest {
    #[serde(default)]
    pub id: Option<ProjectId>,
    pub project_name: String,
    pub project_code: String,
    #[serde(default = "default_true")]
    #[builder(default = true)]
    pub is_active: bool,
}

/// Database request for updating a project
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectUpdateDBRequest {
    pub project_name: Option<String>,
    pub project_code: Option<String>,
    pub is_active: Option<bool>,
}

/// Database response for a project
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ProjectDBResponse {
    pub id: ProjectId,
    pub project_name: String,
    pub project_code: String,
    pub is_active: bool,
    pub created_time: DateTime<Utc>,
    pub updated_time: DateTime<Utc>,
}

impl Entity for ProjectDBResponse {
    type Create = ProjectCreateDBRequest;
    type Update = ProjectUpdateDBRequest;
    type Key = String;

    const TABLE: &'static str = "projects";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_time(&self) -> DateTime<Utc> {
        self.created_time
    }

    fn updated_time(&self) -> DateTime<Utc> {
        self.updated_time
    }

    fn natural_key(&self) -> String {
        self.project_code.clone()
    }

    fn key_of(request: &ProjectCreateDBRequest) -> String {
        request.project_code.clone()
    }

    fn requested_id(request: &ProjectCreateDBRequest) -> Option<&str> {
        present_id(&request.id)
    }

    fn overwrite_with(request: &ProjectCreateDBRequest) -> ProjectUpdateDBRequest {
        ProjectUpdateDBRequest {
            project_name: Some(request.project_name.clone()),
            project_code: Some(request.project_code.clone()),
            is_active: Some(request.is_active),
        }
    }

    fn parent_id(&self) -> Option<&str> {
        None
    }
}
