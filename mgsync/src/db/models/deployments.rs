//! Database models for model deployments.
//!
//! At most one deployment per model may carry `is_default = true`. Storage backs this
//! with a partial unique index; writers clear the previous default first (see
//! [`crate::db::store::UnitOfWork::clear_default_deployments`]).

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::rust::double_option;

use super::{Entity, present_id};
use crate::types::{EntityId, ModelId};

/// Database request for creating a deployment
#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct DeploymentCreateDBRequest {
    #[serde(default)]
    pub id: Option<EntityId>,
    pub model_id: ModelId,
    pub deployment_name: String,
    pub endpoint: String,
    /// Reference to the credential in the secret manager, never the credential itself
    #[serde(default)]
    pub auth_secret_manager_path: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub request_per_min: Option<i32>,
    #[serde(default)]
    pub token_per_min: Option<i32>,
    #[serde(default)]
    #[builder(default)]
    pub is_default: bool,
}

/// Database request for updating a deployment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentUpdateDBRequest {
    pub model_id: Option<ModelId>,
    pub deployment_name: Option<String>,
    pub endpoint: Option<String>,
    #[serde(default, with = "double_option")]
    pub auth_secret_manager_path: Option<Option<String>>,
    #[serde(default, with = "double_option")]
    pub region: Option<Option<String>>,
    #[serde(default, with = "double_option")]
    pub request_per_min: Option<Option<i32>>,
    #[serde(default, with = "double_option")]
    pub token_per_min: Option<Option<i32>>,
    pub is_default: Option<bool>,
}

/// Database response for a deployment
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct DeploymentDBResponse {
    pub id: EntityId,
    pub model_id: ModelId,
    pub deployment_name: String,
    pub endpoint: String,
    pub auth_secret_manager_path: Option<String>,
    pub region: Option<String>,
    pub request_per_min: Option<i32>,
    pub token_per_min: Option<i32>,
    pub is_default: bool,
    pub created_time: DateTime<Utc>,
    pub updated_time: DateTime<Utc>,
}

impl Entity for DeploymentDBResponse {
    type Create = DeploymentCreateDBRequest;
    type Update = DeploymentUpdateDBRequest;
    /// (model_id, deployment_name)
    type Key = (ModelId, String);

    const TABLE: &'static str = "model_deployments";

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
        (self.model_id.clone(), self.deployment_name.clone())
    }

    fn key_of(request: &DeploymentCreateDBRequest) -> Self::Key {
        (request.model_id.clone(), request.deployment_name.clone())
    }

    fn requested_id(request: &DeploymentCreateDBRequest) -> Option<&str> {
        present_id(&request.id)
    }

    fn overwrite_with(request: &DeploymentCreateDBRequest) -> DeploymentUpdateDBRequest {
        DeploymentUpdateDBRequest {
            model_id: Some(request.model_id.clone()),
            deployment_name: Some(request.deployment_name.clone()),
            endpoint: Some(request.endpoint.clone()),
            auth_secret_manager_path: Some(request.auth_secret_manager_path.clone()),
            region: Some(request.region.clone()),
            request_per_min: Some(request.request_per_min),
            token_per_min: Some(request.token_per_min),
            is_default: Some(request.is_default),
        }
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.model_id)
    }
}
