//! Database models for LLM models.

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::rust::double_option;

use super::{Entity, present_id};
use crate::types::ModelId;

/// Database request for creating a model
#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct ModelCreateDBRequest {
    #[serde(default)]
    pub id: Option<ModelId>,
    pub model_name: String,
    /// chat, embedding, ...
    pub model_type: String,
    #[serde(default)]
    pub provider: Option<String>,
    /// Input modality
    #[serde(default)]
    pub model_input: Option<String>,
    /// Output modality
    #[serde(default)]
    pub model_output: Option<String>,
    #[serde(default)]
    pub max_content_length: Option<i32>,
}

/// Database request for updating a model
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelUpdateDBRequest {
    pub model_name: Option<String>,
    pub model_type: Option<String>,
    #[serde(default, with = "double_option")]
    pub provider: Option<Option<String>>,
    #[serde(default, with = "double_option")]
    pub model_input: Option<Option<String>>,
    #[serde(default, with = "double_option")]
    pub model_output: Option<Option<String>>,
    #[serde(default, with = "double_option")]
    pub max_content_length: Option<Option<i32>>,
}

/// Database response for a model
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ModelDBResponse {
    pub id: ModelId,
    pub model_name: String,
    pub model_type: String,
    pub provider: Option<String>,
    pub model_input: Option<String>,
    pub model_output: Option<String>,
    pub max_content_length: Option<i32>,
    pub created_time: DateTime<Utc>,
    pub updated_time: DateTime<Utc>,
}

impl Entity for ModelDBResponse {
    type Create = ModelCreateDBRequest;
    type Update = ModelUpdateDBRequest;
    type Key = String;

    const TABLE: &'static str = "models";

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
        self.model_name.clone()
    }

    fn key_of(request: &ModelCreateDBRequest) -> String {
        request.model_name.clone()
    }

    fn requested_id(request: &ModelCreateDBRequest) -> Option<&str> {
        present_id(&request.id)
    }

    fn overwrite_with(request: &ModelCreateDBRequest) -> ModelUpdateDBRequest {
        ModelUpdateDBRequest {
            model_name: Some(request.model_name.clone()),
            model_type: Some(request.model_type.clone()),
            provider: Some(request.provider.clone()),
            model_input: Some(request.model_input.clone()),
            model_output: Some(request.model_output.clone()),
            max_content_length: Some(request.max_content_length),
        }
    }

    fn parent_id(&self) -> Option<&str> {
        None
    }
}
