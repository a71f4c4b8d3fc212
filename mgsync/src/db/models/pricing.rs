//! Database models for model pricing.

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Entity, default_currency, present_id};
use crate::types::{EntityId, ModelId};

/// Database request for creating a pricing row
#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct PricingCreateDBRequest {
    #[serde(default)]
    pub id: Option<EntityId>,
    pub model_id: ModelId,
    /// Price per 1000 input tokens, in minor currency units
    pub input_token_price_cpm: i32,
    /// Price per 1000 output tokens, in minor currency units
    pub output_token_price_cpm: i32,
    #[serde(default = "default_currency")]
    #[builder(default = default_currency())]
    pub currency: String,
}

/// Database request for updating a pricing row
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PricingUpdateDBRequest {
    pub model_id: Option<ModelId>,
    pub input_token_price_cpm: Option<i32>,
    pub output_token_price_cpm: Option<i32>,
    pub currency: Option<String>,
}

/// Database response for a pricing row
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct PricingDBResponse {
    pub id: EntityId,
    pub model_id: ModelId,
    pub input_token_price_cpm: i32,
    pub output_token_price_cpm: i32,
    pub currency: String,
    pub created_time: DateTime<Utc>,
    pub updated_time: DateTime<Utc>,
}

impl Entity for PricingDBResponse {
    type Create = PricingCreateDBRequest;
    type Update = PricingUpdateDBRequest;
    /// (model_id, currency)
    type Key = (ModelId, String);

    const TABLE: &'static str = "llm_model_pricing";

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
        (self.model_id.clone(), self.currency.clone())
    }

    fn key_of(request: &PricingCreateDBRequest) -> Self::Key {
        (request.model_id.clone(), request.currency.clone())
    }

    fn requested_id(request: &PricingCreateDBRequest) -> Option<&str> {
        present_id(&request.id)
    }

    fn overwrite_with(request: &PricingCreateDBRequest) -> PricingUpdateDBRequest {
        PricingUpdateDBRequest {
            model_id: Some(request.model_id.clone()),
            input_token_price_cpm: Some(request.input_token_price_cpm),
            output_token_price_cpm: Some(request.output_token_price_cpm),
            currency: Some(request.currency.clone()),
        }
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.model_id)
    }
}
