//! Database repository for model pricing.

use sqlx::PgConnection;
use tracing::instrument;

use super::{NaturalKeyLookup, Repository, delete_by_id, fetch_by_id, list_rows};
use crate::db::{
    errors::{DbError, Result},
    models::{
        Entity, ListFilter, assign_id,
        pricing::{PricingCreateDBRequest, PricingDBResponse, PricingUpdateDBRequest},
    },
};
use crate::types::{EntityId, ModelId, abbrev_id};

pub struct Pricings<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Pricings<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Pricings<'c> {
    type CreateRequest = PricingCreateDBRequest;
    type UpdateRequest = PricingUpdateDBRequest;
    type Response = PricingDBResponse;
    type Id = EntityId;
    type Filter = ListFilter;

    #[instrument(skip(self, request), fields(model_id = %abbrev_id(&request.model_id), currency = %request.currency), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let pricing = sqlx::query_as::<_, PricingDBResponse>(
            r#"
            INSERT INTO llm_model_pricing (id, model_id, input_token_price_cpm, output_token_price_cpm, currency)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(assign_id(&request.id))
        .bind(&request.model_id)
        .bind(request.input_token_price_cpm)
        .bind(request.output_token_price_cpm)
        .bind(&request.currency)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(pricing)
    }

    #[instrument(skip(self), fields(pricing_id = %abbrev_id(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        fetch_by_id(&mut *self.db, PricingDBResponse::TABLE, &id).await
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        list_rows(&mut *self.db, PricingDBResponse::TABLE, Some("model_id"), filter).await
    }

    #[instrument(skip(self), fields(pricing_id = %abbrev_id(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        delete_by_id(&mut *self.db, PricingDBResponse::TABLE, &id).await
    }

    #[instrument(skip(self, request), fields(pricing_id = %abbrev_id(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let pricing = sqlx::query_as::<_, PricingDBResponse>(
            r#"
            UPDATE llm_model_pricing SET
                model_id = COALESCE($2, model_id),
                input_token_price_cpm = COALESCE($3, input_token_price_cpm),
                output_token_price_cpm = COALESCE($4, output_token_price_cpm),
                currency = COALESCE($5, currency),
                updated_time = clock_timestamp()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&request.model_id)
        .bind(request.input_token_price_cpm)
        .bind(request.output_token_price_cpm)
        .bind(&request.currency)
        .fetch_optional(&mut *self.db)
        .await?;

        pricing.ok_or(DbError::NotFound)
    }
}

#[async_trait::async_trait]
impl<'c> NaturalKeyLookup for Pricings<'c> {
    type NaturalKey = (ModelId, String);

    #[instrument(skip(self), err)]
    async fn find_by_natural_key(&mut self, key: &Self::NaturalKey) -> Result<Option<Self::Response>> {
        let (model_id, currency) = key;
        let pricing = sqlx::query_as::<_, PricingDBResponse>(
            "SELECT * FROM llm_model_pricing WHERE model_id = $1 AND currency = $2",
        )
        .bind(model_id)
        .bind(currency)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(pricing)
    }
}
