use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::Serialize;
use serde_json::Value;

use crate::{
    AppState,
    api::models::entities::{EntityPage, ListEntitiesQuery, RecordType},
    db::{
        models::{
            ListFilter,
            budgets::{BudgetDBResponse, BudgetUsageDBResponse},
            deployments::DeploymentDBResponse,
            limits::{LimitDBResponse, LimitUsageDBResponse},
            llm_models::ModelDBResponse,
            pricing::PricingDBResponse,
            projects::ProjectDBResponse,
            subscriptions::SubscriptionDBResponse,
            use_cases::UseCaseDBResponse,
        },
        store::{Store, Stored},
    },
    errors::{Error, Result},
    types::EntityKind,
};

async fn list_rows<E: Stored + Serialize>(store: &dyn Store, filter: &ListFilter) -> Result<Vec<Value>> {
    let mut uow = store.begin().await?;
    let rows = E::repository(uow.as_mut()).list(filter).await?;
    uow.commit().await?;

    rows.iter()
        .map(|row| serde_json::to_value(row).map_err(|e| Error::Other(e.into())))
        .collect()
}

#[utoipa::path(
    get,
    path = "/entities/{kind}",
    tag = "entities",
    summary = "List mirrored rows",
    description = "List stored rows of one entity kind, oldest first. Budgets and limits list their usage table with `type=usage`.",
    params(
        ("kind" = EntityKind, Path, description = "Entity kind: project, usecase, budget, model, deployment, pricing, subscription or limit"),
        ListEntitiesQuery,
    ),
    responses(
        (status = 200, description = "One page of rows", body = EntityPage),
        (status = 400, description = "`type=usage` on a kind without usage rows"),
        (status = 404, description = "Unknown entity kind"),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_entities(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(query): Query<ListEntitiesQuery>,
) -> Result<Json<EntityPage>> {
    let kind: EntityKind = kind.parse().map_err(|_| Error::NotFound {
        resource: "Entity kind".to_string(),
        id: kind.clone(),
    })?;

    let skip = query.pagination.skip();
    let limit = query.pagination.limit();
    let mut filter = ListFilter::new(skip, limit);
    filter.parent_id = query.parent_id;

    let store = state.store.as_ref();
    let data = match (kind, query.record_type) {
        (EntityKind::Project, RecordType::Primary) => list_rows::<ProjectDBResponse>(store, &filter).await?,
        (EntityKind::UseCase, RecordType::Primary) => list_rows::<UseCaseDBResponse>(store, &filter).await?,
        (EntityKind::Budget, RecordType::Primary) => list_rows::<BudgetDBResponse>(store, &filter).await?,
        (EntityKind::Budget, RecordType::Usage) => list_rows::<BudgetUsageDBResponse>(store, &filter).await?,
        (EntityKind::Model, RecordType::Primary) => list_rows::<ModelDBResponse>(store, &filter).await?,
        (EntityKind::Deployment, RecordType::Primary) => list_rows::<DeploymentDBResponse>(store, &filter).await?,
        (EntityKind::Pricing, RecordType::Primary) => list_rows::<PricingDBResponse>(store, &filter).await?,
        (EntityKind::Subscription, RecordType::Primary) => list_rows::<SubscriptionDBResponse>(store, &filter).await?,
        (EntityKind::Limit, RecordType::Primary) => list_rows::<LimitDBResponse>(store, &filter).await?,
        (EntityKind::Limit, RecordType::Usage) => list_rows::<LimitUsageDBResponse>(store, &filter).await?,
        (kind, RecordType::Usage) => {
            return Err(Error::BadRequest {
                message: format!("{kind} has no usage records"),
            });
        }
    };

    Ok(Json(EntityPage {
        kind,
        record_type: query.record_type,
        data,
        skip,
        limit,
    }))
}
