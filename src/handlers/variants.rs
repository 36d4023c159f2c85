use axum::{
    extract::State,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::Principal,
    entities::{stock_movement, variant},
    errors::{ErrorResponse, ServiceError},
    handlers::{
        common::{success_response, validate_input, ApiJson, ApiPath, ApiQuery},
        AppState,
    },
    services::catalog::UpdateVariantRequest,
};

const DEFAULT_MOVEMENT_LIMIT: u64 = 50;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct StockAdjustmentRequest {
    /// Signed change to apply; must be non-zero
    pub adjustment: i32,
    #[validate(length(max = 255))]
    pub reason: Option<String>,
}

/// A variant at or below its minimum stock level.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LowStockItem {
    #[serde(flatten)]
    pub variant: variant::Model,
    pub product_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct MovementQuery {
    pub limit: Option<u64>,
}

/// Apply a manual stock correction
#[utoipa::path(
    post,
    path = "/api/v1/variants/{id}/adjust-stock",
    params(("id" = Uuid, Path, description = "Variant id")),
    request_body = StockAdjustmentRequest,
    responses(
        (status = 200, description = "Adjusted variant", body = variant::Model),
        (status = 400, description = "Zero adjustment or stock would go negative", body = ErrorResponse),
        (status = 404, description = "Variant not found", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Variants"
)]
pub async fn adjust_stock(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<StockAdjustmentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let variant = state
        .services
        .ledger
        .adjust_stock(&principal, id, payload.adjustment, payload.reason.as_deref())
        .await?;
    Ok(success_response(variant))
}

/// Update a variant's prices and metadata
#[utoipa::path(
    put,
    path = "/api/v1/variants/{id}",
    params(("id" = Uuid, Path, description = "Variant id")),
    request_body = UpdateVariantRequest,
    responses(
        (status = 200, description = "Updated variant", body = variant::Model),
        (status = 400, description = "Invalid field values", body = ErrorResponse),
        (status = 404, description = "Variant not found", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Variants"
)]
pub async fn update_variant(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<UpdateVariantRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let variant = state
        .services
        .catalog
        .update_variant(&principal, id, payload)
        .await?;
    Ok(success_response(variant))
}

#[utoipa::path(
    get,
    path = "/api/v1/variants/low-stock",
    responses(
        (status = 200, description = "Variants at or below minimum stock", body = [LowStockItem])
    ),
    security(("bearer_auth" = [])),
    tag = "Variants"
)]
pub async fn low_stock(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<impl IntoResponse, ServiceError> {
    let items: Vec<LowStockItem> = state
        .services
        .ledger
        .low_stock(&principal)
        .await?
        .into_iter()
        .map(|(variant, product)| LowStockItem {
            variant,
            product_name: product.map(|p| p.name),
        })
        .collect();
    Ok(success_response(items))
}

/// Stock movement history for a variant, newest first
#[utoipa::path(
    get,
    path = "/api/v1/variants/{id}/movements",
    params(("id" = Uuid, Path, description = "Variant id"), MovementQuery),
    responses(
        (status = 200, description = "Recorded quantity changes", body = [stock_movement::Model]),
        (status = 404, description = "Variant not found", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Variants"
)]
pub async fn list_movements(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(id): ApiPath<Uuid>,
    ApiQuery(query): ApiQuery<MovementQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_MOVEMENT_LIMIT)
        .clamp(1, state.config.api_max_page_size);
    let movements = state
        .services
        .ledger
        .movements(&principal, id, limit)
        .await?;
    Ok(success_response(movements))
}
