use axum::{
    extract::State,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::Principal,
    entities::sale,
    errors::{ErrorResponse, ServiceError},
    handlers::{
        common::{created_response, success_response, validate_input, ApiJson, ApiPath, ApiQuery},
        AppState,
    },
    services::sales::{SaleListQuery, SalePage, SaleRequest, SaleWithItems},
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct PaymentProofRequest {
    #[validate(length(min = 1, max = 2048, message = "url is required"))]
    pub url: String,
}

/// Record a multi-item sale
#[utoipa::path(
    post,
    path = "/api/v1/sales",
    request_body = SaleRequest,
    responses(
        (status = 201, description = "Sale recorded", body = SaleWithItems),
        (status = 400, description = "Invalid request or insufficient stock", body = ErrorResponse),
        (status = 404, description = "Variant not found", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Sales"
)]
pub async fn create_sale(
    State(state): State<AppState>,
    principal: Principal,
    ApiJson(payload): ApiJson<SaleRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let sale = state
        .services
        .sales
        .process_sale(&principal, payload)
        .await?;
    Ok(created_response(sale))
}

/// List the organization's sales, newest first
#[utoipa::path(
    get,
    path = "/api/v1/sales",
    params(SaleListQuery),
    responses(
        (status = 200, description = "Page of sales", body = SalePage)
    ),
    security(("bearer_auth" = [])),
    tag = "Sales"
)]
pub async fn list_sales(
    State(state): State<AppState>,
    principal: Principal,
    ApiQuery(query): ApiQuery<SaleListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let page_size = state.config.page_size(query.limit);
    let page = state
        .services
        .sales
        .list_sales(&principal, &query, page_size)
        .await?;
    Ok(success_response(page))
}

#[utoipa::path(
    get,
    path = "/api/v1/sales/{id}",
    params(("id" = Uuid, Path, description = "Sale id")),
    responses(
        (status = 200, description = "Sale with items", body = SaleWithItems),
        (status = 404, description = "Sale not found", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Sales"
)]
pub async fn get_sale(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let sale = state.services.sales.get_sale(&principal, id).await?;
    Ok(success_response(sale))
}

/// Attach the stored proof of payment to a sale
#[utoipa::path(
    post,
    path = "/api/v1/sales/{id}/payment-proof",
    params(("id" = Uuid, Path, description = "Sale id")),
    request_body = PaymentProofRequest,
    responses(
        (status = 200, description = "Proof attached", body = sale::Model),
        (status = 404, description = "Sale not found", body = ErrorResponse),
        (status = 409, description = "Proof already attached", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Sales"
)]
pub async fn attach_payment_proof(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<PaymentProofRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let sale = state
        .services
        .sales
        .attach_payment_proof(&principal, id, &payload.url)
        .await?;
    Ok(success_response(sale))
}
