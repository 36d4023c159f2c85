use axum::{
    extract::State,
    response::IntoResponse,
};
use uuid::Uuid;

use crate::{
    auth::Principal,
    errors::{ErrorResponse, ServiceError},
    handlers::{
        common::{created_response, success_response, ApiJson, ApiPath, ApiQuery},
        AppState,
    },
    services::catalog::{CreateProductRequest, ProductListQuery, ProductWithVariants},
};

/// Create a product with its variants
#[utoipa::path(
    post,
    path = "/api/v1/products",
    request_body = CreateProductRequest,
    responses(
        (status = 201, description = "Product created", body = ProductWithVariants),
        (status = 400, description = "Invalid product", body = ErrorResponse),
        (status = 403, description = "Product limit reached for the current plan", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Products"
)]
pub async fn create_product(
    State(state): State<AppState>,
    principal: Principal,
    ApiJson(payload): ApiJson<CreateProductRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let product = state
        .services
        .catalog
        .create_product(&principal, payload)
        .await?;
    Ok(created_response(product))
}

#[utoipa::path(
    get,
    path = "/api/v1/products",
    params(ProductListQuery),
    responses(
        (status = 200, description = "Products with variants", body = [ProductWithVariants])
    ),
    security(("bearer_auth" = [])),
    tag = "Products"
)]
pub async fn list_products(
    State(state): State<AppState>,
    principal: Principal,
    ApiQuery(query): ApiQuery<ProductListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let products = state
        .services
        .catalog
        .list_products(&principal, &query)
        .await?;
    Ok(success_response(products))
}

#[utoipa::path(
    get,
    path = "/api/v1/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 200, description = "Product with variants", body = ProductWithVariants),
        (status = 404, description = "Product not found", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Products"
)]
pub async fn get_product(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let product = state.services.catalog.get_product(&principal, id).await?;
    Ok(success_response(product))
}
