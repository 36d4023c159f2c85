use axum::{
    extract::State,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    auth::Principal,
    errors::{ErrorResponse, ServiceError},
    handlers::{
        common::{success_response, ApiQuery},
        AppState,
    },
    services::analytics::{
        AnalyticsQuery, DailySales, DateRange, ProductPerformance, SalesSummary, TopProductsSort,
    },
};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SummaryResponse {
    pub summary: SalesSummary,
    #[serde(flatten)]
    pub range: DateRange,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TopProductsResponse {
    pub products: Vec<ProductPerformance>,
    pub sort_by: TopProductsSort,
    #[serde(flatten)]
    pub range: DateRange,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DailySalesResponse {
    pub daily_sales: Vec<DailySales>,
    #[serde(flatten)]
    pub range: DateRange,
}

/// Owner role and an analytics-enabled plan are both required.
async fn authorize(state: &AppState, principal: &Principal) -> Result<(), ServiceError> {
    principal.require_owner()?;
    state
        .services
        .plans
        .require_analytics(principal.organization_id)
        .await?;
    Ok(())
}

/// Revenue, cost and profit totals for a date range
#[utoipa::path(
    get,
    path = "/api/v1/analytics/summary",
    params(AnalyticsQuery),
    responses(
        (status = 200, description = "Summary for the range", body = SummaryResponse),
        (status = 403, description = "Plan does not include analytics", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Analytics"
)]
pub async fn summary(
    State(state): State<AppState>,
    principal: Principal,
    ApiQuery(query): ApiQuery<AnalyticsQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    authorize(&state, &principal).await?;
    let analytics = &state.services.analytics;
    let range = analytics.range(&query)?;
    let summary = analytics.summary(&principal, &range).await?;
    Ok(success_response(SummaryResponse { summary, range }))
}

#[utoipa::path(
    get,
    path = "/api/v1/analytics/products/top",
    params(AnalyticsQuery),
    responses(
        (status = 200, description = "Best performing variants", body = TopProductsResponse),
        (status = 403, description = "Plan does not include analytics", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Analytics"
)]
pub async fn top_products(
    State(state): State<AppState>,
    principal: Principal,
    ApiQuery(query): ApiQuery<AnalyticsQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    authorize(&state, &principal).await?;
    let analytics = &state.services.analytics;
    let range = analytics.range(&query)?;
    let sort_by = query.sort_by.unwrap_or_default();
    let products = analytics
        .top_products(&principal, &range, sort_by, query.limit)
        .await?;
    Ok(success_response(TopProductsResponse {
        products,
        sort_by,
        range,
    }))
}

#[utoipa::path(
    get,
    path = "/api/v1/analytics/sales/daily",
    params(AnalyticsQuery),
    responses(
        (status = 200, description = "Per-day revenue and profit", body = DailySalesResponse),
        (status = 403, description = "Plan does not include analytics", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Analytics"
)]
pub async fn daily_sales(
    State(state): State<AppState>,
    principal: Principal,
    ApiQuery(query): ApiQuery<AnalyticsQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    authorize(&state, &principal).await?;
    let analytics = &state.services.analytics;
    let range = analytics.range(&query)?;
    let daily_sales = analytics.daily_sales(&principal, &range).await?;
    Ok(success_response(DailySalesResponse { daily_sales, range }))
}
