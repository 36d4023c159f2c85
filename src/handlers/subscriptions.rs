use axum::{
    extract::State,
    response::IntoResponse,
};

use crate::{
    auth::Principal,
    errors::{ErrorResponse, ServiceError},
    handlers::{
        common::{success_response, ApiJson},
        AppState,
    },
    services::subscriptions::{ChangePlanRequest, CurrentSubscription, PlanListing},
};

#[utoipa::path(
    get,
    path = "/api/v1/subscriptions/plans",
    responses(
        (status = 200, description = "Available plans", body = [PlanListing])
    ),
    security(("bearer_auth" = [])),
    tag = "Subscriptions"
)]
pub async fn list_plans(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<impl IntoResponse, ServiceError> {
    let plans = state.services.subscriptions.list_plans(&principal).await?;
    Ok(success_response(plans))
}

/// Current subscription with usage against the plan's caps
#[utoipa::path(
    get,
    path = "/api/v1/subscriptions/current",
    responses(
        (status = 200, description = "Current subscription", body = CurrentSubscription),
        (status = 404, description = "No subscription", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Subscriptions"
)]
pub async fn current_subscription(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<impl IntoResponse, ServiceError> {
    let current = state.services.subscriptions.current(&principal).await?;
    Ok(success_response(current))
}

/// Switch the organization to another plan (payment is not collected)
#[utoipa::path(
    post,
    path = "/api/v1/subscriptions/change-plan",
    request_body = ChangePlanRequest,
    responses(
        (status = 200, description = "Plan changed", body = CurrentSubscription),
        (status = 400, description = "Usage exceeds the new plan's limits", body = ErrorResponse),
        (status = 403, description = "Not an owner", body = ErrorResponse),
        (status = 404, description = "Plan not found", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Subscriptions"
)]
pub async fn change_plan(
    State(state): State<AppState>,
    principal: Principal,
    ApiJson(payload): ApiJson<ChangePlanRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let updated = state
        .services
        .subscriptions
        .change_plan(&principal, payload.plan_id)
        .await?;
    Ok(success_response(updated))
}
