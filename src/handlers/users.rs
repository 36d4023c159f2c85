use axum::{
    extract::State,
    response::IntoResponse,
};
use uuid::Uuid;

use crate::{
    auth::Principal,
    errors::{ErrorResponse, ServiceError},
    handlers::{
        common::{created_response, success_response, ApiJson, ApiPath, MessageResponse},
        AppState,
    },
    services::members::{InviteUserRequest, Member},
};

/// Add a user to the organization
#[utoipa::path(
    post,
    path = "/api/v1/users/invite",
    request_body = InviteUserRequest,
    responses(
        (status = 201, description = "Member added", body = Member),
        (status = 403, description = "Not an owner, or user limit reached", body = ErrorResponse),
        (status = 409, description = "Already a member", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn invite_user(
    State(state): State<AppState>,
    principal: Principal,
    ApiJson(payload): ApiJson<InviteUserRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let member = state
        .services
        .members
        .invite_user(&principal, payload)
        .await?;
    Ok(created_response(member))
}

#[utoipa::path(
    get,
    path = "/api/v1/users",
    responses(
        (status = 200, description = "Organization members", body = [Member]),
        (status = 403, description = "Caller is not the owner", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn list_users(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<impl IntoResponse, ServiceError> {
    let members = state.services.members.list_members(&principal).await?;
    Ok(success_response(members))
}

#[utoipa::path(
    delete,
    path = "/api/v1/users/{id}",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "Member removed", body = MessageResponse),
        (status = 403, description = "Not an owner, or removing the owner", body = ErrorResponse),
        (status = 404, description = "Not a member", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn remove_user(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.members.remove_member(&principal, id).await?;
    Ok(success_response(MessageResponse::new("member removed")))
}
