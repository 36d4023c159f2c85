use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::services::plan_enforcer::ResourceKind;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// JSON body returned for every failed request.
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Bad Request",
    "message": "Insufficient stock",
    "variant_id": "550e8400-e29b-41d4-a716-446655440000",
    "available": 2,
    "requested": 5,
    "request_id": "req-abc123xyz",
    "timestamp": "2025-03-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_plan: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade_required: Option<bool>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// RFC 3339 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("{0}")]
    ValidationError(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Insufficient stock")]
    InsufficientStock {
        variant_id: Uuid,
        available: i32,
        requested: i32,
    },

    #[error("Stock cannot be negative")]
    NegativeStock {
        variant_id: Uuid,
        available: i32,
        adjustment: i32,
    },

    #[error("{resource} limit reached for your current plan")]
    LimitReached {
        resource: ResourceKind,
        limit: u64,
        current_count: u64,
    },

    #[error("{feature} is not available on the {plan} plan")]
    FeatureNotInPlan { feature: String, plan: String },

    #[error("No active subscription found for organization {0}")]
    NoActiveSubscription(Uuid),

    #[error("{0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    pub fn not_found(kind: &str, id: impl std::fmt::Display) -> Self {
        ServiceError::NotFound(format!("{} not found: {}", kind, id))
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError(_) | Self::InsufficientStock { .. } | Self::NegativeStock { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::LimitReached { .. } | Self::FeatureNotInPlan { .. } | Self::Forbidden(_) => {
                StatusCode::FORBIDDEN
            }
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NoActiveSubscription(_) | Self::DatabaseError(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) => "Internal server error".to_string(),
            Self::NoActiveSubscription(_) => "No active subscription found".to_string(),
            _ => self.to_string(),
        }
    }

    /// Builds the response body, carrying the structured fields clients
    /// need to render stock and upgrade prompts.
    pub fn to_error_response(&self) -> ErrorResponse {
        let status = self.status_code();
        let mut body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            ..Default::default()
        };

        match self {
            Self::InsufficientStock {
                variant_id,
                available,
                requested,
            } => {
                body.variant_id = Some(*variant_id);
                body.available = Some(*available);
                body.requested = Some(*requested);
            }
            Self::NegativeStock {
                variant_id,
                available,
                ..
            } => {
                body.variant_id = Some(*variant_id);
                body.available = Some(*available);
            }
            Self::LimitReached {
                limit,
                current_count,
                ..
            } => {
                body.limit = Some(*limit);
                body.current_count = Some(*current_count);
                body.upgrade_required = Some(true);
            }
            Self::FeatureNotInPlan { plan, .. } => {
                body.current_plan = Some(plan.clone());
                body.upgrade_required = Some(true);
            }
            _ => {}
        }

        body
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(self.to_error_response())).into_response()
    }
}
