//! Bearer-token authentication.
//!
//! Tokens are HS256 JWTs carrying the user, the organization the session is
//! scoped to and the member's role. Every handler receives the decoded
//! [`Principal`]; all data access is filtered by its `organization_id`.

use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHasher,
};
use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use utoipa::ToSchema;

use crate::errors::ServiceError;

/// Member role inside an organization.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    #[sea_orm(string_value = "owner")]
    Owner,
    #[sea_orm(string_value = "cashier")]
    Cashier,
}

/// JWT claims
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

/// The authenticated caller and the tenant every query is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub role: Role,
}

impl Principal {
    pub fn new(user_id: Uuid, organization_id: Uuid, role: Role) -> Self {
        Self {
            user_id,
            organization_id,
            role,
        }
    }

    pub fn is_owner(&self) -> bool {
        self.role == Role::Owner
    }

    pub fn require_owner(&self) -> Result<(), ServiceError> {
        if self.is_owner() {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(
                "this action requires the owner role".to_string(),
            ))
        }
    }
}

impl From<Claims> for Principal {
    fn from(claims: Claims) -> Self {
        Principal::new(claims.user_id, claims.organization_id, claims.role)
    }
}

/// Issues and validates access tokens.
#[derive(Clone)]
pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_ttl: ChronoDuration,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("token_ttl", &self.token_ttl)
            .finish_non_exhaustive()
    }
}

impl AuthService {
    pub fn new(secret: &str, token_ttl_secs: usize) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            token_ttl: ChronoDuration::seconds(token_ttl_secs as i64),
        }
    }

    pub fn issue_token(&self, principal: &Principal) -> Result<String, ServiceError> {
        let now = Utc::now();
        let claims = Claims {
            user_id: principal.user_id,
            organization_id: principal.organization_id,
            role: principal.role,
            iat: now.timestamp(),
            exp: (now + self.token_ttl).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ServiceError::InternalError(format!("token creation failed: {}", e)))
    }

    pub fn validate_token(&self, token: &str) -> Result<Principal, ServiceError> {
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::new(Algorithm::HS256))
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    ServiceError::Unauthorized("token expired".to_string())
                }
                _ => ServiceError::Unauthorized("invalid token".to_string()),
            })?;

        Ok(data.claims.into())
    }
}

/// Rejects requests without a valid bearer token and stores the decoded
/// [`Principal`] in the request extensions.
pub async fn auth_middleware(
    State(auth): State<Arc<AuthService>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ServiceError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or_else(|| ServiceError::Unauthorized("missing bearer token".to_string()))?;

    let principal = auth.validate_token(token)?;
    debug!(
        user_id = %principal.user_id,
        organization_id = %principal.organization_id,
        role = %principal.role,
        "authenticated request"
    );
    request.extensions_mut().insert(principal);

    Ok(next.run(request).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .copied()
            .ok_or_else(|| ServiceError::Unauthorized("authentication required".to_string()))
    }
}

/// Hashes a password into an Argon2id PHC string.
pub fn hash_password(password: &str) -> Result<String, ServiceError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ServiceError::InternalError(format!("password hashing failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const SECRET: &str = "a_sufficiently_long_signing_key_for_unit_tests_with_many_distinct_chars_9f3";

    #[test]
    fn token_round_trips_principal() {
        let auth = AuthService::new(SECRET, 3600);
        let principal = Principal::new(Uuid::new_v4(), Uuid::new_v4(), Role::Cashier);
        let token = auth.issue_token(&principal).unwrap();
        assert_eq!(auth.validate_token(&token).unwrap(), principal);
    }

    #[test]
    fn token_signed_with_other_key_is_rejected() {
        let issuer = AuthService::new("another_signing_key_that_is_long_enough_for_the_test_suite_xyz_01", 3600);
        let verifier = AuthService::new(SECRET, 3600);
        let token = issuer
            .issue_token(&Principal::new(Uuid::new_v4(), Uuid::new_v4(), Role::Owner))
            .unwrap();
        assert!(matches!(
            verifier.validate_token(&token),
            Err(ServiceError::Unauthorized(_))
        ));
    }

    #[test]
    fn cashier_is_not_owner() {
        let principal = Principal::new(Uuid::new_v4(), Uuid::new_v4(), Role::Cashier);
        assert!(matches!(
            principal.require_owner(),
            Err(ServiceError::Forbidden(_))
        ));
    }

    #[test]
    fn role_parses_from_lowercase() {
        assert_eq!(Role::from_str("owner").unwrap(), Role::Owner);
        assert_eq!(Role::Cashier.to_string(), "cashier");
        assert!(Role::from_str("admin").is_err());
    }

    #[test]
    fn password_hash_is_salted_argon2id() {
        use argon2::{PasswordHash, PasswordVerifier};

        let hash = hash_password("till-pin-2291").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert_ne!(hash, hash_password("till-pin-2291").unwrap());

        let parsed = PasswordHash::new(&hash).unwrap();
        assert!(Argon2::default()
            .verify_password(b"till-pin-2291", &parsed)
            .is_ok());
        assert!(Argon2::default().verify_password(b"wrong", &parsed).is_err());
    }
}
