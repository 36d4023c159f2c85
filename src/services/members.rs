use crate::{
    auth::{hash_password, Principal, Role},
    db::DbPool,
    entities::{organization, organization_user, user},
    errors::ServiceError,
    services::plan_enforcer::{PlanEnforcer, ResourceKind},
};
use chrono::{DateTime, Utc};
use sea_orm::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct InviteUserRequest {
    #[validate(length(min = 6, max = 20, message = "phone_number is required"))]
    pub phone_number: String,
    #[validate(length(min = 6, message = "password must be at least 6 characters"))]
    pub password: String,
    pub role: Role,
}

/// A membership joined with the member's public user fields.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Member {
    pub membership_id: Uuid,
    pub user_id: Uuid,
    pub phone_number: String,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

impl Member {
    fn from_parts(membership: organization_user::Model, user: &user::Model) -> Self {
        Self {
            membership_id: membership.id,
            user_id: membership.user_id,
            phone_number: user.phone_number.clone(),
            role: membership.role,
            joined_at: membership.created_at,
        }
    }
}

/// Organization membership management.
#[derive(Debug, Clone)]
pub struct MemberService {
    db: Arc<DbPool>,
    plans: Arc<PlanEnforcer>,
}

impl MemberService {
    pub fn new(db: Arc<DbPool>, plans: Arc<PlanEnforcer>) -> Self {
        Self { db, plans }
    }

    /// Adds a user to the caller's organization, creating the user account
    /// when the phone number is unknown. Owner only; gated by the plan's
    /// user limit.
    #[instrument(skip(self, principal, request), fields(organization_id = %principal.organization_id))]
    pub async fn invite_user(
        &self,
        principal: &Principal,
        request: InviteUserRequest,
    ) -> Result<Member, ServiceError> {
        principal.require_owner()?;
        request.validate()?;

        let organization_id = principal.organization_id;
        if !self.plans.is_strict() {
            self.plans
                .check_limit(organization_id, ResourceKind::User)
                .await?;
        }

        let phone_number = request.phone_number.trim().to_string();
        let txn = self.db.begin().await?;
        if self.plans.is_strict() {
            self.plans
                .check_limit_in(&txn, organization_id, ResourceKind::User)
                .await?;
        }

        let existing = user::Entity::find()
            .filter(user::Column::PhoneNumber.eq(phone_number.as_str()))
            .one(&txn)
            .await?;
        let user = match existing {
            Some(user) => user,
            None => {
                user::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    phone_number: Set(phone_number),
                    password_hash: Set(hash_password(&request.password)?),
                    created_at: Set(Utc::now()),
                }
                .insert(&txn)
                .await?
            }
        };

        let already_member = organization_user::Entity::find()
            .filter(organization_user::Column::OrganizationId.eq(organization_id))
            .filter(organization_user::Column::UserId.eq(user.id))
            .one(&txn)
            .await?
            .is_some();
        if already_member {
            return Err(ServiceError::Conflict(
                "user is already a member of this organization".to_string(),
            ));
        }

        let membership = organization_user::ActiveModel {
            id: Set(Uuid::new_v4()),
            organization_id: Set(organization_id),
            user_id: Set(user.id),
            role: Set(request.role),
            created_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        info!(user_id = %user.id, role = %membership.role, "member added");
        Ok(Member::from_parts(membership, &user))
    }

    /// Members with their phone numbers; owner only.
    pub async fn list_members(&self, principal: &Principal) -> Result<Vec<Member>, ServiceError> {
        principal.require_owner()?;
        let rows = organization_user::Entity::find()
            .filter(organization_user::Column::OrganizationId.eq(principal.organization_id))
            .order_by_asc(organization_user::Column::CreatedAt)
            .find_also_related(user::Entity)
            .all(self.db.as_ref())
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(membership, user)| {
                user.map(|user| Member::from_parts(membership, &user))
            })
            .collect())
    }

    /// Removes a member. The organization's owner cannot be removed.
    #[instrument(skip(self, principal), fields(organization_id = %principal.organization_id))]
    pub async fn remove_member(
        &self,
        principal: &Principal,
        user_id: Uuid,
    ) -> Result<(), ServiceError> {
        principal.require_owner()?;
        let db = self.db.as_ref();

        let org = organization::Entity::find_by_id(principal.organization_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Organization", principal.organization_id))?;
        if org.owner_id == user_id {
            return Err(ServiceError::Forbidden(
                "the organization owner cannot be removed".to_string(),
            ));
        }

        let result = organization_user::Entity::delete_many()
            .filter(organization_user::Column::OrganizationId.eq(principal.organization_id))
            .filter(organization_user::Column::UserId.eq(user_id))
            .exec(db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::not_found("Member", user_id));
        }

        info!(user_id = %user_id, "member removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_password_fails_validation() {
        let request = InviteUserRequest {
            phone_number: "+255700000001".to_string(),
            password: "123".to_string(),
            role: Role::Cashier,
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn role_deserializes_from_lowercase() {
        let request: InviteUserRequest = serde_json::from_str(
            r#"{"phone_number":"+255700000001","password":"secret1","role":"cashier"}"#,
        )
        .unwrap();
        assert_eq!(request.role, Role::Cashier);
    }
}
