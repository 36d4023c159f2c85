use crate::{
    auth::{hash_password, Principal, Role},
    db::DbPool,
    entities::{
        organization, organization_user, plan,
        subscription::{self, SubscriptionStatus},
        user,
    },
    errors::ServiceError,
    services::plan_enforcer::{PlanEnforcer, ResourceKind, Usage},
};
use chrono::{Months, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

pub const FREE_PLAN: &str = "free";

/// Catalog entry used when seeding plans.
#[derive(Debug, Clone, Copy)]
pub struct PlanSeed {
    pub name: &'static str,
    pub price_monthly: Decimal,
    pub product_limit: Option<i32>,
    pub user_limit: Option<i32>,
    pub location_limit: Option<i32>,
    pub analytics_enabled: bool,
}

pub fn default_plans() -> [PlanSeed; 3] {
    [
        PlanSeed {
            name: FREE_PLAN,
            price_monthly: dec!(0),
            product_limit: Some(15),
            user_limit: Some(2),
            location_limit: Some(1),
            analytics_enabled: false,
        },
        PlanSeed {
            name: "growth",
            price_monthly: dec!(299.99),
            product_limit: Some(500),
            user_limit: Some(10),
            location_limit: Some(3),
            analytics_enabled: true,
        },
        PlanSeed {
            name: "pro",
            price_monthly: dec!(999.99),
            product_limit: None,
            user_limit: None,
            location_limit: None,
            analytics_enabled: true,
        },
    ]
}

/// Inserts any default plan that does not exist yet, matched by name.
/// Existing plans are left as they are.
pub async fn seed_default_plans<C: ConnectionTrait>(conn: &C) -> Result<Vec<plan::Model>, ServiceError> {
    let mut plans = Vec::new();
    for seed in default_plans() {
        let existing = plan::Entity::find()
            .filter(plan::Column::Name.eq(seed.name))
            .one(conn)
            .await?;
        let model = match existing {
            Some(model) => model,
            None => {
                info!(plan = seed.name, "seeding plan");
                plan::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    name: Set(seed.name.to_string()),
                    price_monthly: Set(seed.price_monthly),
                    product_limit: Set(seed.product_limit),
                    user_limit: Set(seed.user_limit),
                    location_limit: Set(seed.location_limit),
                    analytics_enabled: Set(seed.analytics_enabled),
                    created_at: Set(Utc::now()),
                }
                .insert(conn)
                .await?
            }
        };
        plans.push(model);
    }
    Ok(plans)
}

/// Rejects a plan change that would leave the organization above one of
/// the new plan's caps.
pub fn check_downgrade(new_plan: &plan::Model, products: u64, users: u64) -> Result<(), ServiceError> {
    for (resource, count) in [(ResourceKind::Product, products), (ResourceKind::User, users)] {
        if let Some(limit) = resource.limit_of(new_plan) {
            if count > limit.max(0) as u64 {
                return Err(ServiceError::ValidationError(format!(
                    "cannot downgrade: you have {} {}s but the {} plan allows only {}",
                    count,
                    resource.to_string().to_lowercase(),
                    new_plan.name,
                    limit
                )));
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PlanListing {
    #[serde(flatten)]
    pub plan: plan::Model,
    pub is_current: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CurrentSubscription {
    pub subscription: subscription::Model,
    pub plan: plan::Model,
    pub usage: Usage,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChangePlanRequest {
    pub plan_id: Uuid,
}

/// Result of creating a new tenant with its owner.
#[derive(Debug, Clone)]
pub struct RegisteredOrganization {
    pub organization: organization::Model,
    pub owner: user::Model,
    pub subscription: subscription::Model,
}

impl RegisteredOrganization {
    pub fn owner_principal(&self) -> Principal {
        Principal::new(self.owner.id, self.organization.id, Role::Owner)
    }
}

/// Plans and organization subscriptions.
#[derive(Debug, Clone)]
pub struct SubscriptionService {
    db: Arc<DbPool>,
    plans: Arc<PlanEnforcer>,
}

impl SubscriptionService {
    pub fn new(db: Arc<DbPool>, plans: Arc<PlanEnforcer>) -> Self {
        Self { db, plans }
    }

    /// Every plan, cheapest first, flagged with whether it is the
    /// caller's current one.
    pub async fn list_plans(&self, principal: &Principal) -> Result<Vec<PlanListing>, ServiceError> {
        let db = self.db.as_ref();
        let current_plan_id = subscription::Entity::find()
            .filter(subscription::Column::OrganizationId.eq(principal.organization_id))
            .one(db)
            .await?
            .map(|s| s.plan_id);

        let plans = plan::Entity::find()
            .order_by_asc(plan::Column::PriceMonthly)
            .all(db)
            .await?;

        Ok(plans
            .into_iter()
            .map(|plan| PlanListing {
                is_current: Some(plan.id) == current_plan_id,
                plan,
            })
            .collect())
    }

    #[instrument(skip(self, principal), fields(organization_id = %principal.organization_id))]
    pub async fn current(&self, principal: &Principal) -> Result<CurrentSubscription, ServiceError> {
        let db = self.db.as_ref();
        let (subscription, plan) = subscription::Entity::find()
            .filter(subscription::Column::OrganizationId.eq(principal.organization_id))
            .find_also_related(plan::Entity)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("no subscription found".to_string()))?;
        let plan = plan.ok_or(ServiceError::NoActiveSubscription(principal.organization_id))?;
        let usage = self.plans.usage(principal.organization_id, &plan).await?;

        Ok(CurrentSubscription {
            subscription,
            plan,
            usage,
        })
    }

    /// Moves the organization to another plan. Payment is not collected;
    /// the subscription becomes active for one month from now.
    #[instrument(skip(self, principal), fields(organization_id = %principal.organization_id))]
    pub async fn change_plan(
        &self,
        principal: &Principal,
        plan_id: Uuid,
    ) -> Result<CurrentSubscription, ServiceError> {
        principal.require_owner()?;
        let organization_id = principal.organization_id;

        let txn = self.db.begin().await?;
        let new_plan = plan::Entity::find_by_id(plan_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Plan", plan_id))?;

        let current = subscription::Entity::find()
            .filter(subscription::Column::OrganizationId.eq(organization_id))
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("no subscription found".to_string()))?;

        let products = ResourceKind::Product.count(&txn, organization_id).await?;
        let users = ResourceKind::User.count(&txn, organization_id).await?;
        check_downgrade(&new_plan, products, users)?;

        let now = Utc::now();
        let previous_plan_id = current.plan_id;
        let mut active: subscription::ActiveModel = current.into();
        active.plan_id = Set(new_plan.id);
        active.status = Set(SubscriptionStatus::Active);
        active.current_period_end = Set(Some(now.checked_add_months(Months::new(1)).unwrap_or(now)));
        active.updated_at = Set(now);
        let subscription = active.update(&txn).await?;

        txn.commit().await?;

        info!(
            from_plan = %previous_plan_id,
            to_plan = %new_plan.name,
            "subscription plan changed"
        );

        let usage = self.plans.usage(organization_id, &new_plan).await?;
        Ok(CurrentSubscription {
            subscription,
            plan: new_plan,
            usage,
        })
    }

    /// Creates an organization, its owner account and membership, and an
    /// active subscription to `plan_name` in one transaction.
    #[instrument(skip(self, password))]
    pub async fn register_organization(
        &self,
        name: &str,
        owner_phone: &str,
        password: &str,
        plan_name: &str,
    ) -> Result<RegisteredOrganization, ServiceError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ServiceError::ValidationError(
                "organization name is required".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let taken = organization::Entity::find()
            .filter(organization::Column::Name.eq(name))
            .one(&txn)
            .await?
            .is_some();
        if taken {
            return Err(ServiceError::Conflict(
                "organization name already taken".to_string(),
            ));
        }

        let plan = plan::Entity::find()
            .filter(plan::Column::Name.eq(plan_name))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                warn!(plan = plan_name, "plan missing; were plans seeded?");
                ServiceError::NotFound(format!("Plan not found: {}", plan_name))
            })?;

        let now = Utc::now();
        let owner = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            phone_number: Set(owner_phone.trim().to_string()),
            password_hash: Set(hash_password(password)?),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let organization_id = Uuid::new_v4();
        let subscription_id = Uuid::new_v4();
        let organization = organization::ActiveModel {
            id: Set(organization_id),
            name: Set(name.to_string()),
            owner_id: Set(owner.id),
            subscription_id: Set(Some(subscription_id)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        organization_user::ActiveModel {
            id: Set(Uuid::new_v4()),
            organization_id: Set(organization_id),
            user_id: Set(owner.id),
            role: Set(Role::Owner),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let subscription = subscription::ActiveModel {
            id: Set(subscription_id),
            organization_id: Set(organization_id),
            plan_id: Set(plan.id),
            status: Set(SubscriptionStatus::Active),
            current_period_end: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        info!(organization_id = %organization_id, plan = %plan.name, "organization registered");
        Ok(RegisteredOrganization {
            organization,
            owner,
            subscription,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn plan(name: &str, products: Option<i32>, users: Option<i32>) -> plan::Model {
        plan::Model {
            id: Uuid::new_v4(),
            name: name.to_string(),
            price_monthly: Decimal::ZERO,
            product_limit: products,
            user_limit: users,
            location_limit: None,
            analytics_enabled: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn default_plans_match_tiers() {
        let plans = default_plans();
        assert_eq!(plans.map(|p| p.name), ["free", "growth", "pro"]);
        assert_eq!(plans[0].product_limit, Some(15));
        assert!(!plans[0].analytics_enabled);
        assert_eq!(plans[2].user_limit, None);
    }

    #[test]
    fn downgrade_below_usage_is_rejected() {
        assert_matches!(
            check_downgrade(&plan("free", Some(15), Some(2)), 16, 1),
            Err(ServiceError::ValidationError(msg)) if msg.starts_with("cannot downgrade") && msg.contains("16 products")
        );
        assert_matches!(
            check_downgrade(&plan("free", Some(15), Some(2)), 3, 3),
            Err(ServiceError::ValidationError(msg)) if msg.contains("users")
        );
    }

    #[test]
    fn downgrade_at_exact_usage_is_allowed() {
        assert!(check_downgrade(&plan("free", Some(15), Some(2)), 15, 2).is_ok());
        assert!(check_downgrade(&plan("pro", None, None), 10_000, 500).is_ok());
    }
}
