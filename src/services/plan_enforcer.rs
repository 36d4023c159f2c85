use crate::{
    config::LimitEnforcement,
    db::DbPool,
    entities::{organization_user, plan, product, subscription},
    errors::ServiceError,
};
use metrics::counter;
use sea_orm::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// A resource whose per-organization count is capped by the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Product,
    User,
}

impl ResourceKind {
    /// The plan's cap for this resource; `None` is unlimited.
    pub fn limit_of(&self, plan: &plan::Model) -> Option<i32> {
        match self {
            ResourceKind::Product => plan.product_limit,
            ResourceKind::User => plan.user_limit,
        }
    }

    /// Counts the organization's existing rows of this kind.
    pub async fn count<C: ConnectionTrait>(
        &self,
        conn: &C,
        organization_id: Uuid,
    ) -> Result<u64, DbErr> {
        match self {
            ResourceKind::Product => {
                product::Entity::find()
                    .filter(product::Column::OrganizationId.eq(organization_id))
                    .count(conn)
                    .await
            }
            ResourceKind::User => {
                organization_user::Entity::find()
                    .filter(organization_user::Column::OrganizationId.eq(organization_id))
                    .count(conn)
                    .await
            }
        }
    }
}

/// Capacity decision for a resource given its limit and current count.
/// Creation is permitted iff `current_count < limit`.
pub fn evaluate_limit(
    resource: ResourceKind,
    limit: Option<i32>,
    current_count: u64,
) -> Result<(), ServiceError> {
    match limit {
        None => Ok(()),
        Some(limit) => {
            let limit = limit.max(0) as u64;
            if current_count < limit {
                Ok(())
            } else {
                Err(ServiceError::LimitReached {
                    resource,
                    limit,
                    current_count,
                })
            }
        }
    }
}

/// An organization's subscription together with its plan.
#[derive(Debug, Clone)]
pub struct ActivePlan {
    pub subscription: subscription::Model,
    pub plan: plan::Model,
}

/// Current count and cap for one resource.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
pub struct UsageEntry {
    pub current: u64,
    pub limit: Option<i32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
pub struct Usage {
    pub products: UsageEntry,
    pub users: UsageEntry,
}

/// Resolves plans and gates creation of capped resources.
#[derive(Debug, Clone)]
pub struct PlanEnforcer {
    db: Arc<DbPool>,
    mode: LimitEnforcement,
}

impl PlanEnforcer {
    pub fn new(db: Arc<DbPool>, mode: LimitEnforcement) -> Self {
        Self { db, mode }
    }

    pub fn is_strict(&self) -> bool {
        self.mode == LimitEnforcement::Strict
    }

    /// Organization -> subscription -> plan. Missing or canceled
    /// subscriptions are reported as `NoActiveSubscription`.
    #[instrument(skip(self))]
    pub async fn resolve_plan(&self, organization_id: Uuid) -> Result<ActivePlan, ServiceError> {
        let subscription = subscription::Entity::find()
            .filter(subscription::Column::OrganizationId.eq(organization_id))
            .one(self.db.as_ref())
            .await?;
        Self::attach_plan(self.db.as_ref(), organization_id, subscription).await
    }

    async fn attach_plan<C: ConnectionTrait>(
        conn: &C,
        organization_id: Uuid,
        subscription: Option<subscription::Model>,
    ) -> Result<ActivePlan, ServiceError> {
        let subscription = subscription
            .filter(|s| s.status.is_active())
            .ok_or(ServiceError::NoActiveSubscription(organization_id))?;

        let plan = plan::Entity::find_by_id(subscription.plan_id)
            .one(conn)
            .await?
            .ok_or_else(|| {
                warn!(
                    organization_id = %organization_id,
                    plan_id = %subscription.plan_id,
                    "subscription references a missing plan"
                );
                ServiceError::NoActiveSubscription(organization_id)
            })?;

        Ok(ActivePlan { subscription, plan })
    }

    /// Read-then-decide capacity check. The count and the subsequent create
    /// are separate round-trips, so concurrent creators can overshoot.
    #[instrument(skip(self))]
    pub async fn check_limit(
        &self,
        organization_id: Uuid,
        resource: ResourceKind,
    ) -> Result<(), ServiceError> {
        let active = self.resolve_plan(organization_id).await?;
        let limit = resource.limit_of(&active.plan);
        if limit.is_none() {
            return Ok(());
        }
        let count = resource.count(self.db.as_ref(), organization_id).await?;
        Self::record(organization_id, resource, evaluate_limit(resource, limit, count))
    }

    /// Capacity check evaluated inside the caller's creation transaction.
    /// Locks the organization's subscription row first so concurrent
    /// creators for the same organization queue behind each other.
    #[instrument(skip(self, txn))]
    pub async fn check_limit_in(
        &self,
        txn: &DatabaseTransaction,
        organization_id: Uuid,
        resource: ResourceKind,
    ) -> Result<(), ServiceError> {
        let subscription = subscription::Entity::find()
            .filter(subscription::Column::OrganizationId.eq(organization_id))
            .lock_exclusive()
            .one(txn)
            .await?;
        let active = Self::attach_plan(txn, organization_id, subscription).await?;
        let limit = resource.limit_of(&active.plan);
        if limit.is_none() {
            return Ok(());
        }
        let count = resource.count(txn, organization_id).await?;
        Self::record(organization_id, resource, evaluate_limit(resource, limit, count))
    }

    fn record(
        organization_id: Uuid,
        resource: ResourceKind,
        decision: Result<(), ServiceError>,
    ) -> Result<(), ServiceError> {
        if let Err(ServiceError::LimitReached {
            limit,
            current_count,
            ..
        }) = &decision
        {
            counter!("bstock_plan.limit_denied", 1, "resource" => resource.to_string());
            info!(
                organization_id = %organization_id,
                resource = %resource,
                limit,
                current_count,
                "plan limit reached"
            );
        }
        decision
    }

    /// Fails unless the organization's plan includes analytics.
    #[instrument(skip(self))]
    pub async fn require_analytics(&self, organization_id: Uuid) -> Result<ActivePlan, ServiceError> {
        let active = self.resolve_plan(organization_id).await?;
        if !active.plan.analytics_enabled {
            return Err(ServiceError::FeatureNotInPlan {
                feature: "Analytics".to_string(),
                plan: active.plan.name.clone(),
            });
        }
        Ok(active)
    }

    /// Current counts against the plan's caps.
    pub async fn usage(&self, organization_id: Uuid, plan: &plan::Model) -> Result<Usage, ServiceError> {
        let db = self.db.as_ref();
        Ok(Usage {
            products: UsageEntry {
                current: ResourceKind::Product.count(db, organization_id).await?,
                limit: plan.product_limit,
            },
            users: UsageEntry {
                current: ResourceKind::User.count(db, organization_id).await?,
                limit: plan.user_limit,
            },
        })
    }
}
