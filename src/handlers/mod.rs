pub mod analytics;
pub mod common;
pub mod health;
pub mod products;
pub mod sales;
pub mod subscriptions;
pub mod users;
pub mod variants;

use crate::{
    config::AppConfig,
    db::DbPool,
    services::{
        analytics::AnalyticsAggregator, catalog::CatalogService, inventory_ledger::InventoryLedger,
        members::MemberService, plan_enforcer::PlanEnforcer, sales::SaleTransactionCoordinator,
        subscriptions::SubscriptionService,
    },
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone, Debug)]
pub struct AppServices {
    pub plans: Arc<PlanEnforcer>,
    pub ledger: Arc<InventoryLedger>,
    pub sales: Arc<SaleTransactionCoordinator>,
    pub catalog: Arc<CatalogService>,
    pub members: Arc<MemberService>,
    pub subscriptions: Arc<SubscriptionService>,
    pub analytics: Arc<AnalyticsAggregator>,
}

impl AppServices {
    pub fn new(db_pool: Arc<DbPool>, config: &AppConfig) -> Self {
        let plans = Arc::new(PlanEnforcer::new(
            db_pool.clone(),
            config.plan_limit_enforcement,
        ));

        Self {
            ledger: Arc::new(InventoryLedger::new(db_pool.clone())),
            sales: Arc::new(SaleTransactionCoordinator::new(db_pool.clone())),
            catalog: Arc::new(CatalogService::new(db_pool.clone(), plans.clone())),
            members: Arc::new(MemberService::new(db_pool.clone(), plans.clone())),
            subscriptions: Arc::new(SubscriptionService::new(db_pool.clone(), plans.clone())),
            analytics: Arc::new(AnalyticsAggregator::new(db_pool)),
            plans,
        }
    }
}
