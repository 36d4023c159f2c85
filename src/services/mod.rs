// Stock and sales
pub mod inventory_ledger;
pub mod sales;

// Plans and tenancy
pub mod members;
pub mod plan_enforcer;
pub mod subscriptions;

// Catalog
pub mod catalog;

// Reporting
pub mod analytics;
