//! bstock API library
//!
//! Multi-tenant inventory and point-of-sale backend: transactional stock
//! deduction for sales, plan-based capacity limits and sales analytics.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{
    http::HeaderValue,
    middleware,
    routing::{get, post},
    Router,
};
use sea_orm::DatabaseConnection;
use std::{sync::Arc, time::Duration};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};

use crate::{auth::AuthService, config::AppConfig, handlers::AppServices};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: AppConfig,
    pub auth: Arc<AuthService>,
    pub services: AppServices,
}

impl AppState {
    /// Wires every service against one pool.
    pub fn new(db: Arc<DatabaseConnection>, config: AppConfig) -> Self {
        let auth = Arc::new(AuthService::new(&config.jwt_secret, config.jwt_expiration));
        let services = AppServices::new(db.clone(), &config);
        Self {
            db,
            config,
            auth,
            services,
        }
    }
}

/// Authenticated `/api/v1` routes plus the public health probe.
pub fn api_v1_routes(auth: Arc<AuthService>) -> Router<AppState> {
    let protected = Router::new()
        // Sales
        .route(
            "/sales",
            post(handlers::sales::create_sale).get(handlers::sales::list_sales),
        )
        .route("/sales/:id", get(handlers::sales::get_sale))
        .route(
            "/sales/:id/payment-proof",
            post(handlers::sales::attach_payment_proof),
        )
        // Variants
        .route("/variants/low-stock", get(handlers::variants::low_stock))
        .route(
            "/variants/:id",
            axum::routing::put(handlers::variants::update_variant),
        )
        .route(
            "/variants/:id/adjust-stock",
            post(handlers::variants::adjust_stock),
        )
        .route(
            "/variants/:id/movements",
            get(handlers::variants::list_movements),
        )
        // Products
        .route(
            "/products",
            post(handlers::products::create_product).get(handlers::products::list_products),
        )
        .route("/products/:id", get(handlers::products::get_product))
        // Members
        .route("/users", get(handlers::users::list_users))
        .route("/users/invite", post(handlers::users::invite_user))
        .route(
            "/users/:id",
            axum::routing::delete(handlers::users::remove_user),
        )
        // Subscriptions
        .route(
            "/subscriptions/plans",
            get(handlers::subscriptions::list_plans),
        )
        .route(
            "/subscriptions/current",
            get(handlers::subscriptions::current_subscription),
        )
        .route(
            "/subscriptions/change-plan",
            post(handlers::subscriptions::change_plan),
        )
        // Analytics
        .route("/analytics/summary", get(handlers::analytics::summary))
        .route(
            "/analytics/products/top",
            get(handlers::analytics::top_products),
        )
        .route(
            "/analytics/sales/daily",
            get(handlers::analytics::daily_sales),
        )
        .route_layer(middleware::from_fn_with_state(auth, auth::auth_middleware));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .merge(protected)
}

/// CORS from configuration: explicit origins when given, permissive only
/// where configuration allows it.
pub fn cors_layer(cfg: &AppConfig) -> CorsLayer {
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    match configured_origins {
        Some(origins) => CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any),
        None if cfg.should_allow_permissive_cors() => CorsLayer::permissive(),
        None => CorsLayer::new(),
    }
}

/// The complete HTTP application: `/api/v1`, root health, OpenAPI docs
/// and the shared middleware stack.
pub fn build_router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.request_timeout_secs.max(1));
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api/v1", api_v1_routes(state.auth.clone()))
        .merge(openapi::swagger_ui())
        .with_state(state)
        .layer(TimeoutLayer::new(timeout))
        .layer(CompressionLayer::new())
        .layer(cors)
        // HTTP tracing layer for consistent request/response telemetry
        .layer(crate::tracing::configure_http_tracing())
        // Ensure every request carries a request id for traceability
        .layer(middleware::from_fn(crate::tracing::request_id_middleware))
}

pub mod prelude {
    pub use crate::auth::{Principal, Role};
    pub use crate::errors::*;
    pub use crate::services::{
        analytics::AnalyticsAggregator, inventory_ledger::InventoryLedger,
        plan_enforcer::PlanEnforcer, sales::SaleTransactionCoordinator,
    };
    pub use crate::{build_router, AppState};
}
