#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use bstock_api::{
    auth::{Principal, Role},
    config::{AppConfig, LimitEnforcement},
    db,
    entities::variant,
    services::{
        catalog::{CreateProductRequest, CreateVariantRequest, ProductWithVariants},
        subscriptions::{seed_default_plans, RegisteredOrganization},
    },
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ConnectionTrait, Database};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

const TEST_SECRET: &str =
    "integration_suite_signing_key_with_enough_entropy_for_validation_7Hq2Lm9Xw4";

static PHONE_SEQ: AtomicU32 = AtomicU32::new(1);

/// Unique phone number per call; users are keyed by phone.
pub fn next_phone() -> String {
    format!("+25571{:07}", PHONE_SEQ.fetch_add(1, Ordering::SeqCst))
}

/// Set to a Postgres server URL to run the suites against a fresh database
/// per test with a multi-connection pool, where row locks are real.
pub const TEST_DATABASE_URL: &str = "TEST_DATABASE_URL";

/// Application state and router backed by a throwaway SQLite file, or a
/// throwaway Postgres database when `TEST_DATABASE_URL` is set.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _dir: TempDir,
}

/// A registered organization plus a token for its owner.
pub struct TestOrg {
    pub registered: RegisteredOrganization,
    pub owner: Principal,
    pub token: String,
}

impl TestOrg {
    pub fn id(&self) -> Uuid {
        self.owner.organization_id
    }

    /// A cashier of this organization. No user row is created; the token
    /// carries everything handlers need.
    pub fn cashier(&self) -> Principal {
        Principal::new(Uuid::new_v4(), self.id(), Role::Cashier)
    }
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_enforcement(LimitEnforcement::Advisory).await
    }

    pub async fn with_enforcement(mode: LimitEnforcement) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let database_url = match std::env::var(TEST_DATABASE_URL) {
            Ok(server) => fresh_postgres_database(&server).await,
            Err(_) => format!(
                "sqlite://{}?mode=rwc",
                dir.path().join("bstock_test.db").display()
            ),
        };

        let mut cfg = AppConfig::new(
            database_url,
            TEST_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 8;
        cfg.db_min_connections = 1;
        cfg.plan_limit_enforcement = mode;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        seed_default_plans(&pool).await.expect("seed plans");

        let state = AppState::new(Arc::new(pool), cfg);
        let router = bstock_api::build_router(state.clone());

        Self {
            router,
            state,
            _dir: dir,
        }
    }

    /// Registers an organization on `plan` and returns its owner token.
    pub async fn organization(&self, name: &str, plan: &str) -> TestOrg {
        let registered = self
            .state
            .services
            .subscriptions
            .register_organization(name, &next_phone(), "owner-pass", plan)
            .await
            .expect("register organization");
        let owner = registered.owner_principal();
        let token = self.token_for(&owner);
        TestOrg {
            registered,
            owner,
            token,
        }
    }

    pub fn token_for(&self, principal: &Principal) -> String {
        self.state.auth.issue_token(principal).expect("issue token")
    }

    /// Creates a one-variant product and returns the variant.
    pub async fn variant(
        &self,
        org: &TestOrg,
        sku: &str,
        purchase_price: Decimal,
        sale_price: Decimal,
        quantity: i32,
    ) -> variant::Model {
        let mut created = self
            .product(
                org,
                sku,
                vec![variant_request(sku, purchase_price, sale_price, quantity)],
            )
            .await;
        created.variants.remove(0)
    }

    pub async fn product(
        &self,
        org: &TestOrg,
        name: &str,
        variants: Vec<CreateVariantRequest>,
    ) -> ProductWithVariants {
        self.state
            .services
            .catalog
            .create_product(&org.owner, product_request(name, variants))
            .await
            .expect("create product")
    }

    pub async fn quantity_of(&self, org: &TestOrg, variant_id: Uuid) -> i32 {
        self.state
            .services
            .ledger
            .find_scoped(&org.owner, variant_id)
            .await
            .expect("variant exists")
            .quantity
    }

    /// Send a request against the router with an optional bearer token and
    /// decode the JSON body (`Null` when empty).
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request");

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read response body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }
}

pub fn is_postgres() -> bool {
    std::env::var(TEST_DATABASE_URL).is_ok()
}

/// Creates an empty database on the server and returns its URL.
async fn fresh_postgres_database(server_url: &str) -> String {
    let (base, query) = match server_url.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (server_url, None),
    };
    let name = format!("bstock_test_{}", Uuid::new_v4().simple());

    let admin = Database::connect(server_url)
        .await
        .expect("connect to TEST_DATABASE_URL");
    admin
        .execute_unprepared(&format!("CREATE DATABASE {name}"))
        .await
        .expect("create test database");
    admin.close().await.expect("close admin connection");

    let server = base.rsplit_once('/').map_or(base, |(server, _)| server);
    match query {
        Some(query) => format!("{server}/{name}?{query}"),
        None => format!("{server}/{name}"),
    }
}

pub fn variant_request(
    sku: &str,
    purchase_price: Decimal,
    sale_price: Decimal,
    quantity: i32,
) -> CreateVariantRequest {
    CreateVariantRequest {
        attributes: HashMap::new(),
        sku: sku.to_string(),
        purchase_price,
        sale_price,
        quantity,
        min_stock_level: 5,
        unit_type: None,
    }
}

pub fn product_request(name: &str, variants: Vec<CreateVariantRequest>) -> CreateProductRequest {
    CreateProductRequest {
        name: name.to_string(),
        description: None,
        category: Some("general".to_string()),
        image_url: None,
        vendor_id: None,
        variants,
    }
}
