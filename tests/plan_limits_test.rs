mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use axum::http::{Method, StatusCode};
use bstock_api::{
    auth::Role,
    config::LimitEnforcement,
    entities::subscription,
    errors::ServiceError,
    services::{members::InviteUserRequest, plan_enforcer::ResourceKind},
};
use common::{next_phone, product_request, variant_request, TestApp, TestOrg};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde_json::json;

async fn fill_products(app: &TestApp, org: &TestOrg, count: usize) {
    for i in 0..count {
        let sku = format!("ITEM-{i:03}");
        app.variant(org, &sku, dec!(1), dec!(2), 1).await;
    }
}

fn invite(role: Role) -> InviteUserRequest {
    InviteUserRequest {
        phone_number: next_phone(),
        password: "cashier-pass".to_string(),
        role,
    }
}

#[tokio::test]
async fn free_plan_rejects_sixteenth_product_with_upgrade_prompt() {
    let app = TestApp::new().await;
    let org = app.organization("Ubungo Spares", "free").await;
    fill_products(&app, &org, 15).await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/products",
            Some(json!({
                "name": "Brake pads",
                "variants": [{ "sku": "BRAKE-1", "purchase_price": "10", "sale_price": "18", "quantity": 4 }]
            })),
            Some(&org.token),
        )
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
    assert_eq!(body["message"], "Product limit reached for your current plan");
    assert_eq!(body["limit"], 15);
    assert_eq!(body["current_count"], 15);
    assert_eq!(body["upgrade_required"], true);

    let usage = app
        .state
        .services
        .subscriptions
        .current(&org.owner)
        .await
        .unwrap()
        .usage;
    assert_eq!(usage.products.current, 15);
}

#[tokio::test]
async fn product_creation_below_limit_succeeds_over_http() {
    let app = TestApp::new().await;
    let org = app.organization("Mikocheni Florist", "free").await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/products",
            Some(json!({
                "name": "Roses",
                "category": "flowers",
                "variants": [
                    { "sku": "ROSE-RED", "attributes": { "color": "red" }, "purchase_price": "500", "sale_price": "1000", "quantity": 40 },
                    { "sku": "ROSE-WHITE", "attributes": { "color": "white" }, "sale_price": "1200", "quantity": 0 }
                ]
            })),
            Some(&org.token),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["name"], "Roses");
    assert_eq!(body["variants"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn unlimited_plan_never_blocks() {
    let app = TestApp::new().await;
    let org = app.organization("Oysterbay Deli", "pro").await;
    fill_products(&app, &org, 20).await;

    let created = app
        .state
        .services
        .catalog
        .create_product(
            &org.owner,
            product_request("Olive oil", vec![variant_request("OLIVE", dec!(5), dec!(9), 3)]),
        )
        .await;
    assert!(created.is_ok());
}

#[tokio::test]
async fn missing_subscription_is_an_internal_error() {
    let app = TestApp::new().await;
    let org = app.organization("Temeke Tailors", "free").await;
    subscription::Entity::delete_many()
        .filter(subscription::Column::OrganizationId.eq(org.id()))
        .exec(app.state.db.as_ref())
        .await
        .unwrap();

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/products",
            Some(json!({
                "name": "Suit",
                "variants": [{ "sku": "SUIT", "purchase_price": "50", "sale_price": "90", "quantity": 1 }]
            })),
            Some(&org.token),
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "No active subscription found");
}

#[tokio::test]
async fn canceled_subscription_counts_as_missing() {
    let app = TestApp::new().await;
    let org = app.organization("Kinondoni Cycles", "growth").await;
    subscription::Entity::update_many()
        .col_expr(
            subscription::Column::Status,
            sea_orm::sea_query::Expr::value("canceled"),
        )
        .filter(subscription::Column::OrganizationId.eq(org.id()))
        .exec(app.state.db.as_ref())
        .await
        .unwrap();

    let err = app
        .state
        .services
        .plans
        .check_limit(org.id(), ResourceKind::Product)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NoActiveSubscription(id) if id == org.id());
}

#[tokio::test]
async fn strict_mode_enforces_limit_inside_transaction() {
    let app = TestApp::with_enforcement(LimitEnforcement::Strict).await;
    assert!(app.state.services.plans.is_strict());
    let org = app.organization("Mbagala Hardware", "free").await;
    fill_products(&app, &org, 15).await;

    let err = app
        .state
        .services
        .catalog
        .create_product(
            &org.owner,
            product_request("Paint", vec![variant_request("PAINT", dec!(5), dec!(9), 3)]),
        )
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::LimitReached {
            resource: ResourceKind::Product,
            limit: 15,
            current_count: 15
        }
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn strict_mode_holds_under_concurrent_creators() {
    let app = TestApp::with_enforcement(LimitEnforcement::Strict).await;
    let org = app.organization("Kimara Wholesale", "free").await;
    fill_products(&app, &org, 13).await;

    let catalog = app.state.services.catalog.clone();
    let mut handles = Vec::new();
    for i in 0..5 {
        let catalog = Arc::clone(&catalog);
        let owner = org.owner;
        handles.push(tokio::spawn(async move {
            let sku = format!("RACE-{i}");
            catalog
                .create_product(
                    &owner,
                    product_request(&sku, vec![variant_request(&sku, dec!(1), dec!(2), 1)]),
                )
                .await
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await.expect("task panicked") {
            Ok(_) => created += 1,
            Err(ServiceError::LimitReached { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(created, 2);

    let usage = app
        .state
        .services
        .subscriptions
        .current(&org.owner)
        .await
        .unwrap()
        .usage;
    assert_eq!(usage.products.current, 15);
}

#[tokio::test]
async fn user_limit_counts_the_owner() {
    let app = TestApp::new().await;
    let org = app.organization("Kigamboni Fish Market", "free").await;
    let members = app.state.services.members.clone();

    members
        .invite_user(&org.owner, invite(Role::Cashier))
        .await
        .expect("second member fits the free plan");

    let err = members
        .invite_user(&org.owner, invite(Role::Cashier))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::LimitReached {
            resource: ResourceKind::User,
            limit: 2,
            current_count: 2
        }
    );
}

#[tokio::test]
async fn only_owners_manage_members() {
    let app = TestApp::new().await;
    let org = app.organization("Mwananyamala Salon", "growth").await;
    let cashier_token = app.token_for(&org.cashier());

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/users/invite",
            Some(json!({ "phone_number": next_phone(), "password": "secret1", "role": "cashier" })),
            Some(&cashier_token),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/users/invite",
            Some(json!({ "phone_number": next_phone(), "password": "secret1", "role": "cashier" })),
            Some(&org.token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["role"], "cashier");
    let invited = body["user_id"].as_str().unwrap().to_string();

    let (status, body) = app
        .request(Method::GET, "/api/v1/users", None, Some(&org.token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, _) = app
        .request(Method::GET, "/api/v1/users", None, Some(&cashier_token))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .request(
            Method::DELETE,
            &format!("/api/v1/users/{}", org.owner.user_id),
            None,
            Some(&org.token),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .request(
            Method::DELETE,
            &format!("/api/v1/users/{invited}"),
            None,
            Some(&org.token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .request(
            Method::DELETE,
            &format!("/api/v1/users/{invited}"),
            None,
            Some(&org.token),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
