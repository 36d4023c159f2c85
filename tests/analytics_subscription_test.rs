mod common;

use std::str::FromStr;

use axum::http::{Method, StatusCode};
use bstock_api::services::sales::{SaleLineRequest, SaleRequest};
use common::{TestApp, TestOrg};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use uuid::Uuid;

fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).expect("decimal string"),
        Value::Number(n) => Decimal::from_str(&n.to_string()).expect("decimal number"),
        other => panic!("not a decimal: {other}"),
    }
}

async fn sell(app: &TestApp, org: &TestOrg, lines: &[(Uuid, i32)]) {
    app.state
        .services
        .sales
        .process_sale(
            &org.owner,
            SaleRequest {
                payment_method: "cash".to_string(),
                items: lines
                    .iter()
                    .map(|(variant_id, quantity)| SaleLineRequest {
                        variant_id: variant_id.to_string(),
                        quantity: *quantity,
                    })
                    .collect(),
            },
        )
        .await
        .expect("sale committed");
}

async fn plan_id(app: &TestApp, org: &TestOrg, name: &str) -> String {
    let (status, body) = app
        .request(Method::GET, "/api/v1/subscriptions/plans", None, Some(&org.token))
        .await;
    assert_eq!(status, StatusCode::OK);
    body.as_array()
        .unwrap()
        .iter()
        .find(|p| p["name"] == name)
        .map(|p| p["id"].as_str().unwrap().to_string())
        .expect("plan listed")
}

#[tokio::test]
async fn analytics_requires_a_plan_that_includes_it() {
    let app = TestApp::new().await;
    let org = app.organization("Kunduchi Curios", "free").await;

    let (status, body) = app
        .request(Method::GET, "/api/v1/analytics/summary", None, Some(&org.token))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["current_plan"], "free");
    assert_eq!(body["upgrade_required"], true);
}

#[tokio::test]
async fn analytics_is_owner_only() {
    let app = TestApp::new().await;
    let org = app.organization("Masaki Wines", "growth").await;
    let cashier_token = app.token_for(&org.cashier());

    let (status, _) = app
        .request(
            Method::GET,
            "/api/v1/analytics/sales/daily",
            None,
            Some(&cashier_token),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn summary_top_products_and_daily_sales_reflect_recorded_sales() {
    let app = TestApp::new().await;
    let org = app.organization("Posta Supermarket", "growth").await;
    let sugar = app.variant(&org, "SUGAR", dec!(60), dec!(100), 50).await;
    let flour = app.variant(&org, "FLOUR", dec!(20), dec!(30), 50).await;

    sell(&app, &org, &[(sugar.id, 5)]).await;
    sell(&app, &org, &[(flour.id, 8), (sugar.id, 1)]).await;

    let (status, body) = app
        .request(Method::GET, "/api/v1/analytics/summary", None, Some(&org.token))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    // sugar 6 x 100 + flour 8 x 30
    assert_eq!(decimal(&body["summary"]["total_revenue"]), dec!(840));
    assert_eq!(decimal(&body["summary"]["total_cost"]), dec!(520));
    assert_eq!(decimal(&body["summary"]["gross_profit"]), dec!(320));
    assert_eq!(body["summary"]["transaction_count"], 2);
    assert_eq!(body["summary"]["items_sold"], 14);
    assert!(body["start_date"].is_string());
    assert!(body["end_date"].is_string());

    let (status, body) = app
        .request(
            Method::GET,
            "/api/v1/analytics/products/top",
            None,
            Some(&org.token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["sort_by"], "quantity");
    let products = body["products"].as_array().unwrap();
    assert_eq!(products.len(), 2);
    assert_eq!(products[0]["sku"], "FLOUR");
    assert_eq!(products[0]["total_quantity"], 8);

    let (_, body) = app
        .request(
            Method::GET,
            "/api/v1/analytics/products/top?sort_by=profit&limit=1",
            None,
            Some(&org.token),
        )
        .await;
    let products = body["products"].as_array().unwrap();
    assert_eq!(products.len(), 1);
    assert_eq!(products[0]["sku"], "SUGAR");
    assert_eq!(decimal(&products[0]["total_profit"]), dec!(240));

    let (status, body) = app
        .request(
            Method::GET,
            "/api/v1/analytics/sales/daily",
            None,
            Some(&org.token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let days = body["daily_sales"].as_array().unwrap();
    assert_eq!(days.len(), 1);
    assert_eq!(days[0]["transactions"], 2);
    assert_eq!(decimal(&days[0]["revenue"]), dec!(840));
}

#[tokio::test]
async fn analytics_rejects_inverted_range_and_ignores_other_tenants() {
    let app = TestApp::new().await;
    let org = app.organization("Mlimani Stationery", "growth").await;
    let other = app.organization("Chuo Stationery", "growth").await;
    let ream = app.variant(&other, "REAM", dec!(5), dec!(8), 10).await;
    sell(&app, &other, &[(ream.id, 2)]).await;

    let (status, _) = app
        .request(
            Method::GET,
            "/api/v1/analytics/summary?start_date=2025-03-10&end_date=2025-03-01",
            None,
            Some(&org.token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .request(Method::GET, "/api/v1/analytics/summary", None, Some(&org.token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"]["transaction_count"], 0);
    assert_eq!(decimal(&body["summary"]["total_revenue"]), Decimal::ZERO);
}

#[tokio::test]
async fn plan_listing_marks_current_plan() {
    let app = TestApp::new().await;
    let org = app.organization("Makumbusho Gallery", "growth").await;

    let (status, body) = app
        .request(Method::GET, "/api/v1/subscriptions/plans", None, Some(&org.token))
        .await;
    assert_eq!(status, StatusCode::OK);
    let plans = body.as_array().unwrap();
    let names: Vec<&str> = plans.iter().map(|p| p["name"].as_str().unwrap()).collect();
    assert_eq!(names, ["free", "growth", "pro"]);
    let current: Vec<&str> = plans
        .iter()
        .filter(|p| p["is_current"] == true)
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert_eq!(current, ["growth"]);

    let (status, body) = app
        .request(
            Method::GET,
            "/api/v1/subscriptions/current",
            None,
            Some(&org.token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["plan"]["name"], "growth");
    assert_eq!(body["subscription"]["status"], "active");
    assert_eq!(body["usage"]["users"]["current"], 1);
    assert_eq!(body["usage"]["users"]["limit"], 10);
}

#[tokio::test]
async fn downgrade_is_refused_when_usage_exceeds_new_plan() {
    let app = TestApp::new().await;
    let org = app.organization("Mwenge Market Stall", "growth").await;
    for i in 0..16 {
        app.variant(&org, &format!("STALL-{i:02}"), dec!(1), dec!(2), 1).await;
    }
    let free = plan_id(&app, &org, "free").await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/subscriptions/change-plan",
            Some(json!({ "plan_id": free })),
            Some(&org.token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .starts_with("cannot downgrade: you have 16 products"));

    let (_, body) = app
        .request(
            Method::GET,
            "/api/v1/subscriptions/current",
            None,
            Some(&org.token),
        )
        .await;
    assert_eq!(body["plan"]["name"], "growth");
}

#[tokio::test]
async fn upgrade_lifts_the_product_cap() {
    let app = TestApp::new().await;
    let org = app.organization("Mabibo Hardware", "free").await;
    for i in 0..15 {
        app.variant(&org, &format!("BOLT-{i:02}"), dec!(1), dec!(2), 1).await;
    }
    let growth = plan_id(&app, &org, "growth").await;

    let cashier_token = app.token_for(&org.cashier());
    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/subscriptions/change-plan",
            Some(json!({ "plan_id": growth })),
            Some(&cashier_token),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/subscriptions/change-plan",
            Some(json!({ "plan_id": growth })),
            Some(&org.token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["plan"]["name"], "growth");
    assert!(body["subscription"]["current_period_end"].is_string());
    assert_eq!(body["usage"]["products"]["current"], 15);

    app.variant(&org, "BOLT-15", dec!(1), dec!(2), 1).await;
}

#[tokio::test]
async fn health_reports_database_status() {
    let app = TestApp::new().await;

    for uri in ["/health", "/api/v1/health"] {
        let (status, body) = app.request(Method::GET, uri, None, None).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        assert_eq!(body["status"], "up");
        assert_eq!(body["database"], "up");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = TestApp::new().await;
    let (status, body) = app
        .request(Method::GET, "/api-docs/openapi.json", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/api/v1/sales"].is_object());
}
