//! Concurrent sales and adjustments against shared stock.
//!
//! With `TEST_DATABASE_URL` pointing at Postgres these run on an
//! eight-connection pool, so row locks and the ascending lock order decide
//! the outcome. On SQLite the single-connection pool queues writers.

mod common;

use std::sync::Arc;

use bstock_api::{
    errors::ServiceError,
    services::sales::{SaleLineRequest, SaleRequest},
};
use common::TestApp;
use rust_decimal_macros::dec;
use uuid::Uuid;

fn sale(lines: &[(Uuid, i32)]) -> SaleRequest {
    SaleRequest {
        payment_method: "cash".to_string(),
        items: lines
            .iter()
            .map(|(variant_id, quantity)| SaleLineRequest {
                variant_id: variant_id.to_string(),
                quantity: *quantity,
            })
            .collect(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sales_never_oversell() {
    let app = TestApp::new().await;
    let org = app.organization("Buguruni Textiles", "free").await;
    let kitenge = app.variant(&org, "KITENGE", dec!(6), dec!(10), 10).await;

    let sales = app.state.services.sales.clone();
    let mut handles = Vec::new();
    for _ in 0..5 {
        let sales = Arc::clone(&sales);
        let principal = org.cashier();
        let variant_id = kitenge.id;
        handles.push(tokio::spawn(async move {
            sales.process_sale(&principal, sale(&[(variant_id, 3)])).await
        }));
    }

    let mut committed = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.expect("task panicked") {
            Ok(_) => committed += 1,
            Err(ServiceError::InsufficientStock { requested: 3, .. }) => rejected += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(committed, 3);
    assert_eq!(rejected, 2);
    assert_eq!(app.quantity_of(&org, kitenge.id).await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn opposite_line_orders_complete_without_deadlock() {
    let app = TestApp::new().await;
    let org = app.organization("Magomeni Shoes", "free").await;
    let left = app.variant(&org, "SANDAL-L", dec!(4), dec!(9), 100).await;
    let right = app.variant(&org, "SANDAL-R", dec!(4), dec!(9), 100).await;

    let sales = app.state.services.sales.clone();
    let mut handles = Vec::new();
    for i in 0..10 {
        let sales = Arc::clone(&sales);
        let principal = org.cashier();
        let lines = if i % 2 == 0 {
            [(left.id, 1), (right.id, 1)]
        } else {
            [(right.id, 1), (left.id, 1)]
        };
        handles.push(tokio::spawn(async move {
            sales.process_sale(&principal, sale(&lines)).await
        }));
    }

    let outcome = tokio::time::timeout(std::time::Duration::from_secs(30), async {
        for handle in handles {
            handle.await.expect("task panicked").expect("sale committed");
        }
    })
    .await;
    assert!(outcome.is_ok(), "sales did not finish");

    assert_eq!(app.quantity_of(&org, left.id).await, 90);
    assert_eq!(app.quantity_of(&org, right.id).await, 90);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn adjustments_and_sales_interleave_without_lost_updates() {
    let app = TestApp::new().await;
    let org = app.organization("Mwenge Crafts", "free").await;
    let carving = app.variant(&org, "CARVING", dec!(15), dec!(40), 20).await;

    let sales = app.state.services.sales.clone();
    let ledger = app.state.services.ledger.clone();
    let mut handles = Vec::new();
    for i in 0..6 {
        let principal = org.owner;
        let variant_id = carving.id;
        if i % 2 == 0 {
            let sales = Arc::clone(&sales);
            handles.push(tokio::spawn(async move {
                sales
                    .process_sale(&principal, sale(&[(variant_id, 2)]))
                    .await
                    .map(|_| ())
            }));
        } else {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ledger
                    .adjust_stock(&principal, variant_id, 5, Some("restock"))
                    .await
                    .map(|_| ())
            }));
        }
    }
    for handle in handles {
        handle.await.expect("task panicked").expect("operation succeeded");
    }

    // 20 - 3 * 2 + 3 * 5
    assert_eq!(app.quantity_of(&org, carving.id).await, 29);
}
