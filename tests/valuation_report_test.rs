mod common;

use axum::http::StatusCode;
use common::TestApp;
use serde_json::{json, Value};
use uuid::Uuid;

const BASE: &str = "/api/inventory/costing";

async fn create_product(app: &TestApp, code: &str, category: &str, standard_cost: Option<f64>) -> Uuid {
    let mut body = json!({
        "code": code,
        "name": format!("Product {code}"),
        "category": category,
    });
    if let Some(sc) = standard_cost {
        body["standard_cost"] = json!(sc);
    }
    let (status, response) = app.post(&format!("{BASE}/products"), body).await;
    assert_eq!(status, StatusCode::CREATED, "body: {response}");
    response["id"]
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .expect("product id expected")
}

async fn create_layer(
    app: &TestApp,
    product_id: Uuid,
    warehouse_id: Uuid,
    quantity: f64,
    unit_cost: f64,
    received_date: &str,
) {
    let (status, response) = app
        .post(
            &format!("{BASE}/layers"),
            json!({
                "product_id": product_id,
                "warehouse_id": warehouse_id,
                "quantity": quantity,
                "unit_cost": unit_cost,
                "received_date": received_date,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "body: {response}");
}

async fn commit_issue(app: &TestApp, product_id: Uuid, warehouse_id: Uuid, quantity: f64) {
    let (status, response) = app
        .post(
            &format!("{BASE}/calculate-cogs"),
            json!({
                "product_id": product_id,
                "warehouse_id": warehouse_id,
                "quantity": quantity,
                "method": "FIFO",
                "dry_run": false,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "body: {response}");
}

fn as_decimal(value: &Value) -> f64 {
    match value {
        Value::String(s) => s.parse().expect("numeric string expected"),
        Value::Number(n) => n.as_f64().expect("number expected"),
        other => panic!("unexpected value: {other}"),
    }
}

#[tokio::test]
async fn valuation_report_totals_by_product_and_category() {
    let app = TestApp::new().await;
    let warehouse = Uuid::new_v4();
    let widget = create_product(&app, "VAL-W1", "Widgets", None).await;
    let gadget = create_product(&app, "VAL-G1", "Gadgets", None).await;
    create_layer(&app, widget, warehouse, 10.0, 5.0, "2026-01-01T00:00:00Z").await;
    create_layer(&app, widget, warehouse, 10.0, 7.0, "2026-01-02T00:00:00Z").await;
    create_layer(&app, gadget, warehouse, 4.0, 10.0, "2026-01-03T00:00:00Z").await;

    let (status, report) = app.get(&format!("{BASE}/valuation")).await;
    assert_eq!(status, StatusCode::OK, "body: {report}");
    assert_eq!(as_decimal(&report["total_value"]), 160.0);
    assert_eq!(as_decimal(&report["total_quantity"]), 24.0);
    assert_eq!(report["product_count"], json!(2));

    let categories = report["by_category"].as_array().expect("categories");
    assert_eq!(categories.len(), 2);
    assert_eq!(categories[0]["category"], json!("Widgets"));
    assert_eq!(as_decimal(&categories[0]["value_percent"]), 75.0);
    assert_eq!(categories[1]["category"], json!("Gadgets"));
    assert_eq!(as_decimal(&categories[1]["value_percent"]), 25.0);
}

#[tokio::test]
async fn valuation_reflects_committed_consumption() {
    let app = TestApp::new().await;
    let warehouse = Uuid::new_v4();
    let product = create_product(&app, "VAL-C1", "Widgets", None).await;
    create_layer(&app, product, warehouse, 10.0, 5.0, "2026-01-01T00:00:00Z").await;
    create_layer(&app, product, warehouse, 10.0, 7.0, "2026-01-02T00:00:00Z").await;

    commit_issue(&app, product, warehouse, 15.0).await;

    // 5 units remain on the newer layer at $7
    let (status, report) = app.get(&format!("{BASE}/valuation")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(as_decimal(&report["total_value"]), 35.0);
    assert_eq!(as_decimal(&report["total_quantity"]), 5.0);
}

#[tokio::test]
async fn as_of_valuation_replays_consumption_history() {
    let app = TestApp::new().await;
    let warehouse = Uuid::new_v4();
    let product = create_product(&app, "VAL-H1", "Widgets", None).await;
    create_layer(&app, product, warehouse, 10.0, 5.0, "2026-01-01T00:00:00Z").await;

    commit_issue(&app, product, warehouse, 4.0).await;

    // Before the layer was received there was nothing to value
    let (status, before) = app
        .get(&format!("{BASE}/valuation?as_of=2025-12-31"))
        .await;
    assert_eq!(status, StatusCode::OK, "body: {before}");
    assert_eq!(as_decimal(&before["total_value"]), 0.0);
    assert_eq!(before["product_count"], json!(0));

    // Today's consumption already applies, leaving 6 units at $5
    let (status, now) = app.get(&format!("{BASE}/valuation")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(as_decimal(&now["total_value"]), 30.0);
}

#[tokio::test]
async fn valuation_honors_warehouse_filter() {
    let app = TestApp::new().await;
    let east = Uuid::new_v4();
    let west = Uuid::new_v4();
    let product = create_product(&app, "VAL-WH1", "Widgets", None).await;
    create_layer(&app, product, east, 10.0, 5.0, "2026-01-01T00:00:00Z").await;
    create_layer(&app, product, west, 3.0, 5.0, "2026-01-01T00:00:00Z").await;

    let (status, report) = app
        .get(&format!("{BASE}/valuation?warehouse_id={east}"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(as_decimal(&report["total_quantity"]), 10.0);
    assert_eq!(as_decimal(&report["total_value"]), 50.0);
}

#[tokio::test]
async fn cogs_report_aggregates_committed_consumption() {
    let app = TestApp::new().await;
    let warehouse = Uuid::new_v4();
    let product = create_product(&app, "COGS-R1", "Widgets", None).await;
    create_layer(&app, product, warehouse, 10.0, 5.0, "2026-01-01T00:00:00Z").await;
    create_layer(&app, product, warehouse, 10.0, 7.0, "2026-01-02T00:00:00Z").await;

    commit_issue(&app, product, warehouse, 15.0).await;

    let (status, report) = app
        .get(&format!(
            "{BASE}/cogs-report?start_date=2026-01-01&end_date=2030-12-31"
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "body: {report}");
    assert_eq!(as_decimal(&report["total_quantity"]), 15.0);
    assert_eq!(as_decimal(&report["total_cogs"]), 85.0);

    let by_product = report["by_product"].as_array().expect("by_product");
    assert_eq!(by_product.len(), 1);
    assert_eq!(by_product[0]["product_code"], json!("COGS-R1"));
    assert_eq!(by_product[0]["event_count"], json!(2));

    let by_category = report["by_category"].as_array().expect("by_category");
    assert_eq!(by_category[0]["category"], json!("Widgets"));
    assert_eq!(as_decimal(&by_category[0]["total_cogs"]), 85.0);

    let monthly = report["monthly"].as_array().expect("monthly");
    assert_eq!(monthly.len(), 1);
    assert_eq!(as_decimal(&monthly[0]["total_cogs"]), 85.0);
}

#[tokio::test]
async fn cogs_report_excludes_events_outside_the_range() {
    let app = TestApp::new().await;
    let warehouse = Uuid::new_v4();
    let product = create_product(&app, "COGS-R2", "Widgets", None).await;
    create_layer(&app, product, warehouse, 10.0, 5.0, "2026-01-01T00:00:00Z").await;
    commit_issue(&app, product, warehouse, 2.0).await;

    let (status, report) = app
        .get(&format!(
            "{BASE}/cogs-report?start_date=2020-01-01&end_date=2020-12-31"
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(as_decimal(&report["total_cogs"]), 0.0);
    assert!(report["by_product"].as_array().expect("rows").is_empty());
}

#[tokio::test]
async fn cogs_report_rejects_inverted_date_range() {
    let app = TestApp::new().await;
    let (status, _) = app
        .get(&format!(
            "{BASE}/cogs-report?start_date=2026-02-01&end_date=2026-01-01"
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .get(&format!(
            "{BASE}/cogs-report?start_date=not-a-date&end_date=2026-01-01"
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn variance_analysis_compares_standard_against_actual() {
    let app = TestApp::new().await;
    let warehouse = Uuid::new_v4();
    // Standard $6 vs actual $5: favorable by $1 per unit over 10 units
    let under = create_product(&app, "VAR-U1", "Widgets", Some(6.0)).await;
    create_layer(&app, under, warehouse, 10.0, 5.0, "2026-01-01T00:00:00Z").await;
    // Standard $4 vs actual $5: unfavorable
    let over = create_product(&app, "VAR-O1", "Widgets", Some(4.0)).await;
    create_layer(&app, over, warehouse, 2.0, 5.0, "2026-01-01T00:00:00Z").await;
    // No standard cost, must not appear
    let plain = create_product(&app, "VAR-P1", "Widgets", None).await;
    create_layer(&app, plain, warehouse, 5.0, 5.0, "2026-01-01T00:00:00Z").await;

    let (status, report) = app.get(&format!("{BASE}/variance-analysis")).await;
    assert_eq!(status, StatusCode::OK, "body: {report}");
    assert_eq!(report["product_count"], json!(2));
    assert_eq!(as_decimal(&report["total_favorable_impact"]), 10.0);
    assert_eq!(as_decimal(&report["total_unfavorable_impact"]), -2.0);

    // Sorted by absolute impact, the $10 favorable row leads
    let rows = report["products"].as_array().expect("rows");
    assert_eq!(rows[0]["product_code"], json!("VAR-U1"));
    assert_eq!(rows[0]["favorable"], json!(true));
    assert_eq!(as_decimal(&rows[0]["variance"]), 1.0);
    assert_eq!(rows[1]["product_code"], json!("VAR-O1"));
    assert_eq!(rows[1]["favorable"], json!(false));
}
