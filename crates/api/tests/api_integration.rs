//! Integration tests for the API server.

use std::sync::OnceLock;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use metrics_exporter_prometheus::PrometheusHandle;
use store::MemoryStore;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup() -> (Router, api::Services<MemoryStore>) {
    let store = MemoryStore::new();
    let config = api::config::Config::default();
    let services = api::create_services(store, &config);
    let app = api::create_app(services.state.clone(), get_metrics_handle());
    (app, services)
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    user: Option<&str>,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&json).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn create_product(app: &Router, sku: &str, quantity: i64) -> String {
    let (status, json) = send(
        app,
        "POST",
        "/products",
        None,
        Some(serde_json::json!({
            "sku": sku,
            "name": "Widget",
            "description": "A widget",
            "price_cents": 1000,
            "initial_quantity": quantity
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    json["id"].as_str().unwrap().to_string()
}

fn order_body(product_id: &str, key: &str, quantity: u32) -> serde_json::Value {
    serde_json::json!({
        "idempotency_key": key,
        "lines": [{ "product_id": product_id, "quantity": quantity }]
    })
}

fn new_user() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[tokio::test]
async fn health_check() {
    let (app, _) = setup();
    let (status, json) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn metrics_endpoint_responds() {
    let (app, _) = setup();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn product_catalog_roundtrip() {
    let (app, _) = setup();
    let id = create_product(&app, "SKU-001", 7).await;

    let (status, json) = send(&app, "GET", &format!("/products/{id}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["sku"], "SKU-001");
    assert_eq!(json["quantity"], 7);

    let (status, json) = send(&app, "GET", "/products?offset=0&limit=10", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 1);
    assert_eq!(json["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn duplicate_sku_is_conflict() {
    let (app, _) = setup();
    create_product(&app, "SKU-001", 7).await;

    let (status, json) = send(
        &app,
        "POST",
        "/products",
        None,
        Some(serde_json::json!({
            "sku": "SKU-001",
            "name": "Other",
            "price_cents": 500,
            "initial_quantity": 1
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].as_str().is_some());
}

#[tokio::test]
async fn stock_adjustment_endpoint() {
    let (app, _) = setup();
    let id = create_product(&app, "SKU-001", 5).await;

    let (status, json) = send(
        &app,
        "POST",
        &format!("/products/{id}/stock"),
        None,
        Some(serde_json::json!({ "quantity_delta": -2 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["quantity"], 3);

    // Overdraw is a business rule violation
    let (status, _) = send(
        &app,
        "POST",
        &format!("/products/{id}/stock"),
        None,
        Some(serde_json::json!({ "quantity_delta": -10 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn order_placement_is_idempotent_over_http() {
    let (app, _) = setup();
    let product_id = create_product(&app, "SKU-001", 5).await;
    let user = new_user();

    let (status, first) = send(
        &app,
        "POST",
        "/orders",
        Some(&user),
        Some(order_body(&product_id, "key-1", 2)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["status"], "CREATED");
    assert_eq!(first["total"], 2000);

    // Same key replays the original order with 200
    let (status, second) = send(
        &app,
        "POST",
        "/orders",
        Some(&user),
        Some(order_body(&product_id, "key-1", 2)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["id"], first["id"]);

    // Stock was only reserved once
    let (_, product) = send(&app, "GET", &format!("/products/{product_id}"), None, None).await;
    assert_eq!(product["quantity"], 3);
}

#[tokio::test]
async fn order_requires_user_header() {
    let (app, _) = setup();
    let product_id = create_product(&app, "SKU-001", 5).await;

    let (status, json) = send(
        &app,
        "POST",
        "/orders",
        None,
        Some(order_body(&product_id, "key-1", 1)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("x-user-id"));

    let (status, _) = send(&app, "GET", "/orders", Some("not-a-uuid"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn order_error_mapping() {
    let (app, _) = setup();
    let product_id = create_product(&app, "SKU-001", 1).await;
    let user = new_user();

    // Unknown product
    let (status, _) = send(
        &app,
        "POST",
        "/orders",
        Some(&user),
        Some(order_body(&uuid::Uuid::new_v4().to_string(), "key-1", 1)),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Insufficient stock
    let (status, _) = send(
        &app,
        "POST",
        "/orders",
        Some(&user),
        Some(order_body(&product_id, "key-2", 5)),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    // Empty lines
    let (status, _) = send(
        &app,
        "POST",
        "/orders",
        Some(&user),
        Some(serde_json::json!({ "idempotency_key": "key-3", "lines": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cancel_flow_and_ownership() {
    let (app, _) = setup();
    let product_id = create_product(&app, "SKU-001", 5).await;
    let owner = new_user();

    let (_, order) = send(
        &app,
        "POST",
        "/orders",
        Some(&owner),
        Some(order_body(&product_id, "key-1", 1)),
    )
    .await;
    let order_id = order["id"].as_str().unwrap().to_string();

    // A stranger cannot see or cancel it
    let stranger = new_user();
    let (status, _) = send(
        &app,
        "GET",
        &format!("/orders/{order_id}"),
        Some(&stranger),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(
        &app,
        "POST",
        &format!("/orders/{order_id}/cancel"),
        Some(&stranger),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // The owner cancels once; the second attempt is rejected
    let (status, json) = send(
        &app,
        "POST",
        &format!("/orders/{order_id}/cancel"),
        Some(&owner),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "CANCELLED");

    let (status, _) = send(
        &app,
        "POST",
        &format!("/orders/{order_id}/cancel"),
        Some(&owner),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn orders_list_is_scoped_to_caller() {
    let (app, _) = setup();
    let product_id = create_product(&app, "SKU-001", 5).await;
    let user_a = new_user();
    let user_b = new_user();

    send(
        &app,
        "POST",
        "/orders",
        Some(&user_a),
        Some(order_body(&product_id, "key-a", 1)),
    )
    .await;
    send(
        &app,
        "POST",
        "/orders",
        Some(&user_b),
        Some(order_body(&product_id, "key-b", 1)),
    )
    .await;

    let (status, json) = send(&app, "GET", "/orders", Some(&user_a), None).await;
    assert_eq!(status, StatusCode::OK);
    let orders = json.as_array().unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0]["idempotency_key"], "key-a");
}

#[tokio::test]
async fn order_event_flows_to_notifications() {
    let (app, services) = setup();
    let product_id = create_product(&app, "SKU-001", 5).await;
    let user = new_user();

    let mut rx = services.broker.subscribe("order.created").await;

    let (status, _) = send(
        &app,
        "POST",
        "/orders",
        Some(&user),
        Some(order_body(&product_id, "key-1", 1)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Drain outbox through the relay and consume the event
    let summary = services.relay.run_once().await.unwrap();
    assert_eq!(summary.published, 1);
    let message = rx.recv().await.unwrap();
    assert!(
        services
            .state
            .ingestor
            .handle(&message.payload)
            .await
            .unwrap()
    );

    let (status, json) = send(&app, "GET", "/notifications", Some(&user), None).await;
    assert_eq!(status, StatusCode::OK);
    let notifications = json.as_array().unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0]["status"], "RECEIVED");
}
