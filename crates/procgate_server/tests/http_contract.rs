//! HTTP contract tests for the procgate server.
//!
//! The router is driven with `oneshot` over the in-memory adapters, so these
//! run without a database. They pin down the wire shape callers rely on:
//! the response envelope, status codes and the execute/audit round trip.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use http_body_util::BodyExt;
use hyper::{Request, StatusCode};
use procgate_core::allow_list::StaticAllowList;
use procgate_core::memory::{MemoryCatalog, MemoryExecutionLogStore, MemoryProcedureExecutor};
use procgate_core::ports::RowSet;
use procgate_core::types::ParameterDescriptor;
use procgate_core::{ExecutionConfig, ProcedureService};
use procgate_server::router::build_router;
use serde_json::{json, Value};
use tower::ServiceExt;

// ── Test app builder ───────────────────────────────────────────

fn service(config: ExecutionConfig) -> ProcedureService {
    let catalog = Arc::new(MemoryCatalog::new());
    catalog.add_procedure(
        "sales",
        "get_orders",
        vec![ParameterDescriptor::new("@customerId", "int")],
    );
    catalog.add_procedure("sales", "slow_report", vec![]);
    catalog.add_schema("hr");

    let executor = Arc::new(MemoryProcedureExecutor::new());
    executor.register("sales", "get_orders", |_| {
        Ok(RowSet::from_values(
            &["orderId", "total"],
            vec![vec![json!(1001), json!(250.0)]],
        ))
    });
    executor.register_slow("sales", "slow_report", Duration::from_secs(45), |_| {
        Ok(RowSet::default())
    });

    ProcedureService::new(
        catalog,
        executor,
        Arc::new(MemoryExecutionLogStore::new()),
        config,
    )
}

fn build_test_app() -> axum::Router {
    build_router(Arc::new(service(ExecutionConfig::default())))
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: Body) -> (StatusCode, Value) {
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(body)
                .unwrap(),
        )
        .await
        .unwrap();
    let status = resp.status();
    (status, body_json(resp).await)
}

async fn get(app: &axum::Router, uri: &str) -> (StatusCode, Value) {
    send(app, "GET", uri, Body::empty()).await
}

async fn post_json(app: &axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(app, "POST", uri, Body::from(body.to_string())).await
}

// ── Helper to read response body ───────────────────────────────

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| json!({ "raw": String::from_utf8_lossy(&bytes).to_string() }))
}

const EXECUTE_ORDERS: &str = "/api/procedures/sales/get_orders/execute";

// ── Tests ───────────────────────────────────────────────────────

#[tokio::test]
async fn health_is_ok() {
    let app = build_test_app();
    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn execute_returns_rows_and_log_id() {
    let app = build_test_app();
    let (status, body) = post_json(
        &app,
        EXECUTE_ORDERS,
        json!({ "parameters": { "customerId": "7" } }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["statusCode"], 200);
    assert_eq!(body["data"]["columns"], json!(["orderId", "total"]));
    assert_eq!(body["data"]["rows"], json!([[1001, 250.0]]));
    assert_eq!(body["data"]["rowCount"], 1);
    assert!(body.get("message").is_none());

    let id = body["id"].as_i64().unwrap();
    let (status, log) = get(&app, &format!("/api/execution-logs/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(log["data"]["id"], id);
    assert_eq!(log["data"]["schemaName"], "sales");
    assert_eq!(log["data"]["procedureName"], "get_orders");
    assert_eq!(log["data"]["parameters"][0]["name"], "customerId");
    assert_eq!(log["data"]["parameters"][0]["valueAsText"], "7");
}

#[tokio::test]
async fn missing_parameter_is_400_with_message() {
    let app = build_test_app();
    let (status, body) = post_json(&app, EXECUTE_ORDERS, json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["statusCode"], 400);
    assert_eq!(body["message"], "missing required parameter: customerId");
    assert!(body.get("data").is_none());
}

#[tokio::test]
async fn empty_body_means_no_parameters() {
    let app = build_test_app();
    let (status, body) = send(&app, "POST", EXECUTE_ORDERS, Body::empty()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "missing required parameter: customerId");
}

#[tokio::test]
async fn malformed_body_is_400() {
    let app = build_test_app();
    let (status, body) = send(&app, "POST", EXECUTE_ORDERS, Body::from("{oops")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .starts_with("Invalid request body"));
}

#[tokio::test]
async fn unknown_procedure_is_400_and_not_audited() {
    let app = build_test_app();
    let (status, body) = post_json(
        &app,
        "/api/procedures/sales/ghost/execute",
        json!({ "parameters": {} }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Procedure 'sales.ghost' does not exist.");

    let (status, _) = get(&app, "/api/execution-logs/latest").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_identifier_is_400() {
    let app = build_test_app();
    let (status, body) = post_json(
        &app,
        "/api/procedures/sales;drop/get_orders/execute",
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid schema or procedure name.");
}

#[tokio::test]
async fn allow_list_denial_is_401() {
    let restricted = service(ExecutionConfig::default()).with_allow_list(Arc::new(
        StaticAllowList::new(HashMap::from([(
            "sales".to_string(),
            vec!["slow_report".to_string()],
        )])),
    ));
    let app = build_router(Arc::new(restricted));

    let (status, body) = post_json(
        &app,
        EXECUTE_ORDERS,
        json!({ "parameters": { "customerId": 7 } }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["statusCode"], 401);
}

#[tokio::test(start_paused = true)]
async fn timeout_is_499() {
    let app = build_test_app();
    let (status, body) = post_json(
        &app,
        "/api/procedures/sales/slow_report/execute",
        json!({}),
    )
    .await;
    assert_eq!(status.as_u16(), 499);
    assert_eq!(body["statusCode"], 499);
    assert_eq!(body["message"], "Request cancelled.");
}

#[tokio::test]
async fn diagnostic_mode_adds_expected_parameters() {
    let config = ExecutionConfig::default().with_diagnostic_errors(true);
    let app = build_router(Arc::new(service(config)));
    let (status, body) = post_json(&app, EXECUTE_ORDERS, json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["message"],
        "missing required parameter: customerId. Expected parameters: customerId"
    );
}

#[tokio::test]
async fn catalog_endpoints() {
    let app = build_test_app();

    let (status, body) = get(&app, "/api/procedures/schemas").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([{ "name": "hr" }, { "name": "sales" }]));

    let (status, body) = get(&app, "/api/procedures/sales/procedures").await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["get_orders", "slow_report"]);

    let (status, body) = get(&app, "/api/procedures/sales/get_orders/parameters").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["name"], "customerId");
    assert_eq!(body["data"][0]["sqlType"], "int");

    let (status, body) = get(&app, "/api/procedures/nowhere/procedures").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Schema 'nowhere' does not exist.");
}

#[tokio::test]
async fn execution_log_reads() {
    let app = build_test_app();
    for customer in [1, 2, 3] {
        let (status, _) = post_json(
            &app,
            EXECUTE_ORDERS,
            json!({ "parameters": { "customerId": customer } }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = get(&app, "/api/execution-logs/recent?top=2").await;
    assert_eq!(status, StatusCode::OK);
    let recent = body["data"].as_array().unwrap();
    assert_eq!(recent.len(), 2);
    assert!(recent[0]["id"].as_i64() > recent[1]["id"].as_i64());

    let (status, latest) = get(&app, "/api/execution-logs/latest").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(latest["data"]["id"], recent[0]["id"]);

    let (status, body) =
        get(&app, "/api/execution-logs/query?schemaName=sales&procedureName=get_orders").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 3);

    let (status, body) = get(&app, "/api/execution-logs/query?schemaName=hr").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));

    let (status, body) = get(&app, "/api/execution-logs/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Execution log 999 not found.");
}

#[tokio::test]
async fn malformed_log_requests_use_the_envelope() {
    let app = build_test_app();

    let (status, body) = get(&app, "/api/execution-logs/abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["statusCode"], 400);
    assert!(body["message"].as_str().is_some_and(|m| !m.is_empty()));

    let (status, body) = get(&app, "/api/execution-logs/query?fromUtc=yesterday").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["statusCode"], 400);
    assert!(body["message"].as_str().is_some_and(|m| !m.is_empty()));

    let (status, body) = get(&app, "/api/execution-logs/recent?top=many").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["statusCode"], 400);
}
