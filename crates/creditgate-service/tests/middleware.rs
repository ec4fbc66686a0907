//! Metering middleware tests on a stand-in application router.

mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use axum_test::TestServer;
use common::TestHarness;

use creditgate_service::with_metering;

fn metered_app(harness: &TestHarness) -> TestServer {
    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/market/overview", get(|| async { "overview" }))
        .route("/api/stock/search", get(|| async { "results" }))
        .route(
            "/api/ai/chat",
            get(|| async { (StatusCode::BAD_GATEWAY, "model unavailable") }),
        );
    let app = with_metering(app, Arc::new(harness.state.clone()));
    TestServer::new(app).expect("Failed to create test server")
}

async fn balance(harness: &TestHarness) -> i64 {
    harness
        .state
        .meter
        .account(&harness.test_principal)
        .await
        .unwrap()
        .balance
}

#[tokio::test]
async fn successful_billable_request_is_charged() {
    let harness = TestHarness::new();
    let server = metered_app(&harness);

    let response = server
        .get("/api/stock/search")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_ok();
    response.assert_text("results");
    assert_eq!(response.headers()["x-credit-balance"], "98");
    assert_eq!(balance(&harness).await, 98);
}

#[tokio::test]
async fn failed_billable_request_is_not_charged() {
    let harness = TestHarness::new();
    let server = metered_app(&harness);

    let response = server
        .get("/api/ai/chat")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status(StatusCode::BAD_GATEWAY);
    assert_eq!(balance(&harness).await, 100);
}

#[tokio::test]
async fn anonymous_billable_request_is_refused() {
    let harness = TestHarness::new();
    let server = metered_app(&harness);

    let response = server
        .get("/api/stock/search")
        .add_header("x-forwarded-for", "203.0.113.4")
        .await;

    response.assert_status_unauthorized();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "authentication_required");
}

#[tokio::test]
async fn free_endpoint_is_rate_limited_per_ip() {
    let harness = TestHarness::with_config(|config| {
        config.rate_limits.default_limits.per_minute = 2;
    });
    let server = metered_app(&harness);

    for remaining in ["1", "0"] {
        let response = server
            .get("/api/market/overview")
            .add_header("x-forwarded-for", "203.0.113.4")
            .await;
        response.assert_status_ok();
        assert_eq!(response.headers()["x-ratelimit-remaining"], remaining);
    }

    server
        .get("/api/market/overview")
        .add_header("x-forwarded-for", "203.0.113.4")
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);

    server
        .get("/api/market/overview")
        .add_header("x-forwarded-for", "203.0.113.5")
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn exempt_paths_bypass_metering() {
    let harness = TestHarness::with_config(|config| {
        config.rate_limits.default_limits.per_minute = 1;
    });
    let server = metered_app(&harness);

    for _ in 0..3 {
        let response = server.get("/health").await;
        response.assert_status_ok();
        assert!(response.headers().get("x-ratelimit-limit").is_none());
    }
}

#[tokio::test]
async fn invalid_token_is_rejected_before_handler() {
    let harness = TestHarness::new();
    let server = metered_app(&harness);

    server
        .get("/api/market/overview")
        .add_header("authorization", "Bearer garbage")
        .await
        .assert_status_unauthorized();
}
