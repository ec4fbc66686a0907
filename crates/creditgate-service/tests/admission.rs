//! Admission gate integration tests.

mod common;

use axum::http::StatusCode;
use chrono::Duration;
use common::TestHarness;
use serde_json::json;

async fn admit(harness: &TestHarness, body: serde_json::Value) -> axum_test::TestResponse {
    harness
        .server
        .post("/v1/admission")
        .add_header("x-api-key", &harness.service_api_key)
        .add_header("x-service-name", "web")
        .json(&body)
        .await
}

#[tokio::test]
async fn exempt_endpoint_is_allowed_without_headers() {
    let harness = TestHarness::new();

    let response = admit(
        &harness,
        json!({"ip": "203.0.113.9", "endpoint": "/_next/static/chunk.js"}),
    )
    .await;

    response.assert_status_ok();
    assert!(response.headers().get("x-ratelimit-remaining").is_none());
    let body: serde_json::Value = response.json();
    assert_eq!(body["allowed"], true);
    assert!(body.get("remaining").is_none());
}

#[tokio::test]
async fn anonymous_free_endpoint_is_rate_limited_by_ip() {
    let harness = TestHarness::new();

    let response = admit(
        &harness,
        json!({"ip": "203.0.113.9", "endpoint": "/api/market/overview?range=1d"}),
    )
    .await;

    response.assert_status_ok();
    assert_eq!(response.headers()["x-ratelimit-remaining"], "59");
    assert_eq!(response.headers()["x-ratelimit-limit"], "60");
    assert!(response.headers().get("x-credit-balance").is_none());
}

#[tokio::test]
async fn billable_endpoint_requires_principal() {
    let harness = TestHarness::new();

    let response = admit(
        &harness,
        json!({"ip": "203.0.113.9", "endpoint": "/api/stock/search"}),
    )
    .await;

    response.assert_status_unauthorized();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "authentication_required");
}

#[tokio::test]
async fn billable_endpoint_reports_action_without_charging() {
    let harness = TestHarness::new();

    let response = admit(
        &harness,
        json!({
            "principal": harness.test_principal.to_string(),
            "ip": "203.0.113.9",
            "endpoint": "/api/stock/search/AAPL"
        }),
    )
    .await;

    response.assert_status_ok();
    assert_eq!(response.headers()["x-credit-balance"], "100");
    let body: serde_json::Value = response.json();
    assert_eq!(body["action"], "stock_search");
    assert_eq!(body["cost"], 2);
    assert_eq!(body["credit_balance"], 100);

    let balance = harness
        .state
        .meter
        .account(&harness.test_principal)
        .await
        .unwrap()
        .balance;
    assert_eq!(balance, 100);
}

#[tokio::test]
async fn insufficient_balance_is_payment_required() {
    let harness = TestHarness::new();
    for _ in 0..2 {
        harness
            .state
            .meter
            .deduct(&harness.test_principal, "portfolio_analysis", None)
            .await
            .unwrap();
    }

    let response = admit(
        &harness,
        json!({
            "principal": harness.test_principal.to_string(),
            "ip": "203.0.113.9",
            "endpoint": "/api/ai/chat"
        }),
    )
    .await;

    response.assert_status(StatusCode::PAYMENT_REQUIRED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["details"]["current_balance"], 0);
    assert_eq!(body["error"]["details"]["required_credits"], 5);
    assert_eq!(body["error"]["details"]["action"], "ai_chat");
}

#[tokio::test]
async fn monthly_allotment_is_granted_before_sufficiency() {
    let harness = TestHarness::new();
    for _ in 0..2 {
        harness
            .state
            .meter
            .deduct(&harness.test_principal, "portfolio_analysis", None)
            .await
            .unwrap();
    }
    harness.clock.advance(Duration::days(25));

    let response = admit(
        &harness,
        json!({
            "principal": harness.test_principal.to_string(),
            "ip": "203.0.113.9",
            "endpoint": "/api/ai/chat"
        }),
    )
    .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["credit_balance"], 100);
}

#[tokio::test]
async fn exhausted_window_is_too_many_requests() {
    let harness = TestHarness::with_config(|config| {
        config.rate_limits.default_limits.per_minute = 3;
    });
    let request = json!({"ip": "198.51.100.20", "endpoint": "/api/market/overview"});

    for _ in 0..3 {
        admit(&harness, request.clone()).await.assert_status_ok();
    }

    let response = admit(&harness, request.clone()).await;
    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["retry-after"], "60");
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "rate_limited");
    assert_eq!(body["error"]["details"]["limit"], 3);

    // Another caller is unaffected.
    admit(
        &harness,
        json!({"ip": "198.51.100.21", "endpoint": "/api/market/overview"}),
    )
    .await
    .assert_status_ok();

    harness.clock.advance(Duration::seconds(60));
    admit(&harness, request).await.assert_status_ok();
}

#[tokio::test]
async fn admission_requires_service_key() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/admission")
        .json(&json!({"ip": "203.0.113.9", "endpoint": "/api/market"}))
        .await;

    response.assert_status_unauthorized();
}
