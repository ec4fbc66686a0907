//! Promo code integration tests.

mod common;

use axum::http::StatusCode;
use common::TestHarness;
use serde_json::json;

// ============================================================================
// Helpers
// ============================================================================

async fn create_promo(harness: &TestHarness, body: serde_json::Value) {
    harness
        .server
        .post("/v1/admin/promo")
        .add_header("x-admin-key", &harness.admin_api_key)
        .json(&body)
        .await
        .assert_status_ok();
}

// ============================================================================
// Redeem
// ============================================================================

#[tokio::test]
async fn redeem_credit_code_once() {
    let harness = TestHarness::new();
    create_promo(
        &harness,
        json!({"code": "welcome50", "kind": "credits", "value": 50}),
    )
    .await;

    let response = harness
        .server
        .post("/v1/promo/redeem")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({"code": " Welcome50 "}))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["credits_awarded"], 50);
    assert_eq!(body["new_balance"], 150);

    let response = harness
        .server
        .post("/v1/promo/redeem")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({"code": "WELCOME50"}))
        .await;

    response.assert_status(StatusCode::CONFLICT);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "already_redeemed");
}

#[tokio::test]
async fn redeem_unknown_code_is_bad_request() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/promo/redeem")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({"code": "NOPE"}))
        .await;

    response.assert_status_bad_request();
}

#[tokio::test]
async fn redeem_requires_auth() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/promo/redeem")
        .json(&json!({"code": "WELCOME50"}))
        .await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn exhausted_code_is_rejected_for_next_principal() {
    let harness = TestHarness::new();
    create_promo(
        &harness,
        json!({"code": "LAUNCH", "kind": "credits", "value": 10, "max_uses": 1}),
    )
    .await;

    harness
        .server
        .post("/v1/promo/redeem")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({"code": "LAUNCH"}))
        .await
        .assert_status_ok();

    let response = harness
        .server
        .post("/v1/promo/redeem")
        .add_header("authorization", TestHarness::other_user_auth_header())
        .json(&json!({"code": "LAUNCH"}))
        .await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "promo_rejected");
    assert_eq!(body["error"]["details"]["reason"], "exhausted");
}

// ============================================================================
// Validate
// ============================================================================

#[tokio::test]
async fn validate_reports_benefits_without_using_code() {
    let harness = TestHarness::new();
    create_promo(
        &harness,
        json!({"code": "SPRING20", "kind": "discount", "value": 20, "max_discount": 300}),
    )
    .await;

    for _ in 0..2 {
        let response = harness
            .server
            .post("/v1/promo/validate")
            .add_header("authorization", harness.user_auth_header())
            .json(&json!({"code": "spring20"}))
            .await;

        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["valid"], true);
        assert_eq!(body["code"], "SPRING20");
    }
}

#[tokio::test]
async fn validate_explains_rejection() {
    let harness = TestHarness::new();
    create_promo(
        &harness,
        json!({
            "code": "BIGBUY",
            "kind": "discount",
            "value": 10,
            "filters": {"min_purchase": 5000}
        }),
    )
    .await;

    let response = harness
        .server
        .post("/v1/promo/validate")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({"code": "BIGBUY", "context": {"purchase_amount": 1000}}))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["valid"], false);
    assert_eq!(body["reason"]["reason"], "below_minimum_purchase");
    assert_eq!(body["reason"]["minimum"], 5000);
}

// ============================================================================
// Purchase discounts
// ============================================================================

#[tokio::test]
async fn apply_then_record_purchase_usage() {
    let harness = TestHarness::new();
    create_promo(
        &harness,
        json!({"code": "SPRING20", "kind": "discount", "value": 20, "max_discount": 300}),
    )
    .await;

    let response = harness
        .server
        .post("/v1/promo/apply")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({"code": "SPRING20", "amount": 1000}))
        .await;

    response.assert_status_ok();
    let quote: serde_json::Value = response.json();
    assert_eq!(quote["original_amount"], 1000);
    assert_eq!(quote["discount_applied"], 200);
    assert_eq!(quote["discounted_amount"], 800);

    let response = harness
        .server
        .post("/v1/promo/purchase-usage")
        .add_header("x-api-key", &harness.service_api_key)
        .add_header("x-service-name", "checkout")
        .json(&json!({
            "code": "SPRING20",
            "principal": harness.test_principal.to_string(),
            "discount_applied": 200,
            "purchase_id": "pi_123"
        }))
        .await;

    response.assert_status_ok();
    let usage: serde_json::Value = response.json();
    assert_eq!(usage["promo_code"], "SPRING20");

    // Per-principal cap of one is now used up.
    let response = harness
        .server
        .post("/v1/promo/apply")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({"code": "SPRING20", "amount": 1000}))
        .await;
    response.assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn discount_code_cannot_be_redeemed_for_credits() {
    let harness = TestHarness::new();
    create_promo(
        &harness,
        json!({"code": "SPRING20", "kind": "discount", "value": 20}),
    )
    .await;

    let response = harness
        .server
        .post("/v1/promo/redeem")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({"code": "SPRING20"}))
        .await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["details"]["reason"], "wrong_kind");
}
