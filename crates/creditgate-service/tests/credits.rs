//! Credit balance and ledger integration tests.

mod common;

use axum::http::StatusCode;
use chrono::Duration;
use common::TestHarness;
use serde_json::json;

// ============================================================================
// Balance
// ============================================================================

#[tokio::test]
async fn first_balance_opens_account_with_initial_grant() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get("/v1/credits/balance")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["principal"], harness.test_principal.to_string());
    assert_eq!(body["balance"], 100);
    assert_eq!(body["lifetime_earned"], 100);
    assert_eq!(body["monthly_credits"], 100);
}

#[tokio::test]
async fn balance_requires_auth() {
    let harness = TestHarness::new();

    let response = harness.server.get("/v1/credits/balance").await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn forged_token_is_rejected() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get("/v1/credits/balance")
        .add_header("authorization", "Bearer not.a.jwt")
        .await;

    response.assert_status_unauthorized();
}

// ============================================================================
// Deduct
// ============================================================================

#[tokio::test]
async fn deduct_charges_action_cost() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/credits/deduct")
        .add_header("x-api-key", &harness.service_api_key)
        .add_header("x-service-name", "web")
        .json(&json!({
            "principal": harness.test_principal.to_string(),
            "action": "ai_chat",
            "metadata": {"symbol": "AAPL"}
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["cost"], 5);
    assert_eq!(body["new_balance"], 95);
    assert_eq!(body["action"], "ai_chat");
}

#[tokio::test]
async fn deduct_requires_service_key() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/credits/deduct")
        .add_header("x-api-key", "wrong-key")
        .json(&json!({
            "principal": harness.test_principal.to_string(),
            "action": "ai_chat"
        }))
        .await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn deduct_beyond_balance_is_payment_required() {
    let harness = TestHarness::new();

    for expected in [50, 0] {
        let response = harness
            .server
            .post("/v1/credits/deduct")
            .add_header("x-api-key", &harness.service_api_key)
            .json(&json!({
                "principal": harness.test_principal.to_string(),
                "action": "portfolio_analysis"
            }))
            .await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["new_balance"], expected);
    }

    let response = harness
        .server
        .post("/v1/credits/deduct")
        .add_header("x-api-key", &harness.service_api_key)
        .json(&json!({
            "principal": harness.test_principal.to_string(),
            "action": "stock_quote"
        }))
        .await;

    response.assert_status(StatusCode::PAYMENT_REQUIRED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "insufficient_credits");
    assert_eq!(body["error"]["details"]["current_balance"], 0);
    assert_eq!(body["error"]["details"]["required_credits"], 1);
    assert_eq!(body["error"]["details"]["shortfall"], 1);
}

#[tokio::test]
async fn deduct_unknown_action_is_bad_request() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/credits/deduct")
        .add_header("x-api-key", &harness.service_api_key)
        .json(&json!({
            "principal": harness.test_principal.to_string(),
            "action": "teleport"
        }))
        .await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "bad_request");
}

// ============================================================================
// Check
// ============================================================================

#[tokio::test]
async fn check_reports_sufficiency_without_charging() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get("/v1/credits/check")
        .add_query_param("action", "ai_analysis")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["sufficient"], true);
    assert_eq!(body["balance"], 100);
    assert_eq!(body["cost"], 25);

    let balance: serde_json::Value = harness
        .server
        .get("/v1/credits/balance")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(balance["balance"], 100);
}

// ============================================================================
// Transactions
// ============================================================================

#[tokio::test]
async fn transactions_are_newest_first_and_paged() {
    let harness = TestHarness::new();
    harness.fund(40).await;

    harness
        .server
        .post("/v1/credits/deduct")
        .add_header("x-api-key", &harness.service_api_key)
        .json(&json!({
            "principal": harness.test_principal.to_string(),
            "action": "stock_search"
        }))
        .await
        .assert_status_ok();

    let response = harness
        .server
        .get("/v1/credits/transactions")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let txs = body["transactions"].as_array().unwrap();
    assert_eq!(txs.len(), 3);
    assert_eq!(txs[0]["kind"], "usage");
    assert_eq!(txs[0]["amount"], -2);
    assert_eq!(txs[0]["action"], "stock_search");
    assert_eq!(txs[0]["balance_before"], 140);
    assert_eq!(txs[0]["balance_after"], 138);
    assert_eq!(txs[1]["kind"], "admin_adjust");
    assert_eq!(txs[2]["kind"], "bonus");
    assert_eq!(body["has_more"], false);

    let page: serde_json::Value = harness
        .server
        .get("/v1/credits/transactions")
        .add_query_param("limit", 1)
        .add_query_param("offset", 1)
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(page["transactions"].as_array().unwrap().len(), 1);
    assert_eq!(page["transactions"][0]["kind"], "admin_adjust");
    assert_eq!(page["has_more"], true);
}

// ============================================================================
// Monthly reset
// ============================================================================

#[tokio::test]
async fn monthly_reset_grants_once_per_month() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/credits/monthly-reset")
        .add_header("authorization", harness.user_auth_header())
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["granted"], false);
    assert_eq!(body["balance"], 100);

    // 2025-03-10 -> 2025-04-04
    harness.clock.advance(Duration::days(25));

    let body: serde_json::Value = harness
        .server
        .post("/v1/credits/monthly-reset")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(body["granted"], true);
    assert_eq!(body["balance"], 200);

    let body: serde_json::Value = harness
        .server
        .post("/v1/credits/monthly-reset")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(body["granted"], false);
    assert_eq!(body["balance"], 200);
}

// ============================================================================
// Admin adjustments
// ============================================================================

#[tokio::test]
async fn admin_add_requires_admin_key() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/credits/add")
        .add_header("x-admin-key", &harness.service_api_key)
        .json(&json!({
            "principal": harness.test_principal.to_string(),
            "amount": 10,
            "description": "nope"
        }))
        .await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn admin_add_clamps_at_ceiling() {
    let harness = TestHarness::with_config(|config| {
        config.credit_policy.balance_ceiling = 150;
    });

    let response = harness
        .server
        .post("/v1/credits/add")
        .add_header("x-admin-key", &harness.admin_api_key)
        .json(&json!({
            "principal": harness.test_principal.to_string(),
            "amount": 80,
            "kind": "purchase",
            "description": "Starter pack"
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["new_balance"], 150);
    assert_eq!(body["amount_applied"], 50);
    assert_eq!(body["excess_dropped"], 30);
}

#[tokio::test]
async fn refund_credits_balance() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/credits/refund")
        .add_header("x-admin-key", &harness.admin_api_key)
        .add_header("x-admin-id", "ops")
        .json(&json!({
            "principal": harness.test_principal.to_string(),
            "amount": 25,
            "reason": "Failed analysis"
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["new_balance"], 125);

    let ledger: serde_json::Value = harness
        .server
        .get("/v1/credits/transactions")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(ledger["transactions"][0]["kind"], "refund");
    assert_eq!(ledger["transactions"][0]["description"], "Failed analysis");
}
