//! Administrative endpoint integration tests.

mod common;

use chrono::Duration;
use common::TestHarness;
use serde_json::json;

// ============================================================================
// Promo administration
// ============================================================================

#[tokio::test]
async fn create_promo_normalizes_code() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/admin/promo")
        .add_header("x-admin-key", &harness.admin_api_key)
        .add_header("x-admin-id", "ops")
        .json(&json!({
            "code": "  summer ",
            "kind": "trial",
            "value": 30,
            "description": "Summer trial"
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "SUMMER");
    assert_eq!(body["kind"], "trial");
    assert_eq!(body["used_count"], 0);
    assert_eq!(body["active"], true);
}

#[tokio::test]
async fn duplicate_promo_is_bad_request() {
    let harness = TestHarness::new();
    let body = json!({"code": "DUP", "kind": "credits", "value": 5});

    harness
        .server
        .post("/v1/admin/promo")
        .add_header("x-admin-key", &harness.admin_api_key)
        .json(&body)
        .await
        .assert_status_ok();

    harness
        .server
        .post("/v1/admin/promo")
        .add_header("x-admin-key", &harness.admin_api_key)
        .json(&body)
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn create_promo_requires_admin_key() {
    let harness = TestHarness::new();

    harness
        .server
        .post("/v1/admin/promo")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({"code": "X", "kind": "credits", "value": 5}))
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn deactivated_promo_cannot_be_redeemed() {
    let harness = TestHarness::new();
    harness
        .server
        .post("/v1/admin/promo")
        .add_header("x-admin-key", &harness.admin_api_key)
        .json(&json!({"code": "GONE", "kind": "credits", "value": 5}))
        .await
        .assert_status_ok();

    let response = harness
        .server
        .delete("/v1/admin/promo/gone")
        .add_header("x-admin-key", &harness.admin_api_key)
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "GONE");
    assert_eq!(body["active"], false);

    let response = harness
        .server
        .post("/v1/promo/redeem")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({"code": "GONE"}))
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["details"]["reason"], "inactive");
}

#[tokio::test]
async fn deactivate_missing_promo_is_not_found() {
    let harness = TestHarness::new();

    harness
        .server
        .delete("/v1/admin/promo/MISSING")
        .add_header("x-admin-key", &harness.admin_api_key)
        .await
        .assert_status_not_found();
}

// ============================================================================
// Rate-limit maintenance
// ============================================================================

#[tokio::test]
async fn reset_rate_limits_clears_identity() {
    let harness = TestHarness::with_config(|config| {
        config.rate_limits.default_limits.per_minute = 1;
    });
    let request = json!({"ip": "192.0.2.50", "endpoint": "/api/market"});

    for expected in [200, 429] {
        let response = harness
            .server
            .post("/v1/admission")
            .add_header("x-api-key", &harness.service_api_key)
            .json(&request)
            .await;
        assert_eq!(response.status_code().as_u16(), expected);
    }

    let response = harness
        .server
        .delete("/v1/admin/rate-limits/ip:192.0.2.50")
        .add_header("x-admin-key", &harness.admin_api_key)
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["identity"], "ip:192.0.2.50");
    assert_eq!(body["removed"], 1);

    harness
        .server
        .post("/v1/admission")
        .add_header("x-api-key", &harness.service_api_key)
        .json(&request)
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn reset_rate_limits_rejects_bad_identity() {
    let harness = TestHarness::new();

    harness
        .server
        .delete("/v1/admin/rate-limits/someone")
        .add_header("x-admin-key", &harness.admin_api_key)
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn cleanup_purges_expired_records() {
    let harness = TestHarness::new();

    for ip in ["192.0.2.1", "192.0.2.2"] {
        harness
            .server
            .post("/v1/admission")
            .add_header("x-api-key", &harness.service_api_key)
            .json(&json!({"ip": ip, "endpoint": "/api/market"}))
            .await
            .assert_status_ok();
    }

    let body: serde_json::Value = harness
        .server
        .post("/v1/admin/rate-limits/cleanup")
        .add_header("x-admin-key", &harness.admin_api_key)
        .await
        .json();
    assert_eq!(body["removed"], 0);

    harness.clock.advance(Duration::days(1) + Duration::seconds(1));

    let body: serde_json::Value = harness
        .server
        .post("/v1/admin/rate-limits/cleanup")
        .add_header("x-admin-key", &harness.admin_api_key)
        .await
        .json();
    assert_eq!(body["removed"], 2);
}
