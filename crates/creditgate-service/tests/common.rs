//! Common test utilities for creditgate integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::Router;
use axum_test::TestServer;
use chrono::{TimeZone, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;

use creditgate_core::{ManualClock, PrincipalId};
use creditgate_meter::BillableEndpoints;
use creditgate_service::auth::JwtClaims;
use creditgate_service::{create_router, AppState, ServiceConfig};
use creditgate_store::MemoryStore;

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const SERVICE_API_KEY: &str = "test-service-key";
pub const ADMIN_API_KEY: &str = "test-admin-key";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Shared state, for assertions that bypass HTTP.
    pub state: AppState,
    /// Clock driving every component.
    pub clock: Arc<ManualClock>,
    /// A test principal for authenticated requests.
    pub test_principal: PrincipalId,
    /// The service API key for service-to-service requests.
    pub service_api_key: String,
    /// The admin API key.
    pub admin_api_key: String,
}

impl TestHarness {
    /// Create a new test harness with a fresh in-memory store.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Create a harness after adjusting the default test configuration.
    pub fn with_config(adjust: impl FnOnce(&mut ServiceConfig)) -> Self {
        let mut config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            jwt_secret: Some(JWT_SECRET.into()),
            service_api_key: Some(SERVICE_API_KEY.into()),
            admin_api_key: Some(ADMIN_API_KEY.into()),
            billable: BillableEndpoints::new()
                .with("/api/stock/search", "stock_search")
                .with("/api/ai/chat", "ai_chat")
                .with("/api/portfolio/analyze", "portfolio_analysis"),
            ..ServiceConfig::default()
        };
        adjust(&mut config);

        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap(),
        ));
        let state = AppState::with_clock(Arc::new(MemoryStore::new()), clock.clone(), config);
        let router: Router = create_router(state.clone());

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            state,
            clock,
            test_principal: PrincipalId::generate(),
            service_api_key: SERVICE_API_KEY.to_string(),
            admin_api_key: ADMIN_API_KEY.to_string(),
        }
    }

    /// Get the authorization header for the test principal.
    pub fn user_auth_header(&self) -> String {
        bearer_for(&self.test_principal)
    }

    /// Get a different principal's auth header (for testing isolation).
    pub fn other_user_auth_header() -> String {
        bearer_for(&PrincipalId::generate())
    }

    /// Credit the test principal through the admin endpoint.
    pub async fn fund(&self, amount: i64) {
        self.server
            .post("/v1/credits/add")
            .add_header("x-admin-key", &self.admin_api_key)
            .json(&json!({
                "principal": self.test_principal.to_string(),
                "amount": amount,
                "description": "Test funding"
            }))
            .await
            .assert_status_ok();
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// A signed HS256 bearer token for `principal`.
pub fn bearer_for(principal: &PrincipalId) -> String {
    let claims = JwtClaims {
        sub: principal.to_string(),
        aud: None,
        exp: Utc::now().timestamp() + 3600,
        iat: Some(Utc::now().timestamp()),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("Failed to sign test token");
    format!("Bearer {token}")
}
