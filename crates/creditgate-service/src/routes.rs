//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{delete, get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{admin, admission, analytics, credits, health, promo};
use crate::state::AppState;

// ============================================================================
// Concurrency Limiting Constants
// ============================================================================

/// Maximum concurrent requests for the admission gate.
/// The fronting web layer calls it once per request, so it gets the most room.
const ADMISSION_MAX_CONCURRENT_REQUESTS: usize = 200;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Service (API key auth)
/// - `POST /v1/admission` - Admission gate
/// - `POST /v1/credits/deduct` - Charge an action
/// - `POST /v1/promo/purchase-usage` - Record a discount against a purchase
///
/// ## Credits (JWT auth)
/// - `GET /v1/credits/balance` - Current balance
/// - `GET /v1/credits/transactions` - Ledger, newest first
/// - `GET /v1/credits/check?action=` - Sufficiency check
/// - `POST /v1/credits/monthly-reset` - Grant the monthly allotment if due
///
/// ## Promo (JWT auth)
/// - `POST /v1/promo/validate`, `POST /v1/promo/redeem`, `POST /v1/promo/apply`
///
/// ## Analytics (JWT auth)
/// - `GET /v1/analytics/usage?days=`
///
/// ## Admin (admin key)
/// - `POST /v1/credits/add`, `POST /v1/credits/refund`
/// - `POST /v1/admin/promo`, `DELETE /v1/admin/promo/{code}`
/// - `DELETE /v1/admin/rate-limits/{identity}`, `POST /v1/admin/rate-limits/cleanup`
/// - `GET /v1/admin/analytics?days=&limit=`
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    // Build CORS layer
    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let admission_routes = Router::new()
        .route("/", post(admission::admit))
        .layer(ConcurrencyLimitLayer::new(ADMISSION_MAX_CONCURRENT_REQUESTS));

    let api_routes = Router::new()
        // Credits
        .route("/credits/balance", get(credits::get_balance))
        .route("/credits/transactions", get(credits::list_transactions))
        .route("/credits/check", get(credits::check))
        .route("/credits/deduct", post(credits::deduct))
        .route("/credits/monthly-reset", post(credits::monthly_reset))
        .route("/credits/add", post(credits::admin_add_credits))
        .route("/credits/refund", post(credits::admin_refund))
        // Promo
        .route("/promo/validate", post(promo::validate))
        .route("/promo/redeem", post(promo::redeem))
        .route("/promo/apply", post(promo::apply))
        .route("/promo/purchase-usage", post(promo::purchase_usage))
        // Analytics
        .route("/analytics/usage", get(analytics::usage))
        // Admin
        .route("/admin/promo", post(admin::create_promo))
        .route("/admin/promo/:code", delete(admin::deactivate_promo))
        .route(
            "/admin/rate-limits/cleanup",
            post(admin::cleanup_rate_limits),
        )
        .route(
            "/admin/rate-limits/:identity",
            delete(admin::reset_rate_limits),
        )
        .route("/admin/analytics", get(analytics::admin_overview))
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS))
        // Admission gate (with its own concurrency limit)
        .nest("/admission", admission_routes);

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        .nest("/v1", api_routes)
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
