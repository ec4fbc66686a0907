//! Usage analytics handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use creditgate_meter::{GlobalReport, UsageReport};

use crate::auth::{AdminAuth, AuthUser};
use crate::error::ApiError;
use crate::state::AppState;

/// Window query parameters.
#[derive(Debug, Deserialize)]
pub struct AnalyticsQuery {
    /// Trailing window in days (default: 30).
    #[serde(default = "default_days")]
    pub days: i64,
    /// Ranking size for admin reports (default: 10).
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_days() -> i64 {
    30
}

fn default_limit() -> usize {
    10
}

/// The caller's summary, daily series, and burn projection.
pub async fn usage(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<UsageReport>, ApiError> {
    let report = state.analytics.report(&auth.principal, query.days).await?;
    Ok(Json(report))
}

/// Rankings and breakdown across all principals.
pub async fn admin_overview(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<GlobalReport>, ApiError> {
    let report = state
        .analytics
        .global_report(query.days, query.limit.clamp(1, 100))
        .await?;
    Ok(Json(report))
}
