//! Administrative handlers: promo definitions and rate-limit maintenance.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use creditgate_core::{ApplicabilityFilters, Clock, Identity, PromoCode, PromoKind};

use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Promo definition request.
#[derive(Debug, Deserialize)]
pub struct CreatePromoRequest {
    /// Code; normalized to trimmed upper-case.
    pub code: String,
    /// Credits, discount, or trial.
    pub kind: PromoKind,
    /// Credits granted, or discount percentage.
    pub value: i64,
    /// Cap on a discount.
    #[serde(default)]
    pub max_discount: Option<i64>,
    /// Global cap on uses.
    #[serde(default)]
    pub max_uses: Option<u32>,
    /// Uses allowed per principal (default: 1).
    #[serde(default = "default_max_uses_per_user")]
    pub max_uses_per_user: u32,
    /// Validity start.
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    /// Validity end.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Applicability filters.
    #[serde(default)]
    pub filters: ApplicabilityFilters,
    /// Operator-facing description.
    #[serde(default)]
    pub description: String,
}

fn default_max_uses_per_user() -> u32 {
    1
}

/// Create a promo code.
pub async fn create_promo(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(body): Json<CreatePromoRequest>,
) -> Result<Json<PromoCode>, ApiError> {
    let mut promo = PromoCode::new(&body.code, body.kind, body.value, state.clock.now());
    promo.max_discount = body.max_discount;
    promo.max_uses = body.max_uses;
    promo.max_uses_per_user = body.max_uses_per_user;
    promo.starts_at = body.starts_at;
    promo.expires_at = body.expires_at;
    promo.filters = body.filters;
    promo.description = body.description;

    let created = state.promos.create(promo).await?;
    tracing::info!(admin_id = %admin.admin_id, code = %created.code, "Promo code created by admin");
    Ok(Json(created))
}

/// Deactivation response.
#[derive(Debug, Serialize)]
pub struct DeactivateResponse {
    /// The normalized code.
    pub code: String,
    /// Always false after deactivation.
    pub active: bool,
}

/// Switch a promo code off.
pub async fn deactivate_promo(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(code): Path<String>,
) -> Result<Json<DeactivateResponse>, ApiError> {
    if !state.promos.deactivate(&code).await? {
        return Err(ApiError::NotFound(format!("Promo code {code} not found")));
    }

    tracing::info!(admin_id = %admin.admin_id, code = %code, "Promo code deactivated by admin");
    Ok(Json(DeactivateResponse {
        code: code.trim().to_ascii_uppercase(),
        active: false,
    }))
}

/// Rows removed by a maintenance call.
#[derive(Debug, Serialize)]
pub struct RemovedResponse {
    /// Identity reset, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    /// Tracking rows deleted.
    pub removed: u64,
}

/// Delete every rate-limit row for an identity (`user:<uuid>` or `ip:<addr>`).
pub async fn reset_rate_limits(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(identity): Path<String>,
) -> Result<Json<RemovedResponse>, ApiError> {
    let identity: Identity = identity
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("{e}")))?;

    let removed = state.limiter.reset(&identity).await?;
    tracing::info!(admin_id = %admin.admin_id, identity = %identity, removed, "Rate limits reset by admin");

    Ok(Json(RemovedResponse {
        identity: Some(identity.key()),
        removed,
    }))
}

/// Purge expired rate-limit rows now.
pub async fn cleanup_rate_limits(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
) -> Result<Json<RemovedResponse>, ApiError> {
    let removed = state.limiter.cleanup().await?;
    Ok(Json(RemovedResponse {
        identity: None,
        removed,
    }))
}
