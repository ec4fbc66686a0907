//! Promo code handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use creditgate_core::{Metadata, PrincipalId, PromoContext, PromoUsage};
use creditgate_meter::{PromoValidation, PurchaseQuote, RedeemResult};

use crate::auth::{AuthUser, ServiceAuth};
use crate::error::ApiError;
use crate::state::AppState;

/// Validate request.
#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    /// Code as entered.
    pub code: String,
    /// Purchase details, when validating for checkout.
    #[serde(default)]
    pub context: PromoContext,
}

/// Check a code for the caller without using it.
pub async fn validate(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<ValidateRequest>,
) -> Result<Json<PromoValidation>, ApiError> {
    let validation = state
        .promos
        .validate(&body.code, &auth.principal, &body.context)
        .await?;
    Ok(Json(validation))
}

/// Redeem request.
#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    /// Code as entered.
    pub code: String,
    /// Opaque metadata stored on the usage and ledger rows.
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

/// Redeem a credit or trial code for the caller.
pub async fn redeem(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<RedeemRequest>,
) -> Result<Json<RedeemResult>, ApiError> {
    let result = state
        .promos
        .redeem(&body.code, &auth.principal, body.metadata)
        .await?;
    Ok(Json(result))
}

/// Apply request.
#[derive(Debug, Deserialize)]
pub struct ApplyRequest {
    /// Discount code.
    pub code: String,
    /// Purchase amount before discount.
    pub amount: i64,
    /// Package being purchased.
    #[serde(default)]
    pub package_id: Option<String>,
}

/// Price a purchase with a discount code. Nothing is recorded.
pub async fn apply(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<ApplyRequest>,
) -> Result<Json<PurchaseQuote>, ApiError> {
    let quote = state
        .promos
        .apply_to_purchase(&body.code, &auth.principal, body.amount, body.package_id)
        .await?;
    Ok(Json(quote))
}

/// Purchase usage request, sent once payment is confirmed.
#[derive(Debug, Deserialize)]
pub struct PurchaseUsageRequest {
    /// Discount code that was applied.
    pub code: String,
    /// Purchaser.
    pub principal: PrincipalId,
    /// Discount taken off the purchase.
    pub discount_applied: i64,
    /// Payment provider reference.
    pub purchase_id: String,
    /// Opaque metadata.
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

/// Record a discount code against a confirmed purchase.
pub async fn purchase_usage(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<PurchaseUsageRequest>,
) -> Result<Json<PromoUsage>, ApiError> {
    tracing::info!(
        service = %auth.service_name,
        principal = %body.principal,
        purchase_id = %body.purchase_id,
        "Recording promo purchase usage"
    );

    let usage = state
        .promos
        .record_purchase_usage(
            &body.code,
            &body.principal,
            body.discount_applied,
            &body.purchase_id,
            body.metadata,
        )
        .await?;
    Ok(Json(usage))
}
