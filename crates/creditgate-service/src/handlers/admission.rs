//! Admission gate endpoint for the fronting web layer.

use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use creditgate_meter::AdmissionRequest;

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::middleware::apply_allow_headers;
use crate::state::AppState;

/// Body returned when a request is admitted.
#[derive(Debug, Serialize)]
pub struct AdmissionResponse {
    /// Always true; denials are error responses.
    pub allowed: bool,
    /// Requests left in the tightest window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u32>,
    /// Limit of that window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// When the window frees a slot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_at: Option<DateTime<Utc>>,
    /// Balance, for billable endpoints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credit_balance: Option<i64>,
    /// Action to deduct after the request succeeds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Its cost.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<i64>,
}

/// Decide whether a request may proceed.
///
/// Admitted requests get `200` with the rate-limit and balance headers.
/// Denials come back as 429, 402, or 401 error bodies.
pub async fn admit(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(request): Json<AdmissionRequest>,
) -> Result<Response, ApiError> {
    let allow = state.gate.admit(&request).await.map_err(|denial| {
        tracing::debug!(
            service = %auth.service_name,
            endpoint = %request.endpoint,
            status = denial.status,
            "Admission denied"
        );
        ApiError::from(denial)
    })?;

    let mut response = Json(AdmissionResponse {
        allowed: true,
        remaining: allow.remaining,
        limit: allow.limit,
        reset_at: allow.reset_at,
        credit_balance: allow.credit_balance,
        action: allow.action.clone(),
        cost: allow.cost,
    })
    .into_response();
    apply_allow_headers(&allow, response.headers_mut());

    Ok(response)
}
