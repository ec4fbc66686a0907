//! Request and response types for the creditgate client.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use creditgate_core::{Metadata, PrincipalId};

/// Admission request for one incoming web request.
#[derive(Debug, Clone, Serialize)]
pub struct AdmitRequest {
    /// Authenticated principal, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<PrincipalId>,
    /// Client address.
    pub ip: IpAddr,
    /// Request path.
    pub endpoint: String,
}

/// Admission granted.
#[derive(Debug, Clone, Deserialize)]
pub struct AdmitResponse {
    /// Always true; denials come back as errors.
    pub allowed: bool,
    /// Requests left in the tightest window.
    #[serde(default)]
    pub remaining: Option<u32>,
    /// Limit of that window.
    #[serde(default)]
    pub limit: Option<u32>,
    /// When the window frees a slot.
    #[serde(default)]
    pub reset_at: Option<DateTime<Utc>>,
    /// Balance, for billable endpoints.
    #[serde(default)]
    pub credit_balance: Option<i64>,
    /// Action to deduct after the request succeeds.
    #[serde(default)]
    pub action: Option<String>,
    /// Its cost.
    #[serde(default)]
    pub cost: Option<i64>,
}

/// Deduction request.
#[derive(Debug, Clone, Serialize)]
pub struct DeductRequest {
    /// Principal to charge.
    pub principal: PrincipalId,
    /// Action performed.
    pub action: String,
    /// Additional metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

/// Deduction response.
#[derive(Debug, Clone, Deserialize)]
pub struct DeductResponse {
    /// Balance after the deduction.
    pub new_balance: i64,
    /// The ledger row.
    pub transaction_id: String,
    /// Credits deducted.
    pub cost: i64,
    /// The action charged.
    pub action: String,
}

/// Sufficiency check response.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckResponse {
    /// Whether the balance covers the action right now.
    pub sufficient: bool,
    /// Current balance.
    pub balance: i64,
    /// Cost of the action.
    pub cost: i64,
    /// The action checked.
    pub action: String,
}

/// API error response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    /// Error details.
    pub error: ApiErrorBody,
}

/// API error body.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
    /// Additional details.
    pub details: Option<serde_json::Value>,
}

impl ApiErrorBody {
    /// Integer detail field, if present.
    #[must_use]
    pub fn detail_i64(&self, key: &str) -> Option<i64> {
        self.details.as_ref()?.get(key)?.as_i64()
    }

    /// String detail field, if present.
    #[must_use]
    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.details.as_ref()?.get(key)?.as_str()
    }
}
