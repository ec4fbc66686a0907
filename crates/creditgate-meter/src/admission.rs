//! The admission gate: one call per incoming request.
//!
//! Order of checks:
//!
//! 1. exempt endpoints are allowed outright
//! 2. the rate limiter admits and records the request, or denies with 429
//! 3. billable endpoints need a principal (401)
//! 4. the monthly allotment is granted if due (failures are logged only)
//! 5. the balance must cover the action's cost (402)
//!
//! Credits are not deducted here. The caller deducts after the billable
//! operation succeeds.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use creditgate_core::rate_limit::normalize_endpoint;
use creditgate_core::{Identity, MeterError, PrincipalId, Window};

use crate::credit_meter::CreditMeter;
use crate::monthly::MonthlyReset;
use crate::rate_limiter::RateLimiter;

/// One request presented to the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionRequest {
    /// Authenticated principal, if any.
    #[serde(default)]
    pub principal: Option<PrincipalId>,
    /// Caller address.
    pub ip: IpAddr,
    /// Request path; a query string is ignored.
    pub endpoint: String,
}

/// Maps endpoint prefixes to billable actions. Longest prefix wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BillableEndpoints {
    routes: Vec<(String, String)>,
}

impl BillableEndpoints {
    /// No billable endpoints.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bill requests under `prefix` as `action`.
    #[must_use]
    pub fn with(mut self, prefix: impl Into<String>, action: impl Into<String>) -> Self {
        self.routes.push((prefix.into(), action.into()));
        self
    }

    /// Parse `"/prefix=action,/other=action"`.
    ///
    /// # Errors
    ///
    /// Returns a description of the first malformed entry.
    pub fn parse(spec: &str) -> Result<Self, String> {
        let mut endpoints = Self::new();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (prefix, action) = entry
                .split_once('=')
                .ok_or_else(|| format!("expected prefix=action, got `{entry}`"))?;
            let (prefix, action) = (prefix.trim(), action.trim());
            if !prefix.starts_with('/') || action.is_empty() {
                return Err(format!("invalid billable endpoint `{entry}`"));
            }
            endpoints = endpoints.with(prefix, action);
        }
        Ok(endpoints)
    }

    /// The action billed for `endpoint`, if any.
    #[must_use]
    pub fn action_for(&self, endpoint: &str) -> Option<&str> {
        let endpoint = normalize_endpoint(endpoint);
        self.routes
            .iter()
            .filter(|(prefix, _)| endpoint.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, action)| action.as_str())
    }

    /// Configured `(prefix, action)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.routes.iter().map(|(p, a)| (p.as_str(), a.as_str()))
    }
}

/// An admitted request and the headers to report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allow {
    /// Requests left in the tightest window; `None` for exempt endpoints.
    pub remaining: Option<u32>,
    /// Limit of the tightest window.
    pub limit: Option<u32>,
    /// When that window frees a slot.
    pub reset_at: Option<DateTime<Utc>>,
    /// The tightest window.
    pub window: Option<Window>,
    /// Balance, for billable endpoints.
    pub credit_balance: Option<i64>,
    /// Action to deduct once the request succeeds.
    pub action: Option<String>,
    /// Its cost.
    pub cost: Option<i64>,
}

impl Allow {
    fn exempt() -> Self {
        Self {
            remaining: None,
            limit: None,
            reset_at: None,
            window: None,
            credit_balance: None,
            action: None,
            cost: None,
        }
    }

    /// Informational response headers.
    #[must_use]
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::with_capacity(4);
        if let Some(remaining) = self.remaining {
            headers.push(("x-ratelimit-remaining", remaining.to_string()));
        }
        if let Some(limit) = self.limit {
            headers.push(("x-ratelimit-limit", limit.to_string()));
        }
        if let Some(reset_at) = self.reset_at {
            headers.push(("x-ratelimit-reset", reset_at.timestamp().to_string()));
        }
        if let Some(balance) = self.credit_balance {
            headers.push(("x-credit-balance", balance.to_string()));
        }
        headers
    }
}

/// A refused request.
#[derive(Debug, Clone, PartialEq)]
pub struct Denial {
    /// HTTP status code.
    pub status: u16,
    /// The reason, with remediation details.
    pub error: MeterError,
}

impl From<MeterError> for Denial {
    fn from(error: MeterError) -> Self {
        Self {
            status: status_for(&error),
            error,
        }
    }
}

/// HTTP status for a metering error.
#[must_use]
pub const fn status_for(error: &MeterError) -> u16 {
    match error {
        MeterError::Validation(_) | MeterError::PromoRejected(_) => 400,
        MeterError::AuthenticationRequired => 401,
        MeterError::InsufficientCredits { .. } => 402,
        MeterError::AlreadyRedeemed { .. } => 409,
        MeterError::RateLimitExceeded { .. } => 429,
        MeterError::StorageUnavailable(_) => 503,
    }
}

/// Decides whether a request may proceed.
pub struct AdmissionGate {
    limiter: Arc<RateLimiter>,
    meter: Arc<CreditMeter>,
    monthly: Arc<MonthlyReset>,
    billable: BillableEndpoints,
}

impl AdmissionGate {
    /// Assemble a gate from its components.
    #[must_use]
    pub fn new(
        limiter: Arc<RateLimiter>,
        meter: Arc<CreditMeter>,
        monthly: Arc<MonthlyReset>,
        billable: BillableEndpoints,
    ) -> Self {
        Self {
            limiter,
            meter,
            monthly,
            billable,
        }
    }

    /// Billable endpoint table.
    #[must_use]
    pub fn billable(&self) -> &BillableEndpoints {
        &self.billable
    }

    /// Admit or deny one request.
    ///
    /// # Errors
    ///
    /// Returns a [`Denial`] carrying the status and reason.
    pub async fn admit(&self, request: &AdmissionRequest) -> Result<Allow, Denial> {
        let endpoint = normalize_endpoint(&request.endpoint);
        if self.limiter.policy().is_exempt(endpoint) {
            return Ok(Allow::exempt());
        }

        let identity = Identity::resolve(request.principal, request.ip);
        let decision = self.limiter.check(&identity, endpoint).await?;
        if !decision.allowed {
            return Err(MeterError::RateLimitExceeded {
                retry_after_secs: decision.retry_after.unwrap_or(1),
                limit: decision.limit,
                reset_at: decision.reset_at,
            }
            .into());
        }

        let mut allow = Allow {
            remaining: Some(decision.remaining),
            limit: Some(decision.limit),
            reset_at: Some(decision.reset_at),
            window: decision.window,
            ..Allow::exempt()
        };

        let Some(action) = self.billable.action_for(endpoint) else {
            return Ok(allow);
        };
        let Some(principal) = request.principal else {
            tracing::debug!(endpoint, action, "Billable request without principal");
            return Err(MeterError::AuthenticationRequired.into());
        };

        if let Err(err) = self.monthly.check_and_reset(&principal).await {
            tracing::warn!(principal = %principal, error = %err, "Monthly reset check failed");
        }

        let sufficiency = self.meter.check_sufficiency(&principal, action).await?;
        if !sufficiency.sufficient {
            tracing::info!(
                principal = %principal,
                action,
                balance = sufficiency.balance,
                cost = sufficiency.cost,
                "Admission denied for insufficient credits"
            );
            return Err(MeterError::InsufficientCredits {
                balance: sufficiency.balance,
                required: sufficiency.cost,
                action: action.to_string(),
            }
            .into());
        }

        allow.credit_balance = Some(sufficiency.balance);
        allow.action = Some(action.to_string());
        allow.cost = Some(sufficiency.cost);
        Ok(allow)
    }
}
