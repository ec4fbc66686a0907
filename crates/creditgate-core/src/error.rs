//! Error taxonomy for metered access.
//!
//! Everything except [`MeterError::StorageUnavailable`] is an expected business
//! outcome and carries what the caller needs to act on it.

use chrono::{DateTime, Utc};

use crate::ids::IdError;
use crate::promo::PromoRejection;

/// Result type for metering operations.
pub type Result<T> = std::result::Result<T, MeterError>;

/// Errors returned by the credit meter, rate limiter, and promo redeemer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MeterError {
    /// Malformed or unknown input (action, amount, promo code).
    #[error("validation error: {0}")]
    Validation(String),

    /// A promo code failed validation.
    #[error("promo code rejected: {0}")]
    PromoRejected(PromoRejection),

    /// The balance does not cover the action.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Balance observed by the failed conditional update.
        balance: i64,
        /// Cost of the action.
        required: i64,
        /// The action that was attempted.
        action: String,
    },

    /// A rate-limit window is exhausted.
    #[error("rate limit exceeded: retry after {retry_after_secs}s")]
    RateLimitExceeded {
        /// Seconds until a slot frees up.
        retry_after_secs: u64,
        /// Limit of the exhausted window.
        limit: u32,
        /// When the exhausted window frees a slot.
        reset_at: DateTime<Utc>,
    },

    /// A billable action was requested without a principal.
    #[error("authentication required")]
    AuthenticationRequired,

    /// The principal has already used this code the maximum number of times.
    #[error("promo code {code} already redeemed")]
    AlreadyRedeemed {
        /// The code.
        code: String,
    },

    /// The store could not be reached or failed; nothing was changed.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl MeterError {
    /// Whether this is an expected business outcome rather than a fault.
    #[must_use]
    pub const fn is_business_outcome(&self) -> bool {
        !matches!(self, Self::StorageUnavailable(_))
    }

    /// For `InsufficientCredits`, how many credits are missing.
    #[must_use]
    pub fn shortfall(&self) -> Option<i64> {
        match self {
            Self::InsufficientCredits {
                balance, required, ..
            } => Some((required - balance).max(0)),
            _ => None,
        }
    }
}

impl From<IdError> for MeterError {
    fn from(err: IdError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<PromoRejection> for MeterError {
    fn from(rejection: PromoRejection) -> Self {
        Self::PromoRejected(rejection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortfall_is_the_missing_amount() {
        let err = MeterError::InsufficientCredits {
            balance: 10,
            required: 25,
            action: "ai_analysis".into(),
        };
        assert_eq!(err.shortfall(), Some(15));
        assert!(err.is_business_outcome());
    }

    #[test]
    fn storage_is_the_only_fault() {
        assert!(!MeterError::StorageUnavailable("down".into()).is_business_outcome());
        assert!(MeterError::AuthenticationRequired.is_business_outcome());
        assert_eq!(MeterError::Validation("x".into()).shortfall(), None);
    }
}
