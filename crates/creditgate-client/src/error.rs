//! Client error types.

use chrono::{DateTime, Utc};

/// Errors that can occur when using the creditgate client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server returned an error response that has no typed variant.
    #[error("API error: {code} - {message}")]
    Api {
        /// Error code.
        code: String,
        /// Error message.
        message: String,
        /// HTTP status code.
        status: u16,
    },

    /// A rate-limit window is exhausted.
    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until a slot frees.
        retry_after_secs: u64,
        /// Limit of the exhausted window.
        limit: u32,
        /// When the window frees a slot.
        reset_at: Option<DateTime<Utc>>,
    },

    /// Insufficient credits.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance.
        balance: i64,
        /// Cost of the action.
        required: i64,
        /// The action.
        action: String,
    },

    /// A billable action was requested without a principal.
    #[error("authentication required")]
    AuthenticationRequired,

    /// The principal already used the promo code.
    #[error("promo code {code} already redeemed")]
    AlreadyRedeemed {
        /// The code.
        code: String,
    },

    /// The service could not reach its store.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Whether the caller should show a purchase prompt.
    #[must_use]
    pub const fn is_payment_required(&self) -> bool {
        matches!(self, Self::InsufficientCredits { .. })
    }
}
