//! API error types and responses.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use creditgate_core::{MeterError, PromoRejection};
use creditgate_meter::Denial;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// A billable action was requested without a principal.
    #[error("authentication required")]
    AuthenticationRequired,

    /// Forbidden - valid credentials but insufficient permissions.
    #[error("forbidden")]
    Forbidden,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - resource already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A promo code failed validation.
    #[error("promo code rejected: {0}")]
    PromoRejected(PromoRejection),

    /// The principal already used the code.
    #[error("promo code {code} already redeemed")]
    AlreadyRedeemed {
        /// The code.
        code: String,
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

    /// Rate limit exceeded.
    #[error("rate limit exceeded")]
    RateLimited {
        /// Seconds until a slot frees.
        retry_after_secs: u64,
        /// Limit of the exhausted window.
        limit: u32,
        /// When the window frees a slot.
        reset_at: DateTime<Utc>,
    },

    /// Storage could not be reached; nothing was changed.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::AuthenticationRequired => (
                StatusCode::UNAUTHORIZED,
                "authentication_required",
                "Sign in to use this feature".to_string(),
                None,
            ),
            Self::Forbidden => (StatusCode::FORBIDDEN, "forbidden", self.to_string(), None),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::PromoRejected(reason) => (
                StatusCode::BAD_REQUEST,
                "promo_rejected",
                reason.to_string(),
                serde_json::to_value(reason).ok(),
            ),
            Self::AlreadyRedeemed { code } => (
                StatusCode::CONFLICT,
                "already_redeemed",
                format!("Promo code {code} has already been redeemed"),
                Some(serde_json::json!({ "code": code })),
            ),
            Self::InsufficientCredits {
                balance,
                required,
                action,
            } => (
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_credits",
                "Not enough credits for this action. Purchase more credits to continue."
                    .to_string(),
                Some(serde_json::json!({
                    "current_balance": balance,
                    "required_credits": required,
                    "shortfall": (required - balance).max(0),
                    "action": action,
                })),
            ),
            Self::RateLimited {
                retry_after_secs,
                limit,
                reset_at,
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                format!("Too many requests. Try again in {retry_after_secs} seconds."),
                Some(serde_json::json!({
                    "retry_after": retry_after_secs,
                    "limit": limit,
                    "reset_at": reset_at,
                })),
            ),
            Self::Unavailable(msg) => {
                tracing::error!(error = %msg, "Storage unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "service_unavailable",
                    "Service temporarily unavailable, please try again".to_string(),
                    None,
                )
            }
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        let mut response = (status, Json(body)).into_response();
        if let Self::RateLimited {
            retry_after_secs, ..
        } = self
        {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<MeterError> for ApiError {
    fn from(err: MeterError) -> Self {
        match err {
            MeterError::Validation(msg) => Self::BadRequest(msg),
            MeterError::PromoRejected(reason) => Self::PromoRejected(reason),
            MeterError::InsufficientCredits {
                balance,
                required,
                action,
            } => Self::InsufficientCredits {
                balance,
                required,
                action,
            },
            MeterError::RateLimitExceeded {
                retry_after_secs,
                limit,
                reset_at,
            } => Self::RateLimited {
                retry_after_secs,
                limit,
                reset_at,
            },
            MeterError::AuthenticationRequired => Self::AuthenticationRequired,
            MeterError::AlreadyRedeemed { code } => Self::AlreadyRedeemed { code },
            MeterError::StorageUnavailable(msg) => Self::Unavailable(msg),
        }
    }
}

impl From<Denial> for ApiError {
    fn from(denial: Denial) -> Self {
        denial.error.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_sets_retry_after() {
        let response = ApiError::RateLimited {
            retry_after_secs: 42,
            limit: 10,
            reset_at: Utc::now(),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
    }

    #[test]
    fn meter_errors_map_to_statuses() {
        let cases = [
            (MeterError::AuthenticationRequired, StatusCode::UNAUTHORIZED),
            (
                MeterError::InsufficientCredits {
                    balance: 1,
                    required: 2,
                    action: "stock_search".into(),
                },
                StatusCode::PAYMENT_REQUIRED,
            ),
            (
                MeterError::AlreadyRedeemed { code: "X".into() },
                StatusCode::CONFLICT,
            ),
            (
                MeterError::StorageUnavailable("down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (MeterError::Validation("bad".into()), StatusCode::BAD_REQUEST),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }
}
