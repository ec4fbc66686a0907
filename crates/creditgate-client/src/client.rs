//! Creditgate HTTP client implementation.

use reqwest::{Client, StatusCode};
use std::time::Duration;

use creditgate_core::{Metadata, PrincipalId};

use crate::error::ClientError;
use crate::types::{
    AdmitRequest, AdmitResponse, ApiErrorResponse, CheckResponse, DeductRequest, DeductResponse,
};

/// Creditgate API client.
///
/// Provides admission, deduction, and sufficiency calls for the web layer.
#[derive(Debug, Clone)]
pub struct CreditGateClient {
    client: Client,
    base_url: String,
    api_key: String,
    service_name: String,
}

impl CreditGateClient {
    /// Create a new creditgate client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the creditgate service (e.g., `"http://creditgate:8080"`)
    /// * `api_key` - Service API key for authentication
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Configuration` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_options(base_url, api_key, ClientOptions::default())
    }

    /// Create a new creditgate client with custom options.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Configuration` for an empty base URL or if the
    /// HTTP client cannot be built.
    pub fn with_options(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ClientError::Configuration("base URL is empty".into()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()
            .map_err(|e| ClientError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.into(),
            service_name: options.service_name,
        })
    }

    /// Ask the admission gate whether a request may proceed.
    ///
    /// # Errors
    ///
    /// - `ClientError::RateLimited` when a window is exhausted.
    /// - `ClientError::InsufficientCredits` when the balance does not cover
    ///   the endpoint's action.
    /// - `ClientError::AuthenticationRequired` for a billable endpoint without
    ///   a principal.
    pub async fn admit(&self, request: &AdmitRequest) -> Result<AdmitResponse, ClientError> {
        let url = format!("{}/v1/admission", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
            .json(request)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Charge an action after the billable operation succeeded.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InsufficientCredits` if the balance fell below
    /// the cost since admission, or another error if the request fails.
    pub async fn deduct(
        &self,
        principal: PrincipalId,
        action: &str,
        metadata: Option<Metadata>,
    ) -> Result<DeductResponse, ClientError> {
        let url = format!("{}/v1/credits/deduct", self.base_url);
        let request = DeductRequest {
            principal,
            action: action.to_string(),
            metadata,
        };

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
            .json(&request)
            .send()
            .await?;

        let deduction: DeductResponse = self.handle_response(response).await?;
        tracing::debug!(
            principal = %principal,
            action,
            new_balance = deduction.new_balance,
            "Deduction reported"
        );
        Ok(deduction)
    }

    /// Check whether a user can afford an action (requires the user's JWT).
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn check(&self, user_jwt: &str, action: &str) -> Result<CheckResponse, ClientError> {
        let url = format!("{}/v1/credits/check", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("action", action)])
            .header("authorization", format!("Bearer {user_jwt}"))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();

        if status.is_success() {
            let body = response.bytes().await?;
            return Ok(serde_json::from_slice(&body)?);
        }

        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        // Try to parse error response
        let error_body: Result<ApiErrorResponse, _> = response.json().await;

        let Ok(api_error) = error_body else {
            return Err(match status {
                StatusCode::SERVICE_UNAVAILABLE => ClientError::Unavailable(format!("HTTP {status}")),
                _ => ClientError::Api {
                    code: "unknown".to_string(),
                    message: format!("HTTP {status}"),
                    status: status.as_u16(),
                },
            });
        };

        let error = api_error.error;
        tracing::debug!(code = %error.code, status = status.as_u16(), "Creditgate returned an error");

        // Map specific error codes to typed errors
        Err(match error.code.as_str() {
            "rate_limited" => ClientError::RateLimited {
                retry_after_secs: error
                    .detail_i64("retry_after")
                    .and_then(|v| u64::try_from(v).ok())
                    .or(retry_after)
                    .unwrap_or(1),
                limit: error
                    .detail_i64("limit")
                    .and_then(|v| u32::try_from(v).ok())
                    .unwrap_or(0),
                reset_at: error
                    .detail_str("reset_at")
                    .and_then(|v| v.parse().ok()),
            },
            "insufficient_credits" => ClientError::InsufficientCredits {
                balance: error.detail_i64("current_balance").unwrap_or(0),
                required: error.detail_i64("required_credits").unwrap_or(0),
                action: error.detail_str("action").unwrap_or_default().to_string(),
            },
            "authentication_required" => ClientError::AuthenticationRequired,
            "already_redeemed" => ClientError::AlreadyRedeemed {
                code: error.detail_str("code").unwrap_or_default().to_string(),
            },
            "service_unavailable" => ClientError::Unavailable(error.message),
            _ => ClientError::Api {
                code: error.code,
                message: error.message,
                status: status.as_u16(),
            },
        })
    }
}

/// Client options for customization.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request timeout in seconds (default: 5).
    pub timeout_seconds: u64,
    /// Service name to include in requests.
    pub service_name: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 5,
            service_name: "unknown".to_string(),
        }
    }
}

impl ClientOptions {
    /// Create options with a service name.
    #[must_use]
    pub fn with_service_name(name: impl Into<String>) -> Self {
        Self {
            service_name: name.into(),
            ..Self::default()
        }
    }
}
