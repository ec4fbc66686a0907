//! Authentication extractors.
//!
//! - `AuthUser` - End-user authentication via HS256 JWT
//! - `ServiceAuth` - Service-to-service authentication via API key
//! - `AdminAuth` - Admin authentication for privileged endpoints

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use creditgate_core::PrincipalId;

use crate::config::ServiceConfig;
use crate::error::ApiError;
use crate::state::AppState;

/// An authenticated end user.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    /// The principal the token was issued to.
    pub principal: PrincipalId,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(ApiError::Unauthorized)?;
        let principal = principal_from_token(token, &state.config)?;
        Ok(AuthUser { principal })
    }
}

/// Resolve the principal from an optional bearer token.
///
/// No `Authorization` header means an anonymous caller; a header that does
/// not validate is rejected.
///
/// # Errors
///
/// Returns `ApiError::Unauthorized` for a malformed or invalid token.
pub fn optional_principal(
    headers: &HeaderMap,
    config: &ServiceConfig,
) -> Result<Option<PrincipalId>, ApiError> {
    if headers.get("authorization").is_none() {
        return Ok(None);
    }
    let token = bearer_token(headers).ok_or(ApiError::Unauthorized)?;
    principal_from_token(token, config).map(Some)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

fn principal_from_token(token: &str, config: &ServiceConfig) -> Result<PrincipalId, ApiError> {
    // Only compiled into tests and builds with the "test-auth" feature.
    #[cfg(any(test, feature = "test-auth"))]
    if let Some(id) = token.strip_prefix("test-token:") {
        return id.parse().map_err(|_| ApiError::Unauthorized);
    }

    let claims = validate_jwt(token, config)?;
    claims.sub.parse().map_err(|_| {
        tracing::debug!(sub = %claims.sub, "JWT subject is not a principal id");
        ApiError::Unauthorized
    })
}

/// JWT claims accepted for end users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (principal id).
    pub sub: String,
    /// Audience (can be string or array).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<serde_json::Value>,
    /// Expiration time.
    pub exp: i64,
    /// Issued at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

/// Validate an HS256 token against the configured secret.
fn validate_jwt(token: &str, config: &ServiceConfig) -> Result<JwtClaims, ApiError> {
    let Some(secret) = config.jwt_secret.as_deref() else {
        tracing::debug!("JWT_SECRET not configured, rejecting bearer token");
        return Err(ApiError::Unauthorized);
    };

    let mut validation = Validation::new(Algorithm::HS256);
    match config.jwt_audience.as_deref() {
        Some(audience) => validation.set_audience(&[audience]),
        None => validation.validate_aud = false,
    }

    decode::<JwtClaims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::debug!(error = %e, "JWT validation failed");
            ApiError::Unauthorized
        })
}

/// Service authentication via API key.
///
/// Used by the web layer that fronts billable features.
#[derive(Debug, Clone)]
pub struct ServiceAuth {
    /// The service name or identifier.
    pub service_name: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for ServiceAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        check_key(
            &parts.headers,
            "x-api-key",
            state.config.service_api_key.as_deref(),
        )?;

        let service_name = header_or(&parts.headers, "x-service-name", "unknown");
        Ok(ServiceAuth { service_name })
    }
}

/// Admin authentication via the `X-Admin-Key` header.
#[derive(Debug, Clone)]
pub struct AdminAuth {
    /// Admin identifier (for audit logging).
    pub admin_id: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        check_key(
            &parts.headers,
            "x-admin-key",
            state.config.admin_api_key.as_deref(),
        )?;

        let admin_id = header_or(&parts.headers, "x-admin-id", "admin");
        tracing::info!(admin_id = %admin_id, "Admin authenticated");
        Ok(AdminAuth { admin_id })
    }
}

fn check_key(headers: &HeaderMap, name: &str, expected: Option<&str>) -> Result<(), ApiError> {
    let provided = headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;
    let expected = expected.ok_or(ApiError::Unauthorized)?;

    if constant_time_eq(provided, expected) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

fn header_or(headers: &HeaderMap, name: &str, default: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(default)
        .to_string()
}

/// Compare two secrets without short-circuiting on the first mismatch.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn config() -> ServiceConfig {
        ServiceConfig {
            jwt_secret: Some("unit-test-secret".into()),
            jwt_audience: Some("creditgate".into()),
            ..ServiceConfig::default()
        }
    }

    fn token(sub: &str, aud: &str, secret: &str) -> String {
        let claims = JwtClaims {
            sub: sub.to_string(),
            aud: Some(serde_json::json!(aud)),
            exp: chrono::Utc::now().timestamp() + 600,
            iat: None,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn valid_jwt_resolves_principal() {
        let principal = PrincipalId::generate();
        let jwt = token(&principal.to_string(), "creditgate", "unit-test-secret");

        let resolved = optional_principal(&headers(&format!("Bearer {jwt}")), &config()).unwrap();
        assert_eq!(resolved, Some(principal));
    }

    #[test]
    fn wrong_secret_or_audience_is_rejected() {
        let principal = PrincipalId::generate().to_string();

        let forged = token(&principal, "creditgate", "other-secret");
        assert!(optional_principal(&headers(&format!("Bearer {forged}")), &config()).is_err());

        let elsewhere = token(&principal, "someone-else", "unit-test-secret");
        assert!(optional_principal(&headers(&format!("Bearer {elsewhere}")), &config()).is_err());
    }

    #[test]
    fn missing_header_is_anonymous() {
        assert_eq!(optional_principal(&HeaderMap::new(), &config()).unwrap(), None);
        assert!(optional_principal(&headers("Basic abc"), &config()).is_err());
    }

    #[test]
    fn test_tokens_work_in_tests() {
        let principal = PrincipalId::generate();
        let resolved = optional_principal(
            &headers(&format!("Bearer test-token:{principal}")),
            &ServiceConfig::default(),
        )
        .unwrap();
        assert_eq!(resolved, Some(principal));
    }

    #[test]
    fn constant_time_eq_compares_bytes() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "ab"));
    }
}
