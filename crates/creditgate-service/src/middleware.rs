//! Metering middleware.
//!
//! Runs the admission gate in front of any router: rate limits every
//! non-exempt request, refuses billable requests the caller cannot afford,
//! and deducts the action's cost once the inner handler succeeds.
//!
//! ```ignore
//! let app = Router::new().route("/api/stock/search", get(search));
//! let app = creditgate_service::middleware::with_metering(app, state);
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;

use creditgate_meter::{AdmissionRequest, Allow};

use crate::auth::optional_principal;
use crate::error::ApiError;
use crate::state::AppState;

/// Wrap `router` so every request passes through [`metered`].
pub fn with_metering<S>(router: Router<S>, state: Arc<AppState>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(middleware::from_fn_with_state(state, metered))
}

/// Admission middleware.
///
/// Denials short-circuit with the gate's error response. Deduction failures
/// after a successful response are logged; the response is still returned.
pub async fn metered(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let principal = match optional_principal(request.headers(), &state.config) {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    let admission = AdmissionRequest {
        principal,
        ip: client_ip(&request),
        endpoint: request.uri().path().to_string(),
    };

    let mut allow = match state.gate.admit(&admission).await {
        Ok(allow) => allow,
        Err(denial) => return ApiError::from(denial).into_response(),
    };

    let mut response = next.run(request).await;

    if response.status().is_success() {
        if let (Some(action), Some(principal)) = (allow.action.as_deref(), principal) {
            match state.meter.deduct(&principal, action, None).await {
                Ok(deduction) => allow.credit_balance = Some(deduction.new_balance),
                Err(err) => {
                    tracing::warn!(
                        principal = %principal,
                        action,
                        error = %err,
                        "Deduction after successful request failed"
                    );
                }
            }
        }
    }

    apply_allow_headers(&allow, response.headers_mut());
    response
}

/// Copy the admission headers onto a response.
pub fn apply_allow_headers(allow: &Allow, headers: &mut HeaderMap) {
    for (name, value) in allow.headers() {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
}

/// Caller address: first `x-forwarded-for` hop, else the socket peer.
fn client_ip(request: &Request) -> IpAddr {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok());

    forwarded
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        })
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_with(headers: &[(&str, &str)]) -> Request {
        let mut builder = Request::builder().uri("/api/x");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn forwarded_for_takes_first_hop() {
        let request = request_with(&[("x-forwarded-for", "203.0.113.7, 10.0.0.1")]);
        assert_eq!(client_ip(&request), "203.0.113.7".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn falls_back_to_connect_info() {
        let mut request = request_with(&[]);
        request
            .extensions_mut()
            .insert(ConnectInfo("198.51.100.2:4000".parse::<SocketAddr>().unwrap()));
        assert_eq!(client_ip(&request), "198.51.100.2".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn unknown_peer_is_unspecified() {
        let request = request_with(&[("x-forwarded-for", "not-an-ip")]);
        assert_eq!(client_ip(&request), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }

    #[test]
    fn headers_are_applied() {
        let allow = Allow {
            remaining: Some(9),
            limit: Some(10),
            reset_at: None,
            window: None,
            credit_balance: Some(42),
            action: None,
            cost: None,
        };
        let mut headers = HeaderMap::new();
        apply_allow_headers(&allow, &mut headers);
        assert_eq!(headers["x-ratelimit-remaining"], "9");
        assert_eq!(headers["x-ratelimit-limit"], "10");
        assert_eq!(headers["x-credit-balance"], "42");
        assert!(headers.get("x-ratelimit-reset").is_none());
    }
}
