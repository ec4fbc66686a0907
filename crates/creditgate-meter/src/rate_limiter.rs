//! Per-identity request rate limiting over minute, hour, and day windows.

use std::sync::Arc;

use creditgate_core::rate_limit::normalize_endpoint;
use creditgate_core::{
    Clock, Evaluation, Identity, RateLimitDecision, RateLimitPolicy, Result,
};
use creditgate_store::Store;

/// Admits or denies requests and records admitted ones.
///
/// Storage failures propagate: the limiter fails closed.
pub struct RateLimiter {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    policy: RateLimitPolicy,
}

impl RateLimiter {
    /// Create a limiter enforcing `policy`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, policy: RateLimitPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    /// The policy in force.
    #[must_use]
    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Check and, if admitted, record one request.
    ///
    /// Exempt endpoints are allowed without being recorded.
    ///
    /// # Errors
    ///
    /// Returns `MeterError::StorageUnavailable` if the store fails.
    pub async fn check(&self, identity: &Identity, endpoint: &str) -> Result<RateLimitDecision> {
        let now = self.clock.now();
        let endpoint = normalize_endpoint(endpoint);

        if self.policy.is_exempt(endpoint) {
            return Ok(RateLimitDecision::exempt(now));
        }

        let limits = self.policy.limits_for(endpoint).ordered();
        let evaluation = self
            .store
            .admit_request(&identity.key(), endpoint, &limits, now)
            .await?;

        Ok(match evaluation {
            Evaluation::Admit(usages) => RateLimitDecision::admitted(&usages, now),
            Evaluation::Deny(usage) => {
                let decision = RateLimitDecision::denied(&usage, now);
                tracing::warn!(
                    identity = %identity,
                    endpoint,
                    window = usage.window.as_str(),
                    limit = usage.limit,
                    retry_after = decision.retry_after,
                    "Rate limit exceeded"
                );
                decision
            }
        })
    }

    /// Report where `identity` stands without recording a request.
    ///
    /// # Errors
    ///
    /// Returns `MeterError::StorageUnavailable` if the store fails.
    pub async fn status(&self, identity: &Identity, endpoint: &str) -> Result<RateLimitDecision> {
        let now = self.clock.now();
        let endpoint = normalize_endpoint(endpoint);

        if self.policy.is_exempt(endpoint) {
            return Ok(RateLimitDecision::exempt(now));
        }

        let limits = self.policy.limits_for(endpoint).ordered();
        let evaluation = self
            .store
            .peek_requests(&identity.key(), endpoint, &limits, now)
            .await?;

        Ok(match evaluation {
            Evaluation::Admit(usages) => {
                let mut decision = RateLimitDecision::admitted(&usages, now);
                // Nothing was admitted, so nothing is consumed.
                decision.remaining = usages
                    .iter()
                    .map(|u| u.limit.saturating_sub(u.count))
                    .min()
                    .unwrap_or(decision.remaining);
                decision
            }
            Evaluation::Deny(usage) => RateLimitDecision::denied(&usage, now),
        })
    }

    /// Delete every tracking row for `identity`.
    ///
    /// # Errors
    ///
    /// Returns `MeterError::StorageUnavailable` if the store fails.
    pub async fn reset(&self, identity: &Identity) -> Result<u64> {
        let removed = self.store.reset_rate_limits(&identity.key()).await?;
        tracing::info!(identity = %identity, removed, "Rate limits reset");
        Ok(removed)
    }

    /// Purge rows older than the longest window.
    ///
    /// # Errors
    ///
    /// Returns `MeterError::StorageUnavailable` if the store fails.
    pub async fn cleanup(&self) -> Result<u64> {
        let cutoff = self.clock.now() - self.policy.longest_window().duration();
        let removed = self.store.purge_rate_limits(cutoff).await?;
        tracing::debug!(removed, %cutoff, "Rate-limit records purged");
        Ok(removed)
    }
}
