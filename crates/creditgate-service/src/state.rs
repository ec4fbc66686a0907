//! Application state.

use std::sync::Arc;

use creditgate_core::{Clock, SystemClock};
use creditgate_meter::{
    AdmissionGate, Analytics, CreditMeter, MonthlyReset, PromoRedeemer, RateLimiter,
};
use creditgate_store::Store;

use crate::config::ServiceConfig;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Time source for every component.
    pub clock: Arc<dyn Clock>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Balance checks and mutations.
    pub meter: Arc<CreditMeter>,

    /// Request rate limiting.
    pub limiter: Arc<RateLimiter>,

    /// Monthly allotment.
    pub monthly: Arc<MonthlyReset>,

    /// Promo codes.
    pub promos: Arc<PromoRedeemer>,

    /// Usage rollups.
    pub analytics: Arc<Analytics>,

    /// Per-request admission decisions.
    pub gate: Arc<AdmissionGate>,
}

impl AppState {
    /// Create a new application state on the system clock.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), config)
    }

    /// Create a new application state on `clock`.
    #[must_use]
    pub fn with_clock(store: Arc<dyn Store>, clock: Arc<dyn Clock>, config: ServiceConfig) -> Self {
        let meter = Arc::new(CreditMeter::new(
            store.clone(),
            clock.clone(),
            config.action_costs.clone(),
            config.credit_policy,
        ));
        let limiter = Arc::new(RateLimiter::new(
            store.clone(),
            clock.clone(),
            config.rate_limits.clone(),
        ));
        let monthly = Arc::new(MonthlyReset::new(store.clone(), clock.clone(), meter.clone()));
        let promos = Arc::new(PromoRedeemer::new(store.clone(), clock.clone(), meter.clone()));
        let analytics = Arc::new(Analytics::new(store.clone(), clock.clone()));
        let gate = Arc::new(AdmissionGate::new(
            limiter.clone(),
            meter.clone(),
            monthly.clone(),
            config.billable.clone(),
        ));

        if config.service_api_key.is_none() {
            tracing::warn!("SERVICE_API_KEY not set - service endpoints will reject all requests");
        }
        if config.admin_api_key.is_none() {
            tracing::warn!("ADMIN_API_KEY not set - admin endpoints will reject all requests");
        }

        Self {
            store,
            clock,
            config,
            meter,
            limiter,
            monthly,
            promos,
            analytics,
            gate,
        }
    }
}
