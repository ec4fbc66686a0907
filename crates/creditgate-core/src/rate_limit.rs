//! Rate-limit windows, records, and admission evaluation.
//!
//! Only one record is written per admitted request. The hour and day counts
//! are sums over the same records, so the three windows cannot drift apart.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// Default requests per minute.
pub const DEFAULT_PER_MINUTE: u32 = 60;

/// Default requests per hour.
pub const DEFAULT_PER_HOUR: u32 = 1_000;

/// Default requests per day.
pub const DEFAULT_PER_DAY: u32 = 10_000;

/// Paths that are never rate limited or recorded.
pub const DEFAULT_EXEMPT_PREFIXES: &[&str] = &["/health", "/_next/", "/static/", "/favicon.ico"];

/// A fixed window granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Window {
    /// Sixty seconds.
    Minute,
    /// Sixty minutes.
    Hour,
    /// Twenty-four hours.
    Day,
}

impl Window {
    /// Length of the window.
    #[must_use]
    pub fn duration(self) -> Duration {
        match self {
            Self::Minute => Duration::minutes(1),
            Self::Hour => Duration::hours(1),
            Self::Day => Duration::days(1),
        }
    }

    /// Name used in responses and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
        }
    }
}

/// A limit attached to one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowLimit {
    /// The window.
    pub window: Window,
    /// Maximum admitted requests in the trailing window.
    pub limit: u32,
}

/// Limits for the three windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowLimits {
    /// Requests per minute.
    pub per_minute: u32,
    /// Requests per hour.
    pub per_hour: u32,
    /// Requests per day.
    pub per_day: u32,
}

impl WindowLimits {
    /// The limits ordered finest to coarsest, the order they are checked in.
    #[must_use]
    pub fn ordered(&self) -> [WindowLimit; 3] {
        [
            WindowLimit {
                window: Window::Minute,
                limit: self.per_minute,
            },
            WindowLimit {
                window: Window::Hour,
                limit: self.per_hour,
            },
            WindowLimit {
                window: Window::Day,
                limit: self.per_day,
            },
        ]
    }
}

impl Default for WindowLimits {
    fn default() -> Self {
        Self {
            per_minute: DEFAULT_PER_MINUTE,
            per_hour: DEFAULT_PER_HOUR,
            per_day: DEFAULT_PER_DAY,
        }
    }
}

/// Limits that apply to endpoints under a path prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointLimits {
    /// Path prefix, e.g. `/api/ai/`.
    pub prefix: String,
    /// Limits for matching endpoints.
    pub limits: WindowLimits,
}

/// Rate-limit configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Limits for endpoints without an override.
    pub default_limits: WindowLimits,
    /// Per-prefix overrides; the longest matching prefix wins.
    pub overrides: Vec<EndpointLimits>,
    /// Prefixes that are always allowed and never recorded.
    pub exempt_prefixes: Vec<String>,
}

impl RateLimitPolicy {
    /// Whether `endpoint` bypasses rate limiting.
    #[must_use]
    pub fn is_exempt(&self, endpoint: &str) -> bool {
        self.exempt_prefixes
            .iter()
            .any(|prefix| endpoint.starts_with(prefix.as_str()))
    }

    /// The limits that apply to `endpoint`.
    #[must_use]
    pub fn limits_for(&self, endpoint: &str) -> WindowLimits {
        self.overrides
            .iter()
            .filter(|o| endpoint.starts_with(o.prefix.as_str()))
            .max_by_key(|o| o.prefix.len())
            .map_or(self.default_limits, |o| o.limits)
    }

    /// The longest window any rule evaluates.
    #[must_use]
    pub fn longest_window(&self) -> Window {
        Window::Day
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            default_limits: WindowLimits::default(),
            overrides: Vec::new(),
            exempt_prefixes: DEFAULT_EXEMPT_PREFIXES
                .iter()
                .map(|p| (*p).to_string())
                .collect(),
        }
    }
}

/// Strip the query string and fragment from a request path.
#[must_use]
pub fn normalize_endpoint(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    &path[..end]
}

/// One admitted request, at minute granularity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRecord {
    /// `user:<uuid>` or `ip:<addr>`.
    pub identity: String,
    /// Normalized endpoint path.
    pub endpoint: String,
    /// When the request was admitted.
    pub window_start: DateTime<Utc>,
    /// One minute after `window_start`.
    pub window_end: DateTime<Utc>,
    /// Requests represented by this row.
    pub request_count: u32,
}

impl RateLimitRecord {
    /// The record written when a request is admitted at `now`.
    #[must_use]
    pub fn admitted(identity: &str, endpoint: &str, now: DateTime<Utc>) -> Self {
        Self {
            identity: identity.to_string(),
            endpoint: endpoint.to_string(),
            window_start: now,
            window_end: now + Window::Minute.duration(),
            request_count: 1,
        }
    }
}

/// Observed usage of one window before the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowUsage {
    /// The window.
    pub window: Window,
    /// The configured limit.
    pub limit: u32,
    /// Requests already admitted within the trailing window.
    pub count: u32,
    /// Start of the oldest record inside the window.
    pub oldest: Option<DateTime<Utc>>,
}

impl WindowUsage {
    /// Whether one more request would exceed the limit.
    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.count >= self.limit
    }

    /// When the oldest record leaves the window, or a full window from `now`.
    #[must_use]
    pub fn resets_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.oldest.unwrap_or(now) + self.window.duration()
    }
}

/// Outcome of evaluating a request against its windows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// Every window has room; usage is reported per window, pre-admission.
    Admit(Vec<WindowUsage>),
    /// The first exhausted window, checked finest to coarsest.
    Deny(WindowUsage),
}

/// Evaluate `limits` (finest first) against the existing `records` for one
/// identity/endpoint pair.
#[must_use]
pub fn evaluate(
    limits: &[WindowLimit],
    records: &[RateLimitRecord],
    now: DateTime<Utc>,
) -> Evaluation {
    let mut usages = Vec::with_capacity(limits.len());

    for limit in limits {
        let since = now - limit.window.duration();
        let mut count = 0u32;
        let mut oldest: Option<DateTime<Utc>> = None;

        for record in records.iter().filter(|r| r.window_start > since) {
            count = count.saturating_add(record.request_count);
            oldest = Some(oldest.map_or(record.window_start, |o| o.min(record.window_start)));
        }

        let usage = WindowUsage {
            window: limit.window,
            limit: limit.limit,
            count,
            oldest,
        };

        if usage.exhausted() {
            return Evaluation::Deny(usage);
        }
        usages.push(usage);
    }

    Evaluation::Admit(usages)
}

/// The answer returned to callers of the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    /// Whether the request was admitted (and recorded).
    pub allowed: bool,
    /// Requests left in the tightest window.
    pub remaining: u32,
    /// Limit of the tightest (or denying) window.
    pub limit: u32,
    /// When the tightest (or denying) window frees a slot.
    pub reset_at: DateTime<Utc>,
    /// Seconds to wait before retrying, on denial.
    pub retry_after: Option<u64>,
    /// The window that determined this decision.
    pub window: Option<Window>,
}

impl RateLimitDecision {
    /// An unconditional allow for exempt endpoints.
    #[must_use]
    pub fn exempt(now: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            remaining: u32::MAX,
            limit: u32::MAX,
            reset_at: now,
            retry_after: None,
            window: None,
        }
    }

    /// Build the decision for an admitted request.
    ///
    /// `usages` are pre-admission counts; the admitted request itself is
    /// subtracted from `remaining`.
    #[must_use]
    pub fn admitted(usages: &[WindowUsage], now: DateTime<Utc>) -> Self {
        let tightest = usages
            .iter()
            .min_by_key(|u| u.limit.saturating_sub(u.count));

        match tightest {
            Some(usage) => Self {
                allowed: true,
                remaining: usage.limit.saturating_sub(usage.count + 1),
                limit: usage.limit,
                reset_at: usage.resets_at(now),
                retry_after: None,
                window: Some(usage.window),
            },
            None => Self::exempt(now),
        }
    }

    /// Build the decision for a request denied by `usage`.
    #[must_use]
    pub fn denied(usage: &WindowUsage, now: DateTime<Utc>) -> Self {
        let reset_at = usage.resets_at(now);
        let wait_ms = (reset_at - now).num_milliseconds().max(0);
        let wait_secs = u64::try_from(wait_ms.div_euclid(1000) + i64::from(wait_ms % 1000 != 0))
            .unwrap_or(0)
            .max(1);

        Self {
            allowed: false,
            remaining: 0,
            limit: usage.limit,
            reset_at,
            retry_after: Some(wait_secs),
            window: Some(usage.window),
        }
    }
}
