//! Service configuration.

use std::str::FromStr;

use creditgate_core::{
    ActionCostTable, CreditPolicy, EndpointLimits, RateLimitPolicy, WindowLimits,
};
use creditgate_meter::BillableEndpoints;

/// Which store backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// In-process maps. Data is lost on restart.
    Memory,
    /// PostgreSQL via `DATABASE_URL`.
    Postgres,
    /// Embedded `RocksDB` under `DATA_DIR`.
    Rocksdb,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "rocksdb" | "rocks" => Ok(Self::Rocksdb),
            other => Err(format!("unknown store backend: {other}")),
        }
    }
}

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Storage backend (default: memory).
    pub store_backend: StoreBackend,

    /// PostgreSQL connection string.
    pub database_url: Option<String>,

    /// PostgreSQL pool size (default: 10).
    pub database_max_connections: u32,

    /// Path to `RocksDB` data directory (default: "/data/creditgate").
    pub data_dir: String,

    /// HS256 secret for user JWTs. Without it only test tokens (when
    /// compiled in) are accepted.
    pub jwt_secret: Option<String>,

    /// Expected JWT audience, if any.
    pub jwt_audience: Option<String>,

    /// Service API key for service-to-service auth.
    pub service_api_key: Option<String>,

    /// Admin API key for privileged endpoints.
    pub admin_api_key: Option<String>,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Initial grant, monthly allotment, and balance ceiling.
    pub credit_policy: CreditPolicy,

    /// Credit cost per action.
    pub action_costs: ActionCostTable,

    /// Window limits, overrides, and exempt prefixes.
    pub rate_limits: RateLimitPolicy,

    /// Seconds between rate-limit purges; 0 disables the task.
    pub rate_limit_cleanup_seconds: u64,

    /// Endpoint prefixes billed by the admission gate.
    pub billable: BillableEndpoints,
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    ///
    /// Malformed values are logged and replaced by their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let credit_policy = CreditPolicy {
            initial_credits: env_parse("INITIAL_CREDITS", defaults.credit_policy.initial_credits),
            monthly_credits: env_parse("MONTHLY_CREDITS", defaults.credit_policy.monthly_credits),
            balance_ceiling: env_parse("CREDIT_CEILING", defaults.credit_policy.balance_ceiling),
        };

        let mut action_costs = ActionCostTable::default();
        if let Ok(spec) = std::env::var("ACTION_COSTS") {
            if let Err(e) = action_costs.apply_overrides(&spec) {
                tracing::warn!(error = %e, "Ignoring malformed ACTION_COSTS");
                action_costs = ActionCostTable::default();
            }
        }

        let default_limits = WindowLimits {
            per_minute: env_parse("RATE_LIMIT_PER_MINUTE", defaults.rate_limits.default_limits.per_minute),
            per_hour: env_parse("RATE_LIMIT_PER_HOUR", defaults.rate_limits.default_limits.per_hour),
            per_day: env_parse("RATE_LIMIT_PER_DAY", defaults.rate_limits.default_limits.per_day),
        };
        let exempt_prefixes = std::env::var("RATE_LIMIT_EXEMPT_PREFIXES")
            .map(|s| split_list(&s))
            .unwrap_or(defaults.rate_limits.exempt_prefixes);
        let overrides = std::env::var("RATE_LIMIT_OVERRIDES")
            .ok()
            .map(|s| parse_overrides(&s, default_limits))
            .unwrap_or_default();

        let billable = std::env::var("BILLABLE_ENDPOINTS")
            .ok()
            .and_then(|s| match BillableEndpoints::parse(&s) {
                Ok(billable) => Some(billable),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring malformed BILLABLE_ENDPOINTS");
                    None
                }
            })
            .unwrap_or_default();

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            store_backend: env_parse("STORE_BACKEND", defaults.store_backend),
            database_url: std::env::var("DATABASE_URL").ok(),
            database_max_connections: env_parse(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            data_dir: std::env::var("DATA_DIR").unwrap_or(defaults.data_dir),
            jwt_secret: std::env::var("JWT_SECRET").ok(),
            jwt_audience: std::env::var("JWT_AUDIENCE").ok(),
            service_api_key: std::env::var("SERVICE_API_KEY").ok(),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok(),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| split_list(&s))
                .unwrap_or(defaults.cors_origins),
            max_body_bytes: env_parse("MAX_BODY_BYTES", defaults.max_body_bytes),
            request_timeout_seconds: env_parse(
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            ),
            credit_policy,
            action_costs,
            rate_limits: RateLimitPolicy {
                default_limits,
                overrides,
                exempt_prefixes,
            },
            rate_limit_cleanup_seconds: env_parse(
                "RATE_LIMIT_CLEANUP_SECONDS",
                defaults.rate_limit_cleanup_seconds,
            ),
            billable,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            store_backend: StoreBackend::Memory,
            database_url: None,
            database_max_connections: 10,
            data_dir: "/data/creditgate".into(),
            jwt_secret: None,
            jwt_audience: None,
            service_api_key: None,
            admin_api_key: None,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024, // 1MB
            request_timeout_seconds: 30,
            credit_policy: CreditPolicy::default(),
            action_costs: ActionCostTable::default(),
            rate_limits: RateLimitPolicy::default(),
            rate_limit_cleanup_seconds: 300,
            billable: BillableEndpoints::default(),
        }
    }
}

/// Read and parse an environment variable, falling back on absence or error.
fn env_parse<T>(name: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|e| {
            tracing::warn!(var = name, value = %raw, error = %e, "Malformed value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse `"/prefix=per_minute,/other=per_minute"` into per-prefix limits that
/// keep the hour and day limits of `base`.
fn parse_overrides(raw: &str, base: WindowLimits) -> Vec<EndpointLimits> {
    split_list(raw)
        .into_iter()
        .filter_map(|entry| {
            let parsed = entry
                .split_once('=')
                .and_then(|(prefix, limit)| Some((prefix.trim(), limit.trim().parse().ok()?)));
            match parsed {
                Some((prefix, per_minute)) if prefix.starts_with('/') => Some(EndpointLimits {
                    prefix: prefix.to_string(),
                    limits: WindowLimits { per_minute, ..base },
                }),
                _ => {
                    tracing::warn!(entry = %entry, "Ignoring malformed rate-limit override");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_parse() {
        assert_eq!("Postgres".parse::<StoreBackend>(), Ok(StoreBackend::Postgres));
        assert_eq!("rocksdb".parse::<StoreBackend>(), Ok(StoreBackend::Rocksdb));
        assert!("mysql".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn overrides_keep_base_hour_and_day() {
        let base = WindowLimits::default();
        let overrides = parse_overrides("/api/ai=5, bogus, /api/x=abc", base);

        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides[0].prefix, "/api/ai");
        assert_eq!(overrides[0].limits.per_minute, 5);
        assert_eq!(overrides[0].limits.per_day, base.per_day);
    }

    #[test]
    fn list_splitting_drops_blanks() {
        assert_eq!(split_list(" a, ,b ,"), vec!["a".to_string(), "b".to_string()]);
    }
}
