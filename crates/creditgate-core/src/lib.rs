//! Core types and pure logic for creditgate.
//!
//! This crate holds the domain model of the metered-access subsystem:
//!
//! - **Identifiers**: `PrincipalId`, `TransactionId`, `PromoUsageId`, `Identity`
//! - **Accounts**: `CreditAccount`, `CreditPolicy`
//! - **Ledger**: `Transaction`, `LedgerEntry`, `TransactionKind`
//! - **Costs**: `ActionCostTable`
//! - **Rate limits**: `Window`, `RateLimitPolicy`, `RateLimitRecord`, `evaluate`
//! - **Promos**: `PromoCode`, `PromoUsage`, `PromoRejection`
//! - **Analytics**: `summarize`, `daily_series`, `rank_principals`, `project_burn`
//!
//! # Credits
//!
//! Credits are whole units stored as `i64`. A balance is never negative, and
//! the sum of a principal's ledger amounts always equals the stored balance.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod actions;
pub mod analytics;
pub mod clock;
pub mod credits;
pub mod error;
pub mod ids;
pub mod promo;
pub mod rate_limit;

pub use account::{
    start_of_month, CreditAccount, CreditPolicy, DEFAULT_BALANCE_CEILING,
    DEFAULT_INITIAL_CREDITS, DEFAULT_MONTHLY_CREDITS,
};
pub use actions::{ActionCostTable, DEFAULT_ACTION_COSTS};
pub use analytics::{BurnProjection, DailyUsage, PrincipalUsage, UsageSummary};
pub use clock::{Clock, ManualClock, SystemClock};
pub use credits::{LedgerEntry, Metadata, Transaction, TransactionKind};
pub use error::{MeterError, Result};
pub use ids::{IdError, Identity, PrincipalId, PromoUsageId, TransactionId};
pub use promo::{
    ApplicabilityFilters, PromoBenefits, PromoCode, PromoContext, PromoKind, PromoRejection,
    PromoUsage,
};
pub use rate_limit::{
    EndpointLimits, Evaluation, RateLimitDecision, RateLimitPolicy, RateLimitRecord, Window,
    WindowLimit, WindowLimits, WindowUsage,
};
