//! Metered access for creditgate.
//!
//! The engine that sits between the HTTP layer and the store:
//!
//! - [`CreditMeter`]: sufficiency checks, deductions, credits, refunds
//! - [`RateLimiter`]: minute/hour/day windows per principal or IP
//! - [`MonthlyReset`]: the once-per-month free allotment
//! - [`PromoRedeemer`]: promo validation, redemption, purchase discounts
//! - [`Analytics`]: read-only rollups over the ledger
//! - [`AdmissionGate`]: the per-request decision combining the above
//!
//! Every component holds an `Arc<dyn Store>` and an `Arc<dyn Clock>`; all
//! coordination between concurrent callers happens in the store.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use creditgate_core::{ActionCostTable, CreditPolicy, PrincipalId, SystemClock};
//! use creditgate_meter::CreditMeter;
//! use creditgate_store::MemoryStore;
//!
//! # async fn run() -> creditgate_core::Result<()> {
//! let meter = CreditMeter::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(SystemClock),
//!     ActionCostTable::default(),
//!     CreditPolicy::default(),
//! );
//! let principal = PrincipalId::generate();
//! let deduction = meter.deduct(&principal, "stock_search", None).await?;
//! assert_eq!(deduction.new_balance, 98);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod admission;
pub mod analytics;
pub mod credit_meter;
pub mod monthly;
pub mod promo;
pub mod rate_limiter;

pub use admission::{status_for, AdmissionGate, AdmissionRequest, Allow, BillableEndpoints, Denial};
pub use analytics::{Analytics, GlobalReport, UsageReport};
pub use credit_meter::{Credit, CreditMeter, Deduction, Sufficiency};
pub use monthly::MonthlyReset;
pub use promo::{PromoRedeemer, PromoValidation, PurchaseQuote, RedeemResult};
pub use rate_limiter::RateLimiter;
