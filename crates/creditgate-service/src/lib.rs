//! Creditgate HTTP API Service.
//!
//! This crate exposes the metered-access engine over HTTP:
//!
//! - The admission gate, as an endpoint and as router middleware
//! - Credit balances, the ledger, deductions, and the monthly allotment
//! - Promo code validation, redemption, and purchase discounts
//! - Usage analytics and administrative maintenance
//!
//! # Authentication
//!
//! The service supports three authentication methods:
//!
//! 1. **HS256 JWT tokens** - For end-user requests
//! 2. **Service API keys** - For the web layer fronting billable features
//! 3. **Admin API keys** - For promo administration and adjustments

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Health handler needs async for routing

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::{ServiceConfig, StoreBackend};
pub use error::ApiError;
pub use middleware::with_metering;
pub use routes::create_router;
pub use state::AppState;
