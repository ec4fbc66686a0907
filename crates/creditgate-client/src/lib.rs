//! Creditgate Client SDK.
//!
//! This crate lets the web layer that fronts billable features call the
//! creditgate admission gate and report deductions.
//!
//! # Example
//!
//! ```no_run
//! use creditgate_client::{AdmitRequest, CreditGateClient};
//!
//! # async fn example() -> Result<(), creditgate_client::ClientError> {
//! let client = CreditGateClient::new("http://creditgate:8080", "your-service-api-key")?;
//!
//! let principal = "0b5a3f4e-8f7c-4b8e-9d55-7d2f4c1e6a10".parse().ok();
//! let allow = client
//!     .admit(&AdmitRequest {
//!         principal,
//!         ip: "203.0.113.7".parse().unwrap(),
//!         endpoint: "/api/stock/search".to_string(),
//!     })
//!     .await?;
//!
//! // ... run the feature, then charge it
//! if let (Some(principal), Some(action)) = (principal, allow.action) {
//!     let deduction = client.deduct(principal, &action, None).await?;
//!     println!("New balance: {} credits", deduction.new_balance);
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod error;
mod types;

pub use client::{ClientOptions, CreditGateClient};
pub use error::ClientError;
pub use types::*;
