//! API handlers.

pub mod admin;
pub mod admission;
pub mod analytics;
pub mod credits;
pub mod health;
pub mod promo;
