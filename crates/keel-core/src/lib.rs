//! # keel-core
//! Foundation types, time grid, and traits for the Keel staking pool.
//!
//! All ledger arithmetic is integer-only with `u128` amounts.

pub mod config;
pub mod constants;
pub mod error;
pub mod math;
pub mod time;
pub mod traits;
pub mod types;
