//! # keel-pricing — Premium pricing and capacity weighting.
//!
//! - **Premium**: a per-product bumped price that rises with each purchase in
//!   proportion to the capacity consumed and decays linearly toward the
//!   target price, plus a quadratic surge premium past the utilization threshold.
//! - **Capacity**: active stake converted to allocation units per tranche,
//!   scaled by the global capacity ratio, the product's capacity reduction
//!   and its target weight.
//! - **Products**: the product catalog and each pool's target weights and
//!   prices, guarded by the total effective weight ceiling.

pub mod capacity;
pub mod premium;
pub mod products;

pub use capacity::{effective_weight, total_capacity, tranche_capacity, CapacityParams};
pub use premium::{quote, PremiumQuote};
pub use products::{ProductBook, ProductInfo, ProductParams, StakedProduct};
