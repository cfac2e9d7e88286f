//! Premium pricing: decaying bumped price plus utilization surge.
//!
//! Each product carries a bumped price that rises with every purchase in
//! proportion to the capacity consumed, and decays linearly back toward
//! the target price. Once utilization passes the surge threshold, the part
//! of a purchase above the threshold pays an extra premium that grows
//! quadratically with utilization.
//!
//! Amounts are priced in allocation units (1 token = 100 units), rounding
//! up so that dust purchases pay for a full unit.

use keel_core::config::PricingConfig;
use keel_core::constants::{
    ALLOCATION_UNITS_PER_TOKEN, ONE_DAY, PRICE_DENOMINATOR, SURGE_THRESHOLD_DENOMINATOR,
    TOKEN_PER_ALLOCATION_UNIT, YEAR,
};
use keel_core::math::mul_div;

use crate::products::StakedProduct;

/// Convert a token amount to allocation units, rounding up.
pub fn amount_to_units(amount: u128) -> u128 {
    amount.div_ceil(TOKEN_PER_ALLOCATION_UNIT)
}

/// Convert allocation units back to a token amount.
pub fn units_to_amount(units: u128) -> u128 {
    units.saturating_mul(TOKEN_PER_ALLOCATION_UNIT)
}

/// Current price after linear decay: `max(target, bumped - change_per_day * days)`.
///
/// Decay is continuous: a half day removes half of `price_change_per_day`.
pub fn base_price(
    bumped_price: u64,
    bumped_price_update_time: u64,
    target_price: u64,
    now: u64,
    price_change_per_day: u64,
) -> u64 {
    let elapsed = now.saturating_sub(bumped_price_update_time) as u128;
    let drop = (price_change_per_day as u128).saturating_mul(elapsed) / ONE_DAY as u128;
    let decayed = (bumped_price as u128).saturating_sub(drop) as u64;
    decayed.max(target_price)
}

/// Price increase for consuming `units` out of `total_capacity`.
pub fn price_bump(units: u128, total_capacity: u128, price_bump_ratio: u64) -> u64 {
    if total_capacity == 0 {
        return 0;
    }
    let bump = mul_div(units, price_bump_ratio as u128, total_capacity).unwrap_or(u128::MAX);
    bump.min(u64::MAX as u128) as u64
}

/// Surge premium for `amount_on_surge` units past the threshold, in base units:
/// `amount² * surge_price_ratio / total_capacity / 2 / ALLOCATION_UNITS_PER_TOKEN`.
pub fn surge_premium(amount_on_surge: u128, total_capacity: u128, surge_price_ratio: u64) -> Option<u128> {
    if amount_on_surge == 0 || total_capacity == 0 {
        return Some(0);
    }
    let squared = amount_on_surge.checked_mul(amount_on_surge)?;
    let denominator = total_capacity.checked_mul(2 * ALLOCATION_UNITS_PER_TOKEN)?;
    mul_div(squared, surge_price_ratio as u128, denominator)
}

/// Annual premium for `units` at `base_price`, with surge for the part of
/// `[initial_used, initial_used + units)` above the surge threshold.
pub fn premium_per_year(
    base_price: u64,
    units: u128,
    initial_used: u128,
    total_capacity: u128,
    cfg: &PricingConfig,
) -> Option<u128> {
    let base = mul_div(units_to_amount(units), base_price as u128, PRICE_DENOMINATOR as u128)?;

    let after = initial_used.checked_add(units)?;
    let surge_start = mul_div(
        total_capacity,
        cfg.surge_threshold_ratio as u128,
        SURGE_THRESHOLD_DENOMINATOR as u128,
    )?;
    if after <= surge_start {
        return Some(base);
    }

    let on_surge = after - surge_start;
    let skipped = initial_used.saturating_sub(surge_start);
    let surge = surge_premium(on_surge, total_capacity, cfg.surge_price_ratio)?
        .saturating_sub(surge_premium(skipped, total_capacity, cfg.surge_price_ratio)?);
    base.checked_add(surge)
}

/// Premium for a fixed-price product: no bump, no surge.
pub fn fixed_price_premium(units: u128, period: u64, price: u64) -> Option<u128> {
    let per_year = mul_div(units_to_amount(units), price as u128, PRICE_DENOMINATOR as u128)?;
    mul_div(per_year, period as u128, YEAR as u128)
}

/// What a purchase costs and where it leaves the product's price.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PremiumQuote {
    pub premium: u128,
    /// Decayed price the purchase was charged at.
    pub base_price: u64,
    /// New bumped price to store.
    pub bumped_price: u64,
}

/// Price a purchase of `units` lasting `period` seconds.
///
/// `initial_used` and `total_capacity` cover the tranches the purchase may
/// draw from. The product is not modified; apply the quote with
/// [`StakedProduct::apply_quote`].
pub fn quote(
    product: &StakedProduct,
    period: u64,
    units: u128,
    initial_used: u128,
    total_capacity: u128,
    now: u64,
    cfg: &PricingConfig,
) -> Option<PremiumQuote> {
    let base = base_price(
        product.bumped_price,
        product.bumped_price_update_time,
        product.target_price,
        now,
        cfg.price_change_per_day,
    );
    let bump = price_bump(units, total_capacity, cfg.price_bump_ratio);
    let per_year = premium_per_year(base, units, initial_used, total_capacity, cfg)?;
    Some(PremiumQuote {
        premium: mul_div(per_year, period as u128, YEAR as u128)?,
        base_price: base,
        bumped_price: base.saturating_add(bump),
    })
}
