//! Capacity and effective weight.
//!
//! Active stake backs `global_capacity_ratio` times its value in cover,
//! reduced per product by its capacity reduction ratio and split across
//! products by target weight. Capacity is expressed in allocation units.
//!
//! A product's effective weight is the larger of its target weight and the
//! share of the pool's (unweighted) capacity its allocations actually use.
//! Burns and expiries shrink capacity without touching allocations, so the
//! realized share can exceed 100; it saturates at `u16::MAX`.

use keel_core::constants::{
    CAPACITY_REDUCTION_DENOMINATOR, GLOBAL_CAPACITY_DENOMINATOR, TOKEN_PER_ALLOCATION_UNIT,
    WEIGHT_DENOMINATOR,
};
use keel_core::math::{mul_div_ceil, saturating_mul_div};

/// Capacity ratios applying to one product.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CapacityParams {
    /// Over `GLOBAL_CAPACITY_DENOMINATOR`.
    pub global_capacity_ratio: u64,
    /// Over `CAPACITY_REDUCTION_DENOMINATOR`.
    pub capacity_reduction_ratio: u64,
}

impl CapacityParams {
    fn multiplier(&self, weight: u64) -> u128 {
        let reduction = self.capacity_reduction_ratio.min(CAPACITY_REDUCTION_DENOMINATOR);
        self.global_capacity_ratio as u128
            * (CAPACITY_REDUCTION_DENOMINATOR - reduction) as u128
            * weight.min(WEIGHT_DENOMINATOR) as u128
    }

    fn denominator() -> u128 {
        GLOBAL_CAPACITY_DENOMINATOR as u128
            * CAPACITY_REDUCTION_DENOMINATOR as u128
            * WEIGHT_DENOMINATOR as u128
            * TOKEN_PER_ALLOCATION_UNIT
    }
}

/// Stake amount attributable to `tranche_shares`: `active_stake * shares / supply`.
pub fn tranche_stake(tranche_shares: u128, active_stake: u128, stake_shares_supply: u128) -> u128 {
    if stake_shares_supply == 0 {
        return 0;
    }
    saturating_mul_div(active_stake, tranche_shares, stake_shares_supply)
}

/// Capacity of one tranche for a product at `weight` (0..=100), in allocation units.
pub fn tranche_capacity(
    tranche_shares: u128,
    active_stake: u128,
    stake_shares_supply: u128,
    weight: u64,
    params: &CapacityParams,
) -> u128 {
    let stake = tranche_stake(tranche_shares, active_stake, stake_shares_supply);
    saturating_mul_div(stake, params.multiplier(weight), CapacityParams::denominator())
}

/// Pool-wide capacity for a product at 100% weight:
/// `active_stake * global_ratio * (1 - reduction) / TOKEN_PER_ALLOCATION_UNIT`.
///
/// Summing [`tranche_capacity`] over every tranche gives the same value up
/// to per-tranche floor rounding.
pub fn total_capacity(active_stake: u128, params: &CapacityParams) -> u128 {
    saturating_mul_div(
        active_stake,
        params.multiplier(WEIGHT_DENOMINATOR),
        CapacityParams::denominator(),
    )
}

/// `max(target_weight, ceil(allocation * 100 / capacity))`, saturating at `u16::MAX`.
///
/// With zero capacity the target weight is returned when nothing is
/// allocated; any outstanding allocation saturates.
pub fn effective_weight(target_weight: u8, total_allocation: u128, total_capacity: u128) -> u16 {
    if total_capacity == 0 {
        return if total_allocation == 0 { target_weight as u16 } else { u16::MAX };
    }
    let actual = mul_div_ceil(total_allocation, WEIGHT_DENOMINATOR as u128, total_capacity)
        .unwrap_or(u128::MAX)
        .min(u16::MAX as u128) as u16;
    actual.max(target_weight as u16)
}

/// Units still free in a tranche: `capacity - allocated`, floored at zero.
pub fn available(capacity: u128, allocated: u128) -> u128 {
    capacity.saturating_sub(allocated)
}
