//! Protocol constants. All token amounts are in base units (1 token = 10^18 base units).

/// One whole token in base units. Also the fixed-point scale of the reward accumulator.
pub const ONE_TOKEN: u128 = 1_000_000_000_000_000_000;

pub const ONE_DAY: u64 = 24 * 60 * 60;
pub const YEAR: u64 = 365 * ONE_DAY;

/// Default tranche length. Stake deposited into a tranche is locked until it ends.
pub const TRANCHE_DURATION: u64 = 91 * ONE_DAY;

/// Default bucket length. Buckets schedule reward-rate cuts and cover expiries.
pub const BUCKET_DURATION: u64 = 28 * ONE_DAY;

/// Number of tranches accepting deposits at any time, starting with the current one.
pub const MAX_ACTIVE_TRANCHES: u64 = 8;

/// Position id reserved as the "mint a new position" sentinel on deposit.
///
/// The same id keys the pool manager's fee deposits.
pub const NEW_POSITION_SENTINEL: u64 = 0;

// --- capacity ---

/// Capacity is tracked in allocation units: 1 token = 100 units.
pub const ALLOCATION_UNITS_PER_TOKEN: u128 = 100;
pub const TOKEN_PER_ALLOCATION_UNIT: u128 = ONE_TOKEN / ALLOCATION_UNITS_PER_TOKEN;

pub const GLOBAL_CAPACITY_DENOMINATOR: u64 = 10_000;
/// Default global capacity ratio: 2x the active stake.
pub const DEFAULT_GLOBAL_CAPACITY_RATIO: u64 = 20_000;
pub const CAPACITY_REDUCTION_DENOMINATOR: u64 = 10_000;

pub const WEIGHT_DENOMINATOR: u64 = 100;
/// Default ceiling on the sum of effective weights: 20x.
pub const DEFAULT_MAX_TOTAL_WEIGHT: u32 = 2_000;

// --- fees and rewards ---

pub const POOL_FEE_DENOMINATOR: u64 = 100;
pub const DEFAULT_POOL_FEE: u8 = 10;
pub const DEFAULT_MAX_POOL_FEE: u8 = 20;

/// Share of each premium streamed to stakers as rewards.
pub const REWARDS_DENOMINATOR: u64 = 10_000;
pub const DEFAULT_REWARDS_RATIO: u64 = 5_000;

/// Tenure bonus on reward shares per tranche beyond the first active one.
pub const BONUS_DENOMINATOR: u64 = 10_000;
pub const DEFAULT_REWARD_BONUS_PER_TRANCHE: u64 = 1_000;

// --- pricing ---

/// Prices are ratios over this denominator (10_000 = 100% of the covered amount per year).
pub const PRICE_DENOMINATOR: u64 = 10_000;
/// Price decay of the bumped price per day (2%).
pub const PRICE_CHANGE_PER_DAY: u64 = 200;
/// Price bump for consuming the entire capacity (20%).
pub const PRICE_BUMP_RATIO: u64 = 2_000;
/// Surge price multiplier applied to the amount above the surge threshold.
pub const SURGE_PRICE_RATIO: u64 = 2_000_000_000_000_000_000;
pub const SURGE_THRESHOLD_RATIO: u64 = 9_000;
pub const SURGE_THRESHOLD_DENOMINATOR: u64 = 10_000;
/// Lowest target price any product may carry (1%).
pub const GLOBAL_MIN_PRICE: u64 = 100;

// --- cover periods ---

pub const MIN_COVER_PERIOD: u64 = 28 * ONE_DAY;
pub const MAX_COVER_PERIOD: u64 = 365 * ONE_DAY;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tranche_spans_a_fractional_number_of_buckets() {
        assert_ne!(TRANCHE_DURATION % BUCKET_DURATION, 0);
        assert!(TRANCHE_DURATION > 3 * BUCKET_DURATION);
    }

    #[test]
    fn allocation_unit_scale() {
        assert_eq!(TOKEN_PER_ALLOCATION_UNIT * ALLOCATION_UNITS_PER_TOKEN, ONE_TOKEN);
    }

    #[test]
    fn fee_defaults_consistent() {
        assert!(DEFAULT_POOL_FEE <= DEFAULT_MAX_POOL_FEE);
        assert!((DEFAULT_MAX_POOL_FEE as u64) < POOL_FEE_DENOMINATOR);
    }

    #[test]
    fn surge_threshold_below_full_capacity() {
        assert!(SURGE_THRESHOLD_RATIO < SURGE_THRESHOLD_DENOMINATOR);
    }
}
