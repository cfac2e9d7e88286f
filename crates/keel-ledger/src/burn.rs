//! Stake burns after claim payouts.
//!
//! A burn lowers `active_stake` and leaves every share supply untouched,
//! so the loss is shared by all current holders through a lower value per
//! share. Burning everything would leave shares backed by nothing; instead
//! one base unit stays behind and the pool is halted.

use keel_core::constants::TOKEN_PER_ALLOCATION_UNIT;

use crate::state::LedgerState;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BurnOutcome {
    pub burned: u128,
    /// The burn consumed the whole active stake.
    pub halted: bool,
}

/// Burn up to `amount` of active stake.
pub fn burn(state: &mut LedgerState, amount: u128) -> BurnOutcome {
    if amount == 0 || state.stake_shares_supply == 0 {
        return BurnOutcome::default();
    }
    if amount >= state.active_stake {
        let burned = state.active_stake.saturating_sub(1);
        state.active_stake = state.active_stake.min(1);
        return BurnOutcome { burned, halted: true };
    }
    state.active_stake -= amount;
    BurnOutcome { burned: amount, halted: false }
}

/// Allocation units released for a cover payout of `amount` (floor).
pub fn deallocation_units(amount: u128) -> u128 {
    amount / TOKEN_PER_ALLOCATION_UNIT
}
