//! Deposit ledger: share minting, tenure bonus, manager fee split.
//!
//! Deposits are planned against the current state first and applied only
//! once every check passed, so callers can mint a position between the two
//! steps without leaking it on failure.
//!
//! The first deposit into an empty pool mints `isqrt(amount)` stake shares;
//! later deposits mint `floor(amount * supply / active_stake)`. Reward
//! shares add a tenure bonus per tranche between the first active tranche
//! and the deposit's tranche. On top of those, the manager fee deposit
//! (position 0) in the same tranche receives `reward_shares * fee / (100 - fee)`,
//! giving a `(100 - fee) : fee` split of the tranche's reward shares.

use keel_core::constants::{BONUS_DENOMINATOR, POOL_FEE_DENOMINATOR};
use keel_core::error::LedgerError;
use keel_core::math::{isqrt, mul_div, saturating_mul_div};
use keel_core::time::TimeGrid;
use keel_core::types::{PositionId, TrancheId};

use crate::rewards::checkpoint;
use crate::state::LedgerState;
use crate::withdraw::withdraw_tranche;

/// Pool parameters that shape reward shares.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepositTerms {
    pub pool_fee: u8,
    pub reward_bonus_per_tranche: u64,
}

/// Shares a deposit will mint, computed before anything changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepositPlan {
    pub amount: u128,
    pub tranche_id: TrancheId,
    pub stake_shares: u128,
    pub reward_shares: u128,
    pub fee_shares: u128,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExtendOutcome {
    /// Stake shares now held in the new tranche by this extension.
    pub stake_shares: u128,
    pub reward_shares: u128,
    /// Rewards paid out when the initial tranche had already expired.
    pub withdrawn_rewards: u128,
}

/// Reject tranches outside the active window. `state` must be advanced to now.
pub fn check_tranche_active(state: &LedgerState, grid: &TimeGrid, tranche_id: TrancheId) -> Result<(), LedgerError> {
    let first = state.first_active_tranche_id;
    let last = first + grid.max_active_tranches() - 1;
    if tranche_id < first {
        return Err(LedgerError::RequestedTrancheIsExpired { tranche_id, first_active_tranche_id: first });
    }
    if tranche_id > last {
        return Err(LedgerError::RequestedTrancheIsNotYetActive { tranche_id, max_tranche_id: last });
    }
    Ok(())
}

/// Stake shares minted for `amount` at the current share price.
pub fn stake_shares_for(state: &LedgerState, amount: u128) -> Result<u128, LedgerError> {
    let shares = if state.stake_shares_supply == 0 {
        isqrt(amount)
    } else if state.active_stake == 0 {
        return Err(LedgerError::StakeDepleted);
    } else {
        mul_div(amount, state.stake_shares_supply, state.active_stake).ok_or(LedgerError::ArithmeticOverflow)?
    };
    if shares == 0 {
        return Err(LedgerError::InsufficientDepositAmount);
    }
    Ok(shares)
}

/// Tenure bonus on `stake_shares` for `tranches` tranches of lock-up.
pub fn tenure_bonus(stake_shares: u128, tranches: u64, bonus_per_tranche: u64) -> u128 {
    let ratio = (bonus_per_tranche as u128).saturating_mul(tranches as u128);
    saturating_mul_div(stake_shares, ratio, BONUS_DENOMINATOR as u128)
}

/// Manager fee shares matching `reward_shares` of staker rewards.
pub fn fee_shares_for(reward_shares: u128, pool_fee: u8) -> u128 {
    let fee = pool_fee as u128;
    let denominator = POOL_FEE_DENOMINATOR as u128;
    if fee == 0 || fee >= denominator {
        return 0;
    }
    saturating_mul_div(reward_shares, fee, denominator - fee)
}

/// Compute the shares `amount` mints in `tranche_id`. `state` must be
/// advanced to now.
pub fn plan_deposit(
    state: &LedgerState,
    grid: &TimeGrid,
    amount: u128,
    tranche_id: TrancheId,
    terms: &DepositTerms,
) -> Result<DepositPlan, LedgerError> {
    if amount == 0 {
        return Err(LedgerError::InsufficientDepositAmount);
    }
    check_tranche_active(state, grid, tranche_id)?;
    let stake_shares = stake_shares_for(state, amount)?;
    let ahead = tranche_id - state.first_active_tranche_id;
    let reward_shares = stake_shares
        .saturating_add(tenure_bonus(stake_shares, ahead, terms.reward_bonus_per_tranche));
    let fee_shares = fee_shares_for(reward_shares, terms.pool_fee);
    Ok(DepositPlan { amount, tranche_id, stake_shares, reward_shares, fee_shares })
}

/// Credit a planned deposit to `position`.
pub fn apply_deposit(state: &mut LedgerState, position: PositionId, plan: &DepositPlan) {
    credit(state, position, plan.tranche_id, plan.stake_shares, plan.reward_shares);
    credit(state, PositionId::MANAGER_FEE, plan.tranche_id, 0, plan.fee_shares);

    state.active_stake += plan.amount;
    state.stake_shares_supply += plan.stake_shares;
    state.rewards_shares_supply += plan.reward_shares + plan.fee_shares;
}

/// Checkpoint a deposit and add shares to it and its tranche. Supplies are
/// left to the caller.
fn credit(state: &mut LedgerState, position: PositionId, tranche: TrancheId, stake: u128, rewards: u128) {
    if stake == 0 && rewards == 0 {
        return;
    }
    let acc = state.acc_reward_per_share;
    let deposit = state.deposit_mut(position, tranche);
    checkpoint(deposit, acc);
    deposit.stake_shares += stake;
    deposit.reward_shares += rewards;

    let t = state.tranche_mut(tranche);
    t.stake_shares += stake;
    t.reward_shares += rewards;
}

/// Checkpoint a deposit and remove shares from it and its tranche.
fn debit(state: &mut LedgerState, position: PositionId, tranche: TrancheId, stake: u128, rewards: u128) {
    let acc = state.acc_reward_per_share;
    let deposit = state.deposit_mut(position, tranche);
    checkpoint(deposit, acc);
    deposit.stake_shares -= stake;
    deposit.reward_shares -= rewards;

    let t = state.tranche_mut(tranche);
    t.stake_shares -= stake;
    t.reward_shares -= rewards;
    if t.stake_shares == 0 && t.reward_shares == 0 {
        state.tranches.remove(&tranche);
    }
    state.prune_deposit(position, tranche);
}

/// Move `position`'s deposit from `initial` to the later tranche `new`,
/// optionally adding `top_up` stake. `state` must be advanced to now.
///
/// If `initial` already expired, its stake and rewards are withdrawn and
/// `stake + top_up` is deposited fresh. Otherwise shares move as they are,
/// earning the tenure bonus for the extra tranches (plus fee shares on it),
/// and pending rewards stay with the initial tranche's record.
pub fn extend_deposit(
    state: &mut LedgerState,
    grid: &TimeGrid,
    position: PositionId,
    initial: TrancheId,
    new: TrancheId,
    top_up: u128,
    terms: &DepositTerms,
) -> Result<ExtendOutcome, LedgerError> {
    if new <= initial {
        return Err(LedgerError::NewTrancheEndsBeforeInitialTranche { initial, new });
    }
    check_tranche_active(state, grid, new)?;

    if state.is_expired(initial) {
        let withdrawn = withdraw_tranche(state, position, initial, true, true);
        let plan = plan_deposit(state, grid, withdrawn.stake.saturating_add(top_up), new, terms)?;
        apply_deposit(state, position, &plan);
        return Ok(ExtendOutcome {
            stake_shares: plan.stake_shares,
            reward_shares: plan.reward_shares,
            withdrawn_rewards: withdrawn.rewards,
        });
    }

    let old = state.deposit(position, initial);
    let top_up_shares = if top_up > 0 { stake_shares_for(state, top_up)? } else { 0 };
    if old.stake_shares == 0 && top_up_shares == 0 {
        return Err(LedgerError::InsufficientDepositAmount);
    }

    let moved_stake = old.stake_shares;
    let moved_rewards = old.reward_shares;
    let bonus = tenure_bonus(moved_stake, new - initial, terms.reward_bonus_per_tranche);
    let top_up_rewards = top_up_shares.saturating_add(tenure_bonus(
        top_up_shares,
        new - state.first_active_tranche_id,
        terms.reward_bonus_per_tranche,
    ));
    let added_rewards = bonus.saturating_add(top_up_rewards);

    let fee_held = state.deposit(PositionId::MANAGER_FEE, initial).reward_shares;
    let moved_fee = fee_shares_for(moved_rewards, terms.pool_fee).min(fee_held);
    let added_fee = fee_shares_for(added_rewards, terms.pool_fee);

    debit(state, position, initial, moved_stake, moved_rewards);
    debit(state, PositionId::MANAGER_FEE, initial, 0, moved_fee);
    credit(state, position, new, moved_stake + top_up_shares, moved_rewards + added_rewards);
    credit(state, PositionId::MANAGER_FEE, new, 0, moved_fee + added_fee);

    state.active_stake += top_up;
    state.stake_shares_supply += top_up_shares;
    state.rewards_shares_supply += added_rewards + added_fee;

    Ok(ExtendOutcome {
        stake_shares: moved_stake + top_up_shares,
        reward_shares: moved_rewards + added_rewards,
        withdrawn_rewards: 0,
    })
}

/// Re-split the manager fee shares of every active tranche for a new
/// `pool_fee`. Fee deposits are checkpointed first, so rewards earned
/// under the old fee stay with the manager. `state` must be advanced to now.
pub fn resplit_fee_shares(state: &mut LedgerState, grid: &TimeGrid, pool_fee: u8) {
    let acc = state.acc_reward_per_share;
    let tranches: Vec<TrancheId> = state.active_tranche_ids(grid).collect();
    for id in tranches {
        let tranche = state.tranche(id);
        if tranche.reward_shares == 0 {
            continue;
        }
        let held = state.deposit(PositionId::MANAGER_FEE, id).reward_shares;
        let stakers = tranche.reward_shares - held;
        let target = fee_shares_for(stakers, pool_fee);
        if target == held {
            continue;
        }

        let deposit = state.deposit_mut(PositionId::MANAGER_FEE, id);
        checkpoint(deposit, acc);
        deposit.reward_shares = target;

        let emptied = {
            let t = state.tranche_mut(id);
            t.reward_shares = stakers + target;
            t.stake_shares == 0 && t.reward_shares == 0
        };
        if emptied {
            state.tranches.remove(&id);
        }
        state.rewards_shares_supply = state.rewards_shares_supply - held + target;
        state.prune_deposit(PositionId::MANAGER_FEE, id);
    }
}
