//! Lazy expiration of buckets and tranches.
//!
//! Boundaries that passed since the last call are processed in time order.
//! When a bucket and a tranche end at the same instant the bucket goes
//! first. Each step first accrues rewards up to its boundary at the rate
//! that applied before it:
//!
//! - **bucket**: advance `first_active_bucket_id` and subtract the reward
//!   cut of the bucket that now starts;
//! - **tranche**: snapshot the accumulator together with the pool-wide
//!   stake and share supply, then remove the tranche's shares and its
//!   stake amount from the globals.
//!
//! With `force`, the final partial slice up to `now` is accrued as well.

use tracing::debug;

use keel_core::math::mul_div;
use keel_core::time::TimeGrid;
use keel_core::types::ExpiredTranche;

use crate::events::PoolEvent;
use crate::rewards::accrue;
use crate::state::LedgerState;

/// Result of [`advance`]: the new state and what happened on the way.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub state: LedgerState,
    pub events: Vec<PoolEvent>,
}

/// Whether any bucket or tranche boundary is due at `now`.
pub fn is_due(state: &LedgerState, grid: &TimeGrid, now: u64) -> bool {
    state.first_active_bucket_id < grid.bucket_of(now)
        || state.first_active_tranche_id < grid.tranche_of(now)
}

/// Bring `state` up to `now`.
///
/// Idempotent: advancing twice to the same `now` changes nothing the
/// second time. Times before the current frontier are a no-op.
pub fn advance(mut state: LedgerState, grid: &TimeGrid, now: u64, force: bool) -> Transition {
    let mut events = Vec::new();
    if !force && !is_due(&state, grid, now) {
        return Transition { state, events };
    }

    let current_bucket = grid.bucket_of(now);
    let current_tranche = grid.tranche_of(now);

    loop {
        let bucket_due = state.first_active_bucket_id < current_bucket;
        let tranche_due = state.first_active_tranche_id < current_tranche;
        if !bucket_due && !tranche_due {
            break;
        }

        let bucket_end = grid.bucket_end(state.first_active_bucket_id);
        let tranche_end = grid.tranche_end(state.first_active_tranche_id);

        if bucket_due && (!tranche_due || bucket_end <= tranche_end) {
            expire_bucket(&mut state, bucket_end, &mut events);
        } else {
            expire_tranche(&mut state, tranche_end, &mut events);
        }
    }

    if force {
        accrue(&mut state, now);
    }

    Transition { state, events }
}

fn expire_bucket(state: &mut LedgerState, bucket_end: u64, events: &mut Vec<PoolEvent>) {
    accrue(state, bucket_end);
    let expired = state.first_active_bucket_id;
    state.first_active_bucket_id += 1;
    if let Some(cut) = state.reward_per_second_cut.remove(&state.first_active_bucket_id) {
        state.reward_per_second = state.reward_per_second.saturating_sub(cut);
    }
    debug!(bucket_id = expired, reward_per_second = %state.reward_per_second, "bucket expired");
    events.push(PoolEvent::BucketExpired {
        bucket_id: expired,
        reward_per_second: state.reward_per_second,
    });
}

fn expire_tranche(state: &mut LedgerState, tranche_end: u64, events: &mut Vec<PoolEvent>) {
    accrue(state, tranche_end);
    let id = state.first_active_tranche_id;
    let tranche = state.tranches.remove(&id).unwrap_or_default();

    let stake_amount = if state.stake_shares_supply == 0 {
        0
    } else {
        mul_div(state.active_stake, tranche.stake_shares, state.stake_shares_supply)
            .unwrap_or(state.active_stake)
            .min(state.active_stake)
    };

    state.expired_tranches.insert(
        id,
        ExpiredTranche {
            acc_reward_per_share_at_expiry: state.acc_reward_per_share,
            stake_amount_at_expiry: state.active_stake,
            stake_shares_supply_at_expiry: state.stake_shares_supply,
        },
    );

    state.active_stake -= stake_amount;
    state.stake_shares_supply = state.stake_shares_supply.saturating_sub(tranche.stake_shares);
    state.rewards_shares_supply = state.rewards_shares_supply.saturating_sub(tranche.reward_shares);
    state.first_active_tranche_id += 1;

    debug!(
        tranche_id = id,
        stake_amount = %stake_amount,
        stake_shares = %tranche.stake_shares,
        active_stake = %state.active_stake,
        "tranche expired"
    );
    events.push(PoolEvent::TrancheExpired {
        tranche_id: id,
        stake_amount,
        stake_shares: tranche.stake_shares,
        reward_shares: tranche.reward_shares,
    });
}
