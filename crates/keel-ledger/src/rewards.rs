//! Reward accumulator and reward streams.
//!
//! `acc_reward_per_share` is the total reward emitted per reward share
//! since the pool started, scaled by `ONE_TOKEN`. Emission runs at
//! `reward_per_second`; every allocation adds a stream to that rate until
//! the bucket boundary at or after its cover end, where a matching cut
//! takes it back out.

use serde::{Deserialize, Serialize};

use keel_core::constants::ONE_TOKEN;
use keel_core::math::saturating_mul_div;
use keel_core::time::TimeGrid;
use keel_core::types::{BucketId, Deposit, PositionId, TrancheId};

use crate::state::LedgerState;

/// Accumulator increment for `elapsed` seconds at `rate`, or zero when
/// nobody holds reward shares.
fn increment(elapsed: u64, rate: u128, rewards_shares_supply: u128) -> u128 {
    if rewards_shares_supply == 0 || rate == 0 || elapsed == 0 {
        return 0;
    }
    let emitted = (elapsed as u128).saturating_mul(rate);
    saturating_mul_div(emitted, ONE_TOKEN, rewards_shares_supply)
}

/// Advance the stored accumulator to `to` at the current rate.
/// Times at or before the last update are ignored.
pub fn accrue(state: &mut LedgerState, to: u64) {
    if to <= state.last_acc_update {
        return;
    }
    let elapsed = to - state.last_acc_update;
    let inc = increment(elapsed, state.reward_per_second, state.rewards_shares_supply);
    state.acc_reward_per_share = state.acc_reward_per_share.saturating_add(inc);
    state.last_acc_update = to;
}

/// Stored accumulator plus the not-yet-materialized slice up to `now`,
/// at the current rate. Does not mutate.
pub fn projected_acc_reward_per_share(state: &LedgerState, now: u64) -> u128 {
    let elapsed = now.saturating_sub(state.last_acc_update);
    state
        .acc_reward_per_share
        .saturating_add(increment(elapsed, state.reward_per_second, state.rewards_shares_supply))
}

/// Rewards earned by `deposit` since its checkpoint, against accumulator `acc`.
pub fn earned(deposit: &Deposit, acc: u128) -> u128 {
    let delta = acc.saturating_sub(deposit.last_acc_reward_per_share);
    saturating_mul_div(deposit.reward_shares, delta, ONE_TOKEN)
}

/// Move rewards earned since the last checkpoint into `pending_rewards`.
pub fn checkpoint(deposit: &mut Deposit, acc: u128) {
    deposit.pending_rewards = deposit.pending_rewards.saturating_add(earned(deposit, acc));
    deposit.last_acc_reward_per_share = acc;
}

/// Accumulator value that applies to deposits in `tranche`: the frozen
/// expiry value for expired tranches, the stored value otherwise.
pub fn acc_for_tranche(state: &LedgerState, tranche: TrancheId) -> u128 {
    match state.expired_tranches.get(&tranche) {
        Some(expired) => expired.acc_reward_per_share_at_expiry,
        None => state.acc_reward_per_share,
    }
}

/// `pending_rewards + reward_shares * (acc - last_acc) / ONE` for one deposit.
///
/// `state` must already be advanced to the time of interest.
pub fn realizable_rewards(state: &LedgerState, position: PositionId, tranche: TrancheId) -> u128 {
    let deposit = state.deposit(position, tranche);
    deposit.pending_rewards.saturating_add(earned(&deposit, acc_for_tranche(state, tranche)))
}

/// A running reward emission started by an allocation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RewardStream {
    pub rate: u128,
    /// Bucket whose start ends the stream.
    pub end_bucket: BucketId,
}

impl RewardStream {
    /// Total the stream emits between `now` and its end.
    pub fn remaining(&self, grid: &TimeGrid, now: u64) -> u128 {
        let end = grid.bucket_start(self.end_bucket);
        (end.saturating_sub(now) as u128).saturating_mul(self.rate)
    }
}

/// Bucket that ends a stream for cover ending at `cover_end`: the first
/// boundary at or after it, and never the bucket containing `now`.
pub fn stream_end_bucket(grid: &TimeGrid, cover_end: u64, now: u64) -> BucketId {
    grid.bucket_at_or_after(cover_end).max(grid.bucket_of(now) + 1)
}

/// Start streaming `rewards` from `now` until the boundary at or after
/// `cover_end`. The accumulator must already be current at `now`.
///
/// The rate is floored, so the stream may emit slightly less than `rewards`;
/// [`RewardStream::remaining`] at `now` gives the exact amount.
pub fn start_stream(
    state: &mut LedgerState,
    grid: &TimeGrid,
    rewards: u128,
    cover_end: u64,
    now: u64,
) -> RewardStream {
    let end_bucket = stream_end_bucket(grid, cover_end, now);
    let duration = grid.bucket_start(end_bucket).saturating_sub(now).max(1);
    let rate = rewards / duration as u128;
    if rate > 0 {
        state.reward_per_second = state.reward_per_second.saturating_add(rate);
        *state.reward_per_second_cut.entry(end_bucket).or_default() += rate;
    }
    RewardStream { rate, end_bucket }
}

/// Stop a stream early and return what it would still have emitted.
/// Streams whose end bucket has already started are finished; stopping
/// them is a no-op.
pub fn stop_stream(state: &mut LedgerState, grid: &TimeGrid, stream: &RewardStream, now: u64) -> u128 {
    if stream.rate == 0 || stream.end_bucket <= state.first_active_bucket_id {
        return 0;
    }
    state.reward_per_second = state.reward_per_second.saturating_sub(stream.rate);
    if let Some(cut) = state.reward_per_second_cut.get_mut(&stream.end_bucket) {
        *cut = cut.saturating_sub(stream.rate);
        if *cut == 0 {
            state.reward_per_second_cut.remove(&stream.end_bucket);
        }
    }
    stream.remaining(grid, now)
}
