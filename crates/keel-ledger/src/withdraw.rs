//! Withdrawals of stake (expired tranches only) and rewards (any tranche).
//!
//! Stake in an expired tranche is valued from its expiry snapshot:
//! `floor(stake_amount_at_expiry * shares / stake_shares_supply_at_expiry)`.

use keel_core::math::mul_div;
use keel_core::types::{PositionId, TrancheId};

use crate::rewards::{acc_for_tranche, checkpoint};
use crate::state::LedgerState;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Withdrawal {
    pub stake: u128,
    pub rewards: u128,
}

impl Withdrawal {
    fn add(&mut self, other: Withdrawal) {
        self.stake = self.stake.saturating_add(other.stake);
        self.rewards = self.rewards.saturating_add(other.rewards);
    }
}

/// Withdraw from one tranche. Stake in a live tranche stays locked.
/// `state` must be advanced to now.
pub fn withdraw_tranche(
    state: &mut LedgerState,
    position: PositionId,
    tranche: TrancheId,
    withdraw_stake: bool,
    withdraw_rewards: bool,
) -> Withdrawal {
    let Some(mut deposit) = state.deposits.get(&(position, tranche)).copied() else {
        return Withdrawal::default();
    };
    let expired = state.expired_tranches.get(&tranche).copied();
    let mut out = Withdrawal::default();

    if let Some(snapshot) = expired.filter(|_| withdraw_stake && deposit.stake_shares > 0) {
        out.stake = mul_div(
            snapshot.stake_amount_at_expiry,
            deposit.stake_shares,
            snapshot.stake_shares_supply_at_expiry,
        )
        .unwrap_or(0);
        deposit.stake_shares = 0;
    }

    if withdraw_rewards {
        checkpoint(&mut deposit, acc_for_tranche(state, tranche));
        out.rewards = deposit.pending_rewards;
        deposit.pending_rewards = 0;
    }

    let drained = expired.is_some() && deposit.stake_shares == 0 && deposit.pending_rewards == 0 && withdraw_rewards;
    if drained || deposit.is_empty() {
        state.deposits.remove(&(position, tranche));
    } else {
        state.deposits.insert((position, tranche), deposit);
    }
    out
}

/// Withdraw from each of `tranches`, returning the total and the per-tranche
/// amounts in the order given.
pub fn withdraw(
    state: &mut LedgerState,
    position: PositionId,
    tranches: &[TrancheId],
    withdraw_stake: bool,
    withdraw_rewards: bool,
) -> (Withdrawal, Vec<(TrancheId, Withdrawal)>) {
    let mut total = Withdrawal::default();
    let mut parts = Vec::with_capacity(tranches.len());
    for &tranche in tranches {
        let part = withdraw_tranche(state, position, tranche, withdraw_stake, withdraw_rewards);
        total.add(part);
        parts.push((tranche, part));
    }
    (total, parts)
}
