//! Ledger state: global accumulators, tranches, deposits, and reward cuts.
//!
//! [`LedgerState`] is a plain value. Transitions take it by value or by
//! `&mut` on a working copy; nothing here touches the clock.

use std::collections::BTreeMap;

use keel_core::error::LedgerError;
use keel_core::math::mul_div;
use keel_core::time::TimeGrid;
use keel_core::types::{BucketId, Deposit, ExpiredTranche, PositionId, Tranche, TrancheId};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LedgerState {
    pub(crate) active_stake: u128,
    pub(crate) stake_shares_supply: u128,
    pub(crate) rewards_shares_supply: u128,
    pub(crate) acc_reward_per_share: u128,
    pub(crate) last_acc_update: u64,
    pub(crate) first_active_tranche_id: TrancheId,
    pub(crate) first_active_bucket_id: BucketId,
    pub(crate) reward_per_second: u128,
    pub(crate) tranches: BTreeMap<TrancheId, Tranche>,
    pub(crate) expired_tranches: BTreeMap<TrancheId, ExpiredTranche>,
    pub(crate) deposits: BTreeMap<(PositionId, TrancheId), Deposit>,
    pub(crate) reward_per_second_cut: BTreeMap<BucketId, u128>,
}

impl LedgerState {
    /// Empty ledger whose expiration frontier starts at `now`.
    pub fn new(grid: &TimeGrid, now: u64) -> Self {
        Self {
            active_stake: 0,
            stake_shares_supply: 0,
            rewards_shares_supply: 0,
            acc_reward_per_share: 0,
            last_acc_update: now,
            first_active_tranche_id: grid.tranche_of(now),
            first_active_bucket_id: grid.bucket_of(now),
            reward_per_second: 0,
            tranches: BTreeMap::new(),
            expired_tranches: BTreeMap::new(),
            deposits: BTreeMap::new(),
            reward_per_second_cut: BTreeMap::new(),
        }
    }

    pub fn active_stake(&self) -> u128 {
        self.active_stake
    }

    pub fn stake_shares_supply(&self) -> u128 {
        self.stake_shares_supply
    }

    pub fn rewards_shares_supply(&self) -> u128 {
        self.rewards_shares_supply
    }

    /// Stored accumulator, as of [`last_acc_update`](Self::last_acc_update).
    pub fn acc_reward_per_share(&self) -> u128 {
        self.acc_reward_per_share
    }

    pub fn last_acc_update(&self) -> u64 {
        self.last_acc_update
    }

    pub fn first_active_tranche_id(&self) -> TrancheId {
        self.first_active_tranche_id
    }

    pub fn first_active_bucket_id(&self) -> BucketId {
        self.first_active_bucket_id
    }

    pub fn reward_per_second(&self) -> u128 {
        self.reward_per_second
    }

    pub fn reward_per_second_cut(&self, bucket: BucketId) -> u128 {
        self.reward_per_second_cut.get(&bucket).copied().unwrap_or(0)
    }

    /// Live tranche aggregates. Empty for tranches nobody deposited into.
    pub fn tranche(&self, id: TrancheId) -> Tranche {
        self.tranches.get(&id).copied().unwrap_or_default()
    }

    pub fn expired_tranche(&self, id: TrancheId) -> Option<&ExpiredTranche> {
        self.expired_tranches.get(&id)
    }

    pub fn deposit(&self, position: PositionId, tranche: TrancheId) -> Deposit {
        self.deposits.get(&(position, tranche)).copied().unwrap_or_default()
    }

    pub fn is_expired(&self, tranche: TrancheId) -> bool {
        tranche < self.first_active_tranche_id
    }

    /// Stake amount currently backing `shares`: `active_stake * shares / supply`.
    pub fn stake_for_shares(&self, shares: u128) -> u128 {
        if self.stake_shares_supply == 0 {
            return 0;
        }
        mul_div(self.active_stake, shares, self.stake_shares_supply).unwrap_or(0)
    }

    /// Ids of the tranches in the active window, oldest first.
    pub fn active_tranche_ids(&self, grid: &TimeGrid) -> impl Iterator<Item = TrancheId> {
        let first = self.first_active_tranche_id;
        first..first + grid.max_active_tranches()
    }

    pub(crate) fn deposit_mut(&mut self, position: PositionId, tranche: TrancheId) -> &mut Deposit {
        self.deposits.entry((position, tranche)).or_default()
    }

    pub(crate) fn tranche_mut(&mut self, id: TrancheId) -> &mut Tranche {
        self.tranches.entry(id).or_default()
    }

    /// Drop deposit records that hold nothing.
    pub(crate) fn prune_deposit(&mut self, position: PositionId, tranche: TrancheId) {
        if self.deposits.get(&(position, tranche)).is_some_and(Deposit::is_empty) {
            self.deposits.remove(&(position, tranche));
        }
    }

    /// Verify share conservation and stake consistency.
    pub fn check_invariants(&self) -> Result<(), LedgerError> {
        let mut stake_by_tranche: BTreeMap<TrancheId, u128> = BTreeMap::new();
        let mut rewards_by_tranche: BTreeMap<TrancheId, u128> = BTreeMap::new();
        for ((_, tranche), deposit) in &self.deposits {
            if self.is_expired(*tranche) {
                continue;
            }
            *stake_by_tranche.entry(*tranche).or_default() += deposit.stake_shares;
            *rewards_by_tranche.entry(*tranche).or_default() += deposit.reward_shares;
        }

        let mut stake_total = 0u128;
        let mut rewards_total = 0u128;
        let mut stake_amount_total = 0u128;
        for (id, tranche) in &self.tranches {
            if self.is_expired(*id) {
                return Err(LedgerError::InvariantViolation(format!("expired tranche {id} still live")));
            }
            let deposit_stake = stake_by_tranche.get(id).copied().unwrap_or(0);
            let deposit_rewards = rewards_by_tranche.get(id).copied().unwrap_or(0);
            if deposit_stake != tranche.stake_shares || deposit_rewards != tranche.reward_shares {
                return Err(LedgerError::InvariantViolation(format!(
                    "tranche {id} holds {}/{} shares but its deposits sum to {deposit_stake}/{deposit_rewards}",
                    tranche.stake_shares, tranche.reward_shares
                )));
            }
            stake_total += tranche.stake_shares;
            rewards_total += tranche.reward_shares;
            stake_amount_total += self.stake_for_shares(tranche.stake_shares);
        }

        if stake_total != self.stake_shares_supply {
            return Err(LedgerError::InvariantViolation(format!(
                "stake shares {stake_total} != supply {}",
                self.stake_shares_supply
            )));
        }
        if rewards_total != self.rewards_shares_supply {
            return Err(LedgerError::InvariantViolation(format!(
                "reward shares {rewards_total} != supply {}",
                self.rewards_shares_supply
            )));
        }
        if stake_amount_total > self.active_stake {
            return Err(LedgerError::InvariantViolation(format!(
                "tranche stake {stake_amount_total} exceeds active stake {}",
                self.active_stake
            )));
        }
        if self.stake_shares_supply == 0 && self.active_stake != 0 {
            return Err(LedgerError::InvariantViolation(format!(
                "active stake {} with no shares outstanding",
                self.active_stake
            )));
        }
        Ok(())
    }
}
