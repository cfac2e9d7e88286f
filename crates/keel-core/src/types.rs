//! Core ledger types: positions, deposits, tranches, expiry snapshots.
//!
//! All token amounts and share counts are `u128` base units.
//! All times are `u64` Unix seconds.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::NEW_POSITION_SENTINEL;

pub type TrancheId = u64;
pub type BucketId = u64;
pub type ProductId = u32;
pub type PoolId = u32;

/// A 20-byte account reference (position owner, pool manager, approved operator).
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AccountId(pub [u8; 20]);

impl AccountId {
    /// The zero account.
    pub const ZERO: Self = Self([0u8; 20]);

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl From<[u8; 20]> for AccountId {
    fn from(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }
}

/// Identifier of a staking position.
///
/// Id `0` is never minted: on deposit it means "mint a new position", and
/// it keys the pool manager's fee deposits.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PositionId(pub u64);

impl PositionId {
    /// Sentinel for "mint new" / the manager fee position.
    pub const NEW: Self = Self(NEW_POSITION_SENTINEL);
    pub const MANAGER_FEE: Self = Self(NEW_POSITION_SENTINEL);

    pub fn is_sentinel(&self) -> bool {
        self.0 == NEW_POSITION_SENTINEL
    }
}

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of a cover allocation held by the pool.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AllocationId(pub u64);

impl fmt::Display for AllocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "alloc-{}", self.0)
    }
}

/// A staking position. Created on first deposit, never destroyed.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Position {
    pub id: PositionId,
    pub pool_id: PoolId,
    pub owner: AccountId,
    pub created_at: u64,
}

/// A position's stake in a single tranche.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Deposit {
    /// Pool-relative ownership of principal.
    pub stake_shares: u128,
    /// Ownership of reward emissions. May exceed `stake_shares` (tenure bonus, fee deposits).
    pub reward_shares: u128,
    /// Rewards earned but not yet withdrawn.
    pub pending_rewards: u128,
    /// Accumulator value at the last checkpoint.
    pub last_acc_reward_per_share: u128,
}

impl Deposit {
    pub fn is_empty(&self) -> bool {
        self.stake_shares == 0 && self.reward_shares == 0 && self.pending_rewards == 0
    }
}

/// Aggregate shares of all live deposits in a tranche.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Tranche {
    pub stake_shares: u128,
    pub reward_shares: u128,
}

/// Values frozen when a tranche expires.
///
/// Withdrawals and reward claims for an expired tranche use these instead
/// of the live accumulators.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ExpiredTranche {
    pub acc_reward_per_share_at_expiry: u128,
    pub stake_amount_at_expiry: u128,
    pub stake_shares_supply_at_expiry: u128,
}
