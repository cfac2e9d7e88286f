//! Events emitted by pool transitions, drained with `StakingPool::take_events`.

use serde::{Deserialize, Serialize};

use keel_core::types::{AllocationId, BucketId, PositionId, ProductId, TrancheId};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum PoolEvent {
    BucketExpired {
        bucket_id: BucketId,
        reward_per_second: u128,
    },
    TrancheExpired {
        tranche_id: TrancheId,
        stake_amount: u128,
        stake_shares: u128,
        reward_shares: u128,
    },
    Deposited {
        position: PositionId,
        tranche_id: TrancheId,
        amount: u128,
        stake_shares: u128,
        reward_shares: u128,
        fee_shares: u128,
    },
    DepositExtended {
        position: PositionId,
        from: TrancheId,
        to: TrancheId,
        top_up: u128,
    },
    Withdrawn {
        position: PositionId,
        tranche_id: TrancheId,
        stake: u128,
        rewards: u128,
    },
    StakeBurned {
        amount: u128,
        active_stake: u128,
    },
    PoolHalted,
    Allocated {
        allocation_id: AllocationId,
        product_id: ProductId,
        units: u128,
        premium: u128,
        rewards: u128,
    },
    Deallocated {
        allocation_id: AllocationId,
        units: u128,
        unstreamed_rewards: u128,
    },
    CoverExpired {
        allocation_id: AllocationId,
    },
    PoolFeeChanged {
        from: u8,
        to: u8,
    },
    PausedChanged {
        paused: bool,
    },
}
