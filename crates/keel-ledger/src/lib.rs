//! # keel-ledger — Tranche staking ledger and cover allocation book.
//!
//! All ledger arithmetic is integer-only; state transitions are pure
//! functions over [`LedgerState`] driven by an explicit `now`.
//!
//! - **Deposits**: stake shares bootstrap at `isqrt(amount)` and are
//!   proportional afterwards; reward shares add a tenure bonus and a
//!   manager fee split.
//! - **Expiration**: bucket and tranche boundaries are processed lazily in
//!   time order, freezing each expired tranche's accumulator and stake.
//! - **Rewards**: a global per-share accumulator fed by per-allocation
//!   reward streams that end on bucket boundaries.
//! - **Allocations**: covers fill tranche capacity at the product's target
//!   weight, are priced on the bonding curve and expire from an
//!   arena-backed queue.
//! - **Burns**: claim payouts reduce active stake, never share supplies.
//!
//! [`StakingPool`] ties these together behind atomic, event-emitting calls.

pub mod allocation;
pub mod burn;
pub mod deposit;
pub mod events;
pub mod expiration;
pub mod pool;
pub mod positions;
pub mod queue;
pub mod rewards;
pub mod state;
pub mod withdraw;

pub use allocation::{
    AllocationBook, AllocationReceipt, AllocationRequest, BurnStakeParams, CoverAllocation, DeallocationReceipt,
};
pub use burn::BurnOutcome;
pub use deposit::ExtendOutcome;
pub use events::PoolEvent;
pub use expiration::{advance, Transition};
pub use pool::StakingPool;
pub use positions::MemoryPositionRegistry;
pub use queue::{ExpiryQueue, SlotId};
pub use state::LedgerState;
pub use withdraw::Withdrawal;
