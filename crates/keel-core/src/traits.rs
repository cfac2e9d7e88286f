//! Trait interfaces between Keel crates and external collaborators.
//!
//! - [`PositionRegistry`]: position ownership and approvals (a certificate
//!   registry outside the ledger; keel-ledger ships an in-memory one)
//! - [`CapacitySource`]: capacity and allocation reads the product book
//!   needs to compute effective weights (keel-ledger implements)

use crate::types::{AccountId, PoolId, PositionId, ProductId};

/// Ownership records for staking positions.
///
/// The ledger never transfers positions; it only mints them on first
/// deposit and checks ownership or approval on later calls.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait PositionRegistry {
    /// Mint a new position for `owner` in `pool_id`. Never returns the sentinel id.
    fn mint(&mut self, pool_id: PoolId, owner: AccountId, now: u64) -> PositionId;

    /// Pool a position belongs to. `None` for unknown positions.
    fn pool_of(&self, position: PositionId) -> Option<PoolId>;

    /// Current owner of a position. `None` for unknown positions.
    fn owner_of(&self, position: PositionId) -> Option<AccountId>;

    /// Whether `who` owns `position` or has been approved to operate it.
    fn is_approved_or_owner(&self, who: &AccountId, position: PositionId) -> bool;
}

/// Read access to pool capacity, in allocation units.
pub trait CapacitySource {
    /// Capacity of all active tranches for a product at 100% weight, after
    /// the product's capacity reduction.
    fn total_capacity(&self, product: ProductId, capacity_reduction_ratio: u64) -> u128;

    /// Units currently allocated to a product across active tranches.
    fn total_allocation(&self, product: ProductId) -> u128;
}
