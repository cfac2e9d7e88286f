//! In-memory position registry.

use std::collections::{BTreeMap, BTreeSet};

use keel_core::error::LedgerError;
use keel_core::traits::PositionRegistry;
use keel_core::types::{AccountId, PoolId, Position, PositionId};

/// [`PositionRegistry`] backed by maps. Ids are minted from 1 upwards,
/// shared across pools.
#[derive(Clone, Debug, Default)]
pub struct MemoryPositionRegistry {
    positions: BTreeMap<PositionId, Position>,
    approvals: BTreeMap<PositionId, BTreeSet<AccountId>>,
    last_id: u64,
}

impl MemoryPositionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self, id: PositionId) -> Option<&Position> {
        self.positions.get(&id)
    }

    pub fn positions_of<'a>(&'a self, owner: &'a AccountId) -> impl Iterator<Item = &'a Position> + 'a {
        self.positions.values().filter(move |p| &p.owner == owner)
    }

    /// Let `operator` act on `position`. Only the owner may approve.
    pub fn approve(&mut self, caller: &AccountId, position: PositionId, operator: AccountId) -> Result<(), LedgerError> {
        self.require_owner(caller, position)?;
        self.approvals.entry(position).or_default().insert(operator);
        Ok(())
    }

    pub fn revoke(&mut self, caller: &AccountId, position: PositionId, operator: &AccountId) -> Result<(), LedgerError> {
        self.require_owner(caller, position)?;
        if let Some(ops) = self.approvals.get_mut(&position) {
            ops.remove(operator);
        }
        Ok(())
    }

    fn require_owner(&self, caller: &AccountId, position: PositionId) -> Result<(), LedgerError> {
        match self.positions.get(&position) {
            Some(p) if &p.owner == caller => Ok(()),
            _ => Err(LedgerError::NotTokenOwnerOrApproved(position.0)),
        }
    }
}

impl PositionRegistry for MemoryPositionRegistry {
    fn mint(&mut self, pool_id: PoolId, owner: AccountId, now: u64) -> PositionId {
        self.last_id += 1;
        let id = PositionId(self.last_id);
        self.positions.insert(id, Position { id, pool_id, owner, created_at: now });
        id
    }

    fn pool_of(&self, position: PositionId) -> Option<PoolId> {
        self.positions.get(&position).map(|p| p.pool_id)
    }

    fn owner_of(&self, position: PositionId) -> Option<AccountId> {
        self.positions.get(&position).map(|p| p.owner)
    }

    fn is_approved_or_owner(&self, who: &AccountId, position: PositionId) -> bool {
        match self.positions.get(&position) {
            Some(p) if &p.owner == who => true,
            Some(_) => self.approvals.get(&position).is_some_and(|ops| ops.contains(who)),
            None => false,
        }
    }
}
