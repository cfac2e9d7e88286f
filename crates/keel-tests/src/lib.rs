//! Scenario, property and adversarial test suite for the Keel staking pool.
//!
//! The integration tests under `tests/` drive [`keel_ledger::StakingPool`]
//! end to end: deposits across tranches, lazy expiration over long gaps,
//! cover allocations and their reward streams, burns, and governance calls.
//! Ledger invariants are checked after every step.

pub mod helpers;
