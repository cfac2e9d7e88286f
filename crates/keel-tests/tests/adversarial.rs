//! Adversarial tests for the Keel staking pool.
//!
//! These tests try to break the pool through its public surface and check
//! that every rejected call leaves no trace.
//!
//! Attack vectors tested:
//! - Acting on positions the caller does not own or that belong elsewhere
//! - Long gaps between interactions (many boundaries in one call)
//! - Dust deposits and deposits outside the active tranche window
//! - Manager-only calls from other accounts
//! - Cover requests that are malformed or exceed the accepted premium
//! - Pause and halt switches
//! - Claims and releases on covers that already expired

use keel_core::config::PoolConfig;
use keel_core::constants::{ONE_DAY, ONE_TOKEN};
use keel_core::error::{AllocationError, KeelError, LedgerError};
use keel_core::traits::{MockPositionRegistry, PositionRegistry};
use keel_core::types::{AllocationId, PositionId};
use keel_ledger::{AllocationRequest, BurnStakeParams, DeallocationReceipt, PoolEvent, StakingPool};
use keel_pricing::products::{ProductInfo, ProductParams};
use keel_tests::helpers::{account, add_product, cover, pool_with, small_config, Pool, MANAGER, POOL_ID};

const PRODUCT: u32 = 1;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Default pool with 1000 tokens in tranche 7 and one product at weight 50.
fn staked_pool() -> (Pool, PositionId) {
    let mut pool = pool_with(PoolConfig::default(), 0);
    let position = pool.deposit_to(account(1), 1_000 * ONE_TOKEN, 7, PositionId::NEW, None, 0).unwrap();
    add_product(&mut pool, PRODUCT, ProductInfo::default(), 50, 200, 0);
    (pool, position)
}

// ---------------------------------------------------------------------------
// Position ownership
// ---------------------------------------------------------------------------

#[test]
fn stranger_cannot_touch_position() {
    let (mut pool, position) = staked_pool();
    let mallory = account(66);
    let before = pool.ledger().clone();

    assert_eq!(
        pool.deposit_to(mallory, ONE_TOKEN, 7, position, None, ONE_DAY),
        Err(LedgerError::NotTokenOwnerOrApproved(position.0).into())
    );
    assert_eq!(
        pool.withdraw(mallory, position, true, true, &[7], ONE_DAY),
        Err(LedgerError::NotTokenOwnerOrApproved(position.0).into())
    );
    assert_eq!(
        pool.extend_deposit(mallory, position, 7, 8, 0, ONE_DAY),
        Err(LedgerError::NotTokenOwnerOrApproved(position.0).into())
    );
    assert_eq!(pool.ledger(), &before);
}

#[test]
fn approval_grants_and_revocation_removes_access() {
    let (mut pool, position) = staked_pool();
    let (owner, operator) = (account(1), account(2));

    pool.registry_mut().approve(&owner, position, operator).unwrap();
    assert!(pool.deposit_to(operator, ONE_TOKEN, 7, position, None, 0).is_ok());

    pool.registry_mut().revoke(&owner, position, &operator).unwrap();
    assert!(pool.deposit_to(operator, ONE_TOKEN, 7, position, None, 0).is_err());

    // only the owner may hand out approvals
    assert_eq!(
        pool.registry_mut().approve(&operator, position, operator),
        Err(LedgerError::NotTokenOwnerOrApproved(position.0))
    );
}

#[test]
fn position_from_another_pool_is_rejected() {
    let mut pool = pool_with(small_config(), 0);
    let alice = account(1);
    let foreign = pool.registry_mut().mint(POOL_ID + 1, alice, 0);

    assert_eq!(
        pool.deposit_to(alice, 10_000, 0, foreign, None, 0),
        Err(LedgerError::InvalidPositionForPool(foreign.0).into())
    );
    assert_eq!(
        pool.withdraw(alice, foreign, false, true, &[0], 0),
        Err(LedgerError::InvalidPositionForPool(foreign.0).into())
    );
}

#[test]
fn unknown_position_is_rejected() {
    let mut pool = pool_with(small_config(), 0);
    assert_eq!(
        pool.deposit_to(account(1), 10_000, 0, PositionId(77), None, 0),
        Err(LedgerError::InvalidPositionForPool(77).into())
    );
}

#[test]
fn registry_refusal_blocks_deposit() {
    let mut registry = MockPositionRegistry::new();
    registry.expect_pool_of().returning(|_| Some(POOL_ID));
    registry.expect_is_approved_or_owner().returning(|_, _| false);
    registry.expect_mint().never();

    let mut pool = StakingPool::new(POOL_ID, MANAGER, small_config(), registry, 0).unwrap();
    assert_eq!(
        pool.deposit_to(account(1), 10_000, 0, PositionId(5), None, 0),
        Err(LedgerError::NotTokenOwnerOrApproved(5).into())
    );
    assert_eq!(pool.stake_shares_supply(), 0);
}

// ---------------------------------------------------------------------------
// Long gaps
// ---------------------------------------------------------------------------

#[test]
fn ten_tranche_gap_processes_every_boundary() {
    let mut pool = pool_with(small_config(), 0);
    pool.deposit_to(account(1), 10_000, 3, PositionId::NEW, None, 0).unwrap();
    pool.take_events();

    pool.process_expirations(true, 1_000).unwrap();
    let events = pool.take_events();

    let tranches: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            PoolEvent::TrancheExpired { tranche_id, .. } => Some(*tranche_id),
            _ => None,
        })
        .collect();
    let buckets = events.iter().filter(|e| matches!(e, PoolEvent::BucketExpired { .. })).count();
    assert_eq!(tranches, (0..10).collect::<Vec<_>>());
    assert_eq!(buckets, 33);

    // bucket 9 and tranche 2 both end at 300; the bucket goes first
    let bucket_9 = events
        .iter()
        .position(|e| matches!(e, PoolEvent::BucketExpired { bucket_id: 9, .. }))
        .unwrap();
    let tranche_2 = events
        .iter()
        .position(|e| matches!(e, PoolEvent::TrancheExpired { tranche_id: 2, .. }))
        .unwrap();
    assert!(bucket_9 < tranche_2);

    // the whole stake sat in tranche 3 and left with it
    assert_eq!(pool.active_stake(), 0);
    assert_eq!(pool.stake_shares_supply(), 0);
    assert_eq!(pool.ledger().first_active_tranche_id(), 10);
}

#[test]
fn repeated_processing_is_idempotent() {
    let mut pool = pool_with(small_config(), 0);
    pool.deposit_to(account(1), 10_000, 2, PositionId::NEW, None, 0).unwrap();
    pool.process_expirations(true, 1_000).unwrap();
    let once = pool.ledger().clone();
    pool.take_events();

    pool.process_expirations(true, 1_000).unwrap();
    pool.process_expirations(false, 1_000).unwrap();
    // a time behind the frontier changes nothing either
    pool.process_expirations(true, 500).unwrap();
    assert_eq!(pool.ledger(), &once);
    assert!(pool.take_events().is_empty());
}

#[test]
fn failed_call_rolls_back_pending_expirations() {
    let mut pool = pool_with(small_config(), 0);
    let alice = account(1);
    let position = pool.deposit_to(alice, 10_000, 3, PositionId::NEW, None, 0).unwrap();
    pool.take_events();
    let before = pool.ledger().clone();

    assert_eq!(
        pool.extend_deposit(alice, position, 3, 2, 0, 250),
        Err(LedgerError::NewTrancheEndsBeforeInitialTranche { initial: 3, new: 2 }.into())
    );
    // tranches 0 and 1 were due at 250 but nothing was committed
    assert_eq!(pool.ledger(), &before);
    assert_eq!(pool.ledger().first_active_tranche_id(), 0);
    assert!(pool.take_events().is_empty());
}

// ---------------------------------------------------------------------------
// Deposits
// ---------------------------------------------------------------------------

#[test]
fn dust_and_zero_deposits_are_rejected() {
    let (mut pool, _) = staked_pool();
    let bob = account(2);

    assert_eq!(
        pool.deposit_to(bob, 0, 7, PositionId::NEW, None, 0),
        Err(LedgerError::InsufficientDepositAmount.into())
    );
    // one base unit buys less than one share at this price
    assert_eq!(
        pool.deposit_to(bob, 1, 7, PositionId::NEW, None, 0),
        Err(LedgerError::InsufficientDepositAmount.into())
    );
    // nothing was minted for the failed attempts
    assert_eq!(pool.registry().positions_of(&bob).count(), 0);
}

#[test]
fn deposits_outside_active_window_are_rejected() {
    let mut pool = pool_with(small_config(), 0);
    let alice = account(1);

    assert_eq!(
        pool.deposit_to(alice, 10_000, 1, PositionId::NEW, None, 250),
        Err(LedgerError::RequestedTrancheIsExpired { tranche_id: 1, first_active_tranche_id: 2 }.into())
    );
    assert_eq!(
        pool.deposit_to(alice, 10_000, 6, PositionId::NEW, None, 250),
        Err(LedgerError::RequestedTrancheIsNotYetActive { tranche_id: 6, max_tranche_id: 5 }.into())
    );
    assert!(pool.deposit_to(alice, 10_000, 5, PositionId::NEW, None, 250).is_ok());
}

// ---------------------------------------------------------------------------
// Manager-only calls
// ---------------------------------------------------------------------------

#[test]
fn manager_calls_reject_other_accounts() {
    let (mut pool, _) = staked_pool();
    let mallory = account(66);

    assert_eq!(
        pool.set_products(mallory, &[ProductParams::new(PRODUCT, 100, 200)], 0),
        Err(LedgerError::OnlyManager.into())
    );
    assert_eq!(pool.set_pool_fee(mallory, 0, 0), Err(LedgerError::OnlyManager.into()));
    assert_eq!(
        pool.withdraw(mallory, PositionId::MANAGER_FEE, false, true, &[7], 0),
        Err(LedgerError::OnlyManager.into())
    );

    let max = pool.config().max_pool_fee;
    assert_eq!(
        pool.set_pool_fee(MANAGER, max + 1, 0),
        Err(LedgerError::PoolFeeExceedsMax { fee: max + 1, max }.into())
    );
    assert_eq!(pool.product(PRODUCT).unwrap().target_weight, 50);
}

// ---------------------------------------------------------------------------
// Cover requests
// ---------------------------------------------------------------------------

#[test]
fn malformed_cover_requests_are_rejected() {
    let (mut pool, _) = staked_pool();

    assert_eq!(
        pool.request_allocation(&cover(PRODUCT, 0, 90), 0),
        Err(AllocationError::ZeroCoverAmount.into())
    );
    assert_eq!(
        pool.request_allocation(&cover(PRODUCT, ONE_TOKEN, 27), 0),
        Err(AllocationError::InvalidCoverPeriod(27 * ONE_DAY).into())
    );
    assert_eq!(
        pool.request_allocation(&cover(PRODUCT, ONE_TOKEN, 366), 0),
        Err(AllocationError::InvalidCoverPeriod(366 * ONE_DAY).into())
    );
    assert_eq!(
        pool.request_allocation(&cover(9, ONE_TOKEN, 90), 0),
        Err(AllocationError::ProductNotFound(9).into())
    );
    assert!(matches!(
        pool.request_deallocation(AllocationId(99), 0),
        Err(KeelError::Allocation(AllocationError::AllocationNotFound(99)))
    ));
}

#[test]
fn slippage_guard_leaves_price_untouched() {
    let (mut pool, _) = staked_pool();
    let product_before = *pool.product(PRODUCT).unwrap();
    let ledger_before = pool.ledger().clone();

    let request = AllocationRequest { max_premium: Some(1), ..cover(PRODUCT, 100 * ONE_TOKEN, 90) };
    assert!(matches!(
        pool.request_allocation(&request, ONE_DAY),
        Err(KeelError::Allocation(AllocationError::PriceSlippageExceeded { max: 1, .. }))
    ));
    assert_eq!(pool.product(PRODUCT), Some(&product_before));
    assert_eq!(pool.ledger(), &ledger_before);
    assert_eq!(pool.active_allocations(PRODUCT).count(), 0);
}

#[test]
fn oversized_cover_is_rejected() {
    let (mut pool, _) = staked_pool();
    // 1000 tokens at 2x and 50% weight is 100_000 units
    assert_eq!(
        pool.request_allocation(&cover(PRODUCT, 1_001 * ONE_TOKEN, 90), 0),
        Err(AllocationError::InsufficientCapacity { requested: 100_100, available: 100_000 }.into())
    );
}

// ---------------------------------------------------------------------------
// Pause and halt
// ---------------------------------------------------------------------------

#[test]
fn pause_blocks_everything_but_burns() {
    let (mut pool, position) = staked_pool();
    let alice = account(1);
    pool.set_paused(true);

    assert_eq!(
        pool.deposit_to(alice, ONE_TOKEN, 7, position, None, 0),
        Err(LedgerError::SystemPaused.into())
    );
    assert_eq!(
        pool.withdraw(alice, position, false, true, &[7], 0),
        Err(LedgerError::SystemPaused.into())
    );
    assert_eq!(
        pool.request_allocation(&cover(PRODUCT, ONE_TOKEN, 90), 0),
        Err(LedgerError::SystemPaused.into())
    );
    assert!(pool.burn_stake(ONE_TOKEN, None, 0).is_ok());

    pool.set_paused(false);
    assert!(pool.deposit_to(alice, ONE_TOKEN, 7, position, None, 0).is_ok());
}

#[test]
fn halted_pool_refuses_stake_but_pays_out() {
    let mut pool = pool_with(small_config(), 0);
    let alice = account(1);
    let position = pool.deposit_to(alice, 10_000, 0, PositionId::NEW, None, 0).unwrap();

    let outcome = pool.burn_stake(u128::MAX, None, 0).unwrap();
    assert!(outcome.halted);
    assert!(pool.is_halted());
    assert_eq!(pool.active_stake(), 1);

    assert_eq!(
        pool.deposit_to(alice, 10_000, 1, PositionId::NEW, None, 0),
        Err(LedgerError::PoolHalted.into())
    );
    assert_eq!(
        pool.extend_deposit(alice, position, 0, 1, 0, 0),
        Err(LedgerError::PoolHalted.into())
    );

    // the last base unit goes out once tranche 0 expires
    let paid = pool.withdraw(alice, position, true, true, &[0], 100).unwrap();
    assert_eq!(paid.stake, 1);
    assert_eq!(pool.active_stake(), 0);
}

#[test]
fn burn_on_empty_pool_is_a_noop() {
    let mut pool = pool_with(small_config(), 0);
    let outcome = pool.burn_stake(1_000, None, 0).unwrap();
    assert_eq!(outcome.burned, 0);
    assert!(!outcome.halted);
    assert!(!pool.is_halted());
}

// ---------------------------------------------------------------------------
// Claims after expiry
// ---------------------------------------------------------------------------

#[test]
fn claim_after_cover_expiry_still_burns() {
    let (mut pool, _) = staked_pool();
    let request = AllocationRequest { grace_period: 35 * ONE_DAY, ..cover(PRODUCT, 100 * ONE_TOKEN, 30) };
    let id = pool.request_allocation(&request, 0).unwrap().allocation_id;
    let expires_at = pool.allocation(id).unwrap().expires_at;
    let stake_before = pool.active_stake();

    // claim lands inside the grace period, after the cover left the book
    let claim = BurnStakeParams { allocation_id: id, deallocation_amount: 100 * ONE_TOKEN };
    let outcome = pool.burn_stake(100 * ONE_TOKEN, Some(claim), expires_at + ONE_DAY).unwrap();
    assert_eq!(outcome.burned, 100 * ONE_TOKEN);
    assert_eq!(pool.active_stake(), stake_before - 100 * ONE_TOKEN);
    assert!(pool.allocation(id).is_none());

    assert_eq!(
        pool.request_deallocation(id, expires_at + 2 * ONE_DAY),
        Ok(DeallocationReceipt { allocation_id: id, units: 0, unstreamed_rewards: 0 })
    );

    // renewing an expired cover only books the new one
    let renewal = AllocationRequest { previous_allocation: Some(id), ..cover(PRODUCT, 100 * ONE_TOKEN, 30) };
    let renewed = pool.request_allocation(&renewal, expires_at + 3 * ONE_DAY).unwrap().allocation_id;
    assert!(pool.allocation(renewed).is_some());

    // ids never handed out are still rejected
    let unknown = BurnStakeParams { allocation_id: AllocationId(42), deallocation_amount: ONE_TOKEN };
    let stake = pool.active_stake();
    assert_eq!(
        pool.burn_stake(ONE_TOKEN, Some(unknown), expires_at + 4 * ONE_DAY),
        Err(AllocationError::AllocationNotFound(42).into())
    );
    assert_eq!(pool.active_stake(), stake);
}
