//! The staking pool facade.
//!
//! [`StakingPool`] owns the ledger, the product book and the allocation
//! book of one pool, and exposes the operations members, the cover
//! module, claims and governance call. Every mutating call:
//!
//! 1. runs on a working copy of the pool state,
//! 2. first brings the ledger up to `now` (tranche and bucket expiry,
//!    finished covers),
//! 3. applies its change,
//! 4. commits the copy and its events only if nothing failed.
//!
//! A rejected call therefore leaves the pool exactly as it was. Invariants
//! are re-checked before every commit in debug builds.

use std::mem;

use tracing::{debug, info};

use keel_core::config::PoolConfig;
use keel_core::error::{AllocationError, ConfigError, KeelError, LedgerError};
use keel_core::time::TimeGrid;
use keel_core::traits::{CapacitySource, PositionRegistry};
use keel_core::types::{AccountId, AllocationId, Deposit, ExpiredTranche, PoolId, PositionId, ProductId, Tranche, TrancheId};
use keel_pricing::products::{ProductBook, ProductInfo, ProductParams, StakedProduct};

use crate::allocation::{
    self, AllocationBook, AllocationReceipt, AllocationRequest, AllocationTerms, BurnStakeParams, CapacityView,
    CoverAllocation, DeallocationReceipt,
};
use crate::burn::{self, deallocation_units, BurnOutcome};
use crate::deposit::{self, apply_deposit, plan_deposit, resplit_fee_shares, DepositTerms, ExtendOutcome};
use crate::events::PoolEvent;
use crate::expiration::{advance, is_due, Transition};
use crate::rewards::{projected_acc_reward_per_share, realizable_rewards};
use crate::state::LedgerState;
use crate::withdraw::{self, Withdrawal};

/// Everything a call may change. Cloned per call and committed on success.
#[derive(Clone, Debug)]
struct PoolState {
    ledger: LedgerState,
    products: ProductBook,
    allocations: AllocationBook,
    pool_fee: u8,
    global_capacity_ratio: u64,
    paused: bool,
    halted: bool,
}

/// A working copy of the pool state plus read access to the rest of the pool.
struct Working<'a, R> {
    state: PoolState,
    events: Vec<PoolEvent>,
    pool_id: PoolId,
    manager: AccountId,
    grid: &'a TimeGrid,
    config: &'a PoolConfig,
    registry: &'a mut R,
}

impl<R: PositionRegistry> Working<'_, R> {
    /// Expire boundaries and covers up to `now`.
    fn sync(&mut self, now: u64, force: bool) {
        let ledger = mem::take(&mut self.state.ledger);
        let Transition { state, events } = advance(ledger, self.grid, now, force);
        self.state.ledger = state;
        self.events.extend(events);

        for cover in self.state.allocations.expire_due(now) {
            debug!(allocation_id = %cover.id, product_id = cover.product_id, "cover expired");
            self.events.push(PoolEvent::CoverExpired { allocation_id: cover.id });
        }
    }

    fn ensure_not_paused(&self) -> Result<(), LedgerError> {
        if self.state.paused {
            return Err(LedgerError::SystemPaused);
        }
        Ok(())
    }

    fn ensure_accepting_stake(&self) -> Result<(), LedgerError> {
        self.ensure_not_paused()?;
        if self.state.halted {
            return Err(LedgerError::PoolHalted);
        }
        Ok(())
    }

    fn ensure_manager(&self, caller: &AccountId) -> Result<(), LedgerError> {
        if caller != &self.manager {
            return Err(LedgerError::OnlyManager);
        }
        Ok(())
    }

    /// The position belongs to this pool and `caller` may operate it.
    fn ensure_operator(&self, caller: &AccountId, position: PositionId) -> Result<(), LedgerError> {
        if self.registry.pool_of(position) != Some(self.pool_id) {
            return Err(LedgerError::InvalidPositionForPool(position.0));
        }
        if !self.registry.is_approved_or_owner(caller, position) {
            return Err(LedgerError::NotTokenOwnerOrApproved(position.0));
        }
        Ok(())
    }

    fn deposit_terms(&self) -> DepositTerms {
        DepositTerms {
            pool_fee: self.state.pool_fee,
            reward_bonus_per_tranche: self.config.reward_bonus_per_tranche,
        }
    }

    fn allocation_terms(&self) -> AllocationTerms {
        AllocationTerms {
            global_capacity_ratio: self.state.global_capacity_ratio,
            rewards_ratio: self.config.rewards_ratio,
            pricing: self.config.pricing,
        }
    }

    fn refresh_weight(&mut self, product: ProductId) -> Option<u16> {
        let view = CapacityView {
            ledger: &self.state.ledger,
            book: &self.state.allocations,
            grid: self.grid,
            global_capacity_ratio: self.state.global_capacity_ratio,
        };
        self.state.products.refresh_effective_weight(product, &view)
    }

    fn refresh_all_weights(&mut self) {
        let ids: Vec<ProductId> = self.state.products.products().map(|(id, _)| id).collect();
        for id in ids {
            self.refresh_weight(id);
        }
    }

    /// Issued earlier but already expired or released.
    fn is_released(&self, id: AllocationId) -> bool {
        self.state.allocations.allocation(id).is_none() && self.state.allocations.was_issued(id)
    }

    fn deallocate(&mut self, id: AllocationId, now: u64) -> Result<(CoverAllocation, DeallocationReceipt), KeelError> {
        let (cover, receipt) =
            allocation::deallocate(&mut self.state.ledger, &mut self.state.allocations, self.grid, id, now)?;
        debug!(allocation_id = %id, units = %receipt.units, unstreamed = %receipt.unstreamed_rewards, "cover deallocated");
        self.events.push(PoolEvent::Deallocated {
            allocation_id: id,
            units: receipt.units,
            unstreamed_rewards: receipt.unstreamed_rewards,
        });
        Ok((cover, receipt))
    }
}

/// One staking pool: deposits, rewards, capacity, pricing and burns.
///
/// Not internally synchronized; wrap in a `Mutex` to share across threads.
pub struct StakingPool<R> {
    id: PoolId,
    manager: AccountId,
    config: PoolConfig,
    grid: TimeGrid,
    registry: R,
    state: PoolState,
    events: Vec<PoolEvent>,
}

impl<R: PositionRegistry> StakingPool<R> {
    /// Create an empty pool whose expiration frontier starts at `now`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] if `config` fails validation.
    pub fn new(id: PoolId, manager: AccountId, config: PoolConfig, registry: R, now: u64) -> Result<Self, ConfigError> {
        config.validate()?;
        let grid = config.time_grid();
        let state = PoolState {
            ledger: LedgerState::new(&grid, now),
            products: ProductBook::new(),
            allocations: AllocationBook::new(),
            pool_fee: config.pool_fee,
            global_capacity_ratio: config.global_capacity_ratio,
            paused: false,
            halted: false,
        };
        info!(pool_id = id, manager = %manager, pool_fee = config.pool_fee, "staking pool created");
        Ok(Self { id, manager, config, grid, registry, state, events: Vec::new() })
    }

    /// Run `f` on a working copy and commit it only if `f` succeeds.
    ///
    /// Debug builds also re-check the ledger invariants before committing.
    /// Registry mints are outside the working copy, so calls that mint run
    /// the same check before minting.
    fn transact<T>(&mut self, f: impl FnOnce(&mut Working<'_, R>) -> Result<T, KeelError>) -> Result<T, KeelError> {
        let mut work = Working {
            state: self.state.clone(),
            events: Vec::new(),
            pool_id: self.id,
            manager: self.manager,
            grid: &self.grid,
            config: &self.config,
            registry: &mut self.registry,
        };
        let out = f(&mut work)?;
        #[cfg(debug_assertions)]
        work.state.ledger.check_invariants()?;

        let Working { state, events, .. } = work;
        self.state = state;
        self.events.extend(events);
        Ok(out)
    }

    // --- staking ---

    /// Deposit `amount` into `tranche_id`.
    ///
    /// With [`PositionId::NEW`] a position is minted to `destination` (or
    /// the caller); otherwise `caller` must own or be approved for
    /// `position`, which must belong to this pool. Returns the position
    /// credited.
    pub fn deposit_to(
        &mut self,
        caller: AccountId,
        amount: u128,
        tranche_id: TrancheId,
        position: PositionId,
        destination: Option<AccountId>,
        now: u64,
    ) -> Result<PositionId, KeelError> {
        self.transact(|w| {
            w.ensure_accepting_stake()?;
            if !position.is_sentinel() {
                w.ensure_operator(&caller, position)?;
            }
            w.sync(now, true);

            let plan = plan_deposit(&w.state.ledger, w.grid, amount, tranche_id, &w.deposit_terms())?;
            let position = if position.is_sentinel() {
                #[cfg(debug_assertions)]
                {
                    // shares land in the same tranche whatever id the mint returns
                    let mut trial = w.state.ledger.clone();
                    apply_deposit(&mut trial, position, &plan);
                    trial.check_invariants()?;
                }
                w.registry.mint(w.pool_id, destination.unwrap_or(caller), now)
            } else {
                position
            };
            apply_deposit(&mut w.state.ledger, position, &plan);

            debug!(
                position = %position,
                tranche_id,
                amount = %amount,
                stake_shares = %plan.stake_shares,
                reward_shares = %plan.reward_shares,
                "deposit"
            );
            w.events.push(PoolEvent::Deposited {
                position,
                tranche_id,
                amount,
                stake_shares: plan.stake_shares,
                reward_shares: plan.reward_shares,
                fee_shares: plan.fee_shares,
            });
            Ok(position)
        })
    }

    /// Move a deposit from `initial` to the later tranche `new`, adding
    /// `top_up` stake.
    pub fn extend_deposit(
        &mut self,
        caller: AccountId,
        position: PositionId,
        initial: TrancheId,
        new: TrancheId,
        top_up: u128,
        now: u64,
    ) -> Result<ExtendOutcome, KeelError> {
        self.transact(|w| {
            w.ensure_accepting_stake()?;
            w.ensure_operator(&caller, position)?;
            w.sync(now, true);

            let terms = w.deposit_terms();
            let out = deposit::extend_deposit(&mut w.state.ledger, w.grid, position, initial, new, top_up, &terms)?;
            debug!(position = %position, from = initial, to = new, top_up = %top_up, "deposit extended");
            w.events.push(PoolEvent::DepositExtended { position, from: initial, to: new, top_up });
            Ok(out)
        })
    }

    /// Withdraw stake (expired tranches only) and/or rewards from `tranches`.
    /// The manager fee position is withdrawn by the manager.
    pub fn withdraw(
        &mut self,
        caller: AccountId,
        position: PositionId,
        withdraw_stake: bool,
        withdraw_rewards: bool,
        tranches: &[TrancheId],
        now: u64,
    ) -> Result<Withdrawal, KeelError> {
        self.transact(|w| {
            w.ensure_not_paused()?;
            if position == PositionId::MANAGER_FEE {
                w.ensure_manager(&caller)?;
            } else {
                w.ensure_operator(&caller, position)?;
            }
            w.sync(now, true);

            let (total, parts) =
                withdraw::withdraw(&mut w.state.ledger, position, tranches, withdraw_stake, withdraw_rewards);
            for (tranche_id, part) in parts {
                if part == Withdrawal::default() {
                    continue;
                }
                w.events.push(PoolEvent::Withdrawn { position, tranche_id, stake: part.stake, rewards: part.rewards });
            }
            debug!(position = %position, stake = %total.stake, rewards = %total.rewards, "withdraw");
            Ok(total)
        })
    }

    /// Expire every tranche, bucket and cover boundary up to `now`. With
    /// `force`, also accrue rewards for the partial bucket up to `now`.
    pub fn process_expirations(&mut self, force: bool, now: u64) -> Result<(), KeelError> {
        self.transact(|w| {
            w.sync(now, force);
            Ok(())
        })
    }

    // --- cover ---

    /// Allocate capacity for a cover and start its reward stream. A
    /// `previous_allocation` is released first.
    pub fn request_allocation(&mut self, request: &AllocationRequest, now: u64) -> Result<AllocationReceipt, KeelError> {
        self.transact(|w| {
            w.ensure_not_paused()?;
            w.sync(now, true);
            if let Some(previous) = request.previous_allocation.filter(|id| !w.is_released(*id)) {
                w.deallocate(previous, now)?;
            }

            let terms = w.allocation_terms();
            let receipt = allocation::allocate(
                &mut w.state.ledger,
                &mut w.state.products,
                &mut w.state.allocations,
                w.grid,
                &terms,
                request,
                now,
            )?;
            let units = w
                .state
                .allocations
                .allocation(receipt.allocation_id)
                .map(CoverAllocation::units)
                .unwrap_or(0);

            debug!(
                allocation_id = %receipt.allocation_id,
                product_id = request.product_id,
                units = %units,
                premium = %receipt.premium,
                effective_weight = receipt.effective_weight,
                "cover allocated"
            );
            w.events.push(PoolEvent::Allocated {
                allocation_id: receipt.allocation_id,
                product_id: request.product_id,
                units,
                premium: receipt.premium,
                rewards: receipt.rewards,
            });
            Ok(receipt)
        })
    }

    /// Release a cover early, stopping the rest of its reward stream.
    ///
    /// A cover that already expired has nothing left to release; the
    /// receipt is empty.
    pub fn request_deallocation(&mut self, allocation_id: AllocationId, now: u64) -> Result<DeallocationReceipt, KeelError> {
        self.transact(|w| {
            w.ensure_not_paused()?;
            w.sync(now, true);
            if w.is_released(allocation_id) {
                debug!(allocation_id = %allocation_id, "cover already released");
                return Ok(DeallocationReceipt { allocation_id, units: 0, unstreamed_rewards: 0 });
            }
            let (cover, receipt) = w.deallocate(allocation_id, now)?;
            w.refresh_weight(cover.product_id);
            Ok(receipt)
        })
    }

    /// Burn `amount` of active stake after a claim payout, releasing part
    /// of the paid cover's allocation when `params` are given.
    ///
    /// Burning the whole active stake leaves one base unit and halts the
    /// pool for new stake. Claims on a cover that has since expired still
    /// burn; there is no allocation left to reduce.
    pub fn burn_stake(&mut self, amount: u128, params: Option<BurnStakeParams>, now: u64) -> Result<BurnOutcome, KeelError> {
        self.transact(|w| {
            w.sync(now, false);

            if let Some(params) = params {
                if w.is_released(params.allocation_id) {
                    debug!(allocation_id = %params.allocation_id, "burn on released cover, nothing to reduce");
                } else {
                    let units = deallocation_units(params.deallocation_amount);
                    let released = w.state.allocations.reduce(params.allocation_id, units)?;
                    debug!(allocation_id = %params.allocation_id, units = %released, "allocation reduced by burn");
                }
            }

            let outcome = burn::burn(&mut w.state.ledger, amount);
            let active_stake = w.state.ledger.active_stake();
            debug!(burned = %outcome.burned, active_stake = %active_stake, "stake burned");
            w.events.push(PoolEvent::StakeBurned { amount: outcome.burned, active_stake });

            if outcome.halted && !w.state.halted {
                w.state.halted = true;
                info!(pool_id = w.pool_id, "pool halted after full burn");
                w.events.push(PoolEvent::PoolHalted);
            }
            w.refresh_all_weights();
            Ok(outcome)
        })
    }

    // --- products ---

    /// Add or replace a catalog entry.
    pub fn register_product(&mut self, id: ProductId, info: ProductInfo) {
        self.state.products.register_product(id, info);
    }

    /// Set target weights and prices. Manager only.
    pub fn set_products(&mut self, caller: AccountId, params: &[ProductParams], now: u64) -> Result<(), KeelError> {
        self.transact(|w| {
            w.ensure_manager(&caller)?;
            w.sync(now, true);
            let view = CapacityView {
                ledger: &w.state.ledger,
                book: &w.state.allocations,
                grid: w.grid,
                global_capacity_ratio: w.state.global_capacity_ratio,
            };
            w.state.products.set_products(params, &view, w.config.max_total_weight, now)?;
            Ok(())
        })
    }

    /// Recompute the effective weights of `products` against current capacity.
    pub fn recalculate_effective_weights(&mut self, products: &[ProductId], now: u64) -> Result<(), KeelError> {
        self.transact(|w| {
            w.sync(now, true);
            let view = CapacityView {
                ledger: &w.state.ledger,
                book: &w.state.allocations,
                grid: w.grid,
                global_capacity_ratio: w.state.global_capacity_ratio,
            };
            w.state.products.recalculate_effective_weights(products, &view)?;
            Ok(())
        })
    }

    // --- governance ---

    /// Change the manager fee. Existing fee shares in active tranches are
    /// re-split at the new rate. Manager only.
    pub fn set_pool_fee(&mut self, caller: AccountId, fee: u8, now: u64) -> Result<(), KeelError> {
        self.transact(|w| {
            w.ensure_manager(&caller)?;
            let max = w.config.max_pool_fee;
            if fee > max {
                return Err(LedgerError::PoolFeeExceedsMax { fee, max }.into());
            }
            w.sync(now, true);

            let from = w.state.pool_fee;
            resplit_fee_shares(&mut w.state.ledger, w.grid, fee);
            w.state.pool_fee = fee;
            info!(pool_id = w.pool_id, from, to = fee, "pool fee changed");
            w.events.push(PoolEvent::PoolFeeChanged { from, to: fee });
            Ok(())
        })
    }

    pub fn set_paused(&mut self, paused: bool) {
        if self.state.paused == paused {
            return;
        }
        self.state.paused = paused;
        info!(pool_id = self.id, paused, "pause state changed");
        self.events.push(PoolEvent::PausedChanged { paused });
    }

    pub fn set_global_capacity_ratio(&mut self, ratio: u64) {
        debug!(pool_id = self.id, ratio, "global capacity ratio changed");
        self.state.global_capacity_ratio = ratio;
    }

    // --- reads ---

    pub fn id(&self) -> PoolId {
        self.id
    }

    pub fn manager(&self) -> AccountId {
        self.manager
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn grid(&self) -> &TimeGrid {
        &self.grid
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut R {
        &mut self.registry
    }

    /// Ledger as of the last committed call.
    pub fn ledger(&self) -> &LedgerState {
        &self.state.ledger
    }

    pub fn products(&self) -> &ProductBook {
        &self.state.products
    }

    pub fn allocations(&self) -> &AllocationBook {
        &self.state.allocations
    }

    pub fn pool_fee(&self) -> u8 {
        self.state.pool_fee
    }

    pub fn global_capacity_ratio(&self) -> u64 {
        self.state.global_capacity_ratio
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused
    }

    pub fn is_halted(&self) -> bool {
        self.state.halted
    }

    pub fn active_stake(&self) -> u128 {
        self.state.ledger.active_stake()
    }

    pub fn stake_shares_supply(&self) -> u128 {
        self.state.ledger.stake_shares_supply()
    }

    pub fn rewards_shares_supply(&self) -> u128 {
        self.state.ledger.rewards_shares_supply()
    }

    pub fn reward_per_second(&self) -> u128 {
        self.state.ledger.reward_per_second()
    }

    pub fn tranche(&self, id: TrancheId) -> Tranche {
        self.state.ledger.tranche(id)
    }

    pub fn expired_tranche(&self, id: TrancheId) -> Option<&ExpiredTranche> {
        self.state.ledger.expired_tranche(id)
    }

    pub fn deposit(&self, position: PositionId, tranche: TrancheId) -> Deposit {
        self.state.ledger.deposit(position, tranche)
    }

    pub fn product(&self, id: ProductId) -> Option<&StakedProduct> {
        self.state.products.product(id)
    }

    pub fn allocation(&self, id: AllocationId) -> Option<&CoverAllocation> {
        self.state.allocations.allocation(id)
    }

    /// Live allocations for a product.
    pub fn active_allocations(&self, product: ProductId) -> impl Iterator<Item = &CoverAllocation> {
        self.state.allocations.allocations().filter(move |a| a.product_id == product)
    }

    /// The ledger as it would be after expiring everything up to `now`.
    fn ledger_at(&self, now: u64) -> LedgerState {
        advance(self.state.ledger.clone(), &self.grid, now, true).state
    }

    /// Accumulator value at `now`, including boundaries not yet processed.
    pub fn acc_reward_per_share(&self, now: u64) -> u128 {
        if is_due(&self.state.ledger, &self.grid, now) {
            self.ledger_at(now).acc_reward_per_share()
        } else {
            projected_acc_reward_per_share(&self.state.ledger, now)
        }
    }

    /// Rewards `position` could withdraw from `tranche` at `now`.
    pub fn realizable_rewards(&self, position: PositionId, tranche: TrancheId, now: u64) -> u128 {
        realizable_rewards(&self.ledger_at(now), position, tranche)
    }

    /// Capacity of each active tranche at the product's target weight, in
    /// allocation units, before existing allocations.
    pub fn tranche_capacities(&self, product: ProductId, now: u64) -> Result<Vec<(TrancheId, u128)>, AllocationError> {
        let staked = self.state.products.product(product).ok_or(AllocationError::ProductNotStaked(product))?;
        let reduction = self.state.products.info(product).map_or(0, |i| i.capacity_reduction_ratio);
        let ledger = self.ledger_at(now);
        let view = CapacityView {
            ledger: &ledger,
            book: &self.state.allocations,
            grid: &self.grid,
            global_capacity_ratio: self.state.global_capacity_ratio,
        };
        Ok(view.tranche_capacities(staked.target_weight as u64, reduction))
    }

    /// Capacity of the active tranches at full weight, in allocation units.
    pub fn total_capacity(&self, product: ProductId, now: u64) -> Result<u128, AllocationError> {
        let info = self.state.products.info(product).ok_or(AllocationError::ProductNotFound(product))?;
        let ledger = self.ledger_at(now);
        let view = CapacityView {
            ledger: &ledger,
            book: &self.state.allocations,
            grid: &self.grid,
            global_capacity_ratio: self.state.global_capacity_ratio,
        };
        Ok(view.total_capacity(product, info.capacity_reduction_ratio))
    }

    /// Drain the events committed since the last call.
    pub fn take_events(&mut self) -> Vec<PoolEvent> {
        mem::take(&mut self.events)
    }
}
