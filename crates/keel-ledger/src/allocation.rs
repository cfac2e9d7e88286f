//! Cover allocations: capacity fill, pricing, reward streams, expiry.
//!
//! An allocation reserves allocation units in the tranches that outlive
//! the cover (plus its grace period), filling the earliest usable tranche
//! first. Each tranche offers its capacity at the product's target weight,
//! minus what earlier covers already hold there.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use keel_core::config::PricingConfig;
use keel_core::constants::{MAX_COVER_PERIOD, MIN_COVER_PERIOD, REWARDS_DENOMINATOR};
use keel_core::error::AllocationError;
use keel_core::math::mul_div;
use keel_core::time::TimeGrid;
use keel_core::traits::CapacitySource;
use keel_core::types::{AllocationId, ProductId, TrancheId};
use keel_pricing::capacity::{self, CapacityParams};
use keel_pricing::premium::{amount_to_units, fixed_price_premium, quote};
use keel_pricing::products::ProductBook;

use crate::queue::{ExpiryQueue, SlotId};
use crate::rewards::{start_stream, stop_stream, RewardStream};
use crate::state::LedgerState;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CoverAllocation {
    pub id: AllocationId,
    pub product_id: ProductId,
    pub start: u64,
    pub period: u64,
    /// Bucket boundary at or after `start + period`; capacity frees up here.
    pub expires_at: u64,
    /// Units held per tranche, oldest tranche first.
    pub tranche_units: Vec<(TrancheId, u128)>,
    pub premium: u128,
    pub stream: RewardStream,
    slot: SlotId,
}

impl CoverAllocation {
    pub fn units(&self) -> u128 {
        self.tranche_units.iter().map(|(_, u)| *u).sum()
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AllocationRequest {
    pub product_id: ProductId,
    /// Cover amount in token base units.
    pub amount: u128,
    pub period: u64,
    pub grace_period: u64,
    /// Allocation replaced by this one (cover edit).
    pub previous_allocation: Option<AllocationId>,
    /// Reject if the premium comes out higher.
    pub max_premium: Option<u128>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocationReceipt {
    pub allocation_id: AllocationId,
    pub premium: u128,
    /// Rewards streamed to stakers for this cover.
    pub rewards: u128,
    pub effective_weight: u16,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeallocationReceipt {
    pub allocation_id: AllocationId,
    pub units: u128,
    pub unstreamed_rewards: u128,
}

/// Identifies the cover a burn pays out on and how much of it to release.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct BurnStakeParams {
    pub allocation_id: AllocationId,
    /// Cover amount to release, in token base units.
    pub deallocation_amount: u128,
}

/// Pool parameters an allocation reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocationTerms {
    pub global_capacity_ratio: u64,
    pub rewards_ratio: u64,
    pub pricing: PricingConfig,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct AllocationBook {
    allocations: BTreeMap<AllocationId, CoverAllocation>,
    queue: ExpiryQueue<AllocationId>,
    tranche_allocations: BTreeMap<(ProductId, TrancheId), u128>,
    last_id: u64,
}

impl AllocationBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocation(&self, id: AllocationId) -> Option<&CoverAllocation> {
        self.allocations.get(&id)
    }

    pub fn allocations(&self) -> impl Iterator<Item = &CoverAllocation> {
        self.allocations.values()
    }

    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    /// Whether `id` was handed out by this book, whether or not it is still live.
    pub fn was_issued(&self, id: AllocationId) -> bool {
        id.0 != 0 && id.0 <= self.last_id
    }

    pub fn tranche_allocation(&self, product: ProductId, tranche: TrancheId) -> u128 {
        self.tranche_allocations.get(&(product, tranche)).copied().unwrap_or(0)
    }

    /// Units allocated to `product` in tranches from `first_tranche` on.
    pub fn total_allocation(&self, product: ProductId, first_tranche: TrancheId) -> u128 {
        self.tranche_allocations
            .range((product, first_tranche)..=(product, TrancheId::MAX))
            .map(|(_, units)| *units)
            .sum()
    }

    fn add_units(&mut self, product: ProductId, tranche: TrancheId, units: u128) {
        *self.tranche_allocations.entry((product, tranche)).or_default() += units;
    }

    fn sub_units(&mut self, product: ProductId, tranche: TrancheId, units: u128) {
        if let Some(held) = self.tranche_allocations.get_mut(&(product, tranche)) {
            *held = held.saturating_sub(units);
            if *held == 0 {
                self.tranche_allocations.remove(&(product, tranche));
            }
        }
    }

    fn insert(
        &mut self,
        product_id: ProductId,
        start: u64,
        period: u64,
        expires_at: u64,
        tranche_units: Vec<(TrancheId, u128)>,
        premium: u128,
        stream: RewardStream,
    ) -> Result<AllocationId, AllocationError> {
        let id = AllocationId(self.last_id + 1);
        let hint = self.queue.position_for(expires_at);
        let slot = self.queue.insert_after(hint, expires_at, id)?;
        self.last_id = id.0;
        for (tranche, units) in &tranche_units {
            self.add_units(product_id, *tranche, *units);
        }
        self.allocations.insert(
            id,
            CoverAllocation { id, product_id, start, period, expires_at, tranche_units, premium, stream, slot },
        );
        Ok(id)
    }

    /// Drop an allocation and release its units.
    pub(crate) fn remove(&mut self, id: AllocationId) -> Result<CoverAllocation, AllocationError> {
        let allocation = self.allocations.remove(&id).ok_or(AllocationError::AllocationNotFound(id.0))?;
        if self.queue.get(allocation.slot).is_some_and(|(_, held)| *held == id) {
            self.queue.remove(allocation.slot).ok();
        }
        for (tranche, units) in &allocation.tranche_units {
            self.sub_units(allocation.product_id, *tranche, *units);
        }
        Ok(allocation)
    }

    /// Remove covers whose expiry is at or before `now`.
    pub(crate) fn expire_due(&mut self, now: u64) -> Vec<CoverAllocation> {
        let due = self.queue.pop_due(now);
        let mut expired = Vec::with_capacity(due.len());
        for (_, id) in due {
            if let Some(allocation) = self.allocations.remove(&id) {
                for (tranche, units) in &allocation.tranche_units {
                    self.sub_units(allocation.product_id, *tranche, *units);
                }
                expired.push(allocation);
            }
        }
        expired
    }

    /// Release up to `units` from an allocation, spread over its tranches
    /// in proportion to what each holds. Returns the units released.
    pub(crate) fn reduce(&mut self, id: AllocationId, units: u128) -> Result<u128, AllocationError> {
        let allocation = self.allocations.get(&id).ok_or(AllocationError::AllocationNotFound(id.0))?;
        let total = allocation.units();
        let target = units.min(total);
        if target == 0 {
            return Ok(0);
        }

        let mut cuts: Vec<u128> = allocation
            .tranche_units
            .iter()
            .map(|(_, held)| mul_div(*held, target, total).unwrap_or(0))
            .collect();
        let mut leftover = target - cuts.iter().sum::<u128>();
        for (cut, (_, held)) in cuts.iter_mut().zip(&allocation.tranche_units) {
            if leftover == 0 {
                break;
            }
            let extra = leftover.min(held - *cut);
            *cut += extra;
            leftover -= extra;
        }

        let product = allocation.product_id;
        let tranches: Vec<TrancheId> = allocation.tranche_units.iter().map(|(t, _)| *t).collect();
        for (tranche, cut) in tranches.iter().zip(&cuts) {
            self.sub_units(product, *tranche, *cut);
        }
        if let Some(allocation) = self.allocations.get_mut(&id) {
            for ((_, held), cut) in allocation.tranche_units.iter_mut().zip(&cuts) {
                *held -= cut;
            }
            allocation.tranche_units.retain(|(_, held)| *held > 0);
        }
        Ok(target)
    }
}

/// Capacity reads over a ledger and allocation book.
pub struct CapacityView<'a> {
    pub ledger: &'a LedgerState,
    pub book: &'a AllocationBook,
    pub grid: &'a TimeGrid,
    pub global_capacity_ratio: u64,
}

impl CapacityView<'_> {
    /// Capacity of each active tranche for a product at `weight`.
    pub fn tranche_capacities(&self, weight: u64, capacity_reduction_ratio: u64) -> Vec<(TrancheId, u128)> {
        let params = CapacityParams {
            global_capacity_ratio: self.global_capacity_ratio,
            capacity_reduction_ratio,
        };
        self.ledger
            .active_tranche_ids(self.grid)
            .map(|t| {
                let cap = capacity::tranche_capacity(
                    self.ledger.tranche(t).stake_shares,
                    self.ledger.active_stake(),
                    self.ledger.stake_shares_supply(),
                    weight,
                    &params,
                );
                (t, cap)
            })
            .collect()
    }
}

impl CapacitySource for CapacityView<'_> {
    fn total_capacity(&self, _product: ProductId, capacity_reduction_ratio: u64) -> u128 {
        let params = CapacityParams {
            global_capacity_ratio: self.global_capacity_ratio,
            capacity_reduction_ratio,
        };
        capacity::total_capacity(self.ledger.active_stake(), &params)
    }

    fn total_allocation(&self, product: ProductId) -> u128 {
        self.book.total_allocation(product, self.ledger.first_active_tranche_id())
    }
}

/// Reject malformed requests before touching any state.
pub fn validate_request(request: &AllocationRequest, products: &ProductBook) -> Result<(), AllocationError> {
    if request.amount == 0 {
        return Err(AllocationError::ZeroCoverAmount);
    }
    if !(MIN_COVER_PERIOD..=MAX_COVER_PERIOD).contains(&request.period) {
        return Err(AllocationError::InvalidCoverPeriod(request.period));
    }
    let info = products
        .info(request.product_id)
        .ok_or(AllocationError::ProductNotFound(request.product_id))?;
    if info.is_deprecated {
        return Err(AllocationError::ProductDeprecated(request.product_id));
    }
    if products.product(request.product_id).is_none() {
        return Err(AllocationError::ProductNotStaked(request.product_id));
    }
    Ok(())
}

/// Fill, price and record a new allocation. The ledger must be advanced to
/// `now` with expired covers already removed.
pub fn allocate(
    ledger: &mut LedgerState,
    products: &mut ProductBook,
    book: &mut AllocationBook,
    grid: &TimeGrid,
    terms: &AllocationTerms,
    request: &AllocationRequest,
    now: u64,
) -> Result<AllocationReceipt, AllocationError> {
    validate_request(request, products)?;
    let product_id = request.product_id;
    let info = *products.info(product_id).ok_or(AllocationError::ProductNotFound(product_id))?;
    let product = *products.product(product_id).ok_or(AllocationError::ProductNotStaked(product_id))?;

    let units = amount_to_units(request.amount);
    let cover_end = now.saturating_add(request.period);
    let first_usable = grid.tranche_of(cover_end.saturating_add(request.grace_period));

    let view = CapacityView { ledger: &*ledger, book: &*book, grid, global_capacity_ratio: terms.global_capacity_ratio };
    let usable: Vec<(TrancheId, u128, u128)> = view
        .tranche_capacities(product.target_weight as u64, info.capacity_reduction_ratio)
        .into_iter()
        .filter(|(t, _)| *t >= first_usable)
        .map(|(t, cap)| (t, cap, book.tranche_allocation(product_id, t)))
        .collect();

    let total_capacity: u128 = usable.iter().map(|(_, cap, _)| *cap).sum();
    let initial_used: u128 = usable.iter().map(|(_, _, used)| *used).sum();
    let available: u128 = usable.iter().map(|(_, cap, used)| capacity::available(*cap, *used)).sum();
    if units > available {
        return Err(AllocationError::InsufficientCapacity { requested: units, available });
    }

    let mut remaining = units;
    let mut tranche_units = Vec::new();
    for (t, cap, used) in &usable {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(capacity::available(*cap, *used));
        if take > 0 {
            tranche_units.push((*t, take));
            remaining -= take;
        }
    }

    let premium = if info.use_fixed_price {
        fixed_price_premium(units, request.period, product.target_price).ok_or(AllocationError::ArithmeticOverflow)?
    } else {
        let q = quote(&product, request.period, units, initial_used, total_capacity, now, &terms.pricing)
            .ok_or(AllocationError::ArithmeticOverflow)?;
        if let Some(p) = products.product_mut(product_id) {
            p.apply_quote(&q, now);
        }
        q.premium
    };
    if let Some(max) = request.max_premium.filter(|max| premium > *max) {
        return Err(AllocationError::PriceSlippageExceeded { premium, max });
    }

    let rewards = mul_div(premium, terms.rewards_ratio as u128, REWARDS_DENOMINATOR as u128)
        .ok_or(AllocationError::ArithmeticOverflow)?;
    let stream = start_stream(ledger, grid, rewards, cover_end, now);
    let expires_at = grid.bucket_start(stream.end_bucket);
    let allocation_id = book.insert(product_id, now, request.period, expires_at, tranche_units, premium, stream)?;

    let view = CapacityView { ledger: &*ledger, book: &*book, grid, global_capacity_ratio: terms.global_capacity_ratio };
    let effective_weight = products
        .refresh_effective_weight(product_id, &view)
        .ok_or(AllocationError::ProductNotStaked(product_id))?;

    Ok(AllocationReceipt {
        allocation_id,
        premium,
        rewards: stream.remaining(grid, now),
        effective_weight,
    })
}

/// Remove an allocation early, stopping its reward stream.
pub fn deallocate(
    ledger: &mut LedgerState,
    book: &mut AllocationBook,
    grid: &TimeGrid,
    id: AllocationId,
    now: u64,
) -> Result<(CoverAllocation, DeallocationReceipt), AllocationError> {
    let allocation = book.remove(id)?;
    let unstreamed_rewards = stop_stream(ledger, grid, &allocation.stream, now);
    let receipt = DeallocationReceipt { allocation_id: id, units: allocation.units(), unstreamed_rewards };
    Ok((allocation, receipt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::constants::{DEFAULT_GLOBAL_CAPACITY_RATIO, DEFAULT_REWARDS_RATIO, ONE_DAY, ONE_TOKEN};
    use keel_core::types::PositionId;
    use keel_pricing::products::{ProductInfo, ProductParams};

    use crate::deposit::{apply_deposit, plan_deposit, DepositTerms};

    const PRODUCT: ProductId = 1;

    fn terms() -> AllocationTerms {
        AllocationTerms {
            global_capacity_ratio: DEFAULT_GLOBAL_CAPACITY_RATIO,
            rewards_ratio: DEFAULT_REWARDS_RATIO,
            pricing: PricingConfig::default(),
        }
    }

    struct Fixture {
        grid: TimeGrid,
        ledger: LedgerState,
        products: ProductBook,
        book: AllocationBook,
    }

    impl Fixture {
        /// 1000 tokens in the last active tranche, product at `weight`.
        fn new(weight: u8, info: ProductInfo) -> Self {
            let grid = TimeGrid::default();
            let mut ledger = LedgerState::new(&grid, 0);
            let deposit_terms = DepositTerms { pool_fee: 0, reward_bonus_per_tranche: 0 };
            let plan = plan_deposit(&ledger, &grid, 1_000 * ONE_TOKEN, 7, &deposit_terms).unwrap();
            apply_deposit(&mut ledger, PositionId(1), &plan);

            let mut products = ProductBook::new();
            products.register_product(PRODUCT, info);
            let book = AllocationBook::new();
            let view = CapacityView { ledger: &ledger, book: &book, grid: &grid, global_capacity_ratio: terms().global_capacity_ratio };
            products.set_products(&[ProductParams::new(PRODUCT, weight, 200)], &view, 2_000, 0).unwrap();
            Self { grid, ledger, products, book }
        }

        fn allocate(&mut self, request: &AllocationRequest, now: u64) -> Result<AllocationReceipt, AllocationError> {
            allocate(&mut self.ledger, &mut self.products, &mut self.book, &self.grid, &terms(), request, now)
        }
    }

    fn request(amount: u128) -> AllocationRequest {
        AllocationRequest { product_id: PRODUCT, amount, period: 30 * ONE_DAY, ..AllocationRequest::default() }
    }

    #[test]
    fn fills_and_records_allocation() {
        let mut f = Fixture::new(50, ProductInfo { initial_price: 200, ..ProductInfo::default() });
        let receipt = f.allocate(&request(100 * ONE_TOKEN), 0).unwrap();

        let alloc = f.book.allocation(receipt.allocation_id).unwrap();
        assert_eq!(alloc.tranche_units, vec![(7, 10_000)]);
        assert_eq!(alloc.expires_at, f.grid.bucket_start(2));
        assert_eq!(f.book.total_allocation(PRODUCT, 0), 10_000);
        // 10_000 of 200_000 units → 5%, below target weight
        assert_eq!(receipt.effective_weight, 50);
        assert!(receipt.premium > 0);
        assert!(receipt.rewards <= receipt.premium / 2);
        assert_eq!(f.book.queue.peek().map(|(_, at, _)| at), Some(alloc.expires_at));
    }

    #[test]
    fn capacity_limited_by_target_weight() {
        let mut f = Fixture::new(10, ProductInfo::default());
        // 1000 tokens * 2 * 10% = 200 tokens of capacity
        let err = f.allocate(&request(201 * ONE_TOKEN), 0).unwrap_err();
        assert_eq!(err, AllocationError::InsufficientCapacity { requested: 20_100, available: 20_000 });
        assert!(f.allocate(&request(200 * ONE_TOKEN), 0).is_ok());
        assert!(matches!(f.allocate(&request(1), 0), Err(AllocationError::InsufficientCapacity { .. })));
    }

    #[test]
    fn receipt_weight_is_the_stored_weight() {
        let mut f = Fixture::new(10, ProductInfo::default());
        let receipt = f.allocate(&request(200 * ONE_TOKEN), 0).unwrap();
        let stored = f.products.product(PRODUCT).unwrap().last_effective_weight;
        assert_eq!(receipt.effective_weight, stored);
        assert_eq!(stored, 10);
    }

    #[test]
    fn tranches_ending_before_cover_are_skipped() {
        let mut f = Fixture::new(100, ProductInfo::default());
        let long = AllocationRequest { period: 365 * ONE_DAY, grace_period: 8 * 91 * ONE_DAY, ..request(ONE_TOKEN) };
        assert_eq!(
            f.allocate(&long, 0),
            Err(AllocationError::InsufficientCapacity { requested: 100, available: 0 })
        );
    }

    #[test]
    fn bumped_price_moves_on_allocation() {
        let mut f = Fixture::new(100, ProductInfo { initial_price: 500, ..ProductInfo::default() });
        f.allocate(&request(1_000 * ONE_TOKEN), 0).unwrap();
        let p = f.products.product(PRODUCT).unwrap();
        // half the capacity → half the bump ratio
        assert_eq!(p.bumped_price, 500 + 1_000);
    }

    #[test]
    fn fixed_price_product_keeps_price() {
        let mut f = Fixture::new(100, ProductInfo { initial_price: 500, use_fixed_price: true, ..ProductInfo::default() });
        let receipt = f.allocate(&AllocationRequest { period: 365 * ONE_DAY, ..request(100 * ONE_TOKEN) }, 0).unwrap();
        // 100 tokens at the 2% target price for a year
        assert_eq!(receipt.premium, 2 * ONE_TOKEN);
        assert_eq!(f.products.product(PRODUCT).unwrap().bumped_price, 500);
    }

    #[test]
    fn slippage_guard() {
        let mut f = Fixture::new(100, ProductInfo::default());
        let err = f.allocate(&AllocationRequest { max_premium: Some(1), ..request(100 * ONE_TOKEN) }, 0).unwrap_err();
        assert!(matches!(err, AllocationError::PriceSlippageExceeded { max: 1, .. }));
    }

    #[test]
    fn request_validation() {
        let mut f = Fixture::new(100, ProductInfo::default());
        assert_eq!(f.allocate(&request(0), 0), Err(AllocationError::ZeroCoverAmount));
        assert_eq!(
            f.allocate(&AllocationRequest { period: ONE_DAY, ..request(1) }, 0),
            Err(AllocationError::InvalidCoverPeriod(ONE_DAY))
        );
        assert_eq!(
            f.allocate(&AllocationRequest { product_id: 9, ..request(1) }, 0),
            Err(AllocationError::ProductNotFound(9))
        );
        f.products.register_product(2, ProductInfo::default());
        assert_eq!(
            f.allocate(&AllocationRequest { product_id: 2, ..request(1) }, 0),
            Err(AllocationError::ProductNotStaked(2))
        );
        f.products.register_product(PRODUCT, ProductInfo { is_deprecated: true, ..ProductInfo::default() });
        assert_eq!(f.allocate(&request(1), 0), Err(AllocationError::ProductDeprecated(PRODUCT)));
    }

    #[test]
    fn deallocate_releases_units_and_stream() {
        let mut f = Fixture::new(100, ProductInfo::default());
        let receipt = f.allocate(&request(100 * ONE_TOKEN), 0).unwrap();
        assert!(f.ledger.reward_per_second() > 0);

        let (_, out) = deallocate(&mut f.ledger, &mut f.book, &f.grid, receipt.allocation_id, 0).unwrap();
        assert_eq!(out.units, 10_000);
        assert_eq!(out.unstreamed_rewards, receipt.rewards);
        assert_eq!(f.ledger.reward_per_second(), 0);
        assert!(f.book.is_empty());
        assert_eq!(f.book.total_allocation(PRODUCT, 0), 0);
        assert_eq!(
            deallocate(&mut f.ledger, &mut f.book, &f.grid, receipt.allocation_id, 0).unwrap_err(),
            AllocationError::AllocationNotFound(receipt.allocation_id.0)
        );
    }

    #[test]
    fn expiry_frees_capacity() {
        let mut f = Fixture::new(100, ProductInfo::default());
        let a = f.allocate(&request(100 * ONE_TOKEN), 0).unwrap();
        let expires_at = f.book.allocation(a.allocation_id).unwrap().expires_at;
        assert!(f.book.expire_due(expires_at - 1).is_empty());
        let expired = f.book.expire_due(expires_at);
        assert_eq!(expired.len(), 1);
        assert_eq!(f.book.total_allocation(PRODUCT, 0), 0);
    }

    #[test]
    fn reduce_spreads_proportionally() {
        let mut book = AllocationBook::new();
        let id = book.insert(PRODUCT, 0, 0, 10, vec![(1, 30), (2, 70)], 0, RewardStream::default()).unwrap();
        assert_eq!(book.reduce(id, 10).unwrap(), 10);
        assert_eq!(book.allocation(id).unwrap().tranche_units, vec![(1, 27), (2, 63)]);
        assert_eq!(book.tranche_allocation(PRODUCT, 1), 27);

        // rounding leftovers go to the earliest tranche
        assert_eq!(book.reduce(id, 1).unwrap(), 1);
        assert_eq!(book.allocation(id).unwrap().units(), 89);

        assert_eq!(book.reduce(id, 1_000).unwrap(), 89);
        assert!(book.allocation(id).unwrap().tranche_units.is_empty());
        assert_eq!(book.total_allocation(PRODUCT, 0), 0);
    }

    #[test]
    fn issued_ids_outlive_expiry() {
        let mut book = AllocationBook::new();
        assert!(!book.was_issued(AllocationId(1)));
        let id = book.insert(PRODUCT, 0, 0, 10, vec![(1, 30)], 0, RewardStream::default()).unwrap();
        assert_eq!(book.expire_due(10).len(), 1);
        assert!(book.allocation(id).is_none());
        assert!(book.was_issued(id));
        assert!(!book.was_issued(AllocationId(0)));
        assert!(!book.was_issued(AllocationId(2)));
    }
}
