//! Shared builders for the integration tests.

use tracing_subscriber::EnvFilter;

use keel_core::config::PoolConfig;
use keel_core::constants::ONE_DAY;
use keel_core::types::{AccountId, ProductId};
use keel_ledger::allocation::AllocationRequest;
use keel_ledger::positions::MemoryPositionRegistry;
use keel_ledger::StakingPool;
use keel_pricing::products::{ProductInfo, ProductParams};

pub type Pool = StakingPool<MemoryPositionRegistry>;

pub const POOL_ID: u32 = 1;
pub const MANAGER: AccountId = AccountId([0xee; 20]);

/// Account from a seed byte.
pub fn account(seed: u8) -> AccountId {
    AccountId([seed; 20])
}

/// Install a test-writer subscriber once; `RUST_LOG` selects the level.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Tranches of 100s, buckets of 30s, 4 active tranches, no manager fee,
/// no tenure bonus. Boundaries interleave unevenly.
pub fn small_config() -> PoolConfig {
    PoolConfig {
        tranche_duration: 100,
        bucket_duration: 30,
        max_active_tranches: 4,
        pool_fee: 0,
        reward_bonus_per_tranche: 0,
        ..PoolConfig::default()
    }
}

/// Empty pool with the in-memory registry, started at `now`.
pub fn pool_with(config: PoolConfig, now: u64) -> Pool {
    init_tracing();
    match StakingPool::new(POOL_ID, MANAGER, config, MemoryPositionRegistry::new(), now) {
        Ok(pool) => pool,
        Err(e) => panic!("test config rejected: {e}"),
    }
}

/// Register `product` and stake on it at `target_weight` and `target_price`.
pub fn add_product(pool: &mut Pool, product: ProductId, info: ProductInfo, target_weight: u8, target_price: u64, now: u64) {
    pool.register_product(product, info);
    if let Err(e) = pool.set_products(MANAGER, &[ProductParams::new(product, target_weight, target_price)], now) {
        panic!("product {product} rejected: {e}");
    }
}

/// A cover request for `amount` over `days`.
pub fn cover(product: ProductId, amount: u128, days: u64) -> AllocationRequest {
    AllocationRequest { product_id: product, amount, period: days * ONE_DAY, ..AllocationRequest::default() }
}
