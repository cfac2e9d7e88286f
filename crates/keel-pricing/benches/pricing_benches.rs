//! Criterion benchmarks for keel-pricing hot paths.
//!
//! Covers: premium quotes below and past the surge threshold, tranche
//! capacity computation and effective weight.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use keel_core::config::PricingConfig;
use keel_core::constants::{DEFAULT_GLOBAL_CAPACITY_RATIO, ONE_TOKEN, YEAR};
use keel_pricing::capacity::{effective_weight, total_capacity, tranche_capacity, CapacityParams};
use keel_pricing::premium::quote;
use keel_pricing::products::StakedProduct;

fn product() -> StakedProduct {
    StakedProduct {
        target_weight: 50,
        target_price: 200,
        bumped_price: 1_000,
        bumped_price_update_time: 0,
        last_effective_weight: 50,
    }
}

fn bench_quote(c: &mut Criterion) {
    let cfg = PricingConfig::default();
    let prod = product();

    c.bench_function("quote_below_surge", |b| {
        b.iter(|| quote(black_box(&prod), YEAR, black_box(1_000), 0, 1_000_000, 86_400, &cfg))
    });

    c.bench_function("quote_on_surge", |b| {
        b.iter(|| quote(black_box(&prod), YEAR, black_box(50_000), 920_000, 1_000_000, 86_400, &cfg))
    });
}

fn bench_tranche_capacities(c: &mut Criterion) {
    let params = CapacityParams {
        global_capacity_ratio: DEFAULT_GLOBAL_CAPACITY_RATIO,
        capacity_reduction_ratio: 1_000,
    };
    let shares: Vec<u128> = (1..=8).map(|i| i * 1_000_000_000).collect();
    let supply: u128 = shares.iter().sum();
    let active = 5_000_000 * ONE_TOKEN;

    c.bench_function("tranche_capacities_8", |b| {
        b.iter(|| {
            black_box(&shares)
                .iter()
                .map(|&s| tranche_capacity(s, active, supply, 50, &params))
                .collect::<Vec<u128>>()
        })
    });

    c.bench_function("effective_weight", |b| {
        b.iter(|| {
            let total = total_capacity(black_box(active), &params);
            effective_weight(50, black_box(4_000_000), total)
        })
    });
}

criterion_group!(benches, bench_quote, bench_tranche_capacities);
criterion_main!(benches);
