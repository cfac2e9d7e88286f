//! Product catalog and per-pool product state.
//!
//! The catalog ([`ProductInfo`]) is registered by governance and shared by
//! every pool. A pool opts into a product through [`ProductBook::set_products`],
//! which creates its [`StakedProduct`] with a target weight and target price.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use keel_core::constants::{GLOBAL_MIN_PRICE, PRICE_DENOMINATOR, WEIGHT_DENOMINATOR};
use keel_core::error::ProductError;
use keel_core::traits::CapacitySource;
use keel_core::types::ProductId;

use crate::capacity::effective_weight;
use crate::premium::PremiumQuote;

/// Catalog entry for a coverable product.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProductInfo {
    /// Bumped price a pool starts from when it first stakes on the product.
    pub initial_price: u64,
    /// Lowest target price a pool may set. `0` falls back to [`GLOBAL_MIN_PRICE`].
    pub min_price: u64,
    /// Capacity discount, over `CAPACITY_REDUCTION_DENOMINATOR`.
    pub capacity_reduction_ratio: u64,
    /// Charge the target price with no bump and no surge.
    pub use_fixed_price: bool,
    /// Deprecated products accept no new allocations.
    pub is_deprecated: bool,
}

impl ProductInfo {
    pub fn effective_min_price(&self) -> u64 {
        if self.min_price == 0 { GLOBAL_MIN_PRICE } else { self.min_price }
    }
}

impl Default for ProductInfo {
    fn default() -> Self {
        Self {
            initial_price: GLOBAL_MIN_PRICE,
            min_price: 0,
            capacity_reduction_ratio: 0,
            use_fixed_price: false,
            is_deprecated: false,
        }
    }
}

/// A pool's pricing and weighting state for one product.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StakedProduct {
    pub last_effective_weight: u16,
    pub target_weight: u8,
    pub target_price: u64,
    pub bumped_price: u64,
    pub bumped_price_update_time: u64,
}

impl StakedProduct {
    /// Store the post-purchase bumped price from `quote`.
    pub fn apply_quote(&mut self, quote: &PremiumQuote, now: u64) {
        self.bumped_price = quote.bumped_price;
        self.bumped_price_update_time = now;
    }
}

/// One entry of a `set_products` call.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProductParams {
    pub product_id: ProductId,
    pub recalculate_effective_weight: bool,
    pub set_target_weight: bool,
    pub target_weight: u8,
    pub set_target_price: bool,
    pub target_price: u64,
}

impl ProductParams {
    /// Params that set both target weight and price, as a new product requires.
    pub fn new(product_id: ProductId, target_weight: u8, target_price: u64) -> Self {
        Self {
            product_id,
            recalculate_effective_weight: true,
            set_target_weight: true,
            target_weight,
            set_target_price: true,
            target_price,
        }
    }
}

/// Catalog plus the products one pool stakes on.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ProductBook {
    catalog: BTreeMap<ProductId, ProductInfo>,
    products: BTreeMap<ProductId, StakedProduct>,
}

impl ProductBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a catalog entry.
    pub fn register_product(&mut self, id: ProductId, info: ProductInfo) {
        debug!(product_id = id, initial_price = info.initial_price, "product registered");
        self.catalog.insert(id, info);
    }

    pub fn info(&self, id: ProductId) -> Option<&ProductInfo> {
        self.catalog.get(&id)
    }

    pub fn product(&self, id: ProductId) -> Option<&StakedProduct> {
        self.products.get(&id)
    }

    pub fn product_mut(&mut self, id: ProductId) -> Option<&mut StakedProduct> {
        self.products.get_mut(&id)
    }

    pub fn products(&self) -> impl Iterator<Item = (ProductId, &StakedProduct)> {
        self.products.iter().map(|(id, p)| (*id, p))
    }

    pub fn total_effective_weight(&self) -> u32 {
        self.products.values().map(|p| p.last_effective_weight as u32).sum()
    }

    /// Apply `params` in order. Either every entry applies or none does.
    ///
    /// Fails with [`ProductError::TotalEffectiveWeightExceeded`] when some
    /// target weight was raised and the resulting total effective weight is
    /// above `max_total_weight`. Lowering weights is always allowed.
    pub fn set_products(
        &mut self,
        params: &[ProductParams],
        capacity: &dyn CapacitySource,
        max_total_weight: u32,
        now: u64,
    ) -> Result<(), ProductError> {
        let mut next = self.clone();
        let mut weight_raised = false;

        for p in params {
            let info = *next
                .catalog
                .get(&p.product_id)
                .ok_or(ProductError::ProductNotFound(p.product_id))?;

            let product = match next.products.get(&p.product_id) {
                Some(existing) => *existing,
                None => {
                    if !(p.set_target_weight && p.set_target_price) {
                        return Err(ProductError::MustSetValuesForNewProducts(p.product_id));
                    }
                    StakedProduct {
                        bumped_price: info.initial_price,
                        bumped_price_update_time: now,
                        ..StakedProduct::default()
                    }
                }
            };
            let mut product = product;

            if p.set_target_price {
                if p.target_price > PRICE_DENOMINATOR {
                    return Err(ProductError::TargetPriceTooHigh(p.target_price));
                }
                let min = info.effective_min_price();
                if p.target_price < min {
                    return Err(ProductError::TargetPriceBelowMin { price: p.target_price, min });
                }
                product.target_price = p.target_price;
            }

            if p.set_target_weight {
                if p.target_weight as u64 > WEIGHT_DENOMINATOR {
                    return Err(ProductError::TargetWeightTooHigh(p.target_weight));
                }
                weight_raised |= p.target_weight > product.target_weight;
                product.target_weight = p.target_weight;
            }

            if p.set_target_weight || p.recalculate_effective_weight {
                product.last_effective_weight =
                    compute_effective_weight(p.product_id, &product, &info, capacity);
            }

            debug!(
                product_id = p.product_id,
                target_weight = product.target_weight,
                target_price = product.target_price,
                effective_weight = product.last_effective_weight,
                "product updated"
            );
            next.products.insert(p.product_id, product);
        }

        if weight_raised {
            let total = next.total_effective_weight();
            if total > max_total_weight {
                return Err(ProductError::TotalEffectiveWeightExceeded { total, max: max_total_weight });
            }
        }

        *self = next;
        Ok(())
    }

    /// Recompute the stored effective weight of each listed product.
    pub fn recalculate_effective_weights(
        &mut self,
        product_ids: &[ProductId],
        capacity: &dyn CapacitySource,
    ) -> Result<(), ProductError> {
        if let Some(missing) = product_ids.iter().find(|id| !self.products.contains_key(id)) {
            return Err(ProductError::ProductNotFound(*missing));
        }
        for id in product_ids {
            self.refresh_effective_weight(*id, capacity);
        }
        Ok(())
    }

    /// Recompute and store one product's effective weight. `None` if the
    /// pool does not stake on it.
    pub fn refresh_effective_weight(
        &mut self,
        id: ProductId,
        capacity: &dyn CapacitySource,
    ) -> Option<u16> {
        let info = self.catalog.get(&id).copied().unwrap_or_default();
        let product = self.products.get_mut(&id)?;
        product.last_effective_weight = compute_effective_weight(id, product, &info, capacity);
        Some(product.last_effective_weight)
    }
}

fn compute_effective_weight(
    id: ProductId,
    product: &StakedProduct,
    info: &ProductInfo,
    capacity: &dyn CapacitySource,
) -> u16 {
    let weight = effective_weight(
        product.target_weight,
        capacity.total_allocation(id),
        capacity.total_capacity(id, info.capacity_reduction_ratio),
    );
    if weight == u16::MAX {
        warn!(product_id = id, "effective weight saturated");
    }
    weight
}
