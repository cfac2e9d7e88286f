//! Error types for the Keel staking pool.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("deposit amount is zero or mints no shares")] InsufficientDepositAmount,
    #[error("tranche {tranche_id} is not yet active (last active: {max_tranche_id})")] RequestedTrancheIsNotYetActive { tranche_id: u64, max_tranche_id: u64 },
    #[error("tranche {tranche_id} is expired (first active: {first_active_tranche_id})")] RequestedTrancheIsExpired { tranche_id: u64, first_active_tranche_id: u64 },
    #[error("new tranche {new} must end after initial tranche {initial}")] NewTrancheEndsBeforeInitialTranche { initial: u64, new: u64 },
    #[error("caller is not the owner of or approved for position {0}")] NotTokenOwnerOrApproved(u64),
    #[error("position {0} does not belong to this pool")] InvalidPositionForPool(u64),
    #[error("caller is not the pool manager")] OnlyManager,
    #[error("pool fee {fee} exceeds max pool fee {max}")] PoolFeeExceedsMax { fee: u8, max: u8 },
    #[error("active stake is depleted while shares are outstanding")] StakeDepleted,
    #[error("pool is halted after a full burn")] PoolHalted,
    #[error("system is paused")] SystemPaused,
    #[error("invariant violated: {0}")] InvariantViolation(String),
    #[error("arithmetic overflow")] ArithmeticOverflow,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    #[error("product {0} is not registered")] ProductNotFound(u32),
    #[error("product {0} is deprecated")] ProductDeprecated(u32),
    #[error("product {0} is not enabled in this pool")] ProductNotStaked(u32),
    #[error("insufficient capacity: requested {requested} units, available {available}")] InsufficientCapacity { requested: u128, available: u128 },
    #[error("premium {premium} exceeds the accepted maximum {max}")] PriceSlippageExceeded { premium: u128, max: u128 },
    #[error("allocation {0} not found")] AllocationNotFound(u64),
    #[error("cover period {0}s is out of range")] InvalidCoverPeriod(u64),
    #[error("cover amount is zero")] ZeroCoverAmount,
    #[error("arithmetic overflow")] ArithmeticOverflow,
    #[error(transparent)] Queue(#[from] QueueError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProductError {
    #[error("product {0} is not registered")] ProductNotFound(u32),
    #[error("new product {0} must set both target weight and target price")] MustSetValuesForNewProducts(u32),
    #[error("target weight {0} exceeds 100")] TargetWeightTooHigh(u8),
    #[error("target price {0} is above the price denominator")] TargetPriceTooHigh(u64),
    #[error("target price {price} is below the minimum {min}")] TargetPriceBelowMin { price: u64, min: u64 },
    #[error("total effective weight {total} exceeds max {max}")] TotalEffectiveWeightExceeded { total: u32, max: u32 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("unknown queue slot: {0}")] UnknownSlot(u32),
    #[error("entry at {at} is out of order with neighbour at {neighbour}")] OutOfOrder { at: u64, neighbour: u64 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid config: {0}")] Invalid(String),
    #[error("config source: {0}")] Source(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        Self::Source(err.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeelError {
    #[error(transparent)] Ledger(#[from] LedgerError),
    #[error(transparent)] Allocation(#[from] AllocationError),
    #[error(transparent)] Product(#[from] ProductError),
    #[error(transparent)] Queue(#[from] QueueError),
    #[error(transparent)] Config(#[from] ConfigError),
}
