//! Pool configuration.
//!
//! [`PoolConfig`] carries every tunable the ledger and pricing engine read.
//! Defaults come from [`constants`](crate::constants); a deployment can
//! override them from a config file and from `KEEL_`-prefixed environment
//! variables (nested keys use `__`, e.g. `KEEL_PRICING__PRICE_BUMP_RATIO`).

use std::path::Path;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::constants::{
    BUCKET_DURATION, DEFAULT_GLOBAL_CAPACITY_RATIO, DEFAULT_MAX_POOL_FEE,
    DEFAULT_MAX_TOTAL_WEIGHT, DEFAULT_POOL_FEE, DEFAULT_REWARDS_RATIO,
    DEFAULT_REWARD_BONUS_PER_TRANCHE, MAX_ACTIVE_TRANCHES, POOL_FEE_DENOMINATOR,
    PRICE_BUMP_RATIO, PRICE_CHANGE_PER_DAY, REWARDS_DENOMINATOR, SURGE_PRICE_RATIO,
    SURGE_THRESHOLD_DENOMINATOR, SURGE_THRESHOLD_RATIO, TRANCHE_DURATION,
};
use crate::error::ConfigError;
use crate::time::TimeGrid;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "KEEL";

/// Bonding-curve pricing parameters.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct PricingConfig {
    /// Daily decay of the bumped price, over `PRICE_DENOMINATOR`.
    pub price_change_per_day: u64,
    /// Price increase for consuming the full capacity, over `PRICE_DENOMINATOR`.
    pub price_bump_ratio: u64,
    /// Surge multiplier in base units per token.
    pub surge_price_ratio: u64,
    /// Utilization above which surge pricing applies, over `SURGE_THRESHOLD_DENOMINATOR`.
    pub surge_threshold_ratio: u64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            price_change_per_day: PRICE_CHANGE_PER_DAY,
            price_bump_ratio: PRICE_BUMP_RATIO,
            surge_price_ratio: SURGE_PRICE_RATIO,
            surge_threshold_ratio: SURGE_THRESHOLD_RATIO,
        }
    }
}

/// Configuration for a staking pool instance.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct PoolConfig {
    /// Tranche length in seconds.
    pub tranche_duration: u64,
    /// Bucket length in seconds.
    pub bucket_duration: u64,
    /// Number of tranches open for deposits.
    pub max_active_tranches: u64,
    /// Capacity multiplier over active stake, over `GLOBAL_CAPACITY_DENOMINATOR`.
    pub global_capacity_ratio: u64,
    /// Ceiling on the sum of effective weights, over `WEIGHT_DENOMINATOR`.
    pub max_total_weight: u32,
    /// Manager fee in percent.
    pub pool_fee: u8,
    /// Ceiling the manager fee can never be raised above.
    pub max_pool_fee: u8,
    /// Share of premiums streamed to stakers, over `REWARDS_DENOMINATOR`.
    pub rewards_ratio: u64,
    /// Reward-share bonus per tranche of tenure, over `BONUS_DENOMINATOR`.
    pub reward_bonus_per_tranche: u64,
    pub pricing: PricingConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            tranche_duration: TRANCHE_DURATION,
            bucket_duration: BUCKET_DURATION,
            max_active_tranches: MAX_ACTIVE_TRANCHES,
            global_capacity_ratio: DEFAULT_GLOBAL_CAPACITY_RATIO,
            max_total_weight: DEFAULT_MAX_TOTAL_WEIGHT,
            pool_fee: DEFAULT_POOL_FEE,
            max_pool_fee: DEFAULT_MAX_POOL_FEE,
            rewards_ratio: DEFAULT_REWARDS_RATIO,
            reward_bonus_per_tranche: DEFAULT_REWARD_BONUS_PER_TRANCHE,
            pricing: PricingConfig::default(),
        }
    }
}

impl PoolConfig {
    /// Load from an optional file plus `KEEL_*` environment overrides, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(
            path,
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
    }

    /// Load with an explicit environment source.
    pub fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let cfg: Self = builder.add_source(env).build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations the ledger cannot operate under.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tranche_duration == 0 || self.bucket_duration == 0 {
            return Err(ConfigError::Invalid("durations must be non-zero".into()));
        }
        if self.max_active_tranches == 0 {
            return Err(ConfigError::Invalid("max_active_tranches must be non-zero".into()));
        }
        if self.max_pool_fee as u64 >= POOL_FEE_DENOMINATOR {
            return Err(ConfigError::Invalid(format!(
                "max_pool_fee {} must be below {POOL_FEE_DENOMINATOR}",
                self.max_pool_fee
            )));
        }
        if self.pool_fee > self.max_pool_fee {
            return Err(ConfigError::Invalid(format!(
                "pool_fee {} exceeds max_pool_fee {}",
                self.pool_fee, self.max_pool_fee
            )));
        }
        if self.rewards_ratio > REWARDS_DENOMINATOR {
            return Err(ConfigError::Invalid(format!(
                "rewards_ratio {} exceeds {REWARDS_DENOMINATOR}",
                self.rewards_ratio
            )));
        }
        if self.pricing.surge_threshold_ratio > SURGE_THRESHOLD_DENOMINATOR {
            return Err(ConfigError::Invalid(format!(
                "surge_threshold_ratio {} exceeds {SURGE_THRESHOLD_DENOMINATOR}",
                self.pricing.surge_threshold_ratio
            )));
        }
        Ok(())
    }

    pub fn time_grid(&self) -> TimeGrid {
        TimeGrid::new(self.tranche_duration, self.bucket_duration, self.max_active_tranches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env_from(pairs: &[(&str, &str)]) -> Environment {
        let mut map = config::Map::new();
        for (k, v) in pairs {
            map.insert((*k).to_string(), (*v).to_string());
        }
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .source(Some(map))
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = PoolConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.time_grid(), TimeGrid::default());
    }

    #[test]
    fn load_without_sources_gives_defaults() {
        let cfg = PoolConfig::load_with_env(None, env_from(&[])).unwrap();
        assert_eq!(cfg, PoolConfig::default());
    }

    #[test]
    fn env_overrides_top_level_and_nested() {
        let cfg = PoolConfig::load_with_env(
            None,
            env_from(&[("KEEL_POOL_FEE", "15"), ("KEEL_PRICING__PRICE_BUMP_RATIO", "1000")]),
        )
        .unwrap();
        assert_eq!(cfg.pool_fee, 15);
        assert_eq!(cfg.pricing.price_bump_ratio, 1000);
        assert_eq!(cfg.pricing.price_change_per_day, PRICE_CHANGE_PER_DAY);
    }

    #[test]
    fn file_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "global_capacity_ratio = 30000\nmax_pool_fee = 40\n\n[pricing]\nsurge_threshold_ratio = 8000").unwrap();
        let cfg = PoolConfig::load_with_env(Some(file.path()), env_from(&[])).unwrap();
        assert_eq!(cfg.global_capacity_ratio, 30_000);
        assert_eq!(cfg.max_pool_fee, 40);
        assert_eq!(cfg.pricing.surge_threshold_ratio, 8_000);
        assert_eq!(cfg.tranche_duration, TRANCHE_DURATION);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = PoolConfig::load_with_env(Some(Path::new("/nonexistent/keel.toml")), env_from(&[]));
        assert!(matches!(err, Err(ConfigError::Source(_))));
    }

    #[test]
    fn rejects_fee_above_max() {
        let cfg = PoolConfig { pool_fee: 30, max_pool_fee: 20, ..PoolConfig::default() };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_max_fee_of_100() {
        let cfg = PoolConfig { pool_fee: 0, max_pool_fee: 100, ..PoolConfig::default() };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_zero_durations() {
        let cfg = PoolConfig { bucket_duration: 0, ..PoolConfig::default() };
        assert!(cfg.validate().is_err());
        let cfg = PoolConfig { max_active_tranches: 0, ..PoolConfig::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_validation_failure_surfaces() {
        let err = PoolConfig::load_with_env(None, env_from(&[("KEEL_POOL_FEE", "90")]));
        assert!(matches!(err, Err(ConfigError::Invalid(_))));
    }
}
