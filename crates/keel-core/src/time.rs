//! Time grid: maps timestamps to tranche and bucket indices.
//!
//! Tranches and buckets are fixed-width slices of time starting at the Unix
//! epoch. A tranche does not have to span a whole number of buckets; with
//! the default durations (91 and 28 days) bucket boundaries fall inside
//! tranches and the expiration engine walks both boundary sequences in
//! time order.

use serde::{Deserialize, Serialize};

use crate::constants::{BUCKET_DURATION, MAX_ACTIVE_TRANCHES, TRANCHE_DURATION};
use crate::types::{BucketId, TrancheId};

/// Tranche and bucket geometry.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeGrid {
    tranche_duration: u64,
    bucket_duration: u64,
    max_active_tranches: u64,
}

impl Default for TimeGrid {
    fn default() -> Self {
        Self {
            tranche_duration: TRANCHE_DURATION,
            bucket_duration: BUCKET_DURATION,
            max_active_tranches: MAX_ACTIVE_TRANCHES,
        }
    }
}

impl TimeGrid {
    /// Create a grid. Durations and the active tranche count must be non-zero;
    /// [`PoolConfig::validate`](crate::config::PoolConfig::validate) enforces this
    /// for loaded configurations.
    pub fn new(tranche_duration: u64, bucket_duration: u64, max_active_tranches: u64) -> Self {
        Self {
            tranche_duration: tranche_duration.max(1),
            bucket_duration: bucket_duration.max(1),
            max_active_tranches: max_active_tranches.max(1),
        }
    }

    pub fn tranche_duration(&self) -> u64 {
        self.tranche_duration
    }

    pub fn bucket_duration(&self) -> u64 {
        self.bucket_duration
    }

    pub fn max_active_tranches(&self) -> u64 {
        self.max_active_tranches
    }

    pub fn tranche_of(&self, t: u64) -> TrancheId {
        t / self.tranche_duration
    }

    pub fn bucket_of(&self, t: u64) -> BucketId {
        t / self.bucket_duration
    }

    pub fn tranche_start(&self, id: TrancheId) -> u64 {
        id.saturating_mul(self.tranche_duration)
    }

    /// End of a tranche (exclusive), equal to the start of the next one.
    pub fn tranche_end(&self, id: TrancheId) -> u64 {
        id.saturating_add(1).saturating_mul(self.tranche_duration)
    }

    pub fn bucket_start(&self, id: BucketId) -> u64 {
        id.saturating_mul(self.bucket_duration)
    }

    /// End of a bucket (exclusive), equal to the start of the next one.
    pub fn bucket_end(&self, id: BucketId) -> u64 {
        id.saturating_add(1).saturating_mul(self.bucket_duration)
    }

    /// First bucket whose start is at or after `t` (ceiling of `t / bucket_duration`).
    pub fn bucket_at_or_after(&self, t: u64) -> BucketId {
        t.div_ceil(self.bucket_duration)
    }

    /// The oldest tranche still accepting deposits at `now`.
    pub fn first_active_tranche(&self, now: u64) -> TrancheId {
        self.tranche_of(now)
    }

    /// The newest tranche accepting deposits at `now`.
    pub fn last_active_tranche(&self, now: u64) -> TrancheId {
        self.tranche_of(now) + self.max_active_tranches - 1
    }

    /// Whether `tranche_id` is within the active window at `now`.
    pub fn is_active(&self, tranche_id: TrancheId, now: u64) -> bool {
        tranche_id >= self.first_active_tranche(now) && tranche_id <= self.last_active_tranche(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ONE_DAY;
    use proptest::prelude::*;

    #[test]
    fn default_geometry() {
        let g = TimeGrid::default();
        assert_eq!(g.tranche_duration(), 91 * ONE_DAY);
        assert_eq!(g.bucket_duration(), 28 * ONE_DAY);
        assert_eq!(g.max_active_tranches(), 8);
    }

    #[test]
    fn tranche_and_bucket_of() {
        let g = TimeGrid::default();
        assert_eq!(g.tranche_of(0), 0);
        assert_eq!(g.tranche_of(TRANCHE_DURATION - 1), 0);
        assert_eq!(g.tranche_of(TRANCHE_DURATION), 1);
        assert_eq!(g.bucket_of(BUCKET_DURATION * 3 + 5), 3);
    }

    #[test]
    fn boundaries() {
        let g = TimeGrid::default();
        assert_eq!(g.tranche_start(2), 2 * TRANCHE_DURATION);
        assert_eq!(g.tranche_end(2), 3 * TRANCHE_DURATION);
        assert_eq!(g.bucket_end(4), g.bucket_start(5));
    }

    #[test]
    fn bucket_at_or_after_rounds_up() {
        let g = TimeGrid::default();
        assert_eq!(g.bucket_at_or_after(0), 0);
        assert_eq!(g.bucket_at_or_after(1), 1);
        assert_eq!(g.bucket_at_or_after(BUCKET_DURATION), 1);
        assert_eq!(g.bucket_at_or_after(BUCKET_DURATION + 1), 2);
    }

    #[test]
    fn active_window() {
        let g = TimeGrid::default();
        let now = 10 * TRANCHE_DURATION + 17;
        assert_eq!(g.first_active_tranche(now), 10);
        assert_eq!(g.last_active_tranche(now), 17);
        assert!(g.is_active(10, now));
        assert!(g.is_active(17, now));
        assert!(!g.is_active(9, now));
        assert!(!g.is_active(18, now));
    }

    #[test]
    fn zero_durations_clamped() {
        let g = TimeGrid::new(0, 0, 0);
        assert_eq!(g.tranche_of(5), 5);
        assert_eq!(g.max_active_tranches(), 1);
    }

    #[test]
    fn end_saturates() {
        let g = TimeGrid::default();
        assert_eq!(g.tranche_end(u64::MAX), u64::MAX);
    }

    proptest! {
        #[test]
        fn timestamp_within_its_slices(t in 0u64..=u64::MAX / 2) {
            let g = TimeGrid::default();
            let tranche = g.tranche_of(t);
            prop_assert!(g.tranche_start(tranche) <= t && t < g.tranche_end(tranche));
            let bucket = g.bucket_of(t);
            prop_assert!(g.bucket_start(bucket) <= t && t < g.bucket_end(bucket));
        }
    }
}
