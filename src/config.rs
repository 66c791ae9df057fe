//! Table configuration and the resolved bucket geometry.
//!
//! `TableConfig` is what callers supply. `Geometry` is the validated form the
//! tables work with: everything expressed as bit shifts, with the ceiling on
//! the bucket array already reduced to the hasher's output width.

use crate::bucket::BucketStats;
use crate::error::ConfigError;
use crate::hash::HashValue;

/// Hard ceiling on the bucket array: at most `2^MAX_BUCKET_LOG` buckets.
pub const MAX_BUCKET_LOG: u32 = 24;

/// Construction-time parameters of a table.
///
/// ```
/// use aggregate_set::TableConfig;
///
/// let cfg = TableConfig::default().initial_buckets(1024).growth_factor(2);
/// assert_eq!(cfg.initial_buckets, 1024);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TableConfig {
    /// Bucket count hint. Rounded up to a power of two; 0 is treated as 1.
    pub initial_buckets: usize,
    /// Multiplier applied to the bucket count on growth. Power of two, at least 2.
    pub growth_factor: usize,
    /// A bucket must hold more than this many distinct hashes to trigger growth.
    pub hash_threshold: usize,
    /// A bucket must hold more than this many keys to trigger growth.
    pub key_threshold: usize,
    /// Log2 of the largest bucket array. At most [`MAX_BUCKET_LOG`].
    pub max_bucket_log: u32,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            initial_buckets: 16,
            growth_factor: 4,
            hash_threshold: 4,
            key_threshold: 8,
            max_bucket_log: MAX_BUCKET_LOG,
        }
    }
}

impl TableConfig {
    pub fn initial_buckets(mut self, hint: usize) -> Self {
        self.initial_buckets = hint;
        self
    }

    pub fn growth_factor(mut self, factor: usize) -> Self {
        self.growth_factor = factor;
        self
    }

    pub fn hash_threshold(mut self, threshold: usize) -> Self {
        self.hash_threshold = threshold;
        self
    }

    pub fn key_threshold(mut self, threshold: usize) -> Self {
        self.key_threshold = threshold;
        self
    }

    pub fn max_bucket_log(mut self, log: u32) -> Self {
        self.max_bucket_log = log;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Geometry {
    pub(crate) bucket_log: u32,
    pub(crate) max_bucket_log: u32,
    growth_shift: u32,
    hash_threshold: usize,
    key_threshold: usize,
}

impl Geometry {
    pub(crate) fn resolve<H: HashValue>(config: &TableConfig) -> Result<Self, ConfigError> {
        let factor = config.growth_factor;
        if factor < 2 || !factor.is_power_of_two() {
            return Err(ConfigError::GrowthFactor(factor));
        }
        if config.max_bucket_log == 0 || config.max_bucket_log > MAX_BUCKET_LOG {
            return Err(ConfigError::MaxBucketLog {
                got: config.max_bucket_log,
                max: MAX_BUCKET_LOG,
            });
        }
        let max_bucket_log = config.max_bucket_log.min(H::BITS);

        let hint = config.initial_buckets.max(1);
        let rounded = hint.checked_next_power_of_two().unwrap_or(usize::MAX);
        let wanted_log = if rounded == usize::MAX {
            usize::BITS
        } else {
            rounded.trailing_zeros()
        };
        let bucket_log = wanted_log.min(max_bucket_log);
        if (1usize << bucket_log) != hint {
            tracing::debug!(
                hint,
                buckets = 1usize << bucket_log,
                "bucket hint adjusted to a power of two within the ceiling"
            );
        }

        Ok(Self {
            bucket_log,
            max_bucket_log,
            growth_shift: factor.trailing_zeros(),
            hash_threshold: config.hash_threshold,
            key_threshold: config.key_threshold,
        })
    }

    /// Geometry of a table that never obtained its buckets. It never grows.
    pub(crate) fn uninitialized() -> Self {
        Self {
            bucket_log: 0,
            max_bucket_log: 0,
            growth_shift: 1,
            hash_threshold: usize::MAX,
            key_threshold: usize::MAX,
        }
    }

    #[inline]
    pub(crate) fn bucket_count(&self) -> usize {
        1usize << self.bucket_log
    }

    #[inline]
    pub(crate) fn index<H: HashValue>(&self, hash: H) -> usize {
        (hash.to_u64() & ((1u64 << self.bucket_log) - 1)) as usize
    }

    /// Growth requires collision pressure from genuinely different hashes as
    /// well as many keys; a bucket full of one hash value never grows.
    pub(crate) fn should_grow(&self, stats: BucketStats) -> bool {
        stats.hash_count > self.hash_threshold
            && stats.key_count > self.key_threshold
            && self.bucket_log + self.growth_shift <= self.max_bucket_log
    }

    pub(crate) fn grown(&self) -> Self {
        Self {
            bucket_log: self.bucket_log + self.growth_shift,
            ..*self
        }
    }
}
