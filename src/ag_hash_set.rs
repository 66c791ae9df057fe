//! AgHashSet: single-threaded front-end over the bucket/aggregate engine.

use crate::aggregate::AggregateNode;
use crate::bucket::{try_alloc_array, Bucket, BucketStats};
use crate::config::{Geometry, TableConfig};
use crate::equality::{DefaultEq, KeyEq};
use crate::error::{InsertError, InvariantError, TableError};
use crate::hash::{DefaultKeyHasher, KeyHasher};
use crate::iter::Iter;
use crate::metrics::TableMetrics;
use core::fmt;
use core::mem::size_of;
use std::sync::Arc;

/// Hash set that groups keys sharing one exact hash value into an aggregate.
///
/// Buckets are addressed by masking the low bits of the hash, and iteration
/// visits keys in ascending hash order. See the crate docs for the layout.
pub struct AgHashSet<K, S: KeyHasher<K> = DefaultKeyHasher, E = DefaultEq> {
    buckets: Vec<Bucket<K, S::Hash>>,
    len: usize,
    geometry: Geometry,
    hasher: S,
    eq: E,
    metrics: Option<Arc<TableMetrics>>,
}

type Allocated<K, H> = (Geometry, Vec<Bucket<K, H>>);

fn allocate<K, S: KeyHasher<K>>(
    config: &TableConfig,
) -> Result<Allocated<K, S::Hash>, TableError> {
    let geometry = Geometry::resolve::<S::Hash>(config)?;
    let buckets = geometry.bucket_count();
    let array = try_alloc_array(buckets, Bucket::default)
        .map_err(|source| TableError::Allocation { buckets, source })?;
    Ok((geometry, array))
}

impl<K> AgHashSet<K>
where
    DefaultKeyHasher: KeyHasher<K>,
{
    pub fn new() -> Self {
        Self::with_hasher(DefaultKeyHasher::default())
    }

    /// `hint` is rounded up to a power of two.
    pub fn with_capacity(hint: usize) -> Self {
        Self::with_config(
            &TableConfig::default().initial_buckets(hint),
            DefaultKeyHasher::default(),
            DefaultEq,
        )
    }
}

impl<K, S: KeyHasher<K>> AgHashSet<K, S, DefaultEq> {
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_hasher_and_eq(hasher, DefaultEq)
    }
}

impl<K, S: KeyHasher<K>, E> AgHashSet<K, S, E> {
    pub fn with_hasher_and_eq(hasher: S, eq: E) -> Self {
        Self::with_config(&TableConfig::default(), hasher, eq)
    }

    /// Builds a table from `config`. If the configuration is rejected or the
    /// bucket array cannot be allocated, the table is left uninitialized; see
    /// [`initialized`](Self::initialized).
    pub fn with_config(config: &TableConfig, hasher: S, eq: E) -> Self {
        let (geometry, buckets) = allocate::<K, S>(config).unwrap_or_else(|err| {
            tracing::error!(error = %err, "table construction failed, table is uninitialized");
            (Geometry::uninitialized(), Vec::new())
        });
        Self {
            buckets,
            len: 0,
            geometry,
            hasher,
            eq,
            metrics: None,
        }
    }

    /// Like [`with_config`](Self::with_config) but reports the failure.
    pub fn try_with_config(config: &TableConfig, hasher: S, eq: E) -> Result<Self, TableError> {
        let (geometry, buckets) = allocate::<K, S>(config)?;
        Ok(Self {
            buckets,
            len: 0,
            geometry,
            hasher,
            eq,
            metrics: None,
        })
    }

    /// Records allocations, releases and resizes into `metrics` from now on.
    pub fn with_metrics(mut self, metrics: Arc<TableMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// False when construction could not obtain the bucket array. Such a
    /// table stores nothing: inserts fail and lookups find nothing.
    pub fn initialized(&self) -> bool {
        !self.buckets.is_empty()
    }

    #[doc(alias = "size")]
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn bucket_stats(&self, index: usize) -> Option<BucketStats> {
        self.buckets.get(index).map(Bucket::stats)
    }

    pub fn hasher(&self) -> &S {
        &self.hasher
    }

    pub fn metrics(&self) -> Option<&Arc<TableMetrics>> {
        self.metrics.as_ref()
    }

    /// Iterator over every key in ascending hash order.
    ///
    /// The iterator borrows the set, so the set cannot change under it:
    ///
    /// ```compile_fail
    /// use aggregate_set::AgHashSet;
    ///
    /// let mut set: AgHashSet<u32> = (0..4).collect();
    /// for k in set.iter() {
    ///     set.insert(k + 100);
    /// }
    /// ```
    #[doc(alias = "begin")]
    pub fn iter(&self) -> Iter<'_, K, S, E> {
        Iter::begin(self)
    }

    /// The exhausted iterator every finished traversal compares equal to.
    pub fn end(&self) -> Iter<'_, K, S, E> {
        Iter::end(self)
    }

    /// Drops every key but keeps the current bucket array.
    pub fn clear(&mut self) {
        let released: u64 = self.buckets.iter_mut().map(Bucket::clear).sum();
        self.len = 0;
        if let Some(m) = &self.metrics {
            m.record_dealloc(released);
        }
    }

    pub(crate) fn aggregate(&self, hash: S::Hash) -> Option<&AggregateNode<K, S::Hash>> {
        self.buckets
            .get(self.geometry.index(hash))?
            .aggregate(hash)
    }

    pub(crate) fn live_hashes_after(&self, after: S::Hash) -> Vec<S::Hash> {
        self.buckets
            .iter()
            .flat_map(|b| b.aggregates().iter().map(AggregateNode::hash))
            .filter(|&h| h > after)
            .collect()
    }

    fn grow(&mut self) {
        let next = self.geometry.grown();
        let from = self.buckets.len();
        let to = next.bucket_count();
        let mut fresh = match try_alloc_array(to, Bucket::default) {
            Ok(array) => array,
            Err(err) => {
                tracing::warn!(from, to, error = %err, "resize abandoned, keeping current buckets");
                if let Some(m) = &self.metrics {
                    m.record_failed_resize();
                }
                return;
            }
        };

        for bucket in &mut self.buckets {
            for aggregate in bucket.take_aggregates() {
                fresh[next.index(aggregate.hash())].adopt(aggregate);
            }
        }
        self.buckets = fresh;
        self.geometry = next;

        if let Some(m) = &self.metrics {
            m.record_alloc(1, to * size_of::<Bucket<K, S::Hash>>());
            m.record_dealloc(1);
            m.record_resize();
        }
        tracing::debug!(from, to, keys = self.len, "bucket array grown");
    }
}

impl<K, S: KeyHasher<K>, E: KeyEq<K>> AgHashSet<K, S, E> {
    /// Index of the bucket `key` maps to under the current bucket count.
    pub fn bucket_of(&self, key: &K) -> usize {
        self.geometry.index(self.hasher.hash_key(key))
    }

    /// Adds `key`, then grows the table if its bucket crossed both thresholds.
    /// On error the table is unchanged.
    pub fn try_insert(&mut self, key: K) -> Result<(), InsertError> {
        let hash = self.hasher.hash_key(&key);
        let bucket = self
            .buckets
            .get_mut(self.geometry.index(hash))
            .ok_or(InsertError::Uninitialized)?;
        let inserted = bucket.try_insert(hash, key, &self.eq)?;
        let stats = bucket.stats();
        self.len += 1;

        if let Some(m) = &self.metrics {
            let (nodes, bytes) = inserted.footprint::<K, S::Hash>();
            m.record_alloc(nodes, bytes);
        }
        if self.geometry.should_grow(stats) {
            self.grow();
        }
        Ok(())
    }

    /// True iff `key` was newly added. Use [`try_insert`](Self::try_insert)
    /// to tell a duplicate from an allocation failure.
    pub fn insert(&mut self, key: K) -> bool {
        self.try_insert(key).is_ok()
    }

    #[doc(alias = "exists")]
    pub fn contains(&self, key: &K) -> bool {
        let hash = self.hasher.hash_key(key);
        self.buckets
            .get(self.geometry.index(hash))
            .is_some_and(|b| b.contains(hash, key, &self.eq))
    }

    /// Iterator positioned on the stored key equal to `key`, or `end()`.
    pub fn find(&self, key: &K) -> Iter<'_, K, S, E> {
        let hash = self.hasher.hash_key(key);
        let found = self
            .buckets
            .get(self.geometry.index(hash))
            .and_then(|b| b.locate(hash, key, &self.eq));
        match found {
            Some((aggregate, node)) => Iter::at(self, aggregate, node),
            None => Iter::end(self),
        }
    }

    /// The stored key equal to `key`.
    pub fn get(&self, key: &K) -> Option<&K> {
        self.find(key).get()
    }

    /// True iff a key equal to `key` was stored and has been removed.
    #[doc(alias = "erase")]
    pub fn remove(&mut self, key: &K) -> bool {
        let hash = self.hasher.hash_key(key);
        let Some(bucket) = self.buckets.get_mut(self.geometry.index(hash)) else {
            return false;
        };
        let Some(erased) = bucket.erase(hash, key, &self.eq) else {
            return false;
        };
        self.len -= 1;
        if let Some(m) = &self.metrics {
            m.record_dealloc(erased.released());
        }
        true
    }

    /// Walks the whole table and verifies every counter and structural rule.
    pub fn check_invariants(&self) -> Result<(), InvariantError> {
        let mut actual = 0;
        for (index, bucket) in self.buckets.iter().enumerate() {
            actual += bucket.audit(index, &self.geometry, &self.eq)?;
        }
        if actual != self.len {
            return Err(InvariantError::TotalKeyCount {
                recorded: self.len,
                actual,
            });
        }
        Ok(())
    }
}

impl<K, S, E> Default for AgHashSet<K, S, E>
where
    S: KeyHasher<K> + Default,
    E: Default,
{
    fn default() -> Self {
        Self::with_hasher_and_eq(S::default(), E::default())
    }
}

impl<K, S: KeyHasher<K>, E: KeyEq<K>> Extend<K> for AgHashSet<K, S, E> {
    fn extend<I: IntoIterator<Item = K>>(&mut self, iter: I) {
        for key in iter {
            self.insert(key);
        }
    }
}

impl<K, S, E> FromIterator<K> for AgHashSet<K, S, E>
where
    S: KeyHasher<K> + Default,
    E: KeyEq<K> + Default,
{
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        let mut set = Self::default();
        set.extend(iter);
        set
    }
}

impl<'a, K, S: KeyHasher<K>, E> IntoIterator for &'a AgHashSet<K, S, E> {
    type Item = &'a K;
    type IntoIter = Iter<'a, K, S, E>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K: fmt::Debug, S: KeyHasher<K>, E> fmt::Debug for AgHashSet<K, S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::hash::FnHasher;
    use std::ffi::{CStr, CString};

    fn identity() -> FnHasher<impl Fn(&u64) -> u64 + Clone, u64> {
        FnHasher::new(|k: &u64| *k)
    }

    fn abs() -> FnHasher<impl Fn(&i64) -> u64 + Clone, u64> {
        FnHasher::new(|k: &i64| k.unsigned_abs())
    }

    /// Invariant: keys sharing a hash share one aggregate; the bucket's hash
    /// count only moves when a new hash value arrives.
    #[test]
    fn mod_two_hash_counts_per_bucket() {
        let mut set = AgHashSet::with_hasher(FnHasher::new(|k: &u32| k % 2));
        assert!(set.insert(0));
        assert!(set.insert(1));
        assert_eq!(set.len(), 2);
        let even = set.bucket_of(&0);
        let odd = set.bucket_of(&1);
        assert_ne!(even, odd);
        let one_each = BucketStats {
            key_count: 1,
            hash_count: 1,
        };
        assert_eq!(set.bucket_stats(even), Some(one_each));
        assert_eq!(set.bucket_stats(odd), Some(one_each));

        assert!(set.insert(2));
        assert_eq!(
            set.bucket_stats(even),
            Some(BucketStats {
                key_count: 2,
                hash_count: 1
            })
        );
        set.check_invariants().unwrap();
    }

    /// Invariant: an aggregate disappears with its last key and its bucket's
    /// hash count drops; other buckets are untouched.
    #[test]
    fn abs_hash_aggregate_removed_with_last_key() {
        let mut set = AgHashSet::with_hasher(abs());
        for k in [1, -1, 2, -2] {
            assert!(set.insert(k));
        }
        assert_eq!(set.len(), 4);
        let ones = set.bucket_of(&1);
        let twos = set.bucket_of(&2);
        assert_eq!(set.bucket_stats(ones).unwrap().key_count, 2);

        assert!(set.remove(&1));
        assert_eq!(
            set.bucket_stats(ones),
            Some(BucketStats {
                key_count: 1,
                hash_count: 1
            })
        );
        assert!(set.remove(&-1));
        assert_eq!(set.bucket_stats(ones), Some(BucketStats::default()));
        assert_eq!(
            set.bucket_stats(twos),
            Some(BucketStats {
                key_count: 2,
                hash_count: 1
            })
        );
        set.check_invariants().unwrap();
    }

    /// Invariant: duplicate insert fails without mutation.
    #[test]
    fn duplicate_insert_is_rejected() {
        let mut set = AgHashSet::new();
        assert!(set.insert("k"));
        assert_eq!(set.try_insert("k"), Err(InsertError::DuplicateKey));
        assert!(!set.insert("k"));
        assert_eq!(set.len(), 1);
    }

    /// Invariant: insert then erase restores size; a second erase is a no-op.
    #[test]
    fn insert_erase_inverse_and_idempotent_erase() {
        let mut set: AgHashSet<u32> = AgHashSet::new();
        set.insert(10);
        let before = set.len();
        assert!(set.insert(7));
        assert!(set.remove(&7));
        assert_eq!(set.len(), before);
        assert!(!set.remove(&7));
        assert_eq!(set.len(), before);
        assert!(!set.contains(&7));
        assert!(set.contains(&10));
    }

    /// Invariant: crossing both thresholds grows the array by the growth
    /// factor and every key stays findable.
    #[test]
    fn colliding_distinct_hashes_trigger_resize() {
        let metrics = Arc::new(TableMetrics::new());
        let mut set = AgHashSet::with_hasher(identity()).with_metrics(metrics.clone());
        assert_eq!(set.bucket_count(), 16);
        // All land in bucket 0 of 16 with distinct hashes.
        for i in 0..8u64 {
            set.insert(i * 16);
        }
        assert_eq!(set.bucket_count(), 16);
        set.insert(8 * 16);
        assert_eq!(set.bucket_count(), 64);
        assert_eq!(set.len(), 9);
        for i in 0..9u64 {
            assert!(set.contains(&(i * 16)));
        }
        set.check_invariants().unwrap();
        assert_eq!(metrics.snapshot().resizes, 1);
    }

    /// Invariant: a bucket full of one hash value never triggers growth.
    #[test]
    fn single_hash_value_never_resizes() {
        let mut set = AgHashSet::with_hasher(FnHasher::new(|_: &u32| 0u32));
        for k in 0..1000 {
            assert!(set.insert(k));
        }
        assert_eq!(set.bucket_count(), 16);
        assert_eq!(
            set.bucket_stats(0),
            Some(BucketStats {
                key_count: 1000,
                hash_count: 1
            })
        );
        set.check_invariants().unwrap();
    }

    /// Invariant: the bucket array never outgrows the hash width.
    #[test]
    fn narrow_hash_caps_bucket_count() {
        let cfg = TableConfig::default().initial_buckets(64).hash_threshold(1);
        let mut set = AgHashSet::with_config(&cfg, FnHasher::new(|k: &u32| *k as u8), DefaultEq);
        for k in 0..10_000u32 {
            set.insert(k);
        }
        assert_eq!(set.bucket_count(), 256);
        assert_eq!(set.len(), 10_000);
        set.check_invariants().unwrap();
    }

    /// Invariant: a table that failed construction reports it and stores nothing.
    #[test]
    fn rejected_config_leaves_table_uninitialized() {
        let cfg = TableConfig::default().growth_factor(3);
        assert!(matches!(
            AgHashSet::<u64, _>::try_with_config(&cfg, identity(), DefaultEq),
            Err(TableError::Config(ConfigError::GrowthFactor(3)))
        ));

        let mut set = AgHashSet::with_config(&cfg, identity(), DefaultEq);
        assert!(!set.initialized());
        assert_eq!(set.bucket_count(), 0);
        assert_eq!(set.try_insert(1), Err(InsertError::Uninitialized));
        assert!(!set.contains(&1));
        assert!(!set.remove(&1));
        assert!(set.find(&1).is_end());
        assert_eq!(set.iter().count(), 0);
        assert_eq!(set.bucket_stats(0), None);
        set.check_invariants().unwrap();
    }

    /// Invariant: iteration visits hashes in ascending order and each
    /// aggregate's keys in insertion order.
    #[test]
    fn iteration_is_ascending_by_hash() {
        let mut set = AgHashSet::with_hasher(abs());
        for k in [5, 2, -1, 1, -2, 0] {
            set.insert(k);
        }
        let keys: Vec<i64> = set.iter().copied().collect();
        assert_eq!(keys, [0, -1, 1, 2, -2, 5]);

        let mut set = AgHashSet::with_hasher(identity());
        for k in [900u64, 3, 1 << 40, 17, u64::MAX, 0] {
            set.insert(k);
        }
        let keys: Vec<u64> = set.iter().copied().collect();
        assert_eq!(keys, [0, 3, 17, 900, 1 << 40, u64::MAX]);
    }

    /// Invariant: a full traversal of a sparse 64-bit hash space yields every
    /// key once, in ascending hash order.
    #[test]
    fn default_hasher_traversal_is_complete_and_sorted() {
        let set: AgHashSet<u32> = (0..2000).collect();
        let hashes: Vec<u64> = set.iter().map(|k| set.hasher().hash_key(k)).collect();
        assert_eq!(hashes.len(), 2000);
        assert!(hashes.windows(2).all(|w| w[0] < w[1]));
        let mut keys: Vec<u32> = set.iter().copied().collect();
        keys.sort_unstable();
        assert_eq!(keys, (0..2000).collect::<Vec<_>>());
    }

    /// Invariant: iterators compare by position; exhausted ones equal `end()`.
    #[test]
    fn iterator_equality_tracks_position() {
        let mut set = AgHashSet::with_hasher(identity());
        set.extend([1u64, 2, 3]);

        let mut it = set.iter();
        assert_eq!(it, set.find(&1));
        assert_eq!(it.get(), Some(&1));
        it.next();
        assert_eq!(it, set.find(&2));
        assert_ne!(it, set.find(&3));
        assert_eq!(set.find(&42), set.end());
        assert_eq!(set.get(&3), Some(&3));

        let rest: Vec<u64> = set.find(&2).copied().collect();
        assert_eq!(rest, [2, 3]);

        it.by_ref().for_each(drop);
        assert_eq!(it, set.end());
        assert_eq!(it.next(), None);

        let empty: AgHashSet<u64, _> = AgHashSet::with_hasher(identity());
        assert_eq!(empty.iter(), empty.end());
    }

    /// Invariant: metrics mirror node creation and release.
    #[test]
    fn metrics_count_nodes() {
        let metrics = Arc::new(TableMetrics::new());
        let mut set = AgHashSet::with_hasher(abs()).with_metrics(metrics.clone());
        set.insert(1);
        set.insert(-1);
        assert_eq!(metrics.snapshot().allocations, 3);
        set.remove(&1);
        set.remove(&-1);
        let snap = metrics.snapshot();
        assert_eq!(snap.deallocations, 3);
        assert!(snap.allocated_bytes > 0);
        assert_eq!(snap.resizes, 0);
    }

    /// Invariant: C string keys compare by content, not address.
    #[test]
    fn cstr_keys_dedupe_by_content() {
        let owned = CString::new("alpha").unwrap();
        let mut set: AgHashSet<&CStr> = AgHashSet::new();
        assert!(set.insert(owned.as_c_str()));
        let literal = CStr::from_bytes_with_nul(b"alpha\0").unwrap();
        assert!(set.contains(&literal));
        assert!(!set.insert(literal));
    }

    #[test]
    fn clear_keeps_buckets() {
        let mut set = AgHashSet::with_hasher(identity());
        set.extend((0..100u64).map(|i| i * 16));
        let buckets = set.bucket_count();
        assert!(buckets > 16);
        set.clear();
        assert!(set.is_empty());
        assert_eq!(set.bucket_count(), buckets);
        assert_eq!(set.iter().count(), 0);
        set.check_invariants().unwrap();
        assert!(set.insert(16));
    }

    #[test]
    fn debug_lists_keys() {
        let mut set = AgHashSet::with_hasher(identity());
        set.extend([2u64, 1]);
        assert_eq!(format!("{set:?}"), "{1, 2}");
    }
}
