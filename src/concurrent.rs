//! ConcurrentAgHashSet: the same engine behind per-bucket reader/writer locks.
//!
//! Lock layout
//! - `table: RwLock<LockedTable>` is the structural lock. It guards the bucket
//!   array and its geometry, and is held shared by every ordinary operation.
//! - Each bucket sits in its own `RwLock`, index-aligned with the bucket array.
//!   Lookups take it shared, insert and remove take it exclusive.
//! - Resize takes the structural lock exclusive. With no other holder it can
//!   reach every bucket through `get_mut` and swap in a new array, lock array
//!   included, in one step.
//!
//! Hashing runs before any lock is taken. Equality runs under a bucket lock,
//! so a callback must not call back into the same set; debug builds panic when
//! one does instead of deadlocking.

use crate::bucket::{try_alloc_array, Bucket, BucketStats};
use crate::config::{Geometry, TableConfig};
use crate::equality::{DefaultEq, KeyEq};
use crate::error::{InsertError, InvariantError, TableError};
use crate::hash::{DefaultKeyHasher, HashValue, KeyHasher};
use crate::iter::HashWalk;
use crate::metrics::TableMetrics;
use crate::reentrancy::DebugReentrancy;
use core::fmt;
use core::iter::FusedIterator;
use core::mem::size_of;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct LockedTable<K, H> {
    buckets: Vec<RwLock<Bucket<K, H>>>,
    geometry: Geometry,
}

impl<K, H: HashValue> LockedTable<K, H> {
    fn allocate(config: &TableConfig) -> Result<Self, TableError> {
        let geometry = Geometry::resolve::<H>(config)?;
        let buckets = geometry.bucket_count();
        let array = try_alloc_array(buckets, || RwLock::new(Bucket::default()))
            .map_err(|source| TableError::Allocation { buckets, source })?;
        Ok(Self {
            buckets: array,
            geometry,
        })
    }

    fn uninitialized() -> Self {
        Self {
            buckets: Vec::new(),
            geometry: Geometry::uninitialized(),
        }
    }

    #[inline]
    fn bucket(&self, hash: H) -> Option<&RwLock<Bucket<K, H>>> {
        self.buckets.get(self.geometry.index(hash))
    }
}

/// Thread-safe aggregate hash set. Every operation takes `&self`.
///
/// ```
/// use aggregate_set::ConcurrentAgHashSet;
///
/// let set = ConcurrentAgHashSet::new();
/// std::thread::scope(|s| {
///     for t in 0..4u32 {
///         let set = &set;
///         s.spawn(move || {
///             for k in 0..1000 {
///                 set.insert(t * 1000 + k);
///             }
///         });
///     }
/// });
/// assert_eq!(set.len(), 4000);
/// ```
pub struct ConcurrentAgHashSet<K, S: KeyHasher<K> = DefaultKeyHasher, E = DefaultEq> {
    table: RwLock<LockedTable<K, S::Hash>>,
    len: AtomicUsize,
    hasher: S,
    eq: E,
    metrics: Option<Arc<TableMetrics>>,
    reentrancy: DebugReentrancy,
}

impl<K> ConcurrentAgHashSet<K>
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

impl<K, S: KeyHasher<K>> ConcurrentAgHashSet<K, S, DefaultEq> {
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_hasher_and_eq(hasher, DefaultEq)
    }
}

impl<K, S: KeyHasher<K>, E> ConcurrentAgHashSet<K, S, E> {
    pub fn with_hasher_and_eq(hasher: S, eq: E) -> Self {
        Self::with_config(&TableConfig::default(), hasher, eq)
    }

    /// Builds a table from `config`, leaving it uninitialized on failure.
    pub fn with_config(config: &TableConfig, hasher: S, eq: E) -> Self {
        let table = LockedTable::allocate(config).unwrap_or_else(|err| {
            tracing::error!(error = %err, "table construction failed, table is uninitialized");
            LockedTable::uninitialized()
        });
        Self::from_table(table, hasher, eq)
    }

    pub fn try_with_config(config: &TableConfig, hasher: S, eq: E) -> Result<Self, TableError> {
        Ok(Self::from_table(LockedTable::allocate(config)?, hasher, eq))
    }

    fn from_table(table: LockedTable<K, S::Hash>, hasher: S, eq: E) -> Self {
        Self {
            table: RwLock::new(table),
            len: AtomicUsize::new(0),
            hasher,
            eq,
            metrics: None,
            reentrancy: DebugReentrancy::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<TableMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn initialized(&self) -> bool {
        let _g = self.reentrancy.enter();
        !self.table.read().buckets.is_empty()
    }

    /// Number of keys. Exact when no other thread is mutating.
    #[doc(alias = "size")]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bucket_count(&self) -> usize {
        let _g = self.reentrancy.enter();
        self.table.read().buckets.len()
    }

    pub fn bucket_stats(&self, index: usize) -> Option<BucketStats> {
        let _g = self.reentrancy.enter();
        let table = self.table.read();
        table.buckets.get(index).map(|b| b.read().stats())
    }

    pub fn hasher(&self) -> &S {
        &self.hasher
    }

    pub fn metrics(&self) -> Option<&Arc<TableMetrics>> {
        self.metrics.as_ref()
    }

    pub fn bucket_of(&self, key: &K) -> usize {
        let _g = self.reentrancy.enter();
        let hash = self.hasher.hash_key(key);
        self.table.read().geometry.index(hash)
    }

    /// Drops every key but keeps the current bucket array.
    pub fn clear(&self) {
        let _g = self.reentrancy.enter();
        let mut table = self.table.write();
        let released: u64 = table.buckets.iter_mut().map(|b| b.get_mut().clear()).sum();
        self.len.store(0, Ordering::Relaxed);
        if let Some(m) = &self.metrics {
            m.record_dealloc(released);
        }
    }

    /// Grows the table unless another thread already did, or the bucket that
    /// `hash` maps to no longer crosses the thresholds.
    fn grow(&self, hash: S::Hash) {
        let mut guard = self.table.write();
        let table = &mut *guard;
        let Some(bucket) = table.buckets.get_mut(table.geometry.index(hash)) else {
            return;
        };
        if !table.geometry.should_grow(bucket.get_mut().stats()) {
            return;
        }

        let next = table.geometry.grown();
        let from = table.buckets.len();
        let to = next.bucket_count();
        let mut fresh = match try_alloc_array(to, || RwLock::new(Bucket::default())) {
            Ok(array) => array,
            Err(err) => {
                tracing::warn!(from, to, error = %err, "resize abandoned, keeping current buckets");
                if let Some(m) = &self.metrics {
                    m.record_failed_resize();
                }
                return;
            }
        };

        for bucket in &mut table.buckets {
            for aggregate in bucket.get_mut().take_aggregates() {
                fresh[next.index(aggregate.hash())]
                    .get_mut()
                    .adopt(aggregate);
            }
        }
        table.buckets = fresh;
        table.geometry = next;

        if let Some(m) = &self.metrics {
            m.record_alloc(1, to * size_of::<RwLock<Bucket<K, S::Hash>>>());
            m.record_dealloc(1);
            m.record_resize();
        }
        tracing::debug!(from, to, keys = self.len(), "bucket array grown");
    }

    fn live_hashes_after(&self, after: S::Hash) -> Vec<S::Hash> {
        let _g = self.reentrancy.enter();
        let table = self.table.read();
        let mut hashes = Vec::new();
        for bucket in &table.buckets {
            let bucket = bucket.read();
            hashes.extend(
                bucket
                    .aggregates()
                    .iter()
                    .map(|a| a.hash())
                    .filter(|&h| h > after),
            );
        }
        hashes
    }
}

impl<K, S: KeyHasher<K>, E: KeyEq<K>> ConcurrentAgHashSet<K, S, E> {
    /// Adds `key` under its bucket's write lock, then grows the table if the
    /// bucket crossed both thresholds.
    pub fn try_insert(&self, key: K) -> Result<(), InsertError> {
        let _g = self.reentrancy.enter();
        let hash = self.hasher.hash_key(&key);
        let grow = {
            let table = self.table.read();
            let mut bucket = table
                .bucket(hash)
                .ok_or(InsertError::Uninitialized)?
                .write();
            let inserted = bucket.try_insert(hash, key, &self.eq)?;
            self.len.fetch_add(1, Ordering::Relaxed);
            if let Some(m) = &self.metrics {
                let (nodes, bytes) = inserted.footprint::<K, S::Hash>();
                m.record_alloc(nodes, bytes);
            }
            table.geometry.should_grow(bucket.stats())
        };
        if grow {
            self.grow(hash);
        }
        Ok(())
    }

    pub fn insert(&self, key: K) -> bool {
        self.try_insert(key).is_ok()
    }

    #[doc(alias = "exists")]
    pub fn contains(&self, key: &K) -> bool {
        let _g = self.reentrancy.enter();
        let hash = self.hasher.hash_key(key);
        let table = self.table.read();
        table
            .bucket(hash)
            .is_some_and(|b| b.read().contains(hash, key, &self.eq))
    }

    #[doc(alias = "erase")]
    pub fn remove(&self, key: &K) -> bool {
        let _g = self.reentrancy.enter();
        let hash = self.hasher.hash_key(key);
        let table = self.table.read();
        let Some(bucket) = table.bucket(hash) else {
            return false;
        };
        let Some(erased) = bucket.write().erase(hash, key, &self.eq) else {
            return false;
        };
        self.len.fetch_sub(1, Ordering::Relaxed);
        if let Some(m) = &self.metrics {
            m.record_dealloc(erased.released());
        }
        true
    }

    /// Audits the whole table under the structural write lock.
    pub fn check_invariants(&self) -> Result<(), InvariantError> {
        let _g = self.reentrancy.enter();
        let mut table = self.table.write();
        let table = &mut *table;
        let mut actual = 0;
        for (index, bucket) in table.buckets.iter_mut().enumerate() {
            actual += bucket.get_mut().audit(index, &table.geometry, &self.eq)?;
        }
        let recorded = self.len();
        if actual != recorded {
            return Err(InvariantError::TotalKeyCount { recorded, actual });
        }
        Ok(())
    }
}

impl<K: Clone, S: KeyHasher<K>, E> ConcurrentAgHashSet<K, S, E> {
    /// Weakly consistent traversal in ascending hash order; see [`ConcurrentIter`].
    #[doc(alias = "begin")]
    pub fn iter(&self) -> ConcurrentIter<'_, K, S, E> {
        ConcurrentIter::begin(self)
    }

    fn snapshot(&self, hash: S::Hash) -> Option<(S::Hash, Vec<K>)> {
        let _g = self.reentrancy.enter();
        let table = self.table.read();
        let bucket = table.bucket(hash)?.read();
        let aggregate = bucket.aggregate(hash)?;
        Some((hash, aggregate.keys().cloned().collect()))
    }
}

impl<K: Clone, S: KeyHasher<K>, E: KeyEq<K>> ConcurrentAgHashSet<K, S, E> {
    /// Traversal starting at the stored key equal to `key`. Ends at once
    /// (`is_end()`) when there is none.
    pub fn find(&self, key: &K) -> ConcurrentIter<'_, K, S, E> {
        let _g = self.reentrancy.enter();
        let hash = self.hasher.hash_key(key);
        let table = self.table.read();
        let found = table.bucket(hash).and_then(|b| {
            let bucket = b.read();
            let (aggregate, node) = bucket.locate(hash, key, &self.eq)?;
            Some(aggregate.keys_from(node).cloned().collect::<Vec<K>>())
        });
        let budget = table.buckets.len();
        match found {
            Some(keys) => ConcurrentIter::new(self, Some(hash), keys, budget),
            None => ConcurrentIter::new(self, None, Vec::new(), budget),
        }
    }

    /// A clone of the stored key equal to `key`.
    pub fn get(&self, key: &K) -> Option<K> {
        self.find(key).next()
    }
}

impl<K, S, E> Default for ConcurrentAgHashSet<K, S, E>
where
    S: KeyHasher<K> + Default,
    E: Default,
{
    fn default() -> Self {
        Self::with_hasher_and_eq(S::default(), E::default())
    }
}

impl<K, S: KeyHasher<K>, E: KeyEq<K>> Extend<K> for ConcurrentAgHashSet<K, S, E> {
    fn extend<I: IntoIterator<Item = K>>(&mut self, iter: I) {
        for key in iter {
            self.insert(key);
        }
    }
}

impl<K, S, E> FromIterator<K> for ConcurrentAgHashSet<K, S, E>
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

impl<K: Clone + fmt::Debug, S: KeyHasher<K>, E> fmt::Debug for ConcurrentAgHashSet<K, S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Iterator over a [`ConcurrentAgHashSet`] yielding cloned keys.
///
/// Locks are held only while a step copies out one aggregate's keys; the
/// position is a hash value, so the traversal carries on across resizes.
/// Keys present for the whole traversal are yielded exactly once. Keys
/// inserted or removed meanwhile may or may not be seen, and no key is ever
/// yielded twice.
pub struct ConcurrentIter<'a, K, S: KeyHasher<K>, E> {
    set: &'a ConcurrentAgHashSet<K, S, E>,
    // Hash of the aggregate `pending` came from; `None` once the walk ended.
    hash: Option<S::Hash>,
    pending: std::vec::IntoIter<K>,
    walk: HashWalk<S::Hash>,
}

impl<'a, K: Clone, S: KeyHasher<K>, E> ConcurrentIter<'a, K, S, E> {
    fn new(
        set: &'a ConcurrentAgHashSet<K, S, E>,
        hash: Option<S::Hash>,
        keys: Vec<K>,
        budget: usize,
    ) -> Self {
        Self {
            set,
            hash,
            pending: keys.into_iter(),
            walk: HashWalk::new(budget),
        }
    }

    fn begin(set: &'a ConcurrentAgHashSet<K, S, E>) -> Self {
        let zero = <S::Hash as HashValue>::ZERO;
        let mut it = Self::new(set, None, Vec::new(), set.bucket_count());
        let first = set.snapshot(zero).or_else(|| {
            it.walk
                .next_after(zero, |h| set.snapshot(h), |h| set.live_hashes_after(h))
        });
        if let Some((hash, keys)) = first {
            it.hash = Some(hash);
            it.pending = keys.into_iter();
        }
        it
    }

    pub fn is_end(&self) -> bool {
        self.hash.is_none() && self.pending.len() == 0
    }
}

impl<K: Clone, S: KeyHasher<K>, E> Iterator for ConcurrentIter<'_, K, S, E> {
    type Item = K;

    fn next(&mut self) -> Option<K> {
        loop {
            if let Some(key) = self.pending.next() {
                return Some(key);
            }
            let after = self.hash.take()?;
            let set = self.set;
            let (hash, keys) = self.walk.next_after(
                after,
                |h| set.snapshot(h),
                |h| set.live_hashes_after(h),
            )?;
            self.hash = Some(hash);
            self.pending = keys.into_iter();
        }
    }
}

impl<K: Clone, S: KeyHasher<K>, E> FusedIterator for ConcurrentIter<'_, K, S, E> {}
