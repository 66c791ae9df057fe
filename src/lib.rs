//! aggregate-set: hash sets that group keys by exact hash value, with a
//! single-threaded and a per-bucket-locked concurrent front-end.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: a hash set whose collision handling is two-level. Keys with the
//!   same hash value share one aggregate; a bucket holds the aggregates whose
//!   hash masks to it.
//! - Layers:
//!   - `AggregateNode<K, H>`: one exact hash value and its keys, a singly
//!     linked list of key nodes in a per-aggregate `SlotMap` arena.
//!   - `Bucket<K, H>`: the aggregates of one bucket plus its key count. The
//!     distinct-hash count is the number of aggregates.
//!   - `AgHashSet<K, S, E>`: bucket array, total count and resize policy for
//!     single-threaded use.
//!   - `ConcurrentAgHashSet<K, S, E>`: the same buckets, each behind a
//!     `parking_lot::RwLock`, under one structural lock taken exclusively only
//!     to resize.
//!
//! Addressing and growth
//! - The bucket count is a power of two and a key lives in bucket
//!   `hash & (bucket_count - 1)`.
//! - After an insert, the table grows by the growth factor when that bucket
//!   holds more than `hash_threshold` distinct hashes and more than
//!   `key_threshold` keys. A bucket crowded by a single hash value never
//!   triggers growth: growing could not split it.
//! - The bucket array is capped at `2^min(max_bucket_log, hash bits, 24)`.
//! - Resize moves whole aggregates; keys are never rehashed.
//!
//! Iteration
//! - Keys come out in ascending hash value, and within one aggregate in
//!   insertion order. Advancing past an aggregate probes the next hash values
//!   directly; see `iter` for the probe budget that keeps sparse 64-bit hash
//!   spaces tractable.
//! - `AgHashSet::iter` borrows the set, so mutation during iteration does not
//!   compile. `ConcurrentAgHashSet::iter` yields clones and tolerates
//!   concurrent mutation and resizes.
//!
//! Failure model
//! - Duplicate keys and missing keys are ordinary results (`false`,
//!   `InsertError::DuplicateKey`, the end iterator).
//! - Bucket arrays and aggregate slots are reserved fallibly. A failed insert
//!   leaves the table as it was; a failed resize is logged and the table keeps
//!   its current size; a failed construction leaves a table for which
//!   `initialized()` is false and which stores nothing.
//!
//! Observability
//! - `tracing` events on resize, abandoned resize and failed construction.
//! - Optional `TableMetrics` counters handed in through `with_metrics`.
//! - `bucket_stats` and `check_invariants` for tests and tuning.

mod ag_hash_set;
mod ag_hash_set_proptest;
mod aggregate;
mod bucket;
mod concurrent;
mod config;
mod equality;
mod error;
mod hash;
mod iter;
mod metrics;
mod reentrancy;

// Public surface
pub use ag_hash_set::AgHashSet;
pub use bucket::BucketStats;
pub use concurrent::{ConcurrentAgHashSet, ConcurrentIter};
pub use config::{TableConfig, MAX_BUCKET_LOG};
pub use equality::{DefaultEq, FnEq, KeyEq};
pub use error::{ConfigError, InsertError, InvariantError, TableError};
pub use hash::{BuildHasherAdapter, DefaultKeyHasher, FnHasher, HashValue, KeyHasher};
pub use iter::Iter;
pub use metrics::{MetricsSnapshot, TableMetrics};
