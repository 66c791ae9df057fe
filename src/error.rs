//! Error types for table construction, insertion and invariant auditing.

use std::collections::TryReserveError;
use thiserror::Error;

/// Why an insert did not add its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InsertError {
    /// An equal key is already stored. The table is unchanged.
    #[error("an equal key is already present")]
    DuplicateKey,
    /// Storage for the key node or its new aggregate could not be reserved.
    /// The table is unchanged.
    #[error("allocation failed while inserting")]
    AllocationFailed,
    /// The table never obtained its bucket array.
    #[error("table is not initialized")]
    Uninitialized,
}

/// Construction failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("failed to allocate {buckets} buckets")]
    Allocation {
        buckets: usize,
        #[source]
        source: TryReserveError,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Rejected [`TableConfig`](crate::TableConfig) value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("growth factor must be a power of two of at least 2, got {0}")]
    GrowthFactor(usize),
    #[error("max bucket log must be within 1..={max}, got {got}")]
    MaxBucketLog { got: u32, max: u32 },
}

/// Structural inconsistency reported by `check_invariants`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantError {
    #[error("table records {recorded} keys but buckets hold {actual}")]
    TotalKeyCount { recorded: usize, actual: usize },
    #[error("bucket {bucket} records {recorded} keys but its aggregates hold {actual}")]
    BucketKeyCount {
        bucket: usize,
        recorded: usize,
        actual: usize,
    },
    #[error("bucket {bucket} holds an aggregate with no keys")]
    EmptyAggregate { bucket: usize },
    #[error("bucket {bucket} holds two aggregates for hash {hash:#x}")]
    DuplicateHash { bucket: usize, hash: u64 },
    #[error("aggregate for hash {hash:#x} sits in bucket {bucket}, expected {expected}")]
    MisplacedAggregate {
        bucket: usize,
        expected: usize,
        hash: u64,
    },
    #[error("aggregate for hash {hash:#x} in bucket {bucket} holds two equal keys")]
    DuplicateKey { bucket: usize, hash: u64 },
    #[error("aggregate for hash {hash:#x} in bucket {bucket} links {linked} of {stored} keys")]
    BrokenKeyList {
        bucket: usize,
        hash: u64,
        linked: usize,
        stored: usize,
    },
}
