//! Optional allocation and resize counters.
//!
//! A table only records into a `TableMetrics` it was handed through
//! `with_metrics`; there is no process-wide state. Several tables may share one
//! instance to aggregate their numbers.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct TableMetrics {
    allocations: AtomicU64,
    deallocations: AtomicU64,
    allocated_bytes: AtomicU64,
    resizes: AtomicU64,
    failed_resizes: AtomicU64,
}

/// Point-in-time copy of a [`TableMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Aggregate nodes, key nodes and bucket arrays created.
    pub allocations: u64,
    /// Aggregate nodes, key nodes and bucket arrays released by erase or resize.
    pub deallocations: u64,
    /// Bytes requested by the allocations above.
    pub allocated_bytes: u64,
    pub resizes: u64,
    /// Resizes abandoned because the new bucket array could not be allocated.
    pub failed_resizes: u64,
}

impl TableMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            allocations: self.allocations.load(Ordering::Relaxed),
            deallocations: self.deallocations.load(Ordering::Relaxed),
            allocated_bytes: self.allocated_bytes.load(Ordering::Relaxed),
            resizes: self.resizes.load(Ordering::Relaxed),
            failed_resizes: self.failed_resizes.load(Ordering::Relaxed),
        }
    }

    #[inline]
    pub(crate) fn record_alloc(&self, count: u64, bytes: usize) {
        self.allocations.fetch_add(count, Ordering::Relaxed);
        self.allocated_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_dealloc(&self, count: u64) {
        self.deallocations.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_resize(&self) {
        self.resizes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_failed_resize(&self) {
        self.failed_resizes.fetch_add(1, Ordering::Relaxed);
    }
}
