// Allocation failure suite.
//
// A global allocator refuses, on the current thread only, every request at or
// above a byte limit. Sizes are picked so that only the allocation under test
// crosses the limit: a grown bucket array, a bucket's aggregate slots, or an
// aggregate's key node arena.
//
// Core invariants exercised:
// - A failed resize is absorbed: the table stays usable at its old size and the
//   failure is counted.
// - A failed insert leaves the table exactly as it was and reports
//   `AllocationFailed`, never `DuplicateKey`.
use aggregate_set::{
    AgHashSet, ConcurrentAgHashSet, DefaultEq, FnHasher, InsertError, TableConfig, TableMetrics,
};
use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::sync::Arc;

thread_local! {
    static FAIL_FROM: Cell<usize> = const { Cell::new(usize::MAX) };
}

struct LimitedAlloc;

unsafe impl GlobalAlloc for LimitedAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let limit = FAIL_FROM.try_with(Cell::get).unwrap_or(usize::MAX);
        if layout.size() >= limit {
            return std::ptr::null_mut();
        }
        System.alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout)
    }
}

#[global_allocator]
static ALLOC: LimitedAlloc = LimitedAlloc;

/// Runs `f` with every allocation of at least `bytes` failing on this thread.
fn failing_from<T>(bytes: usize, f: impl FnOnce() -> T) -> T {
    FAIL_FROM.with(|c| c.set(bytes));
    let out = f();
    FAIL_FROM.with(|c| c.set(usize::MAX));
    out
}

// Grown arrays hold 256 buckets, far above this; per-insert allocations stay
// well below it.
const ARRAY_LIMIT: usize = 4096;
// Below the smallest growth of a bucket's aggregate slots or of a key arena
// that has run out of room.
const NODE_LIMIT: usize = 64;

// Five hash values, all masking to bucket 0 of a 64-bucket table.
fn five_hashes() -> FnHasher<impl Fn(&u32) -> u32 + Clone, u32> {
    FnHasher::new(|k: &u32| (k % 5) * 64)
}

fn constant() -> FnHasher<impl Fn(&u32) -> u32 + Clone, u32> {
    FnHasher::new(|_: &u32| 0)
}

// Test: the ninth key crosses both growth gates while the larger array
// cannot be allocated.
// Verifies: the insert still succeeds, the table keeps 64 buckets, the failure
// is counted, and the next insert grows the table normally.
#[test]
fn failed_resize_keeps_old_table() {
    let metrics = Arc::new(TableMetrics::new());
    let cfg = TableConfig::default().initial_buckets(64);
    let mut set =
        AgHashSet::with_config(&cfg, five_hashes(), DefaultEq).with_metrics(metrics.clone());
    for k in 0..8u32 {
        set.try_insert(k).unwrap();
    }
    assert_eq!(metrics.snapshot().failed_resizes, 0);

    let outcome = failing_from(ARRAY_LIMIT, || set.try_insert(8));
    assert_eq!(outcome, Ok(()));
    assert_eq!(set.bucket_count(), 64);
    assert_eq!(set.len(), 9);
    let snap = metrics.snapshot();
    assert_eq!(snap.failed_resizes, 1);
    assert_eq!(snap.resizes, 0);
    for k in 0..9u32 {
        assert!(set.contains(&k), "key {k} lost after failed resize");
    }
    set.check_invariants().unwrap();

    set.try_insert(9).unwrap();
    assert_eq!(set.bucket_count(), 256);
    assert_eq!(metrics.snapshot().resizes, 1);
    assert_eq!(set.iter().count(), 10);
    set.check_invariants().unwrap();
}

// Test: same trigger on the concurrent set.
// Verifies: the structural lock is released and the table stays usable.
#[test]
fn concurrent_failed_resize_keeps_old_table() {
    let metrics = Arc::new(TableMetrics::new());
    let cfg = TableConfig::default().initial_buckets(64);
    let set = ConcurrentAgHashSet::with_config(&cfg, five_hashes(), DefaultEq)
        .with_metrics(metrics.clone());
    for k in 0..8u32 {
        set.try_insert(k).unwrap();
    }

    assert_eq!(failing_from(ARRAY_LIMIT, || set.try_insert(8)), Ok(()));
    assert_eq!(set.bucket_count(), 64);
    assert_eq!(metrics.snapshot().failed_resizes, 1);
    assert!((0..9u32).all(|k| set.contains(&k)));
    set.check_invariants().unwrap();

    assert!(set.remove(&3));
    assert!(set.insert(3));
    assert!(set.insert(9));
    assert_eq!(set.bucket_count(), 256);
    set.check_invariants().unwrap();
}

// Test: the first key of a new hash value cannot get an aggregate slot.
// Verifies: `AllocationFailed`, nothing stored, and the same key inserts fine
// once memory is available.
#[test]
fn failed_new_aggregate_leaves_table_unchanged() {
    let metrics = Arc::new(TableMetrics::new());
    let mut set: AgHashSet<u32, _> =
        AgHashSet::with_hasher(five_hashes()).with_metrics(metrics.clone());

    let outcome = failing_from(NODE_LIMIT, || set.try_insert(1));
    assert_eq!(outcome, Err(InsertError::AllocationFailed));
    assert!(set.is_empty());
    assert!(!set.contains(&1));
    assert_eq!(set.bucket_stats(set.bucket_of(&1)), Some(Default::default()));
    assert_eq!(metrics.snapshot().allocations, 0);
    set.check_invariants().unwrap();

    assert_eq!(set.try_insert(1), Ok(()));
    assert_eq!(set.len(), 1);
}

// Test: keys sharing one hash fill their aggregate's arena until growing it
// fails.
// Verifies: the failing key is reported as `AllocationFailed` rather than a
// duplicate, earlier keys and counters are untouched, and a retry succeeds.
#[test]
fn failed_key_node_leaves_aggregate_unchanged() {
    let mut set: AgHashSet<u32, _> = AgHashSet::with_hasher(constant());
    set.try_insert(0).unwrap();

    let (failed, outcome, len_before) = failing_from(NODE_LIMIT, || {
        let mut k = 1;
        loop {
            let len_before = set.len();
            let outcome = set.try_insert(k);
            if outcome.is_err() || k == 64 {
                return (k, outcome, len_before);
            }
            k += 1;
        }
    });
    assert_eq!(outcome, Err(InsertError::AllocationFailed));
    assert_eq!(set.len(), len_before);
    assert_eq!(set.len(), failed as usize);
    assert!(!set.contains(&failed));
    assert!((0..failed).all(|k| set.contains(&k)));
    let stats = set.bucket_stats(0).unwrap();
    assert_eq!(stats.key_count, set.len());
    assert_eq!(stats.hash_count, 1);
    set.check_invariants().unwrap();

    assert_eq!(set.try_insert(failed), Ok(()));
    assert_eq!(set.try_insert(failed), Err(InsertError::DuplicateKey));
    set.check_invariants().unwrap();
}

// Test: a concurrent insert that cannot reserve its node.
// Verifies: the bucket lock is released and `len` is not bumped.
#[test]
fn concurrent_failed_insert_is_unwound() {
    let set = ConcurrentAgHashSet::with_hasher(five_hashes());
    assert_eq!(
        failing_from(NODE_LIMIT, || set.try_insert(2)),
        Err(InsertError::AllocationFailed)
    );
    assert!(set.is_empty());
    assert!(!set.contains(&2));
    set.check_invariants().unwrap();
    assert!(set.insert(2));
    assert_eq!(set.get(&2), Some(2));
}
