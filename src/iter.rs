//! Ascending-hash traversal.
//!
//! Iteration order is by hash value across the whole table, not by bucket.
//! Advancing past an aggregate probes successive hash values for the next
//! live aggregate. Failed probes are budgeted per traversal at the bucket
//! count; once the budget is spent (a sparse hash space) the walk takes one
//! pass over the buckets to collect the remaining live hashes and pops them in
//! ascending order, still resolving each through a probe by hash.

use crate::aggregate::{AggregateNode, NodeKey};
use crate::ag_hash_set::AgHashSet;
use crate::hash::{HashValue, KeyHasher};
use core::fmt;
use core::iter::FusedIterator;

#[derive(Clone, Debug)]
pub(crate) struct HashWalk<H> {
    budget: usize,
    // Descending, so `pop` yields the next hash.
    frontier: Option<Vec<H>>,
}

impl<H: HashValue> HashWalk<H> {
    pub(crate) fn new(budget: usize) -> Self {
        Self {
            budget,
            frontier: None,
        }
    }

    /// Finds the first hash above `after` for which `probe` succeeds.
    /// `collect_after(h)` must return every live hash greater than `h`.
    pub(crate) fn next_after<T>(
        &mut self,
        after: H,
        mut probe: impl FnMut(H) -> Option<T>,
        collect_after: impl FnOnce(H) -> Vec<H>,
    ) -> Option<T> {
        if self.frontier.is_none() {
            let mut hash = after;
            while self.budget > 0 {
                hash = hash.successor()?;
                if let Some(found) = probe(hash) {
                    return Some(found);
                }
                self.budget -= 1;
            }
            let mut pending = collect_after(hash);
            pending.sort_unstable_by(|a, b| b.cmp(a));
            pending.dedup();
            self.frontier = Some(pending);
        }

        let frontier = self.frontier.as_mut()?;
        while let Some(hash) = frontier.pop() {
            if let Some(found) = probe(hash) {
                return Some(found);
            }
        }
        None
    }
}

struct Position<'a, K, H> {
    aggregate: &'a AggregateNode<K, H>,
    node: NodeKey,
}

impl<K, H> Clone for Position<'_, K, H> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K, H> Copy for Position<'_, K, H> {}

impl<'a, K, H: HashValue> Position<'a, K, H> {
    fn first(aggregate: &'a AggregateNode<K, H>) -> Option<Self> {
        aggregate.head().map(|node| Self { aggregate, node })
    }
}

/// Forward iterator over an [`AgHashSet`] in ascending hash order.
///
/// Holds a shared borrow of the set, so the set cannot be mutated while an
/// iterator is alive. Two iterators compare equal when they sit on the same
/// key node of the same set; every exhausted iterator equals `set.end()`.
pub struct Iter<'a, K, S: KeyHasher<K>, E> {
    set: &'a AgHashSet<K, S, E>,
    position: Option<Position<'a, K, S::Hash>>,
    walk: HashWalk<S::Hash>,
}

impl<'a, K, S: KeyHasher<K>, E> Iter<'a, K, S, E> {
    pub(crate) fn end(set: &'a AgHashSet<K, S, E>) -> Self {
        Self {
            set,
            position: None,
            walk: HashWalk::new(set.bucket_count()),
        }
    }

    pub(crate) fn begin(set: &'a AgHashSet<K, S, E>) -> Self {
        let mut it = Self::end(set);
        let zero = <S::Hash as HashValue>::ZERO;
        let first = set.aggregate(zero).or_else(|| {
            it.walk
                .next_after(zero, |h| set.aggregate(h), |h| set.live_hashes_after(h))
        });
        it.position = first.and_then(Position::first);
        it
    }

    pub(crate) fn at(
        set: &'a AgHashSet<K, S, E>,
        aggregate: &'a AggregateNode<K, S::Hash>,
        node: NodeKey,
    ) -> Self {
        let mut it = Self::end(set);
        it.position = Some(Position { aggregate, node });
        it
    }

    /// The key the iterator sits on, without advancing.
    pub fn get(&self) -> Option<&'a K> {
        let pos = self.position?;
        pos.aggregate.node(pos.node).map(|n| &n.key)
    }

    pub fn is_end(&self) -> bool {
        self.position.is_none()
    }
}

impl<'a, K, S: KeyHasher<K>, E> Iterator for Iter<'a, K, S, E> {
    type Item = &'a K;

    fn next(&mut self) -> Option<&'a K> {
        let pos = self.position?;
        let key = &pos.aggregate.node(pos.node)?.key;
        self.position = match pos.aggregate.next_of(pos.node) {
            Some(node) => Some(Position {
                aggregate: pos.aggregate,
                node,
            }),
            None => {
                let set = self.set;
                self.walk
                    .next_after(
                        pos.aggregate.hash(),
                        |h| set.aggregate(h),
                        |h| set.live_hashes_after(h),
                    )
                    .and_then(Position::first)
            }
        };
        Some(key)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.position.is_some() {
            (1, Some(self.set.len()))
        } else {
            (0, Some(0))
        }
    }
}

impl<K, S: KeyHasher<K>, E> FusedIterator for Iter<'_, K, S, E> {}

impl<K, S: KeyHasher<K>, E> Clone for Iter<'_, K, S, E> {
    fn clone(&self) -> Self {
        Self {
            set: self.set,
            position: self.position,
            walk: self.walk.clone(),
        }
    }
}

impl<K, S: KeyHasher<K>, E> PartialEq for Iter<'_, K, S, E> {
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self.set, other.set)
            && match (self.position, other.position) {
                (None, None) => true,
                (Some(a), Some(b)) => core::ptr::eq(a.aggregate, b.aggregate) && a.node == b.node,
                _ => false,
            }
    }
}

impl<K, S: KeyHasher<K>, E> Eq for Iter<'_, K, S, E> {}

impl<K: fmt::Debug, S: KeyHasher<K>, E> fmt::Debug for Iter<'_, K, S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iter").field("current", &self.get()).finish()
    }
}
