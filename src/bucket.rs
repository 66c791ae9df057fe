//! Buckets: one slot of the bucket array, holding the aggregates whose hash
//! masks to it.

use crate::aggregate::{AggregateNode, AppendError, KeyNode, NodeKey};
use crate::config::Geometry;
use crate::equality::KeyEq;
use crate::error::{InsertError, InvariantError};
use crate::hash::HashValue;
use core::mem::size_of;
use std::collections::TryReserveError;

/// Per-bucket counters exposed for testing and tuning.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BucketStats {
    /// Keys stored in the bucket across all of its aggregates.
    pub key_count: usize,
    /// Distinct hash values present, i.e. the number of aggregates.
    pub hash_count: usize,
}

/// What a successful insert had to create.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Inserted {
    IntoExisting,
    NewAggregate,
}

impl Inserted {
    /// Nodes created and the bytes they occupy.
    pub(crate) fn footprint<K, H>(self) -> (u64, usize) {
        match self {
            Inserted::IntoExisting => (1, size_of::<KeyNode<K>>()),
            Inserted::NewAggregate => (
                2,
                size_of::<KeyNode<K>>() + size_of::<AggregateNode<K, H>>(),
            ),
        }
    }
}

/// What a successful erase released.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Erased {
    KeyOnly,
    KeyAndAggregate,
}

impl Erased {
    pub(crate) fn released(self) -> u64 {
        match self {
            Erased::KeyOnly => 1,
            Erased::KeyAndAggregate => 2,
        }
    }
}

/// Aggregates are unordered; removal swaps the last one into the hole.
#[derive(Debug)]
pub(crate) struct Bucket<K, H> {
    key_count: usize,
    aggregates: Vec<AggregateNode<K, H>>,
}

impl<K, H> Default for Bucket<K, H> {
    fn default() -> Self {
        Self {
            key_count: 0,
            aggregates: Vec::new(),
        }
    }
}

impl<K, H: HashValue> Bucket<K, H> {
    #[inline]
    pub(crate) fn stats(&self) -> BucketStats {
        BucketStats {
            key_count: self.key_count,
            hash_count: self.aggregates.len(),
        }
    }

    #[inline]
    pub(crate) fn aggregates(&self) -> &[AggregateNode<K, H>] {
        &self.aggregates
    }

    #[inline]
    pub(crate) fn aggregate(&self, hash: H) -> Option<&AggregateNode<K, H>> {
        self.aggregates.iter().find(|a| a.hash() == hash)
    }

    pub(crate) fn locate<E: KeyEq<K>>(
        &self,
        hash: H,
        key: &K,
        eq: &E,
    ) -> Option<(&AggregateNode<K, H>, NodeKey)> {
        let aggregate = self.aggregate(hash)?;
        aggregate.find(key, eq).map(|node| (aggregate, node))
    }

    pub(crate) fn contains<E: KeyEq<K>>(&self, hash: H, key: &K, eq: &E) -> bool {
        self.aggregate(hash)
            .is_some_and(|a| a.find(key, eq).is_some())
    }

    /// Adds `key` unless an equal key shares its hash. Every allocation is
    /// reserved before anything is linked, so a failure leaves the bucket
    /// untouched.
    pub(crate) fn try_insert<E: KeyEq<K>>(
        &mut self,
        hash: H,
        key: K,
        eq: &E,
    ) -> Result<Inserted, InsertError> {
        if let Some(aggregate) = self.aggregates.iter_mut().find(|a| a.hash() == hash) {
            match aggregate.append(key, eq) {
                Ok(_) => {}
                Err(AppendError::Duplicate(_)) => return Err(InsertError::DuplicateKey),
                Err(AppendError::NoRoom(err)) => {
                    tracing::warn!(error = %err, "could not reserve room for a key node");
                    return Err(InsertError::AllocationFailed);
                }
            }
            self.key_count += 1;
            return Ok(Inserted::IntoExisting);
        }

        let aggregate = self
            .aggregates
            .try_reserve(1)
            .and_then(|()| AggregateNode::try_with_key(hash, key))
            .map_err(|err| {
                tracing::warn!(error = %err, "could not reserve room for a new aggregate");
                InsertError::AllocationFailed
            })?;
        self.aggregates.push(aggregate);
        self.key_count += 1;
        Ok(Inserted::NewAggregate)
    }

    /// Removes the key equal to `key`; an aggregate left empty is dropped at once.
    pub(crate) fn erase<E: KeyEq<K>>(&mut self, hash: H, key: &K, eq: &E) -> Option<Erased> {
        let pos = self.aggregates.iter().position(|a| a.hash() == hash)?;
        self.aggregates[pos].remove(key, eq)?;
        self.key_count -= 1;
        if self.aggregates[pos].key_count() == 0 {
            self.aggregates.swap_remove(pos);
            Some(Erased::KeyAndAggregate)
        } else {
            Some(Erased::KeyOnly)
        }
    }

    /// Takes every aggregate out, leaving the bucket empty.
    pub(crate) fn take_aggregates(&mut self) -> Vec<AggregateNode<K, H>> {
        self.key_count = 0;
        std::mem::take(&mut self.aggregates)
    }

    /// Links an aggregate moved here from another bucket as a unit.
    pub(crate) fn adopt(&mut self, aggregate: AggregateNode<K, H>) {
        self.key_count += aggregate.key_count();
        self.aggregates.push(aggregate);
    }

    /// Drops every key; returns how many nodes were released.
    pub(crate) fn clear(&mut self) -> u64 {
        let released = self.key_count + self.aggregates.len();
        self.take_aggregates();
        released as u64
    }

    /// Walks the bucket at position `index` and checks every structural rule.
    /// Returns the number of keys actually linked.
    pub(crate) fn audit<E: KeyEq<K>>(
        &self,
        index: usize,
        geometry: &Geometry,
        eq: &E,
    ) -> Result<usize, InvariantError> {
        let mut actual = 0;
        for (i, aggregate) in self.aggregates.iter().enumerate() {
            let hash = aggregate.hash();
            let stored = aggregate.key_count();
            if stored == 0 {
                return Err(InvariantError::EmptyAggregate { bucket: index });
            }
            let expected = geometry.index(hash);
            if expected != index {
                return Err(InvariantError::MisplacedAggregate {
                    bucket: index,
                    expected,
                    hash: hash.to_u64(),
                });
            }
            if self.aggregates[..i].iter().any(|a| a.hash() == hash) {
                return Err(InvariantError::DuplicateHash {
                    bucket: index,
                    hash: hash.to_u64(),
                });
            }

            let keys: Vec<&K> = aggregate.keys().collect();
            if keys.len() != stored {
                return Err(InvariantError::BrokenKeyList {
                    bucket: index,
                    hash: hash.to_u64(),
                    linked: keys.len(),
                    stored,
                });
            }
            for (j, key) in keys.iter().enumerate() {
                if keys[..j].iter().any(|other| eq.keys_equal(other, key)) {
                    return Err(InvariantError::DuplicateKey {
                        bucket: index,
                        hash: hash.to_u64(),
                    });
                }
            }
            actual += stored;
        }

        if actual != self.key_count {
            return Err(InvariantError::BucketKeyCount {
                bucket: index,
                recorded: self.key_count,
                actual,
            });
        }
        Ok(actual)
    }
}

/// Builds an array of `count` elements, reporting allocation failure instead
/// of aborting.
pub(crate) fn try_alloc_array<T>(
    count: usize,
    make: impl FnMut() -> T,
) -> Result<Vec<T>, TryReserveError> {
    let mut array = Vec::new();
    array.try_reserve_exact(count)?;
    array.resize_with(count, make);
    Ok(array)
}
