//! Aggregate nodes: every stored key sharing one exact hash value within a
//! bucket, kept as a singly linked list of key nodes.
//!
//! Key nodes live in a per-aggregate slot arena and link to each other by
//! generational `NodeKey`. The aggregate owns its arena, so moving an aggregate
//! to another bucket moves its whole key list without touching the keys, and
//! dropping it frees the list without recursion.

use crate::equality::KeyEq;
use crate::hash::HashValue;
use slotmap::{new_key_type, SlotMap};
use std::collections::TryReserveError;

new_key_type! {
    /// Stable handle to a key node within its aggregate.
    pub(crate) struct NodeKey;
}

#[derive(Debug)]
pub(crate) struct KeyNode<K> {
    pub(crate) key: K,
    next: Option<NodeKey>,
}

/// Why `append` did not link its key.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum AppendError<K> {
    /// An equal key is present; the rejected key is handed back.
    Duplicate(K),
    /// The arena could not grow to hold one more node.
    NoRoom(TryReserveError),
}

#[derive(Debug)]
pub(crate) struct AggregateNode<K, H> {
    hash: H,
    head: Option<NodeKey>,
    nodes: SlotMap<NodeKey, KeyNode<K>>,
}

impl<K, H: HashValue> AggregateNode<K, H> {
    /// A new aggregate always starts with the key that created it.
    pub(crate) fn try_with_key(hash: H, key: K) -> Result<Self, TryReserveError> {
        let mut nodes = SlotMap::with_key();
        nodes.try_reserve(1)?;
        let head = nodes.insert(KeyNode { key, next: None });
        Ok(Self {
            hash,
            head: Some(head),
            nodes,
        })
    }

    #[inline]
    pub(crate) fn hash(&self) -> H {
        self.hash
    }

    #[inline]
    pub(crate) fn key_count(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub(crate) fn head(&self) -> Option<NodeKey> {
        self.head
    }

    #[inline]
    pub(crate) fn node(&self, node: NodeKey) -> Option<&KeyNode<K>> {
        self.nodes.get(node)
    }

    #[inline]
    pub(crate) fn next_of(&self, node: NodeKey) -> Option<NodeKey> {
        self.nodes.get(node).and_then(|n| n.next)
    }

    pub(crate) fn find<E: KeyEq<K>>(&self, key: &K, eq: &E) -> Option<NodeKey> {
        let mut cur = self.head;
        while let Some(id) = cur {
            let node = &self.nodes[id];
            if eq.keys_equal(&node.key, key) {
                return Some(id);
            }
            cur = node.next;
        }
        None
    }

    /// Append `key` at the tail unless an equal key is present. The list is
    /// untouched on error.
    pub(crate) fn append<E: KeyEq<K>>(
        &mut self,
        key: K,
        eq: &E,
    ) -> Result<NodeKey, AppendError<K>> {
        let mut tail = None;
        let mut cur = self.head;
        while let Some(id) = cur {
            let node = &self.nodes[id];
            if eq.keys_equal(&node.key, &key) {
                return Err(AppendError::Duplicate(key));
            }
            tail = Some(id);
            cur = node.next;
        }

        self.nodes.try_reserve(1).map_err(AppendError::NoRoom)?;
        let id = self.nodes.insert(KeyNode { key, next: None });
        match tail {
            Some(t) => self.nodes[t].next = Some(id),
            None => self.head = Some(id),
        }
        Ok(id)
    }

    pub(crate) fn remove<E: KeyEq<K>>(&mut self, key: &K, eq: &E) -> Option<K> {
        let mut prev: Option<NodeKey> = None;
        let mut cur = self.head;
        while let Some(id) = cur {
            let node = &self.nodes[id];
            if eq.keys_equal(&node.key, key) {
                let next = node.next;
                match prev {
                    Some(p) => self.nodes[p].next = next,
                    None => self.head = next,
                }
                return self.nodes.remove(id).map(|n| n.key);
            }
            prev = Some(id);
            cur = node.next;
        }
        None
    }

    /// Keys in list order.
    pub(crate) fn keys(&self) -> Keys<'_, K, H> {
        Keys {
            aggregate: self,
            cur: self.head,
        }
    }

    /// Keys from `start` (inclusive) to the end of the list.
    pub(crate) fn keys_from(&self, start: NodeKey) -> Keys<'_, K, H> {
        Keys {
            aggregate: self,
            cur: Some(start),
        }
    }
}

pub(crate) struct Keys<'a, K, H> {
    aggregate: &'a AggregateNode<K, H>,
    cur: Option<NodeKey>,
}

impl<'a, K, H> Iterator for Keys<'a, K, H> {
    type Item = &'a K;

    fn next(&mut self) -> Option<&'a K> {
        let node = self.aggregate.nodes.get(self.cur?)?;
        self.cur = node.next;
        Some(&node.key)
    }
}
