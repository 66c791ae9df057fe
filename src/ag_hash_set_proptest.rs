#![cfg(test)]

// Property tests for AgHashSet kept inside the crate so the full structural
// audit runs after every step.

use crate::ag_hash_set::AgHashSet;
use crate::config::TableConfig;
use crate::equality::DefaultEq;
use crate::error::InsertError;
use crate::hash::{DefaultKeyHasher, FnHasher, KeyHasher};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::collections::{BTreeSet, HashSet};

#[derive(Clone, Debug)]
enum Op {
    Insert(i32),
    Remove(i32),
    Contains(i32),
    Find(i32),
    Iterate,
    Clear,
}

// Keys come from a small range so duplicates and removals of live keys are common.
fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    let key = -64i32..64;
    let op = prop_oneof![
        6 => key.clone().prop_map(Op::Insert),
        3 => key.clone().prop_map(Op::Remove),
        2 => key.clone().prop_map(Op::Contains),
        2 => key.prop_map(Op::Find),
        1 => Just(Op::Iterate),
        1 => Just(Op::Clear),
    ];
    proptest::collection::vec(op, 1..200)
}

// Small starting array and factor 2 so resizes happen often.
fn small_config() -> TableConfig {
    TableConfig::default().initial_buckets(1).growth_factor(2)
}

fn run_state_machine<S: KeyHasher<i32>>(
    mut sut: AgHashSet<i32, S>,
    ops: Vec<Op>,
) -> Result<AgHashSet<i32, S>, TestCaseError> {
    let mut model: HashSet<i32> = HashSet::new();
    for op in ops {
        match op {
            Op::Insert(k) => {
                let fresh = !model.contains(&k);
                match sut.try_insert(k) {
                    Ok(()) => {
                        prop_assert!(fresh, "insert must fail on duplicate");
                        model.insert(k);
                    }
                    Err(InsertError::DuplicateKey) => prop_assert!(!fresh),
                    Err(other) => prop_assert!(false, "unexpected insert error {other}"),
                }
            }
            Op::Remove(k) => {
                prop_assert_eq!(sut.remove(&k), model.remove(&k));
            }
            Op::Contains(k) => {
                prop_assert_eq!(sut.contains(&k), model.contains(&k));
            }
            Op::Find(k) => {
                let it = sut.find(&k);
                if model.contains(&k) {
                    prop_assert_eq!(it.get(), Some(&k));
                } else {
                    prop_assert!(it == sut.end());
                }
            }
            Op::Iterate => {
                let keys: Vec<i32> = sut.iter().copied().collect();
                prop_assert_eq!(keys.len(), sut.len());
                let distinct: BTreeSet<i32> = keys.iter().copied().collect();
                prop_assert_eq!(distinct.len(), keys.len(), "no key is yielded twice");
                prop_assert_eq!(distinct, model.iter().copied().collect::<BTreeSet<_>>());
                let hashes: Vec<_> = keys.iter().map(|k| sut.hasher().hash_key(k)).collect();
                prop_assert!(hashes.windows(2).all(|w| w[0] <= w[1]), "ascending hash order");
            }
            Op::Clear => {
                sut.clear();
                model.clear();
            }
        }

        prop_assert_eq!(sut.len(), model.len());
        prop_assert_eq!(sut.is_empty(), model.is_empty());
        if let Err(err) = sut.check_invariants() {
            prop_assert!(false, "invariant violated: {err}");
        }
    }
    Ok(sut)
}

// Property: state-machine equivalence against std::collections::HashSet.
// - Duplicate inserts are rejected and leave the set unchanged.
// - `contains`/`find` agree with the model; `remove` reports presence.
// - Iteration yields every live key exactly once in ascending hash order.
// - Counters and placement stay consistent across resizes.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine(ops in arb_ops()) {
        let sut = AgHashSet::with_config(&small_config(), DefaultKeyHasher::default(), DefaultEq);
        run_state_machine(sut, ops)?;
    }

    // Few distinct hash values: several keys per aggregate and several
    // aggregates per bucket.
    #[test]
    fn prop_state_machine_few_hashes(ops in arb_ops()) {
        let hasher = FnHasher::new(|k: &i32| k.rem_euclid(7) as u8);
        let sut = AgHashSet::with_config(&small_config(), hasher, DefaultEq);
        run_state_machine(sut, ops)?;
    }

    // Worst case: every key hashes to 0 and the table never grows.
    #[test]
    fn prop_state_machine_constant_hash(ops in arb_ops()) {
        let hasher = FnHasher::new(|_: &i32| 0u16);
        let sut = AgHashSet::with_config(&small_config(), hasher, DefaultEq);
        let sut = run_state_machine(sut, ops)?;
        prop_assert_eq!(sut.bucket_count(), 1);
    }
}
