//! Property Tests
//!
//! Random command sequences against a plain model of which keys are live.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;

use keyflow_core::keyed::{Demultiplexer, GroupMap};
use keyflow_core::reactive::{Broadcast, Subject};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Touch(u8),
    End(u8),
}

impl Op {
    fn key(&self) -> u8 {
        match self {
            Op::Touch(k) | Op::End(k) => *k,
        }
    }
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u8..6).prop_map(Op::Touch),
        1 => (0u8..6).prop_map(Op::End),
    ]
}

fn live_map(source: &Subject<Op>) -> Broadcast<GroupMap<u8, Op>> {
    Demultiplexer::new(Op::key)
        .with_transform(|ops, _| ops.take_while(|op| matches!(op, Op::Touch(_))))
        .split(&source.observable())
        .collect()
}

fn key_set(keys: Vec<u8>) -> BTreeSet<u8> {
    keys.into_iter().collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// The map holds exactly the keys whose latest group has not ended.
    #[test]
    fn map_keys_match_the_model(ops in prop::collection::vec(arb_op(), 0..64)) {
        let source = Subject::new();
        let map = live_map(&source);
        let _sub = map.subscribe_next(|_| {});

        let mut model = BTreeSet::new();
        for op in ops {
            source.next(op).unwrap();
            match op {
                Op::Touch(k) => { model.insert(k); }
                Op::End(k) => { model.remove(&k); }
            }
            let snapshot = map.latest().unwrap();
            prop_assert_eq!(key_set(snapshot.key_vec()), model.clone());
        }
    }

    /// Consecutive snapshots differ by exactly one key.
    #[test]
    fn snapshots_change_one_key_at_a_time(ops in prop::collection::vec(arb_op(), 1..48)) {
        let source = Subject::new();
        let map = live_map(&source);
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        let _sub = map.subscribe_next(move |snapshot| log_clone.lock().push(key_set(snapshot.key_vec())));

        for op in ops {
            source.next(op).unwrap();
        }

        let log = log.lock();
        prop_assert!(log[0].is_empty());
        for pair in log.windows(2) {
            let changed = pair[0].symmetric_difference(&pair[1]).count();
            prop_assert_eq!(changed, 1);
        }
    }

    /// A late subscriber's first snapshot equals the folded state.
    #[test]
    fn late_subscriber_sees_the_folded_state(ops in prop::collection::vec(arb_op(), 0..48)) {
        let source = Subject::new();
        let map = live_map(&source);
        let _early = map.subscribe_next(|_| {});

        let mut expected = BTreeSet::new();
        for op in ops {
            source.next(op).unwrap();
            match op {
                Op::Touch(k) => { expected.insert(k); }
                Op::End(k) => { expected.remove(&k); }
            }
        }

        let first = Arc::new(Mutex::new(None));
        let first_clone = first.clone();
        let _late = map.subscribe_next(move |snapshot| {
            first_clone.lock().get_or_insert_with(|| key_set(snapshot.key_vec()));
        });

        prop_assert_eq!(first.lock().clone(), Some(expected));
    }
}
