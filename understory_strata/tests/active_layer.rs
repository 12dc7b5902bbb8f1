// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Randomized checks of active-layer resolution.
//!
//! Random set/remove sequences across the baseline and a handful of override
//! layers are applied both to the store and to a naive model that re-scans
//! every layer. The cached state of a live flyweight must always match the
//! model.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use proptest::prelude::*;
use understory_strata::{Layer, ObjectId, StrataStore};

const ID: ObjectId = ObjectId::from_u128(42);
const NAME: &str = "Value";

#[derive(Clone, Debug)]
enum Op {
    Set(Layer, u16),
    Remove(Layer),
    RemoveLayer(Layer),
    RemoveObject,
}

fn layer_strategy() -> impl Strategy<Value = Layer> {
    prop_oneof![
        1 => Just(Layer::Baseline),
        4 => (0_u32..6).prop_map(Layer::Override),
    ]
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (layer_strategy(), any::<u16>()).prop_map(|(layer, value)| Op::Set(layer, value)),
        4 => layer_strategy().prop_map(Op::Remove),
        1 => layer_strategy().prop_map(Op::RemoveLayer),
        1 => Just(Op::RemoveObject),
    ]
}

/// Reference model: every layer's value, resolved by scanning.
#[derive(Default)]
struct Model {
    values: BTreeMap<Layer, u16>,
}

impl Model {
    fn apply(&mut self, op: &Op) {
        match op {
            Op::Set(layer, value) => {
                self.values.insert(*layer, *value);
            }
            Op::Remove(layer) | Op::RemoveLayer(layer) => {
                self.values.remove(layer);
            }
            Op::RemoveObject => self.values.clear(),
        }
    }

    fn active(&self) -> Option<(Layer, u16)> {
        self.values
            .iter()
            .next_back()
            .map(|(layer, value)| (*layer, *value))
    }
}

fn apply(store: &StrataStore, op: &Op) {
    match op {
        Op::Set(layer, value) => store.set_value(ID, *layer, NAME, *value),
        Op::Remove(layer) => {
            store.remove_value(ID, *layer, NAME);
        }
        Op::RemoveLayer(layer) => {
            store.remove_layer(*layer);
        }
        Op::RemoveObject => {
            store.remove_object(ID);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

    #[test]
    fn cached_active_layer_matches_rescan(ops in prop::collection::vec(op_strategy(), 0..64)) {
        let store = StrataStore::new();
        let access = store.property::<u16>(ID, NAME);
        let mut model = Model::default();

        for op in &ops {
            apply(&store, op);
            model.apply(op);

            let expected = model.active();
            prop_assert_eq!(access.active_layer(), expected.map(|(layer, _)| layer));
            prop_assert_eq!(access.try_get().ok().flatten(), expected.map(|(_, value)| value));
            prop_assert_eq!(access.is_baseline_set(), model.values.contains_key(&Layer::Baseline));
            prop_assert_eq!(store.active_layer(ID, NAME), access.active_layer());
        }
    }

    #[test]
    fn late_flyweight_agrees_with_early_one(ops in prop::collection::vec(op_strategy(), 0..48)) {
        let store = StrataStore::new();
        let early = store.property::<u16>(ID, NAME);
        for op in &ops {
            apply(&store, op);
        }
        let late = store.property::<u16>(ID, NAME);
        prop_assert_eq!(early.active_layer(), late.active_layer());
        prop_assert_eq!(early.is_baseline_set(), late.is_baseline_set());
        prop_assert_eq!(early.get_or_default(), late.get_or_default());
    }

    #[test]
    fn value_events_track_effective_value(ops in prop::collection::vec(op_strategy(), 0..48)) {
        let store = StrataStore::new();
        let access = store.property::<u16>(ID, NAME);
        let last = Rc::new(RefCell::new(None));
        let _sub = {
            let last = last.clone();
            access.on_value_changed(move |change| *last.borrow_mut() = Some(change.new))
        };
        let mut model = Model::default();

        for op in &ops {
            let before = model.active();
            *last.borrow_mut() = None;
            apply(&store, op);
            model.apply(op);
            let after = model.active();

            if before.map(|(_, v)| v) != after.map(|(_, v)| v) {
                prop_assert_eq!(*last.borrow(), Some(after.map_or(0, |(_, v)| v)));
            }
            if before == after && !matches!(op, Op::Set(..)) {
                prop_assert_eq!(*last.borrow(), None);
            }
        }
    }
}
