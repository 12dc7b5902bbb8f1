// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-property access coordination.
//!
//! A [`Coordinator`] exists for every (object, property) pair that currently
//! has at least one flyweight attached. It caches the active layer and the
//! baseline-set flag, turns raw [`LayerEvent`]s into [`PropertyEvent`]s, and
//! fans those out to the attached flyweights.

use alloc::rc::Rc;
use core::cell::Cell;

use crate::error::StrataError;
use crate::id::{Layer, ObjectId, layer_index};
use crate::layers::{ElementChange, LayerEvent, LayerStore};
use crate::observer::{ObserverList, Subscription};
use crate::value::StoredValue;

/// What happened to a property, as seen by its coordinator.
#[derive(Clone, Debug)]
pub enum PropertyEventKind {
    /// A value was written at `layer`.
    Set {
        /// Layer written to.
        layer: Layer,
        /// Value previously stored at that layer.
        old: Option<StoredValue>,
        /// Value now stored at that layer.
        new: StoredValue,
    },
    /// The value at `layer` was removed.
    Removed {
        /// Layer removed from.
        layer: Layer,
        /// The removed value.
        old: StoredValue,
    },
    /// One element of the list stored at `layer` changed.
    Element {
        /// Layer holding the list.
        layer: Layer,
        /// What changed.
        change: ElementChange,
    },
    /// The indexed sub-property `Name[index]` changed at `layer`.
    IndexedElement {
        /// Element index.
        index: usize,
        /// Layer of the change.
        layer: Layer,
    },
    /// The whole object was removed from the store.
    Cleared,
}

impl PropertyEventKind {
    /// Returns the layer the change happened at, if it concerns one layer.
    #[must_use]
    pub fn layer(&self) -> Option<Layer> {
        match self {
            Self::Set { layer, .. }
            | Self::Removed { layer, .. }
            | Self::Element { layer, .. }
            | Self::IndexedElement { layer, .. } => Some(*layer),
            Self::Cleared => None,
        }
    }
}

/// A change to one (object, property) pair.
///
/// `old_value` and `new_value` hold the effective (active-layer) values before
/// and after the change. They are only populated for scalar sets and removals
/// that changed the effective value; element-level changes leave them empty.
#[derive(Clone, Debug)]
pub struct PropertyEvent {
    /// Object the property belongs to.
    pub object: ObjectId,
    /// Property name.
    pub property: Rc<str>,
    /// What happened.
    pub kind: PropertyEventKind,
    /// Active layer before the change.
    pub previous_active: Option<Layer>,
    /// Active layer after the change.
    pub active: Option<Layer>,
    /// Whether the baseline held a value before the change.
    pub was_baseline_set: bool,
    /// Whether the baseline holds a value after the change.
    pub baseline_set: bool,
    /// Effective value before the change.
    pub old_value: Option<StoredValue>,
    /// Effective value after the change.
    pub new_value: Option<StoredValue>,
    value_changed: bool,
}

impl PropertyEvent {
    /// Returns `true` if the effective value (or, for lists, the effective
    /// sequence) may differ after this change.
    ///
    /// Writes to layers shadowed by a higher active layer do not change the
    /// effective value.
    #[must_use]
    #[inline]
    pub fn value_changed(&self) -> bool {
        self.value_changed
    }

    /// Returns `true` if the property is set after the change.
    #[must_use]
    #[inline]
    pub fn is_set(&self) -> bool {
        self.active.is_some()
    }

    /// Returns `true` if the property was set before the change.
    #[must_use]
    #[inline]
    pub fn was_set(&self) -> bool {
        self.previous_active.is_some()
    }
}

#[derive(Copy, Clone, Debug, Default)]
struct CoordinatorState {
    active: Option<Layer>,
    baseline_set: bool,
    attached: usize,
}

/// Active-layer cache and event hub for one (object, property) pair.
///
/// Coordinators are created and retired by the [`StrataStore`](crate::StrataStore);
/// callers interact with them through flyweights.
#[derive(Debug)]
pub struct Coordinator {
    object: ObjectId,
    property: Rc<str>,
    state: Cell<CoordinatorState>,
    observers: ObserverList<PropertyEvent>,
}

impl Coordinator {
    /// Creates a coordinator and resolves its initial state from `layers`.
    pub(crate) fn new(object: ObjectId, property: Rc<str>, layers: &LayerStore) -> Self {
        let coordinator = Self {
            object,
            property,
            state: Cell::new(CoordinatorState::default()),
            observers: ObserverList::new(),
        };
        let mut state = coordinator.state.get();
        state.active = coordinator.try_find_active_layer(layers);
        state.baseline_set = coordinator.baseline(layers).is_some();
        coordinator.state.set(state);
        coordinator
    }

    /// Returns the object this coordinator serves.
    #[must_use]
    pub fn object(&self) -> ObjectId {
        self.object
    }

    /// Returns the property this coordinator serves.
    #[must_use]
    pub fn property(&self) -> &str {
        &self.property
    }

    /// Returns the cached active layer.
    #[must_use]
    pub fn active_layer(&self) -> Option<Layer> {
        self.state.get().active
    }

    /// Returns the cached active layer as an integer index.
    #[must_use]
    pub fn active_layer_index(&self) -> i32 {
        layer_index(self.active_layer())
    }

    /// Returns the cached baseline-set flag.
    #[must_use]
    pub fn is_baseline_set(&self) -> bool {
        self.state.get().baseline_set
    }

    /// Returns how many flyweights are attached.
    #[must_use]
    pub fn attached(&self) -> usize {
        self.state.get().attached
    }

    /// Resolves the active layer by re-scanning every layer.
    ///
    /// This is the authoritative resolution; the cached value always equals
    /// it once an event has been handled.
    #[must_use]
    pub fn try_find_active_layer(&self, layers: &LayerStore) -> Option<Layer> {
        layers.highest_layer(self.object, &self.property)
    }

    /// Reads the baseline value as `T`.
    ///
    /// # Errors
    ///
    /// [`StrataError::TypeMismatch`] if the stored value is not a `T`.
    pub fn try_get_baseline_value<T: Clone + 'static>(
        &self,
        layers: &LayerStore,
    ) -> Result<Option<T>, StrataError> {
        self.baseline(layers).map(StoredValue::try_read).transpose()
    }

    /// Reads the value at exactly `layer` as `T`.
    ///
    /// # Errors
    ///
    /// [`StrataError::TypeMismatch`] if the stored value is not a `T`.
    pub fn try_get_override_value<T: Clone + 'static>(
        &self,
        layers: &LayerStore,
        layer: Layer,
    ) -> Result<Option<T>, StrataError> {
        layers
            .try_get_value(self.object, layer, &self.property)
            .map(StoredValue::try_read)
            .transpose()
    }

    /// Scans from `start` down to baseline (inclusive) and reads the first
    /// value found.
    ///
    /// This answers "what would show through if everything above `start`
    /// were removed".
    ///
    /// # Errors
    ///
    /// [`StrataError::TypeMismatch`] if the value found is not a `T`.
    pub fn search_for_first_set_value<T: Clone + 'static>(
        &self,
        layers: &LayerStore,
        start: Layer,
    ) -> Result<Option<(Layer, T)>, StrataError> {
        layers
            .first_set_at_or_below(self.object, &self.property, start)
            .map(|(layer, value)| value.try_read().map(|value| (layer, value)))
            .transpose()
    }

    /// Returns the raw value at the cached active layer.
    #[must_use]
    pub fn active_value<'a>(&self, layers: &'a LayerStore) -> Option<&'a StoredValue> {
        let layer = self.active_layer()?;
        layers.try_get_value(self.object, layer, &self.property)
    }

    fn baseline<'a>(&self, layers: &'a LayerStore) -> Option<&'a StoredValue> {
        layers.try_get_value(self.object, Layer::Baseline, &self.property)
    }

    pub(crate) fn observers(&self) -> &ObserverList<PropertyEvent> {
        &self.observers
    }

    /// Registers a raw observer for this coordinator's events.
    pub fn subscribe(&self, callback: impl Fn(&PropertyEvent) + 'static) -> Subscription {
        self.observers.subscribe(callback)
    }

    pub(crate) fn attach(&self) {
        let mut state = self.state.get();
        state.attached += 1;
        self.state.set(state);
    }

    /// Records that one flyweight detached, returning how many remain.
    pub(crate) fn handle_access_withdrawn(&self) -> usize {
        let mut state = self.state.get();
        debug_assert!(state.attached > 0, "withdraw without attach");
        state.attached = state.attached.saturating_sub(1);
        self.state.set(state);
        state.attached
    }

    /// Drops cached state and every observer.
    pub(crate) fn retire(&self) {
        self.observers.clear();
        self.state.set(CoordinatorState::default());
    }

    /// Applies a raw layer event for this property and describes its effect.
    ///
    /// `layers` must already reflect the event.
    pub(crate) fn apply(&self, layers: &LayerStore, event: &LayerEvent) -> PropertyEvent {
        let before = self.state.get();
        let kind = match event {
            LayerEvent::Set {
                layer, old, new, ..
            } => PropertyEventKind::Set {
                layer: *layer,
                old: old.clone(),
                new: new.clone(),
            },
            LayerEvent::Removed { layer, old, .. } => PropertyEventKind::Removed {
                layer: *layer,
                old: old.clone(),
            },
            LayerEvent::Element { layer, change, .. } => PropertyEventKind::Element {
                layer: *layer,
                change: change.clone(),
            },
            LayerEvent::ObjectRemoved { .. } => PropertyEventKind::Cleared,
        };

        let mut after = before;
        after.baseline_set = match &kind {
            PropertyEventKind::Set {
                layer: Layer::Baseline,
                ..
            } => true,
            PropertyEventKind::Removed {
                layer: Layer::Baseline,
                ..
            }
            | PropertyEventKind::Cleared => false,
            _ => before.baseline_set,
        };
        after.active = self.resolve(layers, before.active, &kind);
        self.state.set(after);

        let value_changed = match &kind {
            PropertyEventKind::Set { layer, .. } | PropertyEventKind::Element { layer, .. } => {
                after.active == Some(*layer) || after.active != before.active
            }
            PropertyEventKind::Removed { .. } | PropertyEventKind::IndexedElement { .. } => {
                after.active != before.active
            }
            PropertyEventKind::Cleared => before.active.is_some(),
        };

        let (old_value, new_value) = match &kind {
            PropertyEventKind::Set { layer, old, .. } if value_changed => (
                if before.active == Some(*layer) {
                    old.clone()
                } else {
                    self.value_at(layers, before.active)
                },
                self.value_at(layers, after.active),
            ),
            PropertyEventKind::Removed { layer, old } if value_changed => (
                if before.active == Some(*layer) {
                    Some(old.clone())
                } else {
                    self.value_at(layers, before.active)
                },
                self.value_at(layers, after.active),
            ),
            _ => (None, None),
        };

        PropertyEvent {
            object: self.object,
            property: self.property.clone(),
            kind,
            previous_active: before.active,
            active: after.active,
            was_baseline_set: before.baseline_set,
            baseline_set: after.baseline_set,
            old_value,
            new_value,
            value_changed,
        }
    }

    /// Describes a change to the indexed sub-property `Name[index]`.
    ///
    /// The coordinator's own state is untouched; the event only tells list
    /// flyweights using indexed storage to re-assemble.
    pub(crate) fn apply_indexed(&self, index: usize, layer: Layer) -> PropertyEvent {
        let state = self.state.get();
        PropertyEvent {
            object: self.object,
            property: self.property.clone(),
            kind: PropertyEventKind::IndexedElement { index, layer },
            previous_active: state.active,
            active: state.active,
            was_baseline_set: state.baseline_set,
            baseline_set: state.baseline_set,
            old_value: None,
            new_value: None,
            value_changed: true,
        }
    }

    /// Computes the active layer after `kind`.
    ///
    /// Sets only ever raise the active layer: an override write becomes
    /// active when its index is at least the cached one (equal means the
    /// active layer itself was rewritten). Removals at or above the cached
    /// layer re-scan. The re-scan stays the source of truth: if the
    /// incremental answer disagrees (possible when events are delivered while
    /// a batch is still being dispatched) the re-scan wins.
    fn resolve(
        &self,
        layers: &LayerStore,
        previous: Option<Layer>,
        kind: &PropertyEventKind,
    ) -> Option<Layer> {
        let incremental = match kind {
            PropertyEventKind::Set { layer, .. } => match previous {
                Some(active) if *layer < active => Some(active),
                _ => Some(*layer),
            },
            PropertyEventKind::Removed { layer, .. } => match previous {
                Some(active) if *layer < active => Some(active),
                _ => return self.try_find_active_layer(layers),
            },
            PropertyEventKind::Element { .. } | PropertyEventKind::IndexedElement { .. } => {
                previous
            }
            PropertyEventKind::Cleared => None,
        };
        let rescanned = self.try_find_active_layer(layers);
        if incremental != rescanned {
            tracing::debug!(
                object = %self.object,
                property = &*self.property,
                ?incremental,
                ?rescanned,
                "active layer re-resolved by scan"
            );
        }
        rescanned
    }

    fn value_at(&self, layers: &LayerStore, layer: Option<Layer>) -> Option<StoredValue> {
        layers
            .try_get_value(self.object, layer?, &self.property)
            .cloned()
    }
}
