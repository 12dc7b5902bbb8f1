// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Raw per-layer property storage.
//!
//! [`LayerStore`] is a flat, sparse three-dimensional map from
//! (object, layer, property name) to a [`StoredValue`]. It knows nothing about
//! precedence; that is the job of the coordinators built on top of it. Every
//! successful mutation queues a [`LayerEvent`], which the owner drains with
//! [`LayerStore::drain_events`] and routes to interested coordinators.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use hashbrown::HashMap;

use crate::error::StrataError;
use crate::id::{Layer, ObjectId};
use crate::value::{ElementList, StoredValue};

/// Properties stored at one layer of one object.
type LayerRecords = HashMap<String, StoredValue>;

/// A change to one element of a list stored at one layer.
#[derive(Clone, Debug)]
pub enum ElementChange {
    /// An element was inserted at `index`.
    Inserted {
        /// Position of the new element.
        index: usize,
        /// The inserted element.
        value: StoredValue,
    },
    /// The element at `index` was removed.
    Removed {
        /// Former position of the element.
        index: usize,
        /// The removed element.
        value: StoredValue,
    },
    /// An element moved from `from` to `to`.
    Moved {
        /// Former position.
        from: usize,
        /// New position.
        to: usize,
    },
    /// The element at `index` was overwritten.
    Replaced {
        /// Position of the element.
        index: usize,
        /// The previous element.
        old: StoredValue,
        /// The new element.
        new: StoredValue,
    },
    /// Every element was removed; the (now empty) list stays set.
    Cleared,
}

/// A domain event queued by every successful [`LayerStore`] mutation.
#[derive(Clone, Debug)]
pub enum LayerEvent {
    /// A value was written at a layer.
    Set {
        /// Object written to.
        object: ObjectId,
        /// Property written to.
        property: String,
        /// Layer written to.
        layer: Layer,
        /// Value previously at this layer, if any.
        old: Option<StoredValue>,
        /// Value now at this layer.
        new: StoredValue,
    },
    /// A value was removed from a layer.
    Removed {
        /// Object removed from.
        object: ObjectId,
        /// Property removed.
        property: String,
        /// Layer removed from.
        layer: Layer,
        /// The removed value.
        old: StoredValue,
    },
    /// One element of a list value changed in place.
    Element {
        /// Object holding the list.
        object: ObjectId,
        /// List property.
        property: String,
        /// Layer holding the list.
        layer: Layer,
        /// What changed.
        change: ElementChange,
    },
    /// Every record of an object was removed.
    ObjectRemoved {
        /// The removed object.
        object: ObjectId,
    },
}

impl LayerEvent {
    /// Returns the object this event concerns.
    #[must_use]
    pub fn object(&self) -> ObjectId {
        match self {
            Self::Set { object, .. }
            | Self::Removed { object, .. }
            | Self::Element { object, .. }
            | Self::ObjectRemoved { object } => *object,
        }
    }

    /// Returns the property this event concerns, or `None` for whole-object
    /// removal.
    #[must_use]
    pub fn property(&self) -> Option<&str> {
        match self {
            Self::Set { property, .. }
            | Self::Removed { property, .. }
            | Self::Element { property, .. } => Some(property),
            Self::ObjectRemoved { .. } => None,
        }
    }

    /// Returns the layer this event concerns, or `None` for whole-object
    /// removal.
    #[must_use]
    pub fn layer(&self) -> Option<Layer> {
        match self {
            Self::Set { layer, .. } | Self::Removed { layer, .. } | Self::Element { layer, .. } => {
                Some(*layer)
            }
            Self::ObjectRemoved { .. } => None,
        }
    }
}

/// Flat sparse storage of property values per (object, layer, property).
///
/// # Example
///
/// ```rust
/// use understory_strata::{Layer, LayerStore, ObjectId, StoredValue};
///
/// let mut layers = LayerStore::new();
/// let id = ObjectId::from_u128(1);
///
/// layers.set_value(id, Layer::Baseline, "Color", StoredValue::new("Red"));
/// layers.set_value(id, Layer::Override(2), "Color", StoredValue::new("Green"));
///
/// assert_eq!(layers.highest_layer(id, "Color"), Some(Layer::Override(2)));
/// assert!(layers.remove_value(id, Layer::Override(2), "Color"));
/// assert_eq!(layers.highest_layer(id, "Color"), Some(Layer::Baseline));
///
/// // Two mutations, two events.
/// assert_eq!(layers.drain_events().len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct LayerStore {
    objects: HashMap<ObjectId, BTreeMap<Layer, LayerRecords>>,
    pending: Vec<LayerEvent>,
}

impl LayerStore {
    /// Creates an empty layer store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of objects with at least one value set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns `true` if no values are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Returns `true` if the object has any value in any layer.
    #[must_use]
    pub fn contains_object(&self, object: ObjectId) -> bool {
        self.objects.contains_key(&object)
    }

    /// Returns the identifiers of every stored object, in no particular order.
    pub fn object_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.objects.keys().copied()
    }

    /// Returns the sorted, de-duplicated names of every property the object
    /// has in any layer.
    #[must_use]
    pub fn property_names(&self, object: ObjectId) -> Vec<String> {
        let mut names: Vec<String> = self
            .objects
            .get(&object)
            .into_iter()
            .flat_map(BTreeMap::values)
            .flat_map(HashMap::keys)
            .cloned()
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Returns the value stored at exactly this layer.
    #[must_use]
    pub fn try_get_value(&self, object: ObjectId, layer: Layer, name: &str) -> Option<&StoredValue> {
        self.objects.get(&object)?.get(&layer)?.get(name)
    }

    /// Returns every layer holding the property, highest precedence first.
    pub fn layers_for<'a>(
        &'a self,
        object: ObjectId,
        name: &'a str,
    ) -> impl Iterator<Item = Layer> + 'a {
        self.objects
            .get(&object)
            .into_iter()
            .flat_map(|layers| layers.iter().rev())
            .filter(move |(_, records)| records.contains_key(name))
            .map(|(layer, _)| *layer)
    }

    /// Returns the highest-precedence layer holding the property.
    ///
    /// This is the reference resolution that coordinators cache.
    #[must_use]
    pub fn highest_layer(&self, object: ObjectId, name: &str) -> Option<Layer> {
        self.layers_for(object, name).next()
    }

    /// Returns, highest first, the layers holding any property of `object`
    /// whose name `matches` accepts.
    pub fn layers_where<'a>(
        &'a self,
        object: ObjectId,
        mut matches: impl FnMut(&str) -> bool + 'a,
    ) -> impl Iterator<Item = Layer> + 'a {
        self.objects
            .get(&object)
            .into_iter()
            .flat_map(|layers| layers.iter().rev())
            .filter(move |(_, records)| records.keys().any(|name| matches(name.as_str())))
            .map(|(layer, _)| *layer)
    }

    /// Scans downward from `start` (inclusive) to baseline and returns the
    /// first layer holding the property, with its value.
    #[must_use]
    pub fn first_set_at_or_below(
        &self,
        object: ObjectId,
        name: &str,
        start: Layer,
    ) -> Option<(Layer, &StoredValue)> {
        self.objects
            .get(&object)?
            .range(..=start)
            .rev()
            .find_map(|(layer, records)| records.get(name).map(|value| (*layer, value)))
    }

    // =========================================================================
    // Scalar mutation
    // =========================================================================

    /// Writes a value at one layer, returning the value it replaced.
    pub fn set_value(
        &mut self,
        object: ObjectId,
        layer: Layer,
        name: &str,
        value: StoredValue,
    ) -> Option<StoredValue> {
        tracing::trace!(%object, ?layer, property = name, "set value");
        let old = self
            .objects
            .entry(object)
            .or_default()
            .entry(layer)
            .or_default()
            .insert(name.to_string(), value.clone());
        self.pending.push(LayerEvent::Set {
            object,
            property: name.to_string(),
            layer,
            old: old.clone(),
            new: value,
        });
        old
    }

    /// Removes the value at one layer.
    ///
    /// Returns `true` if a value was removed.
    pub fn remove_value(&mut self, object: ObjectId, layer: Layer, name: &str) -> bool {
        let Some(layers) = self.objects.get_mut(&object) else {
            return false;
        };
        let Some(records) = layers.get_mut(&layer) else {
            return false;
        };
        let Some(old) = records.remove(name) else {
            return false;
        };
        tracing::trace!(%object, ?layer, property = name, "remove value");
        if records.is_empty() {
            layers.remove(&layer);
        }
        if layers.is_empty() {
            self.objects.remove(&object);
        }
        self.pending.push(LayerEvent::Removed {
            object,
            property: name.to_string(),
            layer,
            old,
        });
        true
    }

    /// Removes every value of an object in every layer.
    ///
    /// Queues a single [`LayerEvent::ObjectRemoved`]. Returns `true` if the
    /// object had any values.
    pub fn remove_all_for_object(&mut self, object: ObjectId) -> bool {
        if self.objects.remove(&object).is_none() {
            return false;
        }
        tracing::debug!(%object, "removed object");
        self.pending.push(LayerEvent::ObjectRemoved { object });
        true
    }

    /// Removes an entire layer across every object.
    ///
    /// Queues one [`LayerEvent::Removed`] per removed record and returns how
    /// many records were removed.
    pub fn remove_layer(&mut self, layer: Layer) -> usize {
        let mut removed = 0;
        let mut emptied = Vec::new();
        for (object, layers) in &mut self.objects {
            let Some(records) = layers.remove(&layer) else {
                continue;
            };
            let mut records: Vec<_> = records.into_iter().collect();
            records.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
            for (property, old) in records {
                removed += 1;
                self.pending.push(LayerEvent::Removed {
                    object: *object,
                    property,
                    layer,
                    old,
                });
            }
            if layers.is_empty() {
                emptied.push(*object);
            }
        }
        for object in emptied {
            self.objects.remove(&object);
        }
        tracing::debug!(?layer, removed, "removed layer");
        removed
    }

    // =========================================================================
    // Element mutation
    // =========================================================================

    /// Inserts an element into the list stored at one layer.
    ///
    /// A missing list is created (and reported as a plain set) when `index`
    /// is zero.
    ///
    /// # Errors
    ///
    /// [`StrataError::IndexOutOfRange`] if `index > len`, and
    /// [`StrataError::TypeMismatch`] if the layer holds a non-list value.
    pub fn insert_element(
        &mut self,
        object: ObjectId,
        layer: Layer,
        name: &str,
        index: usize,
        value: StoredValue,
    ) -> Result<(), StrataError> {
        let Some(list) = self.element_list_mut(object, layer, name)? else {
            if index != 0 {
                return Err(StrataError::IndexOutOfRange { index, len: 0 });
            }
            let mut list = ElementList::new();
            list.elements_mut().push(value);
            self.set_value(object, layer, name, StoredValue::new(list));
            return Ok(());
        };
        let len = list.len();
        if index > len {
            return Err(StrataError::IndexOutOfRange { index, len });
        }
        list.elements_mut().insert(index, value.clone());
        self.push_element(object, layer, name, ElementChange::Inserted { index, value });
        Ok(())
    }

    /// Removes the element at `index` from the list stored at one layer.
    ///
    /// # Errors
    ///
    /// [`StrataError::IndexOutOfRange`] if there is no such element, and
    /// [`StrataError::TypeMismatch`] if the layer holds a non-list value.
    pub fn remove_element(
        &mut self,
        object: ObjectId,
        layer: Layer,
        name: &str,
        index: usize,
    ) -> Result<StoredValue, StrataError> {
        let list = self.existing_list_mut(object, layer, name, index)?;
        let value = list.elements_mut().remove(index);
        self.push_element(
            object,
            layer,
            name,
            ElementChange::Removed {
                index,
                value: value.clone(),
            },
        );
        Ok(value)
    }

    /// Moves an element within the list stored at one layer.
    ///
    /// # Errors
    ///
    /// [`StrataError::IndexOutOfRange`] if either index is outside the list,
    /// and [`StrataError::TypeMismatch`] if the layer holds a non-list value.
    pub fn move_element(
        &mut self,
        object: ObjectId,
        layer: Layer,
        name: &str,
        from: usize,
        to: usize,
    ) -> Result<(), StrataError> {
        let list = self.existing_list_mut(object, layer, name, from)?;
        let len = list.len();
        if to >= len {
            return Err(StrataError::IndexOutOfRange { index: to, len });
        }
        if from == to {
            return Ok(());
        }
        let value = list.elements_mut().remove(from);
        list.elements_mut().insert(to, value);
        self.push_element(object, layer, name, ElementChange::Moved { from, to });
        Ok(())
    }

    /// Overwrites the element at `index` in the list stored at one layer.
    ///
    /// # Errors
    ///
    /// [`StrataError::IndexOutOfRange`] if there is no such element, and
    /// [`StrataError::TypeMismatch`] if the layer holds a non-list value.
    pub fn replace_element(
        &mut self,
        object: ObjectId,
        layer: Layer,
        name: &str,
        index: usize,
        value: StoredValue,
    ) -> Result<StoredValue, StrataError> {
        let list = self.existing_list_mut(object, layer, name, index)?;
        let old = core::mem::replace(&mut list.elements_mut()[index], value.clone());
        self.push_element(
            object,
            layer,
            name,
            ElementChange::Replaced {
                index,
                old: old.clone(),
                new: value,
            },
        );
        Ok(old)
    }

    /// Removes every element of the list stored at one layer, leaving an
    /// empty list set.
    ///
    /// Returns `true` if any element was removed.
    ///
    /// # Errors
    ///
    /// [`StrataError::TypeMismatch`] if the layer holds a non-list value.
    pub fn clear_elements(
        &mut self,
        object: ObjectId,
        layer: Layer,
        name: &str,
    ) -> Result<bool, StrataError> {
        let Some(list) = self.element_list_mut(object, layer, name)? else {
            return Ok(false);
        };
        if list.is_empty() {
            return Ok(false);
        }
        list.elements_mut().clear();
        self.push_element(object, layer, name, ElementChange::Cleared);
        Ok(true)
    }

    fn element_list_mut(
        &mut self,
        object: ObjectId,
        layer: Layer,
        name: &str,
    ) -> Result<Option<&mut ElementList>, StrataError> {
        let Some(value) = self
            .objects
            .get_mut(&object)
            .and_then(|layers| layers.get_mut(&layer))
            .and_then(|records| records.get_mut(name))
        else {
            return Ok(None);
        };
        let found = value.type_name();
        value
            .downcast_mut::<ElementList>()
            .map(Some)
            .ok_or(StrataError::TypeMismatch {
                expected: core::any::type_name::<ElementList>(),
                found,
            })
    }

    fn existing_list_mut(
        &mut self,
        object: ObjectId,
        layer: Layer,
        name: &str,
        index: usize,
    ) -> Result<&mut ElementList, StrataError> {
        match self.element_list_mut(object, layer, name)? {
            Some(list) if index < list.len() => Ok(list),
            Some(list) => Err(StrataError::IndexOutOfRange {
                index,
                len: list.len(),
            }),
            None => Err(StrataError::IndexOutOfRange { index, len: 0 }),
        }
    }

    fn push_element(&mut self, object: ObjectId, layer: Layer, name: &str, change: ElementChange) {
        tracing::trace!(%object, ?layer, property = name, ?change, "element change");
        self.pending.push(LayerEvent::Element {
            object,
            property: name.to_string(),
            layer,
            change,
        });
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Returns `true` if events are waiting to be drained.
    #[must_use]
    pub fn has_pending_events(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Takes every queued event, oldest first.
    pub fn drain_events(&mut self) -> Vec<LayerEvent> {
        core::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;
    use alloc::vec;

    const ID: ObjectId = ObjectId::from_u128(1);

    fn read(layers: &LayerStore, layer: Layer, name: &str) -> Option<String> {
        layers
            .try_get_value(ID, layer, name)
            .and_then(|v| v.downcast_ref::<String>())
            .cloned()
    }

    #[test]
    fn set_get_remove_single_layer() {
        let mut layers = LayerStore::new();
        assert!(layers.is_empty());

        layers.set_value(ID, Layer::Baseline, "Color", StoredValue::new(String::from("Red")));
        assert_eq!(read(&layers, Layer::Baseline, "Color").as_deref(), Some("Red"));
        assert!(read(&layers, Layer::Override(0), "Color").is_none());
        assert!(layers.contains_object(ID));

        assert!(layers.remove_value(ID, Layer::Baseline, "Color"));
        assert!(!layers.remove_value(ID, Layer::Baseline, "Color"));
        assert!(!layers.contains_object(ID));
    }

    #[test]
    fn set_returns_previous_and_queues_event() {
        let mut layers = LayerStore::new();
        assert!(
            layers
                .set_value(ID, Layer::Override(1), "Width", StoredValue::new(1_i32))
                .is_none()
        );
        let old = layers.set_value(ID, Layer::Override(1), "Width", StoredValue::new(2_i32));
        assert_eq!(old.and_then(|v| v.downcast_ref::<i32>().copied()), Some(1));

        let events = layers.drain_events();
        assert_eq!(events.len(), 2);
        match &events[1] {
            LayerEvent::Set {
                layer, old, new, ..
            } => {
                assert_eq!(*layer, Layer::Override(1));
                assert_eq!(old.as_ref().and_then(|v| v.downcast_ref::<i32>()), Some(&1));
                assert_eq!(new.downcast_ref::<i32>(), Some(&2));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(!layers.has_pending_events());
    }

    #[test]
    fn failed_remove_queues_nothing() {
        let mut layers = LayerStore::new();
        assert!(!layers.remove_value(ID, Layer::Baseline, "Missing"));
        assert!(!layers.remove_all_for_object(ID));
        assert!(layers.drain_events().is_empty());
    }

    #[test]
    fn properties_are_independent() {
        let mut layers = LayerStore::new();
        layers.set_value(ID, Layer::Baseline, "A", StoredValue::new(1_i32));
        layers.set_value(ID, Layer::Baseline, "B", StoredValue::new(2_i32));
        layers.remove_value(ID, Layer::Baseline, "A");
        assert!(layers.try_get_value(ID, Layer::Baseline, "B").is_some());
        assert_eq!(layers.property_names(ID), vec![String::from("B")]);
    }

    #[test]
    fn layers_where_matches_any_property() {
        let mut layers = LayerStore::new();
        layers.set_value(ID, Layer::Baseline, "L[0]", StoredValue::new(0_i32));
        layers.set_value(ID, Layer::Override(4), "L[3]", StoredValue::new(3_i32));
        layers.set_value(ID, Layer::Override(9), "M", StoredValue::new(9_i32));
        let found: Vec<_> = layers
            .layers_where(ID, |name| name.starts_with("L["))
            .collect();
        assert_eq!(found, vec![Layer::Override(4), Layer::Baseline]);
        assert_eq!(layers.layers_where(ObjectId::nil(), |_| true).next(), None);
    }

    #[test]
    fn layers_for_is_descending_and_search_is_inclusive() {
        let mut layers = LayerStore::new();
        layers.set_value(ID, Layer::Override(3), "X", StoredValue::new(3_i32));
        layers.set_value(ID, Layer::Baseline, "X", StoredValue::new(-1_i32));
        layers.set_value(ID, Layer::Override(1), "X", StoredValue::new(1_i32));
        layers.set_value(ID, Layer::Override(2), "Y", StoredValue::new(0_i32));

        let order: Vec<_> = layers.layers_for(ID, "X").collect();
        assert_eq!(
            order,
            vec![Layer::Override(3), Layer::Override(1), Layer::Baseline]
        );

        let (layer, value) = layers
            .first_set_at_or_below(ID, "X", Layer::Override(2))
            .unwrap();
        assert_eq!(layer, Layer::Override(1));
        assert_eq!(value.downcast_ref::<i32>(), Some(&1));

        let (layer, _) = layers
            .first_set_at_or_below(ID, "X", Layer::Override(1))
            .unwrap();
        assert_eq!(layer, Layer::Override(1));
        assert!(layers.first_set_at_or_below(ID, "Y", Layer::Override(1)).is_none());
    }

    #[test]
    fn remove_all_for_object_queues_single_event() {
        let mut layers = LayerStore::new();
        layers.set_value(ID, Layer::Baseline, "A", StoredValue::new(1_i32));
        layers.set_value(ID, Layer::Override(0), "B", StoredValue::new(2_i32));
        layers.drain_events();

        assert!(layers.remove_all_for_object(ID));
        let events = layers.drain_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], LayerEvent::ObjectRemoved { object } if object == ID));
        assert_eq!(events[0].property(), None);
    }

    #[test]
    fn remove_layer_spans_objects() {
        let other = ObjectId::from_u128(2);
        let mut layers = LayerStore::new();
        layers.set_value(ID, Layer::Override(0), "A", StoredValue::new(1_i32));
        layers.set_value(ID, Layer::Override(0), "B", StoredValue::new(1_i32));
        layers.set_value(ID, Layer::Baseline, "A", StoredValue::new(0_i32));
        layers.set_value(other, Layer::Override(0), "A", StoredValue::new(1_i32));
        layers.drain_events();

        assert_eq!(layers.remove_layer(Layer::Override(0)), 3);
        assert_eq!(layers.drain_events().len(), 3);
        assert!(layers.contains_object(ID));
        assert!(!layers.contains_object(other));
    }

    #[test]
    fn element_operations() {
        let mut layers = LayerStore::new();
        layers
            .insert_element(ID, Layer::Baseline, "Items", 0, StoredValue::new(1_i32))
            .unwrap();
        layers
            .insert_element(ID, Layer::Baseline, "Items", 1, StoredValue::new(2_i32))
            .unwrap();
        layers
            .insert_element(ID, Layer::Baseline, "Items", 2, StoredValue::new(3_i32))
            .unwrap();
        layers
            .move_element(ID, Layer::Baseline, "Items", 0, 2)
            .unwrap();
        layers
            .replace_element(ID, Layer::Baseline, "Items", 0, StoredValue::new(20_i32))
            .unwrap();
        let removed = layers
            .remove_element(ID, Layer::Baseline, "Items", 1)
            .unwrap();
        assert_eq!(removed.downcast_ref::<i32>(), Some(&3));

        let list = layers
            .try_get_value(ID, Layer::Baseline, "Items")
            .and_then(|v| v.downcast_ref::<ElementList>())
            .unwrap();
        assert_eq!(list.read_items::<i32>(), vec![20, 1]);

        let events = layers.drain_events();
        assert!(matches!(events[0], LayerEvent::Set { .. }));
        assert!(matches!(
            events[1],
            LayerEvent::Element {
                change: ElementChange::Inserted { index: 1, .. },
                ..
            }
        ));
        assert!(matches!(
            events[3],
            LayerEvent::Element {
                change: ElementChange::Moved { from: 0, to: 2 },
                ..
            }
        ));
    }

    #[test]
    fn element_errors() {
        let mut layers = LayerStore::new();
        assert_eq!(
            layers.insert_element(ID, Layer::Baseline, "Items", 1, StoredValue::new(1_i32)),
            Err(StrataError::IndexOutOfRange { index: 1, len: 0 })
        );
        assert!(
            layers
                .remove_element(ID, Layer::Baseline, "Items", 0)
                .is_err()
        );
        layers.set_value(ID, Layer::Baseline, "Scalar", StoredValue::new(1_i32));
        assert!(matches!(
            layers.clear_elements(ID, Layer::Baseline, "Scalar"),
            Err(StrataError::TypeMismatch { .. })
        ));
    }
}
