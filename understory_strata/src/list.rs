// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Typed list flyweights.
//!
//! A [`ListAccess<T>`] is the ordered-sequence counterpart of
//! [`PropertyAccess`](crate::PropertyAccess). How the sequence is laid out in
//! the layer store depends on the property's [`ListStrategy`], configured on
//! the store:
//!
//! - [`ListStrategy::ObservableElements`]: each layer holds an
//!   [`ElementList`]. Element operations at the active layer raise granular
//!   [`ListChange`]s.
//! - [`ListStrategy::Indexed`]: element `i` is the scalar property `Name[i]`.
//!   The list lives in the highest layer holding any `Name[k]`, and reads
//!   assemble the contiguous run starting at `Name[0]` in that layer only.
//! - [`ListStrategy::Direct`]: the whole list is one [`ElementList`] value,
//!   replaced wholesale on every write.
//!
//! Whole-list layer precedence follows the same rule as scalar properties: a
//! shorter list at a higher layer shadows every element of a lower one.

use alloc::format;
use alloc::rc::{Rc, Weak};
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::Cell;
use core::fmt;

use crate::coordinator::{Coordinator, PropertyEvent, PropertyEventKind};
use crate::error::StrataError;
use crate::id::{Layer, ObjectId, layer_index};
use crate::layers::{ElementChange, LayerStore};
use crate::observer::{ObserverList, Subscription};
use crate::store::StrataStore;
use crate::value::{ElementList, StoredValue};

/// How a list property is laid out in the layer store.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ListStrategy {
    /// Each layer holds an element list with per-element change events.
    #[default]
    ObservableElements,
    /// Each element is the scalar property `Name[index]`.
    Indexed,
    /// The whole list is one opaque value.
    Direct,
}

/// Returns the name of the indexed sub-property holding element `index`.
///
/// ```rust
/// assert_eq!(understory_strata::indexed_name("Items", 3), "Items[3]");
/// ```
#[must_use]
pub fn indexed_name(name: &str, index: usize) -> String {
    format!("{name}[{index}]")
}

/// Splits an indexed sub-property name into the list name and the index.
///
/// ```rust
/// use understory_strata::parse_indexed_name;
///
/// assert_eq!(parse_indexed_name("Items[3]"), Some(("Items", 3)));
/// assert_eq!(parse_indexed_name("Items"), None);
/// assert_eq!(parse_indexed_name("Items[x]"), None);
/// ```
#[must_use]
pub fn parse_indexed_name(name: &str) -> Option<(&str, usize)> {
    let (parent, index) = name.strip_suffix(']')?.rsplit_once('[')?;
    if parent.is_empty() {
        return None;
    }
    Some((parent, index.parse().ok()?))
}

/// What changed in a list's effective sequence.
#[derive(Clone, Debug, PartialEq)]
pub enum ListChange<T> {
    /// An item was inserted at `index`.
    Inserted {
        /// Position of the new item.
        index: usize,
        /// The new item.
        item: T,
    },
    /// The item at `index` was removed.
    Removed {
        /// Former position of the item.
        index: usize,
        /// The removed item.
        item: T,
    },
    /// An item moved.
    Moved {
        /// Former position.
        from: usize,
        /// New position.
        to: usize,
    },
    /// The item at `index` was overwritten.
    Replaced {
        /// Position of the item.
        index: usize,
        /// The previous item.
        old: T,
        /// The new item.
        new: T,
    },
    /// The sequence may have changed arbitrarily; compare against the current
    /// items.
    Rebuilt,
    /// The list was emptied or its object removed; start over from the
    /// current items.
    Reset,
}

/// A list change together with the sequence after it.
#[derive(Clone, Debug, PartialEq)]
pub struct ListNotification<T> {
    /// What changed.
    pub change: ListChange<T>,
    /// The effective items after the change.
    pub items: Vec<T>,
}

/// Reads a stored sequence, accepting both element lists and plain vectors.
fn read_sequence<T: Clone + Default + 'static>(value: &StoredValue) -> Vec<T> {
    if let Some(list) = value.downcast_ref::<ElementList>() {
        return list.read_items();
    }
    if let Some(items) = value.downcast_ref::<Vec<T>>() {
        return items.clone();
    }
    tracing::warn!(
        expected = core::any::type_name::<Vec<T>>(),
        found = value.type_name(),
        "stored list has unexpected type; using empty list"
    );
    Vec::new()
}

/// Returns, highest first, the layers holding any `name[k]`.
fn indexed_layers<'a>(
    layers: &'a LayerStore,
    object: ObjectId,
    name: &'a str,
) -> impl Iterator<Item = Layer> + 'a {
    layers.layers_where(object, move |property| {
        parse_indexed_name(property).is_some_and(|(parent, _)| parent == name)
    })
}

/// Returns the contiguous run `name[0]`, `name[1]`, ... stored at `layer`.
fn indexed_run<'a>(
    layers: &'a LayerStore,
    object: ObjectId,
    layer: Layer,
    name: &'a str,
) -> impl Iterator<Item = &'a StoredValue> + 'a {
    (0..).map_while(move |index| layers.try_get_value(object, layer, &indexed_name(name, index)))
}

/// Removes every `name[k]` with `k >= from` at `layer`.
fn remove_indexed_tail(
    layers: &mut LayerStore,
    object: ObjectId,
    layer: Layer,
    name: &str,
    from: usize,
) -> usize {
    let stale: Vec<String> = layers
        .property_names(object)
        .into_iter()
        .filter(|property| {
            parse_indexed_name(property).is_some_and(|(parent, index)| parent == name && index >= from)
        })
        .collect();
    stale
        .iter()
        .filter(|property| layers.remove_value(object, layer, property))
        .count()
}

/// Writes raw elements at one layer according to `strategy`.
pub(crate) fn write_elements(
    store: &StrataStore,
    object: ObjectId,
    layer: Layer,
    name: &str,
    strategy: ListStrategy,
    elements: Vec<StoredValue>,
) {
    store.mutate(|layers| write_elements_into(layers, object, layer, name, strategy, elements));
}

/// Writes raw elements straight into `layers`, queueing the events.
pub(crate) fn write_elements_into(
    layers: &mut LayerStore,
    object: ObjectId,
    layer: Layer,
    name: &str,
    strategy: ListStrategy,
    elements: Vec<StoredValue>,
) {
    match strategy {
        ListStrategy::ObservableElements | ListStrategy::Direct => {
            let mut list = ElementList::new();
            *list.elements_mut() = elements;
            layers.set_value(object, layer, name, StoredValue::new(list));
        }
        ListStrategy::Indexed => {
            let len = elements.len();
            for (index, element) in elements.into_iter().enumerate() {
                layers.set_value(object, layer, &indexed_name(name, index), element);
            }
            remove_indexed_tail(layers, object, layer, name, len);
        }
    }
}

/// Reads the effective raw elements according to `strategy`.
///
/// Returns `None` when the list is unset, or when the active layer holds a
/// value other than an [`ElementList`].
pub(crate) fn read_elements(
    store: &StrataStore,
    object: ObjectId,
    name: &str,
    strategy: ListStrategy,
) -> Option<Vec<StoredValue>> {
    let layers = store.layers();
    match strategy {
        ListStrategy::ObservableElements | ListStrategy::Direct => {
            let layer = layers.highest_layer(object, name)?;
            let value = layers.try_get_value(object, layer, name)?;
            value
                .downcast_ref::<ElementList>()
                .map(|list| list.as_slice().to_vec())
        }
        ListStrategy::Indexed => {
            let layer = indexed_layers(&layers, object, name).next()?;
            Some(indexed_run(&layers, object, layer, name).cloned().collect())
        }
    }
}

struct ListShared<T: 'static> {
    store: StrataStore,
    coordinator: Rc<Coordinator>,
    strategy: ListStrategy,
    was_set: Cell<bool>,
    list_changed: ObserverList<ListNotification<T>>,
    is_set_changed: ObserverList<bool>,
}

impl<T: Clone + Default + 'static> ListShared<T> {
    fn object(&self) -> ObjectId {
        self.coordinator.object()
    }

    fn property(&self) -> &str {
        self.coordinator.property()
    }

    fn active_layer(&self) -> Option<Layer> {
        match self.strategy {
            ListStrategy::Indexed => {
                indexed_layers(&self.store.layers(), self.object(), self.property()).next()
            }
            _ => self.coordinator.active_layer(),
        }
    }

    fn is_set(&self) -> bool {
        self.active_layer().is_some()
    }

    fn is_baseline_set(&self) -> bool {
        match self.strategy {
            ListStrategy::Indexed => {
                let layers = self.store.layers();
                indexed_layers(&layers, self.object(), self.property()).last()
                    == Some(Layer::Baseline)
            }
            _ => self.coordinator.is_baseline_set(),
        }
    }

    fn items(&self) -> Vec<T> {
        match self.strategy {
            ListStrategy::Indexed => self
                .active_layer()
                .map(|layer| self.layer_items(layer))
                .unwrap_or_default(),
            _ => self
                .coordinator
                .active_value(&self.store.layers())
                .map(read_sequence)
                .unwrap_or_default(),
        }
    }

    fn layer_items(&self, layer: Layer) -> Vec<T> {
        let layers = self.store.layers();
        match self.strategy {
            ListStrategy::Indexed => indexed_run(&layers, self.object(), layer, self.property())
                .map(StoredValue::read_or_default)
                .collect(),
            _ => layers
                .try_get_value(self.object(), layer, self.property())
                .map(read_sequence)
                .unwrap_or_default(),
        }
    }

    fn handle(&self, event: &PropertyEvent) {
        let change = match (&event.kind, self.strategy) {
            (PropertyEventKind::Cleared, _) => Some(ListChange::Reset),
            (PropertyEventKind::IndexedElement { layer, .. }, ListStrategy::Indexed) => self
                .active_layer()
                .is_none_or(|active| *layer >= active)
                .then_some(ListChange::Rebuilt),
            (PropertyEventKind::IndexedElement { .. }, _) | (_, ListStrategy::Indexed) => None,
            (PropertyEventKind::Element { layer, change }, ListStrategy::ObservableElements) => {
                (event.active == Some(*layer)).then(|| element_change(change))
            }
            (PropertyEventKind::Element { layer, .. }, ListStrategy::Direct) => {
                (event.active == Some(*layer)).then_some(ListChange::Rebuilt)
            }
            (PropertyEventKind::Set { .. } | PropertyEventKind::Removed { .. }, _) => {
                event.value_changed().then_some(ListChange::Rebuilt)
            }
        };
        if let Some(change) = change {
            self.list_changed.notify(&ListNotification {
                change,
                items: self.items(),
            });
        }
        let is_set = self.is_set();
        if self.was_set.replace(is_set) != is_set {
            self.is_set_changed.notify(&is_set);
        }
    }
}

fn element_change<T: Clone + Default + 'static>(change: &ElementChange) -> ListChange<T> {
    match change {
        ElementChange::Inserted { index, value } => ListChange::Inserted {
            index: *index,
            item: value.read_or_default(),
        },
        ElementChange::Removed { index, value } => ListChange::Removed {
            index: *index,
            item: value.read_or_default(),
        },
        ElementChange::Moved { from, to } => ListChange::Moved {
            from: *from,
            to: *to,
        },
        ElementChange::Replaced { index, old, new } => ListChange::Replaced {
            index: *index,
            old: old.read_or_default(),
            new: new.read_or_default(),
        },
        ElementChange::Cleared => ListChange::Reset,
    }
}

/// Typed, disposable handle to one list property of one object.
///
/// # Example
///
/// ```rust
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use understory_strata::{Layer, ListChange, ObjectId, StrataStore};
///
/// let store = StrataStore::new();
/// let id = ObjectId::from_u128(1);
/// let tags = store.list::<u32>(id, "Tags");
///
/// let changes = Rc::new(RefCell::new(Vec::new()));
/// let _sub = {
///     let changes = changes.clone();
///     tags.on_list_changed(move |n| changes.borrow_mut().push(n.change.clone()))
/// };
///
/// tags.set(Layer::Baseline, vec![1, 2]);
/// tags.push(Layer::Baseline, 3).unwrap();
/// assert_eq!(tags.items(), vec![1, 2, 3]);
/// assert_eq!(
///     *changes.borrow(),
///     vec![ListChange::Rebuilt, ListChange::Inserted { index: 2, item: 3 }]
/// );
/// ```
pub struct ListAccess<T: Clone + Default + 'static> {
    shared: Rc<ListShared<T>>,
    subscription: Option<Subscription>,
}

impl<T: Clone + Default + 'static> ListAccess<T> {
    pub(crate) fn new(store: StrataStore, coordinator: Rc<Coordinator>, strategy: ListStrategy) -> Self {
        let shared = Rc::new(ListShared {
            store,
            coordinator: coordinator.clone(),
            strategy,
            was_set: Cell::new(false),
            list_changed: ObserverList::new(),
            is_set_changed: ObserverList::new(),
        });
        shared.was_set.set(shared.is_set());
        let weak: Weak<ListShared<T>> = Rc::downgrade(&shared);
        let subscription = coordinator.subscribe(move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.handle(event);
            }
        });
        Self {
            shared,
            subscription: Some(subscription),
        }
    }

    /// Returns the storage strategy.
    #[must_use]
    pub fn strategy(&self) -> ListStrategy {
        self.shared.strategy
    }

    /// Returns the object this flyweight addresses.
    #[must_use]
    pub fn object(&self) -> ObjectId {
        self.shared.object()
    }

    /// Returns the list property this flyweight addresses.
    #[must_use]
    pub fn property(&self) -> &str {
        self.shared.property()
    }

    /// Returns the store that issued this flyweight.
    #[must_use]
    pub fn store(&self) -> &StrataStore {
        &self.shared.store
    }

    /// Returns `true` if `store` issued this flyweight.
    #[must_use]
    pub fn is_issued_by(&self, store: &StrataStore) -> bool {
        self.shared.store.ptr_eq(store)
            && store
                .coordinator(self.object(), self.property())
                .is_some_and(|live| Rc::ptr_eq(&live, &self.shared.coordinator))
    }

    /// Returns `true` if any layer holds the list.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.shared.is_set()
    }

    /// Returns `true` if the baseline holds the list.
    #[must_use]
    pub fn is_baseline_set(&self) -> bool {
        self.shared.is_baseline_set()
    }

    /// Returns the active layer.
    ///
    /// With [`ListStrategy::Indexed`] this is the highest layer contributing
    /// any element.
    #[must_use]
    pub fn active_layer(&self) -> Option<Layer> {
        self.shared.active_layer()
    }

    /// Returns the active layer as an integer index.
    #[must_use]
    pub fn active_layer_index(&self) -> i32 {
        layer_index(self.active_layer())
    }

    /// Returns the effective items.
    #[must_use]
    pub fn items(&self) -> Vec<T> {
        self.shared.items()
    }

    /// Returns the number of effective items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items().len()
    }

    /// Returns `true` if there are no effective items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the items stored at exactly `layer`.
    #[must_use]
    pub fn layer_items(&self, layer: Layer) -> Vec<T> {
        self.shared.layer_items(layer)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Replaces the whole list at `layer`.
    pub fn set(&self, layer: Layer, items: Vec<T>) {
        write_elements(
            &self.shared.store,
            self.object(),
            layer,
            self.property(),
            self.strategy(),
            items.into_iter().map(StoredValue::new).collect(),
        );
    }

    /// Removes the list at `layer`, returning `true` if anything was removed.
    pub fn remove(&self, layer: Layer) -> bool {
        let (object, name) = (self.object(), self.property());
        match self.strategy() {
            ListStrategy::Indexed => {
                self.shared
                    .store
                    .mutate(|layers| remove_indexed_tail(layers, object, layer, name, 0))
                    > 0
            }
            _ => self.shared.store.remove_value(object, layer, name),
        }
    }

    /// Empties the list at `layer`.
    ///
    /// The empty list stays set, except with [`ListStrategy::Indexed`] where
    /// an empty list cannot be told apart from an unset one.
    ///
    /// # Errors
    ///
    /// [`StrataError::TypeMismatch`] if the layer holds a non-list value.
    pub fn clear(&self, layer: Layer) -> Result<(), StrataError> {
        let store = &self.shared.store;
        match self.strategy() {
            ListStrategy::ObservableElements => {
                let exists = store
                    .layers()
                    .try_get_value(self.object(), layer, self.property())
                    .is_some();
                if exists {
                    store.clear_elements(self.object(), layer, self.property())?;
                } else {
                    self.set(layer, Vec::new());
                }
            }
            ListStrategy::Indexed => {
                self.remove(layer);
            }
            ListStrategy::Direct => self.set(layer, Vec::new()),
        }
        Ok(())
    }

    /// Appends `item` to the list at `layer`.
    ///
    /// # Errors
    ///
    /// [`StrataError::TypeMismatch`] if the layer holds a non-list value.
    pub fn push(&self, layer: Layer, item: T) -> Result<(), StrataError> {
        let len = match self.strategy() {
            ListStrategy::ObservableElements => self
                .shared
                .store
                .layers()
                .try_get_value(self.object(), layer, self.property())
                .and_then(|value| value.downcast_ref::<ElementList>())
                .map_or(0, ElementList::len),
            _ => self.layer_items(layer).len(),
        };
        self.insert(layer, len, item)
    }

    /// Inserts `item` at `index` in the list at `layer`.
    ///
    /// # Errors
    ///
    /// [`StrataError::IndexOutOfRange`] if `index` is past the end, and
    /// [`StrataError::TypeMismatch`] if the layer holds a non-list value.
    pub fn insert(&self, layer: Layer, index: usize, item: T) -> Result<(), StrataError> {
        if self.strategy() == ListStrategy::ObservableElements {
            return self.shared.store.insert_element(
                self.object(),
                layer,
                self.property(),
                index,
                StoredValue::new(item),
            );
        }
        self.modify(layer, |items| {
            if index > items.len() {
                return Err(StrataError::IndexOutOfRange {
                    index,
                    len: items.len(),
                });
            }
            items.insert(index, item);
            Ok(())
        })
    }

    /// Removes and returns the item at `index` in the list at `layer`.
    ///
    /// # Errors
    ///
    /// [`StrataError::IndexOutOfRange`] if there is no such item, and
    /// [`StrataError::TypeMismatch`] if the layer holds a non-list value.
    pub fn remove_at(&self, layer: Layer, index: usize) -> Result<T, StrataError> {
        if self.strategy() == ListStrategy::ObservableElements {
            return self
                .shared
                .store
                .remove_element(self.object(), layer, self.property(), index)
                .map(|value| value.read_or_default());
        }
        self.modify(layer, |items| {
            check_index(index, items.len())?;
            Ok(items.remove(index))
        })
    }

    /// Moves the item at `from` to `to` in the list at `layer`.
    ///
    /// # Errors
    ///
    /// [`StrataError::IndexOutOfRange`] if either index is outside the list,
    /// and [`StrataError::TypeMismatch`] if the layer holds a non-list value.
    pub fn move_item(&self, layer: Layer, from: usize, to: usize) -> Result<(), StrataError> {
        if self.strategy() == ListStrategy::ObservableElements {
            return self
                .shared
                .store
                .move_element(self.object(), layer, self.property(), from, to);
        }
        self.modify(layer, |items| {
            check_index(from, items.len())?;
            check_index(to, items.len())?;
            let item = items.remove(from);
            items.insert(to, item);
            Ok(())
        })
    }

    /// Overwrites the item at `index` in the list at `layer`, returning the
    /// previous item.
    ///
    /// # Errors
    ///
    /// [`StrataError::IndexOutOfRange`] if there is no such item, and
    /// [`StrataError::TypeMismatch`] if the layer holds a non-list value.
    pub fn replace(&self, layer: Layer, index: usize, item: T) -> Result<T, StrataError> {
        if self.strategy() == ListStrategy::ObservableElements {
            return self
                .shared
                .store
                .replace_element(
                    self.object(),
                    layer,
                    self.property(),
                    index,
                    StoredValue::new(item),
                )
                .map(|value| value.read_or_default());
        }
        self.modify(layer, |items| {
            check_index(index, items.len())?;
            Ok(core::mem::replace(&mut items[index], item))
        })
    }

    /// Read-modify-write of the whole list at `layer`.
    fn modify<R>(
        &self,
        layer: Layer,
        f: impl FnOnce(&mut Vec<T>) -> Result<R, StrataError>,
    ) -> Result<R, StrataError> {
        let mut items = self.layer_items(layer);
        let result = f(&mut items)?;
        self.set(layer, items);
        Ok(result)
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Observes changes of the effective sequence.
    pub fn on_list_changed(
        &self,
        callback: impl Fn(&ListNotification<T>) + 'static,
    ) -> Subscription {
        self.shared.list_changed.subscribe(callback)
    }

    /// Observes the list becoming set or unset.
    pub fn on_is_set_changed(&self, callback: impl Fn(&bool) + 'static) -> Subscription {
        self.shared.is_set_changed.subscribe(callback)
    }

    /// Detaches from the coordinator.
    ///
    /// Equivalent to dropping the flyweight.
    pub fn dispose(self) {
        drop(self);
    }
}

fn check_index(index: usize, len: usize) -> Result<(), StrataError> {
    if index < len {
        Ok(())
    } else {
        Err(StrataError::IndexOutOfRange { index, len })
    }
}

impl<T: Clone + Default + 'static> Drop for ListAccess<T> {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
            self.shared
                .store
                .release_coordinator(&self.shared.coordinator);
        }
    }
}

impl<T: Clone + Default + 'static> fmt::Debug for ListAccess<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListAccess")
            .field("object", &self.object())
            .field("property", &self.property())
            .field("strategy", &self.strategy())
            .field("active_layer", &self.active_layer())
            .finish_non_exhaustive()
    }
}
