// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The shared store handle.
//!
//! [`StrataStore`] owns the [`LayerStore`], the live [`Coordinator`]s and the
//! list configuration. It is a cheap, clonable handle: clones share the same
//! data. Every mutation drains the events the layer store queued and routes
//! them synchronously, so by the time a mutating call returns every attached
//! flyweight and adapter has observed it.
//!
//! No borrow of the store's internals is held while callbacks run; handlers
//! may freely read, write, acquire flyweights, or drop them.

use alloc::rc::{Rc, Weak};
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::{Ref, RefCell};
use core::fmt;

use hashbrown::HashMap;

use crate::access::PropertyAccess;
use crate::coordinator::{Coordinator, PropertyEvent};
use crate::error::StrataError;
use crate::id::{Layer, ObjectId};
use crate::layers::{LayerEvent, LayerStore};
use crate::list::{ListAccess, ListStrategy, parse_indexed_name};
use crate::schema::Schema;
use crate::value::StoredValue;

type CoordinatorMap = HashMap<ObjectId, HashMap<Rc<str>, Rc<Coordinator>>>;

/// List configuration consulted when list flyweights are created.
#[derive(Clone, Debug, Default)]
struct ListConfig {
    default_strategy: ListStrategy,
    strategies: HashMap<String, ListStrategy>,
}

struct StoreInner {
    layers: RefCell<LayerStore>,
    coordinators: RefCell<CoordinatorMap>,
    lists: RefCell<ListConfig>,
}

/// A layered, observable per-object property store.
///
/// # Example
///
/// ```rust
/// use understory_strata::{Layer, ObjectId, StrataStore};
///
/// let store = StrataStore::new();
/// let id = ObjectId::from_u128(1);
/// let color = store.property::<String>(id, "Color");
///
/// store.set_value(id, Layer::Baseline, "Color", String::from("Red"));
/// store.set_value(id, Layer::Override(2), "Color", String::from("Green"));
/// assert_eq!(color.active_layer(), Some(Layer::Override(2)));
/// assert_eq!(color.get_or_default(), "Green");
///
/// store.remove_value(id, Layer::Override(2), "Color");
/// assert_eq!(color.get_or_default(), "Red");
/// ```
#[derive(Clone)]
pub struct StrataStore {
    inner: Rc<StoreInner>,
}

/// A non-owning handle to a [`StrataStore`].
#[derive(Clone)]
pub struct WeakStrataStore {
    inner: Weak<StoreInner>,
}

impl WeakStrataStore {
    /// Returns the store if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<StrataStore> {
        self.inner.upgrade().map(|inner| StrataStore { inner })
    }
}

impl fmt::Debug for WeakStrataStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakStrataStore")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl Default for StrataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StrataStore {
    /// Creates an empty store with default configuration.
    #[must_use]
    pub fn new() -> Self {
        StrataStoreBuilder::new().build()
    }

    /// Returns a builder for configuring a store.
    #[must_use]
    pub fn builder() -> StrataStoreBuilder {
        StrataStoreBuilder::new()
    }

    /// Returns a non-owning handle to this store.
    #[must_use]
    pub fn downgrade(&self) -> WeakStrataStore {
        WeakStrataStore {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Returns `true` if both handles refer to the same store.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Borrows the raw layer store for reading.
    ///
    /// # Panics
    ///
    /// Panics if called while the layer store is being mutated, which cannot
    /// happen from event handlers.
    #[must_use]
    pub fn layers(&self) -> Ref<'_, LayerStore> {
        self.inner.layers.borrow()
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Returns the list strategy configured for `name`.
    #[must_use]
    pub fn list_strategy(&self, name: &str) -> ListStrategy {
        let lists = self.inner.lists.borrow();
        lists
            .strategies
            .get(name)
            .copied()
            .unwrap_or(lists.default_strategy)
    }

    /// Configures the list strategy for `name`.
    ///
    /// Only list flyweights created afterwards are affected.
    pub fn configure_list(&self, name: &str, strategy: ListStrategy) {
        tracing::debug!(property = name, ?strategy, "configured list strategy");
        self.inner
            .lists
            .borrow_mut()
            .strategies
            .insert(String::from(name), strategy);
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Returns `true` if the object has any value in any layer.
    #[must_use]
    pub fn contains_object(&self, object: ObjectId) -> bool {
        self.layers().contains_object(object)
    }

    /// Returns the identifiers of every stored object, sorted.
    #[must_use]
    pub fn object_ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<_> = self.layers().object_ids().collect();
        ids.sort_unstable();
        ids
    }

    /// Returns the sorted names of every property the object has.
    #[must_use]
    pub fn property_names(&self, object: ObjectId) -> Vec<String> {
        self.layers().property_names(object)
    }

    /// Returns the active layer of a property, resolved by scanning.
    #[must_use]
    pub fn active_layer(&self, object: ObjectId, name: &str) -> Option<Layer> {
        self.layers().highest_layer(object, name)
    }

    /// Reads the value stored at exactly `layer`.
    ///
    /// # Errors
    ///
    /// [`StrataError::TypeMismatch`] if the stored value is not a `T`.
    pub fn try_get_value<T: Clone + 'static>(
        &self,
        object: ObjectId,
        layer: Layer,
        name: &str,
    ) -> Result<Option<T>, StrataError> {
        self.layers()
            .try_get_value(object, layer, name)
            .map(StoredValue::try_read)
            .transpose()
    }

    /// Reads the effective (active-layer) value.
    ///
    /// # Errors
    ///
    /// [`StrataError::TypeMismatch`] if the stored value is not a `T`.
    pub fn active_value<T: Clone + 'static>(
        &self,
        object: ObjectId,
        name: &str,
    ) -> Result<Option<T>, StrataError> {
        let layers = self.layers();
        let Some(layer) = layers.highest_layer(object, name) else {
            return Ok(None);
        };
        layers
            .try_get_value(object, layer, name)
            .map(StoredValue::try_read)
            .transpose()
    }

    /// Returns a clone of the raw effective (active-layer) value.
    #[must_use]
    pub fn active_stored(&self, object: ObjectId, name: &str) -> Option<StoredValue> {
        let layers = self.layers();
        let layer = layers.highest_layer(object, name)?;
        layers.try_get_value(object, layer, name).cloned()
    }

    /// Returns a clone of the raw value stored at exactly `layer`.
    #[must_use]
    pub fn stored_value(&self, object: ObjectId, layer: Layer, name: &str) -> Option<StoredValue> {
        self.layers().try_get_value(object, layer, name).cloned()
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Writes a typed value at one layer.
    pub fn set_value<T: Clone + 'static>(&self, object: ObjectId, layer: Layer, name: &str, value: T) {
        self.set_stored(object, layer, name, StoredValue::new(value));
    }

    /// Writes an untyped value at one layer.
    pub fn set_stored(&self, object: ObjectId, layer: Layer, name: &str, value: StoredValue) {
        self.mutate(|layers| {
            layers.set_value(object, layer, name, value);
        });
    }

    /// Removes the value at one layer, returning `true` if one was removed.
    pub fn remove_value(&self, object: ObjectId, layer: Layer, name: &str) -> bool {
        self.mutate(|layers| layers.remove_value(object, layer, name))
    }

    /// Removes every value of an object.
    ///
    /// Every coordinator of the object resets to unset and notifies its
    /// flyweights. Returns `true` if the object had any values.
    pub fn remove_object(&self, object: ObjectId) -> bool {
        self.mutate(|layers| layers.remove_all_for_object(object))
    }

    /// Removes an override (or the baseline) layer across every object,
    /// returning the number of records removed.
    pub fn remove_layer(&self, layer: Layer) -> usize {
        self.mutate(|layers| layers.remove_layer(layer))
    }

    /// Inserts a list element at one layer.
    ///
    /// # Errors
    ///
    /// See [`LayerStore::insert_element`].
    pub fn insert_element(
        &self,
        object: ObjectId,
        layer: Layer,
        name: &str,
        index: usize,
        value: StoredValue,
    ) -> Result<(), StrataError> {
        self.mutate(|layers| layers.insert_element(object, layer, name, index, value))
    }

    /// Removes a list element at one layer.
    ///
    /// # Errors
    ///
    /// See [`LayerStore::remove_element`].
    pub fn remove_element(
        &self,
        object: ObjectId,
        layer: Layer,
        name: &str,
        index: usize,
    ) -> Result<StoredValue, StrataError> {
        self.mutate(|layers| layers.remove_element(object, layer, name, index))
    }

    /// Moves a list element at one layer.
    ///
    /// # Errors
    ///
    /// See [`LayerStore::move_element`].
    pub fn move_element(
        &self,
        object: ObjectId,
        layer: Layer,
        name: &str,
        from: usize,
        to: usize,
    ) -> Result<(), StrataError> {
        self.mutate(|layers| layers.move_element(object, layer, name, from, to))
    }

    /// Overwrites a list element at one layer.
    ///
    /// # Errors
    ///
    /// See [`LayerStore::replace_element`].
    pub fn replace_element(
        &self,
        object: ObjectId,
        layer: Layer,
        name: &str,
        index: usize,
        value: StoredValue,
    ) -> Result<StoredValue, StrataError> {
        self.mutate(|layers| layers.replace_element(object, layer, name, index, value))
    }

    /// Empties the list at one layer, leaving it set.
    ///
    /// # Errors
    ///
    /// See [`LayerStore::clear_elements`].
    pub fn clear_elements(
        &self,
        object: ObjectId,
        layer: Layer,
        name: &str,
    ) -> Result<bool, StrataError> {
        self.mutate(|layers| layers.clear_elements(object, layer, name))
    }

    /// Applies several raw writes as one batch.
    ///
    /// Handlers run once `f` returns, each seeing the state after the whole
    /// batch.
    pub fn batch<R>(&self, f: impl FnOnce(&mut LayerStore) -> R) -> R {
        self.mutate(f)
    }

    /// Runs one mutation and dispatches the events it produced.
    ///
    /// Several raw writes made inside `f` are observed together: no handler
    /// runs until all of them are applied.
    pub(crate) fn mutate<R>(&self, f: impl FnOnce(&mut LayerStore) -> R) -> R {
        let (result, events) = {
            let mut layers = self.inner.layers.borrow_mut();
            let result = f(&mut layers);
            (result, layers.drain_events())
        };
        for event in &events {
            self.dispatch(event);
        }
        result
    }

    fn dispatch(&self, event: &LayerEvent) {
        let object = event.object();
        let Some(property) = event.property() else {
            for coordinator in self.coordinators_of(object) {
                self.deliver(&coordinator, event);
            }
            return;
        };
        if let Some(coordinator) = self.coordinator(object, property) {
            self.deliver(&coordinator, event);
        }
        if let (Some((parent, index)), Some(layer)) = (parse_indexed_name(property), event.layer())
            && let Some(coordinator) = self.coordinator(object, parent)
        {
            let notification = coordinator.apply_indexed(index, layer);
            coordinator.observers().notify(&notification);
        }
    }

    fn deliver(&self, coordinator: &Coordinator, event: &LayerEvent) {
        let notification: PropertyEvent = {
            let layers = self.inner.layers.borrow();
            coordinator.apply(&layers, event)
        };
        coordinator.observers().notify(&notification);
    }

    // =========================================================================
    // Coordinators and flyweights
    // =========================================================================

    /// Returns the live coordinator for a property, if any flyweight is
    /// attached to it.
    #[must_use]
    pub fn coordinator(&self, object: ObjectId, name: &str) -> Option<Rc<Coordinator>> {
        self.inner
            .coordinators
            .borrow()
            .get(&object)?
            .get(name)
            .cloned()
    }

    fn coordinators_of(&self, object: ObjectId) -> Vec<Rc<Coordinator>> {
        self.inner
            .coordinators
            .borrow()
            .get(&object)
            .map(|by_name| by_name.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the number of live coordinators.
    #[must_use]
    pub fn coordinator_count(&self) -> usize {
        self.inner
            .coordinators
            .borrow()
            .values()
            .map(HashMap::len)
            .sum()
    }

    /// Returns how many flyweights are attached to a property.
    #[must_use]
    pub fn attached_count(&self, object: ObjectId, name: &str) -> usize {
        self.coordinator(object, name)
            .map_or(0, |coordinator| coordinator.attached())
    }

    /// Creates a typed flyweight for one property.
    #[must_use]
    pub fn property<T: Clone + Default + 'static>(
        &self,
        object: ObjectId,
        name: &str,
    ) -> PropertyAccess<T> {
        PropertyAccess::new(self.clone(), self.acquire_coordinator(object, name))
    }

    /// Creates a typed list flyweight using the configured strategy.
    #[must_use]
    pub fn list<T: Clone + Default + 'static>(&self, object: ObjectId, name: &str) -> ListAccess<T> {
        let strategy = self.list_strategy(name);
        self.list_with_strategy(object, name, strategy)
    }

    /// Creates a typed list flyweight with an explicit strategy.
    #[must_use]
    pub fn list_with_strategy<T: Clone + Default + 'static>(
        &self,
        object: ObjectId,
        name: &str,
        strategy: ListStrategy,
    ) -> ListAccess<T> {
        ListAccess::new(self.clone(), self.acquire_coordinator(object, name), strategy)
    }

    pub(crate) fn acquire_coordinator(&self, object: ObjectId, name: &str) -> Rc<Coordinator> {
        if let Some(existing) = self.coordinator(object, name) {
            existing.attach();
            return existing;
        }
        let property: Rc<str> = Rc::from(name);
        let coordinator = {
            let layers = self.inner.layers.borrow();
            Rc::new(Coordinator::new(object, property.clone(), &layers))
        };
        coordinator.attach();
        tracing::debug!(%object, property = name, "created coordinator");
        self.inner
            .coordinators
            .borrow_mut()
            .entry(object)
            .or_default()
            .insert(property, coordinator.clone());
        coordinator
    }

    /// Detaches one flyweight; retires the coordinator with the last one.
    pub(crate) fn release_coordinator(&self, coordinator: &Rc<Coordinator>) {
        if coordinator.handle_access_withdrawn() > 0 {
            return;
        }
        let object = coordinator.object();
        {
            let mut coordinators = self.inner.coordinators.borrow_mut();
            if let Some(by_name) = coordinators.get_mut(&object) {
                if by_name
                    .get(coordinator.property())
                    .is_some_and(|live| Rc::ptr_eq(live, coordinator))
                {
                    by_name.remove(coordinator.property());
                }
                if by_name.is_empty() {
                    coordinators.remove(&object);
                }
            }
        }
        coordinator.retire();
        tracing::debug!(%object, property = coordinator.property(), "retired coordinator");
    }
}

impl fmt::Debug for StrataStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let objects = self.inner.layers.try_borrow().map(|l| l.len()).ok();
        f.debug_struct("StrataStore")
            .field("objects", &objects)
            .field("coordinators", &self.coordinator_count())
            .finish_non_exhaustive()
    }
}

/// Builder for [`StrataStore`].
///
/// # Example
///
/// ```rust
/// use understory_strata::{ListStrategy, StrataStore};
///
/// let store = StrataStore::builder()
///     .default_list_strategy(ListStrategy::Direct)
///     .list_strategy("Children", ListStrategy::ObservableElements)
///     .build();
///
/// assert_eq!(store.list_strategy("Children"), ListStrategy::ObservableElements);
/// assert_eq!(store.list_strategy("Tags"), ListStrategy::Direct);
/// ```
#[derive(Debug, Default)]
pub struct StrataStoreBuilder {
    lists: ListConfig,
}

impl StrataStoreBuilder {
    /// Creates a builder with the default configuration.
    ///
    /// Lists default to [`ListStrategy::ObservableElements`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the strategy used for lists without an explicit one.
    #[must_use]
    pub fn default_list_strategy(mut self, strategy: ListStrategy) -> Self {
        self.lists.default_strategy = strategy;
        self
    }

    /// Sets the strategy for one list property.
    #[must_use]
    pub fn list_strategy(mut self, name: &str, strategy: ListStrategy) -> Self {
        self.lists.strategies.insert(String::from(name), strategy);
        self
    }

    /// Registers the list strategies declared by a schema.
    #[must_use]
    pub fn schema(mut self, schema: &Schema) -> Self {
        for (name, list) in schema.lists() {
            self.lists
                .strategies
                .insert(String::from(name), list.strategy);
        }
        self
    }

    /// Builds the store.
    #[must_use]
    pub fn build(self) -> StrataStore {
        StrataStore {
            inner: Rc::new(StoreInner {
                layers: RefCell::new(LayerStore::new()),
                coordinators: RefCell::new(HashMap::new()),
                lists: RefCell::new(self.lists),
            }),
        }
    }
}
