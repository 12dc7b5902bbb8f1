// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Typed property flyweights.
//!
//! A [`PropertyAccess<T>`] is a caller-owned handle giving typed access to one
//! property of one object. It is cheap to create: all state lives in the shared
//! [`Coordinator`], which the store creates on the first request for a
//! property and retires when the last flyweight goes away.
//!
//! Dropping the flyweight (or calling [`PropertyAccess::dispose`]) detaches it
//! from its coordinator exactly once. Because disposal consumes the handle,
//! use after disposal does not compile.

use alloc::rc::{Rc, Weak};
use core::fmt;

use crate::coordinator::{Coordinator, PropertyEvent, PropertyEventKind};
use crate::error::StrataError;
use crate::id::{Layer, ObjectId};
use crate::observer::{ObserverList, Subscription};
use crate::store::StrataStore;
use crate::value::read_optional_or_default;

/// A change of a property's effective value.
///
/// Missing or badly typed values are reported as `T::default()`.
#[derive(Clone, Debug, PartialEq)]
pub struct ValueChange<T> {
    /// Effective value before the change.
    pub old: T,
    /// Effective value after the change.
    pub new: T,
    /// Active layer before the change.
    pub previous_layer: Option<Layer>,
    /// Active layer after the change.
    pub active_layer: Option<Layer>,
}

struct AccessEvents<T: 'static> {
    value_changed: ObserverList<ValueChange<T>>,
    is_set_changed: ObserverList<bool>,
    baseline_set_changed: ObserverList<bool>,
    layer_changed: ObserverList<PropertyEvent>,
}

impl<T: Clone + Default + 'static> AccessEvents<T> {
    fn new() -> Self {
        Self {
            value_changed: ObserverList::new(),
            is_set_changed: ObserverList::new(),
            baseline_set_changed: ObserverList::new(),
            layer_changed: ObserverList::new(),
        }
    }

    fn handle(&self, event: &PropertyEvent) {
        self.layer_changed.notify(event);
        let scalar = matches!(
            event.kind,
            PropertyEventKind::Set { .. }
                | PropertyEventKind::Removed { .. }
                | PropertyEventKind::Cleared
        );
        if scalar && event.value_changed() {
            self.value_changed.notify(&ValueChange {
                old: read_optional_or_default(event.old_value.as_ref()),
                new: read_optional_or_default(event.new_value.as_ref()),
                previous_layer: event.previous_active,
                active_layer: event.active,
            });
        }
        if event.was_set() != event.is_set() {
            self.is_set_changed.notify(&event.is_set());
        }
        if event.was_baseline_set != event.baseline_set {
            self.baseline_set_changed.notify(&event.baseline_set);
        }
    }
}

/// Typed, disposable handle to one property of one object.
///
/// # Example
///
/// ```rust
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use understory_strata::{Layer, ObjectId, StrataStore};
///
/// let store = StrataStore::new();
/// let id = ObjectId::from_u128(7);
/// let width = store.property::<f64>(id, "Width");
/// assert!(!width.is_set());
///
/// let seen = Rc::new(RefCell::new(Vec::new()));
/// let _sub = {
///     let seen = seen.clone();
///     width.on_value_changed(move |change| seen.borrow_mut().push(change.new))
/// };
///
/// width.set_baseline(10.0);
/// width.set(Layer::Override(0), 20.0);
/// // Shadowed by override 0: no effective change.
/// width.set_baseline(15.0);
///
/// assert_eq!(*seen.borrow(), vec![10.0, 20.0]);
/// assert_eq!(width.get_or_default(), 20.0);
/// ```
pub struct PropertyAccess<T: Clone + Default + 'static> {
    store: StrataStore,
    coordinator: Rc<Coordinator>,
    events: Rc<AccessEvents<T>>,
    subscription: Option<Subscription>,
}

impl<T: Clone + Default + 'static> PropertyAccess<T> {
    pub(crate) fn new(store: StrataStore, coordinator: Rc<Coordinator>) -> Self {
        let events = Rc::new(AccessEvents::new());
        let weak: Weak<AccessEvents<T>> = Rc::downgrade(&events);
        let subscription = coordinator.subscribe(move |event| {
            if let Some(events) = weak.upgrade() {
                events.handle(event);
            }
        });
        Self {
            store,
            coordinator,
            events,
            subscription: Some(subscription),
        }
    }

    /// Returns the object this flyweight addresses.
    #[must_use]
    pub fn object(&self) -> ObjectId {
        self.coordinator.object()
    }

    /// Returns the property this flyweight addresses.
    #[must_use]
    pub fn property(&self) -> &str {
        self.coordinator.property()
    }

    /// Returns the store that issued this flyweight.
    #[must_use]
    pub fn store(&self) -> &StrataStore {
        &self.store
    }

    /// Returns `true` if `store` issued this flyweight.
    #[must_use]
    pub fn is_issued_by(&self, store: &StrataStore) -> bool {
        self.store.ptr_eq(store)
            && store
                .coordinator(self.object(), self.property())
                .is_some_and(|live| Rc::ptr_eq(&live, &self.coordinator))
    }

    // =========================================================================
    // Cached state
    // =========================================================================

    /// Returns `true` if any layer holds a value.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.coordinator.active_layer().is_some()
    }

    /// Returns `true` if the baseline holds a value.
    #[must_use]
    pub fn is_baseline_set(&self) -> bool {
        self.coordinator.is_baseline_set()
    }

    /// Returns the active layer.
    #[must_use]
    pub fn active_layer(&self) -> Option<Layer> {
        self.coordinator.active_layer()
    }

    /// Returns the active layer as an integer index.
    ///
    /// See [`UNRESOLVED_LAYER_INDEX`](crate::UNRESOLVED_LAYER_INDEX) and
    /// [`BASELINE_LAYER_INDEX`](crate::BASELINE_LAYER_INDEX).
    #[must_use]
    pub fn active_layer_index(&self) -> i32 {
        self.coordinator.active_layer_index()
    }

    /// Returns `true` if the baseline is the active layer.
    #[must_use]
    pub fn is_active_layer_baseline(&self) -> bool {
        self.active_layer().is_some_and(Layer::is_baseline)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Reads the effective value.
    ///
    /// # Errors
    ///
    /// [`StrataError::TypeMismatch`] if the active value is not a `T`.
    pub fn try_get(&self) -> Result<Option<T>, StrataError> {
        let layers = self.store.layers();
        self.coordinator
            .active_value(&layers)
            .map(|value| value.try_read())
            .transpose()
    }

    /// Reads the effective value, or `T::default()` when unset or badly typed.
    #[must_use]
    pub fn get_or_default(&self) -> T {
        let layers = self.store.layers();
        read_optional_or_default(self.coordinator.active_value(&layers))
    }

    /// Reads the baseline value.
    ///
    /// # Errors
    ///
    /// [`StrataError::TypeMismatch`] if the baseline value is not a `T`.
    pub fn baseline(&self) -> Result<Option<T>, StrataError> {
        self.coordinator
            .try_get_baseline_value(&self.store.layers())
    }

    /// Reads the value at exactly `layer`.
    ///
    /// # Errors
    ///
    /// [`StrataError::TypeMismatch`] if the value is not a `T`.
    pub fn layer_value(&self, layer: Layer) -> Result<Option<T>, StrataError> {
        self.coordinator
            .try_get_override_value(&self.store.layers(), layer)
    }

    /// Returns the value that shows through at `start`, scanning down to the
    /// baseline.
    ///
    /// # Errors
    ///
    /// [`StrataError::TypeMismatch`] if the value found is not a `T`.
    pub fn search_for_first_set(&self, start: Layer) -> Result<Option<(Layer, T)>, StrataError> {
        self.coordinator
            .search_for_first_set_value(&self.store.layers(), start)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Writes `value` at `layer`.
    pub fn set(&self, layer: Layer, value: T) {
        self.store
            .set_value(self.object(), layer, self.property(), value);
    }

    /// Writes `value` at the baseline.
    pub fn set_baseline(&self, value: T) {
        self.set(Layer::Baseline, value);
    }

    /// Removes the value at `layer`, returning `true` if one was removed.
    pub fn remove(&self, layer: Layer) -> bool {
        self.store.remove_value(self.object(), layer, self.property())
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Observes changes of the effective value.
    ///
    /// Writes to layers shadowed by the active layer are not reported.
    pub fn on_value_changed(&self, callback: impl Fn(&ValueChange<T>) + 'static) -> Subscription {
        self.events.value_changed.subscribe(callback)
    }

    /// Observes the property becoming set or unset.
    pub fn on_is_set_changed(&self, callback: impl Fn(&bool) + 'static) -> Subscription {
        self.events.is_set_changed.subscribe(callback)
    }

    /// Observes the baseline becoming set or unset.
    pub fn on_is_baseline_set_changed(&self, callback: impl Fn(&bool) + 'static) -> Subscription {
        self.events.baseline_set_changed.subscribe(callback)
    }

    /// Observes every raw change, including writes to shadowed layers.
    pub fn on_layer_changed(&self, callback: impl Fn(&PropertyEvent) + 'static) -> Subscription {
        self.events.layer_changed.subscribe(callback)
    }

    /// Detaches from the coordinator.
    ///
    /// Equivalent to dropping the flyweight.
    pub fn dispose(self) {
        drop(self);
    }
}

impl<T: Clone + Default + 'static> Drop for PropertyAccess<T> {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
            self.store.release_coordinator(&self.coordinator);
        }
    }
}

impl<T: Clone + Default + 'static> fmt::Debug for PropertyAccess<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyAccess")
            .field("object", &self.object())
            .field("property", &self.property())
            .field("active_layer", &self.active_layer())
            .field("is_baseline_set", &self.is_baseline_set())
            .finish_non_exhaustive()
    }
}
