// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Memoized projections of single properties.
//!
//! A [`ValueAdapter<R, A>`] owns a [`PropertyAccess<R>`] and turns its raw
//! value into an adapted `A` with a caller-supplied factory, typically
//! resolving a stored identifier into another store-backed object.
//!
//! Construction is lazy. When the raw value changes, the memoized `A` is
//! dropped right away and rebuilding waits for the next read.

use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use alloc::string::String;
use core::cell::RefCell;
use core::fmt;

use crate::access::{PropertyAccess, ValueChange};
use crate::error::StrataError;
use crate::observer::{ObserverList, Subscription};
use crate::store::StrataStore;

type Factory<R, A> = Box<dyn Fn(&StrataStore, &R) -> A>;

struct Memo<A> {
    value: Option<A>,
    generation: u64,
}

struct AdapterShared<R: 'static, A> {
    memo: RefCell<Memo<A>>,
    value_changed: ObserverList<ValueChange<R>>,
}

impl<R: Clone + Default + 'static, A> AdapterShared<R, A> {
    fn invalidate(&self) -> bool {
        let superseded = {
            let mut memo = self.memo.borrow_mut();
            memo.generation += 1;
            memo.value.take()
        };
        superseded.is_some()
    }
}

/// Lazily constructed projection of one property.
///
/// # Example
///
/// ```rust
/// use understory_strata::{Layer, ObjectId, StrataStore, ValueAdapter};
///
/// let store = StrataStore::new();
/// let id = ObjectId::from_u128(1);
/// let label = ValueAdapter::new(&store, store.property::<u32>(id, "Count"), |_, n| {
///     format!("{n} items")
/// })
/// .unwrap();
///
/// // Unset: the factory is not called.
/// assert_eq!(label.get(), "");
///
/// store.set_value(id, Layer::Baseline, "Count", 3_u32);
/// assert_eq!(label.get(), "3 items");
/// assert!(label.is_constructed());
/// ```
pub struct ValueAdapter<R: Clone + Default + 'static, A: 'static> {
    store: StrataStore,
    shared: Rc<AdapterShared<R, A>>,
    factory: Factory<R, A>,
    subscription: Option<Subscription>,
    access: PropertyAccess<R>,
}

impl<R: Clone + Default + 'static, A: 'static> ValueAdapter<R, A> {
    /// Wraps `access`, which must have been issued by `store`.
    ///
    /// # Errors
    ///
    /// [`StrataError::OwnershipMismatch`] if another store issued `access`.
    pub fn new(
        store: &StrataStore,
        access: PropertyAccess<R>,
        factory: impl Fn(&StrataStore, &R) -> A + 'static,
    ) -> Result<Self, StrataError> {
        if !access.is_issued_by(store) {
            return Err(StrataError::OwnershipMismatch {
                object: access.object(),
                property: String::from(access.property()),
            });
        }
        let shared = Rc::new(AdapterShared {
            memo: RefCell::new(Memo {
                value: None,
                generation: 0,
            }),
            value_changed: ObserverList::new(),
        });
        let weak: Weak<AdapterShared<R, A>> = Rc::downgrade(&shared);
        let subscription = access.on_value_changed(move |change| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            shared.invalidate();
            shared.value_changed.notify(change);
        });
        Ok(Self {
            store: store.clone(),
            shared,
            factory: Box::new(factory),
            subscription: Some(subscription),
            access,
        })
    }

    /// Returns the wrapped flyweight.
    #[must_use]
    pub fn access(&self) -> &PropertyAccess<R> {
        &self.access
    }

    /// Returns `true` if an adapted value is memoized.
    #[must_use]
    pub fn is_constructed(&self) -> bool {
        self.shared.memo.borrow().value.is_some()
    }

    /// Drops the memoized value, if any.
    ///
    /// Returns `true` if a value was dropped.
    pub fn invalidate(&self) -> bool {
        self.shared.invalidate()
    }

    /// Observes changes of the underlying raw value.
    ///
    /// The memo is already invalidated when observers run.
    pub fn on_value_changed(&self, callback: impl Fn(&ValueChange<R>) + 'static) -> Subscription {
        self.shared.value_changed.subscribe(callback)
    }

    /// Builds and memoizes the adapted value if needed.
    ///
    /// Returns `false` when there is nothing to adapt: the property is unset,
    /// badly typed, or changed while the factory ran.
    fn ensure(&self) -> bool {
        if self.is_constructed() {
            return true;
        }
        let raw = match self.access.try_get() {
            Ok(Some(raw)) => raw,
            Ok(None) => return false,
            Err(error) => {
                tracing::warn!(
                    object = %self.access.object(),
                    property = self.access.property(),
                    %error,
                    "cannot adapt badly typed value; using default"
                );
                return false;
            }
        };
        let generation = self.shared.memo.borrow().generation;
        let value = (self.factory)(&self.store, &raw);
        let mut memo = self.shared.memo.borrow_mut();
        if memo.generation != generation {
            tracing::debug!(
                object = %self.access.object(),
                property = self.access.property(),
                "property changed during construction; result discarded"
            );
            return false;
        }
        memo.value = Some(value);
        true
    }
}

impl<R: Clone + Default + 'static, A: Default + 'static> ValueAdapter<R, A> {
    /// Runs `f` with the adapted value, constructing it first if needed.
    ///
    /// When the property is unset `f` sees `A::default()` and the factory is
    /// not called. `f` must not write to the adapted property.
    pub fn with_value<T>(&self, f: impl FnOnce(&A) -> T) -> T {
        if self.ensure() {
            let memo = self.shared.memo.borrow();
            if let Some(value) = &memo.value {
                return f(value);
            }
        }
        f(&A::default())
    }
}

impl<R: Clone + Default + 'static, A: Clone + Default + 'static> ValueAdapter<R, A> {
    /// Returns a clone of the adapted value, constructing it first if needed.
    ///
    /// Returns `A::default()` without calling the factory when the property
    /// is unset.
    #[must_use]
    pub fn get(&self) -> A {
        self.with_value(A::clone)
    }
}

impl<R: Clone + Default + 'static, A: 'static> ValueAdapter<R, A> {
    /// Drops the adapted value and the wrapped flyweight.
    ///
    /// Equivalent to dropping the adapter.
    pub fn dispose(self) {
        drop(self);
    }
}

impl<R: Clone + Default + 'static, A: 'static> Drop for ValueAdapter<R, A> {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.shared.invalidate();
    }
}

impl<R: Clone + Default + 'static, A: 'static> fmt::Debug for ValueAdapter<R, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueAdapter")
            .field("access", &self.access)
            .field("constructed", &self.is_constructed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{Layer, ObjectId};
    use core::cell::Cell;

    const ID: ObjectId = ObjectId::from_u128(21);

    fn counting_adapter(store: &StrataStore, calls: &Rc<Cell<u32>>) -> ValueAdapter<i32, i64> {
        let calls = calls.clone();
        ValueAdapter::new(store, store.property::<i32>(ID, "Raw"), move |_, raw| {
            calls.set(calls.get() + 1);
            i64::from(*raw) * 10
        })
        .unwrap()
    }

    #[test]
    fn memoizes_until_change() {
        let store = StrataStore::new();
        let calls = Rc::new(Cell::new(0));
        let adapter = counting_adapter(&store, &calls);

        assert_eq!(adapter.get(), 0);
        assert_eq!(calls.get(), 0);

        store.set_value(ID, Layer::Baseline, "Raw", 2_i32);
        assert!(!adapter.is_constructed());
        assert_eq!(adapter.get(), 20);
        assert_eq!(adapter.get(), 20);
        assert_eq!(calls.get(), 1);

        store.set_value(ID, Layer::Baseline, "Raw", 3_i32);
        assert!(!adapter.is_constructed());
        assert_eq!(adapter.get(), 30);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn shadowed_write_keeps_memo() {
        let store = StrataStore::new();
        let calls = Rc::new(Cell::new(0));
        let adapter = counting_adapter(&store, &calls);
        store.set_value(ID, Layer::Override(1), "Raw", 1_i32);
        assert_eq!(adapter.get(), 10);
        store.set_value(ID, Layer::Baseline, "Raw", 5_i32);
        assert!(adapter.is_constructed());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn badly_typed_raw_value_skips_factory() {
        let store = StrataStore::new();
        let calls = Rc::new(Cell::new(0));
        let adapter = counting_adapter(&store, &calls);
        store.set_value(ID, Layer::Baseline, "Raw", "seven");
        assert_eq!(adapter.get(), 0);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn rejects_foreign_access() {
        let store = StrataStore::new();
        let other = StrataStore::new();
        let result = ValueAdapter::new(&store, other.property::<i32>(ID, "Raw"), |_, r| *r);
        assert_eq!(
            result.err(),
            Some(StrataError::OwnershipMismatch {
                object: ID,
                property: String::from("Raw"),
            })
        );
        assert_eq!(other.coordinator_count(), 0);
    }

    #[test]
    fn dispose_releases_flyweight() {
        let store = StrataStore::new();
        let calls = Rc::new(Cell::new(0));
        let adapter = counting_adapter(&store, &calls);
        assert_eq!(store.attached_count(ID, "Raw"), 1);
        adapter.dispose();
        assert_eq!(store.coordinator_count(), 0);
    }
}
