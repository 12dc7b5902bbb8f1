// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Explicit observer registration with RAII unsubscription.
//!
//! Every event source in this crate is an [`ObserverList`]. Registering a
//! callback returns a [`Subscription`]; dropping (or calling
//! [`Subscription::unsubscribe`] on) the handle removes the callback exactly
//! once.
//!
//! Dispatch takes a snapshot of the registered callbacks and releases every
//! borrow before invoking them, so a callback may register new observers,
//! drop its own subscription, or drop other subscriptions of the same list.
//! A callback whose subscription is dropped mid-dispatch is not invoked for
//! the remainder of that dispatch.

use alloc::rc::{Rc, Weak};
use core::cell::RefCell;
use core::fmt;

use smallvec::SmallVec;

type Callback<E> = Rc<dyn Fn(&E)>;

/// Most sources have one or two observers (a flyweight and its adapter).
const INLINE_OBSERVERS: usize = 2;

struct Slots<E: ?Sized> {
    next_token: u64,
    entries: SmallVec<[(u64, Callback<E>); INLINE_OBSERVERS]>,
}

impl<E: ?Sized> Slots<E> {
    fn contains(&self, token: u64) -> bool {
        self.entries.iter().any(|(t, _)| *t == token)
    }
}

trait Detach {
    fn detach(&self, token: u64);
    fn is_attached(&self, token: u64) -> bool;
}

impl<E: ?Sized> Detach for RefCell<Slots<E>> {
    fn is_attached(&self, token: u64) -> bool {
        self.borrow().contains(token)
    }

    fn detach(&self, token: u64) {
        // A detach may run from inside a callback of this very list; dispatch
        // holds no borrow at that point, so this cannot conflict.
        self.borrow_mut().entries.retain(|(t, _)| *t != token);
    }
}

/// A list of callbacks interested in events of type `E`.
pub struct ObserverList<E: ?Sized> {
    slots: Rc<RefCell<Slots<E>>>,
}

impl<E: ?Sized + 'static> ObserverList<E> {
    /// Creates an empty observer list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Rc::new(RefCell::new(Slots {
                next_token: 0,
                entries: SmallVec::new(),
            })),
        }
    }

    /// Registers a callback, returning the handle that unregisters it.
    #[must_use = "dropping the subscription unregisters the callback immediately"]
    pub fn subscribe(&self, callback: impl Fn(&E) + 'static) -> Subscription {
        let mut slots = self.slots.borrow_mut();
        let token = slots.next_token;
        slots.next_token += 1;
        slots.entries.push((token, Rc::new(callback)));
        let source: Weak<dyn Detach> = Rc::downgrade(&self.slots) as Weak<RefCell<Slots<E>>>;
        Subscription {
            source: Some(source),
            token,
        }
    }

    /// Invokes every registered callback with `event`, in registration order.
    pub fn notify(&self, event: &E) {
        let snapshot: SmallVec<[(u64, Callback<E>); INLINE_OBSERVERS]> =
            self.slots.borrow().entries.clone();
        for (token, callback) in snapshot {
            if self.slots.borrow().contains(token) {
                callback(event);
            }
        }
    }

    /// Returns the number of registered callbacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.borrow().entries.len()
    }

    /// Returns `true` if no callbacks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unregisters every callback.
    ///
    /// Outstanding [`Subscription`]s become inert.
    pub fn clear(&self) {
        self.slots.borrow_mut().entries.clear();
    }
}

impl<E: ?Sized + 'static> Default for ObserverList<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: ?Sized> fmt::Debug for ObserverList<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverList")
            .field("observers", &self.slots.borrow().entries.len())
            .finish()
    }
}

/// Handle for one registered callback.
///
/// Dropping the handle unregisters the callback. If the source has already
/// been dropped this is a no-op.
#[must_use = "dropping the subscription unregisters the callback immediately"]
pub struct Subscription {
    source: Option<Weak<dyn Detach>>,
    token: u64,
}

impl Subscription {
    /// Unregisters the callback now.
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    /// Returns `true` while the source is alive and the callback registered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.source
            .as_ref()
            .and_then(Weak::upgrade)
            .is_some_and(|source| source.is_attached(self.token))
    }

    fn detach(&mut self) {
        if let Some(source) = self.source.take().and_then(|weak| weak.upgrade()) {
            source.detach(self.token);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("token", &self.token)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;
    use core::cell::Cell;

    #[test]
    fn notifies_in_registration_order() {
        let list = ObserverList::<i32>::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let a = {
            let seen = seen.clone();
            list.subscribe(move |e| seen.borrow_mut().push(("a", *e)))
        };
        let b = {
            let seen = seen.clone();
            list.subscribe(move |e| seen.borrow_mut().push(("b", *e)))
        };
        list.notify(&7);
        assert_eq!(*seen.borrow(), vec![("a", 7), ("b", 7)]);
        drop((a, b));
        assert!(list.is_empty());
    }

    #[test]
    fn drop_unsubscribes_exactly_once() {
        let list = ObserverList::<()>::new();
        let hits = Rc::new(Cell::new(0));
        let sub = {
            let hits = hits.clone();
            list.subscribe(move |()| hits.set(hits.get() + 1))
        };
        list.notify(&());
        sub.unsubscribe();
        list.notify(&());
        assert_eq!(hits.get(), 1);
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn callback_may_drop_a_later_subscription() {
        let list = Rc::new(ObserverList::<()>::new());
        let later: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let later_hits = Rc::new(Cell::new(0));

        let _first = {
            let later = later.clone();
            list.subscribe(move |()| {
                later.borrow_mut().take();
            })
        };
        *later.borrow_mut() = Some({
            let later_hits = later_hits.clone();
            list.subscribe(move |()| later_hits.set(later_hits.get() + 1))
        });

        list.notify(&());
        assert_eq!(later_hits.get(), 0);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn cleared_source_makes_subscription_inert() {
        let list = ObserverList::<()>::new();
        let sub = list.subscribe(|()| {});
        assert!(sub.is_active());
        list.clear();
        assert!(!sub.is_active());
        drop(list);
        drop(sub);
    }
}
