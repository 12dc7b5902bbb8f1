// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Observable ordered collections.
//!
//! [`ObservableList<A>`] is the target a [`ListAdapter`](crate::ListAdapter)
//! keeps in sync with a raw reference list. It is a shared handle: clones see
//! the same items and the same observers.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;

use crate::observer::{ObserverList, Subscription};

/// A structural change to an [`ObservableList`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CollectionChange {
    /// An item was inserted at `index`.
    Inserted {
        /// Position of the new item.
        index: usize,
    },
    /// The item at `index` was removed.
    Removed {
        /// Former position of the item.
        index: usize,
    },
    /// An item moved from `from` to `to`.
    Moved {
        /// Former position.
        from: usize,
        /// New position.
        to: usize,
    },
    /// Every item was removed.
    Cleared,
}

struct Shared<A> {
    items: RefCell<Vec<A>>,
    observers: ObserverList<CollectionChange>,
}

/// A shared, observable ordered collection.
///
/// Observers run after the change is applied and while no borrow of the
/// items is held.
///
/// A list handed to a [`ListAdapter`](crate::ListAdapter) is owned by that
/// adapter. Observe it freely, but do not edit it through another handle: the
/// adapter treats such edits as corruption and rebuilds the list from its
/// keys.
///
/// # Panics
///
/// Index-taking methods panic on out-of-range indices, like [`Vec`].
///
/// # Example
///
/// ```rust
/// use understory_strata::{CollectionChange, ObservableList};
///
/// let list = ObservableList::new();
/// let log = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
/// let _sub = {
///     let log = log.clone();
///     list.on_changed(move |change| log.borrow_mut().push(*change))
/// };
///
/// list.push('a');
/// list.push('b');
/// list.move_item(1, 0);
/// assert_eq!(list.to_vec(), vec!['b', 'a']);
/// assert_eq!(log.borrow()[2], CollectionChange::Moved { from: 1, to: 0 });
/// ```
pub struct ObservableList<A> {
    shared: Rc<Shared<A>>,
}

impl<A> Clone for ObservableList<A> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<A: 'static> Default for ObservableList<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: 'static> ObservableList<A> {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Rc::new(Shared {
                items: RefCell::new(Vec::new()),
                observers: ObserverList::new(),
            }),
        }
    }

    /// Returns the number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.items.borrow().len()
    }

    /// Returns `true` if there are no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts `item` at `index`.
    pub fn insert(&self, index: usize, item: A) {
        self.shared.items.borrow_mut().insert(index, item);
        self.notify(CollectionChange::Inserted { index });
    }

    /// Appends `item`.
    pub fn push(&self, item: A) {
        let index = self.len();
        self.insert(index, item);
    }

    /// Removes and returns the item at `index`.
    ///
    /// Observers are notified before the item is returned, so it is dropped
    /// after every observer has seen the removal.
    pub fn remove(&self, index: usize) -> A {
        let item = self.shared.items.borrow_mut().remove(index);
        self.notify(CollectionChange::Removed { index });
        item
    }

    /// Moves the item at `from` to `to`.
    pub fn move_item(&self, from: usize, to: usize) {
        if from == to {
            return;
        }
        {
            let mut items = self.shared.items.borrow_mut();
            let item = items.remove(from);
            items.insert(to, item);
        }
        self.notify(CollectionChange::Moved { from, to });
    }

    /// Removes every item, returning them in order.
    pub fn clear(&self) -> Vec<A> {
        let items = core::mem::take(&mut *self.shared.items.borrow_mut());
        if !items.is_empty() {
            self.notify(CollectionChange::Cleared);
        }
        items
    }

    /// Runs `f` with the current items.
    ///
    /// `f` must not mutate this list.
    pub fn with_items<R>(&self, f: impl FnOnce(&[A]) -> R) -> R {
        f(&self.shared.items.borrow())
    }

    /// Observes structural changes.
    pub fn on_changed(&self, callback: impl Fn(&CollectionChange) + 'static) -> Subscription {
        self.shared.observers.subscribe(callback)
    }

    /// Returns `true` if both handles share the same items.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }

    fn notify(&self, change: CollectionChange) {
        self.shared.observers.notify(&change);
    }
}

impl<A: Clone + 'static> ObservableList<A> {
    /// Returns a clone of the item at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<A> {
        self.shared.items.borrow().get(index).cloned()
    }

    /// Returns a clone of every item.
    #[must_use]
    pub fn to_vec(&self) -> Vec<A> {
        self.shared.items.borrow().clone()
    }
}

impl<A> fmt::Debug for ObservableList<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableList")
            .field("len", &self.shared.items.borrow().len())
            .field("observers", &self.shared.observers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn structural_changes_are_reported() {
        let list = ObservableList::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let _sub = {
            let log = log.clone();
            list.on_changed(move |change| log.borrow_mut().push(*change))
        };
        list.push(1);
        list.push(2);
        list.insert(0, 0);
        list.move_item(0, 2);
        list.move_item(1, 1);
        assert_eq!(list.remove(0), 1);
        assert_eq!(list.clear(), vec![2, 0]);
        assert!(list.clear().is_empty());

        assert_eq!(
            *log.borrow(),
            vec![
                CollectionChange::Inserted { index: 0 },
                CollectionChange::Inserted { index: 1 },
                CollectionChange::Inserted { index: 0 },
                CollectionChange::Moved { from: 0, to: 2 },
                CollectionChange::Removed { index: 0 },
                CollectionChange::Cleared,
            ]
        );
    }

    #[test]
    fn observers_may_read_the_list() {
        let list = ObservableList::new();
        let lens = Rc::new(RefCell::new(Vec::new()));
        let _sub = {
            let lens = lens.clone();
            let reader = list.clone();
            list.on_changed(move |_| lens.borrow_mut().push(reader.len()))
        };
        list.push('a');
        list.push('b');
        assert_eq!(*lens.borrow(), vec![1, 2]);
        assert_eq!(list.get(1), Some('b'));
        assert_eq!(list.with_items(|items| items.len()), 2);
    }
}
