// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Identity-preserving projections of reference lists.
//!
//! A [`ListAdapter<R, A>`] keeps an [`ObservableList<A>`] in step with a raw
//! list of keys (usually [`ObjectId`](crate::ObjectId)s). Adapted elements are
//! identified by their key, not their position: a key that moves is moved in
//! the target, never rebuilt.
//!
//! ## Reconciliation
//!
//! Each raw change runs [`reconcile`]:
//!
//! 1. Index the new keys by position. Only the first occurrence of a repeated
//!    key counts; later ones are ignored.
//! 2. Walk the tracked keys in reverse and remove the ones no longer present
//!    from both the tracker and the target, at the same index.
//! 3. Sort the retained keys into their new relative order with adjacent
//!    swaps, mirroring every swap in the target.
//! 4. Insert the untracked keys in ascending position, constructing their
//!    adapted elements.
//!
//! A [`ListChange::Reset`] clears both structures and runs step 4 only.

use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::fmt;
use core::hash::Hash;

use hashbrown::HashMap;

use crate::collection::ObservableList;
use crate::error::StrataError;
use crate::list::{ListAccess, ListChange, ListNotification};
use crate::observer::Subscription;
use crate::store::StrataStore;

/// Operation counts of one reconciliation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Adapted elements removed (and dropped).
    pub removed: usize,
    /// Adjacent swaps performed.
    pub moved: usize,
    /// Adapted elements constructed and inserted.
    pub inserted: usize,
}

/// Reconciles `tracker` and `target` against `keys`.
///
/// `tracker` holds the key of every element of `target`, index for index, and
/// is kept that way. `make` is called once per key that was not tracked.
///
/// If the two lengths disagree on entry, `target` was edited behind the
/// tracker's back: both are cleared and rebuilt from `keys`. If they come to
/// disagree part way through (an observer of `target` edited it), the pass
/// stops and leaves the repair to the next call.
///
/// # Example
///
/// ```rust
/// use understory_strata::{ObservableList, ReconcileStats, reconcile};
///
/// let target = ObservableList::new();
/// let mut tracker = Vec::new();
/// reconcile(&mut tracker, &target, &['a', 'b', 'c'], |k| k.to_ascii_uppercase());
///
/// let stats = reconcile(&mut tracker, &target, &['b', 'c', 'a'], |k| k.to_ascii_uppercase());
/// assert_eq!(stats, ReconcileStats { removed: 0, moved: 2, inserted: 0 });
/// assert_eq!(target.to_vec(), vec!['B', 'C', 'A']);
/// ```
pub fn reconcile<R, A>(
    tracker: &mut Vec<R>,
    target: &ObservableList<A>,
    keys: &[R],
    make: impl FnMut(&R) -> A,
) -> ReconcileStats
where
    R: Eq + Hash + Clone,
    A: 'static,
{
    reconcile_while(tracker, target, keys, make, || true)
}

/// [`reconcile`], stopping after any target edit once `proceed` says so.
fn reconcile_while<R, A>(
    tracker: &mut Vec<R>,
    target: &ObservableList<A>,
    keys: &[R],
    mut make: impl FnMut(&R) -> A,
    proceed: impl Fn() -> bool,
) -> ReconcileStats
where
    R: Eq + Hash + Clone,
    A: 'static,
{
    let mut stats = ReconcileStats::default();
    if tracker.len() != target.len() {
        tracing::warn!(
            tracked = tracker.len(),
            present = target.len(),
            "adapted list edited outside its adapter; rebuilding"
        );
        stats.removed = target.len();
        tracker.clear();
        drop(target.clear());
    }
    let interrupted = |tracked: usize| {
        let stop = tracked != target.len() || !proceed();
        if stop {
            tracing::debug!("reconciliation stopped early");
        }
        stop
    };

    let mut positions: HashMap<&R, usize> = HashMap::with_capacity(keys.len());
    let mut order: Vec<&R> = Vec::with_capacity(keys.len());
    let mut duplicates = 0_usize;
    for key in keys {
        if positions.contains_key(key) {
            duplicates += 1;
            continue;
        }
        positions.insert(key, order.len());
        order.push(key);
    }
    if duplicates > 0 {
        tracing::warn!(duplicates, "repeated keys in reference list; keeping first occurrences");
    }

    for index in (0..tracker.len()).rev() {
        if !positions.contains_key(&tracker[index]) {
            tracker.remove(index);
            drop(target.remove(index));
            stats.removed += 1;
            if interrupted(tracker.len()) {
                return stats;
            }
        }
    }

    let rank = |key: &R| positions.get(key).copied().unwrap_or(usize::MAX);
    for start in 1..tracker.len() {
        let mut k = start;
        while k > 0 && rank(&tracker[k - 1]) > rank(&tracker[k]) {
            tracker.swap(k - 1, k);
            target.move_item(k, k - 1);
            stats.moved += 1;
            if interrupted(tracker.len()) {
                return stats;
            }
            k -= 1;
        }
    }

    for (position, key) in order.into_iter().enumerate() {
        if tracker.get(position) == Some(key) {
            continue;
        }
        let element = make(key);
        tracker.insert(position, key.clone());
        target.insert(position, element);
        stats.inserted += 1;
        if interrupted(tracker.len()) {
            return stats;
        }
    }

    stats
}

type Factory<R, A> = Box<dyn Fn(&StrataStore, &R) -> A>;

struct AdapterState<R, A: 'static> {
    store: StrataStore,
    factory: Factory<R, A>,
    /// Keys of the last completed pass.
    tracker: RefCell<Vec<R>>,
    target: ObservableList<A>,
    reconciling: Cell<bool>,
    disposed: Cell<bool>,
    queued: RefCell<Option<(bool, Vec<R>)>>,
    last_stats: Cell<ReconcileStats>,
}

impl<R: Eq + Hash + Clone + 'static, A: 'static> AdapterState<R, A> {
    fn handle(&self, reset: bool, keys: Vec<R>) {
        if self.disposed.get() {
            return;
        }
        if self.reconciling.get() {
            // Re-entered from a factory or target observer: run once the
            // outer pass finishes, against the newest keys.
            let mut queued = self.queued.borrow_mut();
            let reset = reset || queued.as_ref().is_some_and(|(r, _)| *r);
            *queued = Some((reset, keys));
            return;
        }
        self.reconciling.set(true);
        let mut repaired = false;
        let mut next = Some((reset, keys));
        while let Some((reset, keys)) = next {
            let in_step = self.run(reset, &keys);
            next = self.queued.borrow_mut().take();
            if !in_step && !repaired && !self.disposed.get() {
                // One rebuild per change; a pass that is still disturbed
                // after that waits for the next change.
                repaired = true;
                next = next.or(Some((false, keys)));
            }
        }
        self.reconciling.set(false);
        if self.disposed.get() {
            self.release();
        }
    }

    /// Runs one pass, returning `false` if the target fell out of step.
    fn run(&self, reset: bool, keys: &[R]) -> bool {
        if self.disposed.get() {
            return true;
        }
        let mut tracker = self.tracker.borrow().clone();
        let mut stats = ReconcileStats::default();
        if reset {
            stats.removed = tracker.len();
            tracker.clear();
            drop(self.target.clear());
        }
        let pass = reconcile_while(
            &mut tracker,
            &self.target,
            keys,
            |key| (self.factory)(&self.store, key),
            || !self.disposed.get(),
        );
        if self.disposed.get() {
            return true;
        }
        stats.removed += pass.removed;
        stats.moved = pass.moved;
        stats.inserted = pass.inserted;
        let in_step = tracker.len() == self.target.len();
        *self.tracker.borrow_mut() = tracker;
        self.last_stats.set(stats);
        tracing::debug!(
            reset,
            in_step,
            removed = stats.removed,
            moved = stats.moved,
            inserted = stats.inserted,
            "reconciled list adapter"
        );
        in_step
    }

    fn release(&self) {
        self.tracker.borrow_mut().clear();
        drop(self.target.clear());
    }
}

/// Identity-preserving projection of a reference list into an
/// [`ObservableList`].
///
/// The target belongs to the adapter: edit the wrapped list, not the target.
/// A target edited directly is rebuilt from the keys on the next change.
///
/// Dropping the adapter is allowed anywhere, including from a factory or a
/// target observer during reconciliation. The pass in progress stops and the
/// target is cleared once it unwinds.
///
/// # Example
///
/// ```rust
/// use std::rc::Rc;
/// use understory_strata::{Layer, ListAdapter, ObjectId, ObservableList, StrataStore};
///
/// let store = StrataStore::new();
/// let owner = ObjectId::from_u128(1);
/// let children = store.list::<ObjectId>(owner, "Children");
/// let target = ObservableList::new();
///
/// let adapter = ListAdapter::new(&store, children, target.clone(), |_, id: &ObjectId| {
///     Rc::new(id.as_u128())
/// })
/// .unwrap();
///
/// let [a, b] = [ObjectId::from_u128(10), ObjectId::from_u128(11)];
/// adapter.access().set(Layer::Baseline, vec![a, b]);
/// let first = target.get(0).unwrap();
///
/// adapter.access().set(Layer::Baseline, vec![b, a]);
/// assert!(Rc::ptr_eq(&first, &target.get(1).unwrap()));
/// ```
pub struct ListAdapter<R: Eq + Hash + Clone + Default + 'static, A: 'static> {
    state: Rc<AdapterState<R, A>>,
    subscription: Option<Subscription>,
    access: ListAccess<R>,
}

impl<R: Eq + Hash + Clone + Default + 'static, A: 'static> ListAdapter<R, A> {
    /// Wraps `access`, which must have been issued by `store`, and fills
    /// `target` from the current keys.
    ///
    /// `target` is cleared first.
    ///
    /// # Errors
    ///
    /// [`StrataError::OwnershipMismatch`] if another store issued `access`.
    pub fn new(
        store: &StrataStore,
        access: ListAccess<R>,
        target: ObservableList<A>,
        factory: impl Fn(&StrataStore, &R) -> A + 'static,
    ) -> Result<Self, StrataError> {
        if !access.is_issued_by(store) {
            return Err(StrataError::OwnershipMismatch {
                object: access.object(),
                property: String::from(access.property()),
            });
        }
        let state = Rc::new(AdapterState {
            store: store.clone(),
            factory: Box::new(factory),
            tracker: RefCell::new(Vec::new()),
            target,
            reconciling: Cell::new(false),
            disposed: Cell::new(false),
            queued: RefCell::new(None),
            last_stats: Cell::new(ReconcileStats::default()),
        });
        let weak: Weak<AdapterState<R, A>> = Rc::downgrade(&state);
        let subscription = access.on_list_changed(move |notification: &ListNotification<R>| {
            if let Some(state) = weak.upgrade() {
                let reset = matches!(notification.change, ListChange::Reset);
                state.handle(reset, notification.items.clone());
            }
        });
        state.handle(true, access.items());
        Ok(Self {
            state,
            subscription: Some(subscription),
            access,
        })
    }

    /// Returns the wrapped list flyweight.
    #[must_use]
    pub fn access(&self) -> &ListAccess<R> {
        &self.access
    }

    /// Returns the target collection.
    #[must_use]
    pub fn target(&self) -> &ObservableList<A> {
        &self.state.target
    }

    /// Returns the keys of the target's elements, in order.
    ///
    /// During a reconciliation this returns the keys as of the last completed
    /// pass.
    #[must_use]
    pub fn keys(&self) -> Vec<R> {
        self.state.tracker.borrow().clone()
    }

    /// Returns the operation counts of the most recent reconciliation.
    #[must_use]
    pub fn last_stats(&self) -> ReconcileStats {
        self.state.last_stats.get()
    }

    /// Drops every adapted element, clears the target and releases the
    /// flyweight.
    ///
    /// Equivalent to dropping the adapter.
    pub fn dispose(self) {
        drop(self);
    }
}

impl<R: Eq + Hash + Clone + Default + 'static, A: 'static> Drop for ListAdapter<R, A> {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.state.disposed.set(true);
        self.state.queued.borrow_mut().take();
        if !self.state.reconciling.get() {
            self.state.release();
        }
    }
}

impl<R: Eq + Hash + Clone + Default + 'static, A: 'static> fmt::Debug for ListAdapter<R, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListAdapter")
            .field("access", &self.access)
            .field("len", &self.state.target.len())
            .field("last_stats", &self.last_stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn upper(key: &char) -> char {
        key.to_ascii_uppercase()
    }

    #[test]
    fn removals_then_inserts() {
        let target = ObservableList::new();
        let mut tracker = Vec::new();
        reconcile(&mut tracker, &target, &['a', 'b', 'c', 'd'], upper);
        let stats = reconcile(&mut tracker, &target, &['e', 'c', 'a'], upper);
        assert_eq!(
            stats,
            ReconcileStats {
                removed: 2,
                moved: 1,
                inserted: 1
            }
        );
        assert_eq!(tracker, vec!['e', 'c', 'a']);
        assert_eq!(target.to_vec(), vec!['E', 'C', 'A']);
    }

    #[test]
    fn duplicates_keep_first_occurrence() {
        let target = ObservableList::new();
        let mut tracker = Vec::new();
        let stats = reconcile(&mut tracker, &target, &['a', 'b', 'a', 'c', 'b'], upper);
        assert_eq!(stats.inserted, 3);
        assert_eq!(tracker, vec!['a', 'b', 'c']);
        let stats = reconcile(&mut tracker, &target, &['b', 'b', 'a'], upper);
        assert_eq!(tracker, vec!['b', 'a']);
        assert_eq!(stats.removed, 1);
        assert_eq!(target.to_vec(), vec!['B', 'A']);
    }

    #[test]
    fn unchanged_keys_do_nothing() {
        let target = ObservableList::new();
        let mut tracker = Vec::new();
        reconcile(&mut tracker, &target, &['x', 'y'], upper);
        let stats = reconcile(&mut tracker, &target, &['x', 'y'], upper);
        assert_eq!(stats, ReconcileStats::default());
    }

    #[test]
    fn edited_target_is_rebuilt() {
        let target = ObservableList::new();
        let mut tracker = Vec::new();
        reconcile(&mut tracker, &target, &['a', 'b'], upper);
        target.push('Z');
        let stats = reconcile(&mut tracker, &target, &['a', 'b'], upper);
        assert_eq!(
            stats,
            ReconcileStats {
                removed: 3,
                moved: 0,
                inserted: 2
            }
        );
        assert_eq!(tracker, vec!['a', 'b']);
        assert_eq!(target.to_vec(), vec!['A', 'B']);
    }

    #[test]
    fn observer_edit_stops_the_pass() {
        let target = ObservableList::new();
        let mut tracker = Vec::new();
        let _sub = {
            let edit = target.clone();
            target.on_changed(move |change| {
                if *change == (crate::CollectionChange::Inserted { index: 0 }) {
                    drop(edit.clear());
                }
            })
        };
        let stats = reconcile(&mut tracker, &target, &['a', 'b', 'c'], upper);
        assert_eq!(stats.inserted, 1);
        assert!(target.is_empty());
        assert_eq!(tracker, vec!['a']);
    }

    #[test]
    fn reversal_uses_adjacent_swaps() {
        let target = ObservableList::new();
        let mut tracker = Vec::new();
        reconcile(&mut tracker, &target, &['a', 'b', 'c', 'd'], upper);
        let moves = Rc::new(RefCell::new(Vec::new()));
        let _sub = {
            let moves = moves.clone();
            target.on_changed(move |change| moves.borrow_mut().push(*change))
        };
        let stats = reconcile(&mut tracker, &target, &['d', 'c', 'b', 'a'], upper);
        assert_eq!(stats.moved, 6);
        assert!(moves.borrow().iter().all(|change| matches!(
            change,
            crate::CollectionChange::Moved { from, to } if *from == *to + 1
        )));
        assert_eq!(target.to_vec(), vec!['D', 'C', 'B', 'A']);
    }
}
