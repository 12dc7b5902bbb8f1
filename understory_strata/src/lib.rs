// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Understory Strata: a layered, observable per-object property store.
//!
//! Every property of every object can hold one value per *layer*. The
//! baseline layer is the fallback; numbered override layers shadow it, and
//! the highest override holding a value wins. Changes are reported per
//! (object, property) pair, and adapters project raw values into richer
//! domain values and identity-preserving collections.
//!
//! ## Core Concepts
//!
//! ### Storage
//!
//! [`LayerStore`] is the raw sparse map from (object, layer, property) to a
//! type-erased [`StoredValue`]. Every mutation queues a [`LayerEvent`].
//!
//! ### The store
//!
//! [`StrataStore`] owns the layer store and routes its events. Mutations are
//! synchronous: by the time a call returns, every observer has run.
//!
//! ### Flyweights
//!
//! [`PropertyAccess<T>`] and [`ListAccess<T>`] are typed, caller-owned
//! handles for one property. Flyweights for the same property share a
//! [`Coordinator`] that caches the active layer. Dropping the last flyweight
//! retires the coordinator.
//!
//! ### Adapters
//!
//! - [`ValueAdapter<R, A>`] lazily builds an `A` from the raw `R` and drops
//!   it when the raw value changes.
//! - [`ListAdapter<R, A>`] mirrors a list of keys into an
//!   [`ObservableList<A>`], moving elements whose keys move instead of
//!   rebuilding them.
//!
//! ### Records
//!
//! [`Schema`] describes how a record type's fields map onto properties;
//! [`write_record`] and [`read_record`] copy [`Record`]s in and out.
//!
//! ## Quick Start
//!
//! ```rust
//! use understory_strata::{Layer, ObjectId, StrataStore};
//!
//! let store = StrataStore::new();
//! let id = ObjectId::from_u128(1);
//! let color = store.property::<String>(id, "Color");
//!
//! color.set_baseline("Red".into());
//! assert!(color.is_active_layer_baseline());
//!
//! color.set(Layer::Override(0), "Blue".into());
//! color.set(Layer::Override(2), "Green".into());
//! assert_eq!(color.active_layer_index(), 2);
//! assert_eq!(color.get_or_default(), "Green");
//!
//! color.remove(Layer::Override(2));
//! assert_eq!(color.active_layer_index(), 0);
//! assert_eq!(color.get_or_default(), "Blue");
//!
//! color.remove(Layer::Override(0));
//! assert_eq!(color.get_or_default(), "Red");
//! ```
//!
//! ## Threading
//!
//! The store is single-threaded (`Rc`/`RefCell`). No internal borrow is held
//! while observers run, so observers may read, write, create flyweights, or
//! drop the flyweight being notified.
//!
//! ## Logging
//!
//! The crate emits [`tracing`] events: `trace` for raw mutations, `debug` for
//! coordinator lifecycle and reconciliation summaries, and `warn` for badly
//! typed values and repeated list keys. No subscriber is installed.
//!
//! ## `no_std` Support
//!
//! This crate is `no_std` and uses `alloc`. The default `std` feature adds
//! [`ObjectId::new_random`].

#![no_std]

extern crate alloc;

mod access;
mod adapter;
mod collection;
mod coordinator;
mod error;
mod id;
mod layers;
mod list;
mod list_adapter;
mod observer;
mod populate;
mod schema;
mod store;
mod value;

pub use access::{PropertyAccess, ValueChange};
pub use adapter::ValueAdapter;
pub use collection::{CollectionChange, ObservableList};
pub use coordinator::{Coordinator, PropertyEvent, PropertyEventKind};
pub use error::StrataError;
pub use id::{BASELINE_LAYER_INDEX, Layer, ObjectId, UNRESOLVED_LAYER_INDEX, layer_index};
pub use layers::{ElementChange, LayerEvent, LayerStore};
pub use list::{
    ListAccess, ListChange, ListNotification, ListStrategy, indexed_name, parse_indexed_name,
};
pub use list_adapter::{ListAdapter, ReconcileStats, reconcile};
pub use observer::{ObserverList, Subscription};
pub use populate::{FieldValue, Record, read_record, write_record};
pub use schema::{
    Exclusion, IdentifierSource, ListSchema, PropertySchema, Schema, SchemaBuilder,
};
pub use store::{StrataStore, StrataStoreBuilder, WeakStrataStore};
pub use value::{ElementList, StoredValue, read_optional_or_default};
