// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Object and layer identification types.
//!
//! This module provides [`ObjectId`] for naming logical items in a
//! [`StrataStore`](crate::StrataStore) and [`Layer`] for naming the baseline
//! and override layers a property value can live in.

use core::fmt;

use uuid::Uuid;

/// Index reported for a property that has no active layer.
///
/// Flyweights report this until the property is set in some layer, and again
/// after every layer holding it has been removed.
pub const UNRESOLVED_LAYER_INDEX: i32 = -2;

/// Index of the baseline layer.
pub const BASELINE_LAYER_INDEX: i32 = -1;

/// An opaque 128-bit identifier naming one logical item in the store.
///
/// Items are never created explicitly: an object exists as soon as any of its
/// properties has a value in any layer.
///
/// # Example
///
/// ```rust
/// use understory_strata::ObjectId;
///
/// let id = ObjectId::from_u128(7);
/// assert_eq!(id.as_u128(), 7);
/// assert_ne!(id, ObjectId::nil());
/// ```
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ObjectId(Uuid);

impl ObjectId {
    /// Wraps an existing UUID.
    #[must_use]
    #[inline]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Creates an identifier from its 128-bit integer form.
    #[must_use]
    #[inline]
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// The all-zero identifier.
    #[must_use]
    #[inline]
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Creates a fresh random (v4) identifier.
    #[cfg(feature = "std")]
    #[must_use]
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    #[inline]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Returns the 128-bit integer form.
    #[must_use]
    #[inline]
    pub const fn as_u128(&self) -> u128 {
        self.0.as_u128()
    }
}

impl From<Uuid> for ObjectId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0.hyphenated())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

/// A layer a property value can be stored in.
///
/// The baseline layer is the always-present fallback; override layers shadow
/// it, and a higher override index shadows a lower one. The ordering of
/// `Layer` follows that precedence:
///
/// ```rust
/// use understory_strata::Layer;
///
/// assert!(Layer::Baseline < Layer::Override(0));
/// assert!(Layer::Override(0) < Layer::Override(3));
/// assert_eq!(Layer::Baseline.index(), -1);
/// assert_eq!(Layer::from_index(2), Some(Layer::Override(2)));
/// assert_eq!(Layer::from_index(-2), None);
/// ```
///
/// Ordering compares the full `u32` override index, so overrides above
/// `i32::MAX` still rank above every lower override.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Layer {
    /// The fallback layer, index `-1`.
    Baseline,
    /// An override layer, index `>= 0`.
    Override(u32),
}

impl Layer {
    /// Returns the integer index of this layer (`-1` for baseline).
    ///
    /// Override indices above `i32::MAX` saturate to `i32::MAX`. The index
    /// is for reporting only; precedence always uses the `Ord` impl.
    #[must_use]
    #[inline]
    pub const fn index(self) -> i32 {
        match self {
            Self::Baseline => BASELINE_LAYER_INDEX,
            Self::Override(n) if n > i32::MAX as u32 => i32::MAX,
            Self::Override(n) => n as i32,
        }
    }

    /// Converts an integer index back into a layer.
    ///
    /// Returns `None` for indices below `-1`.
    #[must_use]
    pub const fn from_index(index: i32) -> Option<Self> {
        if index == BASELINE_LAYER_INDEX {
            Some(Self::Baseline)
        } else if index >= 0 {
            Some(Self::Override(index as u32))
        } else {
            None
        }
    }

    /// Returns `true` for the baseline layer.
    #[must_use]
    #[inline]
    pub const fn is_baseline(self) -> bool {
        matches!(self, Self::Baseline)
    }
}

impl fmt::Debug for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Baseline => f.write_str("Baseline"),
            Self::Override(n) => f.debug_tuple("Override").field(n).finish(),
        }
    }
}

/// Converts an optional active layer into its integer form.
///
/// `None` maps to [`UNRESOLVED_LAYER_INDEX`].
#[must_use]
#[inline]
pub const fn layer_index(layer: Option<Layer>) -> i32 {
    match layer {
        Some(layer) => layer.index(),
        None => UNRESOLVED_LAYER_INDEX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;

    #[test]
    fn layer_ordering_follows_precedence() {
        let mut layers = [
            Layer::Override(2),
            Layer::Baseline,
            Layer::Override(0),
            Layer::Override(10),
        ];
        layers.sort();
        assert_eq!(
            layers,
            [
                Layer::Baseline,
                Layer::Override(0),
                Layer::Override(2),
                Layer::Override(10)
            ]
        );
    }

    #[test]
    fn layer_index_round_trip_and_sentinels() {
        assert_eq!(Layer::from_index(-1), Some(Layer::Baseline));
        assert_eq!(Layer::from_index(4).map(Layer::index), Some(4));
        assert_eq!(Layer::from_index(-3), None);
        assert_eq!(layer_index(None), UNRESOLVED_LAYER_INDEX);
        assert_eq!(layer_index(Some(Layer::Baseline)), -1);
    }

    #[test]
    fn overrides_beyond_i32_keep_their_rank() {
        let top = Layer::Override(u32::MAX);
        let mid = Layer::Override(1 << 31);
        assert!(Layer::Baseline < Layer::Override(5));
        assert!(Layer::Override(5) < mid);
        assert!(mid < top);
        assert_ne!(top, Layer::Baseline);
        assert_eq!(top.index(), i32::MAX);
        assert_eq!(mid.index(), i32::MAX);
        assert_eq!(Layer::Override(i32::MAX as u32).index(), i32::MAX);
    }

    #[test]
    fn object_id_debug_is_hyphenated() {
        let id = ObjectId::from_u128(1);
        assert_eq!(
            format!("{id:?}"),
            "ObjectId(00000000-0000-0000-0000-000000000001)"
        );
        assert_eq!(format!("{id}"), "00000000-0000-0000-0000-000000000001");
    }

    #[cfg(feature = "std")]
    #[test]
    fn random_ids_differ() {
        assert_ne!(ObjectId::new_random(), ObjectId::new_random());
    }
}
