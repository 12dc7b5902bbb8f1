// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Type-erased stored values.
//!
//! This module provides [`StoredValue`], the untyped slot held by every
//! property record, and [`ElementList`], the per-layer element sequence used by
//! lists stored with [`ListStrategy::ObservableElements`](crate::ListStrategy).

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::any::{Any, TypeId};
use core::fmt;

use crate::error::StrataError;

/// A type-erased property value.
///
/// Typed access is layered on top by the flyweights. Reads have two declared
/// failure modes: [`StoredValue::try_read`] reports a type mismatch, while
/// [`StoredValue::read_or_default`] substitutes the type's default.
///
/// # Example
///
/// ```rust
/// use understory_strata::StoredValue;
///
/// let value = StoredValue::new(42_i32);
/// assert!(value.is::<i32>());
/// assert_eq!(value.downcast_ref::<i32>(), Some(&42));
/// assert_eq!(value.read_or_default::<u8>(), 0);
/// assert!(value.try_read::<u8>().is_err());
/// ```
pub struct StoredValue {
    inner: Box<dyn StoredValueTrait>,
    type_id: TypeId,
    type_name: &'static str,
}

impl StoredValue {
    /// Creates a new stored value from a concrete value.
    #[must_use]
    pub fn new<T: Clone + 'static>(value: T) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: core::any::type_name::<T>(),
            inner: Box::new(value),
        }
    }

    /// Returns the [`TypeId`] of the contained value.
    #[must_use]
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the type name of the contained value, for diagnostics.
    #[must_use]
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns `true` if the contained value is of type `T`.
    #[must_use]
    #[inline]
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Attempts to downcast to a reference of type `T`.
    #[must_use]
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        if self.is::<T>() {
            self.inner.as_any().downcast_ref()
        } else {
            None
        }
    }

    /// Attempts to downcast to a mutable reference of type `T`.
    #[must_use]
    pub fn downcast_mut<T: 'static>(&mut self) -> Option<&mut T> {
        if self.is::<T>() {
            self.inner.as_any_mut().downcast_mut()
        } else {
            None
        }
    }

    /// Reads a clone of the value as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::TypeMismatch`] if the value is not a `T`.
    pub fn try_read<T: Clone + 'static>(&self) -> Result<T, StrataError> {
        self.downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| StrataError::TypeMismatch {
                expected: core::any::type_name::<T>(),
                found: self.type_name,
            })
    }

    /// Reads a clone of the value as `T`, substituting `T::default()` on a
    /// type mismatch.
    #[must_use]
    pub fn read_or_default<T: Clone + Default + 'static>(&self) -> T {
        match self.downcast_ref::<T>() {
            Some(value) => value.clone(),
            None => {
                tracing::warn!(
                    expected = core::any::type_name::<T>(),
                    found = self.type_name,
                    "stored value has unexpected type; using default"
                );
                T::default()
            }
        }
    }
}

impl Clone for StoredValue {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone_boxed(),
            type_id: self.type_id,
            type_name: self.type_name,
        }
    }
}

impl fmt::Debug for StoredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredValue")
            .field("type", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// Reads an optional stored value as `T`, using `T::default()` when the value
/// is missing or badly typed.
#[must_use]
pub fn read_optional_or_default<T: Clone + Default + 'static>(value: Option<&StoredValue>) -> T {
    value.map(StoredValue::read_or_default).unwrap_or_default()
}

/// Trait object for type-erased values that can be cloned.
trait StoredValueTrait: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn clone_boxed(&self) -> Box<dyn StoredValueTrait>;
}

impl<T: Clone + 'static> StoredValueTrait for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn clone_boxed(&self) -> Box<dyn StoredValueTrait> {
        Box::new(self.clone())
    }
}

/// The raw element sequence of one list at one layer.
///
/// Elements are stored untyped, like scalar values, so one badly typed element
/// degrades to a default rather than poisoning the whole list.
#[derive(Clone, Debug, Default)]
pub struct ElementList {
    elements: Vec<StoredValue>,
}

impl ElementList {
    /// Creates an empty element list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an element list from typed items.
    pub fn from_items<T: Clone + 'static>(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            elements: items.into_iter().map(StoredValue::new).collect(),
        }
    }

    /// Returns the number of elements.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Returns `true` if there are no elements.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Returns the raw elements.
    #[must_use]
    #[inline]
    pub fn as_slice(&self) -> &[StoredValue] {
        &self.elements
    }

    /// Reads every element as `T`, substituting defaults for badly typed ones.
    #[must_use]
    pub fn read_items<T: Clone + Default + 'static>(&self) -> Vec<T> {
        self.elements
            .iter()
            .map(StoredValue::read_or_default)
            .collect()
    }

    pub(crate) fn elements_mut(&mut self) -> &mut Vec<StoredValue> {
        &mut self.elements
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;
    use alloc::string::String;
    use alloc::vec;

    #[test]
    fn stored_value_typed_reads() {
        let value = StoredValue::new(String::from("Red"));
        assert!(value.is::<String>());
        assert_eq!(value.try_read::<String>().unwrap(), "Red");
        assert_eq!(value.read_or_default::<i32>(), 0);
    }

    #[test]
    fn try_read_reports_both_types() {
        let value = StoredValue::new(1.5_f64);
        let err = value.try_read::<i32>().unwrap_err();
        assert_eq!(
            err,
            StrataError::TypeMismatch {
                expected: "i32",
                found: "f64"
            }
        );
    }

    #[test]
    fn clone_is_deep() {
        let mut value = StoredValue::new(vec![1_u8, 2]);
        let cloned = value.clone();
        value.downcast_mut::<Vec<u8>>().unwrap().push(3);
        assert_eq!(cloned.downcast_ref::<Vec<u8>>(), Some(&vec![1, 2]));
        assert_eq!(value.downcast_ref::<Vec<u8>>(), Some(&vec![1, 2, 3]));
    }

    #[test]
    fn optional_read_defaults_when_missing() {
        assert_eq!(read_optional_or_default::<i32>(None), 0);
        let value = StoredValue::new(9_i32);
        assert_eq!(read_optional_or_default::<i32>(Some(&value)), 9);
    }

    #[test]
    fn element_list_reads_with_defaults() {
        let mut list = ElementList::from_items([1_i32, 2]);
        list.elements_mut().push(StoredValue::new("three"));
        assert_eq!(list.len(), 3);
        assert_eq!(list.read_items::<i32>(), vec![1, 2, 0]);
    }

    #[test]
    fn debug_shows_type_name() {
        let debug = format!("{:?}", StoredValue::new(42_i32));
        assert!(debug.contains("StoredValue"));
        assert!(debug.contains("i32"));
    }
}
