// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types.

use alloc::string::String;

use crate::id::ObjectId;

/// Errors reported by the strata store and its adapters.
///
/// Reads of unknown properties are not errors; they resolve to "unset".
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StrataError {
    /// A stored value could not be read as the requested type.
    #[error("stored value has type `{found}`, expected `{expected}`")]
    TypeMismatch {
        /// The requested type.
        expected: &'static str,
        /// The type actually stored.
        found: &'static str,
    },
    /// A flyweight was handed to a store that did not issue it.
    #[error("access to `{property}` on {object} was issued by a different store")]
    OwnershipMismatch {
        /// Object the flyweight addresses.
        object: ObjectId,
        /// Property the flyweight addresses.
        property: String,
    },
    /// A schema declared more than one identifier.
    #[error("schema `{schema}` declares more than one identifier")]
    DuplicateIdentifier {
        /// Name of the offending schema.
        schema: &'static str,
    },
    /// A schema names an identifier property it does not declare.
    #[error("schema `{schema}` uses undeclared identifier property `{property}`")]
    UnknownIdentifier {
        /// Name of the offending schema.
        schema: &'static str,
        /// The undeclared property.
        property: &'static str,
    },
    /// A record could not supply its object identifier.
    #[error("record of schema `{schema}` has no object identifier")]
    MissingIdentifier {
        /// Name of the record's schema.
        schema: &'static str,
    },
    /// A list element index was outside the list.
    #[error("index {index} out of range for list of length {len}")]
    IndexOutOfRange {
        /// The offending index.
        index: usize,
        /// The list length at the time of the call.
        len: usize,
    },
}
