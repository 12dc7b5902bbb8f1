// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Static record descriptors.
//!
//! A [`Schema`] describes how the fields of one record type map onto store
//! properties: which field supplies the object identifier, which fields only
//! travel in one direction, and how list fields are laid out. Schemas are
//! built once with [`SchemaBuilder`] and consumed by
//! [`write_record`](crate::write_record) / [`read_record`](crate::read_record)
//! and by [`StrataStoreBuilder::schema`](crate::StrataStoreBuilder::schema).

use alloc::vec::Vec;

use crate::error::StrataError;
use crate::list::ListStrategy;
use crate::store::StrataStore;

/// Direction flags excluding a field from population.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Exclusion {
    /// Skip the field when writing a record into the store.
    pub into_store: bool,
    /// Skip the field when reading a record out of the store.
    pub from_store: bool,
}

impl Exclusion {
    /// The field travels both ways.
    pub const NONE: Self = Self {
        into_store: false,
        from_store: false,
    };
    /// The field is only read out of the store.
    pub const INTO_STORE: Self = Self {
        into_store: true,
        from_store: false,
    };
    /// The field is only written into the store.
    pub const FROM_STORE: Self = Self {
        into_store: false,
        from_store: true,
    };
    /// The field never travels.
    pub const BOTH: Self = Self {
        into_store: true,
        from_store: true,
    };
}

/// How a list field is stored.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ListSchema {
    /// Storage layout.
    pub strategy: ListStrategy,
    /// Elements are [`ObjectId`](crate::ObjectId)s of other stored objects.
    pub references: bool,
}

impl ListSchema {
    /// A list of plain values.
    #[must_use]
    pub const fn values(strategy: ListStrategy) -> Self {
        Self {
            strategy,
            references: false,
        }
    }

    /// A list of references to other stored objects.
    #[must_use]
    pub const fn references(strategy: ListStrategy) -> Self {
        Self {
            strategy,
            references: true,
        }
    }
}

/// Where a record's object identifier comes from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum IdentifierSource {
    /// The named field holds the identifier.
    Property(&'static str),
    /// The record supplies it through [`Record::object_id`](crate::Record::object_id).
    Type,
}

/// One field of a [`Schema`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PropertySchema {
    name: &'static str,
    exclusion: Exclusion,
    list: Option<ListSchema>,
}

impl PropertySchema {
    /// Returns the store property name.
    #[must_use]
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the direction flags.
    #[must_use]
    #[inline]
    pub fn exclusion(&self) -> Exclusion {
        self.exclusion
    }

    /// Returns the list layout, if this is a list field.
    #[must_use]
    #[inline]
    pub fn list(&self) -> Option<ListSchema> {
        self.list
    }
}

/// Descriptor of one record type.
///
/// # Example
///
/// ```rust
/// use understory_strata::{Exclusion, IdentifierSource, ListSchema, ListStrategy, Schema};
///
/// let schema = Schema::builder("Folder")
///     .identifier("Id")
///     .property("Id")
///     .property("Name")
///     .property_with("ItemCount", Exclusion::INTO_STORE)
///     .list("Children", ListSchema::references(ListStrategy::ObservableElements))
///     .build()
///     .unwrap();
///
/// assert_eq!(schema.identifier(), IdentifierSource::Property("Id"));
/// assert!(schema.property("ItemCount").unwrap().exclusion().into_store);
/// assert_eq!(schema.lists().count(), 1);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schema {
    type_name: &'static str,
    identifier: IdentifierSource,
    properties: Vec<PropertySchema>,
}

impl Schema {
    /// Starts a schema for the record type `type_name`.
    #[must_use]
    pub fn builder(type_name: &'static str) -> SchemaBuilder {
        SchemaBuilder::new(type_name)
    }

    /// Returns the record type name.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns where the identifier comes from.
    #[must_use]
    pub fn identifier(&self) -> IdentifierSource {
        self.identifier
    }

    /// Returns every field, in declaration order.
    #[must_use]
    pub fn properties(&self) -> &[PropertySchema] {
        &self.properties
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertySchema> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Returns every list field with its layout.
    pub fn lists(&self) -> impl Iterator<Item = (&'static str, &ListSchema)> + '_ {
        self.properties
            .iter()
            .filter_map(|p| p.list.as_ref().map(|list| (p.name, list)))
    }

    /// Registers this schema's list strategies on `store`.
    pub fn apply(&self, store: &StrataStore) {
        for (name, list) in self.lists() {
            store.configure_list(name, list.strategy);
        }
    }
}

/// Builder for [`Schema`].
#[derive(Clone, Debug)]
pub struct SchemaBuilder {
    type_name: &'static str,
    identifiers: Vec<IdentifierSource>,
    properties: Vec<PropertySchema>,
}

impl SchemaBuilder {
    /// Creates a builder for the record type `type_name`.
    ///
    /// Without an explicit identifier the record supplies its own
    /// ([`IdentifierSource::Type`]).
    #[must_use]
    pub fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
            identifiers: Vec::new(),
            properties: Vec::new(),
        }
    }

    /// Designates the field holding the object identifier.
    #[must_use]
    pub fn identifier(mut self, name: &'static str) -> Self {
        self.identifiers.push(IdentifierSource::Property(name));
        self
    }

    /// Designates the record type itself as the identifier source.
    #[must_use]
    pub fn identified_by_type(mut self) -> Self {
        self.identifiers.push(IdentifierSource::Type);
        self
    }

    /// Declares a scalar field travelling both ways.
    #[must_use]
    pub fn property(self, name: &'static str) -> Self {
        self.property_with(name, Exclusion::NONE)
    }

    /// Declares a scalar field with direction flags.
    #[must_use]
    pub fn property_with(mut self, name: &'static str, exclusion: Exclusion) -> Self {
        self.properties.push(PropertySchema {
            name,
            exclusion,
            list: None,
        });
        self
    }

    /// Declares a list field.
    #[must_use]
    pub fn list(self, name: &'static str, list: ListSchema) -> Self {
        self.list_with(name, list, Exclusion::NONE)
    }

    /// Declares a list field with direction flags.
    #[must_use]
    pub fn list_with(mut self, name: &'static str, list: ListSchema, exclusion: Exclusion) -> Self {
        self.properties.push(PropertySchema {
            name,
            exclusion,
            list: Some(list),
        });
        self
    }

    /// Validates and builds the schema.
    ///
    /// # Errors
    ///
    /// [`StrataError::DuplicateIdentifier`] if more than one identifier was
    /// designated, and [`StrataError::UnknownIdentifier`] if the identifier
    /// field is not declared.
    pub fn build(self) -> Result<Schema, StrataError> {
        let identifier = match self.identifiers.as_slice() {
            [] => IdentifierSource::Type,
            [only] => *only,
            _ => {
                return Err(StrataError::DuplicateIdentifier {
                    schema: self.type_name,
                });
            }
        };
        if let IdentifierSource::Property(property) = identifier
            && !self.properties.iter().any(|p| p.name == property)
        {
            return Err(StrataError::UnknownIdentifier {
                schema: self.type_name,
                property,
            });
        }
        Ok(Schema {
            type_name: self.type_name,
            identifier,
            properties: self.properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_type_identifier() {
        let schema = Schema::builder("Note").property("Text").build().unwrap();
        assert_eq!(schema.identifier(), IdentifierSource::Type);
        assert_eq!(schema.type_name(), "Note");
        assert_eq!(schema.properties().len(), 1);
        assert!(schema.property("Missing").is_none());
    }

    #[test]
    fn rejects_two_identifiers() {
        let result = Schema::builder("Note")
            .identifier("Id")
            .identified_by_type()
            .property("Id")
            .build();
        assert_eq!(
            result,
            Err(StrataError::DuplicateIdentifier { schema: "Note" })
        );
    }

    #[test]
    fn rejects_undeclared_identifier() {
        let result = Schema::builder("Note").identifier("Id").build();
        assert_eq!(
            result,
            Err(StrataError::UnknownIdentifier {
                schema: "Note",
                property: "Id"
            })
        );
    }

    #[test]
    fn apply_configures_list_strategies() {
        let schema = Schema::builder("Folder")
            .list("Tags", ListSchema::values(ListStrategy::Direct))
            .list("Children", ListSchema::references(ListStrategy::Indexed))
            .build()
            .unwrap();
        let store = StrataStore::new();
        schema.apply(&store);
        assert_eq!(store.list_strategy("Tags"), ListStrategy::Direct);
        assert_eq!(store.list_strategy("Children"), ListStrategy::Indexed);

        let built = StrataStore::builder().schema(&schema).build();
        assert_eq!(built.list_strategy("Children"), ListStrategy::Indexed);
    }
}
