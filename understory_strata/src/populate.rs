// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Copying plain records into and out of the store.
//!
//! A type implements [`Record`] to expose its fields by name; its [`Schema`]
//! says which fields travel in which direction. [`write_record`] writes every
//! included field at one layer in a single batch, and [`read_record`] copies
//! the effective values back.

use alloc::vec::Vec;

use crate::error::StrataError;
use crate::id::{Layer, ObjectId};
use crate::list::{ListStrategy, read_elements, write_elements_into};
use crate::schema::{IdentifierSource, Schema};
use crate::store::StrataStore;
use crate::value::StoredValue;

/// A field value moving between a record and the store.
#[derive(Clone, Debug)]
pub enum FieldValue {
    /// A scalar value.
    Value(StoredValue),
    /// The elements of a list field.
    Elements(Vec<StoredValue>),
}

/// A plain record whose fields can be copied to and from the store.
pub trait Record {
    /// Returns the descriptor of this record's type.
    fn schema(&self) -> &Schema;

    /// Returns the identifier when the schema uses
    /// [`IdentifierSource::Type`].
    fn object_id(&self) -> Option<ObjectId> {
        None
    }

    /// Reads a field; `None` leaves the store untouched for that field.
    fn read_field(&self, name: &str) -> Option<FieldValue>;

    /// Writes a field read out of the store.
    fn write_field(&mut self, name: &str, value: FieldValue);
}

fn resolve_id<R: Record + ?Sized>(record: &R) -> Result<ObjectId, StrataError> {
    let schema = record.schema();
    let id = match schema.identifier() {
        IdentifierSource::Type => record.object_id(),
        IdentifierSource::Property(name) => match record.read_field(name) {
            Some(FieldValue::Value(value)) => Some(value.try_read::<ObjectId>()?),
            _ => None,
        },
    };
    id.ok_or(StrataError::MissingIdentifier {
        schema: schema.type_name(),
    })
}

fn identifier_field(schema: &Schema) -> Option<&'static str> {
    match schema.identifier() {
        IdentifierSource::Property(name) => Some(name),
        IdentifierSource::Type => None,
    }
}

enum Write {
    Scalar(&'static str, StoredValue),
    List(&'static str, ListStrategy, Vec<StoredValue>),
}

/// Writes a record's included fields at `layer`, returning its identifier.
///
/// Every field is validated before anything is written, and all writes are
/// observed as one batch. Fields the record does not supply are left alone.
///
/// # Errors
///
/// - [`StrataError::MissingIdentifier`] if the record has no identifier.
/// - [`StrataError::TypeMismatch`] if an identifier or a reference-list
///   element is not an [`ObjectId`], or a list is supplied for a scalar field.
pub fn write_record<R: Record + ?Sized>(
    store: &StrataStore,
    layer: Layer,
    record: &R,
) -> Result<ObjectId, StrataError> {
    let id = resolve_id(record)?;
    let schema = record.schema();
    let skip = identifier_field(schema);

    let mut writes = Vec::new();
    for property in schema.properties() {
        if property.exclusion().into_store || Some(property.name()) == skip {
            continue;
        }
        let Some(field) = record.read_field(property.name()) else {
            continue;
        };
        match (field, property.list()) {
            (FieldValue::Value(value), _) => writes.push(Write::Scalar(property.name(), value)),
            (FieldValue::Elements(elements), Some(list)) => {
                if list.references {
                    for element in &elements {
                        element.try_read::<ObjectId>()?;
                    }
                }
                writes.push(Write::List(property.name(), list.strategy, elements));
            }
            (FieldValue::Elements(_), None) => {
                return Err(StrataError::TypeMismatch {
                    expected: "scalar field value",
                    found: "list elements",
                });
            }
        }
    }

    tracing::debug!(%id, ?layer, schema = schema.type_name(), writes = writes.len(), "write record");
    store.batch(|layers| {
        for write in writes {
            match write {
                Write::Scalar(name, value) => {
                    layers.set_value(id, layer, name, value);
                }
                Write::List(name, strategy, elements) => {
                    write_elements_into(layers, id, layer, name, strategy, elements);
                }
            }
        }
    });
    Ok(id)
}

/// Copies the effective values of a record's included fields out of the
/// store.
///
/// Unset fields are not written to the record.
///
/// # Errors
///
/// [`StrataError::MissingIdentifier`] if the record has no identifier.
pub fn read_record<R: Record + ?Sized>(
    store: &StrataStore,
    record: &mut R,
) -> Result<(), StrataError> {
    let id = resolve_id(record)?;
    let schema = record.schema().clone();
    let skip = identifier_field(&schema);

    for property in schema.properties() {
        if property.exclusion().from_store || Some(property.name()) == skip {
            continue;
        }
        let value = match property.list() {
            Some(list) => {
                read_elements(store, id, property.name(), list.strategy).map(FieldValue::Elements)
            }
            None => store.active_stored(id, property.name()).map(FieldValue::Value),
        };
        if let Some(value) = value {
            record.write_field(property.name(), value);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Exclusion, ListSchema};
    use alloc::string::String;
    use alloc::vec;

    struct Folder {
        schema: Schema,
        id: ObjectId,
        name: String,
        count: u32,
        children: Vec<ObjectId>,
    }

    impl Folder {
        fn new(id: u128, name: &str, children: &[u128]) -> Self {
            Self::with_strategy(id, name, children, ListStrategy::Indexed)
        }

        fn with_strategy(id: u128, name: &str, children: &[u128], strategy: ListStrategy) -> Self {
            Self {
                schema: Schema::builder("Folder")
                    .identifier("Id")
                    .property("Id")
                    .property("Name")
                    .property_with("Count", Exclusion::INTO_STORE)
                    .list("Children", ListSchema::references(strategy))
                    .build()
                    .unwrap(),
                id: ObjectId::from_u128(id),
                name: String::from(name),
                count: 0,
                children: children.iter().copied().map(ObjectId::from_u128).collect(),
            }
        }
    }

    impl Record for Folder {
        fn schema(&self) -> &Schema {
            &self.schema
        }

        fn read_field(&self, name: &str) -> Option<FieldValue> {
            match name {
                "Id" => Some(FieldValue::Value(StoredValue::new(self.id))),
                "Name" => Some(FieldValue::Value(StoredValue::new(self.name.clone()))),
                "Count" => Some(FieldValue::Value(StoredValue::new(self.count))),
                "Children" => Some(FieldValue::Elements(
                    self.children.iter().copied().map(StoredValue::new).collect(),
                )),
                _ => None,
            }
        }

        fn write_field(&mut self, name: &str, value: FieldValue) {
            match (name, value) {
                ("Name", FieldValue::Value(v)) => self.name = v.read_or_default(),
                ("Count", FieldValue::Value(v)) => self.count = v.read_or_default(),
                ("Children", FieldValue::Elements(items)) => {
                    self.children = items.iter().map(StoredValue::read_or_default).collect();
                }
                _ => {}
            }
        }
    }

    #[test]
    fn write_then_read_honors_exclusions() {
        let store = StrataStore::new();
        let folder = Folder::new(1, "Docs", &[2, 3]);
        let id = write_record(&store, Layer::Baseline, &folder).unwrap();
        assert_eq!(id, ObjectId::from_u128(1));
        assert_eq!(
            store.property_names(id),
            vec![
                String::from("Children[0]"),
                String::from("Children[1]"),
                String::from("Name"),
            ]
        );

        store.set_value(id, Layer::Baseline, "Count", 2_u32);
        store.set_value(id, Layer::Override(0), "Name", String::from("Documents"));
        let mut copy = Folder::new(1, "", &[]);
        read_record(&store, &mut copy).unwrap();
        assert_eq!(copy.name, "Documents");
        assert_eq!(copy.count, 2);
        assert_eq!(copy.children, folder.children);
    }

    #[test]
    fn list_flyweight_writes_read_back_as_elements() {
        let children = vec![ObjectId::from_u128(4), ObjectId::from_u128(5)];
        for strategy in [
            ListStrategy::ObservableElements,
            ListStrategy::Indexed,
            ListStrategy::Direct,
        ] {
            let store = StrataStore::builder()
                .list_strategy("Children", strategy)
                .build();
            let list = store.list::<ObjectId>(ObjectId::from_u128(1), "Children");
            list.set(Layer::Baseline, children.clone());

            let mut copy = Folder::with_strategy(1, "", &[], strategy);
            read_record(&store, &mut copy).unwrap();
            assert_eq!(copy.children, children, "{strategy:?}");

            let mut folder = Folder::with_strategy(1, "Docs", &[7], strategy);
            write_record(&store, Layer::Override(0), &folder).unwrap();
            assert_eq!(list.items(), vec![ObjectId::from_u128(7)], "{strategy:?}");
            folder.children.clear();
            read_record(&store, &mut folder).unwrap();
            assert_eq!(folder.children, vec![ObjectId::from_u128(7)], "{strategy:?}");
        }
    }

    #[test]
    fn rejects_bad_reference_elements_before_writing() {
        struct Bad(Schema);
        impl Record for Bad {
            fn schema(&self) -> &Schema {
                &self.0
            }
            fn object_id(&self) -> Option<ObjectId> {
                Some(ObjectId::from_u128(9))
            }
            fn read_field(&self, name: &str) -> Option<FieldValue> {
                match name {
                    "Title" => Some(FieldValue::Value(StoredValue::new(1_u8))),
                    "Refs" => Some(FieldValue::Elements(vec![StoredValue::new("nope")])),
                    _ => None,
                }
            }
            fn write_field(&mut self, _: &str, _: FieldValue) {}
        }

        let schema = Schema::builder("Bad")
            .property("Title")
            .list("Refs", ListSchema::references(ListStrategy::ObservableElements))
            .build()
            .unwrap();
        let store = StrataStore::new();
        let result = write_record(&store, Layer::Baseline, &Bad(schema));
        assert!(matches!(result, Err(StrataError::TypeMismatch { .. })));
        assert!(store.object_ids().is_empty());
    }

    #[test]
    fn missing_identifier_is_an_error() {
        struct Anonymous(Schema);
        impl Record for Anonymous {
            fn schema(&self) -> &Schema {
                &self.0
            }
            fn read_field(&self, _: &str) -> Option<FieldValue> {
                None
            }
            fn write_field(&mut self, _: &str, _: FieldValue) {}
        }
        let schema = Schema::builder("Anonymous").build().unwrap();
        let store = StrataStore::new();
        assert_eq!(
            write_record(&store, Layer::Baseline, &Anonymous(schema)).err(),
            Some(StrataError::MissingIdentifier {
                schema: "Anonymous"
            })
        );
    }
}
