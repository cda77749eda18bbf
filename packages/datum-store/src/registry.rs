//! Type registry: struct layouts and create-time type validation.

use std::collections::HashMap;

use datastore_types::{DataType, StructTypeId, TypeExtra};

use crate::error::{DataError, Result};

/// One field of a struct layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructField {
    /// Field name, unique within the layout.
    pub name: String,
    /// Field type.
    pub data_type: DataType,
}

/// A registered struct layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructType {
    /// Layout id.
    pub id: StructTypeId,
    /// Human-readable name.
    pub name: String,
    /// Ordered fields.
    pub fields: Vec<StructField>,
}

impl StructType {
    /// Number of fields.
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Type of the field at `index`.
    pub fn field_type(&self, index: usize) -> Option<DataType> {
        self.fields.get(index).map(|f| f.data_type)
    }

    /// Index of the field called `name`.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// Registry of struct layouts, shared by every datum in a store.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    structs: HashMap<StructTypeId, StructType>,
}

impl TypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a struct layout.
    ///
    /// Declaring the same layout again is accepted; a different layout under
    /// a known id fails with `DoubleDeclare`.
    pub fn declare_struct_type(
        &mut self,
        id: StructTypeId,
        name: &str,
        fields: &[(&str, DataType)],
    ) -> Result<()> {
        let mut layout = Vec::with_capacity(fields.len());
        for (i, (field_name, data_type)) in fields.iter().enumerate() {
            if !data_type.is_member_type() {
                return Err(DataError::invalid(format!(
                    "field '{}' of {} cannot hold a {} directly",
                    field_name, name, data_type
                )));
            }
            if fields[..i].iter().any(|(other, _)| other == field_name) {
                return Err(DataError::invalid(format!(
                    "duplicate field '{}' in {}",
                    field_name, name
                )));
            }
            layout.push(StructField {
                name: field_name.to_string(),
                data_type: *data_type,
            });
        }

        let declared = StructType {
            id,
            name: name.to_string(),
            fields: layout,
        };

        match self.structs.get(&id) {
            Some(existing) if *existing == declared => Ok(()),
            Some(existing) => Err(DataError::DoubleDeclare {
                what: format!("{} (as '{}')", id, existing.name),
            }),
            None => {
                tracing::debug!(struct_type = %id, name, fields = fields.len(), "declared struct type");
                self.structs.insert(id, declared);
                Ok(())
            }
        }
    }

    /// Look up a layout.
    pub fn get(&self, id: StructTypeId) -> Option<&StructType> {
        self.structs.get(&id)
    }

    /// Look up a layout, failing if unknown.
    pub fn lookup(&self, id: StructTypeId) -> Result<&StructType> {
        self.structs
            .get(&id)
            .ok_or_else(|| DataError::invalid(format!("unknown struct type {}", id)))
    }

    /// Number of registered layouts.
    pub fn len(&self) -> usize {
        self.structs.len()
    }

    /// True if no layouts are registered.
    pub fn is_empty(&self) -> bool {
        self.structs.is_empty()
    }

    /// Check that `extra` is the right shape for a datum of type `data_type`.
    pub fn validate_extra(&self, data_type: DataType, extra: &TypeExtra) -> Result<()> {
        match (data_type, extra) {
            (DataType::Container, TypeExtra::Container { key_type, val_type }) => {
                if !key_type.is_key_type() {
                    return Err(DataError::invalid(format!(
                        "{} is not a valid container key type",
                        key_type
                    )));
                }
                if !val_type.is_member_type() {
                    return Err(DataError::invalid(format!(
                        "{} is not a valid container value type",
                        val_type
                    )));
                }
                Ok(())
            }
            (DataType::Multiset, TypeExtra::Multiset { val_type }) => {
                if !val_type.is_member_type() {
                    return Err(DataError::invalid(format!(
                        "{} is not a valid multiset member type",
                        val_type
                    )));
                }
                Ok(())
            }
            (DataType::Struct, TypeExtra::Struct { struct_type }) => {
                self.lookup(*struct_type).map(|_| ())
            }
            (t, TypeExtra::None) if !t.is_composite() => Ok(()),
            (t, extra) => Err(DataError::invalid(format!(
                "type extra {:?} does not describe a {}",
                extra, t
            ))),
        }
    }
}
