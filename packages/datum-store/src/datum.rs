//! Datum table entries.

use datastore_types::{CreateProps, DataType, DatumId, RefCounts, Subscript, TypeExtra};

use crate::container::{Container, Multiset};
use crate::error::{DataError, Result};
use crate::notify::{ContainerReference, Rank, Subscriber};
use crate::registry::TypeRegistry;
use crate::value::{StructValue, Value};

/// What a datum holds.
///
/// Composites keep their top-level "closed" state on the [`Datum`], separate
/// from the set state of each slot or field.
#[derive(Clone, Debug)]
pub(crate) enum Payload {
    Scalar(Option<Value>),
    Container(Container),
    Multiset(Multiset),
    Struct(StructValue),
}

#[derive(Debug)]
pub(crate) struct Datum {
    pub(crate) id: DatumId,
    pub(crate) data_type: DataType,
    pub(crate) payload: Payload,
    pub(crate) refcounts: RefCounts,
    pub(crate) permanent: bool,
    /// Composite closed to further writes; its top-level subscribers have fired.
    pub(crate) closed: bool,
    /// Queued for collection; no longer accepts refcount changes.
    pub(crate) freed: bool,
    pub(crate) lock_holder: Option<Rank>,
    pub(crate) subscribers: Vec<Subscriber>,
    pub(crate) references: Vec<ContainerReference>,
}

/// Snapshot of a datum's state, from [`DataStore::status`](crate::DataStore::status).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DatumStatus {
    /// Declared type.
    pub data_type: DataType,
    /// Scalar stored, or composite closed.
    pub set: bool,
    /// Current refcounts.
    pub refcounts: RefCounts,
    /// Never collected.
    pub permanent: bool,
    /// Rank holding the advisory lock.
    pub locked_by: Option<Rank>,
}

impl Datum {
    pub(crate) fn new(
        id: DatumId,
        data_type: DataType,
        extra: TypeExtra,
        props: &CreateProps,
        registry: &TypeRegistry,
    ) -> Result<Self> {
        let payload = match extra {
            TypeExtra::Container { key_type, val_type } => {
                Payload::Container(Container::new(key_type, val_type))
            }
            TypeExtra::Multiset { val_type } => Payload::Multiset(Multiset::new(val_type)),
            TypeExtra::Struct { struct_type } => {
                let layout = registry.lookup(struct_type)?;
                Payload::Struct(StructValue::empty(struct_type, layout.field_count()))
            }
            TypeExtra::None => Payload::Scalar(None),
        };

        let refcounts = props.refcounts();
        Ok(Self {
            id,
            data_type,
            payload,
            refcounts,
            permanent: props.permanent,
            closed: data_type.is_composite() && refcounts.write == 0,
            freed: false,
            lock_holder: None,
            subscribers: Vec::new(),
            references: Vec::new(),
        })
    }

    /// Top-level value available: scalar stored, or composite closed.
    pub(crate) fn is_set(&self) -> bool {
        match &self.payload {
            Payload::Scalar(value) => value.is_some(),
            _ => self.closed,
        }
    }

    /// A collectable value exists. Composites always have one.
    pub(crate) fn has_value(&self) -> bool {
        !matches!(self.payload, Payload::Scalar(None))
    }

    pub(crate) fn is_collectable(&self) -> bool {
        !self.permanent && !self.freed && self.refcounts.is_zero() && self.has_value()
    }

    pub(crate) fn has_listeners(&self) -> bool {
        !self.subscribers.is_empty() || !self.references.is_empty()
    }

    pub(crate) fn status(&self) -> DatumStatus {
        DatumStatus {
            data_type: self.data_type,
            set: self.is_set(),
            refcounts: self.refcounts,
            permanent: self.permanent,
            locked_by: self.lock_holder,
        }
    }

    /// Resolve a struct field subscript to its index.
    pub(crate) fn field_index(&self, fields: &StructValue, subscript: &Subscript) -> Result<usize> {
        subscript
            .as_field_index()
            .filter(|i| *i < fields.fields.len())
            .ok_or_else(|| {
                DataError::invalid(format!("{} has no field {}", self.id, subscript))
            })
    }

    /// Whether `subscript` holds a value.
    pub(crate) fn subscript_is_set(&self, subscript: &Subscript) -> Result<bool> {
        match &self.payload {
            Payload::Container(c) => Ok(c.is_set(subscript)),
            Payload::Struct(s) => {
                let index = self.field_index(s, subscript)?;
                Ok(s.fields[index].is_some())
            }
            _ => Err(self.no_subscripts()),
        }
    }

    /// Refuse new members once a composite has closed.
    pub(crate) fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(DataError::invalid(format!(
                "{} is closed and takes no more members",
                self.id
            )))
        } else {
            Ok(())
        }
    }

    pub(crate) fn no_subscripts(&self) -> DataError {
        DataError::invalid(format!(
            "{} is a {} and has no subscripts",
            self.id, self.data_type
        ))
    }

    /// Every datum this one holds a read refcount on, with the subscript it
    /// is held under (`None` for scalars and multiset members).
    pub(crate) fn held_referands(&self) -> Vec<(Option<Subscript>, DatumId)> {
        let mut held = Vec::new();
        let mut ids = Vec::new();
        match &self.payload {
            Payload::Scalar(Some(value)) => {
                value.referands(&mut ids);
                held.extend(ids.drain(..).map(|id| (None, id)));
            }
            Payload::Scalar(None) => {}
            Payload::Container(c) => {
                for (key, value) in c.iter() {
                    value.referands(&mut ids);
                    held.extend(ids.drain(..).map(|id| (Some(key.clone()), id)));
                }
            }
            Payload::Multiset(m) => {
                for value in m.iter() {
                    value.referands(&mut ids);
                }
                held.extend(ids.drain(..).map(|id| (None, id)));
            }
            Payload::Struct(s) => {
                for (index, value) in s.fields.iter().enumerate() {
                    if let Some(value) = value {
                        value.referands(&mut ids);
                        let key = Subscript::from(index as i64);
                        held.extend(ids.drain(..).map(|id| (Some(key.clone()), id)));
                    }
                }
            }
        }
        held
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datastore_types::StructTypeId;

    fn registry() -> TypeRegistry {
        let mut reg = TypeRegistry::new();
        reg.declare_struct_type(
            StructTypeId(1),
            "pair",
            &[("a", DataType::Ref), ("b", DataType::Integer)],
        )
        .unwrap();
        reg
    }

    #[test]
    fn scalar_starts_unset() {
        let d = Datum::new(
            DatumId::new(1),
            DataType::Integer,
            TypeExtra::None,
            &CreateProps::default(),
            &registry(),
        )
        .unwrap();
        assert!(!d.is_set());
        assert!(!d.has_value());
        assert!(d.subscript_is_set(&Subscript::from("0")).is_err());
    }

    #[test]
    fn composite_created_without_writers_is_closed() {
        let d = Datum::new(
            DatumId::new(1),
            DataType::Container,
            TypeExtra::Container {
                key_type: DataType::Integer,
                val_type: DataType::Integer,
            },
            &CreateProps::with_refcounts(1, 0),
            &registry(),
        )
        .unwrap();
        assert!(d.is_set());
        assert!(d.has_value());
    }

    #[test]
    fn struct_referands_carry_field_subscripts() {
        let mut d = Datum::new(
            DatumId::new(1),
            DataType::Struct,
            TypeExtra::Struct {
                struct_type: StructTypeId(1),
            },
            &CreateProps::default(),
            &registry(),
        )
        .unwrap();
        if let Payload::Struct(s) = &mut d.payload {
            s.fields[0] = Some(Value::Ref(DatumId::new(7)));
        }
        assert_eq!(
            d.held_referands(),
            vec![(Some(Subscript::from("0")), DatumId::new(7))]
        );
        assert!(!d.subscript_is_set(&Subscript::from("1")).unwrap());
        assert!(d.subscript_is_set(&Subscript::from("2")).is_err());
    }
}
