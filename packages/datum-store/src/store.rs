//! The datum table and the operations that read and write it.
//!
//! Every operation either succeeds or fails before any visible mutation:
//! stores decode and validate the whole buffer first, then apply it.
//! Anything that has to reach another rank goes into the caller's
//! [`Notifications`] batch.

use std::collections::HashMap;

use bytes::Bytes;
use datastore_types::{
    CreateProps, DataType, DatumId, RefCounts, StructTypeId, Subscript, TypeExtra,
};

use crate::config::StoreConfig;
use crate::container::{EnumeratePage, InsertAtomic};
use crate::datum::{Datum, DatumStatus, Payload};
use crate::error::{DataError, Result};
use crate::ids::IdAllocator;
use crate::notify::{
    ContainerRefOutcome, ContainerReference, Notifications, Rank, RefBinding, Subscriber,
    Subscription,
};
use crate::refcount::Scavenge;
use crate::registry::{StructType, TypeRegistry};
use crate::value::Value;

/// A retrieved value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Retrieved {
    /// Type of `data`.
    pub data_type: DataType,
    /// Encoded value.
    pub data: Bytes,
}

/// What was left behind when a store was finalized.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FinalizeReport {
    /// Datums still live, permanent ones included.
    pub live: usize,
    /// Non-permanent datums still live, in id order.
    pub leaked: Vec<DatumId>,
}

/// A decoded, validated store, ready to apply.
enum Staged {
    Scalar(Value),
    Slots(Vec<(Subscript, Value)>),
    Fields(Vec<(usize, Value)>),
    Members(Vec<Value>),
}

/// Process-local typed datum store.
///
/// One instance per data server. Not thread-safe: the hosting server
/// serializes calls.
#[derive(Debug)]
pub struct DataStore {
    pub(crate) config: StoreConfig,
    pub(crate) ids: IdAllocator,
    pub(crate) registry: TypeRegistry,
    pub(crate) table: HashMap<DatumId, Datum>,
}

impl DataStore {
    /// Create a store for the server described by `config`.
    pub fn new(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        tracing::debug!(
            server_index = config.server_index,
            server_count = config.server_count,
            "initialized data store"
        );
        Ok(Self {
            ids: IdAllocator::new(&config),
            config,
            registry: TypeRegistry::new(),
            table: HashMap::new(),
        })
    }

    /// Configuration this store was created with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Registered struct layouts.
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Number of live datums.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// True if no datum is live.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub(crate) fn datum(&self, id: DatumId) -> Result<&Datum> {
        self.table.get(&id).ok_or(DataError::NotFound(id))
    }

    pub(crate) fn datum_mut(&mut self, id: DatumId) -> Result<&mut Datum> {
        self.table.get_mut(&id).ok_or(DataError::NotFound(id))
    }

    /// Register a struct layout. See [`TypeRegistry::declare_struct_type`].
    pub fn declare_struct_type(
        &mut self,
        id: StructTypeId,
        name: &str,
        fields: &[(&str, DataType)],
    ) -> Result<()> {
        self.registry.declare_struct_type(id, name, fields)
    }

    /// Layout registered under `id`.
    pub fn struct_type(&self, id: StructTypeId) -> Result<&StructType> {
        self.registry.lookup(id)
    }

    /// Declare datum `id` with its type and initial refcounts.
    ///
    /// The id must belong to this server's partition.
    pub fn create(
        &mut self,
        id: DatumId,
        data_type: DataType,
        extra: TypeExtra,
        props: CreateProps,
    ) -> Result<()> {
        if id.is_null() || id.get() < 0 {
            return Err(DataError::invalid(format!("cannot create datum {}", id)));
        }
        if !self.ids.owns(id) {
            return Err(DataError::invalid(format!(
                "datum {} belongs to server {:?}, not {}",
                id,
                self.ids.owner_of(id),
                self.config.server_index
            )));
        }
        if props.refcounts().has_negative() {
            return Err(DataError::invalid(format!(
                "negative initial refcounts {} for {}",
                props.refcounts(),
                id
            )));
        }
        self.registry.validate_extra(data_type, &extra)?;
        if self.table.contains_key(&id) {
            return Err(DataError::DoubleDeclare {
                what: format!("datum {}", id),
            });
        }

        let datum = Datum::new(id, data_type, extra, &props, &self.registry)?;
        self.table.try_reserve(1)?;
        tracing::debug!(
            id = %id,
            data_type = %data_type,
            refcounts = %datum.refcounts,
            permanent = datum.permanent,
            "created datum"
        );
        self.table.insert(id, datum);
        Ok(())
    }

    /// Declared type of a datum.
    pub fn type_of(&self, id: DatumId) -> Result<DataType> {
        Ok(self.datum(id)?.data_type)
    }

    /// Key and value types of a container.
    pub fn container_type_of(&self, id: DatumId) -> Result<(DataType, DataType)> {
        let datum = self.datum(id)?;
        match &datum.payload {
            Payload::Container(c) => Ok((c.key_type(), c.val_type())),
            _ => Err(DataError::Type {
                id,
                expected: DataType::Container,
                actual: datum.data_type,
            }),
        }
    }

    /// Whether a datum is live (`subscript` is `None`), or whether one of its
    /// slots or fields holds a value.
    ///
    /// Unknown ids are reported as absent rather than as an error.
    pub fn exists(&self, id: DatumId, subscript: Option<&Subscript>) -> Result<bool> {
        let Some(datum) = self.table.get(&id) else {
            return Ok(false);
        };
        match subscript {
            None => Ok(true),
            Some(subscript) => datum.subscript_is_set(subscript),
        }
    }

    /// Snapshot of a datum's type, set state, refcounts and lock.
    pub fn status(&self, id: DatumId) -> Result<DatumStatus> {
        Ok(self.datum(id)?.status())
    }

    /// Store a value into a datum, one of its slots, or one of its fields,
    /// then drop `refcount_decr` of the caller's refcounts.
    ///
    /// Subscribers waiting on what was written are fired, and container
    /// references waiting on a written slot are resolved, into
    /// `notifications`.
    pub fn store(
        &mut self,
        id: DatumId,
        subscript: Option<&Subscript>,
        data: &[u8],
        data_type: DataType,
        refcount_decr: RefCounts,
        notifications: &mut Notifications,
    ) -> Result<()> {
        let datum = self.datum(id)?;
        if !datum.permanent {
            let after = datum.refcounts.checked_add(refcount_decr.negate());
            if after.map_or(true, |rc| rc.has_negative()) {
                return Err(DataError::invalid(format!(
                    "cannot drop {} from {} on {}",
                    refcount_decr, datum.refcounts, id
                )));
            }
        }

        let staged = self.stage(datum, subscript, data, data_type)?;
        let resolved = self.apply(id, staged, notifications)?;
        tracing::debug!(
            id = %id,
            subscript = subscript.map(tracing::field::display),
            data_type = %data_type,
            bytes = data.len(),
            pending = notifications.len(),
            "stored"
        );

        for (reference, value) in resolved {
            self.bind_reference(reference, value, notifications);
        }

        if !refcount_decr.is_zero() {
            self.reference_count(id, refcount_decr.negate(), Scavenge::none(), notifications)?;
        } else if self.datum(id)?.is_collectable() {
            // A datum that dropped to zero refcounts while unset goes now.
            self.reference_count(id, RefCounts::ZERO, Scavenge::none(), notifications)?;
        }
        Ok(())
    }

    fn stage(
        &self,
        datum: &Datum,
        subscript: Option<&Subscript>,
        data: &[u8],
        data_type: DataType,
    ) -> Result<Staged> {
        let id = datum.id;
        let type_error = |expected: DataType| DataError::Type {
            id,
            expected,
            actual: data_type,
        };
        datum.check_open()?;

        match (&datum.payload, subscript) {
            (Payload::Scalar(current), None) => {
                if data_type != datum.data_type {
                    return Err(type_error(datum.data_type));
                }
                if current.is_some() {
                    return Err(DataError::DoubleWrite {
                        id,
                        subscript: None,
                    });
                }
                Ok(Staged::Scalar(Value::decode(data_type, data, &self.registry)?))
            }

            (Payload::Container(c), Some(subscript)) => {
                if data_type != c.val_type() {
                    return Err(type_error(c.val_type()));
                }
                c.validate_key(id, subscript)?;
                c.check_writable(id, subscript)?;
                let value = Value::decode(data_type, data, &self.registry)?;
                Ok(Staged::Slots(vec![(subscript.clone(), value)]))
            }

            (Payload::Container(c), None) => {
                if data_type != DataType::Container {
                    return Err(type_error(DataType::Container));
                }
                let members = c.decode_members(id, data, &self.registry)?;
                for (i, (key, _)) in members.iter().enumerate() {
                    c.check_writable(id, key)?;
                    if members[..i].iter().any(|(other, _)| other == key) {
                        return Err(DataError::invalid(format!(
                            "subscript {} appears twice in buffer for {}",
                            key, id
                        )));
                    }
                }
                Ok(Staged::Slots(members))
            }

            (Payload::Multiset(m), None) => {
                if data_type == DataType::Multiset {
                    Ok(Staged::Members(m.decode_members(id, data, &self.registry)?))
                } else if data_type == m.val_type() {
                    let value = Value::decode(data_type, data, &self.registry)?;
                    Ok(Staged::Members(vec![value]))
                } else {
                    Err(type_error(m.val_type()))
                }
            }

            (Payload::Struct(s), Some(subscript)) => {
                let index = datum.field_index(s, subscript)?;
                let layout = self.registry.lookup(s.struct_type)?;
                let field_type = layout.fields[index].data_type;
                if data_type != field_type {
                    return Err(type_error(field_type));
                }
                if s.fields[index].is_some() {
                    return Err(DataError::DoubleWrite {
                        id,
                        subscript: Some(subscript.clone()),
                    });
                }
                let value = Value::decode(data_type, data, &self.registry)?;
                Ok(Staged::Fields(vec![(index, value)]))
            }

            (Payload::Struct(s), None) => {
                if data_type != DataType::Struct {
                    return Err(type_error(DataType::Struct));
                }
                let Value::Struct(incoming) = Value::decode(data_type, data, &self.registry)?
                else {
                    return Err(type_error(DataType::Struct));
                };
                if incoming.struct_type != s.struct_type {
                    return Err(DataError::StructType {
                        id,
                        expected: s.struct_type,
                        actual: incoming.struct_type,
                    });
                }
                let mut fields = Vec::new();
                for (index, field) in incoming.fields.into_iter().enumerate() {
                    let Some(value) = field else { continue };
                    if s.fields[index].is_some() {
                        return Err(DataError::DoubleWrite {
                            id,
                            subscript: Some(Subscript::from(index as i64)),
                        });
                    }
                    fields.push((index, value));
                }
                Ok(Staged::Fields(fields))
            }

            (Payload::Scalar(_) | Payload::Multiset(_), Some(_)) => Err(datum.no_subscripts()),
        }
    }

    /// Apply a staged store. Returns the container references it resolved.
    fn apply(
        &mut self,
        id: DatumId,
        staged: Staged,
        notifications: &mut Notifications,
    ) -> Result<Vec<(ContainerReference, Value)>> {
        let datum = self.datum_mut(id)?;
        let mut resolved = Vec::new();

        match staged {
            Staged::Scalar(value) => {
                datum.payload = Payload::Scalar(Some(value));
                datum.fire_subscribers(None, notifications);
            }
            Staged::Slots(members) => {
                for (key, value) in members {
                    datum.fire_subscribers(Some(&key), notifications);
                    for reference in datum.take_references(&key) {
                        resolved.push((reference, value.clone()));
                    }
                    if let Payload::Container(c) = &mut datum.payload {
                        c.insert(key, value);
                    }
                }
            }
            Staged::Fields(fields) => {
                for (index, value) in fields {
                    datum.fire_subscribers(Some(&Subscript::from(index as i64)), notifications);
                    if let Payload::Struct(s) = &mut datum.payload {
                        s.fields[index] = Some(value);
                    }
                }
                if matches!(&datum.payload, Payload::Struct(s) if s.is_complete()) {
                    datum.close(notifications);
                }
            }
            Staged::Members(values) => {
                if let Payload::Multiset(m) = &mut datum.payload {
                    m.extend(values)?;
                }
            }
        }
        Ok(resolved)
    }

    /// Hand a resolved slot value to the referencing datum's owner, and give
    /// the binding its own read refcount on everything the value references.
    fn bind_reference(
        &mut self,
        reference: ContainerReference,
        value: Value,
        notifications: &mut Notifications,
    ) {
        tracing::trace!(
            container = %reference.container,
            subscript = %reference.subscript,
            referencing = %reference.referencing,
            "resolved container reference"
        );
        notifications.references.push(RefBinding {
            id: reference.referencing,
            data: value.encode(),
            data_type: value.data_type(),
            container: reference.container,
            subscript: reference.subscript,
        });
        if value.has_referands() {
            let mut referands = Vec::new();
            value.referands(&mut referands);
            self.change_referands(&referands, RefCounts::READ, notifications);
        }
    }

    /// Read a value without touching refcounts.
    pub fn retrieve(&self, id: DatumId, subscript: Option<&Subscript>) -> Result<Retrieved> {
        self.lookup(id, subscript).map(|(retrieved, _)| retrieved)
    }

    /// Read a value, then in one step drop `decr` of the caller's refcounts
    /// on `id` and acquire `to_acquire` on every datum the value references.
    ///
    /// If the decrement collects `id`, refcounts it held on those referands
    /// are handed to the caller instead of being released and re-acquired.
    pub fn retrieve2(
        &mut self,
        id: DatumId,
        subscript: Option<&Subscript>,
        decr: RefCounts,
        to_acquire: RefCounts,
        notifications: &mut Notifications,
    ) -> Result<Retrieved> {
        if decr.has_negative() || to_acquire.has_negative() {
            return Err(DataError::invalid(format!(
                "retrieve of {} with negative refcounts {} / {}",
                id, decr, to_acquire
            )));
        }
        let (retrieved, referands) = self.lookup(id, subscript)?;

        let scavenge = Scavenge::new(subscript.cloned(), to_acquire);
        let outcome = self.reference_count(id, decr.negate(), scavenge, notifications)?;

        let acquire = to_acquire - outcome.scavenged;
        if !acquire.is_zero() {
            self.change_referands(&referands, acquire, notifications);
        }
        if !outcome.scavenged.is_zero() {
            tracing::trace!(id = %id, scavenged = %outcome.scavenged, "scavenged refcounts on retrieve");
        }
        Ok(retrieved)
    }

    fn lookup(&self, id: DatumId, subscript: Option<&Subscript>) -> Result<(Retrieved, Vec<DatumId>)> {
        let datum = self.datum(id)?;
        let mut referands = Vec::new();

        let retrieved = match (&datum.payload, subscript) {
            (Payload::Scalar(Some(value)), None) => {
                value.referands(&mut referands);
                Retrieved {
                    data_type: value.data_type(),
                    data: value.encode(),
                }
            }
            (Payload::Scalar(None), None) => return Err(DataError::Unset(id)),
            (Payload::Container(c), None) => {
                for (_, value) in c.iter() {
                    value.referands(&mut referands);
                }
                Retrieved {
                    data_type: DataType::Container,
                    data: c.encode(),
                }
            }
            (Payload::Multiset(m), None) => {
                for value in m.iter() {
                    value.referands(&mut referands);
                }
                Retrieved {
                    data_type: DataType::Multiset,
                    data: m.encode(),
                }
            }
            (Payload::Struct(s), None) => {
                s.referands(&mut referands);
                Retrieved {
                    data_type: DataType::Struct,
                    data: s.encode(),
                }
            }
            (Payload::Container(c), Some(subscript)) => {
                let value = c
                    .get(subscript)
                    .ok_or_else(|| DataError::SubscriptNotFound {
                        id,
                        subscript: subscript.clone(),
                    })?;
                value.referands(&mut referands);
                Retrieved {
                    data_type: value.data_type(),
                    data: value.encode(),
                }
            }
            (Payload::Struct(s), Some(subscript)) => {
                let index = datum.field_index(s, subscript)?;
                let value = s.fields[index]
                    .as_ref()
                    .ok_or_else(|| DataError::SubscriptNotFound {
                        id,
                        subscript: subscript.clone(),
                    })?;
                value.referands(&mut referands);
                Retrieved {
                    data_type: value.data_type(),
                    data: value.encode(),
                }
            }
            (Payload::Scalar(_) | Payload::Multiset(_), Some(_)) => {
                return Err(datum.no_subscripts())
            }
        };
        Ok((retrieved, referands))
    }

    /// Number of members with a value. Reserved container slots do not count.
    pub fn container_size(&self, id: DatumId) -> Result<usize> {
        let datum = self.datum(id)?;
        match &datum.payload {
            Payload::Container(c) => Ok(c.len()),
            Payload::Multiset(m) => Ok(m.len()),
            _ => Err(DataError::Type {
                id,
                expected: DataType::Container,
                actual: datum.data_type,
            }),
        }
    }

    /// Page through a container (in subscript order) or a multiset (in
    /// insertion order), skipping `offset` members and returning at most
    /// `count` (all remaining when `None`).
    ///
    /// Subscript order is bytewise over the raw key, for integer keys too:
    /// `"10"` comes before `"2"`, and negatives come before both.
    pub fn enumerate(
        &self,
        id: DatumId,
        count: Option<usize>,
        offset: usize,
        include_keys: bool,
        include_vals: bool,
    ) -> Result<EnumeratePage> {
        let datum = self.datum(id)?;
        match &datum.payload {
            Payload::Container(c) => Ok(c.page(offset, count, include_keys, include_vals)),
            Payload::Multiset(_) if include_keys => Err(DataError::invalid(format!(
                "multiset {} has no keys to enumerate",
                id
            ))),
            Payload::Multiset(m) => Ok(m.page(offset, count)),
            _ => Err(DataError::Type {
                id,
                expected: DataType::Container,
                actual: datum.data_type,
            }),
        }
    }

    /// Claim a container slot so that exactly one caller goes on to fill it.
    ///
    /// A closed container still answers for slots it holds, but refuses
    /// new claims.
    pub fn insert_atomic(&mut self, id: DatumId, subscript: &Subscript) -> Result<InsertAtomic> {
        let datum = self.datum_mut(id)?;
        let data_type = datum.data_type;
        let closed = datum.check_open();
        let Payload::Container(c) = &mut datum.payload else {
            return Err(DataError::Type {
                id,
                expected: DataType::Container,
                actual: data_type,
            });
        };
        c.validate_key(id, subscript)?;
        if c.is_set(subscript) {
            return Ok(InsertAtomic {
                created: false,
                value_present: true,
            });
        }
        closed?;
        let outcome = c.reserve(subscript);
        tracing::trace!(
            id = %id,
            subscript = %subscript,
            created = outcome.created,
            value_present = outcome.value_present,
            "insert_atomic"
        );
        Ok(outcome)
    }

    /// Take the advisory lock on a datum for `rank`.
    ///
    /// Returns `false` if any rank, `rank` included, already holds it.
    pub fn lock(&mut self, id: DatumId, rank: Rank) -> Result<bool> {
        let datum = self.datum_mut(id)?;
        match datum.lock_holder {
            Some(holder) => {
                tracing::trace!(id = %id, rank, holder, "lock busy");
                Ok(false)
            }
            None => {
                datum.lock_holder = Some(rank);
                tracing::debug!(id = %id, rank, "locked");
                Ok(true)
            }
        }
    }

    /// Release the advisory lock on a datum.
    pub fn unlock(&mut self, id: DatumId) -> Result<()> {
        let datum = self.datum_mut(id)?;
        match datum.lock_holder.take() {
            Some(holder) => {
                tracing::debug!(id = %id, holder, "unlocked");
                Ok(())
            }
            None => Err(DataError::invalid(format!("{} is not locked", id))),
        }
    }

    /// Ask to be told when a datum (`subscript` is `None`) or one of its
    /// slots or fields is set.
    pub fn subscribe(
        &mut self,
        id: DatumId,
        subscript: Option<&Subscript>,
        rank: Rank,
    ) -> Result<Subscription> {
        let datum = self.datum_mut(id)?;
        let set = match subscript {
            None => datum.is_set(),
            Some(subscript) => {
                if let Payload::Container(c) = &datum.payload {
                    c.validate_key(id, subscript)?;
                }
                datum.subscript_is_set(subscript)?
            }
        };
        if set {
            return Ok(Subscription::Available);
        }

        datum.subscribers.try_reserve(1)?;
        datum.subscribers.push(Subscriber {
            rank,
            subscript: subscript.cloned(),
        });
        tracing::trace!(
            id = %id,
            subscript = subscript.map(tracing::field::display),
            rank,
            "subscribed"
        );
        Ok(Subscription::Pending)
    }

    /// Bind the value of `container[subscript]` into `referencing` once it
    /// exists.
    ///
    /// A slot that is already set resolves immediately and the caller does
    /// the binding; otherwise the request is queued and a later store emits
    /// a [`RefBinding`]. Either way a read refcount is acquired on every
    /// datum the value references.
    pub fn container_reference(
        &mut self,
        container: DatumId,
        subscript: &Subscript,
        referencing: DatumId,
        ref_type: DataType,
        notifications: &mut Notifications,
    ) -> Result<ContainerRefOutcome> {
        let datum = self.datum_mut(container)?;
        let data_type = datum.data_type;
        let Payload::Container(c) = &datum.payload else {
            return Err(DataError::Type {
                id: container,
                expected: DataType::Container,
                actual: data_type,
            });
        };
        if ref_type != c.val_type() {
            return Err(DataError::Type {
                id: container,
                expected: c.val_type(),
                actual: ref_type,
            });
        }
        c.validate_key(container, subscript)?;

        if let Some(value) = c.get(subscript).cloned() {
            let mut referands = Vec::new();
            value.referands(&mut referands);
            self.change_referands(&referands, RefCounts::READ, notifications);
            return Ok(ContainerRefOutcome::Resolved {
                data: value.encode(),
                data_type: value.data_type(),
            });
        }

        datum.references.try_reserve(1)?;
        datum.references.push(ContainerReference {
            container,
            subscript: subscript.clone(),
            referencing,
            ref_type,
        });
        tracing::trace!(
            container = %container,
            subscript = %subscript,
            referencing = %referencing,
            "queued container reference"
        );
        Ok(ContainerRefOutcome::Pending)
    }

    /// A fresh id from this server's partition that no live datum uses.
    pub fn unique(&mut self) -> Result<DatumId> {
        loop {
            let id = self.ids.next_id()?;
            if !self.table.contains_key(&id) {
                return Ok(id);
            }
        }
    }

    /// Tear the store down, reporting what was still live.
    pub fn finalize(self) -> FinalizeReport {
        let mut leaked: Vec<DatumId> = self
            .table
            .values()
            .filter(|d| !d.permanent)
            .map(|d| d.id)
            .collect();
        leaked.sort();

        if self.config.report_leaks {
            for id in &leaked {
                if let Some(datum) = self.table.get(id) {
                    tracing::warn!(
                        id = %id,
                        data_type = %datum.data_type,
                        refcounts = %datum.refcounts,
                        "leaked datum"
                    );
                }
            }
        }
        tracing::debug!(live = self.table.len(), leaked = leaked.len(), "finalized data store");

        FinalizeReport {
            live: self.table.len(),
            leaked,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datastore_types::DataCode;

    fn store() -> DataStore {
        DataStore::new(StoreConfig::default()).unwrap()
    }

    fn int_container(s: &mut DataStore, id: i64) -> DatumId {
        let id = DatumId::new(id);
        s.create(
            id,
            DataType::Container,
            TypeExtra::Container {
                key_type: DataType::Integer,
                val_type: DataType::Integer,
            },
            CreateProps::default(),
        )
        .unwrap();
        id
    }

    fn int_bytes(v: i64) -> Bytes {
        Value::Integer(v).encode()
    }

    #[test]
    fn create_rejects_bad_ids() {
        let mut s = store();
        for raw in [0, -3] {
            let err = s
                .create(
                    DatumId::new(raw),
                    DataType::Integer,
                    TypeExtra::None,
                    CreateProps::default(),
                )
                .unwrap_err();
            assert_eq!(err.code(), DataCode::Invalid);
        }

        let mut second = DataStore::new(StoreConfig::for_server(1, 2)).unwrap();
        let err = second
            .create(
                DatumId::new(1),
                DataType::Integer,
                TypeExtra::None,
                CreateProps::default(),
            )
            .unwrap_err();
        assert_eq!(err.code(), DataCode::Invalid);
    }

    #[test]
    fn create_twice_is_double_declare() {
        let mut s = store();
        let id = DatumId::new(4);
        s.create(id, DataType::Float, TypeExtra::None, CreateProps::default())
            .unwrap();
        let err = s
            .create(id, DataType::Float, TypeExtra::None, CreateProps::default())
            .unwrap_err();
        assert_eq!(err.code(), DataCode::DoubleDeclare);
    }

    #[test]
    fn mismatched_extra_is_invalid() {
        let mut s = store();
        let err = s
            .create(
                DatumId::new(1),
                DataType::Container,
                TypeExtra::None,
                CreateProps::default(),
            )
            .unwrap_err();
        assert_eq!(err.code(), DataCode::Invalid);
        assert!(s.is_empty());
    }

    #[test]
    fn scalar_store_and_retrieve() {
        let mut s = store();
        let id = DatumId::new(10);
        let mut n = Notifications::new();
        s.create(id, DataType::String, TypeExtra::None, CreateProps::default())
            .unwrap();

        assert!(matches!(s.retrieve(id, None), Err(DataError::Unset(_))));
        assert_eq!(
            s.retrieve(id, None).unwrap_err().code(),
            DataCode::NotFound
        );

        s.store(id, None, b"hello", DataType::String, RefCounts::WRITE, &mut n)
            .unwrap();
        let got = s.retrieve(id, None).unwrap();
        assert_eq!(got.data_type, DataType::String);
        assert_eq!(&got.data[..], b"hello");
        assert_eq!(s.status(id).unwrap().refcounts, RefCounts::READ);
    }

    #[test]
    fn scalar_store_type_checks() {
        let mut s = store();
        let id = DatumId::new(1);
        let mut n = Notifications::new();
        s.create(id, DataType::Integer, TypeExtra::None, CreateProps::default())
            .unwrap();
        let err = s
            .store(id, None, b"x", DataType::String, RefCounts::ZERO, &mut n)
            .unwrap_err();
        assert_eq!(err.code(), DataCode::Type);

        let err = s
            .store(
                id,
                Some(&Subscript::from(1i64)),
                &int_bytes(1),
                DataType::Integer,
                RefCounts::ZERO,
                &mut n,
            )
            .unwrap_err();
        assert_eq!(err.code(), DataCode::Invalid);
        assert!(!s.status(id).unwrap().set);
    }

    #[test]
    fn failed_store_leaves_refcounts_alone() {
        let mut s = store();
        let id = DatumId::new(1);
        let mut n = Notifications::new();
        s.create(id, DataType::Integer, TypeExtra::None, CreateProps::default())
            .unwrap();
        let err = s
            .store(
                id,
                None,
                &int_bytes(1),
                DataType::Integer,
                RefCounts::new(0, 2),
                &mut n,
            )
            .unwrap_err();
        assert_eq!(err.code(), DataCode::Invalid);
        let status = s.status(id).unwrap();
        assert!(!status.set);
        assert_eq!(status.refcounts, RefCounts::new(1, 1));
    }

    #[test]
    fn whole_container_store_rejects_set_slots() {
        let mut s = store();
        let c = int_container(&mut s, 1);
        let mut n = Notifications::new();
        s.store(
            c,
            Some(&Subscript::from(2i64)),
            &int_bytes(20),
            DataType::Integer,
            RefCounts::ZERO,
            &mut n,
        )
        .unwrap();

        let mut other = crate::container::Container::new(DataType::Integer, DataType::Integer);
        other.insert(Subscript::from(1i64), Value::Integer(10));
        other.insert(Subscript::from(2i64), Value::Integer(99));
        let err = s
            .store(
                c,
                None,
                &other.encode(),
                DataType::Container,
                RefCounts::ZERO,
                &mut n,
            )
            .unwrap_err();
        assert_eq!(err.code(), DataCode::DoubleWrite);
        // Nothing from the rejected buffer landed
        assert!(!s.exists(c, Some(&Subscript::from(1i64))).unwrap());
        assert_eq!(s.container_size(c).unwrap(), 1);
    }

    #[test]
    fn whole_container_store_and_retrieve() {
        let mut s = store();
        let c = int_container(&mut s, 1);
        let mut n = Notifications::new();

        let mut buf = crate::container::Container::new(DataType::Integer, DataType::Integer);
        buf.insert(Subscript::from(3i64), Value::Integer(30));
        buf.insert(Subscript::from(1i64), Value::Integer(10));
        s.store(
            c,
            None,
            &buf.encode(),
            DataType::Container,
            RefCounts::ZERO,
            &mut n,
        )
        .unwrap();

        assert_eq!(s.container_size(c).unwrap(), 2);
        let whole = s.retrieve(c, None).unwrap();
        assert_eq!(whole.data_type, DataType::Container);
        assert_eq!(whole.data, buf.encode());
    }

    #[test]
    fn struct_fields_close_the_struct() {
        let mut s = store();
        s.declare_struct_type(
            StructTypeId(1),
            "point",
            &[("x", DataType::Integer), ("y", DataType::Integer)],
        )
        .unwrap();
        assert_eq!(s.struct_type(StructTypeId(1)).unwrap().field_index("y"), Some(1));
        let id = DatumId::new(1);
        s.create(
            id,
            DataType::Struct,
            TypeExtra::Struct {
                struct_type: StructTypeId(1),
            },
            CreateProps::default(),
        )
        .unwrap();
        assert_eq!(s.subscribe(id, None, 7).unwrap(), Subscription::Pending);

        let mut n = Notifications::new();
        s.store(
            id,
            Some(&Subscript::from("0")),
            &int_bytes(1),
            DataType::Integer,
            RefCounts::ZERO,
            &mut n,
        )
        .unwrap();
        assert!(n.notify.is_empty());
        assert!(!s.status(id).unwrap().set);

        let err = s
            .store(
                id,
                Some(&Subscript::from("0")),
                &int_bytes(1),
                DataType::Integer,
                RefCounts::ZERO,
                &mut n,
            )
            .unwrap_err();
        assert_eq!(err.code(), DataCode::DoubleWrite);

        s.store(
            id,
            Some(&Subscript::from("1")),
            &int_bytes(2),
            DataType::Integer,
            RefCounts::ZERO,
            &mut n,
        )
        .unwrap();
        assert_eq!(n.notify.len(), 1);
        assert!(n.notify[0].subscript.is_none());
        assert!(s.status(id).unwrap().set);

        let field = s.retrieve(id, Some(&Subscript::from("1"))).unwrap();
        assert_eq!(field.data, int_bytes(2));
    }

    #[test]
    fn struct_of_wrong_layout_is_rejected() {
        let mut s = store();
        s.declare_struct_type(StructTypeId(1), "a", &[("x", DataType::Integer)])
            .unwrap();
        s.declare_struct_type(StructTypeId(2), "b", &[("x", DataType::Integer)])
            .unwrap();
        let id = DatumId::new(1);
        s.create(
            id,
            DataType::Struct,
            TypeExtra::Struct {
                struct_type: StructTypeId(1),
            },
            CreateProps::default(),
        )
        .unwrap();

        let other = crate::value::StructValue {
            struct_type: StructTypeId(2),
            fields: vec![Some(Value::Integer(1))],
        };
        let mut n = Notifications::new();
        let err = s
            .store(
                id,
                None,
                &other.encode(),
                DataType::Struct,
                RefCounts::ZERO,
                &mut n,
            )
            .unwrap_err();
        assert_eq!(err.code(), DataCode::Type);
    }

    #[test]
    fn multiset_appends_and_has_no_keys() {
        let mut s = store();
        let id = DatumId::new(1);
        s.create(
            id,
            DataType::Multiset,
            TypeExtra::Multiset {
                val_type: DataType::Integer,
            },
            CreateProps::default(),
        )
        .unwrap();
        let mut n = Notifications::new();
        for v in [5, 5, 1] {
            s.store(id, None, &int_bytes(v), DataType::Integer, RefCounts::ZERO, &mut n)
                .unwrap();
        }
        assert_eq!(s.container_size(id).unwrap(), 3);
        let err = s
            .store(
                id,
                Some(&Subscript::from(0i64)),
                &int_bytes(1),
                DataType::Integer,
                RefCounts::ZERO,
                &mut n,
            )
            .unwrap_err();
        assert_eq!(err.code(), DataCode::Invalid);

        let page = s.enumerate(id, None, 0, false, true).unwrap();
        assert_eq!(
            page.values.unwrap(),
            vec![int_bytes(5), int_bytes(5), int_bytes(1)]
        );
        assert_eq!(
            s.enumerate(id, None, 0, true, true).unwrap_err().code(),
            DataCode::Invalid
        );
    }

    #[test]
    fn exists_distinguishes_live_and_set() {
        let mut s = store();
        let c = int_container(&mut s, 1);
        let key = Subscript::from(9i64);
        assert!(s.exists(c, None).unwrap());
        assert!(!s.exists(c, Some(&key)).unwrap());
        assert!(!s.exists(DatumId::new(77), None).unwrap());

        s.insert_atomic(c, &key).unwrap();
        assert!(!s.exists(c, Some(&key)).unwrap());
    }

    #[test]
    fn lock_is_not_reentrant() {
        let mut s = store();
        let id = DatumId::new(1);
        s.create(id, DataType::Integer, TypeExtra::None, CreateProps::default())
            .unwrap();
        assert!(s.lock(id, 3).unwrap());
        assert!(!s.lock(id, 3).unwrap());
        assert!(!s.lock(id, 4).unwrap());
        assert_eq!(s.status(id).unwrap().locked_by, Some(3));

        s.unlock(id).unwrap();
        assert_eq!(s.unlock(id).unwrap_err().code(), DataCode::Invalid);
        assert!(s.lock(id, 4).unwrap());
    }

    #[test]
    fn container_reference_type_must_match() {
        let mut s = store();
        let c = int_container(&mut s, 1);
        let mut n = Notifications::new();
        let err = s
            .container_reference(
                c,
                &Subscript::from(1i64),
                DatumId::new(2),
                DataType::String,
                &mut n,
            )
            .unwrap_err();
        assert_eq!(err.code(), DataCode::Type);
    }

    #[test]
    fn container_reference_on_set_slot_resolves_now() {
        let mut s = store();
        let c = int_container(&mut s, 1);
        let key = Subscript::from(4i64);
        let mut n = Notifications::new();
        s.store(c, Some(&key), &int_bytes(44), DataType::Integer, RefCounts::ZERO, &mut n)
            .unwrap();
        let outcome = s
            .container_reference(c, &key, DatumId::new(2), DataType::Integer, &mut n)
            .unwrap();
        assert_eq!(
            outcome,
            ContainerRefOutcome::Resolved {
                data: int_bytes(44),
                data_type: DataType::Integer,
            }
        );
        assert!(n.references.is_empty());
    }

    #[test]
    fn unique_skips_live_ids() {
        let mut s = store();
        s.create(
            DatumId::new(1),
            DataType::Integer,
            TypeExtra::None,
            CreateProps::default(),
        )
        .unwrap();
        assert_eq!(s.unique().unwrap(), DatumId::new(2));
        assert_eq!(s.unique().unwrap(), DatumId::new(3));
    }

    #[test]
    fn finalize_reports_non_permanent_leftovers() {
        let mut s = store();
        s.create(
            DatumId::new(2),
            DataType::Integer,
            TypeExtra::None,
            CreateProps::default(),
        )
        .unwrap();
        s.create(
            DatumId::new(1),
            DataType::Integer,
            TypeExtra::None,
            CreateProps::default().permanent(),
        )
        .unwrap();
        let report = s.finalize();
        assert_eq!(report.live, 2);
        assert_eq!(report.leaked, vec![DatumId::new(2)]);
    }
}
