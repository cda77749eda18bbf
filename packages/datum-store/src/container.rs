//! Container engine: subscript-indexed slots and append-only multisets.
//!
//! A container slot is either reserved (claimed through `insert_atomic`, no
//! value yet) or set. Slots are kept in subscript byte order, which makes
//! enumeration deterministic and restartable by offset. Integer keys are
//! compared as their decimal text, so `"10"` sorts before `"2"`.

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};
use datastore_types::{DataType, DatumId, Subscript};

use crate::error::{DataError, Result};
use crate::registry::TypeRegistry;
use crate::value::{put_length_prefixed, take_length_prefixed, take_u32, Value};

/// State of one container slot.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Slot {
    /// Claimed, value not written yet.
    Reserved,
    /// Holds its final value.
    Set(Value),
}

/// Result of [`DataStore::insert_atomic`](crate::DataStore::insert_atomic).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InsertAtomic {
    /// This caller claimed the slot.
    pub created: bool,
    /// The slot already holds a value.
    pub value_present: bool,
}

/// One page of [`DataStore::enumerate`](crate::DataStore::enumerate).
#[derive(Clone, Debug, PartialEq)]
pub struct EnumeratePage {
    /// Subscripts, when requested.
    pub keys: Option<Vec<Subscript>>,
    /// Encoded values, when requested.
    pub values: Option<Vec<Bytes>>,
    /// Number of members in this page.
    pub count: usize,
    /// Key type (`None` for multisets).
    pub key_type: Option<DataType>,
    /// Value type.
    pub val_type: DataType,
}

/// Subscript-indexed map of typed values.
#[derive(Clone, Debug)]
pub struct Container {
    key_type: DataType,
    val_type: DataType,
    slots: BTreeMap<Subscript, Slot>,
}

impl Container {
    pub(crate) fn new(key_type: DataType, val_type: DataType) -> Self {
        Self {
            key_type,
            val_type,
            slots: BTreeMap::new(),
        }
    }

    /// Declared key type.
    pub fn key_type(&self) -> DataType {
        self.key_type
    }

    /// Declared value type.
    pub fn val_type(&self) -> DataType {
        self.val_type
    }

    /// Check a subscript against the declared key type.
    pub(crate) fn validate_key(&self, id: DatumId, subscript: &Subscript) -> Result<()> {
        validate_key(self.key_type, id, subscript)
    }

    /// The value at `subscript`, if set.
    pub fn get(&self, subscript: &Subscript) -> Option<&Value> {
        match self.slots.get(subscript) {
            Some(Slot::Set(value)) => Some(value),
            _ => None,
        }
    }

    /// True if `subscript` holds a value.
    pub fn is_set(&self, subscript: &Subscript) -> bool {
        self.get(subscript).is_some()
    }

    /// Number of set slots.
    pub fn len(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot, Slot::Set(_)))
            .count()
    }

    /// True if no slot is set.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Set slots in subscript order.
    pub fn iter(&self) -> impl Iterator<Item = (&Subscript, &Value)> {
        self.slots.iter().filter_map(|(key, slot)| match slot {
            Slot::Set(value) => Some((key, value)),
            Slot::Reserved => None,
        })
    }

    /// Fail with `DoubleWrite` if `subscript` is already set.
    pub(crate) fn check_writable(&self, id: DatumId, subscript: &Subscript) -> Result<()> {
        if self.is_set(subscript) {
            return Err(DataError::DoubleWrite {
                id,
                subscript: Some(subscript.clone()),
            });
        }
        Ok(())
    }

    /// Set a slot. Callers check writability first.
    pub(crate) fn insert(&mut self, subscript: Subscript, value: Value) {
        self.slots.insert(subscript, Slot::Set(value));
    }

    /// Claim `subscript` if nobody has.
    pub(crate) fn reserve(&mut self, subscript: &Subscript) -> InsertAtomic {
        match self.slots.get(subscript) {
            Some(Slot::Set(_)) => InsertAtomic {
                created: false,
                value_present: true,
            },
            Some(Slot::Reserved) => InsertAtomic {
                created: false,
                value_present: false,
            },
            None => {
                self.slots.insert(subscript.clone(), Slot::Reserved);
                InsertAtomic {
                    created: true,
                    value_present: false,
                }
            }
        }
    }

    /// Encode every set slot as a whole-container buffer.
    pub(crate) fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(self.key_type.tag());
        buf.put_u8(self.val_type.tag());
        buf.put_u32_le(self.len() as u32);
        for (key, value) in self.iter() {
            put_length_prefixed(&mut buf, key.as_bytes());
            put_length_prefixed(&mut buf, &value.encode());
        }
        buf.freeze()
    }

    /// Decode a whole-container buffer written for this container's types.
    pub(crate) fn decode_members(
        &self,
        id: DatumId,
        data: &[u8],
        registry: &TypeRegistry,
    ) -> Result<Vec<(Subscript, Value)>> {
        let (key_type, val_type, members) = decode_container(id, data, registry)?;
        for (expected, actual) in [(self.key_type, key_type), (self.val_type, val_type)] {
            if expected != actual {
                return Err(DataError::Type {
                    id,
                    expected,
                    actual,
                });
            }
        }
        Ok(members)
    }

    pub(crate) fn page(
        &self,
        offset: usize,
        count: Option<usize>,
        include_keys: bool,
        include_vals: bool,
    ) -> EnumeratePage {
        let mut keys = include_keys.then(Vec::new);
        let mut values = include_vals.then(Vec::new);
        let mut n = 0;
        for (key, value) in self.iter().skip(offset).take(count.unwrap_or(usize::MAX)) {
            if let Some(keys) = keys.as_mut() {
                keys.push(key.clone());
            }
            if let Some(values) = values.as_mut() {
                values.push(value.encode());
            }
            n += 1;
        }
        EnumeratePage {
            keys,
            values,
            count: n,
            key_type: Some(self.key_type),
            val_type: self.val_type,
        }
    }
}

/// Append-only bag of typed values, kept in insertion order.
#[derive(Clone, Debug)]
pub struct Multiset {
    val_type: DataType,
    members: Vec<Value>,
}

impl Multiset {
    pub(crate) fn new(val_type: DataType) -> Self {
        Self {
            val_type,
            members: Vec::new(),
        }
    }

    /// Declared member type.
    pub fn val_type(&self) -> DataType {
        self.val_type
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True if empty.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.members.iter()
    }

    pub(crate) fn extend(&mut self, values: Vec<Value>) -> Result<()> {
        self.members.try_reserve(values.len())?;
        self.members.extend(values);
        Ok(())
    }

    pub(crate) fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(self.val_type.tag());
        buf.put_u32_le(self.members.len() as u32);
        for value in &self.members {
            put_length_prefixed(&mut buf, &value.encode());
        }
        buf.freeze()
    }

    pub(crate) fn decode_members(
        &self,
        id: DatumId,
        data: &[u8],
        registry: &TypeRegistry,
    ) -> Result<Vec<Value>> {
        let (val_type, members) = decode_multiset(data, registry)?;
        if val_type != self.val_type {
            return Err(DataError::Type {
                id,
                expected: self.val_type,
                actual: val_type,
            });
        }
        Ok(members)
    }

    pub(crate) fn page(&self, offset: usize, count: Option<usize>) -> EnumeratePage {
        let values: Vec<Bytes> = self
            .members
            .iter()
            .skip(offset)
            .take(count.unwrap_or(usize::MAX))
            .map(Value::encode)
            .collect();
        EnumeratePage {
            keys: None,
            count: values.len(),
            values: Some(values),
            key_type: None,
            val_type: self.val_type,
        }
    }
}

pub(crate) fn validate_key(key_type: DataType, id: DatumId, subscript: &Subscript) -> Result<()> {
    let ok = match key_type {
        DataType::Integer => subscript.as_i64().is_some(),
        DataType::String => subscript.as_str().is_some(),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(DataError::invalid(format!(
            "subscript {} is not a valid {} key for {}",
            subscript, key_type, id
        )))
    }
}

/// Decode a whole-container buffer: key and value type tags (one byte each),
/// a u32 member count, then a length-prefixed subscript and a length-prefixed
/// value per member.
pub(crate) fn decode_container(
    id: DatumId,
    data: &[u8],
    registry: &TypeRegistry,
) -> Result<(DataType, DataType, Vec<(Subscript, Value)>)> {
    let mut buf = data;
    let key_type = take_tag(&mut buf)?;
    let val_type = take_tag(&mut buf)?;
    if !key_type.is_key_type() || !val_type.is_member_type() {
        return Err(DataError::invalid(format!(
            "no container maps {} to {}",
            key_type, val_type
        )));
    }

    let count = take_count(&mut buf, 8)?;
    let mut members: Vec<(Subscript, Value)> = Vec::new();
    members.try_reserve(count)?;
    for _ in 0..count {
        let key = Subscript::copy_from_slice(take_length_prefixed(&mut buf)?);
        validate_key(key_type, id, &key)?;
        let value = Value::decode(val_type, take_length_prefixed(&mut buf)?, registry)?;
        members.push((key, value));
    }
    ensure_consumed(buf)?;
    Ok((key_type, val_type, members))
}

/// Decode a whole-multiset buffer: member type tag, u32 count, then a
/// length-prefixed value per member.
pub(crate) fn decode_multiset(data: &[u8], registry: &TypeRegistry) -> Result<(DataType, Vec<Value>)> {
    let mut buf = data;
    let val_type = take_tag(&mut buf)?;
    if !val_type.is_member_type() {
        return Err(DataError::invalid(format!(
            "a multiset cannot hold {}",
            val_type
        )));
    }

    let count = take_count(&mut buf, 4)?;
    let mut members = Vec::new();
    members.try_reserve(count)?;
    for _ in 0..count {
        members.push(Value::decode(
            val_type,
            take_length_prefixed(&mut buf)?,
            registry,
        )?);
    }
    ensure_consumed(buf)?;
    Ok((val_type, members))
}

fn take_tag(buf: &mut &[u8]) -> Result<DataType> {
    let (&tag, rest) = buf
        .split_first()
        .ok_or_else(|| DataError::invalid("truncated type tag"))?;
    *buf = rest;
    DataType::from_tag(tag).ok_or_else(|| DataError::invalid(format!("unknown type tag {}", tag)))
}

/// Read a member count, rejecting counts the buffer cannot possibly hold.
fn take_count(buf: &mut &[u8], min_member_len: usize) -> Result<usize> {
    let count = take_u32(buf)? as usize;
    if count.saturating_mul(min_member_len) > buf.len() {
        return Err(DataError::invalid(format!(
            "{} members cannot fit in {} bytes",
            count,
            buf.len()
        )));
    }
    Ok(count)
}

fn ensure_consumed(buf: &[u8]) -> Result<()> {
    if buf.is_empty() {
        Ok(())
    } else {
        Err(DataError::invalid(format!(
            "{} trailing bytes after members",
            buf.len()
        )))
    }
}
