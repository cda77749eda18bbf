//! Typed values and their binary encoding.
//!
//! Values cross the store boundary as typed byte buffers. The store decodes a
//! buffer once, on store, so that it can validate it against the declared
//! type and find the datum ids embedded in it; it encodes again on retrieve.
//!
//! | Type    | Encoding                                                      |
//! |---------|---------------------------------------------------------------|
//! | Integer | 8 bytes, little-endian `i64`                                  |
//! | Float   | 8 bytes, little-endian `f64`                                  |
//! | String  | UTF-8 bytes                                                   |
//! | Blob    | raw bytes                                                     |
//! | Ref     | 8 bytes, little-endian id                                     |
//! | FileRef | status id, filename id (8 bytes each), mapped flag (1 byte)   |
//! | Struct  | type id, field count (u32 each), then per field a present     |
//! |         | flag and, when present, a u32 length and the field encoding   |
//!
//! Whole containers and multisets use the self-describing layouts in
//! [`container`](crate::container).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use datastore_types::{DataType, DatumId, StructTypeId};

use crate::error::{DataError, Result};
use crate::registry::TypeRegistry;

/// A decoded value of a non-composite type.
///
/// Containers and multisets are not values: they live in the datum table and
/// are only ever held by other values through a `Ref`.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Signed 64-bit integer.
    Integer(i64),
    /// 64-bit floating point.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Opaque bytes.
    Blob(Bytes),
    /// Reference to another datum; holds one read refcount on it.
    Ref(DatumId),
    /// File reference.
    FileRef(FileRef),
    /// Struct instance.
    Struct(StructValue),
}

/// A file reference: two datums describing a file, plus whether it is mapped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileRef {
    /// Datum that is set once the file is ready.
    pub status_id: DatumId,
    /// Datum holding the filename.
    pub filename_id: DatumId,
    /// Whether the file is mapped to a user-visible path.
    pub mapped: bool,
}

/// A struct instance; unset fields are `None`.
#[derive(Clone, Debug, PartialEq)]
pub struct StructValue {
    /// Layout id.
    pub struct_type: StructTypeId,
    /// Field values in layout order.
    pub fields: Vec<Option<Value>>,
}

impl StructValue {
    /// An instance with every field unset.
    pub fn empty(struct_type: StructTypeId, field_count: usize) -> Self {
        Self {
            struct_type,
            fields: vec![None; field_count],
        }
    }

    /// True once every field is set.
    pub fn is_complete(&self) -> bool {
        self.fields.iter().all(Option::is_some)
    }

    /// Encode into a fresh buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf.freeze()
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.struct_type.0);
        buf.put_u32_le(self.fields.len() as u32);
        for field in &self.fields {
            match field {
                None => buf.put_u8(0),
                Some(value) => {
                    buf.put_u8(1);
                    put_length_prefixed(buf, &value.encode());
                }
            }
        }
    }

    /// Append the ids held by every set field.
    pub fn referands(&self, out: &mut Vec<DatumId>) {
        for value in self.fields.iter().flatten() {
            value.referands(out);
        }
    }
}

impl Value {
    /// The type tag of this value.
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Integer(_) => DataType::Integer,
            Value::Float(_) => DataType::Float,
            Value::String(_) => DataType::String,
            Value::Blob(_) => DataType::Blob,
            Value::Ref(_) => DataType::Ref,
            Value::FileRef(_) => DataType::FileRef,
            Value::Struct(_) => DataType::Struct,
        }
    }

    /// Encode into a fresh buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Append the encoding to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Value::Integer(v) => buf.put_i64_le(*v),
            Value::Float(v) => buf.put_f64_le(*v),
            Value::String(s) => buf.put_slice(s.as_bytes()),
            Value::Blob(b) => buf.put_slice(b),
            Value::Ref(id) => buf.put_slice(&id.to_le_bytes()),
            Value::FileRef(f) => {
                buf.put_slice(&f.status_id.to_le_bytes());
                buf.put_slice(&f.filename_id.to_le_bytes());
                buf.put_u8(u8::from(f.mapped));
            }
            Value::Struct(s) => s.encode_into(buf),
        }
    }

    /// Decode a buffer that claims to hold a value of `data_type`.
    pub fn decode(data_type: DataType, data: &[u8], registry: &TypeRegistry) -> Result<Value> {
        match data_type {
            DataType::Integer => Ok(Value::Integer(i64::from_le_bytes(fixed(data, data_type)?))),
            DataType::Float => Ok(Value::Float(f64::from_le_bytes(fixed(data, data_type)?))),
            DataType::String => std::str::from_utf8(data)
                .map(|s| Value::String(s.to_string()))
                .map_err(|e| DataError::invalid(format!("string is not UTF-8: {}", e))),
            DataType::Blob => Ok(Value::Blob(Bytes::copy_from_slice(data))),
            DataType::Ref => Ok(Value::Ref(DatumId::from_le_bytes(fixed(data, data_type)?))),
            DataType::FileRef => {
                let raw: [u8; 17] = fixed(data, data_type)?;
                let mut buf = &raw[..];
                let status_id = DatumId::new(buf.get_i64_le());
                let filename_id = DatumId::new(buf.get_i64_le());
                let mapped = match buf.get_u8() {
                    0 => false,
                    1 => true,
                    other => {
                        return Err(DataError::invalid(format!(
                            "file_ref mapped flag must be 0 or 1, got {}",
                            other
                        )))
                    }
                };
                Ok(Value::FileRef(FileRef {
                    status_id,
                    filename_id,
                    mapped,
                }))
            }
            DataType::Struct => decode_struct(data, registry).map(Value::Struct),
            DataType::Container | DataType::Multiset => Err(DataError::invalid(format!(
                "a {} is not a member value",
                data_type
            ))),
        }
    }

    /// Append the ids of every datum this value holds a refcount on.
    pub fn referands(&self, out: &mut Vec<DatumId>) {
        match self {
            Value::Ref(id) => out.push(*id),
            Value::FileRef(f) => {
                out.push(f.status_id);
                out.push(f.filename_id);
            }
            Value::Struct(s) => s.referands(out),
            _ => {}
        }
    }

    /// True if the value embeds any datum ids.
    pub fn has_referands(&self) -> bool {
        match self {
            Value::Ref(_) | Value::FileRef(_) => true,
            Value::Struct(s) => s.fields.iter().flatten().any(Value::has_referands),
            _ => false,
        }
    }
}

fn fixed<const N: usize>(data: &[u8], data_type: DataType) -> Result<[u8; N]> {
    data.try_into().map_err(|_| {
        DataError::invalid(format!(
            "{} must be {} bytes, got {}",
            data_type,
            N,
            data.len()
        ))
    })
}

fn decode_struct(data: &[u8], registry: &TypeRegistry) -> Result<StructValue> {
    let mut buf = data;
    let struct_type = StructTypeId(take_u32(&mut buf)?);
    let count = take_u32(&mut buf)? as usize;

    let layout = registry.lookup(struct_type)?;
    if count != layout.field_count() {
        return Err(DataError::invalid(format!(
            "{} has {} fields, buffer has {}",
            layout.name,
            layout.field_count(),
            count
        )));
    }

    let mut fields = Vec::new();
    fields.try_reserve(count)?;
    for field in &layout.fields {
        if !buf.has_remaining() {
            return Err(DataError::invalid("truncated struct buffer"));
        }
        match buf.get_u8() {
            0 => fields.push(None),
            1 => {
                let bytes = take_length_prefixed(&mut buf)?;
                fields.push(Some(Value::decode(field.data_type, bytes, registry)?));
            }
            other => {
                return Err(DataError::invalid(format!(
                    "struct field flag must be 0 or 1, got {}",
                    other
                )))
            }
        }
    }

    if buf.has_remaining() {
        return Err(DataError::invalid("trailing bytes after struct"));
    }

    Ok(StructValue {
        struct_type,
        fields,
    })
}

pub(crate) fn put_length_prefixed(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u32_le(bytes.len() as u32);
    buf.put_slice(bytes);
}

pub(crate) fn take_u32(buf: &mut &[u8]) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(DataError::invalid("truncated length field"));
    }
    Ok(buf.get_u32_le())
}

pub(crate) fn take_length_prefixed<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8]> {
    let len = take_u32(buf)? as usize;
    if buf.len() < len {
        return Err(DataError::invalid(format!(
            "length {} exceeds remaining {} bytes",
            len,
            buf.len()
        )));
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

// Conversion from common types

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<DatumId> for Value {
    fn from(v: DatumId) -> Self {
        Value::Ref(v)
    }
}

impl From<FileRef> for Value {
    fn from(v: FileRef) -> Self {
        Value::FileRef(v)
    }
}

impl From<StructValue> for Value {
    fn from(v: StructValue) -> Self {
        Value::Struct(v)
    }
}
