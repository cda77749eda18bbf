//! Low-level datastore vocabulary
//!
//! This is the narrow waist of the datastore stack. Everything at this level is
//! a plain value - no tables, no lifecycle, no notification semantics.
//!
//! - `DatumId`: globally unique datum identifier
//! - `Subscript`: opaque byte key addressing a container slot or struct field
//! - `RefCounts`: read/write reference count pair (absolute or delta)
//! - `DataType` / `TypeExtra`: type tags declared when a datum is created
//! - `DataCode`: the call-return code reported to the runtime layer
//!
//! Use this layer for:
//! - Marshalling requests between ranks without pulling in the store engine
//! - Binding layers that only need to tag buffers with their types
//!
//! # Example
//!
//! ```rust
//! use datastore_types::{DatumId, RefCounts, Subscript};
//!
//! let id = DatumId::new(42);
//! let key = Subscript::from(5i64);
//! assert_eq!(key.as_bytes(), b"5");
//! assert!(!id.is_null());
//! assert_eq!(RefCounts::READ.negate(), RefCounts::new(-1, 0));
//! ```

pub use bytes::Bytes;

mod code;
mod id;
mod refcount;
mod subscript;
mod types;

pub use code::DataCode;
pub use id::DatumId;
pub use refcount::{CreateProps, RefCounts, RefcountType};
pub use subscript::Subscript;
pub use types::{DataType, StructTypeId, TypeExtra};

/// Convenience function to build an integer-keyed subscript list.
pub fn int_subscripts(keys: &[i64]) -> Vec<Subscript> {
    keys.iter().copied().map(Subscript::from).collect()
}

/// Convenience function to build a subscript list from string slices.
pub fn str_subscripts(keys: &[&str]) -> Vec<Subscript> {
    keys.iter().map(|k| Subscript::from(*k)).collect()
}
