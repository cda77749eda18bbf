//! Type tags for datums and the values stored in them.

use serde::{Deserialize, Serialize};

/// Identifier of a registered struct layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StructTypeId(pub u32);

impl std::fmt::Display for StructTypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "struct#{}", self.0)
    }
}

/// The type of a datum or of a value stored inside one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Signed 64-bit integer.
    Integer,
    /// 64-bit float.
    Float,
    /// UTF-8 string.
    String,
    /// Opaque bytes.
    Blob,
    /// Reference to another datum.
    Ref,
    /// File reference: a status datum, a filename datum and a mapped flag.
    FileRef,
    /// Subscript-indexed map.
    Container,
    /// Append-only bag.
    Multiset,
    /// Fixed layout of named fields.
    Struct,
}

impl DataType {
    /// Type name used in error messages and logs.
    pub fn name(self) -> &'static str {
        match self {
            DataType::Integer => "integer",
            DataType::Float => "float",
            DataType::String => "string",
            DataType::Blob => "blob",
            DataType::Ref => "ref",
            DataType::FileRef => "file_ref",
            DataType::Container => "container",
            DataType::Multiset => "multiset",
            DataType::Struct => "struct",
        }
    }

    /// One-byte tag used in self-describing buffers.
    pub fn tag(self) -> u8 {
        match self {
            DataType::Integer => 1,
            DataType::Float => 2,
            DataType::String => 3,
            DataType::Blob => 4,
            DataType::Ref => 5,
            DataType::FileRef => 6,
            DataType::Container => 7,
            DataType::Multiset => 8,
            DataType::Struct => 9,
        }
    }

    /// Inverse of [`DataType::tag`].
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => DataType::Integer,
            2 => DataType::Float,
            3 => DataType::String,
            4 => DataType::Blob,
            5 => DataType::Ref,
            6 => DataType::FileRef,
            7 => DataType::Container,
            8 => DataType::Multiset,
            9 => DataType::Struct,
            _ => return None,
        })
    }

    /// Datums of this type are filled incrementally and closed explicitly.
    pub fn is_composite(self) -> bool {
        matches!(
            self,
            DataType::Container | DataType::Multiset | DataType::Struct
        )
    }

    /// Usable as a container key type.
    pub fn is_key_type(self) -> bool {
        matches!(self, DataType::Integer | DataType::String | DataType::Blob)
    }

    /// Usable as a container or multiset member, or a struct field.
    ///
    /// Containers and multisets can only be held through a `Ref`.
    pub fn is_member_type(self) -> bool {
        !matches!(self, DataType::Container | DataType::Multiset)
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Extra type information supplied when a datum is created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeExtra {
    /// Scalars need nothing more.
    #[default]
    None,
    /// Key and value types of a container.
    Container {
        /// Type of the subscripts.
        key_type: DataType,
        /// Type of the values.
        val_type: DataType,
    },
    /// Member type of a multiset.
    Multiset {
        /// Type of the members.
        val_type: DataType,
    },
    /// Layout of a struct datum.
    Struct {
        /// Registered layout.
        struct_type: StructTypeId,
    },
}
