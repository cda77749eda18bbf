//! Datum identifiers.

use serde::{Deserialize, Serialize};

/// Globally unique identifier of a datum.
///
/// Ids are partitioned between ranks by the allocator, so two ranks never
/// hand out the same id. `DatumId::NULL` (zero) never names a datum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatumId(i64);

impl DatumId {
    /// The null id.
    pub const NULL: DatumId = DatumId(0);

    /// Wrap a raw id.
    pub const fn new(raw: i64) -> Self {
        DatumId(raw)
    }

    /// The raw integer value.
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Check if this is the null id.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Little-endian encoding, as embedded in reference values.
    pub fn to_le_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Decode from the little-endian encoding.
    pub fn from_le_bytes(bytes: [u8; 8]) -> Self {
        DatumId(i64::from_le_bytes(bytes))
    }
}

impl From<i64> for DatumId {
    fn from(raw: i64) -> Self {
        DatumId(raw)
    }
}

impl From<DatumId> for i64 {
    fn from(id: DatumId) -> Self {
        id.0
    }
}

impl std::fmt::Display for DatumId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{}>", self.0)
    }
}
