//! Datum id allocation over a per-server partition of the id space.
//!
//! Server `i` of `n` owns every positive id with `(id - 1) % n == i`, so
//! servers never need to coordinate to hand out unique ids.

use datastore_types::DatumId;

use crate::config::StoreConfig;
use crate::error::{DataError, Result};

/// Hands out ids from this server's partition.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    server_index: i64,
    server_count: i64,
    /// `None` once the partition's last id has been handed out.
    next: Option<i64>,
}

impl IdAllocator {
    /// Allocator for the partition described by `config`.
    pub fn new(config: &StoreConfig) -> Self {
        let server_index = i64::from(config.server_index);
        Self {
            server_index,
            server_count: i64::from(config.server_count.max(1)),
            next: Some(server_index + 1),
        }
    }

    /// Next id in the partition; never returns the same id twice.
    pub fn next_id(&mut self) -> Result<DatumId> {
        let id = self.next.ok_or_else(|| DataError::Other {
            message: "datum id space exhausted".to_string(),
        })?;
        self.next = id.checked_add(self.server_count);
        Ok(DatumId::new(id))
    }

    /// True if `id` belongs to this server's partition.
    pub fn owns(&self, id: DatumId) -> bool {
        self.owner_of(id) == Some(self.server_index as u32)
    }

    /// Index of the server owning `id`; `None` for non-positive ids.
    pub fn owner_of(&self, id: DatumId) -> Option<u32> {
        let raw = id.get();
        if raw <= 0 {
            return None;
        }
        Some(((raw - 1) % self.server_count) as u32)
    }
}
