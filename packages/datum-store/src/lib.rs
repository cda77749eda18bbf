//! Datastore core: the typed datum store
//!
//! This layer adds meaning to the bare ids and refcounts of
//! `datastore-types`:
//! - `DataStore`: the datum table and every operation on it
//! - `Value`: decoded member values and their binary encoding
//! - `Container` / `Multiset`: keyed and unkeyed composites
//! - `TypeRegistry`: struct layouts shared by all datums
//! - `Notifications`: what an operation wants delivered to other ranks
//!
//! A datum is created with a type and initial read/write refcounts, written
//! exactly once (composites: each slot or field once), and collected when
//! both refcounts reach zero. Collection cascades through every datum its
//! value references.
//!
//! # Example
//!
//! ```rust
//! use datastore_core::{
//!     CreateProps, DataStore, DataType, DatumId, Notifications, RefCounts, StoreConfig,
//!     Subscript, TypeExtra, Value,
//! };
//!
//! let mut store = DataStore::new(StoreConfig::default()).unwrap();
//! let mut notifications = Notifications::new();
//!
//! let c = DatumId::new(1);
//! store
//!     .create(
//!         c,
//!         DataType::Container,
//!         TypeExtra::Container {
//!             key_type: DataType::Integer,
//!             val_type: DataType::Integer,
//!         },
//!         CreateProps::default(),
//!     )
//!     .unwrap();
//!
//! store
//!     .store(
//!         c,
//!         Some(&Subscript::from(5i64)),
//!         &Value::Integer(42).encode(),
//!         DataType::Integer,
//!         RefCounts::ZERO,
//!         &mut notifications,
//!     )
//!     .unwrap();
//! assert_eq!(store.container_size(c).unwrap(), 1);
//! ```

pub use bytes::Bytes;

mod config;
mod container;
mod datum;
mod error;
mod ids;
mod notify;
mod refcount;
mod registry;
mod store;
mod value;

pub use config::{StoreConfig, ENV_REPORT_LEAKS, ENV_SERVER_COUNT, ENV_SERVER_INDEX};
pub use container::{Container, EnumeratePage, InsertAtomic, Multiset};
pub use datum::DatumStatus;
pub use error::{DataError, Result};
pub use ids::IdAllocator;
pub use notify::{
    ContainerRefOutcome, Notifications, Notify, Rank, RefBinding, RefcountChange, Subscription,
};
pub use refcount::{RefcountOutcome, Scavenge};
pub use registry::{StructField, StructType, TypeRegistry};
pub use store::{DataStore, FinalizeReport, Retrieved};
pub use value::{FileRef, StructValue, Value};

// Re-export the shared types for convenience
pub use datastore_types::{
    CreateProps, DataCode, DataType, DatumId, RefCounts, RefcountType, StructTypeId, Subscript,
    TypeExtra,
};
