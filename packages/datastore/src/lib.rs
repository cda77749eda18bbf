//! Datastore: typed, refcounted datums for a distributed dataflow runtime.
//!
//! Each data server owns one [`DataStore`] holding the datums whose ids fall
//! in its slice of the id space. Workers create datums, write each one once,
//! subscribe to be told when a datum or a container slot is set, and release
//! refcounts when done; a datum is collected as soon as nobody can read or
//! write it any more.
//!
//! This crate re-exports the store layer; see `datastore-core` for details.

pub use datastore_core::*;

/// Open a store configured from the `DATASTORE_*` environment variables.
pub fn open_from_env() -> Result<DataStore> {
    let config = StoreConfig::from_env()?;
    tracing::info!(
        server_index = config.server_index,
        server_count = config.server_count,
        report_leaks = config.report_leaks,
        "opening data store from environment"
    );
    DataStore::new(config)
}
