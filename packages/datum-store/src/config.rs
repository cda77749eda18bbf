//! Store configuration.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DataError, Result};

/// Environment variable naming this server's index among the servers.
pub const ENV_SERVER_INDEX: &str = "DATASTORE_SERVER_INDEX";

/// Environment variable naming the number of servers sharing the id space.
pub const ENV_SERVER_COUNT: &str = "DATASTORE_SERVER_COUNT";

/// Environment variable enabling leak reporting at finalize.
pub const ENV_REPORT_LEAKS: &str = "DATASTORE_REPORT_LEAKS";

/// Configuration for a [`DataStore`](crate::DataStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Index of this server among the data servers, `0..server_count`.
    pub server_index: u32,

    /// Number of data servers; each owns a disjoint slice of the id space.
    pub server_count: u32,

    /// Log every datum still live at finalize.
    pub report_leaks: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            server_index: 0,
            server_count: 1,
            report_leaks: false,
        }
    }
}

impl StoreConfig {
    /// Configuration for server `server_index` of `server_count`.
    pub fn for_server(server_index: u32, server_count: u32) -> Self {
        Self {
            server_index,
            server_count,
            ..Self::default()
        }
    }

    /// Defaults overridden by `DATASTORE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(index) = env_var(ENV_SERVER_INDEX)? {
            config.server_index = index;
        }
        if let Some(count) = env_var(ENV_SERVER_COUNT)? {
            config.server_count = count;
        }
        if let Some(report) = env_var::<String>(ENV_REPORT_LEAKS)? {
            config.report_leaks = parse_flag(ENV_REPORT_LEAKS, &report)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Check that the server layout is usable.
    pub fn validate(&self) -> Result<()> {
        if self.server_count == 0 {
            return Err(DataError::invalid("server_count must be at least 1"));
        }
        if self.server_index >= self.server_count {
            return Err(DataError::invalid(format!(
                "server_index {} out of range for {} servers",
                self.server_index, self.server_count
            )));
        }
        Ok(())
    }
}

fn env_var<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| DataError::invalid(format!("{}={:?}: {}", name, raw, e))),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(DataError::invalid(format!("{}: {}", name, e))),
    }
}

fn parse_flag(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(DataError::invalid(format!(
            "{}={:?} is not a boolean",
            name, other
        ))),
    }
}
