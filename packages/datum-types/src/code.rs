//! Result codes reported across the call-return boundary.
//!
//! Codes at this level carry no context. Higher layers attach ids, subscripts
//! and type names to their errors and map them down to one of these.

use serde::{Deserialize, Serialize};

/// Outcome code of a datastore operation.
///
/// The runtime layer switches on these to decide whether a failure is an
/// ordinary condition (a missing optional value) or an application bug.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataCode {
    /// The operation was applied.
    Success,

    /// Unknown datum id, or a top-level value that is not set yet.
    NotFound,

    /// The datum exists but the requested subscript has no value.
    SubscriptNotFound,

    /// The value type does not match the declared type.
    Type,

    /// The target already holds a value.
    DoubleWrite,

    /// The id or struct type was already declared.
    DoubleDeclare,

    /// Malformed argument (bad subscript, negative refcount, bad buffer...).
    Invalid,

    /// Allocation failure.
    Oom,

    /// Any other failure.
    Error,
}

impl std::fmt::Display for DataCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DataCode::Success => "success",
            DataCode::NotFound => "not found",
            DataCode::SubscriptNotFound => "subscript not found",
            DataCode::Type => "type error",
            DataCode::DoubleWrite => "double write",
            DataCode::DoubleDeclare => "double declare",
            DataCode::Invalid => "invalid",
            DataCode::Oom => "out of memory",
            DataCode::Error => "error",
        };
        f.write_str(name)
    }
}
