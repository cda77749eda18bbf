//! Error types for the store layer.

use datastore_types::{DataCode, DataType, DatumId, StructTypeId, Subscript};
use thiserror::Error;

/// Errors raised by store operations.
///
/// Every variant maps to exactly one [`DataCode`] through [`DataError::code`];
/// the variants add the ids, subscripts and types needed to debug a failure.
/// Operations fail before any visible mutation.
#[derive(Debug, Error)]
pub enum DataError {
    /// No live datum has this id.
    #[error("datum not found: {0}")]
    NotFound(DatumId),

    /// The datum exists but its top-level value was never stored.
    #[error("datum {0} has no value")]
    Unset(DatumId),

    /// The datum exists but the subscript has no value.
    #[error("subscript {subscript} not found in {id}")]
    SubscriptNotFound {
        /// Datum that was addressed.
        id: DatumId,
        /// Missing subscript.
        subscript: Subscript,
    },

    /// Value or datum type does not match what the operation needs.
    #[error("type error on {id}: expected {expected}, got {actual}")]
    Type {
        /// Datum that was addressed.
        id: DatumId,
        /// Type the operation required.
        expected: DataType,
        /// Type that was supplied or found.
        actual: DataType,
    },

    /// A struct value of the wrong layout.
    #[error("type error on {id}: expected {expected}, got {actual}")]
    StructType {
        /// Datum that was addressed.
        id: DatumId,
        /// Declared layout.
        expected: StructTypeId,
        /// Supplied layout.
        actual: StructTypeId,
    },

    /// The target already holds a value.
    #[error("double write to {id}{}", describe_subscript(.subscript))]
    DoubleWrite {
        /// Datum that was addressed.
        id: DatumId,
        /// Slot or field, if any.
        subscript: Option<Subscript>,
    },

    /// A datum id or struct type id is already declared.
    #[error("already declared: {what}")]
    DoubleDeclare {
        /// What was declared twice.
        what: String,
    },

    /// Malformed argument.
    #[error("invalid: {message}")]
    Invalid {
        /// What was wrong.
        message: String,
    },

    /// Allocation failure.
    #[error("out of memory")]
    Oom,

    /// Anything else.
    #[error("{message}")]
    Other {
        /// What went wrong.
        message: String,
    },
}

fn describe_subscript(subscript: &Option<Subscript>) -> String {
    match subscript {
        Some(s) => s.to_string(),
        None => String::new(),
    }
}

impl DataError {
    /// The call-return code for this error.
    pub fn code(&self) -> DataCode {
        match self {
            DataError::NotFound(_) | DataError::Unset(_) => DataCode::NotFound,
            DataError::SubscriptNotFound { .. } => DataCode::SubscriptNotFound,
            DataError::Type { .. } | DataError::StructType { .. } => DataCode::Type,
            DataError::DoubleWrite { .. } => DataCode::DoubleWrite,
            DataError::DoubleDeclare { .. } => DataCode::DoubleDeclare,
            DataError::Invalid { .. } => DataCode::Invalid,
            DataError::Oom => DataCode::Oom,
            DataError::Other { .. } => DataCode::Error,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        DataError::Invalid {
            message: message.into(),
        }
    }
}

impl From<std::collections::TryReserveError> for DataError {
    fn from(_: std::collections::TryReserveError) -> Self {
        DataError::Oom
    }
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, DataError>;
