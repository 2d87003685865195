//! Error types for the IVM operator graph.
//!
//! One flat enum with a variant per failure kind from the change-propagation
//! protocol, constructed through helpers that attach caller location so a
//! fatal error can be traced back to the operator that raised it.

use std::panic::Location;

/// The kinds of errors the operator graph can raise.
#[derive(Debug, thiserror::Error)]
pub enum IvmError {
    /// A precondition of the change protocol was broken: add of an existing
    /// primary key, remove of a missing primary key, a child change on an
    /// unknown parent, or a relationship missing from an operator's schema.
    ///
    /// Fatal within the graph — indicates an upstream bug.
    #[error("invariant violated in {operator} at {location}: {message}")]
    InvariantViolation {
        operator: String,
        message: String,
        location: &'static Location<'static>,
    },

    /// A row contained a value whose type is incompatible with an ordering
    /// column (e.g. a string compared against a number column).
    #[error("type mismatch in {operator} at {location}: {message}")]
    TypeMismatch {
        operator: String,
        message: String,
        location: &'static Location<'static>,
    },

    /// A cached size or key-set entry was found inconsistent with observed
    /// data (e.g. a size decremented below zero).
    ///
    /// The only kind callers are expected to clamp-and-warn on instead of
    /// propagating; see [`IvmError::is_tolerated`].
    #[error("storage corruption in {operator}: {message}")]
    StorageCorruption { operator: String, message: String },

    /// `FanOut::destroy` was called more times than it has outputs.
    #[error(
        "fan-out destroyed more times than it has outputs \
         ({outputs} outputs, destroy call #{call})"
    )]
    DestroyMisuse { outputs: usize, call: usize },
}

/// The result type threaded through every `fetch`/`cleanup`/`push` call.
pub type IvmResult<T> = Result<T, IvmError>;

impl IvmError {
    #[track_caller]
    pub fn invariant(operator: impl Into<String>, message: impl Into<String>) -> Self {
        IvmError::InvariantViolation {
            operator: operator.into(),
            message: message.into(),
            location: Location::caller(),
        }
    }

    #[track_caller]
    pub fn type_mismatch(operator: impl Into<String>, message: impl Into<String>) -> Self {
        IvmError::TypeMismatch {
            operator: operator.into(),
            message: message.into(),
            location: Location::caller(),
        }
    }

    pub fn storage_corruption(operator: impl Into<String>, message: impl Into<String>) -> Self {
        IvmError::StorageCorruption {
            operator: operator.into(),
            message: message.into(),
        }
    }

    pub fn destroy_misuse(outputs: usize, call: usize) -> Self {
        IvmError::DestroyMisuse { outputs, call }
    }

    /// True for the one kind §7 says must be tolerated rather than
    /// propagated: a relationship size cache found negative after a
    /// decrement. Callers clamp to zero and log a warning instead of
    /// returning this up the call stack.
    pub fn is_tolerated(&self) -> bool {
        matches!(self, IvmError::StorageCorruption { .. })
    }
}

/// Build and return an [`IvmError::InvariantViolation`] from the current
/// function.
#[macro_export]
macro_rules! invariant {
    ($operator:expr, $($arg:tt)*) => {
        return Err($crate::IvmError::invariant($operator, format!($($arg)*)))
    };
}

/// Build and return an [`IvmError::TypeMismatch`] from the current function.
#[macro_export]
macro_rules! type_mismatch {
    ($operator:expr, $($arg:tt)*) => {
        return Err($crate::IvmError::type_mismatch($operator, format!($($arg)*)))
    };
}
