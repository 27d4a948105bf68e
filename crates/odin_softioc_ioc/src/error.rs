//! Error types for IOC operations.

use crate::ioc::IocState;
use odin_softioc_core::BridgeError;
use thiserror::Error;

/// Result type for IOC operations.
pub type IocResult<T> = Result<T, IocError>;

/// Errors that can occur in the record database.
#[derive(Debug, Error)]
pub enum IocError {
    /// A record with this name already exists.
    #[error("duplicate record: {0}")]
    DuplicateRecord(String),

    /// No record with this name exists.
    #[error("unknown record: {0}")]
    UnknownRecord(String),

    /// The operation is not allowed in the current lifecycle state.
    #[error("cannot {operation} while IOC is {state}")]
    InvalidState {
        /// The refused operation.
        operation: &'static str,
        /// The state the IOC was in.
        state: IocState,
    },

    /// A client tried to write an input record.
    #[error("record {0} is read-only")]
    ReadOnlyRecord(String),

    /// The value does not fit the record type.
    #[error("record {record}: {message}")]
    TypeMismatch {
        /// Record name.
        record: String,
        /// What was wrong.
        message: String,
    },

    /// The record lock could not be taken before the deadline.
    #[error("timed out writing record {0}")]
    Timeout(String),

    /// The record's update callback refused the value.
    #[error("record {record} rejected update: {source}")]
    UpdateRejected {
        /// Record name.
        record: String,
        /// The callback's error.
        #[source]
        source: BridgeError,
    },
}

impl IocError {
    /// Returns true if the error was caused by the value or record the client chose.
    pub fn is_client_error(&self) -> bool {
        match self {
            IocError::UnknownRecord(_)
            | IocError::ReadOnlyRecord(_)
            | IocError::TypeMismatch { .. } => true,
            IocError::UpdateRejected { source, .. } => source.is_client_error(),
            _ => false,
        }
    }
}
