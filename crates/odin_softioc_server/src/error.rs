//! Error types for the bridge service and adapter.

use odin_softioc_core::BridgeError;
use odin_softioc_ioc::IocError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the bridge service, controller or adapter.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Error from the parameter tree or sync engine.
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// Error from the soft IOC.
    #[error("IOC error: {0}")]
    Ioc(#[from] IocError),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The tree is already bridged to an IOC.
    #[error("parameter tree is already bridged")]
    AlreadyBridged,

    /// The controller was already initialized.
    #[error("controller is already initialized")]
    AlreadyInitialized,

    /// An async runtime was needed but none is running.
    #[error("no async runtime available")]
    NoRuntime,

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        match self {
            ServerError::Bridge(err) => err.is_client_error(),
            ServerError::Ioc(err) => err.is_client_error(),
            ServerError::Json(_) => true,
            _ => false,
        }
    }

    /// Returns true if the error happened while building the bridge and
    /// means the bridge never started.
    pub fn is_startup_error(&self) -> bool {
        match self {
            ServerError::Bridge(err) => err.is_fatal_at_startup(),
            ServerError::Ioc(_) | ServerError::Config(_) | ServerError::AlreadyBridged => true,
            _ => false,
        }
    }
}
