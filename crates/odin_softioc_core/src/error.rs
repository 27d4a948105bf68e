//! Error types for the bridge core.

use std::fmt;
use thiserror::Error;

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// The side of the bridge a value was being delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationTarget {
    /// The control framework's parameter tree.
    Control,
    /// The soft IOC process-variable layer.
    Device,
}

impl fmt::Display for PropagationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropagationTarget::Control => f.write_str("control"),
            PropagationTarget::Device => f.write_str("device"),
        }
    }
}

/// Errors that can occur while building or running the bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The control tree has a shape the bridge cannot map.
    #[error("traversal error at '{path}': {message}")]
    Traversal {
        /// Dotted path of the offending node.
        path: String,
        /// Description of the problem.
        message: String,
    },

    /// Two parameter nodes map to the same process variable.
    #[error("PV name collision: {pv} is claimed by both '{first}' and '{second}'")]
    NameCollision {
        /// The contested PV name.
        pv: String,
        /// Node that claimed the name first.
        first: String,
        /// Node that claimed the name second.
        second: String,
    },

    /// A write carried a bad value or targeted a read-only node.
    #[error("validation error for '{node}': {message}")]
    Validation {
        /// Node the write was aimed at.
        node: String,
        /// Why the write was refused.
        message: String,
    },

    /// The opposite layer did not accept a pushed value.
    #[error("failed to propagate '{node}' to {target}: {message}")]
    Propagation {
        /// Node whose value was being pushed.
        node: String,
        /// Which side refused it.
        target: PropagationTarget,
        /// Error reported by that side.
        message: String,
    },

    /// A write arrived after shutdown began.
    #[error("bridge is shutting down")]
    ShuttingDown,

    /// A request path does not exist in the tree.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// No parameter node has this name.
    #[error("unknown parameter node: {0}")]
    UnknownNode(String),

    /// No binding has this PV name.
    #[error("unknown process variable: {0}")]
    UnknownPv(String),
}

impl BridgeError {
    /// Creates a traversal error.
    pub fn traversal(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Traversal {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Creates a propagation error.
    pub fn propagation(
        node: impl Into<String>,
        target: PropagationTarget,
        message: impl Into<String>,
    ) -> Self {
        Self::Propagation {
            node: node.into(),
            target,
            message: message.into(),
        }
    }

    /// Returns true if this error must abort bridge startup.
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(
            self,
            BridgeError::Traversal { .. } | BridgeError::NameCollision { .. }
        )
    }

    /// Returns true if the caller sent a bad request (as opposed to a bridge fault).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BridgeError::Validation { .. }
                | BridgeError::InvalidPath(_)
                | BridgeError::UnknownNode(_)
                | BridgeError::UnknownPv(_)
        )
    }
}
