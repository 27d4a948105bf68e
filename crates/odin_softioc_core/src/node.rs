//! Parameter node types shared by the adapter, mapper and engine.

use crate::error::BridgeResult;
use crate::value::{check_value, ParamType, ParamValue};
use serde::Serialize;
use std::fmt;
use std::time::SystemTime;

/// Which side of the bridge produced a node's current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Written through the control framework.
    Control,
    /// Written through the soft IOC.
    Device,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Control => f.write_str("control"),
            Origin::Device => f.write_str("device"),
        }
    }
}

/// A parameter node as discovered by walking the control tree.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDescriptor {
    /// Fully-qualified dotted name.
    pub name: String,
    /// Type tag, fixed for the life of the node.
    pub param_type: ParamType,
    /// Whether control-side clients are refused writes.
    pub read_only: bool,
    /// Value at the time the tree was walked.
    pub initial_value: ParamValue,
    /// Whether the value is produced by a getter the bridge must poll.
    pub external: bool,
    /// Explicit PV record name, if the tree declared one.
    pub pv_override: Option<String>,
    /// Labels for enumerated nodes.
    pub choices: Vec<String>,
    /// Free-text description.
    pub description: Option<String>,
}

impl NodeDescriptor {
    /// Creates a descriptor for an internal node.
    pub fn new(name: impl Into<String>, initial_value: ParamValue, read_only: bool) -> Self {
        Self {
            name: name.into(),
            param_type: initial_value.param_type(),
            read_only,
            initial_value,
            external: false,
            pv_override: None,
            choices: Vec::new(),
            description: None,
        }
    }

    /// Marks the node as produced by an external getter.
    pub fn with_external(mut self, external: bool) -> Self {
        self.external = external;
        self
    }

    /// Sets an explicit PV record name.
    pub fn with_pv_override(mut self, record: impl Into<String>) -> Self {
        self.pv_override = Some(record.into());
        self
    }

    /// Sets the labels of an enumerated node.
    pub fn with_choices(mut self, choices: Vec<String>) -> Self {
        self.choices = choices;
        self
    }

    /// Checks a value against this node's type.
    pub fn check(&self, value: ParamValue) -> BridgeResult<ParamValue> {
        check_value(&self.name, self.param_type, &self.choices, value)
    }
}

/// The state of a node as returned by a read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSnapshot {
    /// Dotted node name.
    pub name: String,
    /// Current value.
    pub value: ParamValue,
    /// Side that produced the current value.
    pub origin: Origin,
    /// When the current value was stored.
    #[serde(skip)]
    pub updated_at: SystemTime,
}

/// A change applied by the sync engine.
///
/// Events are not persisted; they exist so observers can follow the flow of
/// values between the two sides.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncEvent {
    /// Dotted node name.
    pub node: String,
    /// The value that was stored.
    pub value: ParamValue,
    /// Which side wrote it.
    pub origin: Origin,
    /// When it was stored.
    pub timestamp: SystemTime,
}
