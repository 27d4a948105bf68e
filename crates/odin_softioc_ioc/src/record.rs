//! Record definitions.

use odin_softioc_core::{
    BridgeResult, NodeDescriptor, ParamValue, PvBinding, RecordKind, ScanPolicy,
};
use std::fmt;
use std::sync::Arc;

/// Called when an IOC client writes a record.
///
/// The record only takes the value if the callback returns `Ok`.
pub type UpdateCallback = Arc<dyn Fn(ParamValue) -> BridgeResult<()> + Send + Sync>;

/// Everything needed to create a record.
#[derive(Clone)]
pub struct RecordSpec {
    /// Full PV name.
    pub name: String,
    /// Record type.
    pub kind: RecordKind,
    /// Scan policy.
    pub scan: ScanPolicy,
    /// Value the record starts with.
    pub initial: ParamValue,
    /// State labels for multi-bit records.
    pub choices: Vec<String>,
    /// Record description field.
    pub description: Option<String>,
    on_update: Option<UpdateCallback>,
}

impl RecordSpec {
    /// Creates a spec with no update callback.
    pub fn new(name: impl Into<String>, kind: RecordKind, initial: ParamValue) -> Self {
        Self {
            name: name.into(),
            kind,
            scan: ScanPolicy::Interrupt,
            initial,
            choices: Vec::new(),
            description: None,
            on_update: None,
        }
    }

    /// Creates the spec for a mapped parameter node.
    pub fn from_binding(binding: &PvBinding, descriptor: &NodeDescriptor) -> Self {
        Self {
            name: binding.pv_name.clone(),
            kind: binding.kind,
            scan: binding.scan,
            initial: descriptor.initial_value.clone(),
            choices: descriptor.choices.clone(),
            description: descriptor.description.clone(),
            on_update: None,
        }
    }

    /// Sets the state labels.
    pub fn with_choices<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.choices = choices.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the callback run when a client writes the record.
    pub fn on_update<F>(mut self, callback: F) -> Self
    where
        F: Fn(ParamValue) -> BridgeResult<()> + Send + Sync + 'static,
    {
        self.on_update = Some(Arc::new(callback));
        self
    }

    pub(crate) fn update_callback(&self) -> Option<UpdateCallback> {
        self.on_update.clone()
    }
}

impl fmt::Debug for RecordSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("scan", &self.scan)
            .field("initial", &self.initial)
            .field("choices", &self.choices)
            .field("on_update", &self.on_update.is_some())
            .finish()
    }
}
