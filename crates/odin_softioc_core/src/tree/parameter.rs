//! Tree leaves and their accessors.

use crate::error::{BridgeError, BridgeResult};
use crate::value::{check_value, ParamType, ParamValue};
use parking_lot::{Mutex, MutexGuard};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Produces the current value of an external parameter.
pub type Getter = Arc<dyn Fn() -> ParamValue + Send + Sync>;

/// Receives values written to a parameter.
pub type Setter = Arc<dyn Fn(&ParamValue) + Send + Sync>;

/// Checks a value beyond its type. `Err` carries the reason it was refused.
pub type Validator = Arc<dyn Fn(&ParamValue) -> Result<(), String> + Send + Sync>;

enum Source {
    /// Value held by the tree itself.
    Internal(Mutex<ParamValue>),
    /// Value produced on demand by the application.
    External(Getter),
}

/// A leaf of the parameter tree.
///
/// Parameters are read-only unless [`Parameter::writeable`] is called.
/// Read-only only restricts clients: the application can still update the
/// value through [`super::ParameterTree::update`].
///
/// Every write (store and setter call) happens under the parameter's write
/// lock, so the setter sees values in the order they were accepted.
pub struct Parameter {
    param_type: ParamType,
    source: Source,
    write_lock: Mutex<()>,
    setter: Option<Setter>,
    validator: Option<Validator>,
    writeable: bool,
    pv_name: Option<String>,
    choices: Vec<String>,
    description: Option<String>,
}

impl Parameter {
    /// Creates an internal parameter holding `initial`. The type is taken from the value.
    pub fn value(initial: impl Into<ParamValue>) -> Self {
        let initial = initial.into();
        Self::with_source(initial.param_type(), Source::Internal(Mutex::new(initial)))
    }

    /// Creates an internal parameter holding the default value of `param_type`.
    pub fn typed(param_type: ParamType) -> Self {
        Self::with_source(
            param_type,
            Source::Internal(Mutex::new(param_type.default_value())),
        )
    }

    /// Creates a parameter whose value is produced by `getter`.
    pub fn external<F>(param_type: ParamType, getter: F) -> Self
    where
        F: Fn() -> ParamValue + Send + Sync + 'static,
    {
        Self::with_source(param_type, Source::External(Arc::new(getter)))
    }

    fn with_source(param_type: ParamType, source: Source) -> Self {
        Self {
            param_type,
            source,
            write_lock: Mutex::new(()),
            setter: None,
            validator: None,
            writeable: false,
            pv_name: None,
            choices: Vec::new(),
            description: None,
        }
    }

    /// Allows clients to write this parameter.
    pub fn writeable(mut self) -> Self {
        self.writeable = true;
        self
    }

    /// Binds the parameter to an explicit PV record name.
    pub fn with_pv_name(mut self, record: impl Into<String>) -> Self {
        self.pv_name = Some(record.into());
        self
    }

    /// Sets the labels of an enumerated parameter.
    pub fn with_choices<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.choices = choices.into_iter().map(Into::into).collect();
        self
    }

    /// Sets a description reported in metadata.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Registers a callback run whenever a new value is stored.
    pub fn on_set<F>(mut self, setter: F) -> Self
    where
        F: Fn(&ParamValue) + Send + Sync + 'static,
    {
        self.setter = Some(Arc::new(setter));
        self
    }

    /// Registers a check every written value must pass, from clients, the
    /// application and the device side alike.
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&ParamValue) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Returns the type tag.
    pub fn param_type(&self) -> ParamType {
        self.param_type
    }

    /// Returns true if clients may write this parameter.
    pub fn is_writeable(&self) -> bool {
        self.writeable
    }

    /// Returns true if the value comes from a getter.
    pub fn is_external(&self) -> bool {
        matches!(self.source, Source::External(_))
    }

    /// Returns the explicit PV record name, if any.
    pub fn pv_name(&self) -> Option<&str> {
        self.pv_name.as_deref()
    }

    /// Returns the enum labels.
    pub fn choices(&self) -> &[String] {
        &self.choices
    }

    /// Returns the description, if any.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Calls the getter of an external parameter.
    pub fn sample(&self) -> Option<ParamValue> {
        match &self.source {
            Source::External(getter) => Some(getter()),
            Source::Internal(_) => None,
        }
    }

    /// Returns the value held locally, or the getter's value.
    pub(crate) fn local_value(&self) -> ParamValue {
        match &self.source {
            Source::Internal(cell) => cell.lock().clone(),
            Source::External(getter) => getter(),
        }
    }

    /// Stores a value and runs the setter.
    pub(crate) fn store(&self, value: &ParamValue) {
        let _guard = self.write_lock.lock();
        self.apply(value);
    }

    /// Runs `forward` and then stores the value, holding the write lock
    /// throughout. Nothing is stored if `forward` fails.
    pub(crate) fn store_with<F>(&self, value: &ParamValue, forward: F) -> BridgeResult<()>
    where
        F: FnOnce() -> BridgeResult<()>,
    {
        let _guard = self.write_lock.lock();
        forward()?;
        self.apply(value);
        Ok(())
    }

    /// Holds the write lock. Used for read-modify-write updates.
    pub(crate) fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock()
    }

    /// Like [`Parameter::store`], but gives up if the write lock stays
    /// held past `deadline`. Returns false on timeout.
    pub(crate) fn store_until(&self, value: &ParamValue, deadline: Instant) -> bool {
        match self.write_lock.try_lock_until(deadline) {
            Some(_guard) => {
                self.apply(value);
                true
            }
            None => false,
        }
    }

    /// Stores without taking the write lock; the caller holds it.
    pub(crate) fn apply(&self, value: &ParamValue) {
        if let Source::Internal(cell) = &self.source {
            *cell.lock() = value.clone();
        }
        self.run_setter(value);
    }

    fn run_setter(&self, value: &ParamValue) {
        if let Some(setter) = &self.setter {
            setter(value);
        }
    }

    /// Checks a typed value against this parameter.
    pub fn check(&self, node: &str, value: ParamValue) -> BridgeResult<ParamValue> {
        let value = check_value(node, self.param_type, &self.choices, value)?;
        if let Some(validator) = &self.validator {
            validator(&value).map_err(|reason| BridgeError::validation(node, reason))?;
        }
        Ok(value)
    }

    /// Decodes a JSON request value for this parameter.
    ///
    /// Enumerated parameters accept either an index or one of their labels.
    pub fn decode(&self, node: &str, json: &Value) -> BridgeResult<ParamValue> {
        if self.param_type == ParamType::Enum {
            if let Some(label) = json.as_str() {
                return self
                    .choices
                    .iter()
                    .position(|c| c == label)
                    .and_then(|i| u16::try_from(i).ok())
                    .map(ParamValue::Enum)
                    .ok_or_else(|| {
                        BridgeError::validation(node, format!("'{label}' is not an allowed value"))
                    });
            }
        }

        let value = ParamValue::from_json(json, self.param_type).ok_or_else(|| {
            BridgeError::validation(
                node,
                format!("type mismatch: expected {}, got {json}", self.param_type),
            )
        })?;
        self.check(node, value)
    }

    /// Renders a value for a GET response. Enum values render as their label.
    pub(crate) fn render(&self, value: &ParamValue) -> Value {
        match value {
            ParamValue::Enum(index) => self
                .choices
                .get(usize::from(*index))
                .map(|label| Value::from(label.as_str()))
                .unwrap_or_else(|| value.to_json()),
            other => other.to_json(),
        }
    }

    /// Renders a value together with this parameter's metadata.
    pub(crate) fn render_with_metadata(&self, value: &ParamValue) -> Value {
        let mut meta = Map::new();
        meta.insert("value".into(), self.render(value));
        meta.insert("type".into(), json!(self.param_type.name()));
        meta.insert("writeable".into(), json!(self.writeable));
        if !self.choices.is_empty() {
            meta.insert("allowed_values".into(), json!(self.choices));
        }
        if let Some(description) = &self.description {
            meta.insert("description".into(), json!(description));
        }
        Value::Object(meta)
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("param_type", &self.param_type)
            .field("external", &self.is_external())
            .field("writeable", &self.writeable)
            .field("pv_name", &self.pv_name)
            .field("choices", &self.choices)
            .finish_non_exhaustive()
    }
}
