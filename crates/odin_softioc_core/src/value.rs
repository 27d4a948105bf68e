//! Tagged parameter values.
//!
//! Every value flowing through the bridge is one of five scalar kinds. The
//! kind is fixed per node when the tree is walked, so type checks on both
//! write paths reduce to comparing tags.

use crate::error::{BridgeError, BridgeResult};
use serde::Serialize;
use std::fmt;

/// The type tag of a parameter node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    /// Signed 64-bit integer.
    Int,
    /// Double-precision float.
    Float,
    /// Boolean.
    Bool,
    /// UTF-8 string.
    Str,
    /// Index into a fixed list of labels.
    Enum,
}

impl ParamType {
    /// Returns the name reported in tree metadata.
    pub fn name(&self) -> &'static str {
        match self {
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::Bool => "bool",
            ParamType::Str => "str",
            ParamType::Enum => "enum",
        }
    }

    /// Returns the value a node of this type starts with when none is given.
    pub fn default_value(&self) -> ParamValue {
        match self {
            ParamType::Int => ParamValue::Int(0),
            ParamType::Float => ParamValue::Float(0.0),
            ParamType::Bool => ParamValue::Bool(false),
            ParamType::Str => ParamValue::Str(String::new()),
            ParamType::Enum => ParamValue::Enum(0),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A parameter value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f64),
    /// Boolean value.
    Bool(bool),
    /// String value.
    Str(String),
    /// Enumerated value (index into the node's choices).
    Enum(u16),
}

impl ParamValue {
    /// Returns the type tag of this value.
    pub fn param_type(&self) -> ParamType {
        match self {
            ParamValue::Int(_) => ParamType::Int,
            ParamValue::Float(_) => ParamType::Float,
            ParamValue::Bool(_) => ParamType::Bool,
            ParamValue::Str(_) => ParamType::Str,
            ParamValue::Enum(_) => ParamType::Enum,
        }
    }

    /// Renders the value as a JSON scalar.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ParamValue::Int(v) => serde_json::Value::from(*v),
            ParamValue::Float(v) => serde_json::Value::from(*v),
            ParamValue::Bool(v) => serde_json::Value::from(*v),
            ParamValue::Str(v) => serde_json::Value::from(v.as_str()),
            ParamValue::Enum(v) => serde_json::Value::from(*v),
        }
    }

    /// Decodes a JSON scalar against an expected type.
    ///
    /// Integers are accepted for float nodes. Enumerated values are only
    /// accepted as indices here; label lookup needs the node's choices.
    pub fn from_json(json: &serde_json::Value, expected: ParamType) -> Option<Self> {
        match expected {
            ParamType::Int => json.as_i64().map(ParamValue::Int),
            ParamType::Float => json.as_f64().map(ParamValue::Float),
            ParamType::Bool => json.as_bool().map(ParamValue::Bool),
            ParamType::Str => json.as_str().map(|s| ParamValue::Str(s.to_string())),
            ParamType::Enum => json
                .as_u64()
                .and_then(|i| u16::try_from(i).ok())
                .map(ParamValue::Enum),
        }
    }

    /// Returns the integer value, if this is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as a float, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Returns the boolean value, if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string value, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Str(v) => write!(f, "{v:?}"),
            ParamValue::Enum(v) => write!(f, "#{v}"),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(i64::from(v))
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}

/// Checks a value against a node's type tag and enum choices.
///
/// Returns the value to store, which differs from the input only when an
/// integer is widened for a float node.
pub fn check_value(
    node: &str,
    expected: ParamType,
    choices: &[String],
    value: ParamValue,
) -> BridgeResult<ParamValue> {
    match (expected, value) {
        (ParamType::Float, ParamValue::Int(v)) => Ok(ParamValue::Float(v as f64)),
        (ParamType::Enum, ParamValue::Enum(index)) => {
            if usize::from(index) < choices.len() {
                Ok(ParamValue::Enum(index))
            } else {
                Err(BridgeError::validation(
                    node,
                    format!(
                        "enum index {index} out of range ({} choices)",
                        choices.len()
                    ),
                ))
            }
        }
        (expected, value) if value.param_type() == expected => Ok(value),
        (expected, value) => Err(BridgeError::validation(
            node,
            format!(
                "type mismatch: expected {expected}, got {}",
                value.param_type()
            ),
        )),
    }
}
