//! PV mapper.
//!
//! Derives one process-variable binding per parameter node. Names are
//! `PREFIX:RECORD`, where the record part is either the node's explicit
//! override or its dotted name upper-cased with `.` → `:` and `_` → `-`:
//!
//! | node              | record              |
//! |-------------------|---------------------|
//! | `temp.setpoint`   | `TEMP:SETPOINT`     |
//! | `task_count`      | `TASK-COUNT`        |
//!
//! The derivation folds case, so `Temp` and `temp` collide; collisions are
//! fatal rather than silently merged.

use crate::error::{BridgeError, BridgeResult};
use crate::node::NodeDescriptor;
use crate::value::ParamType;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Longest PV name the IOC accepts.
pub const MAX_PV_NAME_LEN: usize = 60;

/// Separator between device prefix and record name.
pub const PREFIX_DELIMITER: char = ':';

/// How the IOC learns about new values for a PV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanPolicy {
    /// The bridge samples the value on a fixed interval.
    Polled,
    /// The value is pushed whenever it changes.
    Interrupt,
}

impl fmt::Display for ScanPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanPolicy::Polled => f.write_str("polled"),
            ScanPolicy::Interrupt => f.write_str("I/O Intr"),
        }
    }
}

/// EPICS record type used for a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RecordKind {
    /// `longin`
    LongIn,
    /// `longout`
    LongOut,
    /// `ai`
    AnalogIn,
    /// `ao`
    AnalogOut,
    /// `bi`
    BinaryIn,
    /// `bo`
    BinaryOut,
    /// `lsi`
    LongStringIn,
    /// `lso`
    LongStringOut,
    /// `mbbi`
    MultiBitIn,
    /// `mbbo`
    MultiBitOut,
}

impl RecordKind {
    /// Picks the record type for a parameter. Writeable parameters get output records.
    pub fn for_param(param_type: ParamType, writeable: bool) -> Self {
        match (param_type, writeable) {
            (ParamType::Int, false) => RecordKind::LongIn,
            (ParamType::Int, true) => RecordKind::LongOut,
            (ParamType::Float, false) => RecordKind::AnalogIn,
            (ParamType::Float, true) => RecordKind::AnalogOut,
            (ParamType::Bool, false) => RecordKind::BinaryIn,
            (ParamType::Bool, true) => RecordKind::BinaryOut,
            (ParamType::Str, false) => RecordKind::LongStringIn,
            (ParamType::Str, true) => RecordKind::LongStringOut,
            (ParamType::Enum, false) => RecordKind::MultiBitIn,
            (ParamType::Enum, true) => RecordKind::MultiBitOut,
        }
    }

    /// Returns true for record types IOC clients may write.
    pub fn is_output(&self) -> bool {
        matches!(
            self,
            RecordKind::LongOut
                | RecordKind::AnalogOut
                | RecordKind::BinaryOut
                | RecordKind::LongStringOut
                | RecordKind::MultiBitOut
        )
    }

    /// Returns the value type the record carries.
    pub fn param_type(&self) -> ParamType {
        match self {
            RecordKind::LongIn | RecordKind::LongOut => ParamType::Int,
            RecordKind::AnalogIn | RecordKind::AnalogOut => ParamType::Float,
            RecordKind::BinaryIn | RecordKind::BinaryOut => ParamType::Bool,
            RecordKind::LongStringIn | RecordKind::LongStringOut => ParamType::Str,
            RecordKind::MultiBitIn | RecordKind::MultiBitOut => ParamType::Enum,
        }
    }

    /// Returns the EPICS record type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::LongIn => "longin",
            RecordKind::LongOut => "longout",
            RecordKind::AnalogIn => "ai",
            RecordKind::AnalogOut => "ao",
            RecordKind::BinaryIn => "bi",
            RecordKind::BinaryOut => "bo",
            RecordKind::LongStringIn => "lsi",
            RecordKind::LongStringOut => "lso",
            RecordKind::MultiBitIn => "mbbi",
            RecordKind::MultiBitOut => "mbbo",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The binding between one parameter node and one PV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PvBinding {
    /// Dotted node name.
    pub node: String,
    /// Full PV name, including the device prefix.
    pub pv_name: String,
    /// Record type.
    pub kind: RecordKind,
    /// Scan policy.
    pub scan: ScanPolicy,
}

/// Maps node descriptors to PV bindings.
#[derive(Debug, Clone)]
pub struct PvMapper {
    prefix: String,
}

impl PvMapper {
    /// Creates a mapper for the given device prefix. An empty prefix yields bare record names.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Returns the device prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the record part of the PV name for a node.
    pub fn record_name(descriptor: &NodeDescriptor) -> String {
        match &descriptor.pv_override {
            Some(record) => record.clone(),
            None => descriptor
                .name
                .chars()
                .map(|c| match c {
                    '.' => PREFIX_DELIMITER,
                    '_' => '-',
                    c => c.to_ascii_uppercase(),
                })
                .collect(),
        }
    }

    /// Returns the full PV name for a node.
    pub fn pv_name(&self, descriptor: &NodeDescriptor) -> String {
        let record = Self::record_name(descriptor);
        if self.prefix.is_empty() {
            record
        } else {
            format!("{}{}{}", self.prefix, PREFIX_DELIMITER, record)
        }
    }

    /// Maps a single descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Traversal`] if the PV name is not a legal record name.
    pub fn map(&self, descriptor: &NodeDescriptor) -> BridgeResult<PvBinding> {
        let pv_name = self.pv_name(descriptor);
        check_pv_name(&descriptor.name, &pv_name)?;

        Ok(PvBinding {
            node: descriptor.name.clone(),
            pv_name,
            kind: RecordKind::for_param(descriptor.param_type, !descriptor.read_only),
            scan: if descriptor.external {
                ScanPolicy::Polled
            } else {
                ScanPolicy::Interrupt
            },
        })
    }

    /// Maps every descriptor, in order.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NameCollision`] if two descriptors map to the
    /// same PV name, or [`BridgeError::Traversal`] for an illegal name.
    pub fn map_all(&self, descriptors: &[NodeDescriptor]) -> BridgeResult<Vec<PvBinding>> {
        let mut claimed: HashMap<String, String> = HashMap::with_capacity(descriptors.len());
        let mut bindings = Vec::with_capacity(descriptors.len());

        for descriptor in descriptors {
            let binding = self.map(descriptor)?;
            if let Some(first) = claimed.get(&binding.pv_name) {
                return Err(BridgeError::NameCollision {
                    pv: binding.pv_name,
                    first: first.clone(),
                    second: descriptor.name.clone(),
                });
            }
            claimed.insert(binding.pv_name.clone(), descriptor.name.clone());
            tracing::debug!(
                node = %binding.node,
                pv = %binding.pv_name,
                kind = %binding.kind,
                scan = %binding.scan,
                "mapped parameter"
            );
            bindings.push(binding);
        }
        Ok(bindings)
    }
}

fn check_pv_name(node: &str, pv_name: &str) -> BridgeResult<()> {
    if pv_name.is_empty() || pv_name.len() > MAX_PV_NAME_LEN {
        return Err(BridgeError::traversal(
            node,
            format!(
                "PV name '{pv_name}' must be 1 to {MAX_PV_NAME_LEN} characters"
            ),
        ));
    }
    if let Some(bad) = pv_name.chars().find(|c| !is_record_char(*c)) {
        return Err(BridgeError::traversal(
            node,
            format!("PV name '{pv_name}' contains illegal character {bad:?}"),
        ));
    }
    Ok(())
}

fn is_record_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':' | '[' | ']' | '<' | '>' | ';')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ParamValue;
    use proptest::prelude::*;

    fn desc(name: &str, value: impl Into<ParamValue>, read_only: bool) -> NodeDescriptor {
        NodeDescriptor::new(name, value.into(), read_only)
    }

    #[test]
    fn derived_names() {
        let mapper = PvMapper::new("TEST");
        assert_eq!(
            mapper.pv_name(&desc("temp.setpoint", 0.0, false)),
            "TEST:TEMP:SETPOINT"
        );
        assert_eq!(mapper.pv_name(&desc("task_count", 0, false)), "TEST:TASK-COUNT");
        assert_eq!(
            PvMapper::new("").pv_name(&desc("status.enabled", true, false)),
            "STATUS:ENABLED"
        );
    }

    #[test]
    fn override_wins() {
        let mapper = PvMapper::new("DEV");
        let d = desc("task_count", 0, false).with_pv_override("BG-TASK-COUNT");
        assert_eq!(mapper.pv_name(&d), "DEV:BG-TASK-COUNT");
    }

    #[test]
    fn record_kind_and_scan() {
        let mapper = PvMapper::new("DEV");
        let rw = mapper.map(&desc("temp.setpoint", 1.0, false)).unwrap();
        assert_eq!(rw.kind, RecordKind::AnalogOut);
        assert_eq!(rw.scan, ScanPolicy::Interrupt);
        assert!(rw.kind.is_output());

        let ro = mapper
            .map(&desc("uptime", 1.0, true).with_external(true))
            .unwrap();
        assert_eq!(ro.kind, RecordKind::AnalogIn);
        assert_eq!(ro.scan, ScanPolicy::Polled);
        assert!(!ro.kind.is_output());

        assert_eq!(RecordKind::for_param(ParamType::Str, true).as_str(), "lso");
        assert_eq!(RecordKind::MultiBitIn.param_type(), ParamType::Enum);
    }

    #[test]
    fn example_tree_has_no_collisions() {
        let mapper = PvMapper::new("TEST");
        let nodes = vec![
            desc("temp.setpoint", 20.0, false),
            desc("temp.readback", 19.0, true),
            desc("status.enabled", true, false),
        ];
        let bindings = mapper.map_all(&nodes).unwrap();
        assert_eq!(bindings.len(), 3);
        assert_eq!(bindings[1].pv_name, "TEST:TEMP:READBACK");
    }

    #[test]
    fn case_folding_collision_is_fatal() {
        let mapper = PvMapper::new("TEST");
        let nodes = vec![desc("temp", 1, false), desc("Temp", 2, false)];
        let err = mapper.map_all(&nodes).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::NameCollision { ref first, ref second, .. }
                if first == "temp" && second == "Temp"
        ));
    }

    #[test]
    fn override_collision_is_fatal() {
        let mapper = PvMapper::new("TEST");
        let nodes = vec![
            desc("task_count", 1, false),
            desc("counter", 2, false).with_pv_override("TASK-COUNT"),
        ];
        assert!(matches!(
            mapper.map_all(&nodes),
            Err(BridgeError::NameCollision { .. })
        ));
    }

    #[test]
    fn illegal_names_are_rejected() {
        let mapper = PvMapper::new("TEST");
        let d = desc("x", 1, false).with_pv_override("HAS SPACE");
        assert!(matches!(mapper.map(&d), Err(BridgeError::Traversal { .. })));

        let long = "a".repeat(MAX_PV_NAME_LEN);
        assert!(matches!(
            mapper.map(&desc(&long, 1, false)),
            Err(BridgeError::Traversal { .. })
        ));
    }

    proptest! {
        #[test]
        fn mapping_is_deterministic(name in "[a-z][a-z0-9_]{0,10}(\\.[a-z][a-z0-9_]{0,10}){0,3}") {
            let mapper = PvMapper::new("P");
            let d = desc(&name, 0, false);
            prop_assert_eq!(mapper.pv_name(&d), mapper.pv_name(&d));
        }

        #[test]
        fn distinct_lowercase_names_never_collide(
            names in proptest::collection::hash_set("[a-z][a-z0-9]{0,6}(\\.[a-z][a-z0-9]{0,6}){0,2}", 1..20)
        ) {
            let mapper = PvMapper::new("P");
            let nodes: Vec<NodeDescriptor> = names.iter().map(|n| desc(n, 0, false)).collect();
            let bindings = mapper.map_all(&nodes).unwrap();
            prop_assert_eq!(bindings.len(), nodes.len());
        }
    }
}
