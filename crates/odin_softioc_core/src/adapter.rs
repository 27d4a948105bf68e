//! Parameter tree adapter.
//!
//! Flattens a [`ParameterTree`] into an ordered list of [`NodeDescriptor`]s,
//! one per leaf, depth-first in tree order. Anything the PV layer could not
//! represent is rejected here so the bridge never starts half-mapped.

use crate::error::{BridgeError, BridgeResult};
use crate::node::NodeDescriptor;
use crate::tree::{Branch, Parameter, ParameterTree, TreeNode};
use crate::value::ParamType;

/// Walks the tree and returns a descriptor for every leaf.
///
/// External getters are sampled once to obtain the initial value.
///
/// # Errors
///
/// Returns [`BridgeError::Traversal`] if a leaf is unsupported, a path
/// element is malformed, or a leaf's value disagrees with its declared type.
pub fn walk(tree: &ParameterTree) -> BridgeResult<Vec<NodeDescriptor>> {
    let mut out = Vec::new();
    walk_branch(tree.root(), "", &mut out)?;
    tracing::debug!(nodes = out.len(), "walked parameter tree");
    Ok(out)
}

fn walk_branch(branch: &Branch, prefix: &str, out: &mut Vec<NodeDescriptor>) -> BridgeResult<()> {
    for (name, node) in branch.children() {
        let path = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}.{name}")
        };
        check_name(&path, name)?;

        match node {
            TreeNode::Branch(child) => walk_branch(child, &path, out)?,
            TreeNode::Leaf(param) => out.push(describe(path, param)?),
            TreeNode::Unsupported(_) => {
                return Err(BridgeError::traversal(
                    path,
                    format!("unsupported parameter type '{}'", node.kind()),
                ));
            }
        }
    }
    Ok(())
}

fn check_name(path: &str, name: &str) -> BridgeResult<()> {
    if name.is_empty() {
        return Err(BridgeError::traversal(path, "empty path element"));
    }
    if name
        .chars()
        .any(|c| c == '.' || c == '/' || c.is_whitespace())
    {
        return Err(BridgeError::traversal(
            path,
            format!("path element '{name}' contains a separator or whitespace"),
        ));
    }
    Ok(())
}

fn describe(path: String, param: &Parameter) -> BridgeResult<NodeDescriptor> {
    let initial = param.local_value();
    if param.param_type() == ParamType::Enum && param.choices().is_empty() {
        return Err(BridgeError::traversal(path, "enumerated parameter has no choices"));
    }
    let initial = param
        .check(&path, initial)
        .map_err(|e| BridgeError::traversal(path.clone(), e.to_string()))?;

    Ok(NodeDescriptor {
        param_type: param.param_type(),
        read_only: !param.is_writeable(),
        initial_value: initial,
        external: param.is_external(),
        pv_override: param.pv_name().map(str::to_string),
        choices: param.choices().to_vec(),
        description: param.description().map(str::to_string),
        name: path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ParamValue;
    use serde_json::json;

    #[test]
    fn walk_produces_ordered_descriptors() {
        let tree = ParameterTree::new(
            Branch::new()
                .branch(
                    "temp",
                    Branch::new()
                        .param("setpoint", Parameter::value(20.0).writeable())
                        .param("readback", Parameter::value(19.5)),
                )
                .branch(
                    "status",
                    Branch::new().param("enabled", Parameter::value(true).writeable()),
                ),
        );

        let nodes = walk(&tree).unwrap();
        let names: Vec<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["temp.setpoint", "temp.readback", "status.enabled"]);

        assert!(!nodes[0].read_only);
        assert!(nodes[1].read_only);
        assert_eq!(nodes[1].param_type, ParamType::Float);
        assert_eq!(nodes[2].initial_value, ParamValue::Bool(true));
    }

    #[test]
    fn external_and_override_are_carried() {
        let tree = ParameterTree::new(
            Branch::new().param(
                "uptime",
                Parameter::external(ParamType::Float, || ParamValue::Float(1.5))
                    .with_pv_name("UPTIME"),
            ),
        );
        let nodes = walk(&tree).unwrap();
        assert!(nodes[0].external);
        assert_eq!(nodes[0].pv_override.as_deref(), Some("UPTIME"));
        assert_eq!(nodes[0].initial_value, ParamValue::Float(1.5));
    }

    #[test]
    fn unsupported_leaf_fails_traversal() {
        let tree = ParameterTree::from_json(&json!({"ok": 1, "list": [1, 2]})).unwrap();
        let err = walk(&tree).unwrap_err();
        assert!(matches!(err, BridgeError::Traversal { ref path, .. } if path == "list"));
        assert!(err.to_string().contains("array"));
    }

    #[test]
    fn malformed_names_fail_traversal() {
        let tree = ParameterTree::new(Branch::new().constant("bad.name", 1));
        assert!(matches!(walk(&tree), Err(BridgeError::Traversal { .. })));

        let tree = ParameterTree::new(Branch::new().constant("", 1));
        assert!(matches!(walk(&tree), Err(BridgeError::Traversal { .. })));
    }

    #[test]
    fn getter_type_mismatch_fails_traversal() {
        let tree = ParameterTree::new(Branch::new().param(
            "count",
            Parameter::external(ParamType::Int, || ParamValue::Str("oops".into())),
        ));
        assert!(matches!(walk(&tree), Err(BridgeError::Traversal { .. })));
    }

    #[test]
    fn enum_without_choices_fails_traversal() {
        let tree = ParameterTree::new(Branch::new().param("mode", Parameter::typed(ParamType::Enum)));
        assert!(matches!(walk(&tree), Err(BridgeError::Traversal { .. })));

        let tree = ParameterTree::new(Branch::new().param(
            "mode",
            Parameter::typed(ParamType::Enum).with_choices(["IDLE", "RUN"]),
        ));
        let nodes = walk(&tree).unwrap();
        assert_eq!(nodes[0].choices, ["IDLE", "RUN"]);
    }
}
