//! The control framework's parameter tree.
//!
//! This is the object model that odin-control style adapters expose over
//! their request API: an ordered tree of branches with typed [`Parameter`]
//! leaves. Request paths are `/`-separated (`"sub_tree/deeper/one"`); node
//! identities used by the rest of the bridge are dotted
//! (`"sub_tree.deeper.one"`).
//!
//! Once the bridge is started it installs a [`ControlHook`] on the tree.
//! From then on client writes are routed through the sync engine and reads
//! of internal leaves come from the engine's authoritative state.

mod parameter;

pub use parameter::{Getter, Parameter, Setter, Validator};

use crate::boundary::{ControlHook, ControlPush};
use crate::error::{BridgeError, BridgeResult, PropagationTarget};
use crate::value::ParamValue;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;

/// A node of the parameter tree.
#[derive(Debug)]
pub enum TreeNode {
    /// An ordered set of named children.
    Branch(Branch),
    /// A typed parameter.
    Leaf(Parameter),
    /// A value the tree can serve but the bridge cannot map (arrays, nulls).
    Unsupported(Value),
}

impl TreeNode {
    /// Returns a short name for the kind of node, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            TreeNode::Branch(_) => "branch",
            TreeNode::Leaf(_) => "parameter",
            TreeNode::Unsupported(raw) => unsupported_kind(raw),
        }
    }
}

/// An ordered branch of the tree. Children keep insertion order.
#[derive(Debug, Default)]
pub struct Branch {
    children: Vec<(String, TreeNode)>,
}

impl Branch {
    /// Creates an empty branch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter.
    pub fn param(self, name: impl Into<String>, param: Parameter) -> Self {
        self.node(name, TreeNode::Leaf(param))
    }

    /// Adds a read-only constant.
    pub fn constant(self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.node(name, TreeNode::Leaf(Parameter::value(value)))
    }

    /// Adds a sub-branch.
    pub fn branch(self, name: impl Into<String>, branch: Branch) -> Self {
        self.node(name, TreeNode::Branch(branch))
    }

    /// Adds any node, replacing an existing child of the same name in place.
    pub fn node(mut self, name: impl Into<String>, node: TreeNode) -> Self {
        let name = name.into();
        match self.children.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = node,
            None => self.children.push((name, node)),
        }
        self
    }

    /// Returns the child with the given name.
    pub fn get(&self, name: &str) -> Option<&TreeNode> {
        self.children
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, node)| node)
    }

    /// Iterates over children in insertion order.
    pub fn children(&self) -> impl Iterator<Item = (&str, &TreeNode)> {
        self.children.iter().map(|(n, node)| (n.as_str(), node))
    }

    /// Returns the number of direct children.
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Returns true if the branch has no children.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    fn from_json_object(object: &Map<String, Value>) -> Self {
        let mut branch = Branch::new();
        for (name, value) in object {
            let node = match value {
                Value::Object(inner) => TreeNode::Branch(Branch::from_json_object(inner)),
                Value::Bool(b) => TreeNode::Leaf(Parameter::value(*b)),
                Value::String(s) => TreeNode::Leaf(Parameter::value(s.as_str())),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => TreeNode::Leaf(Parameter::value(i)),
                    None => TreeNode::Leaf(Parameter::value(n.as_f64().unwrap_or(f64::NAN))),
                },
                other => TreeNode::Unsupported(other.clone()),
            };
            branch = branch.node(name.clone(), node);
        }
        branch
    }
}

/// A parameter tree with an optional bridge hook.
pub struct ParameterTree {
    root: Branch,
    hook: RwLock<Option<Arc<dyn ControlHook>>>,
}

impl ParameterTree {
    /// Creates a tree from its root branch.
    pub fn new(root: Branch) -> Self {
        Self {
            root,
            hook: RwLock::new(None),
        }
    }

    /// Builds a tree of read-only constants from a JSON object.
    pub fn from_json(json: &Value) -> BridgeResult<Self> {
        let object = json.as_object().ok_or_else(|| {
            BridgeError::traversal("", "tree root must be a JSON object")
        })?;
        Ok(Self::new(Branch::from_json_object(object)))
    }

    /// Returns the root branch.
    pub fn root(&self) -> &Branch {
        &self.root
    }

    /// Installs the bridge hook. Replaces any previous hook.
    pub fn install_hook(&self, hook: Arc<dyn ControlHook>) {
        *self.hook.write() = Some(hook);
    }

    /// Removes the bridge hook; the tree goes back to serving its own values.
    pub fn clear_hook(&self) {
        self.hook.write().take();
    }

    /// Returns true if a hook is installed.
    pub fn has_hook(&self) -> bool {
        self.hook.read().is_some()
    }

    fn hook(&self) -> Option<Arc<dyn ControlHook>> {
        self.hook.read().clone()
    }

    /// Looks up a leaf by dotted name.
    pub fn leaf(&self, node: &str) -> Option<&Parameter> {
        let mut current = &self.root;
        let mut parts = node.split('.').peekable();
        while let Some(part) = parts.next() {
            match current.get(part)? {
                TreeNode::Branch(branch) if parts.peek().is_some() => current = branch,
                TreeNode::Leaf(param) if parts.peek().is_none() => return Some(param),
                _ => return None,
            }
        }
        None
    }

    /// Returns the value of a leaf by dotted name.
    pub fn value(&self, node: &str) -> BridgeResult<ParamValue> {
        let param = self
            .leaf(node)
            .ok_or_else(|| BridgeError::UnknownNode(node.to_string()))?;
        Ok(self.read_leaf(node, param))
    }

    /// Calls the getter of an external leaf. Returns `None` for internal leaves.
    pub fn sample(&self, node: &str) -> Option<ParamValue> {
        self.leaf(node).and_then(Parameter::sample)
    }

    /// Reads the subtree at `path`.
    ///
    /// The root path returns the whole tree; any other path returns an object
    /// keyed by its last element.
    pub fn get(&self, path: &str, with_metadata: bool) -> BridgeResult<Value> {
        let segments = split_path(path);
        let node = self.resolve(path, &segments)?;
        let dotted = segments.join(".");
        let rendered = self.render(&dotted, node, with_metadata);

        match segments.last() {
            None => Ok(rendered),
            Some(last) => {
                let mut wrapper = Map::new();
                wrapper.insert((*last).to_string(), rendered);
                Ok(Value::Object(wrapper))
            }
        }
    }

    /// Writes client data at `path`.
    ///
    /// A leaf path takes a scalar; a branch path takes an object whose keys
    /// name existing children. Every targeted leaf is validated before any of
    /// them is written.
    pub fn set(&self, path: &str, data: &Value) -> BridgeResult<()> {
        let segments = split_path(path);
        let node = self.resolve(path, &segments)?;

        let mut writes = Vec::new();
        collect_writes(segments.join("/"), node, data, &mut writes)?;

        for (name, param, value) in writes {
            match self.hook() {
                Some(hook) => param.store_with(&value, || hook.write(&name, value.clone()))?,
                None => param.store(&value),
            }
        }
        Ok(())
    }

    /// Updates a leaf on behalf of the application.
    ///
    /// Unlike [`ParameterTree::set`], this is allowed on read-only leaves.
    pub fn update(&self, node: &str, value: impl Into<ParamValue>) -> BridgeResult<()> {
        let param = self
            .leaf(node)
            .ok_or_else(|| BridgeError::UnknownNode(node.to_string()))?;
        let value = param.check(node, value.into())?;

        match self.hook() {
            Some(hook) => param.store_with(&value, || hook.refresh(node, value.clone())),
            None => {
                param.store(&value);
                Ok(())
            }
        }
    }

    /// Replaces a leaf's value with `f(current)`, holding the leaf's write
    /// lock across the read and the write so no other write lands between.
    pub fn update_with<F>(&self, node: &str, f: F) -> BridgeResult<()>
    where
        F: FnOnce(&ParamValue) -> ParamValue,
    {
        let param = self
            .leaf(node)
            .ok_or_else(|| BridgeError::UnknownNode(node.to_string()))?;
        let _guard = param.lock_writes();
        let current = self.read_leaf(node, param);
        let value = param.check(node, f(&current))?;
        if let Some(hook) = self.hook() {
            hook.refresh(node, value.clone())?;
        }
        param.apply(&value);
        Ok(())
    }

    fn resolve<'a>(&'a self, path: &str, segments: &[&str]) -> BridgeResult<NodeRef<'a>> {
        let mut current = NodeRef::Branch(&self.root);
        for segment in segments {
            current = match current {
                NodeRef::Branch(branch) => branch
                    .get(segment)
                    .map(NodeRef::from)
                    .ok_or_else(|| BridgeError::InvalidPath(path.to_string()))?,
                _ => return Err(BridgeError::InvalidPath(path.to_string())),
            };
        }
        Ok(current)
    }

    fn read_leaf(&self, node: &str, param: &Parameter) -> ParamValue {
        if !param.is_external() {
            if let Some(value) = self.hook().and_then(|hook| hook.read(node)) {
                return value;
            }
        }
        param.local_value()
    }

    fn render(&self, dotted: &str, node: NodeRef<'_>, with_metadata: bool) -> Value {
        match node {
            NodeRef::Branch(branch) => {
                let mut map = Map::new();
                for (name, child) in branch.children() {
                    let child_name = join_dotted(dotted, name);
                    map.insert(
                        name.to_string(),
                        self.render(&child_name, NodeRef::from(child), with_metadata),
                    );
                }
                Value::Object(map)
            }
            NodeRef::Leaf(param) => {
                let value = self.read_leaf(dotted, param);
                if with_metadata {
                    param.render_with_metadata(&value)
                } else {
                    param.render(&value)
                }
            }
            NodeRef::Unsupported(raw) => {
                if with_metadata {
                    json!({ "value": raw, "type": unsupported_kind(raw), "writeable": false })
                } else {
                    raw.clone()
                }
            }
        }
    }
}

impl ControlPush for ParameterTree {
    fn accepts(&self, node: &str, value: &ParamValue) -> BridgeResult<()> {
        match self.leaf(node) {
            Some(param) => param.check(node, value.clone()).map(|_| ()),
            None => Ok(()),
        }
    }

    fn push_to_control(
        &self,
        node: &str,
        value: &ParamValue,
        deadline: Instant,
    ) -> BridgeResult<()> {
        let param = self.leaf(node).ok_or_else(|| {
            BridgeError::propagation(node, PropagationTarget::Control, "no such parameter in tree")
        })?;
        if param.store_until(value, deadline) {
            Ok(())
        } else {
            Err(BridgeError::propagation(
                node,
                PropagationTarget::Control,
                "timed out waiting for parameter",
            ))
        }
    }
}

impl std::fmt::Debug for ParameterTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterTree")
            .field("root", &self.root)
            .field("hooked", &self.has_hook())
            .finish()
    }
}

/// Borrowed view of a node, so the root branch resolves like any other.
#[derive(Clone, Copy)]
enum NodeRef<'a> {
    Branch(&'a Branch),
    Leaf(&'a Parameter),
    Unsupported(&'a Value),
}

impl<'a> From<&'a TreeNode> for NodeRef<'a> {
    fn from(node: &'a TreeNode) -> Self {
        match node {
            TreeNode::Branch(branch) => NodeRef::Branch(branch),
            TreeNode::Leaf(param) => NodeRef::Leaf(param),
            TreeNode::Unsupported(raw) => NodeRef::Unsupported(raw),
        }
    }
}

/// Collects (dotted name, leaf, decoded value) for every leaf a write touches.
fn collect_writes<'a>(
    path: String,
    node: NodeRef<'a>,
    data: &Value,
    out: &mut Vec<(String, &'a Parameter, ParamValue)>,
) -> BridgeResult<()> {
    let dotted = path.replace('/', ".");
    match node {
        NodeRef::Leaf(param) => {
            if !param.is_writeable() {
                return Err(BridgeError::validation(dotted, "parameter is read-only"));
            }
            let value = param.decode(&dotted, data)?;
            out.push((dotted, param, value));
        }
        NodeRef::Branch(branch) => {
            let object = data.as_object().ok_or_else(|| {
                BridgeError::validation(dotted.clone(), "expected an object of parameter values")
            })?;
            for (name, value) in object {
                let child_path = if path.is_empty() {
                    name.clone()
                } else {
                    format!("{path}/{name}")
                };
                let child = branch
                    .get(name)
                    .ok_or_else(|| BridgeError::InvalidPath(child_path.clone()))?;
                collect_writes(child_path, NodeRef::from(child), value, out)?;
            }
        }
        NodeRef::Unsupported(_) => {
            return Err(BridgeError::validation(dotted, "parameter is read-only"));
        }
    }
    Ok(())
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn join_dotted(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

pub(crate) fn unsupported_kind(raw: &Value) -> &'static str {
    match raw {
        Value::Array(_) => "array",
        Value::Null => "null",
        Value::Object(_) => "object",
        _ => "unsupported",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ParamType;
    use std::sync::atomic::{AtomicI64, Ordering};

    fn sample_tree() -> ParameterTree {
        ParameterTree::new(
            Branch::new()
                .param(
                    "task_count",
                    Parameter::value(0).writeable().with_pv_name("BG-TASK-COUNT"),
                )
                .constant("random_value", 1.234)
                .branch(
                    "sub_tree",
                    Branch::new()
                        .constant("message", "hello")
                        .param("interesting_pv", Parameter::value(3.141))
                        .branch(
                            "deeper",
                            Branch::new()
                                .param("one", Parameter::value(1).writeable())
                                .param("two", Parameter::value(2.0).writeable())
                                .param(
                                    "three",
                                    Parameter::external(ParamType::Int, || ParamValue::Int(3)),
                                ),
                        ),
                ),
        )
    }

    #[test]
    fn get_leaf_is_keyed_by_name() {
        let tree = sample_tree();
        assert_eq!(tree.get("task_count", false).unwrap(), json!({"task_count": 0}));
        assert_eq!(
            tree.get("sub_tree/deeper/three", false).unwrap(),
            json!({"three": 3})
        );
        // trailing separators are tolerated
        assert_eq!(tree.get("sub_tree/message/", false).unwrap(), json!({"message": "hello"}));
    }

    #[test]
    fn get_root_returns_whole_tree_in_order() {
        let tree = sample_tree();
        let root = tree.get("", false).unwrap();
        let keys: Vec<&String> = root.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["task_count", "random_value", "sub_tree"]);
        assert_eq!(root["sub_tree"]["deeper"]["two"], json!(2.0));
    }

    #[test]
    fn get_with_metadata() {
        let tree = sample_tree();
        let data = tree.get("task_count", true).unwrap();
        assert_eq!(data["task_count"]["value"], json!(0));
        assert_eq!(data["task_count"]["writeable"], json!(true));
        assert_eq!(data["task_count"]["type"], json!("int"));
    }

    #[test]
    fn invalid_paths_are_rejected() {
        let tree = sample_tree();
        assert!(matches!(
            tree.get("missing", false),
            Err(BridgeError::InvalidPath(_))
        ));
        assert!(matches!(
            tree.get("task_count/extra", false),
            Err(BridgeError::InvalidPath(_))
        ));
        assert!(matches!(
            tree.set("sub_tree", &json!({"nope": 1})),
            Err(BridgeError::InvalidPath(p)) if p == "sub_tree/nope"
        ));
    }

    #[test]
    fn set_leaf_and_branch() {
        let tree = sample_tree();
        tree.set("task_count", &json!(2)).unwrap();
        assert_eq!(tree.value("task_count").unwrap(), ParamValue::Int(2));

        tree.set("sub_tree/deeper", &json!({"one": 2, "two": 5})).unwrap();
        assert_eq!(tree.value("sub_tree.deeper.one").unwrap(), ParamValue::Int(2));
        // integer widened for a float leaf
        assert_eq!(tree.value("sub_tree.deeper.two").unwrap(), ParamValue::Float(5.0));
    }

    #[test]
    fn set_validates_every_leaf_before_writing() {
        let tree = sample_tree();
        let err = tree
            .set("sub_tree/deeper", &json!({"one": 9, "three": 4}))
            .unwrap_err();
        assert!(matches!(err, BridgeError::Validation { ref node, .. } if node == "sub_tree.deeper.three"));
        // "one" was not written because "three" failed validation
        assert_eq!(tree.value("sub_tree.deeper.one").unwrap(), ParamValue::Int(1));
    }

    #[test]
    fn set_rejects_read_only_and_bad_types() {
        let tree = sample_tree();
        assert!(matches!(
            tree.set("random_value", &json!(2.0)),
            Err(BridgeError::Validation { .. })
        ));
        assert!(matches!(
            tree.set("task_count", &json!("ten")),
            Err(BridgeError::Validation { .. })
        ));
        assert!(matches!(
            tree.set("sub_tree/deeper", &json!(3)),
            Err(BridgeError::Validation { .. })
        ));
    }

    #[test]
    fn update_bypasses_read_only() {
        let tree = sample_tree();
        tree.update("sub_tree.interesting_pv", 2.718).unwrap();
        assert_eq!(
            tree.value("sub_tree.interesting_pv").unwrap(),
            ParamValue::Float(2.718)
        );
        assert!(matches!(
            tree.update("sub_tree.interesting_pv", "text"),
            Err(BridgeError::Validation { .. })
        ));
        assert!(matches!(
            tree.update("sub_tree.nothing", 1),
            Err(BridgeError::UnknownNode(_))
        ));
    }

    #[test]
    fn leaf_lookup_by_dotted_name() {
        let tree = sample_tree();
        assert!(tree.leaf("sub_tree.deeper.one").is_some());
        assert!(tree.leaf("sub_tree.deeper").is_none());
        assert!(tree.leaf("sub_tree.deeper.one.x").is_none());
        assert_eq!(tree.sample("sub_tree.deeper.three"), Some(ParamValue::Int(3)));
        assert_eq!(tree.sample("task_count"), None);
    }

    #[test]
    fn from_json_builds_constants() {
        let tree = ParameterTree::from_json(&json!({
            "name": "detector",
            "frames": 10,
            "exposure": 0.5,
            "nested": {"armed": false},
            "shape": [256, 256],
        }))
        .unwrap();

        assert_eq!(tree.value("frames").unwrap(), ParamValue::Int(10));
        assert_eq!(tree.value("nested.armed").unwrap(), ParamValue::Bool(false));
        assert_eq!(tree.get("shape", false).unwrap(), json!({"shape": [256, 256]}));
        assert_eq!(tree.get("shape", true).unwrap()["shape"]["type"], json!("array"));
        assert!(ParameterTree::from_json(&json!([1, 2])).is_err());
    }

    struct RecordingHook {
        writes: AtomicI64,
        refreshes: AtomicI64,
    }

    impl ControlHook for RecordingHook {
        fn write(&self, _node: &str, _value: ParamValue) -> BridgeResult<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn refresh(&self, _node: &str, _value: ParamValue) -> BridgeResult<()> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn read(&self, node: &str) -> Option<ParamValue> {
            (node == "task_count").then_some(ParamValue::Int(42))
        }
    }

    #[test]
    fn hook_routes_writes_and_reads() {
        let tree = sample_tree();
        let hook = Arc::new(RecordingHook {
            writes: AtomicI64::new(0),
            refreshes: AtomicI64::new(0),
        });
        tree.install_hook(hook.clone());
        assert!(tree.has_hook());

        tree.set("task_count", &json!(5)).unwrap();
        tree.update("random_value", 9.0).unwrap();
        assert_eq!(hook.writes.load(Ordering::SeqCst), 1);
        assert_eq!(hook.refreshes.load(Ordering::SeqCst), 1);

        // internal reads come from the hook while it is installed
        assert_eq!(tree.value("task_count").unwrap(), ParamValue::Int(42));

        tree.clear_hook();
        assert_eq!(tree.value("task_count").unwrap(), ParamValue::Int(5));
    }

    #[test]
    fn update_with_increments_under_the_write_lock() {
        let tree = sample_tree();
        tree.set("task_count", &json!(10)).unwrap();
        tree.update_with("task_count", |current| {
            ParamValue::Int(current.as_i64().unwrap_or(0) + 1)
        })
        .unwrap();
        assert_eq!(tree.value("task_count").unwrap(), ParamValue::Int(11));

        let err = tree
            .update_with("task_count", |_| ParamValue::Str("x".into()))
            .unwrap_err();
        assert!(matches!(err, BridgeError::Validation { .. }));
        assert!(matches!(
            tree.update_with("missing", |v| v.clone()),
            Err(BridgeError::UnknownNode(_))
        ));
    }

    #[test]
    fn validated_leaf_refuses_bad_writes_from_every_side() {
        let tree = ParameterTree::new(Branch::new().param(
            "interval",
            Parameter::value(1.0)
                .writeable()
                .with_validator(|value| match value.as_f64() {
                    Some(v) if v.is_finite() && v > 0.0 => Ok(()),
                    _ => Err("must be a positive number of seconds".into()),
                }),
        ));

        assert!(matches!(
            tree.set("", &json!({"interval": 0})),
            Err(BridgeError::Validation { .. })
        ));
        assert!(tree.update("interval", -5.0).is_err());
        assert!(tree.accepts("interval", &ParamValue::Float(0.0)).is_err());
        assert!(tree.accepts("interval", &ParamValue::Float(0.5)).is_ok());
        assert_eq!(tree.value("interval").unwrap(), ParamValue::Float(1.0));
    }

    #[test]
    fn push_to_control_stores_value() {
        let tree = sample_tree();
        let deadline = Instant::now() + std::time::Duration::from_millis(50);
        tree.push_to_control("sub_tree.deeper.one", &ParamValue::Int(7), deadline)
            .unwrap();
        assert_eq!(tree.value("sub_tree.deeper.one").unwrap(), ParamValue::Int(7));

        let err = tree
            .push_to_control("sub_tree.none", &ParamValue::Int(7), deadline)
            .unwrap_err();
        assert!(matches!(err, BridgeError::Propagation { .. }));
    }
}
