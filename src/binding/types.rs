//! Live binding trees.
//!
//! A [`BindingRoot`] is the typed, live instance of a schema for one device
//! or class: every schema key becomes a [`BindingNode`] carrying the current
//! remote value, a pending user edit, the timestamp of the last remote
//! update and the resolved attributes (schema defaults, overridden
//! per-update).
//!
//! Invariants:
//! - every leaf value is type-valid for its leaf kind;
//! - setting an edit value never mutates the remote value;
//! - an edit value is cleared when a new remote value equals the old remote
//!   value, or when explicitly reverted.

use indexmap::IndexMap;

use crate::hash::{Attributes, Hash, NdArray, Value, ValueKind};
use crate::schema::{attrs, AccessLevel, AccessMode, Assignment, NodeKind};
use crate::timestamp::Timestamp;

/// One node of a binding tree.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingNode {
    kind: NodeKind,
    value_kind: Option<ValueKind>,
    attributes: Attributes,
    value: Option<Value>,
    edit_value: Option<Value>,
    timestamp: Option<Timestamp>,
    children: IndexMap<String, BindingNode>,
}

impl BindingNode {
    /// A node of the given structural kind with schema attributes attached.
    pub fn new(kind: NodeKind, value_kind: Option<ValueKind>, attributes: Attributes) -> Self {
        BindingNode {
            kind,
            value_kind,
            attributes,
            value: None,
            edit_value: None,
            timestamp: None,
            children: IndexMap::new(),
        }
    }

    /// Structural kind of this node.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Leaf value type, when this is a typed leaf.
    pub fn value_kind(&self) -> Option<ValueKind> {
        self.value_kind
    }

    /// True for nodes that carry a value (leaves, arrays, tables).
    pub fn is_value_node(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf | NodeKind::NdArray | NodeKind::Table)
    }

    /// Resolved attributes: schema defaults merged with runtime overrides.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Silently fold runtime attribute overrides into this node.
    pub fn update_attributes(&mut self, overrides: &Attributes) {
        for (name, value) in overrides {
            self.attributes.insert(name.clone(), value.clone());
        }
    }

    /// Last value accepted from the remote or applied locally.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Write the remote value. Clears a pending edit when the incoming
    /// value equals the value already held.
    pub fn set_value(&mut self, value: Value) {
        if self.value.as_ref() == Some(&value) {
            self.edit_value = None;
        }
        self.value = Some(value);
    }

    /// Pending user edit, when one exists.
    pub fn edit_value(&self) -> Option<&Value> {
        self.edit_value.as_ref()
    }

    /// Stage a user edit without touching the remote value.
    pub fn set_edit_value(&mut self, value: Value) {
        self.edit_value = Some(value);
    }

    /// Drop a pending edit.
    pub fn revert_edit(&mut self) {
        self.edit_value = None;
    }

    /// Timestamp of the last remote update.
    pub fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp
    }

    /// Record the timestamp of a remote update.
    pub fn set_timestamp(&mut self, ts: Option<Timestamp>) {
        self.timestamp = ts;
    }

    /// Child nodes in schema order.
    pub fn children(&self) -> &IndexMap<String, BindingNode> {
        &self.children
    }

    /// Mutable child access.
    pub fn children_mut(&mut self) -> &mut IndexMap<String, BindingNode> {
        &mut self.children
    }

    /// Child names visible at the given access level.
    pub fn child_names(&self, level: AccessLevel) -> Vec<&str> {
        self.children
            .iter()
            .filter(|(_, node)| node.required_access_level() <= level)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Schema default of this node, when declared.
    pub fn default_value(&self) -> Option<&Value> {
        self.attributes.get(attrs::DEFAULT_VALUE)
    }

    /// Access mode of this node, defaulting to `Write`.
    pub fn access_mode(&self) -> AccessMode {
        match self.attributes.get(attrs::ACCESS_MODE).and_then(Value::as_i64) {
            Some(1) => AccessMode::Init,
            Some(2) => AccessMode::Read,
            _ => AccessMode::Write,
        }
    }

    /// Assignment of this node, defaulting to `Optional`.
    pub fn assignment(&self) -> Assignment {
        match self.attributes.get(attrs::ASSIGNMENT).and_then(Value::as_i64) {
            Some(1) => Assignment::Mandatory,
            Some(2) => Assignment::Internal,
            _ => Assignment::Optional,
        }
    }

    /// Required access level of this node.
    pub fn required_access_level(&self) -> AccessLevel {
        AccessLevel::from_attrs(&self.attributes)
    }

    /// True when `state` is an allowed state for writing this node; an
    /// empty allowed-states set allows everything.
    pub fn is_allowed(&self, state: &str) -> bool {
        match self.attributes.get(attrs::ALLOWED_STATES).and_then(Value::as_str_vec) {
            None => true,
            Some(states) => states.is_empty() || states.iter().any(|s| s == state),
        }
    }

    /// The zero value for a leaf kind, used when a schema declares no
    /// default.
    pub fn type_zero(kind: ValueKind) -> Value {
        match kind {
            ValueKind::Bool => Value::Bool(false),
            ValueKind::Int8 => Value::Int8(0),
            ValueKind::UInt8 => Value::UInt8(0),
            ValueKind::Int16 => Value::Int16(0),
            ValueKind::UInt16 => Value::UInt16(0),
            ValueKind::Int32 => Value::Int32(0),
            ValueKind::UInt32 => Value::UInt32(0),
            ValueKind::Int64 => Value::Int64(0),
            ValueKind::UInt64 => Value::UInt64(0),
            ValueKind::Float => Value::Float(0.0),
            ValueKind::Double => Value::Double(0.0),
            ValueKind::String => Value::String(String::new()),
            ValueKind::VectorBool => Value::VectorBool(Vec::new()),
            ValueKind::VectorInt32 => Value::VectorInt32(Vec::new()),
            ValueKind::VectorInt64 => Value::VectorInt64(Vec::new()),
            ValueKind::VectorUInt64 => Value::VectorUInt64(Vec::new()),
            ValueKind::VectorDouble => Value::VectorDouble(Vec::new()),
            ValueKind::VectorString => Value::VectorString(Vec::new()),
            ValueKind::Hash => Value::Hash(Hash::new()),
            ValueKind::VectorHash => Value::VectorHash(Vec::new()),
            ValueKind::NdArray => Value::NdArray(NdArray {
                element: ValueKind::Double,
                shape: Vec::new(),
                data: bytes::Bytes::new(),
            }),
        }
    }
}

/// Root of a binding tree for one device or class.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BindingRoot {
    class_id: String,
    children: IndexMap<String, BindingNode>,
}

impl BindingRoot {
    /// An empty binding for `class_id`; populated once a schema arrives.
    pub fn new(class_id: impl Into<String>) -> Self {
        BindingRoot { class_id: class_id.into(), children: IndexMap::new() }
    }

    /// The class this binding was built for.
    pub fn class_id(&self) -> &str {
        &self.class_id
    }

    /// Rename the class, used when a project expects a different class.
    pub fn set_class_id(&mut self, class_id: impl Into<String>) {
        self.class_id = class_id.into();
    }

    /// True until a schema has been applied (or after the namespace was
    /// cleared on server-gone).
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Top-level nodes in schema order.
    pub fn children(&self) -> &IndexMap<String, BindingNode> {
        &self.children
    }

    /// Mutable top-level access, for the binding builder.
    pub fn children_mut(&mut self) -> &mut IndexMap<String, BindingNode> {
        &mut self.children
    }

    /// Top-level names visible at the given access level.
    pub fn child_names(&self, level: AccessLevel) -> Vec<&str> {
        self.children
            .iter()
            .filter(|(_, node)| node.required_access_level() <= level)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Resolve the node at a dotted `path`.
    pub fn get(&self, path: &str) -> Option<&BindingNode> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut node = self.children.get(first)?;
        for part in parts {
            node = node.children().get(part)?;
        }
        Some(node)
    }

    /// Mutable node access at a dotted `path`.
    pub fn get_mut(&mut self, path: &str) -> Option<&mut BindingNode> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut node = self.children.get_mut(first)?;
        for part in parts {
            node = node.children_mut().get_mut(part)?;
        }
        Some(node)
    }

    /// Drop every node, leaving an empty namespace. The class id is kept,
    /// so a later schema arrival rebuilds the same identity.
    pub fn clear_namespace(&mut self) {
        self.children.clear();
    }

    /// Visit every value node as `(dotted_path, node)` in schema order.
    pub fn visit_value_nodes<'a>(&'a self, mut f: impl FnMut(&str, &'a BindingNode)) {
        fn walk<'a>(
            base: &str,
            children: &'a IndexMap<String, BindingNode>,
            f: &mut impl FnMut(&str, &'a BindingNode),
        ) {
            for (name, node) in children {
                let path = if base.is_empty() {
                    name.clone()
                } else {
                    format!("{base}.{name}")
                };
                if node.is_value_node() {
                    f(&path, node);
                }
                walk(&path, node.children(), f);
            }
        }
        walk("", &self.children, &mut f);
    }

    /// Visit every value node mutably as `(dotted_path, node)`.
    pub fn visit_value_nodes_mut(&mut self, mut f: impl FnMut(&str, &mut BindingNode)) {
        fn walk(
            base: &str,
            children: &mut IndexMap<String, BindingNode>,
            f: &mut impl FnMut(&str, &mut BindingNode),
        ) {
            for (name, node) in children.iter_mut() {
                let path = if base.is_empty() {
                    name.clone()
                } else {
                    format!("{base}.{name}")
                };
                if node.is_value_node() {
                    f(&path, node);
                }
                walk(&path, node.children_mut(), f);
            }
        }
        walk("", &mut self.children, &mut f);
    }
}
