//! Building binding trees from schema payloads.
//!
//! `build_binding` turns a schema into a fresh [`BindingRoot`], or rebuilds
//! an existing one in place after a schema update. On rebuild, keys present
//! in both trees whose leaf kinds agree keep their remote value and
//! timestamp; pending edits are dropped, and keys whose kind changed fall
//! back to the schema default.

use tracing::debug;

use crate::hash::{Hash, Value, ValueKind};
use crate::schema::{attrs, NodeKind, Schema};

use super::types::{BindingNode, BindingRoot};

/// Build the binding tree for `schema`, carrying over compatible values
/// from `existing` when one is given.
pub fn build_binding(schema: &Schema, existing: Option<&BindingRoot>) -> BindingRoot {
    let mut root = BindingRoot::new(schema.class_id());
    build_level(schema.hash(), existing.map(BindingRoot::children), root.children_mut());
    debug!(class_id = schema.class_id(), keys = root.children().len(), "binding built");
    root
}

fn build_level(
    schema_level: &Hash,
    existing: Option<&indexmap::IndexMap<String, BindingNode>>,
    out: &mut indexmap::IndexMap<String, BindingNode>,
) {
    for (name, value, attributes) in schema_level.iter() {
        let kind = NodeKind::from_attrs(attributes);
        let value_kind = attributes
            .get(attrs::VALUE_TYPE)
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<ValueKind>().ok());
        let mut node = BindingNode::new(kind, value_kind, attributes.clone());

        if node.is_value_node() {
            let carried = existing
                .and_then(|map| map.get(name))
                .filter(|old| old.kind() == kind && old.value_kind() == value_kind);
            match carried {
                Some(old) => {
                    if let Some(v) = old.value() {
                        node.set_value(v.clone());
                    }
                    node.set_timestamp(old.timestamp());
                }
                None => node.set_value(initial_value(&node)),
            }
        }

        if let Some(children) = value.as_hash() {
            let existing_children = existing
                .and_then(|map| map.get(name))
                .map(BindingNode::children);
            build_level(children, existing_children, node.children_mut());
        }
        out.insert(name.to_string(), node);
    }
}

/// Schema default when one is declared, otherwise the type zero.
pub fn initial_value(node: &BindingNode) -> Value {
    match node.default_value() {
        Some(v) => v.clone(),
        None => {
            let kind = match node.kind() {
                NodeKind::Table => ValueKind::VectorHash,
                NodeKind::NdArray => ValueKind::NdArray,
                _ => node.value_kind().unwrap_or(ValueKind::String),
            };
            BindingNode::type_zero(kind)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaBuilder;
    use crate::timestamp::Timestamp;

    fn motor_schema() -> Schema {
        SchemaBuilder::new("Motor")
            .leaf("speed", ValueKind::Double)
            .default_value("speed", 2.5)
            .node("axis")
            .leaf("axis.position", ValueKind::Double)
            .leaf("counter", ValueKind::Int32)
            .build()
    }

    #[test]
    fn fresh_build_uses_defaults_and_type_zero() {
        let binding = build_binding(&motor_schema(), None);
        assert_eq!(binding.class_id(), "Motor");
        assert_eq!(binding.get("speed").unwrap().value(), Some(&Value::Double(2.5)));
        assert_eq!(binding.get("axis.position").unwrap().value(), Some(&Value::Double(0.0)));
        assert_eq!(binding.get("counter").unwrap().value(), Some(&Value::Int32(0)));
        assert_eq!(binding.get("axis").unwrap().kind(), NodeKind::Node);
    }

    #[test]
    fn rebuild_preserves_values_and_timestamps_but_not_edits() {
        let schema = motor_schema();
        let mut binding = build_binding(&schema, None);
        let node = binding.get_mut("speed").unwrap();
        node.set_value(Value::Double(7.0));
        node.set_timestamp(Some(Timestamp::new(10, 0, 42)));
        node.set_edit_value(Value::Double(9.0));

        let rebuilt = build_binding(&schema, Some(&binding));
        let node = rebuilt.get("speed").unwrap();
        assert_eq!(node.value(), Some(&Value::Double(7.0)));
        assert_eq!(node.timestamp(), Some(Timestamp::new(10, 0, 42)));
        assert_eq!(node.edit_value(), None);
    }

    #[test]
    fn rebuild_resets_keys_whose_kind_changed() {
        let old_schema = motor_schema();
        let mut binding = build_binding(&old_schema, None);
        binding.get_mut("counter").unwrap().set_value(Value::Int32(99));

        let new_schema = SchemaBuilder::new("Motor")
            .leaf("speed", ValueKind::Double)
            .default_value("speed", 2.5)
            .leaf("counter", ValueKind::String)
            .build();
        let rebuilt = build_binding(&new_schema, Some(&binding));
        assert_eq!(
            rebuilt.get("counter").unwrap().value(),
            Some(&Value::String(String::new()))
        );
    }

    #[test]
    fn keys_dropped_from_schema_disappear() {
        let binding = build_binding(&motor_schema(), None);
        let new_schema = SchemaBuilder::new("Motor")
            .leaf("speed", ValueKind::Double)
            .build();
        let rebuilt = build_binding(&new_schema, Some(&binding));
        assert!(rebuilt.get("counter").is_none());
        assert!(rebuilt.get("axis").is_none());
    }
}
