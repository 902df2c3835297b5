//! Applying configurations to bindings and extracting them back out.
//!
//! Bulk application never fails as a whole: individual leaves that cannot
//! be coerced are skipped (or reported, for project configurations) and the
//! rest of the walk continues.

use tracing::warn;

use crate::hash::{Hash, Value, ValueKind};
use crate::schema::{AccessMode, Assignment, Limits, NodeKind, Schema};
use crate::timestamp::Timestamp;

use super::builder::initial_value;
use super::types::{BindingNode, BindingRoot};

/// Coerce `value` to `kind`, widening integers losslessly and accepting
/// any numeric type for floating-point targets. Vector and container kinds
/// must match exactly.
pub fn coerce_value(value: &Value, kind: ValueKind) -> Option<Value> {
    if value.kind() == kind {
        return Some(value.clone());
    }
    match kind {
        ValueKind::Bool => value.as_bool().map(Value::Bool),
        ValueKind::Int8 => value.as_i64().and_then(|v| i8::try_from(v).ok()).map(Value::Int8),
        ValueKind::UInt8 => value.as_u64().and_then(|v| u8::try_from(v).ok()).map(Value::UInt8),
        ValueKind::Int16 => value.as_i64().and_then(|v| i16::try_from(v).ok()).map(Value::Int16),
        ValueKind::UInt16 => {
            value.as_u64().and_then(|v| u16::try_from(v).ok()).map(Value::UInt16)
        }
        ValueKind::Int32 => value.as_i64().and_then(|v| i32::try_from(v).ok()).map(Value::Int32),
        ValueKind::UInt32 => {
            value.as_u64().and_then(|v| u32::try_from(v).ok()).map(Value::UInt32)
        }
        ValueKind::Int64 => value.as_i64().map(Value::Int64),
        ValueKind::UInt64 => value.as_u64().map(Value::UInt64),
        ValueKind::Float => value.as_f64().map(|v| Value::Float(v as f32)),
        ValueKind::Double => value.as_f64().map(Value::Double),
        // Strings, vectors and containers do not convert across kinds.
        _ => None,
    }
}

/// Write a remote configuration into `binding`. Keys absent from the
/// binding and type-invalid values are skipped. With `skip_modified`,
/// leaves holding a pending edit are left untouched.
pub fn apply_configuration(config: &Hash, binding: &mut BindingRoot, skip_modified: bool) {
    walk_config(config, "", &mut |path, value, attributes| {
        let Some(node) = binding.get_mut(path) else {
            return;
        };
        if !node.is_value_node() {
            return;
        }
        if skip_modified && node.edit_value().is_some() {
            return;
        }
        let Some(kind) = leaf_kind(node) else { return };
        let Some(coerced) = coerce_value(value, kind) else {
            warn!(path, got = %value.kind(), expected = %kind, "dropping type-invalid value");
            return;
        };
        node.set_value(coerced);
        if let Some(ts) = Timestamp::from_attributes(attributes) {
            node.set_timestamp(Some(ts));
        }
    });
}

/// Write every value node's schema default (or type zero) and clear all
/// pending edits.
pub fn apply_default_configuration(binding: &mut BindingRoot) {
    binding.visit_value_nodes_mut(|_, node| {
        node.revert_edit();
        node.set_value(initial_value(node));
        node.set_timestamp(None);
    });
}

/// Apply a project configuration, validating each leaf against the schema
/// attributes. Returns a container of failed paths mapped to a reason;
/// empty on full success.
pub fn apply_project_configuration(config: &Hash, binding: &mut BindingRoot) -> Hash {
    let mut fails = Hash::new();
    walk_config(config, "", &mut |path, value, attributes| {
        let Some(node) = binding.get_mut(path) else {
            fails.set(path, "unknown key");
            return;
        };
        if !node.is_value_node() {
            fails.set(path, "not a property");
            return;
        }
        let Some(kind) = leaf_kind(node) else {
            fails.set(path, "untyped key");
            return;
        };
        let Some(coerced) = coerce_value(value, kind) else {
            fails.set(path, format!("expected {kind}, got {}", value.kind()));
            return;
        };
        let limits = Limits::from_attrs(node.attributes());
        if let Some(number) = coerced.as_f64() {
            if !limits.contains(number) {
                fails.set(path, format!("{number} outside {}", limits.describe()));
                return;
            }
        }
        node.set_value(coerced);
        if let Some(ts) = Timestamp::from_attributes(attributes) {
            node.set_timestamp(Some(ts));
        }
    });
    fails
}

/// Apply a pipeline-data payload: like [`apply_configuration`] without the
/// edit handling, stamping every touched leaf with `timestamp`.
pub fn apply_fast_data(config: &Hash, binding: &mut BindingRoot, timestamp: Option<Timestamp>) {
    walk_config(config, "", &mut |path, value, _| {
        let Some(node) = binding.get_mut(path) else {
            return;
        };
        let Some(kind) = leaf_kind(node) else { return };
        if let Some(coerced) = coerce_value(value, kind) {
            node.set_value(coerced);
            node.set_timestamp(timestamp);
        }
    });
}

/// Dump the full current value state of a binding as a configuration,
/// timestamps included as attribute triples.
pub fn extract_configuration(binding: &BindingRoot) -> Hash {
    let mut out = Hash::new();
    binding.visit_value_nodes(|path, node| {
        if let Some(value) = node.value() {
            out.set(path, value.clone());
            if let Some(ts) = node.timestamp() {
                if let Ok(attrs) = out.attributes_mut(path) {
                    ts.write_attributes(attrs);
                }
            }
        }
    });
    out
}

/// Collect offline edits: leaves whose pending edit differs from the
/// schema default.
pub fn extract_edits(schema: &Schema, binding: &BindingRoot) -> Hash {
    let mut out = Hash::new();
    binding.visit_value_nodes(|path, node| {
        let Some(edit) = node.edit_value() else { return };
        if schema.default_value(path) == Some(edit) {
            return;
        }
        out.set(path, edit.clone());
    });
    out
}

/// Collect online edits: writable leaves whose pending edit differs from
/// the last remote value. Keys the schema no longer carries are dropped.
pub fn extract_online_edits(schema: &Schema, binding: &BindingRoot) -> Hash {
    let mut out = Hash::new();
    binding.visit_value_nodes(|path, node| {
        let Some(edit) = node.edit_value() else { return };
        if !schema.has_key(path) || schema.access_mode(path) == AccessMode::Read {
            return;
        }
        if node.value() == Some(edit) {
            return;
        }
        out.set(path, edit.clone());
    });
    out
}

/// Reduce `config` to the keys meaningful when instantiating a device:
/// reconfigurable or init-mode keys the binding knows, with values that
/// differ from the schema default. Internal assignments are excluded.
pub fn extract_init_configuration(binding: &BindingRoot, config: &Hash) -> Hash {
    let mut out = Hash::new();
    walk_config(config, "", &mut |path, value, _| {
        let Some(node) = binding.get(path) else { return };
        if !node.is_value_node() {
            return;
        }
        if node.access_mode() == AccessMode::Read || node.assignment() == Assignment::Internal {
            return;
        }
        if node.default_value() == Some(value) {
            return;
        }
        let Some(kind) = leaf_kind(node) else { return };
        if let Some(coerced) = coerce_value(value, kind) {
            out.set(path, coerced);
        }
    });
    out
}

fn leaf_kind(node: &BindingNode) -> Option<ValueKind> {
    match node.kind() {
        NodeKind::Table => Some(ValueKind::VectorHash),
        NodeKind::NdArray => Some(ValueKind::NdArray),
        _ => node.value_kind(),
    }
}

/// Depth-first walk of a configuration, visiting every non-container leaf
/// as `(dotted_path, value, attributes)`. A nested container recurses; any
/// other value is a leaf.
fn walk_config(
    config: &Hash,
    base: &str,
    f: &mut impl FnMut(&str, &Value, &crate::hash::Attributes),
) {
    for (name, value, attributes) in config.iter() {
        let path = if base.is_empty() {
            name.to_string()
        } else {
            format!("{base}.{name}")
        };
        match value {
            Value::Hash(inner) => walk_config(inner, &path, f),
            _ => f(&path, value, attributes),
        }
    }
}
