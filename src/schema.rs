//! Parameter description trees.
//!
//! A [`Schema`] describes every parameter a device class exposes: the node
//! kind and value type of each dotted key, its access mode, assignment,
//! required access level, limits, options, units and display hints. Schemas
//! are immutable after construction for a given `(server, class)` pair; the
//! live counterpart is the binding tree built from them.
//!
//! The schema payload is itself carried as a [`Hash`]: nested keys mirror
//! the parameter hierarchy and all metadata lives in per-key attributes.

use serde::{Deserialize, Serialize};

use crate::hash::{Attributes, Hash, Value, ValueKind};

/// Attribute keys used inside schema hashes.
pub mod attrs {
    /// Node kind discriminant (`i32`, see [`super::NodeKind`]).
    pub const NODE_TYPE: &str = "nodeType";
    /// Leaf value type name (`String`, a [`super::ValueKind`] name).
    pub const VALUE_TYPE: &str = "valueType";
    /// Access mode code (`i32`, see [`super::AccessMode`]).
    pub const ACCESS_MODE: &str = "accessMode";
    /// Assignment code (`i32`, see [`super::Assignment`]).
    pub const ASSIGNMENT: &str = "assignment";
    /// Required access level code (`i32`, see [`super::AccessLevel`]).
    pub const REQUIRED_ACCESS_LEVEL: &str = "requiredAccessLevel";
    /// Default value of a leaf.
    pub const DEFAULT_VALUE: &str = "defaultValue";
    /// Allowed discrete values.
    pub const OPTIONS: &str = "options";
    /// Inclusive lower bound (`f64`).
    pub const MIN_INC: &str = "minInc";
    /// Inclusive upper bound (`f64`).
    pub const MAX_INC: &str = "maxInc";
    /// Exclusive lower bound (`f64`).
    pub const MIN_EXC: &str = "minExc";
    /// Exclusive upper bound (`f64`).
    pub const MAX_EXC: &str = "maxExc";
    /// Unit symbol (`String`).
    pub const UNIT_SYMBOL: &str = "unitSymbol";
    /// Metric prefix symbol (`String`).
    pub const METRIC_PREFIX_SYMBOL: &str = "metricPrefixSymbol";
    /// Classification tags (`Vec<String>`).
    pub const TAGS: &str = "tags";
    /// States in which the parameter may be written (`Vec<String>`).
    pub const ALLOWED_STATES: &str = "allowedStates";
    /// Display hint for view layers (`String`).
    pub const DISPLAY_TYPE: &str = "displayType";
    /// Human-readable name (`String`).
    pub const DISPLAYED_NAME: &str = "displayedName";
    /// Archiving policy (`String`).
    pub const ARCHIVE_POLICY: &str = "archivePolicy";
    /// Low warning threshold (`f64`).
    pub const WARN_LOW: &str = "warnLow";
    /// High warning threshold (`f64`).
    pub const WARN_HIGH: &str = "warnHigh";
    /// Low alarm threshold (`f64`).
    pub const ALARM_LOW: &str = "alarmLow";
    /// High alarm threshold (`f64`).
    pub const ALARM_HIGH: &str = "alarmHigh";
    /// Whether alarms on this leaf require acknowledgement (`bool`).
    pub const ALARM_NEEDS_ACK: &str = "alarmNeedsAck";
    /// Row schema of a table leaf (`Hash`).
    pub const ROW_SCHEMA: &str = "rowSchema";
}

/// Structural kind of a schema key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// A plain typed leaf.
    Leaf,
    /// A grouping node with children.
    Node,
    /// A choice between alternative sub-nodes.
    ChoiceOfNodes,
    /// A list of repeated sub-nodes.
    ListOfNodes,
    /// An n-dimensional array leaf.
    NdArray,
    /// A table leaf carrying a row schema.
    Table,
}

impl NodeKind {
    fn from_code(code: i64) -> NodeKind {
        match code {
            1 => NodeKind::Node,
            2 => NodeKind::ChoiceOfNodes,
            3 => NodeKind::ListOfNodes,
            4 => NodeKind::NdArray,
            5 => NodeKind::Table,
            _ => NodeKind::Leaf,
        }
    }

    fn code(self) -> i32 {
        match self {
            NodeKind::Leaf => 0,
            NodeKind::Node => 1,
            NodeKind::ChoiceOfNodes => 2,
            NodeKind::ListOfNodes => 3,
            NodeKind::NdArray => 4,
            NodeKind::Table => 5,
        }
    }

    /// Read the node kind of an attribute map, defaulting to `Leaf`.
    pub fn from_attrs(attrs: &Attributes) -> NodeKind {
        attrs
            .get(attrs_keys::NODE_TYPE)
            .and_then(Value::as_i64)
            .map_or(NodeKind::Leaf, NodeKind::from_code)
    }
}

use attrs as attrs_keys;

/// How a parameter may be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    /// Writable only at instantiation.
    Init,
    /// Read-only at runtime.
    Read,
    /// Reconfigurable at runtime.
    Write,
}

impl AccessMode {
    fn from_code(code: i64) -> AccessMode {
        match code {
            1 => AccessMode::Init,
            2 => AccessMode::Read,
            _ => AccessMode::Write,
        }
    }

    fn code(self) -> i32 {
        match self {
            AccessMode::Init => 1,
            AccessMode::Read => 2,
            AccessMode::Write => 4,
        }
    }
}

/// Whether a parameter must be supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Assignment {
    /// May be omitted; the default applies.
    Optional,
    /// Must be supplied at instantiation.
    Mandatory,
    /// Managed by the device itself; never user-supplied.
    Internal,
}

impl Assignment {
    fn from_code(code: i64) -> Assignment {
        match code {
            1 => Assignment::Mandatory,
            2 => Assignment::Internal,
            _ => Assignment::Optional,
        }
    }

    fn code(self) -> i32 {
        match self {
            Assignment::Optional => 0,
            Assignment::Mandatory => 1,
            Assignment::Internal => 2,
        }
    }
}

/// User access levels, ordered from least to most privileged.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum AccessLevel {
    /// May observe values only.
    #[default]
    Observer,
    /// Regular user.
    User,
    /// Shift operator.
    Operator,
    /// Instrument expert.
    Expert,
    /// Administrator.
    Admin,
}

impl AccessLevel {
    /// Decode a wire access-level code, defaulting to `Observer`.
    pub fn from_code(code: i64) -> AccessLevel {
        match code {
            1 => AccessLevel::User,
            2 => AccessLevel::Operator,
            3 => AccessLevel::Expert,
            4 => AccessLevel::Admin,
            _ => AccessLevel::Observer,
        }
    }

    /// The wire code of this level.
    pub fn code(self) -> i32 {
        match self {
            AccessLevel::Observer => 0,
            AccessLevel::User => 1,
            AccessLevel::Operator => 2,
            AccessLevel::Expert => 3,
            AccessLevel::Admin => 4,
        }
    }

    /// Read the required access level of an attribute map, defaulting to
    /// `Observer`.
    pub fn from_attrs(attrs: &Attributes) -> AccessLevel {
        attrs
            .get(attrs_keys::REQUIRED_ACCESS_LEVEL)
            .and_then(Value::as_i64)
            .map_or(AccessLevel::Observer, AccessLevel::from_code)
    }
}

impl std::str::FromStr for ValueKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "Bool" => ValueKind::Bool,
            "Int8" => ValueKind::Int8,
            "UInt8" => ValueKind::UInt8,
            "Int16" => ValueKind::Int16,
            "UInt16" => ValueKind::UInt16,
            "Int32" => ValueKind::Int32,
            "UInt32" => ValueKind::UInt32,
            "Int64" => ValueKind::Int64,
            "UInt64" => ValueKind::UInt64,
            "Float" => ValueKind::Float,
            "Double" => ValueKind::Double,
            "String" => ValueKind::String,
            "VectorBool" => ValueKind::VectorBool,
            "VectorInt32" => ValueKind::VectorInt32,
            "VectorInt64" => ValueKind::VectorInt64,
            "VectorUInt64" => ValueKind::VectorUInt64,
            "VectorDouble" => ValueKind::VectorDouble,
            "VectorString" => ValueKind::VectorString,
            "Hash" => ValueKind::Hash,
            "VectorHash" => ValueKind::VectorHash,
            "NDArray" | "NdArray" => ValueKind::NdArray,
            _ => return Err(()),
        };
        Ok(kind)
    }
}

/// Numeric limits of a leaf, inclusive or exclusive per side.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Limits {
    /// Inclusive lower bound.
    pub min_inc: Option<f64>,
    /// Inclusive upper bound.
    pub max_inc: Option<f64>,
    /// Exclusive lower bound.
    pub min_exc: Option<f64>,
    /// Exclusive upper bound.
    pub max_exc: Option<f64>,
}

impl Limits {
    /// Read limits from an attribute map.
    pub fn from_attrs(attrs: &Attributes) -> Limits {
        let read = |key: &str| attrs.get(key).and_then(Value::as_f64);
        Limits {
            min_inc: read(attrs_keys::MIN_INC),
            max_inc: read(attrs_keys::MAX_INC),
            min_exc: read(attrs_keys::MIN_EXC),
            max_exc: read(attrs_keys::MAX_EXC),
        }
    }

    /// True when no bound is set.
    pub fn is_unbounded(&self) -> bool {
        self.min_inc.is_none()
            && self.max_inc.is_none()
            && self.min_exc.is_none()
            && self.max_exc.is_none()
    }

    /// True when `value` satisfies every set bound.
    pub fn contains(&self, value: f64) -> bool {
        if let Some(min) = self.min_inc {
            if value < min {
                return false;
            }
        }
        if let Some(max) = self.max_inc {
            if value > max {
                return false;
            }
        }
        if let Some(min) = self.min_exc {
            if value <= min {
                return false;
            }
        }
        if let Some(max) = self.max_exc {
            if value >= max {
                return false;
            }
        }
        true
    }

    /// Render the bounds as an interval string, e.g. `[0, 10)`.
    pub fn describe(&self) -> String {
        let (lo_bracket, lo) = match (self.min_inc, self.min_exc) {
            (Some(v), _) => ("[", v.to_string()),
            (_, Some(v)) => ("(", v.to_string()),
            _ => ("(", "-inf".to_string()),
        };
        let (hi, hi_bracket) = match (self.max_inc, self.max_exc) {
            (Some(v), _) => (v.to_string(), "]"),
            (_, Some(v)) => (v.to_string(), ")"),
            _ => ("inf".to_string(), ")"),
        };
        format!("{lo_bracket}{lo}, {hi}{hi_bracket}")
    }
}

/// Alarm thresholds of a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AlarmThresholds {
    /// Low warning threshold.
    pub warn_low: Option<f64>,
    /// High warning threshold.
    pub warn_high: Option<f64>,
    /// Low alarm threshold.
    pub alarm_low: Option<f64>,
    /// High alarm threshold.
    pub alarm_high: Option<f64>,
    /// Whether triggered alarms require acknowledgement.
    pub needs_ack: bool,
}

impl AlarmThresholds {
    /// Read alarm thresholds from an attribute map.
    pub fn from_attrs(attrs: &Attributes) -> AlarmThresholds {
        let read = |key: &str| attrs.get(key).and_then(Value::as_f64);
        AlarmThresholds {
            warn_low: read(attrs_keys::WARN_LOW),
            warn_high: read(attrs_keys::WARN_HIGH),
            alarm_low: read(attrs_keys::ALARM_LOW),
            alarm_high: read(attrs_keys::ALARM_HIGH),
            needs_ack: attrs
                .get(attrs_keys::ALARM_NEEDS_ACK)
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }
    }
}

/// Immutable parameter description for one device class.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    class_id: String,
    hash: Hash,
}

impl Schema {
    /// Wrap a schema payload received from the gateway.
    pub fn from_hash(class_id: impl Into<String>, hash: Hash) -> Schema {
        Schema { class_id: class_id.into(), hash }
    }

    /// The class this schema describes.
    pub fn class_id(&self) -> &str {
        &self.class_id
    }

    /// The underlying schema payload.
    pub fn hash(&self) -> &Hash {
        &self.hash
    }

    /// True when the schema carries no keys at all. Empty schemas are
    /// cached but never applied.
    pub fn is_empty(&self) -> bool {
        self.hash.is_empty()
    }

    /// Attribute map of the key at `path`, `None` when absent.
    pub fn key_attrs(&self, path: &str) -> Option<&Attributes> {
        self.hash.attributes(path).ok()
    }

    /// True when `path` names a key of this schema.
    pub fn has_key(&self, path: &str) -> bool {
        self.hash.contains(path)
    }

    /// Structural kind of the key at `path`.
    pub fn node_kind(&self, path: &str) -> Option<NodeKind> {
        self.key_attrs(path).map(NodeKind::from_attrs)
    }

    /// Leaf value type of the key at `path`, when it is a typed leaf.
    pub fn value_kind(&self, path: &str) -> Option<ValueKind> {
        self.key_attrs(path)?
            .get(attrs::VALUE_TYPE)?
            .as_str()?
            .parse()
            .ok()
    }

    /// Access mode of the key at `path`, defaulting to `Write`.
    pub fn access_mode(&self, path: &str) -> AccessMode {
        self.key_attrs(path)
            .and_then(|a| a.get(attrs::ACCESS_MODE))
            .and_then(Value::as_i64)
            .map_or(AccessMode::Write, AccessMode::from_code)
    }

    /// Assignment of the key at `path`, defaulting to `Optional`.
    pub fn assignment(&self, path: &str) -> Assignment {
        self.key_attrs(path)
            .and_then(|a| a.get(attrs::ASSIGNMENT))
            .and_then(Value::as_i64)
            .map_or(Assignment::Optional, Assignment::from_code)
    }

    /// Required access level of the key at `path`.
    pub fn required_access_level(&self, path: &str) -> AccessLevel {
        self.key_attrs(path)
            .map_or(AccessLevel::Observer, AccessLevel::from_attrs)
    }

    /// Default value of the key at `path`, when declared.
    pub fn default_value(&self, path: &str) -> Option<&Value> {
        self.key_attrs(path)?.get(attrs::DEFAULT_VALUE)
    }

    /// Allowed discrete values of the key at `path`, when declared.
    pub fn options(&self, path: &str) -> Option<&Value> {
        self.key_attrs(path)?.get(attrs::OPTIONS)
    }

    /// Numeric limits of the key at `path`.
    pub fn limits(&self, path: &str) -> Limits {
        self.key_attrs(path).map_or_else(Limits::default, Limits::from_attrs)
    }

    /// Alarm thresholds of the key at `path`.
    pub fn alarms(&self, path: &str) -> AlarmThresholds {
        self.key_attrs(path)
            .map_or_else(AlarmThresholds::default, AlarmThresholds::from_attrs)
    }

    /// States in which the key at `path` may be written; empty means all.
    pub fn allowed_states(&self, path: &str) -> Vec<String> {
        self.key_attrs(path)
            .and_then(|a| a.get(attrs::ALLOWED_STATES))
            .and_then(Value::as_str_vec)
            .map(<[String]>::to_vec)
            .unwrap_or_default()
    }

    /// Unit label combining metric prefix and unit symbol, e.g. `mA`.
    pub fn unit_label(&self, path: &str) -> String {
        let attrs = match self.key_attrs(path) {
            Some(a) => a,
            None => return String::new(),
        };
        let prefix = attrs
            .get(attrs_keys::METRIC_PREFIX_SYMBOL)
            .and_then(Value::as_str)
            .unwrap_or("");
        let unit = attrs
            .get(attrs_keys::UNIT_SYMBOL)
            .and_then(Value::as_str)
            .unwrap_or("");
        format!("{prefix}{unit}")
    }
}

/// Builder for assembling schema payloads key by key, mainly for tests and
/// local class templates.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    class_id: String,
    hash: Hash,
}

impl SchemaBuilder {
    /// Start a schema for `class_id`.
    pub fn new(class_id: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder { class_id: class_id.into(), hash: Hash::new() }
    }

    /// Declare a grouping node.
    pub fn node(mut self, path: &str) -> SchemaBuilder {
        self.hash.set(path, Hash::new());
        let _ = self
            .hash
            .set_attribute(path, attrs::NODE_TYPE, Value::Int32(NodeKind::Node.code()));
        self
    }

    /// Declare a typed leaf.
    pub fn leaf(self, path: &str, kind: ValueKind) -> SchemaBuilder {
        self.leaf_of(path, NodeKind::Leaf, kind)
    }

    /// Declare a leaf with an explicit node kind (array, table, ...).
    pub fn leaf_of(mut self, path: &str, node: NodeKind, kind: ValueKind) -> SchemaBuilder {
        self.hash.set(path, Hash::new());
        let _ = self
            .hash
            .set_attribute(path, attrs::NODE_TYPE, Value::Int32(node.code()));
        let _ = self
            .hash
            .set_attribute(path, attrs::VALUE_TYPE, Value::String(kind.to_string()));
        self
    }

    /// Attach an arbitrary attribute to the most relevant key.
    pub fn attr(mut self, path: &str, name: &str, value: impl Into<Value>) -> SchemaBuilder {
        let _ = self.hash.set_attribute(path, name, value);
        self
    }

    /// Attach a default value.
    pub fn default_value(self, path: &str, value: impl Into<Value>) -> SchemaBuilder {
        self.attr(path, attrs::DEFAULT_VALUE, value)
    }

    /// Attach an access mode.
    pub fn access(self, path: &str, mode: AccessMode) -> SchemaBuilder {
        self.attr(path, attrs::ACCESS_MODE, Value::Int32(mode.code()))
    }

    /// Attach an assignment.
    pub fn assignment(self, path: &str, assignment: Assignment) -> SchemaBuilder {
        self.attr(path, attrs::ASSIGNMENT, Value::Int32(assignment.code()))
    }

    /// Attach a required access level.
    pub fn required_level(self, path: &str, level: AccessLevel) -> SchemaBuilder {
        self.attr(path, attrs::REQUIRED_ACCESS_LEVEL, Value::Int32(level.code()))
    }

    /// Attach inclusive limits.
    pub fn limits_inc(self, path: &str, min: f64, max: f64) -> SchemaBuilder {
        self.attr(path, attrs::MIN_INC, min).attr(path, attrs::MAX_INC, max)
    }

    /// Finish the schema.
    pub fn build(self) -> Schema {
        Schema { class_id: self.class_id, hash: self.hash }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Schema {
        SchemaBuilder::new("Motor")
            .leaf("speed", ValueKind::Double)
            .default_value("speed", 1.5)
            .access("speed", AccessMode::Write)
            .limits_inc("speed", 0.0, 10.0)
            .attr("speed", attrs::UNIT_SYMBOL, "m/s")
            .node("axis")
            .leaf("axis.position", ValueKind::Double)
            .access("axis.position", AccessMode::Read)
            .leaf("name", ValueKind::String)
            .required_level("name", AccessLevel::Expert)
            .build()
    }

    #[test]
    fn leaf_metadata_round_trip() {
        let schema = sample();
        assert_eq!(schema.class_id(), "Motor");
        assert_eq!(schema.node_kind("speed"), Some(NodeKind::Leaf));
        assert_eq!(schema.value_kind("speed"), Some(ValueKind::Double));
        assert_eq!(schema.access_mode("speed"), AccessMode::Write);
        assert_eq!(schema.default_value("speed"), Some(&Value::Double(1.5)));
        assert_eq!(schema.unit_label("speed"), "m/s");
    }

    #[test]
    fn nested_nodes_have_node_kind() {
        let schema = sample();
        assert_eq!(schema.node_kind("axis"), Some(NodeKind::Node));
        assert_eq!(schema.access_mode("axis.position"), AccessMode::Read);
    }

    #[test]
    fn access_level_ordering() {
        assert!(AccessLevel::Observer < AccessLevel::User);
        assert!(AccessLevel::Expert < AccessLevel::Admin);
        let schema = sample();
        assert_eq!(schema.required_access_level("name"), AccessLevel::Expert);
        assert_eq!(schema.required_access_level("speed"), AccessLevel::Observer);
    }

    #[test]
    fn limits_contains_and_describe() {
        let schema = sample();
        let limits = schema.limits("speed");
        assert!(limits.contains(0.0) && limits.contains(10.0));
        assert!(!limits.contains(-0.1) && !limits.contains(10.1));
        assert_eq!(limits.describe(), "[0, 10]");

        let exc = Limits { min_exc: Some(0.0), max_exc: Some(1.0), ..Limits::default() };
        assert!(!exc.contains(0.0) && !exc.contains(1.0) && exc.contains(0.5));
        assert_eq!(exc.describe(), "(0, 1)");
    }
}
