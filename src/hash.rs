//! The hierarchical attribute container.
//!
//! [`Hash`] is the carrying form for every message that crosses the ingest
//! boundary: topology fragments, configurations, schema payloads. It is an
//! insertion-ordered map from string keys to tagged [`Value`]s, where each
//! key additionally carries a small map of attributes. Dotted keys address
//! nested containers, so `h.get("a.b.c")` dereferences through the nested
//! hashes `a` and `b`.
//!
//! Cloning is deep by construction: values own their data and attribute maps
//! are plain maps, so two keys never share an attribute map by reference.

use bytes::Bytes;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{TopologyError, TopologyResult};

/// Attribute map attached to a single container key.
pub type Attributes = IndexMap<String, Value>;

/// Discriminant of a [`Value`], used for schema typing and coercion errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// Boolean scalar.
    Bool,
    /// Signed 8-bit integer.
    Int8,
    /// Unsigned 8-bit integer.
    UInt8,
    /// Signed 16-bit integer.
    Int16,
    /// Unsigned 16-bit integer.
    UInt16,
    /// Signed 32-bit integer.
    Int32,
    /// Unsigned 32-bit integer.
    UInt32,
    /// Signed 64-bit integer.
    Int64,
    /// Unsigned 64-bit integer.
    UInt64,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// UTF-8 string.
    String,
    /// Vector of booleans.
    VectorBool,
    /// Vector of signed 32-bit integers.
    VectorInt32,
    /// Vector of signed 64-bit integers.
    VectorInt64,
    /// Vector of unsigned 64-bit integers.
    VectorUInt64,
    /// Vector of 64-bit floats.
    VectorDouble,
    /// Vector of strings.
    VectorString,
    /// Nested container.
    Hash,
    /// Vector of containers (table rows).
    VectorHash,
    /// N-dimensional array descriptor.
    NdArray,
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// N-dimensional array descriptor: element type, shape and an opaque byte
/// buffer. The core never interprets the buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NdArray {
    /// Element type of the array.
    pub element: ValueKind,
    /// Dimension sizes, outermost first.
    pub shape: Vec<u64>,
    /// Raw element bytes in wire order.
    pub data: Bytes,
}

/// A tagged container value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Boolean scalar.
    Bool(bool),
    /// Signed 8-bit integer.
    Int8(i8),
    /// Unsigned 8-bit integer.
    UInt8(u8),
    /// Signed 16-bit integer.
    Int16(i16),
    /// Unsigned 16-bit integer.
    UInt16(u16),
    /// Signed 32-bit integer.
    Int32(i32),
    /// Unsigned 32-bit integer.
    UInt32(u32),
    /// Signed 64-bit integer.
    Int64(i64),
    /// Unsigned 64-bit integer.
    UInt64(u64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Vector of booleans.
    VectorBool(Vec<bool>),
    /// Vector of signed 32-bit integers.
    VectorInt32(Vec<i32>),
    /// Vector of signed 64-bit integers.
    VectorInt64(Vec<i64>),
    /// Vector of unsigned 64-bit integers.
    VectorUInt64(Vec<u64>),
    /// Vector of 64-bit floats.
    VectorDouble(Vec<f64>),
    /// Vector of strings.
    VectorString(Vec<String>),
    /// Nested container.
    Hash(Hash),
    /// Vector of containers (table rows).
    VectorHash(Vec<Hash>),
    /// N-dimensional array descriptor.
    NdArray(NdArray),
}

impl Value {
    /// The discriminant of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::Int8(_) => ValueKind::Int8,
            Value::UInt8(_) => ValueKind::UInt8,
            Value::Int16(_) => ValueKind::Int16,
            Value::UInt16(_) => ValueKind::UInt16,
            Value::Int32(_) => ValueKind::Int32,
            Value::UInt32(_) => ValueKind::UInt32,
            Value::Int64(_) => ValueKind::Int64,
            Value::UInt64(_) => ValueKind::UInt64,
            Value::Float(_) => ValueKind::Float,
            Value::Double(_) => ValueKind::Double,
            Value::String(_) => ValueKind::String,
            Value::VectorBool(_) => ValueKind::VectorBool,
            Value::VectorInt32(_) => ValueKind::VectorInt32,
            Value::VectorInt64(_) => ValueKind::VectorInt64,
            Value::VectorUInt64(_) => ValueKind::VectorUInt64,
            Value::VectorDouble(_) => ValueKind::VectorDouble,
            Value::VectorString(_) => ValueKind::VectorString,
            Value::Hash(_) => ValueKind::Hash,
            Value::VectorHash(_) => ValueKind::VectorHash,
            Value::NdArray(_) => ValueKind::NdArray,
        }
    }

    /// Boolean view.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Signed integer view; any integer width widens losslessly.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int8(v) => Some(i64::from(*v)),
            Value::UInt8(v) => Some(i64::from(*v)),
            Value::Int16(v) => Some(i64::from(*v)),
            Value::UInt16(v) => Some(i64::from(*v)),
            Value::Int32(v) => Some(i64::from(*v)),
            Value::UInt32(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            Value::UInt64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Unsigned integer view; negative values yield `None`.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt8(v) => Some(u64::from(*v)),
            Value::UInt16(v) => Some(u64::from(*v)),
            Value::UInt32(v) => Some(u64::from(*v)),
            Value::UInt64(v) => Some(*v),
            other => other.as_i64().and_then(|v| u64::try_from(v).ok()),
        }
    }

    /// Floating point view; integers widen.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(f64::from(*v)),
            Value::Double(v) => Some(*v),
            Value::UInt64(v) => Some(*v as f64),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// String view.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// String-vector view.
    pub fn as_str_vec(&self) -> Option<&[String]> {
        match self {
            Value::VectorString(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    /// Nested container view.
    pub fn as_hash(&self) -> Option<&Hash> {
        match self {
            Value::Hash(h) => Some(h),
            _ => None,
        }
    }

    /// Mutable nested container view.
    pub fn as_hash_mut(&mut self) -> Option<&mut Hash> {
        match self {
            Value::Hash(h) => Some(h),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<Hash> for Value {
    fn from(v: Hash) -> Self {
        Value::Hash(v)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::VectorString(v)
    }
}

/// Policy for [`Hash::merge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Duplicate keys are overwritten wholesale.
    Replace,
    /// Shared nested containers are merged recursively.
    Merge,
}

/// One entry of a [`Hash`]: a value plus its attribute map.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
struct HashEntry {
    value: Value,
    attributes: Attributes,
}

impl Default for Value {
    fn default() -> Self {
        Value::Hash(Hash::new())
    }
}

/// Insertion-ordered hierarchical attribute container.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Hash {
    entries: IndexMap<String, HashEntry>,
}

impl Hash {
    /// An empty container.
    pub fn new() -> Self {
        Hash { entries: IndexMap::new() }
    }

    /// True when the container holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of direct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Remove all keys.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// True when `path` resolves to an entry.
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_ok()
    }

    /// Resolve the value at a dotted `path`.
    ///
    /// Dereferencing through a missing intermediate key fails with
    /// [`TopologyError::NotFound`].
    pub fn get(&self, path: &str) -> TopologyResult<&Value> {
        self.entry(path).map(|e| &e.value)
    }

    /// Resolve the value at `path`, `None` when absent.
    pub fn get_opt(&self, path: &str) -> Option<&Value> {
        self.entry(path).ok().map(|e| &e.value)
    }

    /// Mutable value access at a dotted `path`.
    pub fn get_mut(&mut self, path: &str) -> TopologyResult<&mut Value> {
        self.entry_mut(path).map(|e| &mut e.value)
    }

    /// Attribute map of the entry at `path`.
    pub fn attributes(&self, path: &str) -> TopologyResult<&Attributes> {
        self.entry(path).map(|e| &e.attributes)
    }

    /// Mutable attribute map of the entry at `path`.
    pub fn attributes_mut(&mut self, path: &str) -> TopologyResult<&mut Attributes> {
        self.entry_mut(path).map(|e| &mut e.attributes)
    }

    /// One attribute of the entry at `path`.
    pub fn get_attribute(&self, path: &str, name: &str) -> TopologyResult<&Value> {
        self.attributes(path)?
            .get(name)
            .ok_or_else(|| TopologyError::not_found(format!("{path}@{name}")))
    }

    /// Set one attribute on the entry at `path`.
    pub fn set_attribute(
        &mut self,
        path: &str,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> TopologyResult<()> {
        self.attributes_mut(path)?.insert(name.into(), value.into());
        Ok(())
    }

    /// Set the value at a dotted `path`, lazily constructing missing
    /// intermediate containers. Existing attributes at `path` are kept.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) {
        let entry = self.entry_or_create(path);
        entry.value = value.into();
    }

    /// Set value and attributes at `path` in one step.
    pub fn set_with_attrs(&mut self, path: &str, value: impl Into<Value>, attrs: Attributes) {
        let entry = self.entry_or_create(path);
        entry.value = value.into();
        entry.attributes = attrs;
    }

    /// Chainable form of [`set`](Hash::set), for building literals.
    pub fn with(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.set(path, value);
        self
    }

    /// Remove the entry at `path`, returning its value.
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        match path.rsplit_once('.') {
            None => self.entries.shift_remove(path).map(|e| e.value),
            Some((parent, leaf)) => {
                let hash = self.get_mut(parent).ok()?.as_hash_mut()?;
                hash.entries.shift_remove(leaf).map(|e| e.value)
            }
        }
    }

    /// Iterate direct entries as `(key, value, attributes)` in insertion
    /// order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value, &Attributes)> {
        self.entries.iter().map(|(k, e)| (k.as_str(), &e.value, &e.attributes))
    }

    /// Direct keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Recursively iterate every entry as `(dotted_path, value, attributes)`
    /// in depth-first insertion order. Nested containers are yielded before
    /// their children.
    pub fn iter_all(&self) -> Vec<(String, &Value, &Attributes)> {
        let mut out = Vec::new();
        self.collect_all("", &mut out);
        out
    }

    /// Merge `other` into `self` under the given policy.
    ///
    /// Pre-existing keys keep their insertion position; new keys are
    /// appended in encounter order. Under [`MergePolicy::Merge`], entries
    /// that are nested containers on both sides are merged recursively;
    /// everything else is overwritten. Attributes from `other` overwrite
    /// per-name.
    pub fn merge(&mut self, other: &Hash, policy: MergePolicy) {
        for (key, entry) in &other.entries {
            match self.entries.get_mut(key) {
                Some(existing) => {
                    let recurse = policy == MergePolicy::Merge
                        && matches!(existing.value, Value::Hash(_))
                        && matches!(entry.value, Value::Hash(_));
                    if recurse {
                        if let (Value::Hash(dst), Value::Hash(src)) =
                            (&mut existing.value, &entry.value)
                        {
                            dst.merge(src, policy);
                        }
                    } else {
                        existing.value = entry.value.clone();
                    }
                    for (name, attr) in &entry.attributes {
                        existing.attributes.insert(name.clone(), attr.clone());
                    }
                }
                None => {
                    self.entries.insert(key.clone(), entry.clone());
                }
            }
        }
    }

    // -- internals ---------------------------------------------------------

    fn entry(&self, path: &str) -> TopologyResult<&HashEntry> {
        let mut current = &self.entries;
        let mut parts = path.split('.').peekable();
        while let Some(part) = parts.next() {
            let entry = current
                .get(part)
                .ok_or_else(|| TopologyError::not_found(path))?;
            if parts.peek().is_none() {
                return Ok(entry);
            }
            current = match &entry.value {
                Value::Hash(h) => &h.entries,
                _ => return Err(TopologyError::not_found(path)),
            };
        }
        Err(TopologyError::not_found(path))
    }

    fn entry_mut(&mut self, path: &str) -> TopologyResult<&mut HashEntry> {
        let mut current = &mut self.entries;
        let mut parts = path.split('.').peekable();
        while let Some(part) = parts.next() {
            let entry = current
                .get_mut(part)
                .ok_or_else(|| TopologyError::not_found(path))?;
            if parts.peek().is_none() {
                return Ok(entry);
            }
            current = match &mut entry.value {
                Value::Hash(h) => &mut h.entries,
                _ => return Err(TopologyError::not_found(path)),
            };
        }
        Err(TopologyError::not_found(path))
    }

    fn entry_or_create(&mut self, path: &str) -> &mut HashEntry {
        let mut current = &mut self.entries;
        let mut parts = path.split('.').peekable();
        loop {
            // Paths are non-empty by construction; split always yields.
            let part = match parts.next() {
                Some(p) => p,
                None => unreachable!("empty path"),
            };
            let entry = current.entry(part.to_string()).or_default();
            if parts.peek().is_none() {
                return entry;
            }
            if !matches!(entry.value, Value::Hash(_)) {
                entry.value = Value::Hash(Hash::new());
            }
            current = match &mut entry.value {
                Value::Hash(h) => &mut h.entries,
                _ => unreachable!(),
            };
        }
    }

    fn collect_all<'a>(&'a self, base: &str, out: &mut Vec<(String, &'a Value, &'a Attributes)>) {
        for (key, entry) in &self.entries {
            let path = if base.is_empty() { key.clone() } else { format!("{base}.{key}") };
            out.push((path.clone(), &entry.value, &entry.attributes));
            if let Value::Hash(h) = &entry.value {
                h.collect_all(&path, out);
            }
        }
    }
}

impl FromIterator<(String, Value)> for Hash {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        let mut hash = Hash::new();
        for (path, value) in iter {
            hash.set(&path, value);
        }
        hash
    }
}
