//! Error types for the topology runtime.
//!
//! `TopologyError` consolidates every failure the runtime can surface, from
//! container path lookups to identity bookkeeping. Bulk operations
//! (configuration / schema application) never return these directly; they
//! accumulate per-path failures in a returned hash instead. Single-key
//! operations fail loudly with one of the variants below.

use thiserror::Error;

/// Convenience alias for results using the runtime error type.
pub type TopologyResult<T> = std::result::Result<T, TopologyError>;

/// Primary error type of the crate.
///
/// # Propagation rules
///
/// - Path lookups in the hierarchical container fail with [`NotFound`].
/// - Value coercion failures surface as [`TypeMismatch`]; schema limit
///   violations as [`OutOfRange`]. Bulk appliers catch both and record them
///   as failed paths instead of propagating.
/// - [`MissingIdentity`] is returned when a project device is requested
///   without a full `(server, class)` identity.
/// - [`UnknownServer`] / [`UnknownClass`] mark gateway responses that
///   reference vanished entities; callers discard these with a logged
///   warning.
///
/// [`NotFound`]: TopologyError::NotFound
/// [`TypeMismatch`]: TopologyError::TypeMismatch
/// [`OutOfRange`]: TopologyError::OutOfRange
/// [`MissingIdentity`]: TopologyError::MissingIdentity
/// [`UnknownServer`]: TopologyError::UnknownServer
/// [`UnknownClass`]: TopologyError::UnknownClass
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TopologyError {
    /// A dotted path is not present in a container or binding.
    #[error("path '{path}' not found")]
    NotFound {
        /// The dotted path that failed to resolve.
        path: String,
    },

    /// A value could not be coerced to the type required by the schema.
    #[error("type mismatch at '{path}': expected {expected}, got {got}")]
    TypeMismatch {
        /// The dotted path of the offending leaf.
        path: String,
        /// The type the schema requires.
        expected: String,
        /// The type that was supplied.
        got: String,
    },

    /// A value violates the schema's min/max limits.
    #[error("value out of range at '{path}': bounds {bounds}, got {got}")]
    OutOfRange {
        /// The dotted path of the offending leaf.
        path: String,
        /// Human-readable bounds description, e.g. `[0, 100)`.
        bounds: String,
        /// The supplied value, rendered.
        got: String,
    },

    /// A device changed class while a project expects a specific class.
    /// Surfaced to users as the `Incompatible` proxy status.
    #[error("schema incompatible for '{device_id}': project expects class '{expected_class}', device is '{actual_class}'")]
    SchemaIncompatible {
        /// The device whose class changed.
        device_id: String,
        /// The class the project was built against.
        expected_class: String,
        /// The class the online device reports.
        actual_class: String,
    },

    /// A project device was requested without a full identity.
    #[error("project device '{device_id}' requested without server_id or class_id")]
    MissingIdentity {
        /// The incompletely identified device.
        device_id: String,
    },

    /// A rename would collide with an existing project device.
    #[error("project device rename collides with existing id '{device_id}'")]
    DuplicateIdentity {
        /// The colliding device id.
        device_id: String,
    },

    /// A gateway response references a server that has vanished.
    #[error("unknown server '{server_id}'")]
    UnknownServer {
        /// The vanished server id.
        server_id: String,
    },

    /// A gateway response references a class that has vanished.
    #[error("unknown class '{class_id}' on server '{server_id}'")]
    UnknownClass {
        /// The hosting server id.
        server_id: String,
        /// The vanished class id.
        class_id: String,
    },
}

impl TopologyError {
    /// Shorthand for a [`TopologyError::NotFound`] at `path`.
    pub fn not_found(path: impl Into<String>) -> Self {
        TopologyError::NotFound { path: path.into() }
    }

    /// Shorthand for a [`TopologyError::TypeMismatch`] at `path`.
    pub fn type_mismatch(
        path: impl Into<String>,
        expected: impl Into<String>,
        got: impl Into<String>,
    ) -> Self {
        TopologyError::TypeMismatch {
            path: path.into(),
            expected: expected.into(),
            got: got.into(),
        }
    }
}
