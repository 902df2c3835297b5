//! Typed live mirrors of device schemas.
//!
//! A binding tree is the per-device instance of a schema: the tree shape
//! and attributes come from the schema, while values, pending edits and
//! timestamps are instance state. Construction lives in [`builder`], bulk
//! value transfer in [`config`].

pub mod builder;
pub mod config;
pub mod types;

pub use builder::build_binding;
pub use config::{
    apply_configuration, apply_default_configuration, apply_fast_data,
    apply_project_configuration, coerce_value, extract_configuration, extract_edits,
    extract_init_configuration, extract_online_edits,
};
pub use types::{BindingNode, BindingRoot};
