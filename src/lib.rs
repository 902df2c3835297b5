//! `control-topology`
//!
//! Client-side topology mirror and device-proxy runtime for distributed
//! control systems.
//!
//! The crate tracks a remote installation of device servers and device
//! instances through a local *system-hash mirror*, folds that mirror into
//! two navigation trees, and hands out long-lived proxies that views and
//! editors can bind to. Schemas describe device classes; *bindings* are
//! their live, typed per-device mirrors carrying values, timestamps and
//! pending user edits.
//!
//! ## Key Types
//!
//! - [`Hash`]: insertion-ordered hierarchical attribute container, the
//!   universal payload of the ingest protocol
//! - [`Schema`]: immutable class description with per-key attributes
//! - [`BindingRoot`]: live typed instance of a schema
//! - [`SystemTopology`]: the coordinator owning mirror, trees, schema
//!   cache and proxy tables
//! - [`DeviceProxy`] / [`DeviceClassProxy`] / [`ProjectDeviceProxy`]: the
//!   three proxy variants views hold onto
//! - [`ProjectDeviceInstance`]: stable identity bridging the online and
//!   offline views of one project device
//!
//! ## Threading
//!
//! Everything is meant to run on one logical coordinator thread. Gateway
//! submissions are non-blocking; results come back through the ingest
//! handlers on [`SystemTopology`]. Event-channel callbacks are delivered
//! synchronously and must not block.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use control_topology::{NullGateway, SystemTopology};
//!
//! let topology = SystemTopology::new(Arc::new(NullGateway));
//! let proxy = topology.get_class("cntrl-server-1", "ScanController");
//! proxy.status_update.subscribe(|status| println!("class proxy: {status}"));
//! ```

pub mod binding;
pub mod error;
pub mod event;
pub mod gateway;
pub mod hash;
pub mod project_device;
pub mod proxy;
pub mod schema;
pub mod timestamp;
pub mod topology;

pub use binding::{build_binding, BindingNode, BindingRoot};
pub use error::{TopologyError, TopologyResult};
pub use event::{EventChannel, Subscription};
pub use gateway::{GatewayCall, NullGateway, RecordingGateway, RequestGateway};
pub use hash::{Attributes, Hash, MergePolicy, NdArray, Value, ValueKind};
pub use project_device::{ActiveProxy, ProjectDeviceInstance};
pub use proxy::{
    DeviceClassProxy, DeviceProxy, HistoricData, ProjectDeviceProxy, ProxyStatus,
};
pub use schema::{AccessLevel, AccessMode, Assignment, NodeKind, Schema, SchemaBuilder};
pub use timestamp::Timestamp;
pub use topology::{
    GoneDevice, GoneServer, NodeHandle, SystemTopology, TopologyChanges, TreeUpdateListener,
};
