//! Device, class and project-device proxies.
//!
//! A proxy is the stable object a view holds onto for one remote identity.
//! Its binding, status and identity fields are interior-mutable so the
//! coordinator can update them in place while consumers keep their
//! references. All notification flows through the typed event channels on
//! each proxy.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::binding::{self, BindingRoot};
use crate::event::EventChannel;
use crate::gateway::RequestGateway;
use crate::hash::{Hash, Value};
use crate::schema::Schema;
use crate::topology::NodeHandle;

/// Lifecycle status shared by all proxy variants. Each variant only moves
/// through the subset that makes sense for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProxyStatus {
    /// Not currently present in the topology.
    #[default]
    Offline,
    /// A schema request is in flight.
    Requested,
    /// The device is alive but its schema has not arrived yet.
    Online,
    /// The device is alive and its schema has been applied.
    Schema,
    /// A class or project proxy with a filled binding.
    Ok,
    /// The online class does not match the class a project expects.
    Incompatible,
    /// The server a project device lives on is gone.
    NoServer,
    /// The server is alive but does not provide the class.
    NoPlugin,
}

impl ProxyStatus {
    /// True for the statuses that mean the remote device is reachable.
    pub fn is_online(self) -> bool {
        matches!(self, ProxyStatus::Online | ProxyStatus::Schema)
    }
}

impl fmt::Display for ProxyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProxyStatus::Offline => "offline",
            ProxyStatus::Requested => "requested",
            ProxyStatus::Online => "online",
            ProxyStatus::Schema => "schema",
            ProxyStatus::Ok => "ok",
            ProxyStatus::Incompatible => "incompatible",
            ProxyStatus::NoServer => "noserver",
            ProxyStatus::NoPlugin => "noplugin",
        };
        f.write_str(name)
    }
}

/// A batch of archived samples for one property, relayed to plot
/// consumers.
#[derive(Debug, Clone)]
pub struct HistoricData {
    /// Dotted property path the samples belong to.
    pub path: String,
    /// One container per archived point.
    pub samples: Vec<Hash>,
}

// ---------------------------------------------------------------------------
// Online device proxy

/// Proxy for a device currently known to the topology.
pub struct DeviceProxy {
    device_id: String,
    server_id: RwLock<String>,
    class_id: RwLock<String>,
    binding: RwLock<BindingRoot>,
    status: RwLock<ProxyStatus>,
    schema_requested: Mutex<bool>,
    monitor_count: Mutex<u32>,
    topology_node: Mutex<Option<NodeHandle>>,
    gateway: Arc<dyn RequestGateway>,
    /// Fired after remote values were applied to the binding.
    pub config_update: EventChannel<()>,
    /// Fired after the binding was rebuilt from a new schema.
    pub schema_update: EventChannel<()>,
    /// Fired on every status change, with the new status.
    pub status_update: EventChannel<ProxyStatus>,
    /// Archived property samples, relayed in-band.
    pub historic_data: EventChannel<HistoricData>,
}

impl DeviceProxy {
    pub fn new(device_id: impl Into<String>, gateway: Arc<dyn RequestGateway>) -> Arc<Self> {
        Arc::new(DeviceProxy {
            device_id: device_id.into(),
            server_id: RwLock::new(String::new()),
            class_id: RwLock::new(String::new()),
            binding: RwLock::new(BindingRoot::default()),
            status: RwLock::new(ProxyStatus::Offline),
            schema_requested: Mutex::new(false),
            monitor_count: Mutex::new(0),
            topology_node: Mutex::new(None),
            gateway,
            config_update: EventChannel::new(),
            schema_update: EventChannel::new(),
            status_update: EventChannel::new(),
            historic_data: EventChannel::new(),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn server_id(&self) -> String {
        self.server_id.read().clone()
    }

    pub fn set_server_id(&self, server_id: impl Into<String>) {
        *self.server_id.write() = server_id.into();
    }

    pub fn class_id(&self) -> String {
        self.class_id.read().clone()
    }

    pub fn set_class_id(&self, class_id: impl Into<String>) {
        *self.class_id.write() = class_id.into();
    }

    pub fn binding(&self) -> RwLockReadGuard<'_, BindingRoot> {
        self.binding.read()
    }

    pub fn binding_mut(&self) -> RwLockWriteGuard<'_, BindingRoot> {
        self.binding.write()
    }

    pub fn status(&self) -> ProxyStatus {
        *self.status.read()
    }

    /// Set the status and notify subscribers when it actually changed.
    pub fn set_status(&self, status: ProxyStatus) {
        let changed = {
            let mut current = self.status.write();
            let changed = *current != status;
            *current = status;
            changed
        };
        if changed {
            debug!(device_id = %self.device_id, %status, "device proxy status");
            self.status_update.emit(&status);
        }
    }

    pub fn is_online(&self) -> bool {
        self.status().is_online()
    }

    pub fn topology_node(&self) -> Option<NodeHandle> {
        *self.topology_node.lock()
    }

    pub fn set_topology_node(&self, handle: Option<NodeHandle>) {
        *self.topology_node.lock() = handle;
    }

    /// Whether a device-schema request is already in flight.
    pub fn schema_requested(&self) -> bool {
        *self.schema_requested.lock()
    }

    pub fn set_schema_requested(&self, requested: bool) {
        *self.schema_requested.lock() = requested;
    }

    /// Ask the gateway for a fresh schema unless one is already pending.
    pub fn refresh_schema(&self) {
        let mut requested = self.schema_requested.lock();
        if !*requested {
            *requested = true;
            self.gateway.request_device_schema(&self.device_id);
        }
    }

    pub fn monitor_count(&self) -> u32 {
        *self.monitor_count.lock()
    }

    /// Reference-counted subscription to live updates; the first monitor
    /// subscribes upstream.
    pub fn add_monitor(&self) {
        let mut count = self.monitor_count.lock();
        *count += 1;
        if *count == 1 {
            self.gateway.start_monitoring(&self.device_id);
        }
    }

    /// Drop one monitor; the last one unsubscribes upstream.
    pub fn remove_monitor(&self) {
        let mut count = self.monitor_count.lock();
        debug_assert!(*count > 0, "monitor count underflow for {}", self.device_id);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.gateway.stop_monitoring(&self.device_id);
        }
    }

    /// Send pending writable edits upstream and clear them.
    pub fn flush_edits(&self, schema: &Schema) {
        let changes: Vec<_> = {
            let binding = self.binding.read();
            // Flatten to dotted paths; intermediate containers are not
            // properties themselves.
            binding::extract_online_edits(schema, &binding)
                .iter_all()
                .into_iter()
                .filter(|(_, value, _)| !matches!(value, Value::Hash(_)))
                .map(|(path, value, _)| (format!("{}.{path}", self.device_id), value.clone()))
                .collect()
        };
        if changes.is_empty() {
            return;
        }
        self.gateway.send_property_changes(&changes);
        self.decline_changes();
    }

    /// Revert every pending edit and let views repaint from the remote
    /// values.
    pub fn decline_changes(&self) {
        {
            let mut binding = self.binding.write();
            binding.visit_value_nodes_mut(|_, node| node.revert_edit());
        }
        self.config_update.emit(&());
    }
}

impl fmt::Debug for DeviceProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceProxy")
            .field("device_id", &self.device_id)
            .field("status", &self.status())
            .field("monitor_count", &self.monitor_count())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Class proxy

/// Per-server template proxy for a device class.
pub struct DeviceClassProxy {
    server_id: String,
    class_id: String,
    binding: RwLock<BindingRoot>,
    status: RwLock<ProxyStatus>,
    gateway: Arc<dyn RequestGateway>,
    pub config_update: EventChannel<()>,
    pub schema_update: EventChannel<()>,
    pub status_update: EventChannel<ProxyStatus>,
}

impl DeviceClassProxy {
    pub fn new(
        server_id: impl Into<String>,
        class_id: impl Into<String>,
        gateway: Arc<dyn RequestGateway>,
    ) -> Arc<Self> {
        let class_id = class_id.into();
        Arc::new(DeviceClassProxy {
            server_id: server_id.into(),
            binding: RwLock::new(BindingRoot::new(class_id.clone())),
            class_id,
            status: RwLock::new(ProxyStatus::Offline),
            gateway,
            config_update: EventChannel::new(),
            schema_update: EventChannel::new(),
            status_update: EventChannel::new(),
        })
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn class_id(&self) -> &str {
        &self.class_id
    }

    pub fn binding(&self) -> RwLockReadGuard<'_, BindingRoot> {
        self.binding.read()
    }

    pub fn binding_mut(&self) -> RwLockWriteGuard<'_, BindingRoot> {
        self.binding.write()
    }

    pub fn status(&self) -> ProxyStatus {
        *self.status.read()
    }

    pub fn set_status(&self, status: ProxyStatus) {
        let changed = {
            let mut current = self.status.write();
            let changed = *current != status;
            *current = status;
            changed
        };
        if changed {
            self.status_update.emit(&status);
        }
    }

    /// Re-request the class schema when the binding is still empty.
    pub fn refresh_schema(&self) {
        if self.binding.read().is_empty() {
            self.set_status(ProxyStatus::Requested);
            self.gateway.request_class_schema(&self.server_id, &self.class_id);
        }
    }
}

impl fmt::Debug for DeviceClassProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceClassProxy")
            .field("server_id", &self.server_id)
            .field("class_id", &self.class_id)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Project offline proxy

/// Offline stand-in for one project device on a specific server and class.
pub struct ProjectDeviceProxy {
    device_id: RwLock<String>,
    server_id: String,
    class_id: String,
    binding: RwLock<BindingRoot>,
    status: RwLock<ProxyStatus>,
    pub config_update: EventChannel<()>,
    pub schema_update: EventChannel<()>,
    pub status_update: EventChannel<ProxyStatus>,
}

impl ProjectDeviceProxy {
    pub fn new(
        device_id: impl Into<String>,
        server_id: impl Into<String>,
        class_id: impl Into<String>,
    ) -> Arc<Self> {
        let class_id = class_id.into();
        Arc::new(ProjectDeviceProxy {
            device_id: RwLock::new(device_id.into()),
            server_id: server_id.into(),
            binding: RwLock::new(BindingRoot::new(class_id.clone())),
            class_id,
            status: RwLock::new(ProxyStatus::Offline),
            config_update: EventChannel::new(),
            schema_update: EventChannel::new(),
            status_update: EventChannel::new(),
        })
    }

    pub fn device_id(&self) -> String {
        self.device_id.read().clone()
    }

    /// Retarget this proxy to a renamed device.
    pub fn set_device_id(&self, device_id: impl Into<String>) {
        *self.device_id.write() = device_id.into();
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn class_id(&self) -> &str {
        &self.class_id
    }

    pub fn binding(&self) -> RwLockReadGuard<'_, BindingRoot> {
        self.binding.read()
    }

    pub fn binding_mut(&self) -> RwLockWriteGuard<'_, BindingRoot> {
        self.binding.write()
    }

    pub fn status(&self) -> ProxyStatus {
        *self.status.read()
    }

    pub fn set_status(&self, status: ProxyStatus) {
        let changed = {
            let mut current = self.status.write();
            let changed = *current != status;
            *current = status;
            changed
        };
        if changed {
            self.status_update.emit(&status);
        }
    }
}

impl fmt::Debug for ProjectDeviceProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectDeviceProxy")
            .field("device_id", &self.device_id())
            .field("server_id", &self.server_id)
            .field("class_id", &self.class_id)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
