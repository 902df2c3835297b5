//! The distributed-control topology runtime.
//!
//! [`SystemTopology`] keeps a local mirror of the remote instance topology,
//! two navigation trees over it, the proxy tables and the class-schema
//! cache. Everything in here runs on one logical coordinator thread: the
//! ingest handlers (`initialize`, `topology_update`, the `*_updated`
//! handlers) consume messages from the gateway, the lookup API hands out
//! shared proxies to views and editors.

pub mod arena;
pub mod device_tree;
pub mod system_tree;
pub mod update_context;

pub use arena::NodeHandle;
pub use device_tree::{DeviceTree, DeviceTreeLevel, DeviceTreeNode};
pub use system_tree::{capabilities, SystemTree, SystemTreeLevel, SystemTreeNode};
pub use update_context::{NoopListener, TreeUpdateListener};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

use crate::binding::{
    apply_configuration, apply_default_configuration, build_binding,
};
use crate::error::{TopologyError, TopologyResult};
use crate::gateway::RequestGateway;
use crate::hash::{Attributes, Hash, MergePolicy, Value};
use crate::project_device::ProjectDeviceInstance;
use crate::proxy::{
    DeviceClassProxy, DeviceProxy, HistoricData, ProjectDeviceProxy, ProxyStatus,
};
use crate::schema::Schema;

/// One bulk topology message: removals, additions and refreshes, applied in
/// that order.
#[derive(Debug, Clone, Default)]
pub struct TopologyChanges {
    pub gone: Hash,
    pub new: Hash,
    pub update: Hash,
}

/// A device that left the topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoneDevice {
    pub device_id: String,
    pub class_id: String,
}

/// A server that left the topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoneServer {
    pub server_id: String,
    pub host: String,
}

type ClassKey = (String, String);

/// Coordinator owning the mirror, the trees and all proxy tables.
pub struct SystemTopology {
    gateway: Arc<dyn RequestGateway>,
    system_hash: RwLock<Option<Hash>>,
    system_tree: RwLock<SystemTree>,
    device_tree: RwLock<DeviceTree>,
    class_proxies: RwLock<HashMap<ClassKey, Arc<DeviceClassProxy>>>,
    class_schemas: RwLock<HashMap<ClassKey, Schema>>,
    requested_class_schemas: Mutex<HashSet<ClassKey>>,
    device_proxies: RwLock<HashMap<String, Arc<DeviceProxy>>>,
    device_schemas: RwLock<HashMap<String, Schema>>,
    project_devices: RwLock<HashMap<String, Arc<ProjectDeviceInstance>>>,
    project_device_proxies:
        RwLock<HashMap<ClassKey, HashMap<String, Arc<ProjectDeviceProxy>>>>,
}

impl SystemTopology {
    /// One coordinator per logical session.
    pub fn new(gateway: Arc<dyn RequestGateway>) -> Arc<SystemTopology> {
        Arc::new(SystemTopology {
            gateway,
            system_hash: RwLock::new(None),
            system_tree: RwLock::new(SystemTree::new()),
            device_tree: RwLock::new(DeviceTree::new()),
            class_proxies: RwLock::new(HashMap::new()),
            class_schemas: RwLock::new(HashMap::new()),
            requested_class_schemas: Mutex::new(HashSet::new()),
            device_proxies: RwLock::new(HashMap::new()),
            device_schemas: RwLock::new(HashMap::new()),
            project_devices: RwLock::new(HashMap::new()),
            project_device_proxies: RwLock::new(HashMap::new()),
        })
    }

    pub fn gateway(&self) -> &Arc<dyn RequestGateway> {
        &self.gateway
    }

    /// The topology counts as online once a system hash has arrived.
    pub fn is_online(&self) -> bool {
        self.system_hash.read().is_some()
    }

    /// Attributes of a mirror path, e.g. `"device.XHQ/MOTOR/1"`.
    pub fn get_attributes(&self, path: &str) -> Option<Attributes> {
        let guard = self.system_hash.read();
        let hash = guard.as_ref()?;
        hash.attributes(path).ok().cloned()
    }

    /// Read access to the system tree.
    pub fn system_tree(&self) -> RwLockReadGuard<'_, SystemTree> {
        self.system_tree.read()
    }

    /// Read access to the device tree.
    pub fn device_tree(&self) -> RwLockReadGuard<'_, DeviceTree> {
        self.device_tree.read()
    }

    /// Register the structural-change receiver of the system tree.
    pub fn set_system_tree_listener(&self, listener: Arc<dyn TreeUpdateListener>) {
        self.system_tree.write().set_listener(listener);
    }

    /// Register the structural-change receiver of the device tree.
    pub fn set_device_tree_listener(&self, listener: Arc<dyn TreeUpdateListener>) {
        self.device_tree.write().set_listener(listener);
    }

    /// Pre-order walk of the system tree; stop early on `true`.
    pub fn visit_system_tree(&self, visitor: impl FnMut(&SystemTreeNode) -> bool) {
        self.system_tree.read().visit(visitor);
    }

    /// Pre-order walk of the device tree; stop early on `true`.
    pub fn visit_device_tree(&self, visitor: impl FnMut(&DeviceTreeNode) -> bool) {
        self.device_tree.read().visit(visitor);
    }

    /// Drop all state: mirror, trees, schemas, proxies, project devices.
    pub fn clear(&self) {
        self.clear_project_devices();
        self.system_tree.write().clear_all();
        self.device_tree.write().clear_all();
        *self.system_hash.write() = None;
        self.class_proxies.write().clear();
        self.class_schemas.write().clear();
        self.device_proxies.write().clear();
        self.device_schemas.write().clear();
        self.requested_class_schemas.lock().clear();
    }

    /// Called by the project layer when a project closes.
    pub fn clear_project_devices(&self) {
        self.project_devices.write().clear();
        self.project_device_proxies.write().clear();
    }

    // -----------------------------------------------------------------
    // Ingest protocol

    /// Replace the mirror with a full system hash and rebuild both trees.
    pub fn initialize(&self, system_hash: Hash) {
        info!(servers = count_group(&system_hash, "server"),
              devices = count_group(&system_hash, "device"),
              "topology initialized");
        self.system_tree.write().initialize(&system_hash);
        self.device_tree.write().initialize(&system_hash);
        *self.system_hash.write() = Some(system_hash);
    }

    /// Apply a bulk update, strictly `gone` before `new` before `update`.
    /// Returns the removed devices and servers for the shell.
    pub fn topology_update(&self, changes: &TopologyChanges) -> (Vec<GoneDevice>, Vec<GoneServer>) {
        let mut devices = Vec::new();
        let mut servers = Vec::new();
        if !changes.gone.is_empty() {
            let (gone_devices, gone_servers) = self.instance_gone(&changes.gone);
            devices = gone_devices;
            servers = gone_servers;
        }
        if !changes.new.is_empty() {
            self.instance_new(&changes.new);
        }
        if !changes.update.is_empty() {
            self.instance_updated(&changes.update);
        }
        (devices, servers)
    }

    /// New instances appeared. Returns ids that were already present and
    /// had to be replaced, for the shell to surface.
    pub fn instance_new(&self, system_hash: &Hash) -> Vec<String> {
        let existing = self.system_tree.write().clear_existing(system_hash);
        if !existing.is_empty() {
            warn!(ids = ?existing, "instances re-announced while already present");
        }
        self.merge_and_update(system_hash);
        self.request_server_classes(system_hash);
        existing
    }

    /// Known instances changed their attributes.
    pub fn instance_updated(&self, system_hash: &Hash) {
        self.merge_mirror(system_hash);
        self.system_tree.write().instance_update(system_hash);
        self.device_tree.write().instance_update(system_hash);
        self.update_online_device_status();
        self.request_server_classes(system_hash);
    }

    /// Instances left the topology.
    pub fn instance_gone(&self, system_hash: &Hash) -> (Vec<GoneDevice>, Vec<GoneServer>) {
        let mut devices = Vec::new();
        let mut servers = Vec::new();

        for group in ["device", "macro"] {
            let Some(gone) = system_hash.get_opt(group).and_then(Value::as_hash) else {
                continue;
            };
            for device_id in gone.keys() {
                let path = format!("{group}.{device_id}");
                let Some(attributes) = self.get_attributes(&path) else {
                    continue;
                };
                if let Some(hash) = self.system_hash.write().as_mut() {
                    hash.remove(&path);
                }
                if let Some(proxy) = self.device_proxies.read().get(device_id).cloned() {
                    proxy.set_status(ProxyStatus::Offline);
                    proxy.set_topology_node(None);
                }
                self.system_tree.write().remove_device(device_id);
                self.device_tree.write().remove_device(device_id);
                self.device_schemas.write().remove(device_id);

                let class_id = attributes
                    .get("classId")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown-class");
                devices.push(GoneDevice {
                    device_id: device_id.to_string(),
                    class_id: class_id.to_string(),
                });
            }
        }

        if let Some(gone) = system_hash.get_opt("server").and_then(Value::as_hash) {
            for server_id in gone.keys() {
                let path = format!("server.{server_id}");
                let Some(attributes) = self.get_attributes(&path) else {
                    continue;
                };
                if let Some(hash) = self.system_hash.write().as_mut() {
                    hash.remove(&path);
                }
                self.system_tree.write().remove_server(server_id);

                // Values are gone with the server; the class identity and
                // the proxy object survive for when it returns.
                let class_proxies: Vec<_> = self
                    .class_proxies
                    .read()
                    .iter()
                    .filter(|((srv, _), _)| srv == server_id)
                    .map(|(_, proxy)| proxy.clone())
                    .collect();
                for proxy in class_proxies {
                    proxy.binding_mut().clear_namespace();
                    proxy.set_status(ProxyStatus::NoServer);
                }
                self.class_schemas
                    .write()
                    .retain(|(srv, _), _| srv != server_id);
                self.requested_class_schemas
                    .lock()
                    .retain(|(srv, _)| srv != server_id);

                self.update_online_device_status();
                self.update_project_proxies_for_server(server_id);

                let host = attributes
                    .get("host")
                    .and_then(Value::as_str)
                    .unwrap_or("UNKNOWN");
                servers.push(GoneServer {
                    server_id: server_id.to_string(),
                    host: host.to_string(),
                });
            }
        }

        if let Some(gone) = system_hash.get_opt("client").and_then(Value::as_hash) {
            for client_id in gone.keys() {
                if let Some(hash) = self.system_hash.write().as_mut() {
                    hash.remove(&format!("client.{client_id}"));
                }
            }
        }

        (devices, servers)
    }

    /// A class schema arrived from the gateway.
    pub fn class_schema_updated(&self, server_id: &str, class_id: &str, schema: Schema) {
        let key = (server_id.to_string(), class_id.to_string());
        if !schema.is_empty() {
            // Cache even unrequested schemas; they speed up later use.
            self.class_schemas.write().insert(key.clone(), schema.clone());
        }

        let has_class_proxy = self.class_proxies.read().contains_key(&key);
        let has_project_proxies = self.project_device_proxies.read().contains_key(&key);
        if !has_class_proxy && !has_project_proxies {
            return;
        }
        self.requested_class_schemas.lock().remove(&key);

        // A schema whose owner already left the topology is only cached;
        // proxies keep the status the mirror dictates.
        if self.class_base_status(server_id, class_id) != ProxyStatus::Ok {
            debug!(server_id, class_id, "schema for absent server cached, not applied");
            return;
        }

        let class_proxy = if has_class_proxy {
            self.class_proxies.read().get(&key).cloned()
        } else {
            // Lazy-build a class proxy for future use.
            let proxy = DeviceClassProxy::new(server_id, class_id, self.gateway.clone());
            *proxy.binding_mut() = build_binding(&schema, None);
            apply_default_configuration(&mut proxy.binding_mut());
            proxy.set_status(ProxyStatus::Ok);
            self.class_proxies.write().insert(key.clone(), proxy.clone());
            proxy.config_update.emit(&());
            None
        };

        if let Some(proxy) = class_proxy {
            // A running server's class schema is not expected to change, so
            // a filled binding is left alone.
            if proxy.binding().is_empty() {
                let rebuilt = build_binding(&schema, Some(&proxy.binding()));
                *proxy.binding_mut() = rebuilt;
                apply_default_configuration(&mut proxy.binding_mut());
                proxy.set_status(ProxyStatus::Ok);
                proxy.schema_update.emit(&());
                proxy.config_update.emit(&());
            }
        }

        let interested: Vec<_> = self
            .project_device_proxies
            .read()
            .get(&key)
            .map(|mapping| mapping.values().cloned().collect())
            .unwrap_or_default();
        for proxy in interested {
            if proxy.binding().is_empty() {
                let rebuilt = build_binding(&schema, Some(&proxy.binding()));
                *proxy.binding_mut() = rebuilt;
                proxy.set_status(ProxyStatus::Ok);
                // No default configuration here; project devices reapply
                // their stored offline configuration on schema arrival.
                proxy.schema_update.emit(&());
            }
        }
    }

    /// A device schema arrived. Rebuilds the online binding unless the
    /// device left the topology in the meantime; then the schema is only
    /// cached.
    pub fn device_schema_updated(&self, device_id: &str, schema: Schema) -> Option<Arc<DeviceProxy>> {
        let proxy = self.device_proxies.read().get(device_id).cloned()?;
        self.device_schemas
            .write()
            .insert(device_id.to_string(), schema.clone());
        proxy.set_schema_requested(false);
        if proxy.status() == ProxyStatus::Offline {
            debug!(device_id, "schema for gone device cached, not applied");
            return None;
        }

        let rebuilt = build_binding(&schema, Some(&proxy.binding()));
        *proxy.binding_mut() = rebuilt;
        proxy.set_class_id(schema.class_id());
        proxy.set_status(ProxyStatus::Schema);
        proxy.schema_update.emit(&());
        Some(proxy)
    }

    /// A device configuration arrived. Pending user edits survive.
    pub fn device_config_updated(&self, device_id: &str, config: &Hash) -> Option<Arc<DeviceProxy>> {
        let proxy = self.device_proxies.read().get(device_id).cloned()?;
        if proxy.binding().is_empty() {
            return None;
        }
        apply_configuration(config, &mut proxy.binding_mut(), true);
        proxy.config_update.emit(&());
        Some(proxy)
    }

    /// Archived samples arrived for one property of a device.
    pub fn historic_data(&self, device_id: &str, path: &str, samples: Vec<Hash>) {
        let Some(proxy) = self.device_proxies.read().get(device_id).cloned() else {
            warn!(device_id, "historic data for unknown device discarded");
            return;
        };
        proxy
            .historic_data
            .emit(&HistoricData { path: path.to_string(), samples });
    }

    // -----------------------------------------------------------------
    // Lookup protocol

    /// The class proxy for `class_id` on `server_id`, created on first use.
    pub fn get_class(&self, server_id: &str, class_id: &str) -> Arc<DeviceClassProxy> {
        let key = (server_id.to_string(), class_id.to_string());
        if let Some(proxy) = self.class_proxies.read().get(&key) {
            return proxy.clone();
        }

        let proxy = DeviceClassProxy::new(server_id, class_id, self.gateway.clone());
        self.class_proxies.write().insert(key.clone(), proxy.clone());

        let attrs = self.get_attributes(&format!("server.{server_id}"));
        if attrs.as_ref().is_some_and(|a| server_offers_class(a, class_id)) {
            if self.requested_class_schemas.lock().insert(key) {
                proxy.refresh_schema();
            } else {
                proxy.set_status(ProxyStatus::Requested);
            }
        } else if attrs.is_none() {
            proxy.set_status(ProxyStatus::NoServer);
        } else {
            proxy.set_status(ProxyStatus::NoPlugin);
        }
        proxy
    }

    /// The online proxy for `device_id`, created on first use. With
    /// `request`, a schema is asked for when the device is in the mirror;
    /// otherwise the proxy is only marked alive.
    pub fn get_device(&self, device_id: &str, request: bool) -> Arc<DeviceProxy> {
        if let Some(proxy) = self.device_proxies.read().get(device_id) {
            return proxy.clone();
        }

        let proxy = DeviceProxy::new(device_id, self.gateway.clone());
        self.device_proxies
            .write()
            .insert(device_id.to_string(), proxy.clone());

        if let Some(attrs) = self.device_attributes(device_id) {
            proxy.set_class_id(attrs.get("classId").and_then(Value::as_str).unwrap_or(""));
            proxy.set_server_id(attrs.get("serverId").and_then(Value::as_str).unwrap_or(""));
            if request {
                proxy.refresh_schema();
                proxy.set_status(ProxyStatus::Requested);
            } else {
                proxy.set_status(ProxyStatus::Online);
            }
        }
        if let Some(node) = self.system_tree.read().get_instance_node(device_id) {
            proxy.set_topology_node(Some(node));
        }
        proxy
    }

    /// The stable project-device identity for `device_id`. A new id needs
    /// the full identity; an existing one is renamed to any non-empty new
    /// components.
    pub fn get_project_device(
        self: &Arc<Self>,
        device_id: &str,
        server_id: &str,
        class_id: &str,
        init_config: Option<&Hash>,
    ) -> TopologyResult<Arc<ProjectDeviceInstance>> {
        let existing = self.project_devices.read().get(device_id).cloned();
        match existing {
            Some(instance) => {
                instance.rename(Some(device_id), Some(server_id), Some(class_id));
                Ok(instance)
            }
            None => {
                if server_id.is_empty() || class_id.is_empty() {
                    return Err(TopologyError::MissingIdentity {
                        device_id: device_id.to_string(),
                    });
                }
                let instance =
                    ProjectDeviceInstance::new(self, device_id, server_id, class_id);
                instance.set_project_config_hash(init_config.cloned());
                self.project_devices
                    .write()
                    .insert(device_id.to_string(), instance.clone());
                Ok(instance)
            }
        }
    }

    /// Drop the stable identity for a project device, e.g. when it is
    /// removed from the project.
    pub fn delete_project_device(&self, device_id: &str) -> Option<Arc<ProjectDeviceInstance>> {
        self.project_devices.write().remove(device_id)
    }

    /// The offline proxy for one project device, created lazily with a
    /// cached schema when one is available.
    pub fn get_project_device_proxy(
        &self,
        device_id: &str,
        server_id: &str,
        class_id: &str,
    ) -> Arc<ProjectDeviceProxy> {
        let key = (server_id.to_string(), class_id.to_string());
        if let Some(proxy) = self
            .project_device_proxies
            .read()
            .get(&key)
            .and_then(|mapping| mapping.get(device_id))
        {
            return proxy.clone();
        }

        let proxy = ProjectDeviceProxy::new(device_id, server_id, class_id);
        let cached = self.class_schemas.read().get(&key).cloned();
        let base = self.class_base_status(server_id, class_id);
        if let Some(schema) = &cached {
            *proxy.binding_mut() = build_binding(schema, None);
            if base == ProxyStatus::Ok {
                proxy.set_status(ProxyStatus::Ok);
            }
        }
        self.project_device_proxies
            .write()
            .entry(key.clone())
            .or_default()
            .insert(device_id.to_string(), proxy.clone());

        if cached.is_none() {
            if base == ProxyStatus::Ok {
                proxy.set_status(ProxyStatus::Requested);
                if self.requested_class_schemas.lock().insert(key) {
                    self.gateway.request_class_schema(server_id, class_id);
                }
            } else {
                // The class is not available right now; stay `Offline` and
                // register a class proxy so a server (re)start triggers
                // the request.
                self.get_class(server_id, class_id);
            }
        }
        proxy
    }

    /// Make sure the named project proxy has a schema underway: apply the
    /// cache, or request once.
    pub fn ensure_proxy_class_schema(&self, device_id: &str, server_id: &str, class_id: &str) {
        let key = (server_id.to_string(), class_id.to_string());
        let Some(proxy) = self
            .project_device_proxies
            .read()
            .get(&key)
            .and_then(|mapping| mapping.get(device_id))
            .cloned()
        else {
            return;
        };
        if !proxy.binding().is_empty() {
            return;
        }
        let cached = self.class_schemas.read().get(&key).cloned();
        if let Some(schema) = cached {
            *proxy.binding_mut() = build_binding(&schema, None);
            if self.class_base_status(server_id, class_id) == ProxyStatus::Ok {
                proxy.set_status(ProxyStatus::Ok);
            }
            proxy.schema_update.emit(&());
        } else if self.requested_class_schemas.lock().insert(key) {
            proxy.set_status(ProxyStatus::Requested);
            self.gateway.request_class_schema(server_id, class_id);
        } else {
            proxy.set_status(ProxyStatus::Requested);
        }
    }

    /// Cached class schema, if any.
    pub fn get_schema(&self, server_id: &str, class_id: &str) -> Option<Schema> {
        self.class_schemas
            .read()
            .get(&(server_id.to_string(), class_id.to_string()))
            .cloned()
    }

    /// Last schema received for an online device, if any.
    pub fn get_device_schema(&self, device_id: &str) -> Option<Schema> {
        self.device_schemas.read().get(device_id).cloned()
    }

    /// Drop one project proxy; its `(server, class)` bucket goes with the
    /// last entry.
    pub fn remove_project_device_proxy(&self, device_id: &str, server_id: &str, class_id: &str) {
        let key = (server_id.to_string(), class_id.to_string());
        let mut table = self.project_device_proxies.write();
        if let Some(mapping) = table.get_mut(&key) {
            mapping.remove(device_id);
            if mapping.is_empty() {
                table.remove(&key);
            }
        }
    }

    // -----------------------------------------------------------------
    // Internal plumbing

    /// Re-key a project device after a rename. Identity collisions are
    /// programming errors.
    pub(crate) fn reindex_project_device(&self, old_id: &str, new_id: &str) {
        let mut table = self.project_devices.write();
        assert!(
            !table.contains_key(new_id),
            "{}",
            TopologyError::DuplicateIdentity { device_id: new_id.to_string() }
        );
        if let Some(instance) = table.remove(old_id) {
            table.insert(new_id.to_string(), instance);
        }
    }

    /// Base status of a class or project proxy from the mirror: is the
    /// server there, does it offer the class.
    pub(crate) fn class_base_status(&self, server_id: &str, class_id: &str) -> ProxyStatus {
        match self.get_attributes(&format!("server.{server_id}")) {
            None => ProxyStatus::NoServer,
            Some(attrs) if !server_offers_class(&attrs, class_id) => ProxyStatus::NoPlugin,
            Some(_) => ProxyStatus::Ok,
        }
    }

    /// Mirror attributes for a device id, checked across instance kinds.
    pub(crate) fn device_attributes(&self, device_id: &str) -> Option<Attributes> {
        for group in ["device", "macro", "server"] {
            if let Some(attrs) = self.get_attributes(&format!("{group}.{device_id}")) {
                return Some(attrs);
            }
        }
        None
    }

    fn merge_mirror(&self, system_hash: &Hash) {
        let mut guard = self.system_hash.write();
        match guard.as_mut() {
            Some(hash) => hash.merge(system_hash, MergePolicy::Merge),
            None => *guard = Some(system_hash.clone()),
        }
    }

    /// Merge a fragment, grow the trees and wire new devices up to their
    /// proxies.
    fn merge_and_update(&self, system_hash: &Hash) {
        self.merge_mirror(system_hash);
        let new_device_ids = self.system_tree.write().update(system_hash);
        self.device_tree.write().update(system_hash);

        let proxies: Vec<_> = self.device_proxies.read().values().cloned().collect();
        for proxy in proxies {
            let attrs = self.device_attributes(proxy.device_id());
            match (&attrs, proxy.status()) {
                (Some(_), ProxyStatus::Offline) => proxy.set_status(ProxyStatus::Online),
                (None, status) if status != ProxyStatus::Offline => {
                    proxy.set_status(ProxyStatus::Offline);
                }
                _ => {}
            }
            if new_device_ids.contains(&proxy.device_id().to_string()) {
                if let Some(attrs) = &attrs {
                    proxy.set_server_id(
                        attrs.get("serverId").and_then(Value::as_str).unwrap_or(""),
                    );
                    proxy.set_class_id(
                        attrs.get("classId").and_then(Value::as_str).unwrap_or(""),
                    );
                }
                let node = self.system_tree.read().get_instance_node(proxy.device_id());
                proxy.set_topology_node(node);
            }
        }
    }

    /// For every server mentioned in `system_hash`, retry schema requests
    /// for class and project proxies whose binding is still empty.
    fn request_server_classes(&self, system_hash: &Hash) {
        let Some(servers) = system_hash.get_opt("server").and_then(Value::as_hash) else {
            return;
        };
        for (server_id, _, attrs) in servers.iter() {
            let class_proxies: Vec<_> = self
                .class_proxies
                .read()
                .iter()
                .filter(|((srv, cls), _)| srv == server_id && server_offers_class(attrs, cls))
                .map(|(_, proxy)| proxy.clone())
                .collect();
            for proxy in class_proxies {
                if proxy.binding().is_empty() {
                    let key = (server_id.to_string(), proxy.class_id().to_string());
                    self.requested_class_schemas.lock().insert(key);
                    proxy.refresh_schema();
                }
            }
            self.update_project_proxies_for_server(server_id);
        }
    }

    /// Sync online device proxies against the mirror.
    fn update_online_device_status(&self) {
        let proxies: Vec<_> = self.device_proxies.read().values().cloned().collect();
        for proxy in proxies {
            let attrs = self.device_attributes(proxy.device_id());
            match (attrs, proxy.status()) {
                (Some(_), ProxyStatus::Offline) => proxy.set_status(ProxyStatus::Online),
                (None, status) if status != ProxyStatus::Offline => {
                    proxy.set_status(ProxyStatus::Offline);
                }
                _ => {}
            }
        }
    }

    /// The availability of `server_id` changed; let every project proxy on
    /// it derive its status again, and request schemas that became
    /// obtainable.
    fn update_project_proxies_for_server(&self, server_id: &str) {
        let affected: Vec<(String, Arc<ProjectDeviceProxy>)> = self
            .project_device_proxies
            .read()
            .iter()
            .filter(|((srv, _), _)| srv == server_id)
            .flat_map(|((_, cls), mapping)| {
                mapping.values().map(move |p| (cls.clone(), p.clone()))
            })
            .collect();
        for (class_id, proxy) in affected {
            let base = self.class_base_status(server_id, &class_id);
            if base == ProxyStatus::Ok && proxy.binding().is_empty() {
                let key = (server_id.to_string(), class_id.clone());
                proxy.set_status(ProxyStatus::Requested);
                if self.requested_class_schemas.lock().insert(key) {
                    self.gateway.request_class_schema(server_id, &class_id);
                }
            } else {
                proxy.set_status(base);
            }
        }
    }
}

impl std::fmt::Debug for SystemTopology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemTopology")
            .field("online", &self.is_online())
            .field("device_proxies", &self.device_proxies.read().len())
            .field("class_proxies", &self.class_proxies.read().len())
            .field("project_devices", &self.project_devices.read().len())
            .finish_non_exhaustive()
    }
}

fn server_offers_class(attrs: &Attributes, class_id: &str) -> bool {
    attrs
        .get("deviceClasses")
        .and_then(Value::as_str_vec)
        .is_some_and(|classes| classes.iter().any(|c| c == class_id))
}

fn count_group(hash: &Hash, group: &str) -> usize {
    hash.get_opt(group)
        .and_then(Value::as_hash)
        .map_or(0, Hash::len)
}
