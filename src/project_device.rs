//! The stable identity bridging online and offline views of one project
//! device.
//!
//! A [`ProjectDeviceInstance`] owns references to the online proxy for its
//! device id and the offline proxy for its `(server, class)` expectation,
//! plus the configuration stored in the project. It follows status changes
//! of both proxies: going offline reapplies the stored configuration to the
//! offline binding, a fresh offline schema does the same, and a vanished
//! server empties the offline value namespace.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::binding::{
    apply_default_configuration, apply_project_configuration, extract_configuration,
};
use crate::event::{EventChannel, Subscription};
use crate::hash::Hash;
use crate::proxy::{DeviceProxy, ProjectDeviceProxy, ProxyStatus};
use crate::topology::SystemTopology;

/// The proxy a view should bind to right now.
#[derive(Debug, Clone)]
pub enum ActiveProxy {
    /// The device is online with the expected class.
    Online(Arc<DeviceProxy>),
    /// The device is offline, or online with an incompatible class.
    Offline(Arc<ProjectDeviceProxy>),
}

/// Identity `(device_id, server_id, class_id)` of one project device.
pub struct ProjectDeviceInstance {
    topology: Weak<SystemTopology>,
    device_id: RwLock<String>,
    server_id: RwLock<String>,
    class_id: RwLock<String>,
    online_proxy: RwLock<Arc<DeviceProxy>>,
    offline_proxy: RwLock<Arc<ProjectDeviceProxy>>,
    offline_config: RwLock<Option<Hash>>,
    monitor_count: Mutex<u32>,
    monitor_attached: Mutex<bool>,
    last_online: Mutex<bool>,
    subscriptions: Mutex<Vec<(ProxyChannel, Subscription)>>,
    /// `(old_id, new_id)` after a successful rename.
    pub identity_update: EventChannel<(String, String)>,
    /// The project holding this device needs saving.
    pub save_project: EventChannel<()>,
}

/// Which proxy channel a stored subscription belongs to, so rename can
/// detach from the right object.
enum ProxyChannel {
    OnlineStatus,
    OfflineStatus,
    OfflineSchema,
}

impl ProjectDeviceInstance {
    /// Resolve both proxies through `topology` and wire the reactive
    /// couplings.
    pub fn new(
        topology: &Arc<SystemTopology>,
        device_id: &str,
        server_id: &str,
        class_id: &str,
    ) -> Arc<ProjectDeviceInstance> {
        let online = topology.get_device(device_id, true);
        let offline = topology.get_project_device_proxy(device_id, server_id, class_id);
        let instance = Arc::new(ProjectDeviceInstance {
            topology: Arc::downgrade(topology),
            device_id: RwLock::new(device_id.to_string()),
            server_id: RwLock::new(server_id.to_string()),
            class_id: RwLock::new(class_id.to_string()),
            last_online: Mutex::new(online.is_online()),
            online_proxy: RwLock::new(online),
            offline_proxy: RwLock::new(offline),
            offline_config: RwLock::new(None),
            monitor_count: Mutex::new(0),
            monitor_attached: Mutex::new(false),
            subscriptions: Mutex::new(Vec::new()),
            identity_update: EventChannel::new(),
            save_project: EventChannel::new(),
        });
        instance.attach_subscriptions();
        instance
    }

    pub fn device_id(&self) -> String {
        self.device_id.read().clone()
    }

    pub fn server_id(&self) -> String {
        self.server_id.read().clone()
    }

    pub fn class_id(&self) -> String {
        self.class_id.read().clone()
    }

    /// The online proxy currently referenced.
    pub fn online_proxy(&self) -> Arc<DeviceProxy> {
        self.online_proxy.read().clone()
    }

    /// The offline proxy currently referenced.
    pub fn offline_proxy(&self) -> Arc<ProjectDeviceProxy> {
        self.offline_proxy.read().clone()
    }

    /// The configuration stored in the project, if any.
    pub fn offline_config(&self) -> Option<Hash> {
        self.offline_config.read().clone()
    }

    /// True when the online proxy carries a class other than the one this
    /// project entry expects.
    pub fn is_incompatible(&self) -> bool {
        let online = self.online_proxy();
        if !online.is_online() {
            return false;
        }
        let online_class = online.binding().class_id().to_string();
        !online_class.is_empty() && online_class != self.class_id()
    }

    /// The proxy a view should use, per the online-and-compatible rule.
    pub fn proxy(&self) -> ActiveProxy {
        let online = self.online_proxy();
        if online.is_online() && !self.is_incompatible() {
            ActiveProxy::Online(online)
        } else {
            ActiveProxy::Offline(self.offline_proxy())
        }
    }

    /// Effective status: the active proxy's, with class conflicts surfaced
    /// as `Incompatible`.
    pub fn status(&self) -> ProxyStatus {
        let online = self.online_proxy();
        if online.is_online() {
            if self.is_incompatible() {
                ProxyStatus::Incompatible
            } else {
                online.status()
            }
        } else {
            self.offline_proxy().status()
        }
    }

    /// Store the project configuration; reapply it right away when the
    /// device is offline and a schema is present.
    pub fn set_project_config_hash(&self, config: Option<Hash>) {
        *self.offline_config.write() = config;
        let online = self.online_proxy().is_online();
        if !online && !self.offline_proxy().binding().is_empty() {
            self.apply_offline_config();
        }
    }

    /// Snapshot of the offline binding, for saving into the project.
    pub fn collect_offline_configuration(&self) -> Hash {
        extract_configuration(&self.offline_proxy().binding())
    }

    /// Retarget this identity. Empty or unchanged components are kept;
    /// when anything changes, both proxies are released and re-resolved
    /// and observers are told the id mapping.
    pub fn rename(
        self: &Arc<Self>,
        device_id: Option<&str>,
        server_id: Option<&str>,
        class_id: Option<&str>,
    ) {
        let old_id = self.device_id();
        let new_id = pick(device_id, &old_id);
        let new_server = pick(server_id, &self.server_id());
        let new_class = pick(class_id, &self.class_id());
        if new_id == old_id && new_server == self.server_id() && new_class == self.class_id() {
            return;
        }
        let Some(topology) = self.topology.upgrade() else {
            return;
        };
        debug!(%old_id, %new_id, server_id = %new_server, class_id = %new_class,
               "project device renamed");

        self.detach_subscriptions();
        if *self.monitor_attached.lock() {
            self.online_proxy().remove_monitor();
            *self.monitor_attached.lock() = false;
        }

        if new_id != old_id {
            topology.reindex_project_device(&old_id, &new_id);
        }
        *self.device_id.write() = new_id.clone();
        *self.server_id.write() = new_server.clone();
        *self.class_id.write() = new_class.clone();

        let online = topology.get_device(&new_id, true);
        let offline = topology.get_project_device_proxy(&new_id, &new_server, &new_class);
        *self.last_online.lock() = online.is_online();
        *self.online_proxy.write() = online;
        *self.offline_proxy.write() = offline;
        self.attach_subscriptions();
        self.sync_monitor();

        self.identity_update.emit(&(old_id, new_id));
        self.save_project.emit(&());
    }

    /// One more consumer needs live values; the first one subscribes the
    /// online proxy upstream.
    pub fn start_monitoring(&self) {
        *self.monitor_count.lock() += 1;
        self.sync_monitor();
    }

    /// One consumer less; the last one releases the upstream subscription.
    pub fn stop_monitoring(&self) {
        {
            let mut count = self.monitor_count.lock();
            debug_assert!(*count > 0, "monitor count underflow for {}", self.device_id());
            *count = count.saturating_sub(1);
        }
        self.sync_monitor();
    }

    pub fn monitor_count(&self) -> u32 {
        *self.monitor_count.lock()
    }

    // -----------------------------------------------------------------

    /// Attach or release the monitor on the online proxy so that it is
    /// held exactly when consumers exist and the device is online.
    fn sync_monitor(&self) {
        let want = self.monitor_count() > 0 && self.online_proxy().is_online();
        let mut attached = self.monitor_attached.lock();
        if want && !*attached {
            self.online_proxy().add_monitor();
            *attached = true;
        } else if !want && *attached {
            self.online_proxy().remove_monitor();
            *attached = false;
        }
    }

    /// Defaults plus the stored project configuration into the offline
    /// binding, then one `config_update`.
    fn apply_offline_config(&self) {
        let offline = self.offline_proxy();
        {
            let mut binding = offline.binding_mut();
            apply_default_configuration(&mut binding);
            if let Some(config) = self.offline_config.read().as_ref() {
                let fails = apply_project_configuration(config, &mut binding);
                if !fails.is_empty() {
                    warn!(device_id = %self.device_id(), failed = fails.len(),
                          "stored configuration partially rejected");
                }
            } else {
                debug!(device_id = %self.device_id(), "no stored configuration to apply");
            }
        }
        offline.config_update.emit(&());
    }

    fn attach_subscriptions(self: &Arc<Self>) {
        let mut subs = self.subscriptions.lock();

        let weak = Arc::downgrade(self);
        let token = self.online_proxy().status_update.subscribe(move |status| {
            if let Some(instance) = weak.upgrade() {
                instance.handle_online_status(*status);
            }
        });
        subs.push((ProxyChannel::OnlineStatus, token));

        let weak = Arc::downgrade(self);
        let token = self.offline_proxy().schema_update.subscribe(move |_| {
            if let Some(instance) = weak.upgrade() {
                instance.handle_offline_schema();
            }
        });
        subs.push((ProxyChannel::OfflineSchema, token));

        let weak = Arc::downgrade(self);
        let token = self.offline_proxy().status_update.subscribe(move |status| {
            if let Some(instance) = weak.upgrade() {
                instance.handle_offline_status(*status);
            }
        });
        subs.push((ProxyChannel::OfflineStatus, token));
    }

    fn detach_subscriptions(&self) {
        let online = self.online_proxy();
        let offline = self.offline_proxy();
        for (channel, token) in self.subscriptions.lock().drain(..) {
            match channel {
                ProxyChannel::OnlineStatus => online.status_update.unsubscribe(token),
                ProxyChannel::OfflineSchema => offline.schema_update.unsubscribe(token),
                ProxyChannel::OfflineStatus => offline.status_update.unsubscribe(token),
            }
        }
    }

    fn handle_online_status(&self, status: ProxyStatus) {
        let now = status.is_online();
        let was = {
            let mut last = self.last_online.lock();
            std::mem::replace(&mut *last, now)
        };
        if was && !now {
            // Online to offline: the offline view takes over with the
            // stored configuration.
            if !self.offline_proxy().binding().is_empty() {
                self.apply_offline_config();
            }
        }
        if was != now {
            self.sync_monitor();
        }
    }

    fn handle_offline_schema(&self) {
        if !self.offline_proxy().binding().is_empty() {
            self.apply_offline_config();
        }
    }

    fn handle_offline_status(&self, status: ProxyStatus) {
        if status == ProxyStatus::NoServer {
            // Values are meaningless without the server; the schema-shaped
            // binding is rebuilt on its return.
            self.offline_proxy().binding_mut().clear_namespace();
        }
    }
}

impl Drop for ProjectDeviceInstance {
    fn drop(&mut self) {
        // Subscriptions hold weak references only, but release the tokens
        // so the channels stay lean.
        self.detach_subscriptions();
    }
}

impl std::fmt::Debug for ProjectDeviceInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectDeviceInstance")
            .field("device_id", &self.device_id())
            .field("server_id", &self.server_id())
            .field("class_id", &self.class_id())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

fn pick(candidate: Option<&str>, current: &str) -> String {
    match candidate {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => current.to_string(),
    }
}
