//! The host/server/class/device navigation tree.
//!
//! Built and kept current from system-hash fragments. Servers hang under
//! their host, device classes under their server, devices under their
//! class. Devices whose server is not (yet) known are skipped; they arrive
//! again with the next topology update once the server is present.

use std::collections::HashMap;
use std::sync::Arc;

use regex_lite::RegexBuilder;
use tracing::{debug, warn};

use crate::hash::{Attributes, Hash, Value};
use crate::schema::AccessLevel;

use super::arena::{Arena, NodeHandle};
use super::update_context::{
    InsertionContext, LayoutContext, NoopListener, RemovalChildrenContext, RemovalContext,
    ResetContext, TreeUpdateListener,
};

/// Capability bits advertised by a device in its `capabilities` attribute.
pub mod capabilities {
    /// The device can provide scenes.
    pub const PROVIDES_SCENES: u32 = 1;
    /// The device can provide macros.
    pub const PROVIDES_MACROS: u32 = 1 << 1;
    /// The device advertises generic interfaces.
    pub const PROVIDES_INTERFACES: u32 = 1 << 2;
}

/// Depth of a node in the system tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SystemTreeLevel {
    Host,
    Server,
    Class,
    Device,
}

/// One node of the system tree.
#[derive(Debug, Clone)]
pub struct SystemTreeNode {
    /// Display identifier: host name, server id, class id or device id.
    pub node_id: String,
    /// Dotted lookup path into the mirror for this node.
    pub path: String,
    pub level: SystemTreeLevel,
    /// Minimum access level required to see this node.
    pub visibility: AccessLevel,
    /// Instance status string as reported by the topology, e.g. `"ok"`.
    pub status: String,
    /// Capability bitfield, see [`capabilities`].
    pub capabilities: u32,
    /// Whether live monitoring is active for this device node.
    pub monitoring: bool,
    /// Raw mirror attributes of this instance.
    pub attributes: Attributes,
    pub parent: Option<NodeHandle>,
    pub children: Vec<NodeHandle>,
}

impl SystemTreeNode {
    fn new(node_id: &str, path: &str, level: SystemTreeLevel) -> SystemTreeNode {
        SystemTreeNode {
            node_id: node_id.to_string(),
            path: path.to_string(),
            level,
            visibility: AccessLevel::Observer,
            status: "ok".to_string(),
            capabilities: 0,
            monitoring: false,
            attributes: Attributes::new(),
            parent: None,
            children: Vec::new(),
        }
    }

    /// True when `level` suffices to see this node.
    pub fn is_visible(&self, level: AccessLevel) -> bool {
        self.visibility <= level
    }

    /// Whether the device advertises a capability bit.
    pub fn has_capability(&self, bit: u32) -> bool {
        self.capabilities & bit != 0
    }
}

/// Navigation tree over all hosts, servers, classes and devices.
pub struct SystemTree {
    arena: Arena<SystemTreeNode>,
    hosts: Vec<NodeHandle>,
    device_nodes: HashMap<String, NodeHandle>,
    server_nodes: HashMap<String, NodeHandle>,
    listener: Arc<dyn TreeUpdateListener>,
}

impl SystemTree {
    pub fn new() -> SystemTree {
        SystemTree {
            arena: Arena::new(),
            hosts: Vec::new(),
            device_nodes: HashMap::new(),
            server_nodes: HashMap::new(),
            listener: Arc::new(NoopListener),
        }
    }

    /// Register the structural-change receiver.
    pub fn set_listener(&mut self, listener: Arc<dyn TreeUpdateListener>) {
        self.listener = listener;
    }

    /// Resolve a handle; `None` when the node is gone.
    pub fn node(&self, handle: NodeHandle) -> Option<&SystemTreeNode> {
        self.arena.get(handle)
    }

    /// Handles of the host nodes in insertion order.
    pub fn hosts(&self) -> &[NodeHandle] {
        &self.hosts
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Node for a device or server instance id.
    pub fn get_instance_node(&self, instance_id: &str) -> Option<NodeHandle> {
        self.device_nodes
            .get(instance_id)
            .or_else(|| self.server_nodes.get(instance_id))
            .copied()
    }

    /// Drop every node under a reset context.
    pub fn clear_all(&mut self) {
        let _ctx = ResetContext::enter(&*self.listener);
        self.arena.clear();
        self.hosts.clear();
        self.device_nodes.clear();
        self.server_nodes.clear();
    }

    /// Atomic rebuild from a full system hash.
    pub fn initialize(&mut self, system_hash: &Hash) {
        // Guard on a clone so the tree stays mutable inside the bracket.
        let listener = Arc::clone(&self.listener);
        let _ctx = ResetContext::enter(&*listener);
        self.arena.clear();
        self.hosts.clear();
        self.device_nodes.clear();
        self.server_nodes.clear();
        self.handle_server_data(system_hash, false);
        self.handle_device_data("device", system_hash, false);
        self.handle_device_data("macro", system_hash, false);
    }

    /// Incremental merge of a topology fragment. Returns the device ids of
    /// newly created device nodes.
    pub fn update(&mut self, system_hash: &Hash) -> Vec<String> {
        let listener = Arc::clone(&self.listener);
        let _ctx = LayoutContext::enter(&*listener);
        self.handle_server_data(system_hash, true);
        let mut nodes = self.handle_device_data("device", system_hash, true);
        nodes.extend(self.handle_device_data("macro", system_hash, true));
        nodes
    }

    /// Refresh status and attributes of already-known instances. Emits a
    /// single batched `status_update` with the device ids touched.
    pub fn instance_update(&mut self, system_hash: &Hash) -> Vec<String> {
        if let Some(servers) = system_hash.get_opt("server").and_then(Value::as_hash) {
            for (server_id, _, attrs) in servers.iter() {
                if attrs.is_empty() {
                    continue;
                }
                if let Some(&handle) = self.server_nodes.get(server_id) {
                    if let Some(node) = self.arena.get_mut(handle) {
                        merge_attributes(&mut node.attributes, attrs);
                    }
                }
            }
        }

        let mut touched = Vec::new();
        for group in ["device", "macro"] {
            let Some(devices) = system_hash.get_opt(group).and_then(Value::as_hash) else {
                continue;
            };
            for (device_id, _, attrs) in devices.iter() {
                if attrs.is_empty() {
                    continue;
                }
                let Some(&handle) = self.device_nodes.get(device_id) else {
                    continue;
                };
                if let Some(node) = self.arena.get_mut(handle) {
                    merge_attributes(&mut node.attributes, attrs);
                    if let Some(status) = attrs.get("status").and_then(Value::as_str) {
                        node.status = status.to_string();
                    }
                    if let Some(caps) = attrs.get("capabilities").and_then(Value::as_u64) {
                        node.capabilities = caps as u32;
                    }
                    touched.push(device_id.to_string());
                }
            }
        }
        if !touched.is_empty() {
            self.listener.status_update(&touched);
        }
        touched
    }

    /// Remove colliding instances before re-adding them, returning the ids
    /// that already existed. The caller decides whether to warn the user.
    pub fn clear_existing(&mut self, system_hash: &Hash) -> Vec<String> {
        let mut existing = Vec::new();
        if let Some(servers) = system_hash.get_opt("server").and_then(Value::as_hash) {
            let server_ids: Vec<String> = servers.keys().map(str::to_string).collect();
            for server_id in server_ids {
                if !self.remove_server(&server_id).is_empty() {
                    existing.push(server_id);
                }
            }
        }
        if let Some(devices) = system_hash.get_opt("device").and_then(Value::as_hash) {
            let device_ids: Vec<String> = devices.keys().map(str::to_string).collect();
            for device_id in device_ids {
                if self.remove_device(&device_id) {
                    existing.push(device_id);
                }
            }
        }
        existing
    }

    /// Remove a device node and cascade upward through parents left empty.
    /// Removal contexts are entered once per removed node, innermost first.
    pub fn remove_device(&mut self, device_id: &str) -> bool {
        let Some(handle) = self.device_nodes.remove(device_id) else {
            return false;
        };
        self.remove_cascading(handle);
        true
    }

    /// Remove a server with its whole sub-tree, bottom up. Returns the
    /// `(server_id, class_id)` keys of the removed class nodes.
    pub fn remove_server(&mut self, server_id: &str) -> Vec<(String, String)> {
        let Some(server) = self.server_nodes.remove(server_id) else {
            return Vec::new();
        };
        let mut class_keys = Vec::new();

        let classes = self.arena.get(server).map(|n| n.children.clone()).unwrap_or_default();
        for class in classes.into_iter().rev() {
            let devices =
                self.arena.get(class).map(|n| n.children.clone()).unwrap_or_default();
            if !devices.is_empty() {
                // The class node survives until after its devices are gone.
                let _ctx = RemovalChildrenContext::enter(&*self.listener, class);
                for device in devices.into_iter().rev() {
                    if let Some(node) = self.arena.remove(device) {
                        self.device_nodes.remove(&node.node_id);
                    }
                }
                if let Some(class_node) = self.arena.get_mut(class) {
                    class_node.children.clear();
                }
            }
            let _ctx = RemovalContext::enter(&*self.listener, class);
            if let Some(node) = self.arena.remove(class) {
                class_keys.push((server_id.to_string(), node.node_id));
            }
            if let Some(server_node) = self.arena.get_mut(server) {
                server_node.children.pop();
            }
        }

        let host = self.arena.get(server).and_then(|n| n.parent);
        {
            let _ctx = RemovalContext::enter(&*self.listener, server);
            self.arena.remove(server);
            if let Some(host) = host {
                if let Some(host_node) = self.arena.get_mut(host) {
                    host_node.children.retain(|&c| c != server);
                }
            }
        }
        if let Some(host) = host {
            if self.arena.get(host).is_some_and(|n| n.children.is_empty()) {
                let _ctx = RemovalContext::enter(&*self.listener, host);
                self.arena.remove(host);
                self.hosts.retain(|&h| h != host);
            }
        }
        debug!(server_id, classes = class_keys.len(), "server removed from system tree");
        class_keys
    }

    /// Flag live monitoring on a device node.
    pub fn set_monitoring(&mut self, device_id: &str, monitoring: bool) {
        if let Some(&handle) = self.device_nodes.get(device_id) {
            if let Some(node) = self.arena.get_mut(handle) {
                node.monitoring = monitoring;
            }
        }
    }

    /// Collect all nodes whose id matches `query` and which are visible at
    /// `access_level`, parents included. Without `use_reg_ex` the query is
    /// taken literally as a substring; `full_match` anchors both ends.
    pub fn find(
        &self,
        query: &str,
        access_level: AccessLevel,
        case_sensitive: bool,
        use_reg_ex: bool,
        full_match: bool,
    ) -> Vec<NodeHandle> {
        let core = if use_reg_ex {
            query.to_string()
        } else {
            format!(".*{}", regex_lite::escape(query))
        };
        let pattern = if full_match {
            format!("^(?:{core})$")
        } else {
            format!("^(?:{core})")
        };
        let regex = match RegexBuilder::new(&pattern).case_insensitive(!case_sensitive).build() {
            Ok(regex) => regex,
            Err(err) => {
                warn!(query, %err, "unusable search pattern");
                return Vec::new();
            }
        };

        let mut found = Vec::new();
        self.visit_handles(|handle, node| {
            let parent_hidden = node
                .parent
                .and_then(|p| self.arena.get(p))
                .is_some_and(|p| !p.is_visible(access_level));
            if !node.is_visible(access_level) || parent_hidden {
                return false;
            }
            if regex.is_match(&node.node_id) {
                found.push(handle);
            }
            false
        });
        found
    }

    /// Pre-order traversal; stop early when `visitor` returns true.
    pub fn visit(&self, mut visitor: impl FnMut(&SystemTreeNode) -> bool) {
        self.visit_handles(|_, node| visitor(node));
    }

    /// Pre-order traversal with handles.
    pub fn visit_handles(&self, mut visitor: impl FnMut(NodeHandle, &SystemTreeNode) -> bool) {
        let mut stack: Vec<NodeHandle> = self.hosts.iter().rev().copied().collect();
        while let Some(handle) = stack.pop() {
            let Some(node) = self.arena.get(handle) else {
                continue;
            };
            if visitor(handle, node) {
                return;
            }
            stack.extend(node.children.iter().rev().copied());
        }
    }

    // -----------------------------------------------------------------
    // construction from system-hash fragments

    fn handle_server_data(&mut self, system_hash: &Hash, announce: bool) {
        let Some(servers) = system_hash.get_opt("server").and_then(Value::as_hash) else {
            return;
        };
        for (server_id, _, attrs) in servers.iter() {
            if attrs.is_empty() {
                continue;
            }
            let host = attrs.get("host").and_then(Value::as_str).unwrap_or("UNKNOWN");
            let visibility = attrs
                .get("visibility")
                .and_then(Value::as_i64)
                .map_or(AccessLevel::Observer, AccessLevel::from_code);

            let host_node = self.host_node(host, announce);
            if self.child_by_id(host_node, server_id).is_none() {
                let mut node =
                    SystemTreeNode::new(server_id, server_id, SystemTreeLevel::Server);
                node.visibility = visibility;
                self.append_child(Some(host_node), node, announce);
            }
            if let Some(&handle) = self.server_nodes.get(server_id) {
                if let Some(node) = self.arena.get_mut(handle) {
                    node.attributes = attrs.clone();
                }
            }
        }
    }

    fn handle_device_data(
        &mut self,
        group: &str,
        system_hash: &Hash,
        announce: bool,
    ) -> Vec<String> {
        let mut new_devices = Vec::new();
        let Some(devices) = system_hash.get_opt(group).and_then(Value::as_hash) else {
            return new_devices;
        };
        for (device_id, _, attrs) in devices.iter() {
            if attrs.is_empty() {
                continue;
            }
            let host = attrs.get("host").and_then(Value::as_str).unwrap_or("UNKNOWN");
            let visibility = attrs
                .get("visibility")
                .and_then(Value::as_i64)
                .map_or(AccessLevel::Observer, AccessLevel::from_code);
            let capabilities =
                attrs.get("capabilities").and_then(Value::as_u64).unwrap_or(0) as u32;
            let server_id =
                attrs.get("serverId").and_then(Value::as_str).unwrap_or("unknown-server");
            let class_id =
                attrs.get("classId").and_then(Value::as_str).unwrap_or("unknown-class");
            let status = attrs.get("status").and_then(Value::as_str).unwrap_or("ok");

            let host_node = self.host_node(host, announce);
            let server_node = match self.child_by_id(host_node, server_id) {
                Some(handle) => handle,
                // Unattached instances (macros, clients) live under a
                // placeholder server; real devices wait for their server.
                None if server_id == "__none__" => {
                    let node =
                        SystemTreeNode::new(server_id, server_id, SystemTreeLevel::Server);
                    self.append_child(Some(host_node), node, announce)
                }
                None => continue,
            };

            let class_node = match self.child_by_id(server_node, class_id) {
                Some(handle) => handle,
                None => {
                    let path = format!("{server_id}.{class_id}");
                    let mut node =
                        SystemTreeNode::new(class_id, &path, SystemTreeLevel::Class);
                    node.visibility = visibility;
                    self.append_child(Some(server_node), node, announce)
                }
            };

            let device_node = match self.child_by_id(class_node, device_id) {
                Some(handle) => handle,
                None => {
                    let mut node =
                        SystemTreeNode::new(device_id, device_id, SystemTreeLevel::Device);
                    node.visibility = visibility;
                    let handle = self.append_child(Some(class_node), node, announce);
                    new_devices.push(device_id.to_string());
                    handle
                }
            };
            if let Some(node) = self.arena.get_mut(device_node) {
                node.status = status.to_string();
                node.attributes = attrs.clone();
                node.capabilities = capabilities;
            }
        }
        new_devices
    }

    fn host_node(&mut self, host: &str, announce: bool) -> NodeHandle {
        let existing = self
            .hosts
            .iter()
            .copied()
            .find(|&h| self.arena.get(h).is_some_and(|n| n.node_id == host));
        match existing {
            Some(handle) => handle,
            None => {
                let node = SystemTreeNode::new(host, host, SystemTreeLevel::Host);
                self.append_child(None, node, announce)
            }
        }
    }

    fn child_by_id(&self, parent: NodeHandle, node_id: &str) -> Option<NodeHandle> {
        let parent = self.arena.get(parent)?;
        parent
            .children
            .iter()
            .copied()
            .find(|&c| self.arena.get(c).is_some_and(|n| n.node_id == node_id))
    }

    fn append_child(
        &mut self,
        parent: Option<NodeHandle>,
        mut node: SystemTreeNode,
        announce: bool,
    ) -> NodeHandle {
        node.parent = parent;
        let level = node.level;
        let node_id = node.node_id.clone();
        let handle = self.arena.insert(node);

        let index = match parent {
            Some(parent_handle) => {
                self.arena.get(parent_handle).map(|n| n.children.len()).unwrap_or(0)
            }
            None => self.hosts.len(),
        };
        let ctx = announce
            .then(|| InsertionContext::enter(&*self.listener, parent, index, index));
        match parent {
            Some(parent_handle) => {
                if let Some(parent_node) = self.arena.get_mut(parent_handle) {
                    parent_node.children.push(handle);
                }
            }
            None => self.hosts.push(handle),
        }
        drop(ctx);

        match level {
            SystemTreeLevel::Server => {
                self.server_nodes.insert(node_id, handle);
            }
            SystemTreeLevel::Device => {
                self.device_nodes.insert(node_id, handle);
            }
            _ => {}
        }
        handle
    }

    /// Remove `handle` and every ancestor that becomes empty, innermost
    /// context first.
    fn remove_cascading(&mut self, handle: NodeHandle) {
        let mut current = Some(handle);
        while let Some(target) = current {
            let Some(node) = self.arena.get(target) else {
                break;
            };
            let parent = node.parent;
            {
                let _ctx = RemovalContext::enter(&*self.listener, target);
                if let Some(removed) = self.arena.remove(target) {
                    match removed.level {
                        SystemTreeLevel::Server => {
                            self.server_nodes.remove(&removed.node_id);
                        }
                        SystemTreeLevel::Device => {
                            self.device_nodes.remove(&removed.node_id);
                        }
                        _ => {}
                    }
                }
                match parent {
                    Some(parent_handle) => {
                        if let Some(parent_node) = self.arena.get_mut(parent_handle) {
                            parent_node.children.retain(|&c| c != target);
                        }
                    }
                    None => self.hosts.retain(|&h| h != target),
                }
            }
            current = parent
                .filter(|&p| self.arena.get(p).is_some_and(|n| n.children.is_empty()));
        }
    }
}

impl Default for SystemTree {
    fn default() -> Self {
        SystemTree::new()
    }
}

fn merge_attributes(target: &mut Attributes, incoming: &Attributes) {
    for (name, value) in incoming {
        target.insert(name.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Hash;

    fn server_entry(hash: &mut Hash, server_id: &str, host: &str, classes: &[&str]) {
        hash.set(&format!("server.{server_id}"), Hash::new());
        let attrs = hash.attributes_mut(&format!("server.{server_id}")).unwrap();
        attrs.insert("host".into(), Value::from(host));
        attrs.insert(
            "deviceClasses".into(),
            Value::VectorString(classes.iter().map(|c| c.to_string()).collect()),
        );
    }

    fn device_entry(hash: &mut Hash, device_id: &str, host: &str, server: &str, class: &str) {
        hash.set(&format!("device.{device_id}"), Hash::new());
        let attrs = hash.attributes_mut(&format!("device.{device_id}")).unwrap();
        attrs.insert("host".into(), Value::from(host));
        attrs.insert("serverId".into(), Value::from(server));
        attrs.insert("classId".into(), Value::from(class));
        attrs.insert("status".into(), Value::from("ok"));
    }

    fn sample_hash() -> Hash {
        let mut hash = Hash::new();
        server_entry(&mut hash, "srvA", "host1", &["Motor"]);
        device_entry(&mut hash, "d1", "host1", "srvA", "Motor");
        device_entry(&mut hash, "d2", "host1", "srvA", "Motor");
        hash
    }

    #[test]
    fn initialize_builds_four_levels() {
        let mut tree = SystemTree::new();
        tree.initialize(&sample_hash());

        let host = tree.node(tree.hosts()[0]).unwrap();
        assert_eq!(host.node_id, "host1");
        let server = tree.node(host.children[0]).unwrap();
        assert_eq!(server.level, SystemTreeLevel::Server);
        let class = tree.node(server.children[0]).unwrap();
        assert_eq!(class.node_id, "Motor");
        assert_eq!(class.children.len(), 2);
        assert!(tree.get_instance_node("d1").is_some());
        assert!(tree.get_instance_node("srvA").is_some());
    }

    #[test]
    fn devices_without_server_are_skipped() {
        let mut tree = SystemTree::new();
        let mut hash = Hash::new();
        device_entry(&mut hash, "orphan", "host1", "missing-server", "Motor");
        let new_nodes = tree.update(&hash);
        assert!(new_nodes.is_empty());
        assert!(tree.get_instance_node("orphan").is_none());
    }

    #[test]
    fn update_reports_only_new_devices() {
        let mut tree = SystemTree::new();
        tree.initialize(&sample_hash());
        let mut hash = Hash::new();
        server_entry(&mut hash, "srvA", "host1", &["Motor"]);
        device_entry(&mut hash, "d2", "host1", "srvA", "Motor");
        device_entry(&mut hash, "d3", "host1", "srvA", "Motor");
        assert_eq!(tree.update(&hash), vec!["d3".to_string()]);
    }

    #[test]
    fn remove_last_device_cascades_to_server() {
        let mut tree = SystemTree::new();
        let mut hash = Hash::new();
        server_entry(&mut hash, "srvA", "host1", &["Motor"]);
        server_entry(&mut hash, "srvB", "host1", &[]);
        device_entry(&mut hash, "d1", "host1", "srvA", "Motor");
        tree.initialize(&hash);

        assert!(tree.remove_device("d1"));
        assert!(tree.get_instance_node("srvA").is_none());
        // The host still has srvB, so it survives.
        assert_eq!(tree.hosts().len(), 1);
        assert!(tree.get_instance_node("srvB").is_some());
        assert!(!tree.remove_device("d1"));
    }

    #[test]
    fn remove_server_returns_class_keys_and_prunes_empty_host() {
        let mut tree = SystemTree::new();
        tree.initialize(&sample_hash());

        let keys = tree.remove_server("srvA");
        assert_eq!(keys, vec![("srvA".to_string(), "Motor".to_string())]);
        assert!(tree.is_empty());
        assert!(tree.get_instance_node("d1").is_none());
        assert!(tree.remove_server("srvA").is_empty());
    }

    #[test]
    fn instance_update_batches_touched_devices() {
        let mut tree = SystemTree::new();
        tree.initialize(&sample_hash());

        let mut hash = Hash::new();
        device_entry(&mut hash, "d1", "host1", "srvA", "Motor");
        hash.attributes_mut("device.d1")
            .unwrap()
            .insert("status".into(), Value::from("error"));
        // A device the tree has never seen is silently skipped.
        device_entry(&mut hash, "ghost", "host1", "srvA", "Motor");

        let touched = tree.instance_update(&hash);
        assert_eq!(touched, vec!["d1".to_string()]);
        let node = tree.node(tree.get_instance_node("d1").unwrap()).unwrap();
        assert_eq!(node.status, "error");
    }

    #[test]
    fn find_matches_substring_by_default() {
        let mut tree = SystemTree::new();
        tree.initialize(&sample_hash());

        let hits = tree.find("d", AccessLevel::Observer, true, false, false);
        let ids: Vec<_> = hits
            .iter()
            .map(|&h| tree.node(h).unwrap().node_id.clone())
            .collect();
        assert_eq!(ids, vec!["d1", "d2"]);

        // Full match anchors both ends.
        assert!(tree.find("d", AccessLevel::Observer, true, false, true).is_empty());
        assert_eq!(tree.find("d1", AccessLevel::Observer, true, false, true).len(), 1);
        // Case-insensitive search.
        assert_eq!(tree.find("MOTOR", AccessLevel::Observer, false, false, false).len(), 1);
    }

    #[test]
    fn find_respects_visibility() {
        let mut tree = SystemTree::new();
        let mut hash = sample_hash();
        hash.attributes_mut("device.d1")
            .unwrap()
            .insert("visibility".into(), Value::Int32(3));
        tree.initialize(&hash);

        assert_eq!(tree.find("d1", AccessLevel::Observer, true, false, false).len(), 0);
        assert_eq!(tree.find("d1", AccessLevel::Expert, true, false, false).len(), 1);
    }

    #[test]
    fn clear_existing_reports_collisions() {
        let mut tree = SystemTree::new();
        tree.initialize(&sample_hash());

        let mut incoming = Hash::new();
        device_entry(&mut incoming, "d1", "host1", "srvA", "Motor");
        let existing = tree.clear_existing(&incoming);
        assert_eq!(existing, vec!["d1".to_string()]);
        assert!(tree.get_instance_node("d1").is_none());
    }
}
