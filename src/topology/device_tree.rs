//! The domain/type/member navigation tree.
//!
//! A device id of the form `<domain>/<type>/<member>` is folded into a
//! three-level tree. Ids that do not follow the convention are ignored
//! here; the system tree still carries them.

use std::collections::HashMap;
use std::sync::Arc;

use regex_lite::RegexBuilder;
use tracing::warn;

use crate::hash::{Attributes, Hash, Value};
use crate::schema::AccessLevel;

use super::arena::{Arena, NodeHandle};
use super::update_context::{
    InsertionContext, LayoutContext, NoopListener, RemovalContext, ResetContext,
    TreeUpdateListener,
};

/// Depth of a node in the device tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceTreeLevel {
    Domain,
    Type,
    Member,
}

/// One node of the device tree. Member nodes carry the full device id as
/// their `node_id` so searches hit the same strings as in the system tree.
#[derive(Debug, Clone)]
pub struct DeviceTreeNode {
    pub node_id: String,
    pub level: DeviceTreeLevel,
    /// Instance status string from the topology, member nodes only.
    pub status: String,
    pub attributes: Attributes,
    pub parent: Option<NodeHandle>,
    pub children: Vec<NodeHandle>,
}

impl DeviceTreeNode {
    fn new(node_id: &str, level: DeviceTreeLevel) -> DeviceTreeNode {
        DeviceTreeNode {
            node_id: node_id.to_string(),
            level,
            status: "ok".to_string(),
            attributes: Attributes::new(),
            parent: None,
            children: Vec::new(),
        }
    }
}

/// Split a conforming device id into `(domain, type, member)`.
fn split_device_id(device_id: &str) -> Option<(&str, &str, &str)> {
    let mut parts = device_id.split('/');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(domain), Some(kind), Some(member), None)
            if !domain.is_empty() && !kind.is_empty() && !member.is_empty() =>
        {
            Some((domain, kind, member))
        }
        _ => None,
    }
}

/// Navigation tree folding device ids by naming convention.
pub struct DeviceTree {
    arena: Arena<DeviceTreeNode>,
    domains: Vec<NodeHandle>,
    device_nodes: HashMap<String, NodeHandle>,
    listener: Arc<dyn TreeUpdateListener>,
}

impl DeviceTree {
    pub fn new() -> DeviceTree {
        DeviceTree {
            arena: Arena::new(),
            domains: Vec::new(),
            device_nodes: HashMap::new(),
            listener: Arc::new(NoopListener),
        }
    }

    pub fn set_listener(&mut self, listener: Arc<dyn TreeUpdateListener>) {
        self.listener = listener;
    }

    pub fn node(&self, handle: NodeHandle) -> Option<&DeviceTreeNode> {
        self.arena.get(handle)
    }

    /// Handles of the domain nodes in insertion order.
    pub fn domains(&self) -> &[NodeHandle] {
        &self.domains
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    pub fn get_instance_node(&self, device_id: &str) -> Option<NodeHandle> {
        self.device_nodes.get(device_id).copied()
    }

    pub fn clear_all(&mut self) {
        let _ctx = ResetContext::enter(&*self.listener);
        self.arena.clear();
        self.domains.clear();
        self.device_nodes.clear();
    }

    /// Atomic rebuild from a full system hash.
    pub fn initialize(&mut self, system_hash: &Hash) {
        // Guard on a clone so the tree stays mutable inside the bracket.
        let listener = Arc::clone(&self.listener);
        let _ctx = ResetContext::enter(&*listener);
        self.arena.clear();
        self.domains.clear();
        self.device_nodes.clear();
        self.handle_device_data(system_hash, false);
    }

    /// Incremental merge. Returns the ids of newly created member nodes.
    pub fn update(&mut self, system_hash: &Hash) -> Vec<String> {
        let listener = Arc::clone(&self.listener);
        let _ctx = LayoutContext::enter(&*listener);
        self.handle_device_data(system_hash, true)
    }

    /// Refresh status and attributes of known members; one batched
    /// `status_update` per call.
    pub fn instance_update(&mut self, system_hash: &Hash) -> Vec<String> {
        let mut touched = Vec::new();
        let Some(devices) = system_hash.get_opt("device").and_then(Value::as_hash) else {
            return touched;
        };
        for (device_id, _, attrs) in devices.iter() {
            if attrs.is_empty() {
                continue;
            }
            let Some(&handle) = self.device_nodes.get(device_id) else {
                continue;
            };
            if let Some(node) = self.arena.get_mut(handle) {
                for (name, value) in attrs {
                    node.attributes.insert(name.clone(), value.clone());
                }
                if let Some(status) = attrs.get("status").and_then(Value::as_str) {
                    node.status = status.to_string();
                }
                touched.push(device_id.to_string());
            }
        }
        if !touched.is_empty() {
            self.listener.status_update(&touched);
        }
        touched
    }

    /// Remove a member node, cascading through emptied type and domain
    /// nodes, innermost removal context first.
    pub fn remove_device(&mut self, device_id: &str) -> bool {
        let Some(handle) = self.device_nodes.remove(device_id) else {
            return false;
        };
        let mut current = Some(handle);
        while let Some(target) = current {
            let Some(node) = self.arena.get(target) else {
                break;
            };
            let parent = node.parent;
            {
                let _ctx = RemovalContext::enter(&*self.listener, target);
                self.arena.remove(target);
                match parent {
                    Some(parent_handle) => {
                        if let Some(parent_node) = self.arena.get_mut(parent_handle) {
                            parent_node.children.retain(|&c| c != target);
                        }
                    }
                    None => self.domains.retain(|&d| d != target),
                }
            }
            current = parent
                .filter(|&p| self.arena.get(p).is_some_and(|n| n.children.is_empty()));
        }
        true
    }

    /// Same matching semantics as the system tree search.
    pub fn find(
        &self,
        query: &str,
        access_level: AccessLevel,
        case_sensitive: bool,
        use_reg_ex: bool,
        full_match: bool,
    ) -> Vec<NodeHandle> {
        // The device tree carries no visibility attribute; every node is
        // public, the level is accepted for interface symmetry.
        let _ = access_level;
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
            if regex.is_match(&node.node_id) {
                found.push(handle);
            }
            false
        });
        found
    }

    /// Pre-order traversal; stop early when `visitor` returns true.
    pub fn visit(&self, mut visitor: impl FnMut(&DeviceTreeNode) -> bool) {
        self.visit_handles(|_, node| visitor(node));
    }

    pub fn visit_handles(&self, mut visitor: impl FnMut(NodeHandle, &DeviceTreeNode) -> bool) {
        let mut stack: Vec<NodeHandle> = self.domains.iter().rev().copied().collect();
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

    fn handle_device_data(&mut self, system_hash: &Hash, announce: bool) -> Vec<String> {
        let mut new_devices = Vec::new();
        let Some(devices) = system_hash.get_opt("device").and_then(Value::as_hash) else {
            return new_devices;
        };
        for (device_id, _, attrs) in devices.iter() {
            if attrs.is_empty() {
                continue;
            }
            let Some((domain, kind, _member)) = split_device_id(device_id) else {
                continue;
            };
            if self.device_nodes.contains_key(device_id) {
                if let Some(&handle) = self.device_nodes.get(device_id) {
                    if let Some(node) = self.arena.get_mut(handle) {
                        node.attributes = attrs.clone();
                        if let Some(status) = attrs.get("status").and_then(Value::as_str) {
                            node.status = status.to_string();
                        }
                    }
                }
                continue;
            }

            let domain_node = self.child_by_id(None, domain).unwrap_or_else(|| {
                self.append_child(None, DeviceTreeNode::new(domain, DeviceTreeLevel::Domain), announce)
            });
            let type_node = self.child_by_id(Some(domain_node), kind).unwrap_or_else(|| {
                self.append_child(
                    Some(domain_node),
                    DeviceTreeNode::new(kind, DeviceTreeLevel::Type),
                    announce,
                )
            });
            let mut node = DeviceTreeNode::new(device_id, DeviceTreeLevel::Member);
            node.attributes = attrs.clone();
            if let Some(status) = attrs.get("status").and_then(Value::as_str) {
                node.status = status.to_string();
            }
            self.append_child(Some(type_node), node, announce);
            new_devices.push(device_id.to_string());
        }
        new_devices
    }

    fn child_by_id(&self, parent: Option<NodeHandle>, node_id: &str) -> Option<NodeHandle> {
        let children = match parent {
            Some(handle) => &self.arena.get(handle)?.children,
            None => &self.domains,
        };
        children
            .iter()
            .copied()
            .find(|&c| self.arena.get(c).is_some_and(|n| n.node_id == node_id))
    }

    fn append_child(
        &mut self,
        parent: Option<NodeHandle>,
        mut node: DeviceTreeNode,
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
            None => self.domains.len(),
        };
        let ctx = announce
            .then(|| InsertionContext::enter(&*self.listener, parent, index, index));
        match parent {
            Some(parent_handle) => {
                if let Some(parent_node) = self.arena.get_mut(parent_handle) {
                    parent_node.children.push(handle);
                }
            }
            None => self.domains.push(handle),
        }
        drop(ctx);

        if level == DeviceTreeLevel::Member {
            self.device_nodes.insert(node_id, handle);
        }
        handle
    }
}

impl Default for DeviceTree {
    fn default() -> Self {
        DeviceTree::new()
    }
}
