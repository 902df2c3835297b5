//! End-to-end exercises of the topology coordinator: ingest handlers,
//! proxy lookup and the navigation trees, driven through a recording
//! gateway.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use control_topology::topology::NodeHandle;
use control_topology::{
    AccessLevel, GatewayCall, Hash, ProxyStatus, RecordingGateway, Schema, SchemaBuilder,
    SystemTopology, TopologyChanges, TreeUpdateListener, Value, ValueKind,
};

fn fixture() -> (Arc<RecordingGateway>, Arc<SystemTopology>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let gateway = RecordingGateway::shared();
    let topology = SystemTopology::new(gateway.clone());
    (gateway, topology)
}

fn server_entry(hash: &mut Hash, server_id: &str, host: &str, classes: &[&str]) {
    let path = format!("server.{server_id}");
    hash.set(&path, Hash::new());
    let attrs = hash.attributes_mut(&path).unwrap();
    attrs.insert("host".into(), Value::from(host));
    attrs.insert(
        "deviceClasses".into(),
        Value::VectorString(classes.iter().map(|c| c.to_string()).collect()),
    );
}

fn device_entry(hash: &mut Hash, device_id: &str, host: &str, server: &str, class: &str) {
    let path = format!("device.{device_id}");
    hash.set(&path, Hash::new());
    let attrs = hash.attributes_mut(&path).unwrap();
    attrs.insert("host".into(), Value::from(host));
    attrs.insert("serverId".into(), Value::from(server));
    attrs.insert("classId".into(), Value::from(class));
    attrs.insert("status".into(), Value::from("ok"));
}

fn sample_topology() -> Hash {
    let mut hash = Hash::new();
    server_entry(&mut hash, "srvA", "host1", &["Motor"]);
    device_entry(&mut hash, "XHQ/MOTOR/1", "host1", "srvA", "Motor");
    device_entry(&mut hash, "XHQ/MOTOR/2", "host1", "srvA", "Motor");
    hash
}

fn gone_entry(group: &str, instance_id: &str) -> Hash {
    let mut hash = Hash::new();
    hash.set(&format!("{group}.{instance_id}"), Hash::new());
    hash
}

fn motor_schema() -> Schema {
    SchemaBuilder::new("Motor")
        .leaf("speed", ValueKind::Double)
        .default_value("speed", 10.0)
        .leaf("position", ValueKind::Double)
        .build()
}

#[test]
fn class_proxy_waits_for_its_server() {
    let (gateway, topology) = fixture();

    let proxy = topology.get_class("srvA", "Motor");
    assert_eq!(proxy.status(), ProxyStatus::NoServer);
    assert!(gateway.calls().is_empty());

    // The server announces itself; the pending class request fires.
    let mut fragment = Hash::new();
    server_entry(&mut fragment, "srvA", "host1", &["Motor"]);
    topology.instance_new(&fragment);
    assert_eq!(proxy.status(), ProxyStatus::Requested);
    assert_eq!(
        gateway.calls(),
        vec![GatewayCall::ClassSchema { server_id: "srvA".into(), class_id: "Motor".into() }]
    );

    topology.class_schema_updated("srvA", "Motor", motor_schema());
    assert_eq!(proxy.status(), ProxyStatus::Ok);
    assert_eq!(
        proxy.binding().get("speed").unwrap().value(),
        Some(&Value::Double(10.0))
    );
    assert_eq!(
        proxy.binding().get("position").unwrap().value(),
        Some(&Value::Double(0.0))
    );
}

#[test]
fn class_without_plugin_is_flagged() {
    let (gateway, topology) = fixture();
    topology.initialize(sample_topology());

    let proxy = topology.get_class("srvA", "Unknown");
    assert_eq!(proxy.status(), ProxyStatus::NoPlugin);
    assert!(gateway.calls().is_empty());
}

#[test]
fn unsolicited_class_schema_is_cached() {
    let (_gateway, topology) = fixture();

    topology.class_schema_updated("srvA", "Motor", motor_schema());
    assert!(topology.get_schema("srvA", "Motor").is_some());
}

#[test]
fn device_schema_then_config() {
    let (gateway, topology) = fixture();
    topology.initialize(sample_topology());

    let proxy = topology.get_device("XHQ/MOTOR/1", true);
    assert_eq!(proxy.status(), ProxyStatus::Requested);
    assert_eq!(
        gateway.calls(),
        vec![GatewayCall::DeviceSchema { device_id: "XHQ/MOTOR/1".into() }]
    );

    topology.device_schema_updated("XHQ/MOTOR/1", motor_schema());
    assert_eq!(proxy.status(), ProxyStatus::Schema);
    assert_eq!(proxy.class_id(), "Motor");
    assert!(!proxy.binding().is_empty());

    let mut config = Hash::new();
    config.set("speed", 3.5);
    config.set("position", 7.0);
    topology.device_config_updated("XHQ/MOTOR/1", &config);
    assert_eq!(
        proxy.binding().get("speed").unwrap().value(),
        Some(&Value::Double(3.5))
    );
}

#[test]
fn pending_edits_survive_config_updates() {
    let (_gateway, topology) = fixture();
    topology.initialize(sample_topology());

    let proxy = topology.get_device("XHQ/MOTOR/1", true);
    topology.device_schema_updated("XHQ/MOTOR/1", motor_schema());
    proxy
        .binding_mut()
        .get_mut("speed")
        .unwrap()
        .set_edit_value(Value::Double(99.0));

    let mut config = Hash::new();
    config.set("speed", 3.5);
    topology.device_config_updated("XHQ/MOTOR/1", &config);

    let binding = proxy.binding();
    let node = binding.get("speed").unwrap();
    assert_eq!(node.value(), Some(&Value::Double(3.5)));
    assert_eq!(node.edit_value(), Some(&Value::Double(99.0)));
}

#[test]
fn gone_device_resets_its_proxy() {
    let (_gateway, topology) = fixture();
    topology.initialize(sample_topology());

    let proxy = topology.get_device("XHQ/MOTOR/1", false);
    assert_eq!(proxy.status(), ProxyStatus::Online);
    assert!(proxy.topology_node().is_some());

    let changes = TopologyChanges {
        gone: gone_entry("device", "XHQ/MOTOR/1"),
        ..Default::default()
    };
    let (devices, servers) = topology.topology_update(&changes);
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].device_id, "XHQ/MOTOR/1");
    assert_eq!(devices[0].class_id, "Motor");
    assert!(servers.is_empty());

    assert_eq!(proxy.status(), ProxyStatus::Offline);
    assert!(proxy.topology_node().is_none());
    assert!(topology.system_tree().get_instance_node("XHQ/MOTOR/1").is_none());
    assert!(topology.device_tree().get_instance_node("XHQ/MOTOR/1").is_none());
}

#[test]
fn gone_server_clears_class_state() {
    let (_gateway, topology) = fixture();
    topology.initialize(sample_topology());

    let proxy = topology.get_class("srvA", "Motor");
    topology.class_schema_updated("srvA", "Motor", motor_schema());
    assert_eq!(proxy.status(), ProxyStatus::Ok);

    let changes = TopologyChanges {
        gone: gone_entry("server", "srvA"),
        ..Default::default()
    };
    let (_, servers) = topology.topology_update(&changes);
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].server_id, "srvA");
    assert_eq!(servers[0].host, "host1");

    assert_eq!(proxy.status(), ProxyStatus::NoServer);
    assert!(proxy.binding().is_empty());
    assert!(topology.get_schema("srvA", "Motor").is_none());
}

#[test]
fn late_schema_after_server_gone_is_only_cached() {
    let (gateway, topology) = fixture();
    topology.initialize(sample_topology());

    let proxy = topology.get_class("srvA", "Motor");
    assert_eq!(proxy.status(), ProxyStatus::Requested);
    gateway.clear();

    topology.topology_update(&TopologyChanges {
        gone: gone_entry("server", "srvA"),
        ..Default::default()
    });
    assert_eq!(proxy.status(), ProxyStatus::NoServer);

    // The answer to the earlier request arrives after the server left.
    topology.class_schema_updated("srvA", "Motor", motor_schema());
    assert_eq!(proxy.status(), ProxyStatus::NoServer);
    assert!(proxy.binding().is_empty());
    assert!(topology.get_schema("srvA", "Motor").is_some());
}

#[test]
fn server_gone_alone_keeps_its_devices_online() {
    let (_gateway, topology) = fixture();
    topology.initialize(sample_topology());

    let proxy = topology.get_device("XHQ/MOTOR/1", false);
    assert_eq!(proxy.status(), ProxyStatus::Online);

    // Only the server leaves; the mirror still carries the device until
    // its own gone message arrives.
    topology.topology_update(&TopologyChanges {
        gone: gone_entry("server", "srvA"),
        ..Default::default()
    });
    assert_eq!(proxy.status(), ProxyStatus::Online);

    topology.topology_update(&TopologyChanges {
        gone: gone_entry("device", "XHQ/MOTOR/1"),
        ..Default::default()
    });
    assert_eq!(proxy.status(), ProxyStatus::Offline);
}

#[test]
fn returning_server_rearms_the_class_proxy() {
    let (gateway, topology) = fixture();
    topology.initialize(sample_topology());

    let proxy = topology.get_class("srvA", "Motor");
    topology.class_schema_updated("srvA", "Motor", motor_schema());
    topology.topology_update(&TopologyChanges {
        gone: gone_entry("server", "srvA"),
        ..Default::default()
    });
    gateway.clear();

    let mut fragment = Hash::new();
    server_entry(&mut fragment, "srvA", "host1", &["Motor"]);
    topology.instance_new(&fragment);
    assert_eq!(proxy.status(), ProxyStatus::Requested);
    assert_eq!(
        gateway.count(|c| matches!(c, GatewayCall::ClassSchema { .. })),
        1
    );
}

#[test]
fn historic_data_reaches_subscribers() {
    let (_gateway, topology) = fixture();
    topology.initialize(sample_topology());

    let proxy = topology.get_device("XHQ/MOTOR/1", false);
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    proxy.historic_data.subscribe(move |data| {
        sink.lock().push((data.path.clone(), data.samples.len()));
    });

    let mut sample = Hash::new();
    sample.set("v", 1.5);
    topology.historic_data("XHQ/MOTOR/1", "speed", vec![sample.clone(), sample]);
    assert_eq!(received.lock().as_slice(), &[("speed".to_string(), 2)]);
}

#[test]
fn find_respects_node_visibility() {
    let (_gateway, topology) = fixture();

    let mut hash = sample_topology();
    hash.attributes_mut("device.XHQ/MOTOR/2")
        .unwrap()
        .insert("visibility".into(), Value::Int32(AccessLevel::Expert.code()));
    topology.initialize(hash);

    let tree = topology.system_tree();
    let observer = tree.find("XHQ/MOTOR", AccessLevel::Observer, true, false, false);
    assert_eq!(observer.len(), 1);
    let expert = tree.find("XHQ/MOTOR", AccessLevel::Expert, true, false, false);
    assert_eq!(expert.len(), 2);

    // Full match anchors both ends.
    assert!(tree.find("XHQ/MOTOR", AccessLevel::Expert, true, false, true).is_empty());
    assert_eq!(
        tree.find("XHQ/MOTOR/1", AccessLevel::Expert, true, false, true).len(),
        1
    );
}

#[test]
fn broken_search_patterns_yield_nothing() {
    let (_gateway, topology) = fixture();
    topology.initialize(sample_topology());

    let tree = topology.system_tree();
    assert!(tree.find("(unclosed", AccessLevel::Admin, false, true, false).is_empty());
}

#[test]
fn device_tree_groups_by_domain() {
    let (_gateway, topology) = fixture();
    let mut hash = sample_topology();
    // Malformed id, ends up nowhere in the device tree.
    device_entry(&mut hash, "plainname", "host1", "srvA", "Motor");
    topology.initialize(hash);

    let tree = topology.device_tree();
    assert_eq!(tree.domains().len(), 1);
    assert!(tree.get_instance_node("XHQ/MOTOR/1").is_some());
    assert!(tree.get_instance_node("plainname").is_none());
}

// ---------------------------------------------------------------------------
// Structural notifications

#[derive(Default)]
struct RecordingListener {
    events: Mutex<Vec<String>>,
}

impl RecordingListener {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut self.events.lock())
    }
}

impl TreeUpdateListener for RecordingListener {
    fn reset_begin(&self) {
        self.events.lock().push("reset_begin".into());
    }
    fn reset_end(&self) {
        self.events.lock().push("reset_end".into());
    }
    fn insertion_begin(&self, _parent: Option<NodeHandle>, first: usize, last: usize) {
        self.events.lock().push(format!("insert_begin {first}..{last}"));
    }
    fn insertion_end(&self) {
        self.events.lock().push("insert_end".into());
    }
    fn removal_begin(&self, _node: NodeHandle) {
        self.events.lock().push("remove_begin".into());
    }
    fn removal_end(&self) {
        self.events.lock().push("remove_end".into());
    }
    fn removal_children_begin(&self, _parent: NodeHandle) {
        self.events.lock().push("remove_children_begin".into());
    }
    fn removal_children_end(&self) {
        self.events.lock().push("remove_children_end".into());
    }
    fn status_update(&self, device_ids: &[String]) {
        self.events.lock().push(format!("status {}", device_ids.join(",")));
    }
}

#[test]
fn tree_listener_sees_reset_and_insertions() {
    let (_gateway, topology) = fixture();
    let listener = Arc::new(RecordingListener::default());

    struct Forward(Arc<RecordingListener>);
    impl TreeUpdateListener for Forward {
        fn reset_begin(&self) {
            self.0.reset_begin();
        }
        fn reset_end(&self) {
            self.0.reset_end();
        }
        fn insertion_begin(&self, parent: Option<NodeHandle>, first: usize, last: usize) {
            self.0.insertion_begin(parent, first, last);
        }
        fn insertion_end(&self) {
            self.0.insertion_end();
        }
        fn removal_begin(&self, node: NodeHandle) {
            self.0.removal_begin(node);
        }
        fn removal_end(&self) {
            self.0.removal_end();
        }
        fn removal_children_begin(&self, parent: NodeHandle) {
            self.0.removal_children_begin(parent);
        }
        fn removal_children_end(&self) {
            self.0.removal_children_end();
        }
        fn status_update(&self, device_ids: &[String]) {
            self.0.status_update(device_ids);
        }
    }
    topology.set_system_tree_listener(Arc::new(Forward(listener.clone())));

    topology.initialize(sample_topology());
    let events = listener.take();
    assert_eq!(events.first().map(String::as_str), Some("reset_begin"));
    assert_eq!(events.last().map(String::as_str), Some("reset_end"));

    let mut fragment = Hash::new();
    device_entry(&mut fragment, "XHQ/MOTOR/3", "host1", "srvA", "Motor");
    topology.instance_new(&fragment);
    let events = listener.take();
    assert!(events.iter().any(|e| e.starts_with("insert_begin")));

    // The three devices leave in one children bracket while their class
    // still lives; the class, the server and the emptied host each get
    // their own removal bracket, and every bracket closes.
    topology.topology_update(&TopologyChanges {
        gone: gone_entry("server", "srvA"),
        ..Default::default()
    });
    let events = listener.take();
    let child_begins = events.iter().filter(|e| *e == "remove_children_begin").count();
    let child_ends = events.iter().filter(|e| *e == "remove_children_end").count();
    assert_eq!(child_begins, 1);
    assert_eq!(child_begins, child_ends);
    let begins = events.iter().filter(|e| *e == "remove_begin").count();
    let ends = events.iter().filter(|e| *e == "remove_end").count();
    assert_eq!(begins, 3);
    assert_eq!(begins, ends);
}

#[test]
fn instance_update_batches_status_notifications() {
    let (_gateway, topology) = fixture();
    let listener = Arc::new(RecordingListener::default());

    struct Forward(Arc<RecordingListener>);
    impl TreeUpdateListener for Forward {
        fn status_update(&self, device_ids: &[String]) {
            self.0.status_update(device_ids);
        }
    }
    topology.set_system_tree_listener(Arc::new(Forward(listener.clone())));
    topology.initialize(sample_topology());
    listener.take();

    let mut fragment = Hash::new();
    device_entry(&mut fragment, "XHQ/MOTOR/1", "host1", "srvA", "Motor");
    fragment
        .attributes_mut("device.XHQ/MOTOR/1")
        .unwrap()
        .insert("status".into(), Value::from("error"));
    device_entry(&mut fragment, "XHQ/MOTOR/2", "host1", "srvA", "Motor");
    topology.instance_updated(&fragment);

    assert_eq!(
        listener.take(),
        vec!["status XHQ/MOTOR/1,XHQ/MOTOR/2".to_string()]
    );

    let tree = topology.system_tree();
    let handle = tree.get_instance_node("XHQ/MOTOR/1").unwrap();
    assert_eq!(tree.node(handle).unwrap().status, "error");
}

#[test]
fn re_announced_instances_are_reported() {
    let (_gateway, topology) = fixture();
    topology.initialize(sample_topology());

    let mut fragment = Hash::new();
    server_entry(&mut fragment, "srvA", "host1", &["Motor"]);
    device_entry(&mut fragment, "XHQ/MOTOR/1", "host1", "srvA", "Motor");
    let existing = topology.instance_new(&fragment);
    // Removing the colliding server already took its devices with it, so
    // only the server id is reported.
    assert_eq!(existing, vec!["srvA".to_string()]);
    // The tree was rebuilt for the collided ids.
    assert!(topology.system_tree().get_instance_node("XHQ/MOTOR/1").is_some());
}

#[test]
fn redundant_updates_do_not_refire_status() {
    let (_gateway, topology) = fixture();
    topology.initialize(sample_topology());

    let proxy = topology.get_device("XHQ/MOTOR/1", false);
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    proxy.status_update.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    // Refresh the same instance twice; the proxy is already online.
    let mut fragment = Hash::new();
    device_entry(&mut fragment, "XHQ/MOTOR/1", "host1", "srvA", "Motor");
    topology.instance_updated(&fragment);
    topology.instance_updated(&fragment);
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}
