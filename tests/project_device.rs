//! Life cycle of project devices: the stable identity bridging the online
//! and offline proxies, its stored configuration and its monitor handling.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use control_topology::{
    ActiveProxy, GatewayCall, Hash, ProxyStatus, RecordingGateway, Schema, SchemaBuilder,
    SystemTopology, TopologyChanges, TopologyError, Value, ValueKind,
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

fn gone_entry(group: &str, instance_id: &str) -> Hash {
    let mut hash = Hash::new();
    hash.set(&format!("{group}.{instance_id}"), Hash::new());
    hash
}

fn schema_for(class_id: &str) -> Schema {
    SchemaBuilder::new(class_id)
        .leaf("speed", ValueKind::Double)
        .default_value("speed", 10.0)
        .leaf("position", ValueKind::Double)
        .build()
}

#[test]
fn new_identity_requires_server_and_class() {
    let (_gateway, topology) = fixture();
    let err = topology
        .get_project_device("XHQ/MOTOR/1", "", "", None)
        .unwrap_err();
    assert!(matches!(err, TopologyError::MissingIdentity { .. }));
}

#[test]
fn offline_device_waits_for_its_server() {
    let (gateway, topology) = fixture();

    let mut config = Hash::new();
    config.set("speed", 2.5);
    let instance = topology
        .get_project_device("XHQ/MOTOR/1", "srvA", "Motor", Some(&config))
        .unwrap();

    // Nothing to request while the server is absent.
    assert_eq!(instance.status(), ProxyStatus::Offline);
    assert_eq!(
        gateway.count(|c| matches!(c, GatewayCall::ClassSchema { .. })),
        0
    );

    let config_updates = Arc::new(AtomicUsize::new(0));
    let counter = config_updates.clone();
    instance.offline_proxy().config_update.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    // The server announces itself; exactly one schema request goes out.
    let mut fragment = Hash::new();
    server_entry(&mut fragment, "srvA", "host1", &["Motor"]);
    topology.instance_new(&fragment);
    assert_eq!(instance.status(), ProxyStatus::Requested);
    assert_eq!(
        gateway.count(|c| matches!(c, GatewayCall::ClassSchema { .. })),
        1
    );

    // Schema arrival builds the binding and reapplies the stored project
    // configuration in a single pass.
    topology.class_schema_updated("srvA", "Motor", schema_for("Motor"));
    assert_eq!(instance.status(), ProxyStatus::Ok);
    assert_eq!(config_updates.load(Ordering::SeqCst), 1);

    let offline = instance.offline_proxy();
    let binding = offline.binding();
    assert_eq!(binding.get("speed").unwrap().value(), Some(&Value::Double(2.5)));
    assert_eq!(binding.get("position").unwrap().value(), Some(&Value::Double(0.0)));
    drop(binding);

    let saved = instance.collect_offline_configuration();
    assert_eq!(saved.get_opt("speed").and_then(Value::as_f64), Some(2.5));
}

#[test]
fn config_applies_immediately_once_a_schema_is_there() {
    let (_gateway, topology) = fixture();
    topology.class_schema_updated("srvA", "Motor", schema_for("Motor"));

    let instance = topology
        .get_project_device("XHQ/MOTOR/1", "srvA", "Motor", None)
        .unwrap();
    assert!(!instance.offline_proxy().binding().is_empty());

    let mut config = Hash::new();
    config.set("speed", 4.25);
    instance.set_project_config_hash(Some(config));
    assert_eq!(
        instance.offline_proxy().binding().get("speed").unwrap().value(),
        Some(&Value::Double(4.25))
    );
}

#[test]
fn mismatching_online_class_is_incompatible() {
    let (_gateway, topology) = fixture();
    let mut hash = Hash::new();
    server_entry(&mut hash, "srvA", "host1", &["Motor"]);
    device_entry(&mut hash, "XHQ/MOTOR/1", "host1", "srvA", "Motor");
    topology.initialize(hash);

    let instance = topology
        .get_project_device("XHQ/MOTOR/1", "srvA", "Motor", None)
        .unwrap();

    // The device answers with a different class than the project expects.
    topology.device_schema_updated("XHQ/MOTOR/1", schema_for("Pump"));
    assert!(instance.is_incompatible());
    assert_eq!(instance.status(), ProxyStatus::Incompatible);
    assert!(matches!(instance.proxy(), ActiveProxy::Offline(_)));

    // A matching schema resolves the conflict.
    topology.device_schema_updated("XHQ/MOTOR/1", schema_for("Motor"));
    assert!(!instance.is_incompatible());
    assert_eq!(instance.status(), ProxyStatus::Schema);
    assert!(matches!(instance.proxy(), ActiveProxy::Online(_)));
}

#[test]
fn rename_rekeys_the_identity() {
    let (_gateway, topology) = fixture();
    let instance = topology
        .get_project_device("XHQ/MOTOR/1", "srvA", "Motor", None)
        .unwrap();

    let renames = Arc::new(Mutex::new(Vec::new()));
    let sink = renames.clone();
    instance.identity_update.subscribe(move |(old, new)| {
        sink.lock().push((old.clone(), new.clone()));
    });

    instance.rename(Some("XHQ/MOTOR/2"), None, None);
    assert_eq!(instance.device_id(), "XHQ/MOTOR/2");
    assert_eq!(instance.server_id(), "srvA");
    assert_eq!(
        renames.lock().as_slice(),
        &[("XHQ/MOTOR/1".to_string(), "XHQ/MOTOR/2".to_string())]
    );

    // The identity table follows the new id; the old id is free again.
    let same = topology
        .get_project_device("XHQ/MOTOR/2", "srvA", "Motor", None)
        .unwrap();
    assert!(Arc::ptr_eq(&instance, &same));
    let fresh = topology
        .get_project_device("XHQ/MOTOR/1", "srvA", "Motor", None)
        .unwrap();
    assert!(!Arc::ptr_eq(&instance, &fresh));
}

#[test]
fn rename_with_unchanged_identity_is_silent() {
    let (_gateway, topology) = fixture();
    let instance = topology
        .get_project_device("XHQ/MOTOR/1", "srvA", "Motor", None)
        .unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    instance.save_project.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    instance.rename(Some("XHQ/MOTOR/1"), Some(""), None);
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[test]
fn monitor_is_held_only_while_online() {
    let (gateway, topology) = fixture();
    let instance = topology
        .get_project_device("XHQ/MOTOR/9", "srvA", "Motor", None)
        .unwrap();

    // A consumer while the device is offline leaves the gateway alone.
    instance.start_monitoring();
    assert_eq!(instance.monitor_count(), 1);
    assert_eq!(
        gateway.count(|c| matches!(c, GatewayCall::StartMonitoring { .. })),
        0
    );

    // Coming online attaches the pending monitor.
    let mut fragment = Hash::new();
    server_entry(&mut fragment, "srvA", "host1", &["Motor"]);
    device_entry(&mut fragment, "XHQ/MOTOR/9", "host1", "srvA", "Motor");
    topology.instance_new(&fragment);
    assert_eq!(
        gateway.count(|c| matches!(c, GatewayCall::StartMonitoring { .. })),
        1
    );

    // Going offline releases it again; the consumer count stays.
    topology.topology_update(&TopologyChanges {
        gone: gone_entry("device", "XHQ/MOTOR/9"),
        ..Default::default()
    });
    assert_eq!(
        gateway.count(|c| matches!(c, GatewayCall::StopMonitoring { .. })),
        1
    );
    assert_eq!(instance.monitor_count(), 1);

    instance.stop_monitoring();
    assert_eq!(instance.monitor_count(), 0);
    assert_eq!(
        gateway.count(|c| matches!(c, GatewayCall::StopMonitoring { .. })),
        1
    );
}

#[test]
fn gone_server_empties_the_offline_binding() {
    let (gateway, topology) = fixture();
    let mut hash = Hash::new();
    server_entry(&mut hash, "srvA", "host1", &["Motor"]);
    topology.initialize(hash);

    let mut config = Hash::new();
    config.set("speed", 2.5);
    let instance = topology
        .get_project_device("XHQ/MOTOR/1", "srvA", "Motor", Some(&config))
        .unwrap();
    topology.class_schema_updated("srvA", "Motor", schema_for("Motor"));
    assert_eq!(instance.status(), ProxyStatus::Ok);

    topology.topology_update(&TopologyChanges {
        gone: gone_entry("server", "srvA"),
        ..Default::default()
    });
    assert_eq!(instance.status(), ProxyStatus::NoServer);
    assert!(instance.offline_proxy().binding().is_empty());

    // The returning server triggers a fresh request and the configuration
    // comes back with the schema.
    gateway.clear();
    let mut fragment = Hash::new();
    server_entry(&mut fragment, "srvA", "host1", &["Motor"]);
    topology.instance_new(&fragment);
    assert_eq!(instance.status(), ProxyStatus::Requested);
    assert_eq!(
        gateway.count(|c| matches!(c, GatewayCall::ClassSchema { .. })),
        1
    );

    topology.class_schema_updated("srvA", "Motor", schema_for("Motor"));
    assert_eq!(instance.status(), ProxyStatus::Ok);
    assert_eq!(
        instance.offline_proxy().binding().get("speed").unwrap().value(),
        Some(&Value::Double(2.5))
    );
}

#[test]
fn deleted_identity_is_forgotten() {
    let (_gateway, topology) = fixture();
    let instance = topology
        .get_project_device("XHQ/MOTOR/1", "srvA", "Motor", None)
        .unwrap();
    let removed = topology.delete_project_device("XHQ/MOTOR/1").unwrap();
    assert!(Arc::ptr_eq(&instance, &removed));

    let fresh = topology
        .get_project_device("XHQ/MOTOR/1", "srvA", "Motor", None)
        .unwrap();
    assert!(!Arc::ptr_eq(&instance, &fresh));
}
