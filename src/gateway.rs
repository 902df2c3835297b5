//! Egress boundary towards the control server.
//!
//! The coordinator never opens sockets; it submits requests through a
//! [`RequestGateway`] and consumes the results via the ingest protocol when
//! they arrive back. Submissions are non-blocking and may be silently
//! dropped by a failing transport; the affected proxy then simply stays in
//! `Requested` until the next topology update triggers a retry.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::hash::Value;

/// Adapter through which the coordinator reaches the control server.
pub trait RequestGateway: Send + Sync {
    /// Ask for the schema of `class_id` on `server_id`.
    fn request_class_schema(&self, server_id: &str, class_id: &str);

    /// Ask for the schema of the online device `device_id`.
    fn request_device_schema(&self, device_id: &str);

    /// Subscribe to live configuration updates for `device_id`.
    fn start_monitoring(&self, device_id: &str);

    /// Release the live-update subscription for `device_id`.
    fn stop_monitoring(&self, device_id: &str);

    /// Submit user edits as `(dotted property path, value)` pairs, where the
    /// path is prefixed with the device id.
    fn send_property_changes(&self, changes: &[(String, Value)]);
}

/// Gateway that drops every request. Useful for offline sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullGateway;

impl RequestGateway for NullGateway {
    fn request_class_schema(&self, _server_id: &str, _class_id: &str) {}
    fn request_device_schema(&self, _device_id: &str) {}
    fn start_monitoring(&self, _device_id: &str) {}
    fn stop_monitoring(&self, _device_id: &str) {}
    fn send_property_changes(&self, _changes: &[(String, Value)]) {}
}

/// One recorded gateway submission.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    /// A class schema request.
    ClassSchema {
        /// Target server.
        server_id: String,
        /// Target class.
        class_id: String,
    },
    /// A device schema request.
    DeviceSchema {
        /// Target device.
        device_id: String,
    },
    /// A monitoring subscription.
    StartMonitoring {
        /// Target device.
        device_id: String,
    },
    /// A monitoring release.
    StopMonitoring {
        /// Target device.
        device_id: String,
    },
    /// A property-change submission.
    PropertyChanges {
        /// The submitted `(path, value)` pairs.
        changes: Vec<(String, Value)>,
    },
}

/// Gateway that records every submission, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct RecordingGateway {
    calls: Mutex<Vec<GatewayCall>>,
}

impl RecordingGateway {
    /// A fresh recorder behind an `Arc`, ready to hand to the coordinator.
    pub fn shared() -> Arc<RecordingGateway> {
        Arc::new(RecordingGateway::default())
    }

    /// Snapshot of all recorded calls in submission order.
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().clone()
    }

    /// Drop all recorded calls.
    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    /// Count how many recorded calls satisfy `predicate`.
    pub fn count(&self, predicate: impl Fn(&GatewayCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| predicate(c)).count()
    }
}

impl RequestGateway for RecordingGateway {
    fn request_class_schema(&self, server_id: &str, class_id: &str) {
        self.calls.lock().push(GatewayCall::ClassSchema {
            server_id: server_id.to_string(),
            class_id: class_id.to_string(),
        });
    }

    fn request_device_schema(&self, device_id: &str) {
        self.calls
            .lock()
            .push(GatewayCall::DeviceSchema { device_id: device_id.to_string() });
    }

    fn start_monitoring(&self, device_id: &str) {
        self.calls
            .lock()
            .push(GatewayCall::StartMonitoring { device_id: device_id.to_string() });
    }

    fn stop_monitoring(&self, device_id: &str) {
        self.calls
            .lock()
            .push(GatewayCall::StopMonitoring { device_id: device_id.to_string() });
    }

    fn send_property_changes(&self, changes: &[(String, Value)]) {
        self.calls
            .lock()
            .push(GatewayCall::PropertyChanges { changes: changes.to_vec() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_keeps_submission_order() {
        let gw = RecordingGateway::shared();
        gw.request_class_schema("srv", "Cls");
        gw.start_monitoring("dev");
        let calls = gw.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0],
            GatewayCall::ClassSchema { server_id: "srv".into(), class_id: "Cls".into() }
        );
    }
}
