//! Train-aware timestamps.
//!
//! Values arriving from the control server carry a `(seconds, fraction,
//! train_id)` triple as attributes on the configuration leaf. The fraction is
//! in attoseconds, the train id is facility-specific. The core treats the
//! triple as opaque ordering metadata; it never consults wall-clock time.

use serde::{Deserialize, Serialize};

use crate::hash::{Attributes, Value};

/// Attribute key carrying the epoch seconds of a leaf update.
pub const ATTR_SEC: &str = "sec";
/// Attribute key carrying the sub-second fraction (attoseconds).
pub const ATTR_FRAC: &str = "frac";
/// Attribute key carrying the train id.
pub const ATTR_TID: &str = "tid";

/// Timestamp of a remote value update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp {
    /// Seconds since the epoch.
    pub seconds: u64,
    /// Attosecond fraction within the second.
    pub fraction: u64,
    /// Id of the pulse train the value belongs to, 0 when unknown.
    pub train_id: u64,
}

impl Timestamp {
    /// Create a timestamp from its raw parts.
    pub fn new(seconds: u64, fraction: u64, train_id: u64) -> Self {
        Timestamp { seconds, fraction, train_id }
    }

    /// Read the timestamp triple from configuration attributes.
    ///
    /// Returns `None` unless all three attribute keys are present with
    /// unsigned values; partially stamped updates carry no usable ordering
    /// information.
    pub fn from_attributes(attrs: &Attributes) -> Option<Self> {
        let seconds = attrs.get(ATTR_SEC)?.as_u64()?;
        let fraction = attrs.get(ATTR_FRAC)?.as_u64()?;
        let train_id = attrs.get(ATTR_TID)?.as_u64()?;
        Some(Timestamp { seconds, fraction, train_id })
    }

    /// Write the timestamp triple into configuration attributes.
    pub fn write_attributes(&self, attrs: &mut Attributes) {
        attrs.insert(ATTR_SEC.to_string(), Value::UInt64(self.seconds));
        attrs.insert(ATTR_FRAC.to_string(), Value::UInt64(self.fraction));
        attrs.insert(ATTR_TID.to_string(), Value::UInt64(self.train_id));
    }
}
