use crate::document::Document;
use serde_json::Value;

/// Fields whose change on `update` forces the device back through the
/// configure path (§4.5). Defined by the engine as a reasonable default;
/// a plugin may widen this set for its own devices.
pub const RECONFIGURATION_RELEVANT_FIELDS: &[&str] =
    &["plugin", "config", "mac", "ip", "vendor", "model", "version"];

/// A device document, viewed through the fields this engine understands.
///
/// Wraps a [`Document`] rather than owning a closed struct so that fields
/// a plugin writes (`remote_state_*`, vendor-specific extras) round-trip
/// untouched through every lifecycle operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Device(Document);

impl Device {
    pub fn new(doc: Document) -> Self {
        Self(doc)
    }

    pub fn into_document(self) -> Document {
        self.0
    }

    pub fn document(&self) -> &Document {
        &self.0
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.0
    }

    pub fn id(&self) -> Option<&str> {
        self.0.id()
    }

    pub fn tenant_uuid(&self) -> Option<&str> {
        self.0.get_str("tenant_uuid")
    }

    pub fn mac(&self) -> Option<&str> {
        self.0.get_str("mac")
    }

    pub fn ip(&self) -> Option<&str> {
        self.0.get_str("ip")
    }

    pub fn plugin(&self) -> Option<&str> {
        self.0.get_str("plugin")
    }

    pub fn config(&self) -> Option<&str> {
        self.0.get_str("config")
    }

    pub fn configured(&self) -> bool {
        self.0.get_bool("configured").unwrap_or(false)
    }

    pub fn set_configured(&mut self, configured: bool) {
        self.0.set("configured", Value::Bool(configured));
    }

    pub fn is_new(&self) -> bool {
        self.0.get_bool("is_new").unwrap_or(false)
    }

    pub fn set_is_new(&mut self, is_new: bool) {
        self.0.set("is_new", Value::Bool(is_new));
    }

    pub fn mark_added_auto(&mut self) {
        self.0.set("added", "auto");
    }

    pub fn set_remote_state(&mut self, key: &str, value: Value) {
        self.0.set(format!("remote_state_{key}"), value);
    }

    /// Whether `other` differs from `self` on any field the configure
    /// path cares about (§4.5).
    pub fn differs_on_reconfiguration_relevant_fields(&self, other: &Device) -> bool {
        RECONFIGURATION_RELEVANT_FIELDS
            .iter()
            .any(|field| self.0.get(field) != other.0.get(field))
    }
}

/// The device-lifecycle state machine over the `configured` flag (§4.5),
/// modeled the same way a connection's state machine walks its own
/// transitions: each edge is a fallible, explicit method rather than a
/// field mutation, so illegal transitions are caught at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceLifecycleState {
    Unconfigured,
    Configured,
}

impl DeviceLifecycleState {
    pub fn from_configured_flag(configured: bool) -> Self {
        if configured {
            Self::Configured
        } else {
            Self::Unconfigured
        }
    }

    pub fn can_synchronize(&self) -> bool {
        matches!(self, Self::Configured)
    }

    /// Configure succeeded: move to `Configured` regardless of origin.
    pub fn to_configured(&self) -> Self {
        Self::Configured
    }

    /// Configure was not attempted or failed: move to `Unconfigured`.
    pub fn to_unconfigured(&self) -> Self {
        Self::Unconfigured
    }
}
