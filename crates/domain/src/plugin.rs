use crate::device::Device;
use crate::document::Document;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A capability a plugin declares in its `plugin.info` (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PluginCapability {
    Install,
    Configure,
}

/// Metadata about an installed or installable plugin (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginRecord {
    pub id: String,
    pub version: String,
    pub description: String,
    pub capabilities: Vec<PluginCapability>,
    /// `[min, max]` engine-version range this plugin declares support for.
    pub compatibility: (String, String),
}

/// The inbound surface a phone talks over while being identified (§4.7).
#[derive(Debug, Clone, PartialEq)]
pub enum Transport {
    Tftp { filename: String },
    Http { filename: String, user_agent: Option<String> },
    Dhcp { option60: Option<String> },
}

/// A single identification request, already stripped of transport
/// framing by the (out-of-scope) TFTP/HTTP/DHCP collaborators.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentRequest {
    pub ip: String,
    pub transport: Transport,
}

impl IdentRequest {
    pub fn filename(&self) -> Option<&str> {
        match &self.transport {
            Transport::Tftp { filename } => Some(filename),
            Transport::Http { filename, .. } => Some(filename),
            Transport::Dhcp { .. } => None,
        }
    }
}

/// Extracts a partial device-info mapping (any subset of
/// `{vendor, model, version, mac}`) from a raw request (§4.4).
pub trait InfoExtractor: Send + Sync {
    fn extract(&self, request: &IdentRequest) -> Option<Document>;
}

/// How confidently a plugin claims support for an observed
/// `(vendor, model, version)` triple (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PgAssociation {
    Improbable,
    Probable,
    Incomplete,
    Complete,
    Full,
    No,
}

pub trait PgAssociator: Send + Sync {
    fn associate(
        &self,
        vendor: Option<&str>,
        model: Option<&str>,
        version: Option<&str>,
    ) -> PgAssociation;
}

/// The contract every loaded vendor plugin implements (§4.4).
///
/// Only the contract is specified here; concrete vendor plugin bodies
/// live outside this workspace and are registered with the plugin
/// manager at load time.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn id(&self) -> &str;

    /// Writes any files the device will fetch. Side-effectful under the
    /// TFTP root. The engine catches failures and maps them to
    /// `configured=false`; implementations should still return `Err` on
    /// failure rather than silently doing nothing.
    async fn configure(&self, device: &Device, raw_config: &Document) -> Result<()>;

    /// Removes files previously written by `configure`. Must be
    /// idempotent: calling it twice, or on a device never configured,
    /// is not an error.
    async fn deconfigure(&self, device: &Device) -> Result<()>;

    /// Emits a vendor-specific nudge so the phone re-fetches its config.
    async fn synchronize(&self, device: &Device, raw_config: &Document) -> Result<()>;

    /// Writes shared files (firmware manifests, common directories) once
    /// at load time.
    async fn configure_common(&self, base_raw_config: &Document) -> Result<()>;

    fn info_extractor(&self) -> &dyn InfoExtractor;

    fn pg_associator(&self) -> &dyn PgAssociator;

    /// Names a file whose fetch indicates the phone has (re)loaded its
    /// config, if this plugin supports remote-state observation.
    fn remote_state_trigger_filename(&self, _device: &Device) -> Option<String> {
        None
    }

    /// Whether fetching `name` should trigger a security-audit log line.
    fn is_sensitive_filename(&self, _name: &str) -> bool {
        false
    }
}
