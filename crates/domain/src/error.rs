use thiserror::Error;

/// The stable error taxonomy shared by every layer of the engine.
///
/// Variants map to a fixed HTTP status at the facade boundary; callers
/// inside the engine match on variants, never on the formatted message.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("no document with id {0}")]
    InvalidId(String),

    #[error("{0} is not deletable")]
    NonDeletable(String),

    #[error("invalid parameter {key}: {reason}")]
    InvalidParameter { key: String, reason: String },

    #[error("raw config invalid: {0}")]
    RawConfigInvalid(String),

    #[error("plugin {0} is not loaded")]
    PluginNotLoaded(String),

    #[error("plugin {0} is already installed")]
    PluginAlreadyInstalled(String),

    #[error("operation already in progress for {0}")]
    PluginBusy(String),

    #[error("tenant {given} is not valid for device owned by {owner}")]
    TenantInvalidForDevice { given: String, owner: String },

    #[error("device {0} is not in the provd tenant")]
    DeviceNotInProvdTenant(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("can't synchronize not configured device")]
    SyncUnsupported,

    #[error("synchronize failed: {0}")]
    SyncFailed(String),

    #[error("unknown configure-service key: {0}")]
    UnknownKey(String),

    #[error("config {0} has a cyclic parent chain")]
    CyclicConfig(String),

    #[error("io error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::IoError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
