//! Orchestration layer: the provisioning engine's use cases over the
//! domain's entities and contracts.

pub mod config_lifecycle;
pub mod configure_service;
pub mod device_lifecycle;
pub mod identification;
pub mod oip_registry;
pub mod plugin_manager;
pub mod resolver;
pub mod rwlock;
pub mod validator;

#[cfg(test)]
pub(crate) mod test_support;

pub use config_lifecycle::ConfigLifecycle;
pub use configure_service::{ConfigureService, ParamStore};
pub use device_lifecycle::DeviceLifecycle;
pub use identification::{
    AddDeviceRetriever, AddInfoUpdater, CompositeExtractor, DeviceRetriever, DeviceUpdater,
    ExactFieldRetriever, ExtractorMergePolicy, FixedInfoExtractor, IdentificationOutcome,
    IdentificationPipeline, LastSeenUpdater, RemoteStateUpdater, RemoveOutdatedIpUpdater,
    RetrieverChain, VotingUpdater,
};
pub use oip_registry::OipRegistry;
pub use plugin_manager::{CatalogFetcher, PluginDownloader, PluginLoader, PluginManager};
pub use rwlock::RwPreferWriteLock;
