//! Shared application state the REST handlers borrow from (§6).
//!
//! Everything mutable the engine touches — the two collections, the
//! plugin manager, the configure service — lives behind the single
//! writer-preferring lock (§5); handlers acquire it for the duration of
//! one engine operation, never across an await boundary beyond that.

use crate::auth::TokenVerifier;
use infrastructure::{JsonFileCollection, JsonParamStore};
use provd_domain::{Collection, ConfigCollection, Document};
use provd_engine::{ConfigureService, OipRegistry, PluginManager, RwPreferWriteLock};
use std::sync::Arc;

pub struct AppState {
    pub devices: Arc<JsonFileCollection>,
    pub configs: Arc<JsonFileCollection>,
    pub plugins: Arc<PluginManager>,
    pub configure_service: Arc<ConfigureService<JsonParamStore>>,
    pub lock: RwPreferWriteLock,
    /// Tracks device-synchronize OIPs, separate from the plugin
    /// manager's own registry (which keys on plugin id, not device id).
    pub sync_oips: OipRegistry,
    pub base_raw_config: Document,
    /// The engine's currently-authenticated tenant (§4.5 tenant rule).
    pub current_tenant: String,
    pub plugin_server_url: String,
    pub verifier: Arc<dyn TokenVerifier>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        devices: Arc<JsonFileCollection>,
        configs: Arc<JsonFileCollection>,
        plugins: Arc<PluginManager>,
        configure_service: Arc<ConfigureService<JsonParamStore>>,
        base_raw_config: Document,
        current_tenant: String,
        plugin_server_url: String,
        verifier: Arc<dyn TokenVerifier>,
    ) -> Self {
        Self {
            devices,
            configs,
            plugins,
            configure_service,
            lock: RwPreferWriteLock::new(),
            sync_oips: OipRegistry::new(),
            base_raw_config,
            current_tenant,
            plugin_server_url,
            verifier,
        }
    }

    pub fn devices(&self) -> &dyn Collection {
        self.devices.as_ref()
    }

    pub fn configs(&self) -> &dyn ConfigCollection {
        self.configs.as_ref()
    }
}
