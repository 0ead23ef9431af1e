//! Plugin catalogs, download/load lifecycle, and load/unload
//! notifications (§4.3).

use crate::oip_registry::OipRegistry;
use async_trait::async_trait;
use provd_domain::{EngineError, Oip, Plugin, PluginEvent, PluginObserver, PluginRecord, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tracing::{info, warn};

/// Fetches and caches the installable-plugin catalog from the
/// configured plugin server.
#[async_trait]
pub trait CatalogFetcher: Send + Sync {
    async fn fetch_installable(&self, plugin_server_url: &str) -> Result<Vec<PluginRecord>>;
}

/// Downloads and unpacks a plugin archive under the plugin root,
/// reporting progress through the given OIP. Implementations retry
/// with exponential backoff up to a catalog-defined cap (§7).
#[async_trait]
pub trait PluginDownloader: Send + Sync {
    async fn download(&self, id: &str, oip: &Oip) -> Result<()>;
    async fn remove(&self, id: &str) -> Result<()>;
}

/// Reads `plugin.info` for an already-downloaded plugin and constructs
/// its runtime object. Load failure leaves the plugin installed but not
/// loaded (§4.3).
#[async_trait]
pub trait PluginLoader: Send + Sync {
    async fn load(&self, id: &str) -> Result<Arc<dyn Plugin>>;
}

struct Observers {
    subscribers: Vec<Weak<dyn PluginObserver>>,
}

impl Observers {
    fn notify(&mut self, event: PluginEvent) {
        self.subscribers.retain(|weak| weak.upgrade().is_some());
        for weak in &self.subscribers {
            if let Some(observer) = weak.upgrade() {
                observer.on_plugin_event(&event);
            }
        }
    }
}

pub struct PluginManager {
    catalog_fetcher: Arc<dyn CatalogFetcher>,
    downloader: Arc<dyn PluginDownloader>,
    loader: Arc<dyn PluginLoader>,
    installable: Mutex<Vec<PluginRecord>>,
    installed_ids: Mutex<Vec<String>>,
    loaded: Mutex<HashMap<String, Arc<dyn Plugin>>>,
    oips: OipRegistry,
    observers: Mutex<Observers>,
}

impl PluginManager {
    pub fn new(
        catalog_fetcher: Arc<dyn CatalogFetcher>,
        downloader: Arc<dyn PluginDownloader>,
        loader: Arc<dyn PluginLoader>,
    ) -> Self {
        Self {
            catalog_fetcher,
            downloader,
            loader,
            installable: Mutex::new(Vec::new()),
            installed_ids: Mutex::new(Vec::new()),
            loaded: Mutex::new(HashMap::new()),
            oips: OipRegistry::new(),
            observers: Mutex::new(Observers { subscribers: Vec::new() }),
        }
    }

    pub fn subscribe(&self, observer: Weak<dyn PluginObserver>) {
        self.observers.lock().unwrap().subscribers.push(observer);
    }

    pub fn list_installable(&self) -> Vec<PluginRecord> {
        self.installable.lock().unwrap().clone()
    }

    pub fn list_installed(&self) -> Vec<String> {
        self.installed_ids.lock().unwrap().clone()
    }

    pub fn get_loaded(&self, id: &str) -> Option<Arc<dyn Plugin>> {
        self.loaded.lock().unwrap().get(id).cloned()
    }

    pub fn is_loaded(&self, id: &str) -> bool {
        self.loaded.lock().unwrap().contains_key(id)
    }

    /// Refreshes the installable catalog from `plugin_server_url`.
    /// Long-running: returns an OIP under the key `"update"`.
    pub async fn update(&self, plugin_server_url: &str) -> Result<Oip> {
        let oip = self.oips.begin("update")?;
        match self.catalog_fetcher.fetch_installable(plugin_server_url).await {
            Ok(records) => {
                *self.installable.lock().unwrap() = records;
                oip.mark_success();
            }
            Err(err) => {
                warn!(error = %err, "plugin catalog update failed");
                oip.mark_fail();
            }
        }
        Ok(oip)
    }

    /// Downloads and unpacks plugin `id`. Fails fast if `id` is already
    /// installed, or if an install/upgrade for `id` is already running.
    pub async fn install(&self, id: &str) -> Result<Oip> {
        if self.installed_ids.lock().unwrap().iter().any(|i| i == id) {
            return Err(EngineError::PluginAlreadyInstalled(id.to_string()));
        }
        let oip = self.oips.begin(id)?;
        match self.downloader.download(id, &oip).await {
            Ok(()) => {
                self.installed_ids.lock().unwrap().push(id.to_string());
                oip.mark_success();
                info!(plugin = id, "plugin installed");
            }
            Err(err) => {
                warn!(plugin = id, error = %err, "plugin install failed");
                oip.mark_fail();
            }
        }
        Ok(oip)
    }

    /// Unloads then re-downloads plugin `id`. Requires it to already be
    /// installed.
    pub async fn upgrade(&self, id: &str) -> Result<Oip> {
        if !self.installed_ids.lock().unwrap().iter().any(|i| i == id) {
            return Err(EngineError::PluginNotLoaded(id.to_string()));
        }
        let oip = self.oips.begin(id)?;
        self.unload(id);
        match self.downloader.download(id, &oip).await {
            Ok(()) => {
                oip.mark_success();
                info!(plugin = id, "plugin upgraded");
            }
            Err(err) => {
                warn!(plugin = id, error = %err, "plugin upgrade failed");
                oip.mark_fail();
            }
        }
        Ok(oip)
    }

    /// Always unloads first, synchronously. Removes the plugin's files.
    pub async fn uninstall(&self, id: &str) -> Result<()> {
        self.unload(id);
        self.downloader.remove(id).await?;
        self.installed_ids.lock().unwrap().retain(|i| i != id);
        Ok(())
    }

    /// Reads `plugin.info`, constructs the runtime object, and calls
    /// `configure_common` with the given process-wide base raw-config.
    pub async fn load(&self, id: &str, base_raw_config: &provd_domain::Document) -> Result<()> {
        let plugin = self.loader.load(id).await?;
        plugin.configure_common(base_raw_config).await?;
        self.loaded.lock().unwrap().insert(id.to_string(), plugin);
        self.observers.lock().unwrap().notify(PluginEvent::loaded(id));
        Ok(())
    }

    pub fn unload(&self, id: &str) {
        if self.loaded.lock().unwrap().remove(id).is_some() {
            self.observers.lock().unwrap().notify(PluginEvent::unloaded(id));
        }
    }
}
