//! Device insert/update/delete/reconfigure/synchronize orchestration,
//! the state machine of §4.5.

use crate::plugin_manager::PluginManager;
use crate::validator;
use provd_domain::{
    Collection, Config, ConfigCollection, Device, DeviceLifecycleState, Document, EngineError,
    FindOptions, Result, Selector,
};
use tracing::{info, warn};

/// Bundles the collaborators a device operation needs. Borrowed, not
/// owned: callers hold these behind the engine's single write lock for
/// the duration of the call (§5).
pub struct DeviceLifecycle<'a> {
    pub devices: &'a dyn Collection,
    pub configs: &'a dyn ConfigCollection,
    pub plugins: &'a PluginManager,
    pub base_raw_config: &'a Document,
}

impl<'a> DeviceLifecycle<'a> {
    /// Attempts to bring `device` to `configured=true`. Always succeeds
    /// in the sense that it never returns `Err`: any failure along the
    /// way (no plugin loaded, config does not resolve, validation
    /// failure, plugin `configure` error) is logged and reflected as
    /// `configured=false` on `device` (§7 policy: configure failures
    /// never propagate).
    async fn try_configure(&self, device: &mut Device) {
        let ok = self.try_configure_inner(device).await;
        device.set_configured(ok);
    }

    async fn try_configure_inner(&self, device: &mut Device) -> bool {
        let Some(plugin_id) = device.plugin().map(str::to_string) else {
            return false;
        };
        let Some(config_id) = device.config().map(str::to_string) else {
            return false;
        };
        let Some(plugin) = self.plugins.get_loaded(&plugin_id) else {
            warn!(device = device.id(), plugin = %plugin_id, "plugin not loaded, leaving device unconfigured");
            return false;
        };
        let raw_config = match self.configs.get_raw_config(&config_id, self.base_raw_config).await {
            Ok(Some(rc)) => rc,
            Ok(None) => {
                warn!(device = device.id(), config = %config_id, "config does not resolve");
                return false;
            }
            Err(err) => {
                warn!(device = device.id(), error = %err, "raw config resolution failed");
                return false;
            }
        };
        let validated = match validator::check_and_default(&raw_config) {
            Ok(v) => v,
            Err(err) => {
                warn!(device = device.id(), error = %err, "raw config invalid");
                return false;
            }
        };
        match plugin.configure(device, &validated).await {
            Ok(()) => true,
            Err(err) => {
                warn!(device = device.id(), error = %err, "plugin configure failed");
                false
            }
        }
    }

    /// Deconfigures `device` through its plugin if one is loaded. A
    /// missing plugin is a soft no-op (plugin-uninstalled path, §4.5).
    async fn deconfigure(&self, device: &Device) {
        let Some(plugin_id) = device.plugin() else { return };
        if let Some(plugin) = self.plugins.get_loaded(plugin_id) {
            if let Err(err) = plugin.deconfigure(device).await {
                warn!(device = device.id(), error = %err, "plugin deconfigure failed");
            }
        }
    }

    /// Deletes `config_id` if it is `transient` and no remaining device
    /// references it (§4.5 transient-config GC).
    async fn maybe_gc_transient_config(&self, config_id: &str) -> Result<()> {
        let Some(doc) = self.configs.retrieve(config_id).await? else {
            return Ok(());
        };
        let config = Config::new(doc);
        if !config.transient() {
            return Ok(());
        }
        let still_referenced = !self
            .devices
            .find(
                vec![Selector::Eq("config".into(), config_id.into())],
                FindOptions::default(),
            )
            .await?
            .is_empty();
        if !still_referenced {
            self.configs.delete(config_id).await?;
            info!(config = config_id, "garbage-collected orphaned transient config");
        }
        Ok(())
    }

    /// `insert(doc)` (§4.5 row 1). `current_tenant` is the engine's
    /// currently-authenticated tenant; a device that omits `tenant_uuid`
    /// inherits it.
    pub async fn insert(&self, mut device: Device, current_tenant: &str) -> Result<String> {
        if device.tenant_uuid().is_none() {
            device.document_mut().set("tenant_uuid", current_tenant);
        }
        device.set_is_new(device.tenant_uuid() == Some(current_tenant));
        device.set_configured(false);
        let id = self.devices.insert(device.document().clone()).await?;
        device.document_mut().set_id(id.clone());

        self.try_configure(&mut device).await;
        self.devices.update(device.into_document()).await?;
        info!(device = %id, "device inserted");
        Ok(id)
    }

    /// `update(doc)` (§4.5 rows 2-4). A no-op when `new` is identical to
    /// the stored document. Enforces the tenant-move rule.
    pub async fn update(&self, new: Device, caller_tenant: &str) -> Result<()> {
        let id = new.id().ok_or_else(|| EngineError::InvalidId("missing id".into()))?.to_string();
        let old_doc = self.devices.retrieve(&id).await?.ok_or_else(|| EngineError::InvalidId(id.clone()))?;
        let old = Device::new(old_doc);

        if old.document() == new.document() {
            return Ok(());
        }

        if let (Some(old_tenant), Some(new_tenant)) = (old.tenant_uuid(), new.tenant_uuid()) {
            if old_tenant != new_tenant && caller_tenant != old_tenant && caller_tenant != "provd" {
                return Err(EngineError::TenantInvalidForDevice {
                    given: new_tenant.to_string(),
                    owner: old_tenant.to_string(),
                });
            }
        }

        let old_config_id = old.config().map(str::to_string);
        let mut updated = new;
        let relevant_changed = old.differs_on_reconfiguration_relevant_fields(&updated);

        if relevant_changed {
            if old.configured() {
                self.deconfigure(&old).await;
            }
            self.try_configure(&mut updated).await;
        } else {
            updated.set_configured(old.configured());
        }

        self.devices.update(updated.document().clone()).await?;

        if let Some(old_config_id) = old_config_id {
            if updated.config() != Some(old_config_id.as_str()) {
                self.maybe_gc_transient_config(&old_config_id).await?;
            }
        }
        info!(device = %id, "device updated");
        Ok(())
    }

    /// `delete(id)` (§4.5 row 5): deconfigures if needed, then removes
    /// the document and GCs its transient config.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let doc = self.devices.retrieve(id).await?.ok_or_else(|| EngineError::InvalidId(id.to_string()))?;
        let device = Device::new(doc);
        if device.configured() {
            self.deconfigure(&device).await;
        }
        self.devices.delete(id).await?;
        if let Some(config_id) = device.config() {
            self.maybe_gc_transient_config(config_id).await?;
        }
        info!(device = %id, "device deleted");
        Ok(())
    }

    /// `reconfigure(id)` (§4.5 row 6): always deconfigures then tries to
    /// configure again, regardless of whether anything changed.
    pub async fn reconfigure(&self, id: &str) -> Result<()> {
        let doc = self.devices.retrieve(id).await?.ok_or_else(|| EngineError::InvalidId(id.to_string()))?;
        let mut device = Device::new(doc);
        if device.configured() {
            self.deconfigure(&device).await;
        }
        self.try_configure(&mut device).await;
        self.devices.update(device.into_document()).await?;
        Ok(())
    }

    /// `synchronize(id)` (§4.5 row 7): fails with `SyncUnsupported` when
    /// the device is not currently configured.
    pub async fn synchronize(&self, id: &str) -> Result<()> {
        let doc = self.devices.retrieve(id).await?.ok_or_else(|| EngineError::InvalidId(id.to_string()))?;
        let device = Device::new(doc);
        let state = DeviceLifecycleState::from_configured_flag(device.configured());
        if !state.can_synchronize() {
            return Err(EngineError::SyncUnsupported);
        }
        let plugin_id = device.plugin().ok_or(EngineError::SyncUnsupported)?;
        let plugin = self.plugins.get_loaded(plugin_id).ok_or(EngineError::SyncUnsupported)?;
        let config_id = device.config().ok_or(EngineError::SyncUnsupported)?;
        let raw_config = self
            .configs
            .get_raw_config(config_id, self.base_raw_config)
            .await?
            .ok_or(EngineError::SyncUnsupported)?;
        let validated = validator::check_and_default(&raw_config)?;
        plugin
            .synchronize(&device, &validated)
            .await
            .map_err(|err| EngineError::SyncFailed(err.to_string()))
    }

    /// Owning-plugin-uninstalled path (§4.5 last row): marks every
    /// device owned by `plugin_id` `configured=false` without calling
    /// the plugin (it is already gone).
    pub async fn soft_deconfigure_owned_by(&self, plugin_id: &str) -> Result<()> {
        let owned = self
            .devices
            .find(vec![Selector::Eq("plugin".into(), plugin_id.into())], FindOptions::default())
            .await?;
        for doc in owned {
            let mut device = Device::new(doc);
            if device.configured() {
                device.set_configured(false);
                self.devices.update(device.into_document()).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin_manager::{CatalogFetcher, PluginDownloader, PluginLoader};
    use crate::test_support::InMemoryCollection;
    use async_trait::async_trait;
    use provd_domain::{IdentRequest, InfoExtractor, PgAssociation, PgAssociator, Plugin, PluginRecord};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct NoopExtractor;
    impl InfoExtractor for NoopExtractor {
        fn extract(&self, _r: &IdentRequest) -> Option<Document> {
            None
        }
    }
    struct NoopAssociator;
    impl PgAssociator for NoopAssociator {
        fn associate(&self, _v: Option<&str>, _m: Option<&str>, _ver: Option<&str>) -> PgAssociation {
            PgAssociation::No
        }
    }

    struct RecordingPlugin {
        id: String,
        configure_calls: Arc<AtomicBool>,
        deconfigure_calls: Arc<AtomicBool>,
        extractor: NoopExtractor,
        associator: NoopAssociator,
    }

    #[async_trait]
    impl Plugin for RecordingPlugin {
        fn id(&self) -> &str {
            &self.id
        }
        async fn configure(&self, _device: &Device, _raw_config: &Document) -> Result<()> {
            self.configure_calls.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn deconfigure(&self, _device: &Device) -> Result<()> {
            self.deconfigure_calls.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn synchronize(&self, _device: &Device, _raw_config: &Document) -> Result<()> {
            Ok(())
        }
        async fn configure_common(&self, _base: &Document) -> Result<()> {
            Ok(())
        }
        fn info_extractor(&self) -> &dyn InfoExtractor {
            &self.extractor
        }
        fn pg_associator(&self) -> &dyn PgAssociator {
            &self.associator
        }
    }

    struct NullCatalog;
    #[async_trait]
    impl CatalogFetcher for NullCatalog {
        async fn fetch_installable(&self, _url: &str) -> Result<Vec<PluginRecord>> {
            Ok(vec![])
        }
    }
    struct NullDownloader;
    #[async_trait]
    impl PluginDownloader for NullDownloader {
        async fn download(&self, _id: &str, _oip: &provd_domain::Oip) -> Result<()> {
            Ok(())
        }
        async fn remove(&self, _id: &str) -> Result<()> {
            Ok(())
        }
    }
    struct StubLoader {
        configure_calls: Arc<AtomicBool>,
        deconfigure_calls: Arc<AtomicBool>,
    }
    #[async_trait]
    impl PluginLoader for StubLoader {
        async fn load(&self, id: &str) -> Result<Arc<dyn Plugin>> {
            Ok(Arc::new(RecordingPlugin {
                id: id.to_string(),
                configure_calls: self.configure_calls.clone(),
                deconfigure_calls: self.deconfigure_calls.clone(),
                extractor: NoopExtractor,
                associator: NoopAssociator,
            }))
        }
    }

    async fn setup() -> (InMemoryCollection, InMemoryCollection, PluginManager, Arc<AtomicBool>, Arc<AtomicBool>, Document) {
        let devices = InMemoryCollection::new();
        let configs = InMemoryCollection::new();
        configs
            .seed(Document::from_map(
                json!({"id": "c1", "raw_config": {"ip": "1.1.1.1", "http_port": 8667, "tftp_port": 69}})
                    .as_object()
                    .unwrap()
                    .clone(),
            ))
            .await;
        let configure_calls = Arc::new(AtomicBool::new(false));
        let deconfigure_calls = Arc::new(AtomicBool::new(false));
        let plugins = PluginManager::new(
            Arc::new(NullCatalog),
            Arc::new(NullDownloader),
            Arc::new(StubLoader {
                configure_calls: configure_calls.clone(),
                deconfigure_calls: deconfigure_calls.clone(),
            }),
        );
        plugins.load("xivo-aastra", &Document::default()).await.unwrap();
        (devices, configs, plugins, configure_calls, deconfigure_calls, Document::default())
    }

    #[tokio::test]
    async fn insert_configures_a_device_with_a_valid_plugin_and_config() {
        let (devices, configs, plugins, configure_calls, _dec, base) = setup().await;
        let lifecycle = DeviceLifecycle { devices: &devices, configs: &configs, plugins: &plugins, base_raw_config: &base };
        let device = Device::new(Document::from_map(
            json!({"mac": "00:11:22:33:44:55", "plugin": "xivo-aastra", "config": "c1"})
                .as_object()
                .unwrap()
                .clone(),
        ));
        let id = lifecycle.insert(device, "default").await.unwrap();
        assert!(configure_calls.load(Ordering::SeqCst));
        let stored = devices.retrieve(&id).await.unwrap().unwrap();
        assert_eq!(stored.get_bool("configured"), Some(true));
        assert_eq!(stored.get_str("tenant_uuid"), Some("default"));
    }

    #[tokio::test]
    async fn update_with_identical_document_is_a_no_op() {
        let (devices, configs, plugins, configure_calls, dec, base) = setup().await;
        let lifecycle = DeviceLifecycle { devices: &devices, configs: &configs, plugins: &plugins, base_raw_config: &base };
        let device = Device::new(Document::from_map(
            json!({"mac": "00:11:22:33:44:55", "plugin": "xivo-aastra", "config": "c1"})
                .as_object()
                .unwrap()
                .clone(),
        ));
        let id = lifecycle.insert(device, "default").await.unwrap();
        configure_calls.store(false, Ordering::SeqCst);

        let stored = devices.retrieve(&id).await.unwrap().unwrap();
        lifecycle.update(Device::new(stored), "default").await.unwrap();
        assert!(!configure_calls.load(Ordering::SeqCst));
        assert!(!dec.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn update_changing_mac_deconfigures_then_reconfigures() {
        let (devices, configs, plugins, configure_calls, dec, base) = setup().await;
        let lifecycle = DeviceLifecycle { devices: &devices, configs: &configs, plugins: &plugins, base_raw_config: &base };
        let device = Device::new(Document::from_map(
            json!({"mac": "00:11:22:33:44:55", "plugin": "xivo-aastra", "config": "c1"})
                .as_object()
                .unwrap()
                .clone(),
        ));
        let id = lifecycle.insert(device, "default").await.unwrap();
        configure_calls.store(false, Ordering::SeqCst);

        let mut stored = Device::new(devices.retrieve(&id).await.unwrap().unwrap());
        stored.document_mut().set("mac", "aa:bb:cc:dd:ee:ff");
        lifecycle.update(stored, "default").await.unwrap();
        assert!(dec.load(Ordering::SeqCst));
        assert!(configure_calls.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn synchronize_on_unconfigured_device_fails() {
        let (devices, configs, plugins, _c, _d, base) = setup().await;
        let lifecycle = DeviceLifecycle { devices: &devices, configs: &configs, plugins: &plugins, base_raw_config: &base };
        let device = Device::new(Document::from_map(json!({"id": "d1"}).as_object().unwrap().clone()));
        devices.insert(device.into_document()).await.unwrap();
        assert!(matches!(lifecycle.synchronize("d1").await, Err(EngineError::SyncUnsupported)));
    }

    #[tokio::test]
    async fn delete_garbage_collects_orphaned_transient_config() {
        let (devices, configs, plugins, _c, dec, base) = setup().await;
        configs
            .seed(Document::from_map(
                json!({"id": "transient1", "transient": true, "raw_config": {"ip": "1.1.1.1", "http_port": 8667, "tftp_port": 69}})
                    .as_object()
                    .unwrap()
                    .clone(),
            ))
            .await;
        let lifecycle = DeviceLifecycle { devices: &devices, configs: &configs, plugins: &plugins, base_raw_config: &base };
        let device = Device::new(Document::from_map(
            json!({"mac": "00:11:22:33:44:55", "plugin": "xivo-aastra", "config": "transient1"})
                .as_object()
                .unwrap()
                .clone(),
        ));
        let id = lifecycle.insert(device, "default").await.unwrap();
        lifecycle.delete(&id).await.unwrap();
        assert!(dec.load(Ordering::SeqCst));
        assert!(configs.retrieve("transient1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn soft_deconfigure_marks_devices_unconfigured_without_calling_plugin() {
        let (devices, configs, plugins, _configure, dec, base) = setup().await;
        let lifecycle = DeviceLifecycle { devices: &devices, configs: &configs, plugins: &plugins, base_raw_config: &base };
        let device = Device::new(Document::from_map(
            json!({"mac": "00:11:22:33:44:55", "plugin": "xivo-aastra", "config": "c1"})
                .as_object()
                .unwrap()
                .clone(),
        ));
        let id = lifecycle.insert(device, "default").await.unwrap();
        dec.store(false, Ordering::SeqCst);

        lifecycle.soft_deconfigure_owned_by("xivo-aastra").await.unwrap();
        assert!(!dec.load(Ordering::SeqCst));
        let stored = devices.retrieve(&id).await.unwrap().unwrap();
        assert_eq!(stored.get_bool("configured"), Some(false));
    }
}
