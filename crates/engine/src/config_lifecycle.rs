//! Config insert/update/delete cascade (§4.6).

use crate::device_lifecycle::DeviceLifecycle;
use crate::validator;
use provd_domain::{
    Collection, Config, ConfigCollection, Device, Document, EngineError, FindOptions, Result,
    Selector,
};
use std::collections::HashSet;
use tracing::warn;

pub struct ConfigLifecycle<'a> {
    pub devices: &'a dyn Collection,
    pub configs: &'a dyn ConfigCollection,
    pub device_lifecycle: &'a DeviceLifecycle<'a>,
    pub base_raw_config: &'a Document,
}

impl<'a> ConfigLifecycle<'a> {
    /// Rejects a `parent_ids` chain containing a cycle. Walks every
    /// branch of the parent DAG, not just the first parent of each
    /// config, since `parent_ids` allows multiple inheritance and a
    /// cycle may only be reachable through a later entry. Naming a
    /// parent that does not exist is left to the resolver at configure
    /// time (§4.6, §9).
    async fn reject_cycles(&self, doc: &Document) -> Result<()> {
        let id = doc.id().unwrap_or_default().to_string();
        let staged = Config::new(doc.clone());
        let mut path = HashSet::new();
        path.insert(id.clone());
        for parent in staged.parent_ids() {
            self.walk_for_cycle(&id, &parent, &mut path).await?;
        }
        Ok(())
    }

    fn walk_for_cycle<'f>(
        &'f self,
        root_id: &'f str,
        current: &'f str,
        path: &'f mut HashSet<String>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + 'f>> {
        Box::pin(async move {
            if !path.insert(current.to_string()) {
                return Err(EngineError::CyclicConfig(root_id.to_string()));
            }
            if let Some(next_doc) = self.configs.retrieve(current).await? {
                for next in Config::new(next_doc).parent_ids() {
                    self.walk_for_cycle(root_id, &next, path).await?;
                }
            }
            path.remove(current);
            Ok(())
        })
    }

    /// `cfg_insert`.
    pub async fn insert(&self, doc: Document) -> Result<String> {
        self.reject_cycles(&doc).await?;
        let id = self.configs.insert(doc).await?;
        self.cascade(&id).await?;
        Ok(id)
    }

    /// `cfg_update`. Short-circuits to a no-op when `doc` is identical
    /// to the stored document (no cascade, no I/O).
    pub async fn update(&self, doc: Document) -> Result<()> {
        let id = doc.id().ok_or_else(|| EngineError::InvalidId("missing id".into()))?.to_string();
        let existing = self.configs.retrieve(&id).await?.ok_or_else(|| EngineError::InvalidId(id.clone()))?;
        if existing == doc {
            return Ok(());
        }
        self.reject_cycles(&doc).await?;
        self.configs.update(doc).await?;
        self.cascade(&id).await
    }

    /// `cfg_delete`. Refuses to remove a config with `deletable=false`.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let doc = self.configs.retrieve(id).await?.ok_or_else(|| EngineError::InvalidId(id.to_string()))?;
        let config = Config::new(doc);
        if !config.deletable() {
            return Err(EngineError::NonDeletable(id.to_string()));
        }
        self.configs.delete(id).await?;
        self.cascade_removed(id).await
    }

    /// `cfg_create_new`: clones the `autocreate`-role template, strips
    /// the role, assigns a fresh id, and inserts it.
    pub async fn create_new(&self, fresh_id: &str) -> Result<String> {
        let template = self
            .configs
            .find_one(vec![Selector::Eq("role".into(), "autocreate".into())])
            .await?
            .ok_or_else(|| EngineError::InvalidId("no autocreate template configured".into()))?;
        let mut config = Config::new(template);
        config.document_mut().remove("role");
        config.document_mut().set_id(fresh_id);
        let doc = config.into_document();
        self.reject_cycles(&doc).await?;
        self.configs.insert(doc).await
    }

    /// Reconfigures every device whose `config` is `id` or a descendant
    /// of it, best-effort: individual configure failures are logged and
    /// reflected per-device, never bubbled as a cascade-wide error (§9
    /// open question resolution).
    async fn cascade(&self, id: &str) -> Result<()> {
        let mut affected = self.configs.get_descendants(id).await?;
        affected.insert(id.to_string());
        let mut ids: Vec<String> = affected.into_iter().collect();
        ids.sort();

        for config_id in ids {
            let devices = self
                .devices
                .find(vec![Selector::Eq("config".into(), config_id.clone().into())], FindOptions::default())
                .await?;
            for doc in devices {
                if let Err(err) = self.reconfigure_one(Device::new(doc)).await {
                    warn!(config = %config_id, error = %err, "cascade reconfigure failed for device");
                }
            }
        }
        Ok(())
    }

    /// Same as `cascade` but for a config that no longer exists: every
    /// affected device is simply deconfigured, since there is no longer
    /// a raw-config to resolve.
    async fn cascade_removed(&self, id: &str) -> Result<()> {
        let devices = self
            .devices
            .find(vec![Selector::Eq("config".into(), id.into())], FindOptions::default())
            .await?;
        for doc in devices {
            let mut device = Device::new(doc);
            if device.configured() {
                if let Some(plugin_id) = device.plugin() {
                    if let Some(plugin) = self.device_lifecycle.plugins.get_loaded(plugin_id) {
                        let _ = plugin.deconfigure(&device).await;
                    }
                }
                device.set_configured(false);
                self.devices.update(device.into_document()).await?;
            }
        }
        Ok(())
    }

    async fn reconfigure_one(&self, mut device: Device) -> Result<()> {
        let was_configured = device.configured();
        let config_id = device.config().map(str::to_string);

        let raw_config = match &config_id {
            Some(cid) => self.configs.get_raw_config(cid, self.base_raw_config).await?,
            None => None,
        };

        if was_configured {
            if let Some(plugin_id) = device.plugin() {
                if let Some(plugin) = self.device_lifecycle.plugins.get_loaded(plugin_id) {
                    let _ = plugin.deconfigure(&device).await;
                }
            }
        }

        let now_configured = match raw_config {
            Some(rc) => match validator::check_and_default(&rc) {
                Ok(validated) => match device.plugin().and_then(|p| self.device_lifecycle.plugins.get_loaded(p)) {
                    Some(plugin) => plugin.configure(&device, &validated).await.is_ok(),
                    None => false,
                },
                Err(_) => false,
            },
            None => false,
        };

        device.set_configured(now_configured);
        self.devices.update(device.into_document()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin_manager::{CatalogFetcher, PluginDownloader, PluginLoader, PluginManager};
    use crate::test_support::InMemoryCollection;
    use async_trait::async_trait;
    use provd_domain::{IdentRequest, InfoExtractor, PgAssociation, PgAssociator, Plugin, PluginRecord};
    use serde_json::json;
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
    struct EchoPlugin {
        id: String,
        extractor: NoopExtractor,
        associator: NoopAssociator,
    }
    #[async_trait]
    impl Plugin for EchoPlugin {
        fn id(&self) -> &str {
            &self.id
        }
        async fn configure(&self, _device: &Device, _raw_config: &Document) -> Result<()> {
            Ok(())
        }
        async fn deconfigure(&self, _device: &Device) -> Result<()> {
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
    struct StubLoader;
    #[async_trait]
    impl PluginLoader for StubLoader {
        async fn load(&self, id: &str) -> Result<Arc<dyn Plugin>> {
            Ok(Arc::new(EchoPlugin { id: id.to_string(), extractor: NoopExtractor, associator: NoopAssociator }))
        }
    }

    struct RecordingPlugin {
        id: String,
        deconfigure_calls: Arc<std::sync::atomic::AtomicBool>,
        extractor: NoopExtractor,
        associator: NoopAssociator,
    }
    #[async_trait]
    impl Plugin for RecordingPlugin {
        fn id(&self) -> &str {
            &self.id
        }
        async fn configure(&self, _device: &Device, _raw_config: &Document) -> Result<()> {
            Ok(())
        }
        async fn deconfigure(&self, _device: &Device) -> Result<()> {
            self.deconfigure_calls.store(true, std::sync::atomic::Ordering::SeqCst);
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
    struct RecordingLoader {
        deconfigure_calls: Arc<std::sync::atomic::AtomicBool>,
    }
    #[async_trait]
    impl PluginLoader for RecordingLoader {
        async fn load(&self, id: &str) -> Result<Arc<dyn Plugin>> {
            Ok(Arc::new(RecordingPlugin {
                id: id.to_string(),
                deconfigure_calls: self.deconfigure_calls.clone(),
                extractor: NoopExtractor,
                associator: NoopAssociator,
            }))
        }
    }

    #[tokio::test]
    async fn update_with_new_sip_proxy_cascades_to_child_config_devices() {
        let devices = InMemoryCollection::new();
        let configs = InMemoryCollection::new();
        configs
            .seed(Document::from_map(
                json!({"id": "base", "raw_config": {"ip": "1.1.1.1", "http_port": 8667, "tftp_port": 69, "sip_proxy_ip": "10.0.0.1"}})
                    .as_object().unwrap().clone(),
            ))
            .await;
        configs
            .seed(Document::from_map(
                json!({"id": "c1", "parent_ids": ["base"], "raw_config": {}}).as_object().unwrap().clone(),
            ))
            .await;
        let plugins = PluginManager::new(Arc::new(NullCatalog), Arc::new(NullDownloader), Arc::new(StubLoader));
        plugins.load("xivo-aastra", &Document::default()).await.unwrap();

        let base_raw = Document::default();
        let dl = DeviceLifecycle { devices: &devices, configs: &configs, plugins: &plugins, base_raw_config: &base_raw };
        let id = dl
            .insert(
                Device::new(Document::from_map(
                    json!({"mac": "00:11:22:33:44:55", "plugin": "xivo-aastra", "config": "c1"}).as_object().unwrap().clone(),
                )),
                "default",
            )
            .await
            .unwrap();
        assert!(Device::new(devices.retrieve(&id).await.unwrap().unwrap()).configured());

        let cl = ConfigLifecycle { devices: &devices, configs: &configs, device_lifecycle: &dl, base_raw_config: &base_raw };
        let mut updated_base = Document::from_map(
            json!({"id": "base", "raw_config": {"ip": "1.1.1.1", "http_port": 8667, "tftp_port": 69, "sip_proxy_ip": "10.0.0.2"}})
                .as_object().unwrap().clone(),
        );
        cl.update(updated_base.clone()).await.unwrap();
        assert!(Device::new(devices.retrieve(&id).await.unwrap().unwrap()).configured());

        updated_base.set_id("base");
        let repeat = cl.update(updated_base).await;
        assert!(repeat.is_ok());
    }

    #[tokio::test]
    async fn update_with_identical_document_short_circuits() {
        let devices = InMemoryCollection::new();
        let configs = InMemoryCollection::new();
        let doc = Document::from_map(json!({"id": "base", "raw_config": {}}).as_object().unwrap().clone());
        configs.seed(doc.clone()).await;
        let plugins = PluginManager::new(Arc::new(NullCatalog), Arc::new(NullDownloader), Arc::new(StubLoader));
        let base_raw = Document::default();
        let dl = DeviceLifecycle { devices: &devices, configs: &configs, plugins: &plugins, base_raw_config: &base_raw };
        let cl = ConfigLifecycle { devices: &devices, configs: &configs, device_lifecycle: &dl, base_raw_config: &base_raw };
        assert!(cl.update(doc).await.is_ok());
    }

    #[tokio::test]
    async fn delete_refuses_non_deletable_config() {
        let devices = InMemoryCollection::new();
        let configs = InMemoryCollection::new();
        configs
            .seed(Document::from_map(json!({"id": "base", "deletable": false}).as_object().unwrap().clone()))
            .await;
        let plugins = PluginManager::new(Arc::new(NullCatalog), Arc::new(NullDownloader), Arc::new(StubLoader));
        let base_raw = Document::default();
        let dl = DeviceLifecycle { devices: &devices, configs: &configs, plugins: &plugins, base_raw_config: &base_raw };
        let cl = ConfigLifecycle { devices: &devices, configs: &configs, device_lifecycle: &dl, base_raw_config: &base_raw };
        assert!(matches!(cl.delete("base").await, Err(EngineError::NonDeletable(_))));
    }

    #[tokio::test]
    async fn create_new_clones_the_autocreate_template() {
        let devices = InMemoryCollection::new();
        let configs = InMemoryCollection::new();
        configs
            .seed(Document::from_map(
                json!({"id": "autocreate-template", "role": "autocreate", "raw_config": {}}).as_object().unwrap().clone(),
            ))
            .await;
        let plugins = PluginManager::new(Arc::new(NullCatalog), Arc::new(NullDownloader), Arc::new(StubLoader));
        let base_raw = Document::default();
        let dl = DeviceLifecycle { devices: &devices, configs: &configs, plugins: &plugins, base_raw_config: &base_raw };
        let cl = ConfigLifecycle { devices: &devices, configs: &configs, device_lifecycle: &dl, base_raw_config: &base_raw };
        let new_id = cl.create_new("dev-c1").await.unwrap();
        assert_eq!(new_id, "dev-c1");
        let stored = configs.retrieve("dev-c1").await.unwrap().unwrap();
        assert!(stored.get("role").is_none());
    }

    #[tokio::test]
    async fn cfg_delete_deconfigures_previously_configured_devices() {
        let devices = InMemoryCollection::new();
        let configs = InMemoryCollection::new();
        configs
            .seed(Document::from_map(
                json!({"id": "c1", "parent_ids": [], "raw_config": {}, "deletable": true}).as_object().unwrap().clone(),
            ))
            .await;
        let deconfigure_calls = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let plugins =
            PluginManager::new(Arc::new(NullCatalog), Arc::new(NullDownloader), Arc::new(RecordingLoader { deconfigure_calls: deconfigure_calls.clone() }));
        plugins.load("xivo-aastra", &Document::default()).await.unwrap();
        let base_raw = Document::default();
        let dl = DeviceLifecycle { devices: &devices, configs: &configs, plugins: &plugins, base_raw_config: &base_raw };
        let id = devices
            .insert(Document::from_map(
                json!({"mac": "00:11:22:33:44:55", "plugin": "xivo-aastra", "config": "c1", "configured": true})
                    .as_object().unwrap().clone(),
            ))
            .await
            .unwrap();

        let cl = ConfigLifecycle { devices: &devices, configs: &configs, device_lifecycle: &dl, base_raw_config: &base_raw };
        cl.delete("c1").await.unwrap();

        assert!(deconfigure_calls.load(std::sync::atomic::Ordering::SeqCst));
        assert!(!Device::new(devices.retrieve(&id).await.unwrap().unwrap()).configured());
    }
}
