//! Reads `plugin.info` for an installed plugin and looks up its runtime
//! object from an in-process registry (§4.3 load contract).
//!
//! Vendor plugin bodies are out of scope for this engine; a deployment
//! wires concrete `Plugin` implementations into the registry at process
//! startup, keyed by the same id their `plugin.info` declares.

use async_trait::async_trait;
use provd_domain::{EngineError, Plugin, PluginCapability, Result};
use provd_engine::PluginLoader;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::info;

#[derive(Debug, Deserialize)]
struct PluginInfo {
    version: String,
    description: String,
    capabilities: Vec<PluginCapability>,
    compatibility: (String, String),
}

pub type PluginFactory = Arc<dyn Fn() -> Arc<dyn Plugin> + Send + Sync>;

pub struct ManifestPluginLoader {
    plugin_root: PathBuf,
    engine_version: String,
    factories: Mutex<HashMap<String, PluginFactory>>,
}

impl ManifestPluginLoader {
    pub fn new(plugin_root: impl Into<PathBuf>, engine_version: impl Into<String>) -> Self {
        Self { plugin_root: plugin_root.into(), engine_version: engine_version.into(), factories: Mutex::new(HashMap::new()) }
    }

    /// Registers the constructor a vendor plugin crate provides for its
    /// own id. Must happen before `load` is called for that id.
    pub fn register(&self, id: impl Into<String>, factory: PluginFactory) {
        self.factories.lock().unwrap().insert(id.into(), factory);
    }

    async fn read_info(&self, id: &str) -> Result<PluginInfo> {
        let path = self.plugin_root.join(id).join("plugin.info");
        let bytes = tokio::fs::read(&path).await?;
        serde_json::from_slice(&bytes).map_err(|e| EngineError::IoError(format!("{}: {e}", path.display())))
    }

    fn check_compatible(&self, id: &str, info: &PluginInfo) -> Result<()> {
        let (min, max) = (&info.compatibility.0, &info.compatibility.1);
        if self.engine_version.as_str() < min.as_str() || self.engine_version.as_str() > max.as_str() {
            return Err(EngineError::InvalidParameter {
                key: id.to_string(),
                reason: format!("plugin requires engine version in [{min}, {max}], running {}", self.engine_version),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PluginLoader for ManifestPluginLoader {
    async fn load(&self, id: &str) -> Result<Arc<dyn Plugin>> {
        let info = self.read_info(id).await?;
        self.check_compatible(id, &info)?;
        let factory = self
            .factories
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::PluginNotLoaded(id.to_string()))?;
        info!(plugin = id, version = %info.version, capabilities = ?info.capabilities, "plugin.info read");
        Ok(factory())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provd_domain::{Device, Document, IdentRequest, PgAssociation, PgAssociator, InfoExtractor};

    struct NoopExtractor;
    impl InfoExtractor for NoopExtractor {
        fn extract(&self, _request: &IdentRequest) -> Option<Document> {
            None
        }
    }
    struct NoopAssociator;
    impl PgAssociator for NoopAssociator {
        fn associate(&self, _v: Option<&str>, _m: Option<&str>, _ve: Option<&str>) -> PgAssociation {
            PgAssociation::No
        }
    }
    struct StubPlugin;
    #[async_trait]
    impl Plugin for StubPlugin {
        fn id(&self) -> &str {
            "stub"
        }
        async fn configure(&self, _d: &Device, _r: &Document) -> Result<()> {
            Ok(())
        }
        async fn deconfigure(&self, _d: &Device) -> Result<()> {
            Ok(())
        }
        async fn synchronize(&self, _d: &Device, _r: &Document) -> Result<()> {
            Ok(())
        }
        async fn configure_common(&self, _b: &Document) -> Result<()> {
            Ok(())
        }
        fn info_extractor(&self) -> &dyn InfoExtractor {
            &NoopExtractor
        }
        fn pg_associator(&self) -> &dyn PgAssociator {
            &NoopAssociator
        }
    }

    #[tokio::test]
    async fn loads_a_registered_plugin_within_its_compatibility_range() {
        let dir = tempfile::tempdir().unwrap();
        let plugin_dir = dir.path().join("stub");
        tokio::fs::create_dir_all(&plugin_dir).await.unwrap();
        tokio::fs::write(
            plugin_dir.join("plugin.info"),
            serde_json::json!({
                "version": "1.0",
                "description": "stub",
                "capabilities": ["Configure"],
                "compatibility": ["0.1.0", "9.9.9"],
            })
            .to_string(),
        )
        .await
        .unwrap();

        let loader = ManifestPluginLoader::new(dir.path(), "1.0.0");
        loader.register("stub", Arc::new(|| Arc::new(StubPlugin) as Arc<dyn Plugin>));
        let plugin = loader.load("stub").await.unwrap();
        assert_eq!(plugin.id(), "stub");
    }

    #[tokio::test]
    async fn unregistered_plugin_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let plugin_dir = dir.path().join("ghost");
        tokio::fs::create_dir_all(&plugin_dir).await.unwrap();
        tokio::fs::write(
            plugin_dir.join("plugin.info"),
            serde_json::json!({
                "version": "1.0",
                "description": "ghost",
                "capabilities": ["Configure"],
                "compatibility": ["0.1.0", "9.9.9"],
            })
            .to_string(),
        )
        .await
        .unwrap();

        let loader = ManifestPluginLoader::new(dir.path(), "1.0.0");
        assert!(matches!(loader.load("ghost").await, Err(EngineError::PluginNotLoaded(_))));
    }
}
