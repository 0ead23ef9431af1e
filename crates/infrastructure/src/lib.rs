//! Concrete collaborators the engine's traits are specified against:
//! JSON-file collections, a JSON-file configure-service store, HTTP
//! plugin catalog/download, and TFTP-root file scoping.

pub mod json_collection;
pub mod param_store;
pub mod plugin_catalog;
pub mod plugin_loader;
pub mod tftp_root;

pub use json_collection::{open_collections, JsonFileCollection};
pub use param_store::JsonParamStore;
pub use plugin_catalog::{HttpCatalogFetcher, HttpPluginDownloader};
pub use plugin_loader::{ManifestPluginLoader, PluginFactory};
pub use tftp_root::TftpRoot;
