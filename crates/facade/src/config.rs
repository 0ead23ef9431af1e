//! Process-level startup configuration (§2.1), loaded once at boot.
//!
//! Distinct from the configure service (§4.9): this is static, layered
//! at process start; the configure service is the mutable, REST-exposed
//! parameter registry the engine owns at runtime.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProvdConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_plugin_root")]
    pub plugin_root: String,
    #[serde(default = "default_tftp_root")]
    pub tftp_root: String,
    #[serde(default = "default_plugin_server_url")]
    pub plugin_server_url: String,
    #[serde(default = "default_engine_version")]
    pub engine_version: String,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_data_dir() -> String {
    "./var/lib/provd".into()
}
fn default_plugin_root() -> String {
    "./var/lib/provd/plugins".into()
}
fn default_tftp_root() -> String {
    "./var/tftpboot".into()
}
fn default_plugin_server_url() -> String {
    "http://provd.example.com/plugins".into()
}
fn default_engine_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
fn default_bind_addr() -> String {
    "0.0.0.0:8667".into()
}

impl ProvdConfig {
    /// Layers, in increasing precedence: built-in defaults, `{config_dir}/default`,
    /// an optional `{config_dir}/local` override, then `PROVD__*` environment
    /// variables.
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .set_default("data_dir", default_data_dir())?
            .set_default("plugin_root", default_plugin_root())?
            .set_default("tftp_root", default_tftp_root())?
            .set_default("plugin_server_url", default_plugin_server_url())?
            .set_default("engine_version", default_engine_version())?
            .set_default("bind_addr", default_bind_addr())?
            .add_source(File::with_name(&format!("{config_dir}/default")).required(false))
            .add_source(File::with_name(&format!("{config_dir}/local")).required(false))
            .add_source(Environment::with_prefix("PROVD").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
