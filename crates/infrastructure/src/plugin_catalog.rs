//! HTTP-backed `CatalogFetcher` and `PluginDownloader` (§4.3, §7 IOError
//! retry policy).

use async_trait::async_trait;
use provd_domain::{EngineError, Oip, PluginRecord, Result};
use provd_engine::{CatalogFetcher, PluginDownloader};
use std::io::Cursor;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Retries a plugin download up to this many times before giving up,
/// doubling the wait between attempts starting at 500ms (§7).
const MAX_DOWNLOAD_ATTEMPTS: u32 = 5;
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

pub struct HttpCatalogFetcher {
    client: reqwest::Client,
}

impl HttpCatalogFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpCatalogFetcher {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl CatalogFetcher for HttpCatalogFetcher {
    async fn fetch_installable(&self, plugin_server_url: &str) -> Result<Vec<PluginRecord>> {
        let url = format!("{}/plugins.json", plugin_server_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::IoError(e.to_string()))?
            .error_for_status()
            .map_err(|e| EngineError::IoError(e.to_string()))?;
        response.json().await.map_err(|e| EngineError::IoError(e.to_string()))
    }
}

/// Downloads a plugin's zip archive from `{plugin_server_url}/{id}.zip`
/// and unpacks it under `plugin_root/{id}`.
pub struct HttpPluginDownloader {
    client: reqwest::Client,
    plugin_server_url: String,
    plugin_root: PathBuf,
}

impl HttpPluginDownloader {
    pub fn new(client: reqwest::Client, plugin_server_url: impl Into<String>, plugin_root: impl Into<PathBuf>) -> Self {
        Self { client, plugin_server_url: plugin_server_url.into(), plugin_root: plugin_root.into() }
    }

    async fn fetch_archive(&self, id: &str) -> Result<bytes::Bytes> {
        let url = format!("{}/{}.zip", self.plugin_server_url.trim_end_matches('/'), id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::IoError(e.to_string()))?
            .error_for_status()
            .map_err(|e| EngineError::IoError(e.to_string()))?;
        response.bytes().await.map_err(|e| EngineError::IoError(e.to_string()))
    }

}

fn unpack_archive(dest: PathBuf, archive: bytes::Bytes) -> Result<()> {
    std::fs::create_dir_all(&dest)?;
    let mut zip = zip::ZipArchive::new(Cursor::new(archive)).map_err(|e| EngineError::IoError(e.to_string()))?;
    zip.extract(&dest).map_err(|e| EngineError::IoError(e.to_string()))?;
    Ok(())
}

#[async_trait]
impl PluginDownloader for HttpPluginDownloader {
    async fn download(&self, id: &str, oip: &Oip) -> Result<()> {
        let mut backoff = INITIAL_BACKOFF;
        let mut last_err = None;
        for attempt in 1..=MAX_DOWNLOAD_ATTEMPTS {
            match self.fetch_archive(id).await {
                Ok(archive) => {
                    oip.advance(1);
                    let dest = self.plugin_root.join(id);
                    return tokio::task::spawn_blocking(move || unpack_archive(dest, archive))
                        .await
                        .map_err(|e| EngineError::IoError(e.to_string()))?;
                }
                Err(err) => {
                    warn!(plugin = id, attempt, %err, "plugin download attempt failed");
                    last_err = Some(err);
                    if attempt < MAX_DOWNLOAD_ATTEMPTS {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| EngineError::IoError("download failed".into())))
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let dest = self.plugin_root.join(id);
        match tokio::fs::remove_dir_all(&dest).await {
            Ok(()) => {
                info!(plugin = id, "plugin files removed");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
