//! Scoped, atomic file writes under the TFTP root a plugin's `configure`
//! writes into (§5 "Resource scoping").

use provd_domain::Result;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Hands a plugin a root path plus write/remove helpers that never leave
/// a partially written file at the target name.
#[derive(Clone)]
pub struct TftpRoot {
    root: PathBuf,
}

impl TftpRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    /// Writes `filename` via a temp file in the same directory followed
    /// by a rename, so a crash mid-write never leaves a truncated file
    /// at `filename`.
    pub async fn write(&self, filename: &str, contents: &[u8]) -> Result<()> {
        if let Some(parent) = self.resolve(filename).parent() {
            fs::create_dir_all(parent).await?;
        }
        let target = self.resolve(filename);
        let mut tmp_name = target.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp = target.with_file_name(tmp_name);
        fs::write(&tmp, contents).await?;
        fs::rename(&tmp, &target).await?;
        Ok(())
    }

    /// Removes `filename`; absent files are not an error (`deconfigure`
    /// must be idempotent, §4.4).
    pub async fn remove(&self, filename: &str) -> Result<()> {
        match fs::remove_file(self.resolve(filename)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn exists(&self, filename: &str) -> bool {
        fs::metadata(self.resolve(filename)).await.is_ok()
    }
}
