//! The engine-level typed parameter registry (§4.9).
//!
//! Replaces the source's name-based getter/setter dispatch with a static
//! table mapping a parameter id to a validator; persistence is delegated
//! to a [`ParamStore`] so the JSON-file backing (§6) stays swappable.

use async_trait::async_trait;
use provd_domain::{EngineError, Result};
use url::Url;

/// Persists configure-service parameters keyed by name. The shipped
/// implementation (infrastructure crate) is a single flat JSON file
/// written atomically (temp-file + rename).
#[async_trait]
pub trait ParamStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

const KNOWN_KEYS: &[&str] = &["plugin_server", "http_proxy", "ftp_proxy", "https_proxy", "locale", "NAT"];

pub struct ConfigureService<S: ParamStore> {
    store: S,
}

impl<S: ParamStore> ConfigureService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        if !KNOWN_KEYS.contains(&key) {
            return Err(EngineError::UnknownKey(key.to_string()));
        }
        self.store.get(key).await
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        if !KNOWN_KEYS.contains(&key) {
            return Err(EngineError::UnknownKey(key.to_string()));
        }
        validate(key, value)?;
        self.store.set(key, value).await
    }
}

fn validate(key: &str, value: &str) -> Result<()> {
    match key {
        "plugin_server" => check_is_server_url(value),
        "http_proxy" | "ftp_proxy" => check_is_proxy(value),
        "https_proxy" => check_is_https_proxy(value),
        "locale" => check_is_ascii_locale(value),
        "NAT" => check_is_nat(value),
        _ => Ok(()),
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> EngineError {
    EngineError::InvalidParameter {
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// `plugin_server`: must parse, scheme and host required.
fn check_is_server_url(value: &str) -> Result<()> {
    let url = Url::parse(value).map_err(|e| invalid("plugin_server", e.to_string()))?;
    if url.host_str().is_none() {
        return Err(invalid("plugin_server", "missing host"));
    }
    Ok(())
}

/// `http_proxy` / `ftp_proxy`: URL with scheme and host, no path.
fn check_is_proxy(value: &str) -> Result<()> {
    let url = Url::parse(value).map_err(|e| invalid("http_proxy", e.to_string()))?;
    if url.host_str().is_none() {
        return Err(invalid("http_proxy", "missing host"));
    }
    if !url.path().is_empty() && url.path() != "/" {
        return Err(invalid("http_proxy", "must not have a path"));
    }
    Ok(())
}

/// `https_proxy`: non-empty, must NOT have both scheme and host —
/// host:port form only.
fn check_is_https_proxy(value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(invalid("https_proxy", "must not be empty"));
    }
    if let Ok(url) = Url::parse(value) {
        if !url.scheme().is_empty() && url.host_str().is_some() {
            return Err(invalid("https_proxy", "must be host:port form, not a full URL"));
        }
    }
    Ok(())
}

/// `locale`: ascii only.
fn check_is_ascii_locale(value: &str) -> Result<()> {
    if !value.is_ascii() {
        return Err(invalid("locale", "must be ascii"));
    }
    Ok(())
}

/// `NAT`: `None`/`"0"` -> 0, `"1"` -> 1, anything else invalid.
fn check_is_nat(value: &str) -> Result<()> {
    match value {
        "0" | "1" => Ok(()),
        _ => Err(invalid("NAT", "must be 0 or 1")),
    }
}
