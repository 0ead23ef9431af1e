//! Tracks live operations-in-progress keyed by the resource they act on
//! (a plugin id for install/upgrade/update), so a second `install` for a
//! package that is still downloading fails fast instead of racing the
//! first (§4.3, §4.8).

use provd_domain::{EngineError, Oip, OipState, Result};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct OipRegistry {
    live: Mutex<HashMap<String, Oip>>,
}

impl OipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh OIP under `key`, or fails if one is already
    /// live there and still `progress`. A key whose previous OIP has
    /// already resolved (`success`/`fail`) is free to reuse.
    pub fn begin(&self, key: &str) -> Result<Oip> {
        let mut live = self.live.lock().unwrap();
        if let Some(existing) = live.get(key) {
            if existing.state() == OipState::Progress {
                return Err(EngineError::PluginBusy(key.to_string()));
            }
        }
        let oip = Oip::new();
        live.insert(key.to_string(), oip.clone());
        Ok(oip)
    }

    /// Detaches the OIP for `key`, e.g. on client delete or on
    /// completion. Best-effort: the underlying task is not aborted.
    pub fn end(&self, key: &str) {
        self.live.lock().unwrap().remove(key);
    }

    pub fn get(&self, key: &str) -> Option<Oip> {
        self.live.lock().unwrap().get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_begin_for_same_key_fails() {
        let registry = OipRegistry::new();
        let _first = registry.begin("xivo-aastra").unwrap();
        assert!(matches!(registry.begin("xivo-aastra"), Err(EngineError::PluginBusy(_))));
    }

    #[test]
    fn ending_frees_the_key_for_reuse() {
        let registry = OipRegistry::new();
        let oip = registry.begin("xivo-aastra").unwrap();
        oip.mark_success();
        registry.end("xivo-aastra");
        assert!(registry.begin("xivo-aastra").is_ok());
    }
}
