use chrono::{DateTime, Utc};

/// Notification fired by the plugin manager on `load`/`unload` (§4.3).
#[derive(Debug, Clone, PartialEq)]
pub enum PluginEvent {
    Loaded { plugin_id: String, timestamp: DateTime<Utc> },
    Unloaded { plugin_id: String, timestamp: DateTime<Utc> },
}

impl PluginEvent {
    pub fn loaded(plugin_id: impl Into<String>) -> Self {
        Self::Loaded {
            plugin_id: plugin_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn unloaded(plugin_id: impl Into<String>) -> Self {
        Self::Unloaded {
            plugin_id: plugin_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn plugin_id(&self) -> &str {
        match self {
            Self::Loaded { plugin_id, .. } => plugin_id,
            Self::Unloaded { plugin_id, .. } => plugin_id,
        }
    }
}

/// A subscriber to plugin load/unload notifications — e.g. a per-plugin
/// REST resource cache. Subscribers are notified synchronously and
/// individual failures never block the rest of the fan-out (§4.3, §9).
pub trait PluginObserver: Send + Sync {
    fn on_plugin_event(&self, event: &PluginEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loaded_event_reports_its_plugin_id() {
        let event = PluginEvent::loaded("xivo-aastra");
        assert_eq!(event.plugin_id(), "xivo-aastra");
    }
}
