//! Chain of strategies augmenting a retrieved device from fresh
//! identification info (§4.7 step 3).

use crate::plugin_manager::PluginManager;
use async_trait::async_trait;
use provd_domain::{Collection, ConfigCollection, Device, Document, FindOptions, IdentRequest, Result, Selector};

#[async_trait]
pub trait DeviceUpdater: Send + Sync {
    async fn update(
        &self,
        device: &mut Device,
        info: &Document,
        request: &IdentRequest,
        devices: &dyn Collection,
        nat_enabled: bool,
    ) -> Result<()>;
}

/// Merges only the keys `device` does not already carry.
pub struct AddInfoUpdater;

#[async_trait]
impl DeviceUpdater for AddInfoUpdater {
    async fn update(&self, device: &mut Device, info: &Document, _request: &IdentRequest, _devices: &dyn Collection, _nat: bool) -> Result<()> {
        for (key, value) in info.as_map() {
            if !device.document().contains_key(key) {
                device.document_mut().set(key.clone(), value.clone());
            }
        }
        Ok(())
    }
}

/// Every key of `info` overwrites the stored value (§4.7 step 3).
pub struct LastSeenUpdater;

#[async_trait]
impl DeviceUpdater for LastSeenUpdater {
    async fn update(&self, device: &mut Device, info: &Document, _request: &IdentRequest, _devices: &dyn Collection, _nat: bool) -> Result<()> {
        for (key, value) in info.as_map() {
            device.document_mut().set(key.clone(), value.clone());
        }
        Ok(())
    }
}

/// Per key, the stored value wins a tie against disagreeing fresh info
/// (a two-source vote between "what we have" and "what we just saw");
/// agreement is a no-op and a brand-new key is simply adopted.
pub struct VotingUpdater;

#[async_trait]
impl DeviceUpdater for VotingUpdater {
    async fn update(&self, device: &mut Device, info: &Document, _request: &IdentRequest, _devices: &dyn Collection, _nat: bool) -> Result<()> {
        for (key, value) in info.as_map() {
            match device.document().get(key) {
                None => device.document_mut().set(key.clone(), value.clone()),
                Some(existing) if existing == value => {}
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// When NAT is disabled, any other device currently claiming the fresh
/// `ip` has its `ip` cleared. Inert when NAT is enabled (§4.7 step 3).
pub struct RemoveOutdatedIpUpdater;

#[async_trait]
impl DeviceUpdater for RemoveOutdatedIpUpdater {
    async fn update(&self, device: &mut Device, info: &Document, _request: &IdentRequest, devices: &dyn Collection, nat_enabled: bool) -> Result<()> {
        if nat_enabled {
            return Ok(());
        }
        let Some(ip) = info.get_str("ip") else {
            return Ok(());
        };
        let mut selectors = vec![Selector::Eq("ip".into(), ip.into())];
        if let Some(id) = device.id() {
            selectors.push(Selector::Ne("id".into(), id.into()));
        }
        for doc in devices.find(selectors, FindOptions::default()).await? {
            let mut holder = Device::new(doc);
            holder.document_mut().remove("ip");
            devices.update(holder.into_document()).await?;
        }
        Ok(())
    }
}

/// Records `remote_state_*` observations when the request's filename
/// matches the owning plugin's trigger, reading the device's resolved
/// raw-config for the values to record (§4.7 step 3).
pub struct RemoteStateUpdater<'a> {
    pub configs: &'a dyn ConfigCollection,
    pub plugins: &'a PluginManager,
    pub base_raw_config: &'a Document,
}

#[async_trait]
impl<'a> DeviceUpdater for RemoteStateUpdater<'a> {
    async fn update(&self, device: &mut Device, _info: &Document, request: &IdentRequest, _devices: &dyn Collection, _nat: bool) -> Result<()> {
        let Some(plugin_id) = device.plugin() else {
            return Ok(());
        };
        let Some(plugin) = self.plugins.get_loaded(plugin_id) else {
            return Ok(());
        };
        let Some(trigger) = plugin.remote_state_trigger_filename(device) else {
            return Ok(());
        };
        if request.filename() != Some(trigger.as_str()) {
            return Ok(());
        }
        let Some(config_id) = device.config() else {
            return Ok(());
        };
        let Some(raw_config) = self.configs.get_raw_config(config_id, self.base_raw_config).await? else {
            return Ok(());
        };
        for field in ["sip_username", "sip_proxy_ip", "sip_registrar_ip"] {
            if let Some(value) = raw_config.get(field) {
                device.set_remote_state(field.trim_start_matches("sip_"), value.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::InMemoryCollection;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        Document::from_map(value.as_object().unwrap().clone())
    }

    fn request() -> IdentRequest {
        IdentRequest { ip: "1.2.3.4".into(), transport: provd_domain::Transport::Dhcp { option60: None } }
    }

    #[tokio::test]
    async fn add_info_updater_does_not_overwrite_existing_keys() {
        let devices = InMemoryCollection::new();
        let mut device = Device::new(doc(json!({"id": "d1", "vendor": "Aastra"})));
        let updater = AddInfoUpdater;
        updater.update(&mut device, &doc(json!({"vendor": "Polycom", "model": "X"})), &request(), &devices, false).await.unwrap();
        assert_eq!(device.document().get_str("vendor"), Some("Aastra"));
        assert_eq!(device.document().get_str("model"), Some("X"));
    }

    #[tokio::test]
    async fn last_seen_updater_overwrites() {
        let devices = InMemoryCollection::new();
        let mut device = Device::new(doc(json!({"id": "d1", "vendor": "Aastra"})));
        let updater = LastSeenUpdater;
        updater.update(&mut device, &doc(json!({"vendor": "Polycom"})), &request(), &devices, false).await.unwrap();
        assert_eq!(device.document().get_str("vendor"), Some("Polycom"));
    }

    #[tokio::test]
    async fn remove_outdated_ip_clears_old_holder_when_nat_disabled() {
        let devices = InMemoryCollection::new();
        devices.seed(doc(json!({"id": "old", "ip": "1.2.3.4"}))).await;
        let mut device = Device::new(doc(json!({"id": "new"})));
        let updater = RemoveOutdatedIpUpdater;
        updater.update(&mut device, &doc(json!({"ip": "1.2.3.4"})), &request(), &devices, false).await.unwrap();
        let old = devices.retrieve("old").await.unwrap().unwrap();
        assert!(old.get("ip").is_none());
    }

    #[tokio::test]
    async fn remove_outdated_ip_is_inert_when_nat_enabled() {
        let devices = InMemoryCollection::new();
        devices.seed(doc(json!({"id": "old", "ip": "1.2.3.4"}))).await;
        let mut device = Device::new(doc(json!({"id": "new"})));
        let updater = RemoveOutdatedIpUpdater;
        updater.update(&mut device, &doc(json!({"ip": "1.2.3.4"})), &request(), &devices, true).await.unwrap();
        let old = devices.retrieve("old").await.unwrap().unwrap();
        assert_eq!(old.get_str("ip"), Some("1.2.3.4"));
    }
}
