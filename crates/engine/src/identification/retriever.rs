//! Chain of strategies mapping an extracted device-info document to an
//! existing (or freshly auto-created) device document (§4.7 step 2).

use async_trait::async_trait;
use provd_domain::{Collection, Document, Result, Selector};
use tracing::Level;

#[async_trait]
pub trait DeviceRetriever: Send + Sync {
    /// Returns the device this info maps to, or `None` if this strategy
    /// does not apply.
    async fn retrieve(&self, devices: &dyn Collection, info: &Document) -> Result<Option<Document>>;
}

/// Matches an existing device by exact equality on one field of `info`.
pub struct ExactFieldRetriever {
    field: &'static str,
}

impl ExactFieldRetriever {
    pub fn mac() -> Self {
        Self { field: "mac" }
    }

    pub fn ip() -> Self {
        Self { field: "ip" }
    }

    pub fn sn() -> Self {
        Self { field: "sn" }
    }
}

#[async_trait]
impl DeviceRetriever for ExactFieldRetriever {
    async fn retrieve(&self, devices: &dyn Collection, info: &Document) -> Result<Option<Document>> {
        let Some(value) = info.get(self.field).cloned() else {
            return Ok(None);
        };
        devices.find_one(vec![Selector::Eq(self.field.to_string(), value)]).await
    }
}

/// Last resort: auto-inserts a device bearing only the observed fields
/// plus `added=auto`, and emits a security-audit record (§4.7 step 2).
pub struct AddDeviceRetriever;

#[async_trait]
impl DeviceRetriever for AddDeviceRetriever {
    async fn retrieve(&self, devices: &dyn Collection, info: &Document) -> Result<Option<Document>> {
        let mut doc = info.clone();
        doc.set("added", "auto");
        let id = devices.insert(doc.clone()).await?;
        doc.set_id(id.clone());
        tracing::event!(target: "security", Level::WARN, device = %id, "auto-inserted device from identification request");
        Ok(Some(doc))
    }
}

/// The ordered chain of retrievers for one pipeline run: the first
/// strategy that returns a device wins (§4.7 step 2).
pub struct RetrieverChain<'a> {
    pub retrievers: Vec<&'a dyn DeviceRetriever>,
}

impl<'a> RetrieverChain<'a> {
    pub async fn retrieve(&self, devices: &dyn Collection, info: &Document) -> Result<Option<Document>> {
        for retriever in &self.retrievers {
            if let Some(doc) = retriever.retrieve(devices, info).await? {
                return Ok(Some(doc));
            }
        }
        Ok(None)
    }
}
