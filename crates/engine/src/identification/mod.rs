//! Extractor -> retriever -> updater chain applied to each incoming
//! device request (§4.7).

mod extractor;
mod retriever;
mod updater;

pub use extractor::{CompositeExtractor, ExtractorMergePolicy, FixedInfoExtractor};
pub use retriever::{DeviceRetriever, ExactFieldRetriever, AddDeviceRetriever, RetrieverChain};
pub use updater::{
    AddInfoUpdater, DeviceUpdater, LastSeenUpdater, RemoveOutdatedIpUpdater, RemoteStateUpdater,
    VotingUpdater,
};

use provd_domain::{Collection, Device, Document, IdentRequest, InfoExtractor, Plugin, Result};
use std::sync::Arc;
use tracing::info;

/// Runs the full pipeline for one incoming request: extract, retrieve,
/// update, and — if warranted — hand the device back to the caller so
/// it can be run through the configure path (§4.5).
pub struct IdentificationPipeline<'a> {
    pub extractors: Vec<&'a dyn InfoExtractor>,
    pub extractor_policy: ExtractorMergePolicy,
    pub retrievers: RetrieverChain<'a>,
    pub updaters: Vec<&'a dyn DeviceUpdater>,
    pub devices: &'a dyn Collection,
}

/// The outcome of running one request through the pipeline: the device
/// that was touched (if any), and whether it changed on a field that
/// warrants re-running the configure path (§4.7 step 4).
pub struct IdentificationOutcome {
    pub device_id: Option<String>,
    pub needs_reconfigure: bool,
}

impl<'a> IdentificationPipeline<'a> {
    pub async fn run(&self, request: &IdentRequest, nat_enabled: bool) -> Result<IdentificationOutcome> {
        let composite = CompositeExtractor::new(self.extractor_policy);
        let dev_info = composite.extract_all(&self.extractors, request);

        let Some(doc) = self.retrievers.retrieve(self.devices, &dev_info).await? else {
            return Ok(IdentificationOutcome { device_id: None, needs_reconfigure: false });
        };

        let device_id = doc.id().map(str::to_string).unwrap();
        let before = Device::new(doc.clone());
        let mut after = Device::new(doc);

        for updater in &self.updaters {
            updater.update(&mut after, &dev_info, request, self.devices, nat_enabled).await?;
        }

        let changed_relevant = before.differs_on_reconfiguration_relevant_fields(&after);
        if before.document() != after.document() {
            self.devices.update(after.into_document()).await?;
            info!(device = %device_id, "device updated by identification pipeline");
        }

        Ok(IdentificationOutcome { device_id: Some(device_id), needs_reconfigure: changed_relevant })
    }
}

/// Logs the security-audit line for a sensitive-filename fetch,
/// independent of whether the request was otherwise identified (§4.7
/// last paragraph). Mirrors the source's exact phrasing.
pub fn log_sensitive_request(plugin: &Arc<dyn Plugin>, ip: &str, filename: &str) {
    if plugin.is_sensitive_filename(filename) {
        tracing::event!(target: "security", tracing::Level::WARN, "Sensitive file requested from {}: {}", ip, filename);
    }
}
