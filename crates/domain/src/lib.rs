//! Domain layer - entities and contracts for the provisioning engine.
//!
//! This crate contains:
//! - Entities (Document, Device, Config, PluginRecord, Oip)
//! - Contracts (Collection, Plugin, InfoExtractor, PgAssociator, PluginObserver)
//! - The engine's error taxonomy
//!
//! Principles:
//! - No dependency on any concrete storage or transport
//! - Unknown document fields always round-trip untouched
//! - Testable in isolation

pub mod collection;
pub mod config;
pub mod device;
pub mod document;
pub mod error;
pub mod event;
pub mod oip;
pub mod plugin;

pub use collection::{Collection, ConfigCollection, FindOptions, Selector, SortOrder};
pub use config::Config;
pub use device::{Device, DeviceLifecycleState, RECONFIGURATION_RELEVANT_FIELDS};
pub use document::Document;
pub use error::{EngineError, Result};
pub use event::{PluginEvent, PluginObserver};
pub use oip::{Oip, OipState};
pub use plugin::{
    IdentRequest, InfoExtractor, PgAssociation, PgAssociator, Plugin, PluginCapability,
    PluginRecord, Transport,
};
