//! Declarative configuration collaborators.
//!
//! # Data Flow
//! ```text
//! Control plane                          Data plane
//!   SnapshotSource::export_snapshot()      ConfigLoader::parse_and_load(table)
//!     → ConfigSnapshot (table + hash)        → LoadedConfig (entities + hash)
//!   PluginInventory::list_handlers()       ConfigLoader::current_hash()
//!     → sorted PluginDescriptor list
//! ```
//!
//! # Design Decisions
//! - The sync core only sees these traits; parsing and entity validation
//!   belong to whoever implements them
//! - file.rs ships reference implementations backed by a JSON document
//!   and an in-memory store

pub mod file;

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::protocol::{ConfigHash, ConfigSnapshot, PluginDescriptor};

pub use file::{FileSnapshotSource, MemoryConfigLoader, StaticPluginInventory};

/// Failures of the external configuration collaborators.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("failed to read declarative config: {0}")]
    Io(#[from] std::io::Error),

    #[error("declarative config is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid declarative config: {0}")]
    Invalid(String),
}

/// Entities produced by a successful load.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub hash: ConfigHash,
    pub entities: Arc<Value>,
}

/// Produces the authoritative snapshot on the control plane.
pub trait SnapshotSource: Send + Sync + 'static {
    fn export_snapshot(&self) -> Result<ConfigSnapshot, LoaderError>;
}

/// Installs snapshots into the running configuration of a data plane.
pub trait ConfigLoader: Send + Sync + 'static {
    /// Validate and install a raw configuration table, all or nothing.
    fn parse_and_load(&self, table: &Value) -> Result<LoadedConfig, LoaderError>;

    /// Hash of the installed configuration, if any.
    fn current_hash(&self) -> Option<ConfigHash>;
}

/// Lists locally installed plugins, sorted by name.
pub trait PluginInventory: Send + Sync + 'static {
    fn list_handlers(&self) -> Vec<PluginDescriptor>;
}
