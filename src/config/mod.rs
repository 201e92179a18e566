//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → SyncConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//!
//! Declarative document (control plane):
//!     watcher.rs detects change
//!     → EntityMutation on the change feed
//!     → broadcaster re-exports and fans out
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, ClusterConfig, ControlPlaneConfig, DataPlaneConfig, MtlsMode, OcspLevel, Role,
    SyncConfig, SyncTimings,
};
