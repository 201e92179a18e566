//! Sync protocol subsystem.
//!
//! # Data Flow
//! ```text
//! Control plane                                   Data plane
//!   SnapshotSource::export_snapshot()
//!     → codec.rs (JSON + gzip, "reconfigure")  ──▶  codec.rs decode
//!     → compat.rs gate before every push             → pending slot → loader
//!
//!   compat.rs evaluate(cp, dp)               ◀──    "basic_info" (plugins)
//!   record heartbeat hash                    ◀──    ping(payload = config hash)
//! ```
//!
//! # Design Decisions
//! - Message bodies are tagged JSON documents, always gzip-compressed
//! - Unknown message types decode to `WireMessage::Unknown` instead of failing
//! - Compatibility is a pure function of both sides' metadata

pub mod codec;
pub mod compat;
pub mod types;

pub use codec::{CodecError, ConfigCodec, WireMessage, MAX_PAYLOAD_BYTES};
pub use compat::{evaluate, Compatibility};
pub use types::{
    ConfigHash, ConfigSnapshot, NodeIdentity, PluginDescriptor, SyncStatus, EMPTY_CONFIG_HASH,
};
