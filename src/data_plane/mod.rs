//! Data plane subsystem.
//!
//! # Data Flow
//! ```text
//! startup
//!     → node_id.rs (stable identity under the runtime prefix)
//!     → cache.rs load → loader (cold start)
//!     → agent.rs run loop
//!         receive → pending.rs slot → apply → loader → cache.rs store
//! ```
//!
//! # Design Decisions
//! - One agent per process owns the only path into the running configuration
//! - The pending slot holds one snapshot; newer ones replace older ones
//! - Cache failures never end a session

pub mod agent;
pub mod cache;
pub mod node_id;
pub mod pending;

pub use agent::{AgentError, AgentSettings, AgentState, ClientTls, DataPlaneAgent, SessionEnd};
pub use cache::{CacheError, SnapshotCache};
pub use node_id::load_or_create_node_id;
pub use pending::{PendingApply, PendingSlot};
