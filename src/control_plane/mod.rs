//! Control plane subsystem.
//!
//! # Data Flow
//! ```text
//! entity mutation / cluster invalidation
//!     → events.rs ChangeFeed
//!     → broadcaster.rs (one push per interval)
//!         export snapshot → encode once → session.rs fan_out
//!
//! data plane connection
//!     → hub.rs (auth, upgrade, basic_info, initial push)
//!         ping  → records.rs upsert, Pong queued
//!         queue → compat re-check → binary frame
//! ```
//!
//! # Design Decisions
//! - One process is one worker: both change channels end in the same
//!   broadcaster, so a cluster invalidation needs no local re-broadcast
//! - Payloads are encoded once per broadcast and shared by all sessions
//! - Incompatible peers stay connected; their pushes are dropped and counted

pub mod broadcaster;
pub mod events;
pub mod hub;
pub mod records;
pub mod session;

pub use broadcaster::ConfigBroadcaster;
pub use events::{ChangeFeed, ClusterInvalidation, EntityMutation, MutationOp};
pub use hub::{ControlPlaneHub, HubError, HubSettings, SessionOutcome};
pub use records::{DataPlaneRecord, DataPlaneStore};
pub use session::{Outbound, SessionQueue, SessionRegistration, SessionRegistry};
