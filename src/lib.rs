//! Control plane / data plane configuration sync for API gateway fleets.

pub mod admin;
pub mod config;
pub mod control_plane;
pub mod data_plane;
pub mod declarative;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod protocol;
pub mod resilience;
pub mod security;

pub use config::schema::SyncConfig;
pub use control_plane::{ConfigBroadcaster, ControlPlaneHub};
pub use data_plane::DataPlaneAgent;
pub use lifecycle::Shutdown;
