//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load certificates → build auth gate / client TLS
//!     → spawn background tasks → serve (control plane) or run agent (data plane)
//!
//! Shutdown (shutdown.rs):
//!     Trigger → accept loop, sessions, broadcaster, purge, admin and agent exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: certificates first, then background tasks, listener last
//! - Shutdown has timeout: background tasks get a bounded grace period

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::{spawn_signal_handler, wait_for_signal};
pub use startup::{run, StartupError};
