//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Data plane session ends (error or close):
//!     → backoff.rs (randomized delay)
//!     → reconnect
//! ```
//!
//! # Design Decisions
//! - Reconnection is indefinite; only shutdown stops it
//! - Jitter prevents retry storms against a recovering control plane
//! - The control plane never retries, it only accepts

pub mod backoff;

pub use backoff::reconnect_delay;
