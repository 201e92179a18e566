//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Control plane:
//!     listener.rs (accept loop, connection limits)
//!     → tls.rs server config (client certificate required)
//!     → security::AuthGate
//!     → transport.rs accept (upgrade on /v1/outlet)
//!
//! Data plane:
//!     TCP connect → tls.rs client config → transport.rs connect
//!
//! Either side:
//!     FrameSender / FrameReceiver, liveness tracked by connection.rs
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - TLS material is loaded once and shared by every session
//! - Timeouts are classified separately from fatal transport errors

pub mod connection;
pub mod listener;
pub mod tls;
pub mod transport;

pub use connection::{ConnectionId, Liveness};
pub use transport::{Frame, FrameReceiver, FrameSender, HandshakeRequest, TransportError};
