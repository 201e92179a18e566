//! Session keys and the liveness window.
//!
//! A [`ConnectionId`] keys the control plane's session registry and tags
//! session logs. [`Liveness`] is shared by both sides of the protocol.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use crate::net::transport::TransportError;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Process-unique key of an accepted sync connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        // Only uniqueness matters here.
        Self(NEXT_SESSION.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Liveness window for one side of a session.
///
/// Receive timeouts are tolerated until nothing has arrived for longer than
/// the window, measured from the last successfully received frame.
#[derive(Debug, Clone)]
pub struct Liveness {
    window: Duration,
    last_seen: Instant,
}

impl Liveness {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: Instant::now(),
        }
    }

    /// Record that a frame arrived.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Time since the last received frame.
    pub fn silence(&self) -> Duration {
        self.last_seen.elapsed()
    }

    /// Fail once the silence exceeds the window.
    pub fn check(&self) -> Result<(), TransportError> {
        let silence = self.silence();
        if silence > self.window {
            return Err(TransportError::LivenessExpired { silence });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_increase() {
        let first = ConnectionId::new();
        let second = ConnectionId::new();
        assert!(second.as_u64() > first.as_u64());
        assert!(first.to_string().starts_with("session-"));
    }

    #[tokio::test(start_paused = true)]
    async fn liveness_expires_after_window() {
        let mut liveness = Liveness::new(Duration::from_secs(45));
        tokio::time::advance(Duration::from_secs(44)).await;
        assert!(liveness.check().is_ok());

        liveness.touch();
        tokio::time::advance(Duration::from_secs(45)).await;
        assert!(liveness.check().is_ok());

        tokio::time::advance(Duration::from_secs(1)).await;
        let err = liveness.check().unwrap_err();
        assert!(err.is_timeout());
    }
}
