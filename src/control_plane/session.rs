//! Per-session outbound queues and the live session registry.
//!
//! # Design Decisions
//! - One FIFO queue plus one wake signal per session; the wake stores at most
//!   one permit, so the sender drains the whole queue on every wake
//! - Sessions are keyed by connection id and removed by an RAII guard when
//!   the session task ends, however it ends

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Notify;

use crate::net::connection::ConnectionId;
use crate::observability::metrics;

/// One queued outbound item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Answer to a heartbeat.
    Pong,
    /// Encoded reconfigure payload, shared by every session it was fanned out to.
    Config(Arc<Vec<u8>>),
}

/// Strict FIFO of outbound items for one session.
#[derive(Debug, Default)]
pub struct SessionQueue {
    items: Mutex<VecDeque<Outbound>>,
    wake: Notify,
}

impl SessionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item and signal the sender.
    pub fn push(&self, item: Outbound) {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(item);
        self.wake.notify_one();
    }

    /// Remove the oldest item.
    pub fn pop(&self) -> Option<Outbound> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for the wake signal for at most `poll`. Returns false on timeout.
    pub async fn wait(&self, poll: Duration) -> bool {
        tokio::time::timeout(poll, self.wake.notified()).await.is_ok()
    }
}

/// Set of live sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<ConnectionId, Arc<SessionQueue>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. It stays registered until the returned guard drops.
    pub fn register(&self, id: ConnectionId) -> SessionRegistration {
        let queue = Arc::new(SessionQueue::new());
        self.sessions.insert(id, queue.clone());
        metrics::record_session_opened();
        SessionRegistration {
            id,
            queue,
            sessions: self.sessions.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Enqueue a payload on every live session. Returns the number of sessions reached.
    pub fn fan_out(&self, payload: Arc<Vec<u8>>) -> usize {
        let mut reached = 0;
        for entry in self.sessions.iter() {
            entry.value().push(Outbound::Config(payload.clone()));
            reached += 1;
        }
        reached
    }
}

/// Registry membership of one session. Dropping it unregisters the session.
#[derive(Debug)]
pub struct SessionRegistration {
    id: ConnectionId,
    queue: Arc<SessionQueue>,
    sessions: Arc<DashMap<ConnectionId, Arc<SessionQueue>>>,
}

impl SessionRegistration {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn queue(&self) -> &Arc<SessionQueue> {
        &self.queue
    }
}

impl Drop for SessionRegistration {
    fn drop(&mut self) {
        self.sessions.remove(&self.id);
        metrics::record_session_closed();
    }
}
