//! Debounced configuration broadcast.
//!
//! # Responsibilities
//! - Turn change notifications into push requests
//! - Export the current snapshot once per wake and fan it out to every session
//! - Sleep for the broadcast interval after each push so bursts coalesce

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Notify};

use crate::control_plane::events::ChangeFeed;
use crate::control_plane::hub::HubError;
use crate::control_plane::session::SessionRegistry;
use crate::declarative::SnapshotSource;
use crate::protocol::ConfigCodec;

/// How long the broadcast loop waits for a wake before checking again.
const WAKE_POLL: Duration = Duration::from_secs(1);

pub struct ConfigBroadcaster {
    source: Arc<dyn SnapshotSource>,
    registry: SessionRegistry,
    codec: ConfigCodec,
    interval: Duration,
    wake: Notify,
}

impl ConfigBroadcaster {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        registry: SessionRegistry,
        codec: ConfigCodec,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            registry,
            codec,
            interval,
            wake: Notify::new(),
        }
    }

    /// Ask for a broadcast. Requests made before the loop wakes collapse into one.
    pub fn request_push(&self) {
        self.wake.notify_one();
    }

    /// Map both change channels to push requests until shutdown.
    pub async fn listen(&self, feed: &ChangeFeed, mut shutdown: broadcast::Receiver<()>) {
        let mut invalidations = feed.subscribe_invalidations();
        let mut mutations = feed.subscribe_mutations();

        loop {
            tokio::select! {
                event = invalidations.recv() => match event {
                    Ok(event) => {
                        tracing::debug!(origin = %event.origin, "Cluster invalidation");
                        self.request_push();
                    }
                    Err(RecvError::Lagged(_)) => self.request_push(),
                    Err(RecvError::Closed) => break,
                },
                event = mutations.recv() => match event {
                    Ok(event) => {
                        tracing::debug!(entity = %event.entity, op = ?event.operation, "Entity mutation");
                        self.request_push();
                    }
                    Err(RecvError::Lagged(_)) => self.request_push(),
                    Err(RecvError::Closed) => break,
                },
                _ = shutdown.recv() => break,
            }
        }
    }

    /// Broadcast loop: wait for a wake, push, then hold off for the interval.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            "Config broadcaster starting"
        );

        loop {
            let woke = tokio::select! {
                woke = tokio::time::timeout(WAKE_POLL, self.wake.notified()) => woke.is_ok(),
                _ = shutdown.recv() => break,
            };
            if !woke {
                continue;
            }

            match self.push_now() {
                Ok(sessions) => tracing::info!(sessions, "Broadcast configuration"),
                Err(e) => tracing::error!(error = %e, "Configuration broadcast failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.recv() => break,
            }
        }

        tracing::info!("Config broadcaster stopped");
    }

    /// Export, encode once, and enqueue on every live session.
    pub fn push_now(&self) -> Result<usize, HubError> {
        let snapshot = self.source.export_snapshot()?;
        let payload = Arc::new(self.codec.encode_reconfigure(&snapshot)?);
        let sessions = self.registry.fan_out(payload);
        tracing::debug!(hash = %snapshot.hash(), sessions, "Snapshot fanned out");
        Ok(sessions)
    }
}
