//! Data plane sync agent.
//!
//! # Responsibilities
//! - Apply the cached snapshot before the first connection attempt
//! - Keep one session to the control plane open, reconnecting with jitter
//! - Per session, run the apply, heartbeat and receive duties until the
//!   first of them ends
//!
//! # Data Flow
//! ```text
//! Disconnected → Connecting → HandshakeSent → Syncing ─┐
//!      ▲                                                │ first duty ends
//!      └──────────── backoff (5-10 s) ◀─────────────────┘
//!
//! receive duty:  reconfigure → PendingSlot::offer → extra ping
//! apply duty:    wake → peek → loader.parse_and_load → cache.store → clear_if
//! heartbeat:     every 30 s ping(current hash | 32 zeros)
//! ```

use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch, Mutex};
use tokio_rustls::TlsConnector;

use crate::config::SyncTimings;
use crate::data_plane::cache::SnapshotCache;
use crate::data_plane::pending::{PendingApply, PendingSlot};
use crate::declarative::{ConfigLoader, PluginInventory};
use crate::net::connection::Liveness;
use crate::net::transport::{self, Frame, FrameReceiver, FrameSender, HandshakeRequest, TransportError};
use crate::observability::metrics;
use crate::protocol::{CodecError, ConfigCodec, ConfigHash, WireMessage};
use crate::resilience::reconnect_delay;

/// Where the agent is in its connection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Disconnected,
    Connecting,
    HandshakeSent,
    Syncing,
    Stopped,
}

/// Why a session ended.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to connect: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("control plane closed the session")]
    ClosedByPeer,
}

/// How `sync_session` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Shutdown,
}

/// Static settings of one agent.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Control plane address, `host:port`.
    pub control_plane: String,
    pub handshake: HandshakeRequest,
    pub timings: SyncTimings,
    pub codec: ConfigCodec,
}

/// TLS client side of the session.
#[derive(Clone)]
pub struct ClientTls {
    pub connector: TlsConnector,
    pub server_name: ServerName<'static>,
}

pub struct DataPlaneAgent {
    settings: AgentSettings,
    tls: ClientTls,
    loader: Arc<dyn ConfigLoader>,
    inventory: Arc<dyn PluginInventory>,
    cache: SnapshotCache,
    pending: PendingSlot,
    state: watch::Sender<AgentState>,
}

type TlsStream = tokio_rustls::client::TlsStream<TcpStream>;

impl DataPlaneAgent {
    pub fn new(
        settings: AgentSettings,
        tls: ClientTls,
        loader: Arc<dyn ConfigLoader>,
        inventory: Arc<dyn PluginInventory>,
        cache: SnapshotCache,
    ) -> Self {
        let (state, _) = watch::channel(AgentState::Disconnected);
        Self {
            settings,
            tls,
            loader,
            inventory,
            cache,
            pending: PendingSlot::new(),
            state,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.settings.handshake.node_id
    }

    /// Observe state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<AgentState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> AgentState {
        *self.state.borrow()
    }

    fn set_state(&self, state: AgentState) {
        self.state.send_replace(state);
    }

    /// Apply the cached snapshot, if any. Cache problems are logged and ignored.
    pub fn cold_start(&self) -> Option<ConfigHash> {
        let snapshot = match self.cache.load() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                tracing::debug!(path = ?self.cache.path(), "No cached snapshot");
                return None;
            }
            Err(e) => {
                tracing::warn!(path = ?self.cache.path(), error = %e, "Unable to read cached snapshot");
                return None;
            }
        };

        match self.loader.parse_and_load(snapshot.config_table()) {
            Ok(loaded) => {
                tracing::info!(hash = %loaded.hash, "Applied cached snapshot");
                metrics::record_config_applied("cache");
                Some(loaded.hash)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cached snapshot rejected by loader");
                None
            }
        }
    }

    /// Run until shutdown: cold start, then connect, sync and reconnect forever.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        self.cold_start();

        loop {
            match self.connect_and_sync(&mut shutdown).await {
                Ok(SessionEnd::Shutdown) => break,
                Err(e) => tracing::warn!(
                    node_id = %self.node_id(),
                    error = %e,
                    "Sync session ended"
                ),
            }

            self.set_state(AgentState::Disconnected);
            let delay = reconnect_delay(
                Duration::from_secs(self.settings.timings.backoff_min_secs),
                Duration::from_secs(self.settings.timings.backoff_max_secs),
            );
            tracing::info!(delay_ms = delay.as_millis() as u64, "Reconnecting after backoff");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.recv() => break,
            }
        }

        self.set_state(AgentState::Stopped);
        tracing::info!(node_id = %self.node_id(), "Data plane agent stopped");
    }

    async fn connect_and_sync(
        &self,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<SessionEnd, AgentError> {
        self.set_state(AgentState::Connecting);
        let deadline = self.settings.timings.connect_timeout();

        let (tx, rx) = tokio::select! {
            result = tokio::time::timeout(deadline, self.connect()) => {
                result.map_err(|_| AgentError::ConnectTimeout(deadline))??
            }
            _ = shutdown.recv() => return Ok(SessionEnd::Shutdown),
        };

        tracing::info!(
            node_id = %self.node_id(),
            control_plane = %self.settings.control_plane,
            "Connected to control plane"
        );
        self.sync_session(tx, rx, shutdown).await
    }

    async fn connect(&self) -> Result<(FrameSender<TlsStream>, FrameReceiver<TlsStream>), AgentError> {
        let endpoint = self.settings.handshake.endpoint(&self.settings.control_plane)?;
        let tcp = TcpStream::connect(&self.settings.control_plane).await?;
        tcp.set_nodelay(true)?;
        let stream = self
            .tls
            .connector
            .connect(self.tls.server_name.clone(), tcp)
            .await?;
        Ok(transport::connect(stream, &endpoint, self.settings.codec.max_payload()).await?)
    }

    /// Drive one established session: handshake, then the three duties.
    ///
    /// Returns `Ok` only when shutdown was requested; any duty ending is an error.
    pub async fn sync_session<S>(
        &self,
        tx: FrameSender<S>,
        mut rx: FrameReceiver<S>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<SessionEnd, AgentError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let tx = Mutex::new(tx);

        let outcome = match self.send_basic_info(&tx).await {
            Err(e) => Err(e),
            Ok(()) => {
                self.set_state(AgentState::Syncing);
                tracing::info!(node_id = %self.node_id(), "Syncing with control plane");

                tokio::select! {
                    result = self.apply_duty() => result,
                    result = self.heartbeat_duty(&tx) => result,
                    result = self.receive_duty(&tx, &mut rx) => result,
                    _ = shutdown.recv() => Ok(SessionEnd::Shutdown),
                }
            }
        };

        tx.lock().await.close().await;
        outcome
    }

    async fn send_basic_info<S>(&self, tx: &Mutex<FrameSender<S>>) -> Result<(), AgentError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let plugins = self.inventory.list_handlers();
        let payload = self.settings.codec.encode_basic_info(&plugins)?;
        tx.lock().await.send_binary(payload).await?;
        self.set_state(AgentState::HandshakeSent);
        tracing::debug!(plugins = plugins.len(), "Sent basic_info");
        Ok(())
    }

    async fn send_heartbeat<S>(&self, tx: &Mutex<FrameSender<S>>) -> Result<(), AgentError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let hash = self.loader.current_hash().unwrap_or_else(ConfigHash::empty);
        tx.lock().await.send_ping(hash.as_str().as_bytes()).await?;
        metrics::record_heartbeat("data_plane");
        tracing::debug!(hash = %hash, "Sent heartbeat");
        Ok(())
    }

    async fn apply_duty(&self) -> Result<SessionEnd, AgentError> {
        let poll = self.settings.timings.apply_poll();
        loop {
            if !self.pending.wait(poll).await {
                continue;
            }
            let Some(next) = self.pending.peek() else {
                continue;
            };
            self.apply(&next);
            self.pending.clear_if(&next);
        }
    }

    /// Install one snapshot. Failures are logged; the session carries on.
    fn apply(&self, next: &PendingApply) {
        let hash = next.snapshot.hash();
        if self.loader.current_hash().as_ref() == Some(hash) {
            tracing::debug!(hash = %hash, "Snapshot already applied, skipping reload");
            metrics::record_config_applied("unchanged");
            return;
        }

        match self.loader.parse_and_load(next.snapshot.config_table()) {
            Ok(loaded) => {
                tracing::info!(hash = %loaded.hash, "Applied configuration snapshot");
                metrics::record_config_applied("ok");
                if let Err(e) = self.cache.store(&next.payload) {
                    tracing::warn!(path = ?self.cache.path(), error = %e, "Unable to persist snapshot cache");
                }
            }
            Err(e) => {
                tracing::error!(hash = %hash, error = %e, "Failed to apply configuration snapshot");
                metrics::record_config_applied("error");
            }
        }
    }

    async fn heartbeat_duty<S>(&self, tx: &Mutex<FrameSender<S>>) -> Result<SessionEnd, AgentError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut ticker = tokio::time::interval(self.settings.timings.heartbeat());
        loop {
            ticker.tick().await;
            self.send_heartbeat(tx).await?;
        }
    }

    async fn receive_duty<S>(
        &self,
        tx: &Mutex<FrameSender<S>>,
        rx: &mut FrameReceiver<S>,
    ) -> Result<SessionEnd, AgentError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let timings = &self.settings.timings;
        let mut liveness = Liveness::new(timings.liveness());

        loop {
            let frame = match rx.recv_frame(timings.recv_poll()).await {
                Ok(frame) => frame,
                Err(e) if e.is_timeout() => {
                    liveness.check()?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            liveness.touch();

            match frame {
                Frame::Binary(payload) => {
                    let message = self.settings.codec.decode(&payload)?;
                    if !matches!(message, WireMessage::Reconfigure { .. }) {
                        tracing::debug!(?message, "Ignoring unexpected message");
                        continue;
                    }
                    let snapshot = message.into_snapshot()?;
                    tracing::debug!(hash = %snapshot.hash(), "Received reconfigure");
                    if self.pending.offer(PendingApply { snapshot, payload }) {
                        tracing::debug!("Replaced snapshot still waiting to be applied");
                    }
                    self.send_heartbeat(tx).await?;
                }
                Frame::Pong(_) => tracing::trace!("Received pong"),
                Frame::Ping(_) => tracing::trace!("Received ping"),
                Frame::Close => return Err(AgentError::ClosedByPeer),
            }
        }
    }
}
