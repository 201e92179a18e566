//! Control plane side of the sync protocol.
//!
//! # Responsibilities
//! - Accept data plane connections, authenticate them before the upgrade
//! - Require `basic_info` as the first frame and register the session
//! - Push the current snapshot to every new compatible session
//! - Answer heartbeats, record them, and deliver queued payloads
//!
//! # Data Flow
//! ```text
//! TCP accept → TLS → AuthGate → upgrade (/v1/outlet, node_id required)
//!     → first frame: basic_info(plugins)
//!     → register session, evaluate compatibility, enqueue full snapshot
//!     → select {
//!           receive/record: ping → enqueue Pong, upsert record
//!           send:           wake → pop → pong | re-check compat → binary
//!           shutdown
//!       }
//!     → close frame, session unregistered
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;

use crate::config::SyncTimings;
use crate::control_plane::records::DataPlaneStore;
use crate::control_plane::session::{Outbound, SessionQueue, SessionRegistry};
use crate::declarative::{LoaderError, PluginInventory, SnapshotSource};
use crate::net::connection::{ConnectionId, Liveness};
use crate::net::listener::Listener;
use crate::net::transport::{self, Frame, FrameReceiver, FrameSender, HandshakeRequest, TransportError};
use crate::observability::metrics;
use crate::protocol::types::sort_plugins;
use crate::protocol::{
    compat, CodecError, Compatibility, ConfigCodec, ConfigHash, NodeIdentity, SyncStatus,
    WireMessage,
};
use crate::security::AuthGate;

/// Failures that end a session.
#[derive(Debug, Error)]
pub enum HubError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("unable to export configuration: {0}")]
    Export(#[from] LoaderError),

    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// Terminal status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Ok,
    InternalError,
}

/// Static settings of the hub.
#[derive(Debug, Clone)]
pub struct HubSettings {
    /// Version reported to the compatibility check.
    pub version: String,
    pub timings: SyncTimings,
    pub codec: ConfigCodec,
}

pub struct ControlPlaneHub {
    settings: HubSettings,
    acceptor: TlsAcceptor,
    gate: AuthGate,
    source: Arc<dyn SnapshotSource>,
    inventory: Arc<dyn PluginInventory>,
    registry: SessionRegistry,
    records: DataPlaneStore,
}

impl ControlPlaneHub {
    pub fn new(
        settings: HubSettings,
        acceptor: TlsAcceptor,
        gate: AuthGate,
        source: Arc<dyn SnapshotSource>,
        inventory: Arc<dyn PluginInventory>,
        registry: SessionRegistry,
        records: DataPlaneStore,
    ) -> Self {
        Self {
            settings,
            acceptor,
            gate,
            source,
            inventory,
            registry,
            records,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn records(&self) -> &DataPlaneStore {
        &self.records
    }

    /// Accept connections until shutdown, one task per connection.
    pub async fn serve(self: Arc<Self>, listener: Listener, mut shutdown: broadcast::Receiver<()>) {
        loop {
            let (stream, peer, permit) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                        continue;
                    }
                },
                _ = shutdown.recv() => break,
            };

            let hub = self.clone();
            let session_shutdown = shutdown.resubscribe();
            tokio::spawn(async move {
                let _permit = permit;
                hub.handle_connection(stream, peer, session_shutdown).await;
            });
        }
        tracing::info!("Control plane stopped accepting connections");
    }

    /// Authenticate and upgrade one TCP connection, then run its session.
    pub async fn handle_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        shutdown: broadcast::Receiver<()>,
    ) {
        let conn_id = ConnectionId::new();
        let _ = stream.set_nodelay(true);

        let connect_timeout = self.settings.timings.connect_timeout();
        let tls = match tokio::time::timeout(connect_timeout, self.acceptor.accept(stream)).await {
            Ok(Ok(tls)) => tls,
            Ok(Err(e)) => {
                tracing::warn!(conn_id = %conn_id, peer = %peer, error = %e, "TLS handshake failed");
                return;
            }
            Err(_) => {
                tracing::warn!(conn_id = %conn_id, peer = %peer, "TLS handshake timed out");
                return;
            }
        };

        let chain = tls.get_ref().1.peer_certificates().map(<[_]>::to_vec);
        if let Err(e) = self.gate.authorize(chain.as_deref()).await {
            tracing::warn!(conn_id = %conn_id, peer = %peer, error = %e, "Data plane rejected");
            return;
        }

        let max_payload = self.settings.codec.max_payload();
        let upgrade = tokio::time::timeout(connect_timeout, transport::accept(tls, max_payload)).await;
        let (handshake, tx, rx) = match upgrade {
            Ok(Ok(accepted)) => accepted,
            Ok(Err(e)) => {
                tracing::warn!(conn_id = %conn_id, peer = %peer, error = %e, "Upgrade failed");
                return;
            }
            Err(_) => {
                tracing::warn!(conn_id = %conn_id, peer = %peer, "Upgrade timed out");
                return;
            }
        };

        self.handle_session(conn_id, tx, rx, handshake, peer.ip().to_string(), shutdown)
            .await;
    }

    /// Run an upgraded session to completion.
    pub async fn handle_session<S>(
        &self,
        conn_id: ConnectionId,
        mut tx: FrameSender<S>,
        mut rx: FrameReceiver<S>,
        handshake: HandshakeRequest,
        ip: String,
        mut shutdown: broadcast::Receiver<()>,
    ) -> SessionOutcome
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let plugins = match self.read_basic_info(&mut rx).await {
            Ok(plugins) => plugins,
            Err(e) => {
                tracing::warn!(
                    conn_id = %conn_id,
                    node_id = %handshake.node_id,
                    error = %e,
                    "Data plane did not send basic_info"
                );
                tx.close().await;
                return SessionOutcome::InternalError;
            }
        };

        let identity = NodeIdentity {
            node_id: handshake.node_id,
            hostname: handshake.hostname,
            ip,
            version: handshake.version,
            plugins: Some(plugins),
        };

        let registration = self.registry.register(conn_id);
        let queue = registration.queue().clone();
        tracing::info!(
            conn_id = %conn_id,
            node_id = %identity.node_id,
            hostname = %identity.hostname,
            ip = %identity.ip,
            version = identity.version.as_deref().unwrap_or("unknown"),
            "Data plane connected"
        );

        let compatibility = self.evaluate(&identity);
        let status = Mutex::new(compatibility.status);

        let result = match self.push_initial(&identity, &compatibility, &queue) {
            Err(e) => Err(e),
            Ok(()) => tokio::select! {
                result = self.receive_record_duty(&mut rx, &queue, &identity, &status) => result,
                result = self.send_duty(&mut tx, &queue, &identity, &status) => result,
                _ = shutdown.recv() => Ok(()),
            },
        };

        tx.close().await;
        drop(registration);

        match result {
            Ok(()) => {
                tracing::info!(conn_id = %conn_id, node_id = %identity.node_id, "Data plane disconnected");
                SessionOutcome::Ok
            }
            Err(e) => {
                tracing::warn!(
                    conn_id = %conn_id,
                    node_id = %identity.node_id,
                    error = %e,
                    "Data plane session failed"
                );
                SessionOutcome::InternalError
            }
        }
    }

    fn evaluate(&self, identity: &NodeIdentity) -> Compatibility {
        compat::evaluate(
            &self.settings.version,
            &self.inventory.list_handlers(),
            identity.version.as_deref(),
            identity.plugins.as_deref(),
        )
    }

    async fn read_basic_info<S>(
        &self,
        rx: &mut FrameReceiver<S>,
    ) -> Result<Vec<crate::protocol::PluginDescriptor>, HubError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match rx.recv_frame(self.settings.timings.liveness()).await? {
            Frame::Binary(payload) => match self.settings.codec.decode(&payload)? {
                WireMessage::BasicInfo { mut plugins } => {
                    sort_plugins(&mut plugins);
                    Ok(plugins)
                }
                WireMessage::Reconfigure { .. } => Err(HubError::Protocol(
                    "expected basic_info, got reconfigure".to_string(),
                )),
                WireMessage::Unknown => Err(HubError::Protocol(
                    "expected basic_info, got unknown message".to_string(),
                )),
            },
            other => Err(HubError::Protocol(format!(
                "expected basic_info, got {} frame",
                other.kind()
            ))),
        }
    }

    /// New sessions always get the full current snapshot when compatible.
    fn push_initial(
        &self,
        identity: &NodeIdentity,
        compatibility: &Compatibility,
        queue: &SessionQueue,
    ) -> Result<(), HubError> {
        if !compatibility.ok {
            tracing::warn!(
                node_id = %identity.node_id,
                status = %compatibility.status,
                reason = compatibility.reason.as_deref().unwrap_or(""),
                "Data plane incompatible, config sync suspended"
            );
            return Ok(());
        }

        let snapshot = self.source.export_snapshot()?;
        let payload = self.settings.codec.encode_reconfigure(&snapshot)?;
        queue.push(Outbound::Config(Arc::new(payload)));
        tracing::debug!(node_id = %identity.node_id, hash = %snapshot.hash(), "Queued initial snapshot");
        Ok(())
    }

    async fn receive_record_duty<S>(
        &self,
        rx: &mut FrameReceiver<S>,
        queue: &SessionQueue,
        identity: &NodeIdentity,
        status: &Mutex<SyncStatus>,
    ) -> Result<(), HubError>
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
                Frame::Ping(payload) => {
                    queue.push(Outbound::Pong);
                    let hash = heartbeat_hash(&payload, identity);
                    let current = *status.lock().unwrap_or_else(|p| p.into_inner());
                    self.records.upsert(
                        &identity.node_id,
                        &identity.hostname,
                        &identity.ip,
                        identity.version.as_deref(),
                        hash,
                        current,
                    );
                    metrics::record_heartbeat("control_plane");
                }
                Frame::Close => return Ok(()),
                other => {
                    return Err(HubError::Protocol(format!(
                        "unexpected {} frame from data plane",
                        other.kind()
                    )))
                }
            }
        }
    }

    async fn send_duty<S>(
        &self,
        tx: &mut FrameSender<S>,
        queue: &SessionQueue,
        identity: &NodeIdentity,
        status: &Mutex<SyncStatus>,
    ) -> Result<(), HubError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let poll = self.settings.timings.send_poll();
        loop {
            queue.wait(poll).await;

            while let Some(item) = queue.pop() {
                match item {
                    Outbound::Pong => tx.send_pong().await?,
                    Outbound::Config(payload) => {
                        let compatibility = self.evaluate(identity);
                        *status.lock().unwrap_or_else(|p| p.into_inner()) = compatibility.status;

                        if compatibility.ok {
                            tx.send_binary(payload.as_ref().clone()).await?;
                            metrics::record_config_push();
                            tracing::debug!(node_id = %identity.node_id, "Config pushed");
                        } else {
                            metrics::record_push_dropped(compatibility.status.as_str());
                            tracing::warn!(
                                node_id = %identity.node_id,
                                status = %compatibility.status,
                                reason = compatibility.reason.as_deref().unwrap_or(""),
                                "Config push dropped, data plane incompatible"
                            );
                        }
                    }
                }
            }
        }
    }
}

/// Parse a heartbeat payload; anything but a 32-hex hash counts as "no snapshot".
fn heartbeat_hash(payload: &[u8], identity: &NodeIdentity) -> ConfigHash {
    match std::str::from_utf8(payload).ok().and_then(ConfigHash::parse) {
        Some(hash) => hash,
        None => {
            tracing::warn!(
                node_id = %identity.node_id,
                len = payload.len(),
                "Invalid heartbeat payload, recording empty config hash"
            );
            ConfigHash::empty()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
    use serde_json::json;

    use crate::config::MtlsMode;
    use crate::declarative::StaticPluginInventory;
    use crate::net::tls::ClusterTls;
    use crate::protocol::{ConfigSnapshot, PluginDescriptor};
    use crate::security::{AuthMode, CertDigest};

    struct FixedSource(ConfigSnapshot);

    impl SnapshotSource for FixedSource {
        fn export_snapshot(&self) -> Result<ConfigSnapshot, LoaderError> {
            Ok(self.0.clone())
        }
    }

    fn plugins() -> Vec<PluginDescriptor> {
        vec![
            PluginDescriptor::new("rate-limiting", Some("2.1.0")),
            PluginDescriptor::new("cors", Some("1.0.0")),
        ]
    }

    fn hub(snapshot: ConfigSnapshot) -> Arc<ControlPlaneHub> {
        hub_with(snapshot, SyncTimings::default())
    }

    fn hub_with(snapshot: ConfigSnapshot, timings: SyncTimings) -> Arc<ControlPlaneHub> {
        let generated = rcgen::generate_simple_self_signed(vec!["cluster_sync".to_string()]).unwrap();
        let cert: CertificateDer<'static> = generated.cert.der().clone();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(generated.key_pair.serialize_der()));
        let tls = ClusterTls::from_parts(
            MtlsMode::Shared,
            vec![cert.clone()],
            key,
            Vec::new(),
            "cluster_sync".to_string(),
        );

        Arc::new(ControlPlaneHub::new(
            HubSettings {
                version: "2.8.0".to_string(),
                timings,
                codec: ConfigCodec::default(),
            },
            TlsAcceptor::from(tls.server_config().unwrap()),
            AuthGate::new(AuthMode::Pinned(CertDigest::of(&cert))),
            Arc::new(FixedSource(snapshot)),
            Arc::new(StaticPluginInventory::new(plugins())),
            SessionRegistry::new(),
            DataPlaneStore::new(Duration::from_secs(60)),
        ))
    }

    type Client = (
        FrameSender<tokio::io::DuplexStream>,
        FrameReceiver<tokio::io::DuplexStream>,
    );

    /// Start a session on the hub and return the data plane end of it.
    async fn open(
        hub: &Arc<ControlPlaneHub>,
        version: &str,
    ) -> (Client, tokio::task::JoinHandle<SessionOutcome>, broadcast::Sender<()>) {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let server_hub = hub.clone();
        let session = tokio::spawn(async move {
            let (handshake, tx, rx) = transport::accept(server_io, 1 << 20).await.unwrap();
            server_hub
                .handle_session(ConnectionId::new(), tx, rx, handshake, "10.0.0.7".into(), shutdown_rx)
                .await
        });

        let handshake = HandshakeRequest {
            node_id: "dp-1".into(),
            hostname: "edge-1".into(),
            version: Some(version.into()),
        };
        let endpoint = handshake.endpoint("localhost:8005").unwrap();
        let client = transport::connect(client_io, &endpoint, 1 << 20).await.unwrap();
        (client, session, shutdown_tx)
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..100 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn compatible_session_gets_snapshot_and_heartbeats_are_recorded() {
        let snapshot = ConfigSnapshot::new(json!({ "services": [{ "name": "a" }] }));
        let hub = hub(snapshot.clone());
        let ((mut tx, mut rx), session, _shutdown) = open(&hub, "2.8.3").await;
        let codec = ConfigCodec::default();
        let wait = Duration::from_secs(5);

        tx.send_binary(codec.encode_basic_info(&plugins()).unwrap()).await.unwrap();
        let Frame::Binary(body) = rx.recv_frame(wait).await.unwrap() else {
            panic!("expected the initial snapshot");
        };
        let pushed = codec.decode(&body).unwrap().into_snapshot().unwrap();
        assert_eq!(pushed.hash(), snapshot.hash());

        tx.send_ping(snapshot.hash().as_str().as_bytes()).await.unwrap();
        assert!(matches!(rx.recv_frame(wait).await.unwrap(), Frame::Pong(_)));

        wait_for(|| hub.records().get("dp-1").is_some()).await;
        let record = hub.records().get("dp-1").unwrap();
        assert_eq!(&record.config_hash, snapshot.hash());
        assert_eq!(record.sync_status, SyncStatus::Normal);
        assert_eq!(record.hostname, "edge-1");
        assert_eq!(record.ip, "10.0.0.7");
        assert_eq!(hub.registry().len(), 1);

        tx.close().await;
        assert_eq!(session.await.unwrap(), SessionOutcome::Ok);
        assert_eq!(hub.registry().len(), 0);
    }

    #[tokio::test]
    async fn fan_out_is_delivered_in_order() {
        let hub = hub(ConfigSnapshot::new(json!({ "n": 0 })));
        let ((mut tx, mut rx), session, shutdown) = open(&hub, "2.8.0").await;
        let codec = ConfigCodec::default();
        let wait = Duration::from_secs(5);

        tx.send_binary(codec.encode_basic_info(&plugins()).unwrap()).await.unwrap();
        assert!(matches!(rx.recv_frame(wait).await.unwrap(), Frame::Binary(_)));

        let hashes: Vec<_> = (1..=3)
            .map(|n| {
                let snapshot = ConfigSnapshot::new(json!({ "n": n }));
                let payload = codec.encode_reconfigure(&snapshot).unwrap();
                assert_eq!(hub.registry().fan_out(Arc::new(payload)), 1);
                snapshot.hash().clone()
            })
            .collect();

        for expected in &hashes {
            let Frame::Binary(body) = rx.recv_frame(wait).await.unwrap() else {
                panic!("expected a reconfigure");
            };
            let received = codec.decode(&body).unwrap().into_snapshot().unwrap();
            assert_eq!(received.hash(), expected);
        }

        shutdown.send(()).unwrap();
        assert_eq!(session.await.unwrap(), SessionOutcome::Ok);
    }

    #[tokio::test]
    async fn incompatible_session_is_kept_but_not_synced() {
        let hub = hub(ConfigSnapshot::new(json!({ "n": 0 })));
        let ((mut tx, mut rx), session, shutdown) = open(&hub, "2.5.0").await;
        let codec = ConfigCodec::default();
        let wait = Duration::from_secs(5);

        tx.send_binary(codec.encode_basic_info(&plugins()).unwrap()).await.unwrap();
        wait_for(|| hub.registry().len() == 1).await;

        let payload = codec.encode_reconfigure(&ConfigSnapshot::new(json!({ "n": 1 }))).unwrap();
        hub.registry().fan_out(Arc::new(payload));
        tx.send_ping(EMPTY_HASH.as_bytes()).await.unwrap();

        assert!(matches!(rx.recv_frame(wait).await.unwrap(), Frame::Pong(_)));
        wait_for(|| hub.records().get("dp-1").is_some()).await;
        let record = hub.records().get("dp-1").unwrap();
        assert_eq!(record.sync_status, SyncStatus::VersionIncompatible);
        assert!(record.config_hash.is_empty());

        shutdown.send(()).unwrap();
        assert_eq!(session.await.unwrap(), SessionOutcome::Ok);
    }

    #[tokio::test]
    async fn first_frame_must_be_basic_info() {
        let hub = hub(ConfigSnapshot::new(json!({})));
        let ((mut tx, _rx), session, _shutdown) = open(&hub, "2.8.0").await;

        tx.send_ping(EMPTY_HASH.as_bytes()).await.unwrap();
        assert_eq!(session.await.unwrap(), SessionOutcome::InternalError);
        assert_eq!(hub.registry().len(), 0);
    }

    #[tokio::test]
    async fn binary_after_handshake_is_a_protocol_error() {
        let hub = hub(ConfigSnapshot::new(json!({})));
        let ((mut tx, _rx), session, _shutdown) = open(&hub, "2.8.0").await;
        let codec = ConfigCodec::default();

        tx.send_binary(codec.encode_basic_info(&plugins()).unwrap()).await.unwrap();
        tx.send_binary(codec.encode_basic_info(&plugins()).unwrap()).await.unwrap();
        assert_eq!(session.await.unwrap(), SessionOutcome::InternalError);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_data_plane_hits_liveness_window() {
        let hub = hub(ConfigSnapshot::new(json!({ "n": 0 })));
        let ((mut tx, mut rx), session, _shutdown) = open(&hub, "2.8.0").await;
        let codec = ConfigCodec::default();

        tx.send_binary(codec.encode_basic_info(&plugins()).unwrap()).await.unwrap();
        assert!(matches!(rx.recv_frame(Duration::from_secs(5)).await.unwrap(), Frame::Binary(_)));
        assert_eq!(hub.registry().len(), 1);

        let silent_since = tokio::time::Instant::now();
        assert_eq!(session.await.unwrap(), SessionOutcome::InternalError);
        assert!(silent_since.elapsed() >= SyncTimings::default().liveness());
        assert_eq!(hub.registry().len(), 0);
    }

    #[tokio::test]
    async fn idle_tcp_peer_is_dropped_after_connect_timeout() {
        let timings = SyncTimings {
            connect_timeout_secs: 1,
            ..SyncTimings::default()
        };
        let hub = hub_with(ConfigSnapshot::new(json!({})), timings);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let _idle = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let started = tokio::time::Instant::now();
        let handled = tokio::time::timeout(
            Duration::from_secs(5),
            hub.handle_connection(stream, peer, shutdown_rx),
        )
        .await;
        assert!(handled.is_ok(), "silent peer held its connection slot");
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!(hub.registry().len(), 0);
    }

    #[test]
    fn malformed_heartbeat_records_empty_hash() {
        let identity = NodeIdentity {
            node_id: "dp-1".into(),
            hostname: String::new(),
            ip: String::new(),
            version: None,
            plugins: None,
        };
        assert!(heartbeat_hash(b"not-a-hash", &identity).is_empty());
        assert!(heartbeat_hash(&[0xff; 32], &identity).is_empty());
        let valid = "0123456789abcdef0123456789abcdef";
        assert_eq!(heartbeat_hash(valid.as_bytes(), &identity).as_str(), valid);
    }

    const EMPTY_HASH: &str = crate::protocol::EMPTY_CONFIG_HASH;
}
