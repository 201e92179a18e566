//! Shared utilities for the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cluster_sync::config::{ClusterConfig, MtlsMode, SyncTimings};
use cluster_sync::control_plane::{
    ConfigBroadcaster, ControlPlaneHub, DataPlaneStore, HubSettings, SessionRegistry,
};
use cluster_sync::data_plane::{AgentSettings, ClientTls, DataPlaneAgent, SnapshotCache};
use cluster_sync::declarative::{
    ConfigLoader, FileSnapshotSource, MemoryConfigLoader, SnapshotSource, StaticPluginInventory,
};
use cluster_sync::lifecycle::Shutdown;
use cluster_sync::net::listener::Listener;
use cluster_sync::net::tls::{load_certs, load_private_key, ClusterTls};
use cluster_sync::net::transport::HandshakeRequest;
use cluster_sync::protocol::{ConfigCodec, PluginDescriptor};
use cluster_sync::security::verifier::crypto_provider;
use cluster_sync::security::{AuthGate, AuthMode, PinnedServerCert};
use serde_json::Value;
use tokio_rustls::{TlsAcceptor, TlsConnector};

pub const CP_VERSION: &str = "2.8.0";

/// Write a fresh self-signed cluster certificate pair into `dir`.
pub fn write_cluster_cert(dir: &Path, stem: &str) -> (PathBuf, PathBuf) {
    let cert = rcgen::generate_simple_self_signed(vec!["cluster_sync".to_string()]).unwrap();
    let cert_path = dir.join(format!("{stem}.crt"));
    let key_path = dir.join(format!("{stem}.key"));
    std::fs::write(&cert_path, cert.cert.pem()).unwrap();
    std::fs::write(&key_path, cert.key_pair.serialize_pem()).unwrap();
    (cert_path, key_path)
}

pub fn write_declarative(path: &Path, document: &Value) {
    std::fs::write(path, serde_json::to_vec_pretty(document).unwrap()).unwrap();
}

pub fn cluster_tls(cert_path: &Path, key_path: &Path) -> ClusterTls {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    let cluster = ClusterConfig {
        mtls: MtlsMode::Shared,
        cert_path: cert_path.to_path_buf(),
        key_path: key_path.to_path_buf(),
        ..ClusterConfig::default()
    };
    ClusterTls::load(&cluster).unwrap()
}

/// Client TLS that trusts the real control plane but presents another certificate.
pub fn foreign_client_connector(cluster: &ClusterTls, cert_path: &Path, key_path: &Path) -> TlsConnector {
    let config = rustls::ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .unwrap()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(PinnedServerCert::new(cluster.cluster_digest())))
        .with_client_auth_cert(load_certs(cert_path).unwrap(), load_private_key(key_path).unwrap())
        .unwrap();
    TlsConnector::from(Arc::new(config))
}

pub fn plugins() -> Vec<PluginDescriptor> {
    vec![
        PluginDescriptor::new("cors", Some("1.0.0")),
        PluginDescriptor::new("rate-limiting", Some("2.1.0")),
    ]
}

pub fn fast_timings() -> SyncTimings {
    SyncTimings {
        heartbeat_secs: 1,
        backoff_min_secs: 1,
        backoff_max_secs: 1,
        broadcast_interval_secs: 1,
        connect_timeout_secs: 2,
        ..SyncTimings::default()
    }
}

/// A control plane serving on an ephemeral port.
pub struct TestControlPlane {
    pub addr: SocketAddr,
    pub hub: Arc<ControlPlaneHub>,
    pub broadcaster: Arc<ConfigBroadcaster>,
    pub shutdown: Shutdown,
}

pub async fn start_control_plane(tls: &ClusterTls, declarative: &Path, bind: &str) -> TestControlPlane {
    let codec = ConfigCodec::default();
    let source: Arc<dyn SnapshotSource> = Arc::new(FileSnapshotSource::new(declarative));
    let registry = SessionRegistry::new();
    let timings = fast_timings();

    let hub = Arc::new(ControlPlaneHub::new(
        HubSettings {
            version: CP_VERSION.to_string(),
            timings: timings.clone(),
            codec,
        },
        TlsAcceptor::from(tls.server_config().unwrap()),
        AuthGate::new(AuthMode::Pinned(tls.cluster_digest())),
        source.clone(),
        Arc::new(StaticPluginInventory::new(plugins())),
        registry.clone(),
        DataPlaneStore::new(timings.data_plane_ttl()),
    ));
    let broadcaster = Arc::new(ConfigBroadcaster::new(
        source,
        registry,
        codec,
        timings.broadcast_interval(),
    ));

    let shutdown = Shutdown::new();
    let listener = Listener::bind(bind, 64).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let serve_rx = shutdown.subscribe();
    tokio::spawn(hub.clone().serve(listener, serve_rx));
    let broadcast_rx = shutdown.subscribe();
    let runner = broadcaster.clone();
    tokio::spawn(async move { runner.run(broadcast_rx).await });

    TestControlPlane {
        addr,
        hub,
        broadcaster,
        shutdown,
    }
}

pub fn data_plane_agent(
    tls: &ClusterTls,
    control_plane: SocketAddr,
    node_id: &str,
    version: &str,
    prefix: &Path,
    loader: Arc<dyn ConfigLoader>,
) -> Arc<DataPlaneAgent> {
    let client = ClientTls {
        connector: TlsConnector::from(tls.client_config().unwrap()),
        server_name: tls.server_name().unwrap(),
    };
    let settings = AgentSettings {
        control_plane: control_plane.to_string(),
        handshake: HandshakeRequest {
            node_id: node_id.to_string(),
            hostname: format!("{node_id}.local"),
            version: Some(version.to_string()),
        },
        timings: fast_timings(),
        codec: ConfigCodec::default(),
    };
    Arc::new(DataPlaneAgent::new(
        settings,
        client,
        loader,
        Arc::new(StaticPluginInventory::new(plugins())),
        SnapshotCache::in_prefix(prefix, ConfigCodec::default()),
    ))
}

/// Spawn an agent's run loop; returns the trigger that stops it.
pub fn spawn_agent(agent: &Arc<DataPlaneAgent>) -> Shutdown {
    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    let agent = agent.clone();
    tokio::spawn(async move { agent.run(rx).await });
    shutdown
}

pub fn memory_loader() -> Arc<MemoryConfigLoader> {
    Arc::new(MemoryConfigLoader::new())
}

/// Poll `condition` every 50 ms until it holds or `limit` passes.
pub async fn eventually<F>(limit: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
