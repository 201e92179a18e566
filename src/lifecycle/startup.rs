//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order for the configured role
//! - Start background tasks (broadcaster, record purge, admin API)
//! - Bind the cluster listener or start the agent last
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Certificate material is loaded once, before any session is served
//! - Background tasks subscribe to shutdown before they are spawned

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::admin::{serve_admin, AdminState, RoleView};
use crate::config::watcher::DeclarativeWatcher;
use crate::config::{AdminConfig, MtlsMode, Role, SyncConfig};
use crate::control_plane::{
    ChangeFeed, ConfigBroadcaster, ControlPlaneHub, DataPlaneStore, HubSettings, SessionRegistry,
};
use crate::data_plane::{
    load_or_create_node_id, AgentSettings, ClientTls, DataPlaneAgent, SnapshotCache,
};
use crate::declarative::{
    FileSnapshotSource, LoaderError, MemoryConfigLoader, SnapshotSource, StaticPluginInventory,
};
use crate::lifecycle::Shutdown;
use crate::net::listener::{Listener, ListenerError};
use crate::net::tls::{ClusterTls, TlsError};
use crate::net::transport::HandshakeRequest;
use crate::observability::metrics;
use crate::protocol::ConfigCodec;
use crate::security::{AuthGate, AuthMode, OcspClient};

/// How often expired data plane records are purged.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// How long background tasks get to finish after shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid metrics address '{0}'")]
    MetricsAddress(String),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("declarative config unavailable: {0}")]
    Declarative(#[from] LoaderError),

    #[error("failed to watch declarative config: {0}")]
    Watch(#[from] notify::Error),

    #[error("data plane state: {0}")]
    Io(#[from] std::io::Error),

    #[error("data plane requires cluster.control_plane")]
    MissingControlPlane,
}

/// Run the configured role until `shutdown` fires.
pub async fn run(config: SyncConfig, shutdown: Shutdown) -> Result<(), StartupError> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    if config.observability.metrics_enabled {
        let addr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|_| StartupError::MetricsAddress(config.observability.metrics_address.clone()))?;
        metrics::init_metrics(addr);
    }

    match config.role {
        Role::ControlPlane => run_control_plane(config, shutdown).await,
        Role::DataPlane => run_data_plane(config, shutdown).await,
    }
}

pub async fn run_control_plane(config: SyncConfig, shutdown: Shutdown) -> Result<(), StartupError> {
    let tls = ClusterTls::load(&config.cluster)?;
    let acceptor = TlsAcceptor::from(tls.server_config()?);
    let gate = AuthGate::new(match tls.mode() {
        MtlsMode::Shared => AuthMode::Pinned(tls.cluster_digest()),
        MtlsMode::Pki => AuthMode::Pki {
            ocsp: config.cluster.ocsp,
            client: OcspClient::new(config.sync.ocsp_timeout(), tls.ca_certs().to_vec()),
        },
    });

    let cp = &config.control_plane;
    let codec = ConfigCodec::new(config.cluster.max_payload_bytes);
    let source: Arc<dyn SnapshotSource> = Arc::new(FileSnapshotSource::new(&cp.declarative_config));
    let initial = source.export_snapshot()?;
    tracing::info!(
        path = ?cp.declarative_config,
        hash = %initial.hash(),
        "Declarative config loaded"
    );

    let registry = SessionRegistry::new();
    let records = DataPlaneStore::new(config.sync.data_plane_ttl());
    let feed = ChangeFeed::new();
    let _watcher = if cp.watch {
        Some(DeclarativeWatcher::new(&cp.declarative_config, feed.clone()).run()?)
    } else {
        None
    };

    let broadcaster = Arc::new(ConfigBroadcaster::new(
        source.clone(),
        registry.clone(),
        codec,
        config.sync.broadcast_interval(),
    ));
    let hub = Arc::new(ControlPlaneHub::new(
        HubSettings {
            version: cp.version.clone(),
            timings: config.sync.clone(),
            codec,
        },
        acceptor,
        gate,
        source,
        Arc::new(StaticPluginInventory::new(cp.plugins.clone())),
        registry.clone(),
        records.clone(),
    ));

    let mut tasks = Vec::new();
    {
        let broadcaster = broadcaster.clone();
        let rx = shutdown.subscribe();
        tasks.push(tokio::spawn(async move { broadcaster.run(rx).await }));
    }
    {
        let broadcaster = broadcaster.clone();
        let rx = shutdown.subscribe();
        tasks.push(tokio::spawn(async move { broadcaster.listen(&feed, rx).await }));
    }
    {
        let records = records.clone();
        let rx = shutdown.subscribe();
        tasks.push(tokio::spawn(async move { records.run_purge(PURGE_INTERVAL, rx).await }));
    }
    if config.admin.enabled {
        let state = AdminState {
            api_key: Arc::from(config.admin.api_key.as_str()),
            role: Role::ControlPlane,
            version: cp.version.clone(),
            view: RoleView::ControlPlane { registry, records },
        };
        tasks.push(spawn_admin(config.admin.clone(), state, &shutdown));
    }

    let listener = Listener::bind(&config.cluster.listen, config.cluster.max_connections).await?;
    tracing::info!(
        address = %config.cluster.listen,
        mode = ?tls.mode(),
        version = %cp.version,
        "Control plane listening"
    );
    hub.serve(listener, shutdown.subscribe()).await;

    join_tasks(tasks).await;
    Ok(())
}

pub async fn run_data_plane(config: SyncConfig, shutdown: Shutdown) -> Result<(), StartupError> {
    let control_plane = config
        .cluster
        .control_plane
        .clone()
        .ok_or(StartupError::MissingControlPlane)?;

    let tls = ClusterTls::load(&config.cluster)?;
    let client = ClientTls {
        connector: TlsConnector::from(tls.client_config()?),
        server_name: tls.server_name()?,
    };

    let dp = &config.data_plane;
    std::fs::create_dir_all(&dp.prefix)?;
    let node_id = match &dp.node_id {
        Some(id) => id.clone(),
        None => load_or_create_node_id(&dp.prefix)?,
    };
    let hostname = dp
        .hostname
        .clone()
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "unknown".to_string());

    let codec = ConfigCodec::new(config.cluster.max_payload_bytes);
    let settings = AgentSettings {
        control_plane: control_plane.clone(),
        handshake: HandshakeRequest {
            node_id: node_id.clone(),
            hostname,
            version: Some(dp.version.clone()),
        },
        timings: config.sync.clone(),
        codec,
    };
    let agent = DataPlaneAgent::new(
        settings,
        client,
        Arc::new(MemoryConfigLoader::new()),
        Arc::new(StaticPluginInventory::new(dp.plugins.clone())),
        SnapshotCache::in_prefix(&dp.prefix, codec),
    );

    let mut tasks = Vec::new();
    if config.admin.enabled {
        let state = AdminState {
            api_key: Arc::from(config.admin.api_key.as_str()),
            role: Role::DataPlane,
            version: dp.version.clone(),
            view: RoleView::DataPlane {
                node_id: node_id.clone(),
                state: agent.subscribe_state(),
            },
        };
        tasks.push(spawn_admin(config.admin.clone(), state, &shutdown));
    }

    tracing::info!(
        node_id = %node_id,
        control_plane = %control_plane,
        prefix = ?dp.prefix,
        "Data plane starting"
    );
    agent.run(shutdown.subscribe()).await;

    join_tasks(tasks).await;
    Ok(())
}

fn spawn_admin(config: AdminConfig, state: AdminState, shutdown: &Shutdown) -> JoinHandle<()> {
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        if let Err(e) = serve_admin(&config, state, rx).await {
            tracing::error!(error = %e, "Admin API failed");
        }
    })
}

async fn join_tasks(tasks: Vec<JoinHandle<()>>) {
    let all = futures_util::future::join_all(tasks);
    if tokio::time::timeout(SHUTDOWN_GRACE, all).await.is_err() {
        tracing::warn!("Background tasks did not stop in time");
    }
}
