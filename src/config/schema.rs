//! TOML layout of a sync node.
//!
//! Every section is optional; missing keys fall back to the protocol
//! defaults (30 s heartbeat, 45 s liveness window, 5-10 s reconnect).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::{PluginDescriptor, MAX_PAYLOAD_BYTES};

/// Root configuration for a cluster-sync node.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SyncConfig {
    /// Which side of the protocol this process runs.
    pub role: Role,

    /// Cluster transport and peer authentication.
    pub cluster: ClusterConfig,

    /// Intervals and windows of the sync protocol.
    pub sync: SyncTimings,

    /// Data plane identity and local state.
    pub data_plane: DataPlaneConfig,

    /// Control plane configuration source and inventory.
    pub control_plane: ControlPlaneConfig,

    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

/// Node role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    ControlPlane,
    DataPlane,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::ControlPlane => "control_plane",
            Role::DataPlane => "data_plane",
        }
    }
}

/// How peers authenticate each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MtlsMode {
    /// Every node holds the same certificate; peers are pinned by digest.
    #[default]
    Shared,
    /// Certificates issued by a common CA, optionally checked over OCSP.
    Pki,
}

/// OCSP enforcement level for pki mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OcspLevel {
    #[default]
    Off,
    /// Reject unless the responder confirms the certificate is good.
    On,
    /// Reject only confirmed revocations.
    Optional,
}

/// Cluster transport configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub mtls: MtlsMode,

    /// Certificate presented by this node (PEM).
    pub cert_path: PathBuf,

    /// Private key of this node (PEM).
    pub key_path: PathBuf,

    /// CA bundle used in pki mode (PEM).
    pub ca_cert_path: Option<PathBuf>,

    /// Server name the data plane expects from the control plane in pki mode.
    pub server_name: String,

    pub ocsp: OcspLevel,

    /// Control plane listen address.
    pub listen: String,

    /// Control plane address the data plane connects to (`host:port`).
    pub control_plane: Option<String>,

    /// Frame payload cap in bytes.
    pub max_payload_bytes: usize,

    /// Maximum concurrent sessions on the control plane.
    pub max_connections: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            mtls: MtlsMode::Shared,
            cert_path: PathBuf::from("cluster.crt"),
            key_path: PathBuf::from("cluster.key"),
            ca_cert_path: None,
            server_name: "cluster_sync".to_string(),
            ocsp: OcspLevel::Off,
            listen: "0.0.0.0:8005".to_string(),
            control_plane: None,
            max_payload_bytes: MAX_PAYLOAD_BYTES,
            max_connections: 10_000,
        }
    }
}

/// Protocol timings, all in seconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncTimings {
    pub heartbeat_secs: u64,
    pub recv_poll_secs: u64,
    pub liveness_secs: u64,
    pub apply_poll_secs: u64,
    pub send_poll_secs: u64,
    pub backoff_min_secs: u64,
    pub backoff_max_secs: u64,
    /// Minimum time between two broadcasts.
    pub broadcast_interval_secs: u64,
    /// Lifetime of a data plane record after its last heartbeat.
    pub data_plane_ttl_secs: u64,
    pub ocsp_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for SyncTimings {
    fn default() -> Self {
        Self {
            heartbeat_secs: 30,
            recv_poll_secs: 5,
            liveness_secs: 45,
            apply_poll_secs: 1,
            send_poll_secs: 5,
            backoff_min_secs: 5,
            backoff_max_secs: 10,
            broadcast_interval_secs: 5,
            data_plane_ttl_secs: 14 * 24 * 3600,
            ocsp_timeout_secs: 5,
            connect_timeout_secs: 5,
        }
    }
}

impl SyncTimings {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn recv_poll(&self) -> Duration {
        Duration::from_secs(self.recv_poll_secs)
    }

    pub fn liveness(&self) -> Duration {
        Duration::from_secs(self.liveness_secs)
    }

    pub fn apply_poll(&self) -> Duration {
        Duration::from_secs(self.apply_poll_secs)
    }

    pub fn send_poll(&self) -> Duration {
        Duration::from_secs(self.send_poll_secs)
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_secs(self.broadcast_interval_secs)
    }

    pub fn data_plane_ttl(&self) -> Duration {
        Duration::from_secs(self.data_plane_ttl_secs)
    }

    pub fn ocsp_timeout(&self) -> Duration {
        Duration::from_secs(self.ocsp_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Data plane identity and local state.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DataPlaneConfig {
    /// Fixed node id. Generated and persisted under `prefix` when absent.
    pub node_id: Option<String>,

    /// Reported hostname. Falls back to `$HOSTNAME`.
    pub hostname: Option<String>,

    /// Reported gateway version.
    pub version: String,

    /// Runtime directory holding the node id and the snapshot cache.
    pub prefix: PathBuf,

    /// Installed plugins reported in `basic_info`.
    pub plugins: Vec<PluginDescriptor>,
}

impl Default for DataPlaneConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            hostname: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            prefix: PathBuf::from("/var/lib/cluster-sync"),
            plugins: Vec::new(),
        }
    }
}

/// Control plane configuration source and inventory.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    /// Declarative JSON document exported to data planes.
    pub declarative_config: PathBuf,

    /// Version the control plane reports for compatibility checks.
    pub version: String,

    /// Plugins the control plane expects every data plane to carry.
    pub plugins: Vec<PluginDescriptor>,

    /// Re-export and broadcast when the declarative document changes.
    pub watch: bool,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            declarative_config: PathBuf::from("declarative.json"),
            version: env!("CARGO_PKG_VERSION").to_string(),
            plugins: Vec::new(),
            watch: true,
        }
    }
}

/// Logging and Prometheus export.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub log_level: String,

    pub metrics_enabled: bool,

    /// Where the Prometheus exporter listens.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,

    /// Bearer token expected on every admin request. Required when enabled.
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,

    /// Serve the admin API over TLS.
    pub tls: Option<TlsConfig>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            bind_address: "127.0.0.1:8081".to_string(),
            tls: None,
        }
    }
}

/// TLS configuration for the admin listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// PEM certificate chain.
    pub cert_path: String,
    /// PEM private key.
    pub key_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = SyncConfig::default();
        assert_eq!(config.role, Role::ControlPlane);
        assert_eq!(config.cluster.listen, "0.0.0.0:8005");
        assert_eq!(config.cluster.max_payload_bytes, 4 * 1024 * 1024);
        assert_eq!(config.sync.heartbeat(), Duration::from_secs(30));
        assert_eq!(config.sync.liveness(), Duration::from_secs(45));
    }

    #[test]
    fn minimal_data_plane_toml() {
        let config: SyncConfig = toml::from_str(
            r#"
            role = "data_plane"

            [cluster]
            mtls = "pki"
            ocsp = "optional"
            control_plane = "cp.internal:8005"
            ca_cert_path = "/etc/cluster/ca.crt"

            [[data_plane.plugins]]
            name = "rate-limiting"
            version = "2.1.0"
            "#,
        )
        .unwrap();

        assert_eq!(config.role, Role::DataPlane);
        assert_eq!(config.cluster.mtls, MtlsMode::Pki);
        assert_eq!(config.cluster.ocsp, OcspLevel::Optional);
        assert_eq!(config.data_plane.plugins.len(), 1);
        assert_eq!(config.sync.backoff_max_secs, 10);
    }
}
