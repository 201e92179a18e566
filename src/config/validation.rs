//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that the material the configured mode needs is present
//! - Validate value ranges (intervals > 0, backoff bounds ordered)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: SyncConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{MtlsMode, OcspLevel, Role, SyncConfig};

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration, collecting every problem.
pub fn validate_config(config: &SyncConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let cluster = &config.cluster;
    let sync = &config.sync;

    if cluster.cert_path.as_os_str().is_empty() {
        errors.push(ValidationError::new("cluster.cert_path", "must be set"));
    }
    if cluster.key_path.as_os_str().is_empty() {
        errors.push(ValidationError::new("cluster.key_path", "must be set"));
    }
    if cluster.mtls == MtlsMode::Pki && cluster.ca_cert_path.is_none() {
        errors.push(ValidationError::new(
            "cluster.ca_cert_path",
            "required when mtls = \"pki\"",
        ));
    }
    if cluster.mtls == MtlsMode::Shared && cluster.ocsp != OcspLevel::Off {
        errors.push(ValidationError::new(
            "cluster.ocsp",
            "revocation checks require mtls = \"pki\"",
        ));
    }
    if cluster.max_payload_bytes == 0 {
        errors.push(ValidationError::new("cluster.max_payload_bytes", "must be > 0"));
    }
    if cluster.max_connections == 0 {
        errors.push(ValidationError::new("cluster.max_connections", "must be > 0"));
    }

    match config.role {
        Role::ControlPlane => {
            if cluster.listen.parse::<SocketAddr>().is_err() {
                errors.push(ValidationError::new(
                    "cluster.listen",
                    format!("'{}' is not a socket address", cluster.listen),
                ));
            }
        }
        Role::DataPlane => match cluster.control_plane.as_deref() {
            None | Some("") => errors.push(ValidationError::new(
                "cluster.control_plane",
                "required for data planes",
            )),
            Some(addr) if !addr.contains(':') => errors.push(ValidationError::new(
                "cluster.control_plane",
                format!("'{}' must be host:port", addr),
            )),
            Some(_) => {}
        },
    }

    let intervals = [
        ("sync.heartbeat_secs", sync.heartbeat_secs),
        ("sync.recv_poll_secs", sync.recv_poll_secs),
        ("sync.liveness_secs", sync.liveness_secs),
        ("sync.apply_poll_secs", sync.apply_poll_secs),
        ("sync.send_poll_secs", sync.send_poll_secs),
        ("sync.broadcast_interval_secs", sync.broadcast_interval_secs),
        ("sync.data_plane_ttl_secs", sync.data_plane_ttl_secs),
        ("sync.ocsp_timeout_secs", sync.ocsp_timeout_secs),
        ("sync.connect_timeout_secs", sync.connect_timeout_secs),
    ];
    for (field, value) in intervals {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be > 0"));
        }
    }

    if sync.backoff_min_secs > sync.backoff_max_secs {
        errors.push(ValidationError::new(
            "sync.backoff_min_secs",
            "must not exceed sync.backoff_max_secs",
        ));
    }
    if sync.liveness_secs <= sync.recv_poll_secs {
        errors.push(ValidationError::new(
            "sync.liveness_secs",
            "must be greater than sync.recv_poll_secs",
        ));
    }

    if config.admin.enabled && config.admin.api_key.is_empty() {
        errors.push(ValidationError::new("admin.api_key", "must be set when admin is enabled"));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "is not a socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_plane() -> SyncConfig {
        let mut config = SyncConfig::default();
        config.role = Role::DataPlane;
        config.cluster.control_plane = Some("cp.internal:8005".into());
        config
    }

    #[test]
    fn defaults_are_valid_for_control_plane() {
        assert!(validate_config(&SyncConfig::default()).is_ok());
    }

    #[test]
    fn data_plane_requires_control_plane_address() {
        let mut config = data_plane();
        config.cluster.control_plane = None;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "cluster.control_plane");
    }

    #[test]
    fn collects_every_error() {
        let mut config = data_plane();
        config.cluster.mtls = MtlsMode::Shared;
        config.cluster.ocsp = OcspLevel::On;
        config.sync.backoff_min_secs = 20;
        config.sync.heartbeat_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert!(fields.contains(&"cluster.ocsp"));
        assert!(fields.contains(&"sync.backoff_min_secs"));
        assert!(fields.contains(&"sync.heartbeat_secs"));
    }

    #[test]
    fn pki_needs_ca_bundle() {
        let mut config = data_plane();
        config.cluster.mtls = MtlsMode::Pki;
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "cluster.ca_cert_path"));
    }
}
