//! TLS configuration and certificate loading.
//!
//! # Responsibilities
//! - Read PEM certificates and keys once at startup
//! - Build the control plane's rustls server config and the data plane's
//!   client config for the configured mTLS mode
//! - Load the admin API's TLS config
//!
//! # Design Decisions
//! - `ClusterTls` is built once and shared read-only by every session
//! - Shared mode pins the peer by certificate digest in both directions;
//!   pki mode leaves chain validation to WebPKI

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use thiserror::Error;

use crate::config::{ClusterConfig, MtlsMode};
use crate::security::verifier::crypto_provider;
use crate::security::{AcceptAnyClientCert, CertDigest, PinnedServerCert};

/// Failures while preparing TLS material.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {0:?}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0:?}")]
    NoPrivateKey(PathBuf),

    #[error("CA bundle required for pki mode")]
    MissingCaBundle,

    #[error("invalid server name '{0}'")]
    InvalidServerName(String),

    #[error("client verifier: {0}")]
    Verifier(String),

    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Read every certificate from a PEM file.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

/// Read the first private key from a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

/// Certificate material of this node, loaded once.
#[derive(Debug)]
pub struct ClusterTls {
    mode: MtlsMode,
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    ca_certs: Vec<CertificateDer<'static>>,
    server_name: String,
}

impl ClusterTls {
    pub fn load(cluster: &ClusterConfig) -> Result<Self, TlsError> {
        let certs = load_certs(&cluster.cert_path)?;
        let key = load_private_key(&cluster.key_path)?;
        let ca_certs = match (cluster.mtls, &cluster.ca_cert_path) {
            (MtlsMode::Pki, Some(path)) => load_certs(path)?,
            (MtlsMode::Pki, None) => return Err(TlsError::MissingCaBundle),
            (MtlsMode::Shared, _) => Vec::new(),
        };

        tracing::info!(
            mode = ?cluster.mtls,
            cert = ?cluster.cert_path,
            "Cluster certificate loaded"
        );

        Ok(Self::from_parts(
            cluster.mtls,
            certs,
            key,
            ca_certs,
            cluster.server_name.clone(),
        ))
    }

    pub fn from_parts(
        mode: MtlsMode,
        certs: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
        ca_certs: Vec<CertificateDer<'static>>,
        server_name: String,
    ) -> Self {
        Self {
            mode,
            certs,
            key,
            ca_certs,
            server_name,
        }
    }

    pub fn mode(&self) -> MtlsMode {
        self.mode
    }

    /// Digest peers must match in shared mode.
    pub fn cluster_digest(&self) -> CertDigest {
        CertDigest::of(&self.certs[0])
    }

    pub fn ca_certs(&self) -> &[CertificateDer<'static>] {
        &self.ca_certs
    }

    fn roots(&self) -> Result<RootCertStore, TlsError> {
        let mut roots = RootCertStore::empty();
        for cert in &self.ca_certs {
            roots.add(cert.clone())?;
        }
        Ok(roots)
    }

    /// Server config for the control plane listener. Client certificates are mandatory.
    pub fn server_config(&self) -> Result<Arc<ServerConfig>, TlsError> {
        let provider = crypto_provider();
        let builder = ServerConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?;
        let builder = match self.mode {
            MtlsMode::Shared => builder.with_client_cert_verifier(Arc::new(AcceptAnyClientCert::new())),
            MtlsMode::Pki => {
                let verifier =
                    WebPkiClientVerifier::builder_with_provider(Arc::new(self.roots()?), provider)
                        .build()
                        .map_err(|e| TlsError::Verifier(e.to_string()))?;
                builder.with_client_cert_verifier(verifier)
            }
        };
        let config = builder.with_single_cert(self.certs.clone(), self.key.clone_key())?;
        Ok(Arc::new(config))
    }

    /// Client config for the data plane's outbound session.
    pub fn client_config(&self) -> Result<Arc<ClientConfig>, TlsError> {
        let builder = ClientConfig::builder_with_provider(crypto_provider())
            .with_safe_default_protocol_versions()?;
        let config = match self.mode {
            MtlsMode::Shared => builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(PinnedServerCert::new(
                    self.cluster_digest(),
                )))
                .with_client_auth_cert(self.certs.clone(), self.key.clone_key())?,
            MtlsMode::Pki => builder
                .with_root_certificates(self.roots()?)
                .with_client_auth_cert(self.certs.clone(), self.key.clone_key())?,
        };
        Ok(Arc::new(config))
    }

    /// Name the data plane sends as SNI and, in pki mode, verifies.
    pub fn server_name(&self) -> Result<ServerName<'static>, TlsError> {
        ServerName::try_from(self.server_name.clone())
            .map_err(|_| TlsError::InvalidServerName(self.server_name.clone()))
    }
}

/// Load TLS configuration for the admin API from certificate and key files.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, std::io::Error> {
    if !cert_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Certificate file not found: {:?}", cert_path),
        ));
    }
    if !key_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Private key file not found: {:?}", key_path),
        ));
    }

    RustlsConfig::from_pem_file(cert_path, key_path).await
}
