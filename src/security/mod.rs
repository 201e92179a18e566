//! Security subsystem: peer authentication for sync sessions.
//!
//! # Data Flow
//! ```text
//! Inbound TCP connection (control plane)
//!     → TLS handshake (verifier.rs in shared mode, WebPKI in pki mode)
//!     → AuthGate::authorize(peer chain)
//!         shared: pinned.rs digest comparison
//!         pki:    ocsp.rs revocation check, per enforcement level
//!     → WebSocket upgrade, protocol frames
//! ```
//!
//! # Design Decisions
//! - Fail closed: a rejected peer is dropped before any protocol byte is read
//! - Confirmed revocation always rejects; responder trouble rejects only in
//!   strict mode, lenient mode logs and proceeds

pub mod ocsp;
pub mod pinned;
pub mod verifier;

use rustls::pki_types::CertificateDer;
use thiserror::Error;

use crate::config::OcspLevel;
use crate::observability::metrics;

pub use ocsp::{OcspClient, OcspError, RevocationStatus};
pub use pinned::CertDigest;
pub use verifier::{AcceptAnyClientCert, PinnedServerCert};

/// Reasons a peer is refused.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no client certificate presented")]
    NoCertificate,

    #[error("client certificate does not match the cluster certificate")]
    DigestMismatch,

    #[error("client certificate has been revoked")]
    Revoked,

    #[error("revocation status could not be confirmed: {0}")]
    RevocationUnconfirmed(String),
}

impl AuthError {
    /// Label for the rejection metric.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::NoCertificate => "no_certificate",
            AuthError::DigestMismatch => "digest_mismatch",
            AuthError::Revoked => "revoked",
            AuthError::RevocationUnconfirmed(_) => "revocation_unconfirmed",
        }
    }
}

/// How a peer certificate is judged.
#[derive(Debug, Clone)]
pub enum AuthMode {
    /// Shared cluster certificate: the peer must present exactly it.
    Pinned(CertDigest),
    /// CA-issued certificates (chain verified by rustls), optionally checked over OCSP.
    Pki { ocsp: OcspLevel, client: OcspClient },
}

/// Admission check run on every accepted connection before the upgrade.
#[derive(Debug, Clone)]
pub struct AuthGate {
    mode: AuthMode,
}

impl AuthGate {
    pub fn new(mode: AuthMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> &AuthMode {
        &self.mode
    }

    /// Judge the chain the peer presented during the TLS handshake.
    pub async fn authorize(&self, chain: Option<&[CertificateDer<'_>]>) -> Result<(), AuthError> {
        let result = self.check(chain).await;
        if let Err(e) = &result {
            metrics::record_auth_rejection(e.reason());
        }
        result
    }

    async fn check(&self, chain: Option<&[CertificateDer<'_>]>) -> Result<(), AuthError> {
        let chain = chain.filter(|c| !c.is_empty()).ok_or(AuthError::NoCertificate)?;

        match &self.mode {
            AuthMode::Pinned(digest) => {
                if digest.matches(&chain[0]) {
                    Ok(())
                } else {
                    Err(AuthError::DigestMismatch)
                }
            }
            AuthMode::Pki { ocsp, .. } if *ocsp == OcspLevel::Off => Ok(()),
            AuthMode::Pki { ocsp, client } => {
                let outcome = client.check(chain).await;
                revocation_decision(*ocsp, outcome)
            }
        }
    }
}

/// Map an OCSP outcome to an admission decision for the given level.
pub fn revocation_decision(
    level: OcspLevel,
    outcome: Result<RevocationStatus, OcspError>,
) -> Result<(), AuthError> {
    let problem = match outcome {
        Ok(RevocationStatus::Good) => return Ok(()),
        Ok(RevocationStatus::Revoked) => return Err(AuthError::Revoked),
        Ok(RevocationStatus::Unknown) => "responder does not know the certificate".to_string(),
        Err(e) => e.to_string(),
    };

    match level {
        OcspLevel::On => {
            tracing::warn!(reason = %problem, "Revocation check failed, rejecting peer");
            Err(AuthError::RevocationUnconfirmed(problem))
        }
        OcspLevel::Optional | OcspLevel::Off => {
            tracing::warn!(reason = %problem, "Revocation check failed, continuing");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn revoked_rejects_at_every_level() {
        for level in [OcspLevel::On, OcspLevel::Optional] {
            assert!(matches!(
                revocation_decision(level, Ok(RevocationStatus::Revoked)),
                Err(AuthError::Revoked)
            ));
        }
    }

    #[test]
    fn responder_failure_rejects_only_when_strict() {
        let failure = || Err(OcspError::NoResponderUrl);
        assert!(matches!(
            revocation_decision(OcspLevel::On, failure()),
            Err(AuthError::RevocationUnconfirmed(_))
        ));
        assert!(revocation_decision(OcspLevel::Optional, failure()).is_ok());
    }

    #[test]
    fn unknown_status_follows_level() {
        assert!(revocation_decision(OcspLevel::On, Ok(RevocationStatus::Unknown)).is_err());
        assert!(revocation_decision(OcspLevel::Optional, Ok(RevocationStatus::Unknown)).is_ok());
        assert!(revocation_decision(OcspLevel::On, Ok(RevocationStatus::Good)).is_ok());
    }

    #[tokio::test]
    async fn pinned_mode_compares_digest() {
        let cluster = CertificateDer::from(vec![0x30, 0x03, 0x02, 0x01, 0x01]);
        let other = CertificateDer::from(vec![0x30, 0x03, 0x02, 0x01, 0x02]);
        let gate = AuthGate::new(AuthMode::Pinned(CertDigest::of(&cluster)));

        assert!(gate.authorize(Some(&[cluster.clone()])).await.is_ok());
        assert!(matches!(
            gate.authorize(Some(&[other])).await,
            Err(AuthError::DigestMismatch)
        ));
        assert!(matches!(gate.authorize(None).await, Err(AuthError::NoCertificate)));
        assert!(matches!(gate.authorize(Some(&[])).await, Err(AuthError::NoCertificate)));
    }

    #[tokio::test]
    async fn pki_without_ocsp_accepts_verified_chain() {
        let gate = AuthGate::new(AuthMode::Pki {
            ocsp: OcspLevel::Off,
            client: OcspClient::new(Duration::from_secs(5), Vec::new()),
        });
        let cert = CertificateDer::from(vec![0x30, 0x00]);
        assert!(gate.authorize(Some(&[cert])).await.is_ok());
    }

    #[tokio::test]
    async fn pki_strict_rejects_unparseable_certificate() {
        let gate = AuthGate::new(AuthMode::Pki {
            ocsp: OcspLevel::On,
            client: OcspClient::new(Duration::from_secs(5), Vec::new()),
        });
        let cert = CertificateDer::from(vec![0x30, 0x00]);
        assert!(matches!(
            gate.authorize(Some(&[cert])).await,
            Err(AuthError::RevocationUnconfirmed(_))
        ));
    }
}
