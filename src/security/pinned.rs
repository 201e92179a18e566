//! Pinned certificate digest.
//!
//! In shared mode every node holds the same cluster certificate. A peer is
//! accepted only if the certificate it presents hashes to the same SHA-256
//! digest as the configured one.

use std::fmt;

use rustls::pki_types::CertificateDer;
use sha2::{Digest, Sha256};

/// SHA-256 digest of a DER certificate.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CertDigest([u8; 32]);

impl CertDigest {
    pub fn of(cert: &CertificateDer<'_>) -> Self {
        Self(Sha256::digest(cert.as_ref()).into())
    }

    /// Compare against a presented certificate.
    pub fn matches(&self, cert: &CertificateDer<'_>) -> bool {
        *self == Self::of(cert)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for CertDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CertDigest({})", hex::encode(self.0))
    }
}

impl fmt::Display for CertDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable_and_distinguishes_certs() {
        let a = CertificateDer::from(vec![1u8, 2, 3]);
        let b = CertificateDer::from(vec![1u8, 2, 4]);
        let digest = CertDigest::of(&a);
        assert!(digest.matches(&a));
        assert!(!digest.matches(&b));
        assert_eq!(digest.to_string().len(), 64);
    }
}
