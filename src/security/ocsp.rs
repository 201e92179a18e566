//! OCSP revocation checking for data plane client certificates.
//!
//! # Responsibilities
//! - Resolve the responder URL from the leaf's Authority Information Access extension
//! - Build a DER OCSP request (SHA-1 CertID) for the leaf certificate
//! - POST it to the responder with a deadline
//! - Read the leaf's revocation status out of the basic OCSP response
//!
//! # Design Decisions
//! - The issuer is taken from the presented chain, falling back to the
//!   configured CA bundle when the peer only sends its leaf
//! - Responder failures are returned as errors; the enforcement level decides
//!   what they mean (see `security::AuthGate`)
//! - DER encoding and decoding go through `asn1-rs`, as re-exported by
//!   `x509-parser`

use std::borrow::Cow;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use rustls::pki_types::CertificateDer;
use sha1::{Digest, Sha1};
use thiserror::Error;
use x509_parser::certificate::X509Certificate;
use x509_parser::der_parser::asn1_rs::{
    Any, Class, FromDer, Integer, Null, OctetString, Oid, Sequence, SerializeError, Tag, ToDer,
};
use x509_parser::extensions::{GeneralName, ParsedExtension};

/// id-ad-ocsp access method.
const OID_ACCESS_OCSP: &str = "1.3.6.1.5.5.7.48.1";

/// id-pkix-ocsp-basic response type.
const OID_OCSP_BASIC: &str = "1.3.6.1.5.5.7.48.1.1";

/// Encoded body of the SHA-1 OID (1.3.14.3.2.26).
const OID_SHA1: &[u8] = &[0x2b, 0x0e, 0x03, 0x02, 0x1a];

/// Revocation status reported by the responder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationStatus {
    Good,
    Revoked,
    /// The responder does not know the certificate.
    Unknown,
}

/// Failures that leave the revocation status undetermined.
#[derive(Debug, Error)]
pub enum OcspError {
    #[error("no client certificate presented")]
    NoCertificate,

    #[error("certificate could not be parsed: {0}")]
    Certificate(String),

    #[error("certificate has no OCSP responder URL")]
    NoResponderUrl,

    #[error("issuer certificate not found in chain or CA bundle")]
    MissingIssuer,

    #[error("unable to encode OCSP request: {0}")]
    Encode(#[from] SerializeError),

    #[error("OCSP responder unreachable: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OCSP responder returned HTTP {0}")]
    HttpStatus(u16),

    #[error("OCSP responder answered with status {0}")]
    ResponderStatus(u32),

    #[error("malformed OCSP response: {0}")]
    Malformed(String),

    #[error("unsupported OCSP response type {0}")]
    UnsupportedResponseType(String),

    #[error("OCSP response does not cover the presented certificate")]
    NoMatchingResponse,
}

fn parse(der: &[u8]) -> Result<X509Certificate<'_>, OcspError> {
    x509_parser::parse_x509_certificate(der)
        .map(|(_, cert)| cert)
        .map_err(|e| OcspError::Certificate(e.to_string()))
}

fn malformed(e: impl std::fmt::Display) -> OcspError {
    OcspError::Malformed(e.to_string())
}

/// Find the OCSP responder URL in a certificate's AIA extension.
pub fn responder_url(cert: &X509Certificate<'_>) -> Option<String> {
    cert.extensions().iter().find_map(|ext| match ext.parsed_extension() {
        ParsedExtension::AuthorityInfoAccess(aia) => aia.accessdescs.iter().find_map(|desc| {
            match (&desc.access_location, desc.access_method.to_id_string()) {
                (GeneralName::URI(uri), method) if method == OID_ACCESS_OCSP => {
                    Some((*uri).to_string())
                }
                _ => None,
            }
        }),
        _ => None,
    })
}

fn sequence(elements: &[Vec<u8>]) -> Result<Vec<u8>, SerializeError> {
    Sequence::new(Cow::Owned(elements.concat())).to_der_vec()
}

/// Build a DER-encoded OCSPRequest for `leaf`, issued by `issuer`.
pub fn build_request(
    leaf: &X509Certificate<'_>,
    issuer: &X509Certificate<'_>,
) -> Result<Vec<u8>, OcspError> {
    let name_hash = Sha1::digest(leaf.issuer().as_raw());
    let key_hash = Sha1::digest(issuer.public_key().subject_public_key.data.as_ref());

    let algorithm = sequence(&[
        Oid::new(Cow::Borrowed(OID_SHA1)).to_der_vec()?,
        Null::new().to_der_vec()?,
    ])?;
    let cert_id = sequence(&[
        algorithm,
        OctetString::new(name_hash.as_slice()).to_der_vec()?,
        OctetString::new(key_hash.as_slice()).to_der_vec()?,
        Integer::new(leaf.raw_serial()).to_der_vec()?,
    ])?;
    let request = sequence(&[cert_id])?;
    let request_list = sequence(&[request])?;
    let tbs_request = sequence(&[request_list])?;
    Ok(sequence(&[tbs_request])?)
}

/// Walks the elements inside one constructed DER value.
struct Elements<'a> {
    rest: &'a [u8],
}

impl<'a> Elements<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { rest: input }
    }

    fn is_empty(&self) -> bool {
        self.rest.is_empty()
    }

    fn next(&mut self) -> Result<Any<'a>, OcspError> {
        let (rest, element) = Any::from_der(self.rest).map_err(malformed)?;
        self.rest = rest;
        Ok(element)
    }

    fn tagged(&mut self, class: Class, tag: Tag) -> Result<Any<'a>, OcspError> {
        let element = self.next()?;
        if element.class() != class || element.tag() != tag {
            return Err(OcspError::Malformed(format!(
                "expected {class:?} {tag}, found {:?} {}",
                element.class(),
                element.tag()
            )));
        }
        Ok(element)
    }

    fn universal(&mut self, tag: Tag) -> Result<Any<'a>, OcspError> {
        self.tagged(Class::Universal, tag)
    }

    /// Skip ahead to the next universal element with `tag`.
    fn find(&mut self, tag: Tag) -> Result<Any<'a>, OcspError> {
        loop {
            let element = self.next()?;
            if element.class() == Class::Universal && element.tag() == tag {
                return Ok(element);
            }
        }
    }
}

/// Extract the status of the certificate with `serial` from a DER OCSPResponse.
pub fn parse_response(response: &[u8], serial: &[u8]) -> Result<RevocationStatus, OcspError> {
    let root = Elements::new(response).universal(Tag::Sequence)?;
    let mut fields = Elements::new(root.data);

    let status = fields.universal(Tag::Enumerated)?.as_enumerated().map_err(malformed)?;
    if status.0 != 0 {
        return Err(OcspError::ResponderStatus(status.0));
    }

    let response_bytes = fields.tagged(Class::ContextSpecific, Tag(0))?;
    let response_bytes = Elements::new(response_bytes.data).universal(Tag::Sequence)?;
    let mut response_bytes = Elements::new(response_bytes.data);
    let response_type = response_bytes
        .universal(Tag::Oid)?
        .as_oid()
        .map_err(malformed)?
        .to_id_string();
    if response_type != OID_OCSP_BASIC {
        return Err(OcspError::UnsupportedResponseType(response_type));
    }
    let basic = response_bytes.universal(Tag::OctetString)?;

    let basic = Elements::new(basic.data).universal(Tag::Sequence)?;
    let tbs_response_data = Elements::new(basic.data).universal(Tag::Sequence)?;
    // version, responderID and producedAt precede the responses list
    let responses = Elements::new(tbs_response_data.data).find(Tag::Sequence)?;

    let mut responses = Elements::new(responses.data);
    while !responses.is_empty() {
        let single = responses.universal(Tag::Sequence)?;
        let mut single = Elements::new(single.data);
        let cert_id = single.universal(Tag::Sequence)?;
        let response_serial = Elements::new(cert_id.data).find(Tag::Integer)?;
        if response_serial.data != serial {
            continue;
        }

        let cert_status = single.next()?;
        return Ok(match (cert_status.class(), cert_status.tag()) {
            (Class::ContextSpecific, Tag(0)) => RevocationStatus::Good,
            (Class::ContextSpecific, Tag(1)) => RevocationStatus::Revoked,
            _ => RevocationStatus::Unknown,
        });
    }

    Err(OcspError::NoMatchingResponse)
}

/// HTTP client for OCSP responders.
#[derive(Debug, Clone)]
pub struct OcspClient {
    http: reqwest::Client,
    timeout: Duration,
    ca_bundle: Vec<CertificateDer<'static>>,
}

impl OcspClient {
    pub fn new(timeout: Duration, ca_bundle: Vec<CertificateDer<'static>>) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout,
            ca_bundle,
        }
    }

    /// Ask the leaf's responder whether the presented chain's leaf is revoked.
    pub async fn check(&self, chain: &[CertificateDer<'_>]) -> Result<RevocationStatus, OcspError> {
        let leaf_der = chain.first().ok_or(OcspError::NoCertificate)?;
        let leaf = parse(leaf_der)?;
        let url = responder_url(&leaf).ok_or(OcspError::NoResponderUrl)?;

        let issuer_der = self.find_issuer(&leaf, &chain[1..])?;
        let issuer = parse(issuer_der)?;
        let request = build_request(&leaf, &issuer)?;

        tracing::debug!(responder = %url, "Sending OCSP request");
        let response = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/ocsp-request")
            .timeout(self.timeout)
            .body(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(OcspError::HttpStatus(response.status().as_u16()));
        }
        let body = response.bytes().await?;
        parse_response(&body, leaf.raw_serial())
    }

    fn find_issuer<'a>(
        &'a self,
        leaf: &X509Certificate<'_>,
        intermediates: &'a [CertificateDer<'_>],
    ) -> Result<&'a [u8], OcspError> {
        let wanted = leaf.issuer().as_raw();
        intermediates
            .iter()
            .map(|c| c.as_ref())
            .chain(self.ca_bundle.iter().map(|c| c.as_ref()))
            .find(|der| matches!(parse(der), Ok(cert) if cert.subject().as_raw() == wanted))
            .ok_or(OcspError::MissingIssuer)
    }
}
