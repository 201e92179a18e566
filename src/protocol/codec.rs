//! Wire codec for protocol messages.
//!
//! Every binary frame carries one gzip-compressed JSON document tagged by
//! `type`. The same encoding is used for the data plane's local snapshot cache.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::protocol::types::{ConfigHash, ConfigSnapshot, PluginDescriptor};

/// Frame payload cap shared by both sides.
pub const MAX_PAYLOAD_BYTES: usize = 4 * 1024 * 1024;

/// Inflated documents may be at most this many times larger than the frame cap.
const MAX_INFLATION_RATIO: usize = 16;

/// Errors produced while encoding or decoding payloads.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("compression failed: {0}")]
    Compress(std::io::Error),

    #[error("decompression failed: {0}")]
    Decompress(std::io::Error),

    #[error("payload exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("malformed document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected message: expected {expected}")]
    UnexpectedMessage { expected: &'static str },
}

/// Structured protocol messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// Data plane → control plane, first frame of a session.
    BasicInfo { plugins: Vec<PluginDescriptor> },

    /// Control plane → data plane, full configuration snapshot.
    Reconfigure {
        config_table: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        config_hash: Option<ConfigHash>,
    },

    /// Any message type this build does not know about.
    #[serde(other)]
    Unknown,
}

impl WireMessage {
    /// Turn a reconfigure message into a snapshot, hashing it when the sender did not.
    pub fn into_snapshot(self) -> Result<ConfigSnapshot, CodecError> {
        match self {
            WireMessage::Reconfigure {
                config_table,
                config_hash: Some(hash),
            } => Ok(ConfigSnapshot::with_hash(config_table, hash)),
            WireMessage::Reconfigure {
                config_table,
                config_hash: None,
            } => Ok(ConfigSnapshot::new(config_table)),
            _ => Err(CodecError::UnexpectedMessage {
                expected: "reconfigure",
            }),
        }
    }
}

/// Encoder/decoder with a configurable frame cap.
#[derive(Debug, Clone, Copy)]
pub struct ConfigCodec {
    max_payload: usize,
}

impl Default for ConfigCodec {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD_BYTES)
    }
}

impl ConfigCodec {
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Encode the data plane's handshake message.
    pub fn encode_basic_info(&self, plugins: &[PluginDescriptor]) -> Result<Vec<u8>, CodecError> {
        self.encode(&WireMessage::BasicInfo {
            plugins: plugins.to_vec(),
        })
    }

    /// Encode a snapshot push.
    pub fn encode_reconfigure(&self, snapshot: &ConfigSnapshot) -> Result<Vec<u8>, CodecError> {
        #[derive(Serialize)]
        struct Reconfigure<'a> {
            #[serde(rename = "type")]
            kind: &'static str,
            config_table: &'a Value,
            config_hash: &'a ConfigHash,
        }

        self.compress(&serde_json::to_vec(&Reconfigure {
            kind: "reconfigure",
            config_table: snapshot.config_table(),
            config_hash: snapshot.hash(),
        })?)
    }

    pub fn encode(&self, message: &WireMessage) -> Result<Vec<u8>, CodecError> {
        self.compress(&serde_json::to_vec(message)?)
    }

    pub fn decode(&self, payload: &[u8]) -> Result<WireMessage, CodecError> {
        if payload.len() > self.max_payload {
            return Err(CodecError::TooLarge {
                limit: self.max_payload,
            });
        }
        let document = self.decompress(payload)?;
        Ok(serde_json::from_slice(&document)?)
    }

    fn compress(&self, document: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(document).map_err(CodecError::Compress)?;
        let compressed = encoder.finish().map_err(CodecError::Compress)?;
        if compressed.len() > self.max_payload {
            return Err(CodecError::TooLarge {
                limit: self.max_payload,
            });
        }
        Ok(compressed)
    }

    fn decompress(&self, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
        let limit = self.max_payload.saturating_mul(MAX_INFLATION_RATIO);
        let mut document = Vec::new();
        GzDecoder::new(payload)
            .take(limit as u64 + 1)
            .read_to_end(&mut document)
            .map_err(CodecError::Decompress)?;
        if document.len() > limit {
            return Err(CodecError::TooLarge { limit });
        }
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_snapshot() -> ConfigSnapshot {
        ConfigSnapshot::new(json!({
            "_format_version": "3.0",
            "services": [{"name": "billing", "url": "http://billing:8080"}],
            "routes": [{"name": "billing-route", "paths": ["/billing"]}],
        }))
    }

    #[test]
    fn reconfigure_round_trip_preserves_snapshot() {
        let codec = ConfigCodec::default();
        let snapshot = sample_snapshot();
        let payload = codec.encode_reconfigure(&snapshot).unwrap();
        let decoded = codec.decode(&payload).unwrap().into_snapshot().unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn basic_info_is_tagged() {
        let codec = ConfigCodec::default();
        let plugins = vec![PluginDescriptor::new("acl", Some("2.8.0"))];
        let payload = codec.encode_basic_info(&plugins).unwrap();
        assert_eq!(
            codec.decode(&payload).unwrap(),
            WireMessage::BasicInfo { plugins }
        );
    }

    #[test]
    fn reconfigure_without_hash_is_hashed_locally() {
        let codec = ConfigCodec::default();
        let table = json!({"services": []});
        let payload = codec
            .encode(&WireMessage::Reconfigure {
                config_table: table.clone(),
                config_hash: None,
            })
            .unwrap();
        let snapshot = codec.decode(&payload).unwrap().into_snapshot().unwrap();
        assert_eq!(snapshot.hash(), &ConfigHash::of_document(&table));
    }

    #[test]
    fn unknown_type_decodes_as_unknown() {
        let codec = ConfigCodec::default();
        let payload = codec.compress(br#"{"type":"future_thing","x":1}"#).unwrap();
        assert_eq!(codec.decode(&payload).unwrap(), WireMessage::Unknown);
    }

    #[test]
    fn garbage_is_a_codec_error() {
        let codec = ConfigCodec::default();
        assert!(matches!(
            codec.decode(b"definitely not gzip"),
            Err(CodecError::Decompress(_))
        ));

        let not_json = codec.compress(b"{{{{").unwrap();
        assert!(matches!(codec.decode(&not_json), Err(CodecError::Json(_))));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let codec = ConfigCodec::new(16);
        assert!(matches!(
            codec.decode(&[0u8; 17]),
            Err(CodecError::TooLarge { limit: 16 })
        ));
    }

    #[test]
    fn inflation_is_bounded() {
        let big = ConfigCodec::default();
        let document = vec![b' '; 4096];
        let payload = big.compress(&document).unwrap();

        let small = ConfigCodec::new(128);
        assert!(payload.len() <= 128);
        assert!(matches!(
            small.decode(&payload),
            Err(CodecError::TooLarge { limit: 2048 })
        ));
    }
}
