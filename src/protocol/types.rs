//! Shared data model for both sides of the sync protocol.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Heartbeat payload meaning "no snapshot applied yet".
pub const EMPTY_CONFIG_HASH: &str = "00000000000000000000000000000000";

/// Length of a rendered config hash in hex characters.
pub const CONFIG_HASH_LEN: usize = 32;

/// Content hash of a configuration snapshot, rendered as 32 lowercase hex chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConfigHash(String);

impl ConfigHash {
    /// The "no snapshot" sentinel.
    pub fn empty() -> Self {
        Self(EMPTY_CONFIG_HASH.to_string())
    }

    /// Parse a hash received on the wire. Accepts exactly 32 hex characters.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.len() == CONFIG_HASH_LEN && raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(Self(raw.to_ascii_lowercase()))
        } else {
            None
        }
    }

    /// Hash a configuration document.
    ///
    /// The document is rendered as compact JSON with sorted object keys, so
    /// logically equal documents always hash the same.
    pub fn of_document(document: &Value) -> Self {
        let rendered = serde_json::to_vec(document).unwrap_or_default();
        let digest = Sha256::digest(&rendered);
        Self(hex::encode(&digest[..CONFIG_HASH_LEN / 2]))
    }

    /// Whether this is the "no snapshot" sentinel.
    pub fn is_empty(&self) -> bool {
        self.0 == EMPTY_CONFIG_HASH
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ConfigHash {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid config hash '{}'", value))
    }
}

impl From<ConfigHash> for String {
    fn from(hash: ConfigHash) -> Self {
        hash.0
    }
}

/// One consistent configuration version.
///
/// Immutable once created: a new mutation always yields a new snapshot.
/// Cloning is cheap, the document is shared.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSnapshot {
    config_table: Arc<Value>,
    hash: ConfigHash,
}

impl ConfigSnapshot {
    /// Build a snapshot from a document, computing its hash.
    pub fn new(config_table: Value) -> Self {
        let hash = ConfigHash::of_document(&config_table);
        Self {
            config_table: Arc::new(config_table),
            hash,
        }
    }

    /// Build a snapshot whose hash was computed elsewhere (e.g. received on the wire).
    pub fn with_hash(config_table: Value, hash: ConfigHash) -> Self {
        Self {
            config_table: Arc::new(config_table),
            hash,
        }
    }

    pub fn config_table(&self) -> &Value {
        &self.config_table
    }

    pub fn hash(&self) -> &ConfigHash {
        &self.hash
    }
}

/// Identity of one plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>, version: Option<&str>) -> Self {
        Self {
            name: name.into(),
            version: version.map(str::to_string),
        }
    }
}

/// Sort plugin descriptors ascending by name, as the compatibility check expects.
pub fn sort_plugins(plugins: &mut [PluginDescriptor]) {
    plugins.sort_by(|a, b| a.name.cmp(&b.name));
}

/// A connecting peer, as seen by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeIdentity {
    pub node_id: String,
    pub hostname: String,
    pub ip: String,
    pub version: Option<String>,
    pub plugins: Option<Vec<PluginDescriptor>>,
}

/// Compatibility verdict attached to a peer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Not evaluated, or the peer did not report enough to evaluate.
    #[default]
    Unknown,
    Normal,
    VersionIncompatible,
    PluginSetIncompatible,
    PluginVersionIncompatible,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Unknown => "unknown",
            SyncStatus::Normal => "normal",
            SyncStatus::VersionIncompatible => "version_incompatible",
            SyncStatus::PluginSetIncompatible => "plugin_set_incompatible",
            SyncStatus::PluginVersionIncompatible => "plugin_version_incompatible",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
