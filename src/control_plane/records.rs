//! Data plane records: what the control plane last heard from each node.
//!
//! Upserted on every heartbeat and kept for a TTL after the last one, so
//! operators can see recently disconnected nodes as well as live ones.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::protocol::{ConfigHash, SyncStatus};

/// One data plane as last seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataPlaneRecord {
    pub id: String,
    pub hostname: String,
    pub ip: String,
    pub version: Option<String>,
    pub config_hash: ConfigHash,
    pub sync_status: SyncStatus,
    /// Unix seconds of the last heartbeat.
    pub last_seen: u64,
    pub ttl_secs: u64,
}

#[derive(Debug)]
struct Entry {
    record: DataPlaneRecord,
    expires_at: Instant,
}

/// In-memory record store with per-record expiry.
#[derive(Debug, Clone)]
pub struct DataPlaneStore {
    records: Arc<DashMap<String, Entry>>,
    ttl: Duration,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl DataPlaneStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Insert or refresh a record, stamping last-seen and TTL.
    pub fn upsert(
        &self,
        id: &str,
        hostname: &str,
        ip: &str,
        version: Option<&str>,
        config_hash: ConfigHash,
        sync_status: SyncStatus,
    ) {
        let record = DataPlaneRecord {
            id: id.to_string(),
            hostname: hostname.to_string(),
            ip: ip.to_string(),
            version: version.map(str::to_string),
            config_hash,
            sync_status,
            last_seen: unix_now(),
            ttl_secs: self.ttl.as_secs(),
        };
        self.records.insert(
            record.id.clone(),
            Entry {
                record,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn get(&self, id: &str) -> Option<DataPlaneRecord> {
        self.records
            .get(id)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.record.clone())
    }

    /// Unexpired records, most recently seen first.
    pub fn list(&self) -> Vec<DataPlaneRecord> {
        let now = Instant::now();
        let mut records: Vec<_> = self
            .records
            .iter()
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.record.clone())
            .collect();
        records.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then_with(|| a.id.cmp(&b.id)));
        records
    }

    /// Drop expired records. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.records.len();
        self.records.retain(|_, entry| entry.expires_at > now);
        before - self.records.len()
    }

    /// Purge periodically until shutdown.
    pub async fn run_purge(&self, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let purged = self.purge_expired();
                    if purged > 0 {
                        tracing::debug!(purged, "Purged expired data plane records");
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    }
}
