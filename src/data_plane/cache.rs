//! Local snapshot cache for cold starts.
//!
//! Holds the exact reconfigure payload (gzip JSON) of the last snapshot that
//! was applied successfully. Writes go through a temp file in the same
//! directory and a rename, so a crash leaves either the old or the new copy.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::protocol::{CodecError, ConfigCodec, ConfigSnapshot};

/// File name of the cache inside the data plane prefix.
pub const CACHE_FILE_NAME: &str = "config.cache.json.gz";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("snapshot cache I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("snapshot cache is corrupt: {0}")]
    Corrupt(#[from] CodecError),
}

/// Persisted copy of the last applied snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotCache {
    path: PathBuf,
    codec: ConfigCodec,
}

impl SnapshotCache {
    pub fn new(path: impl Into<PathBuf>, codec: ConfigCodec) -> Self {
        Self {
            path: path.into(),
            codec,
        }
    }

    /// Cache file under a runtime prefix directory.
    pub fn in_prefix(prefix: &Path, codec: ConfigCodec) -> Self {
        Self::new(prefix.join(CACHE_FILE_NAME), codec)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cached snapshot. A missing file is not an error.
    pub fn load(&self) -> Result<Option<ConfigSnapshot>, CacheError> {
        let payload = match fs::read(&self.path) {
            Ok(payload) => payload,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let snapshot = self.codec.decode(&payload)?.into_snapshot()?;
        Ok(Some(snapshot))
    }

    /// Replace the cache with an encoded reconfigure payload, owner read/write only.
    pub fn store(&self, payload: &[u8]) -> Result<(), CacheError> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        // NamedTempFile is created with mode 0600 on unix
        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        file.write_all(payload)?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}
