//! Stable node identity for data planes without a configured id.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use uuid::Uuid;

/// File name of the persisted id inside the data plane prefix.
pub const NODE_ID_FILE_NAME: &str = "node.id";

/// Return the id stored under `prefix`, generating and persisting one if needed.
///
/// A file that does not hold a valid UUID is replaced.
pub fn load_or_create_node_id(prefix: &Path) -> io::Result<String> {
    let path = prefix.join(NODE_ID_FILE_NAME);

    match fs::read_to_string(&path) {
        Ok(raw) => match Uuid::parse_str(raw.trim()) {
            Ok(id) => return Ok(id.to_string()),
            Err(e) => tracing::warn!(path = ?path, error = %e, "Ignoring invalid node id file"),
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let id = Uuid::new_v4().to_string();
    fs::create_dir_all(prefix)?;
    let mut file = tempfile::NamedTempFile::new_in(prefix)?;
    file.write_all(id.as_bytes())?;
    file.persist(&path).map_err(|e| e.error)?;

    tracing::info!(node_id = %id, path = ?path, "Generated node id");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_stable_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let first = load_or_create_node_id(dir.path()).unwrap();
        let second = load_or_create_node_id(dir.path()).unwrap();
        assert_eq!(first, second);
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn invalid_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(NODE_ID_FILE_NAME), "garbage").unwrap();
        let id = load_or_create_node_id(dir.path()).unwrap();
        assert!(Uuid::parse_str(&id).is_ok());
    }
}
