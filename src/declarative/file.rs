//! Reference collaborators backed by a JSON document and process memory.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use serde_json::Value;

use crate::declarative::{
    ConfigLoader, LoadedConfig, LoaderError, PluginInventory, SnapshotSource,
};
use crate::protocol::types::sort_plugins;
use crate::protocol::{ConfigHash, ConfigSnapshot, PluginDescriptor};

fn require_object(table: &Value) -> Result<(), LoaderError> {
    if table.is_object() {
        Ok(())
    } else {
        Err(LoaderError::Invalid(
            "top level must be a JSON object".to_string(),
        ))
    }
}

/// Exports the declarative document stored at a path.
///
/// The file is re-read on every export so edits are picked up by the next
/// broadcast.
#[derive(Debug, Clone)]
pub struct FileSnapshotSource {
    path: PathBuf,
}

impl FileSnapshotSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotSource for FileSnapshotSource {
    fn export_snapshot(&self) -> Result<ConfigSnapshot, LoaderError> {
        let raw = fs::read(&self.path)?;
        let table: Value = serde_json::from_slice(&raw)?;
        require_object(&table)?;
        Ok(ConfigSnapshot::new(table))
    }
}

/// Holds the applied configuration in memory.
#[derive(Debug, Default)]
pub struct MemoryConfigLoader {
    current: ArcSwapOption<LoadedConfig>,
}

impl MemoryConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// The installed configuration, if any.
    pub fn current(&self) -> Option<Arc<LoadedConfig>> {
        self.current.load_full()
    }
}

impl ConfigLoader for MemoryConfigLoader {
    fn parse_and_load(&self, table: &Value) -> Result<LoadedConfig, LoaderError> {
        require_object(table)?;
        let loaded = LoadedConfig {
            hash: ConfigHash::of_document(table),
            entities: Arc::new(table.clone()),
        };
        self.current.store(Some(Arc::new(loaded.clone())));
        Ok(loaded)
    }

    fn current_hash(&self) -> Option<ConfigHash> {
        self.current.load().as_ref().map(|c| c.hash.clone())
    }
}

/// Plugin list fixed at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticPluginInventory {
    plugins: Vec<PluginDescriptor>,
}

impl StaticPluginInventory {
    pub fn new(mut plugins: Vec<PluginDescriptor>) -> Self {
        sort_plugins(&mut plugins);
        Self { plugins }
    }
}

impl PluginInventory for StaticPluginInventory {
    fn list_handlers(&self) -> Vec<PluginDescriptor> {
        self.plugins.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn file_source_hashes_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("declarative.json");
        fs::write(&path, r#"{"services": [{"name": "echo"}]}"#).unwrap();

        let source = FileSnapshotSource::new(&path);
        let snapshot = source.export_snapshot().unwrap();
        assert_eq!(
            snapshot.hash(),
            &ConfigHash::of_document(&json!({"services": [{"name": "echo"}]}))
        );
    }

    #[test]
    fn file_source_rejects_non_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("declarative.json");
        fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(
            FileSnapshotSource::new(&path).export_snapshot(),
            Err(LoaderError::Invalid(_))
        ));
    }

    #[test]
    fn loader_installs_all_or_nothing() {
        let loader = MemoryConfigLoader::new();
        assert!(loader.current_hash().is_none());

        let loaded = loader.parse_and_load(&json!({"routes": []})).unwrap();
        assert_eq!(loader.current_hash(), Some(loaded.hash.clone()));

        assert!(loader.parse_and_load(&json!("not a table")).is_err());
        assert_eq!(loader.current_hash(), Some(loaded.hash));
    }

    #[test]
    fn inventory_is_sorted() {
        let inventory = StaticPluginInventory::new(vec![
            PluginDescriptor::new("rate-limiting", Some("2.1.0")),
            PluginDescriptor::new("cors", None),
        ]);
        let names: Vec<_> = inventory.list_handlers().into_iter().map(|p| p.name).collect();
        assert_eq!(names, ["cors", "rate-limiting"]);
    }
}
