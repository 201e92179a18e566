//! Declarative config file watcher.
//!
//! Publishes an entity mutation on the change feed whenever the declarative
//! document on disk is modified, so the broadcaster re-exports it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::control_plane::events::{ChangeFeed, MutationOp};

/// A watcher that monitors the declarative document for changes.
pub struct DeclarativeWatcher {
    path: PathBuf,
    feed: ChangeFeed,
}

impl DeclarativeWatcher {
    pub fn new(path: &Path, feed: ChangeFeed) -> Self {
        Self {
            path: path.to_path_buf(),
            feed,
        }
    }

    /// Start watching the file. The returned handle must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let feed = self.feed.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let operation = if event.kind.is_create() {
                        MutationOp::Create
                    } else if event.kind.is_modify() {
                        MutationOp::Update
                    } else if event.kind.is_remove() {
                        MutationOp::Delete
                    } else {
                        return;
                    };
                    tracing::info!(?operation, "Declarative config change detected");
                    feed.mutated("declarative_config", operation);
                }
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Declarative config watcher started");
        Ok(watcher)
    }
}
