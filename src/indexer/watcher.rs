// File watcher for incremental updates

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::indexer::{FileOutcome, Indexer};

/// Re-indexes source files as they change on disk
pub struct FileWatcher {
    indexer: Arc<Indexer>,
}

impl FileWatcher {
    pub fn new(indexer: Arc<Indexer>) -> Self {
        Self { indexer }
    }

    /// Watch until `cancel` fires
    pub async fn watch(&self, cancel: CancellationToken) -> Result<()> {
        let root = self.indexer.root().to_path_buf();
        info!("Starting file watcher for: {}", root.display());

        let (tx, mut rx) = mpsc::unbounded_channel();

        // notify calls back on its own thread; an unbounded send never blocks it
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                if tx.send(res).is_err() {
                    debug!("File watcher channel closed");
                }
            },
            Config::default(),
        )
        .context("Failed to create file watcher")?;

        // One non-recursive watch per directory keeps dot-directories and
        // dependency caches out of the event stream entirely
        for dir in self.watch_targets()? {
            watcher
                .watch(&dir, RecursiveMode::NonRecursive)
                .with_context(|| format!("Failed to watch {}", dir.display()))?;
        }

        info!("File watcher started. Monitoring for changes...");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("File watcher stopped");
                    break;
                }
                res = rx.recv() => match res {
                    Some(Ok(event)) => {
                        for dir in self.handle_event(&event) {
                            if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
                                warn!("Failed to watch new directory {}: {}", dir.display(), e);
                            }
                        }
                    }
                    Some(Err(e)) => error!("File watch error: {}", e),
                    None => break,
                },
            }
        }

        Ok(())
    }

    /// Every directory under the root that is not ignored
    pub fn watch_targets(&self) -> Result<Vec<PathBuf>> {
        let root = self.indexer.root();
        let mut dirs = Vec::new();

        let walker = WalkDir::new(root)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_type().is_dir() || !self.is_ignored_name(e.file_name()));
        for entry in walker {
            let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
            if entry.file_type().is_dir() {
                dirs.push(entry.into_path());
            }
        }

        Ok(dirs)
    }

    /// Apply one event to the store; returns newly created directories to watch
    pub fn handle_event(&self, event: &Event) -> Vec<PathBuf> {
        debug!("File event: {:?}", event);

        let mut new_dirs = Vec::new();
        match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) => {
                for path in &event.paths {
                    if self.is_ignored(path) {
                        continue;
                    }

                    if path.is_dir() {
                        if matches!(event.kind, EventKind::Create(_)) {
                            new_dirs.push(path.clone());
                        }
                    } else if path.is_file() {
                        self.reindex(path);
                    } else if self.indexer.can_index_file(path) {
                        // Renamed away
                        self.forget(path);
                    }
                }
            }
            EventKind::Remove(_) => {
                for path in &event.paths {
                    if !self.is_ignored(path) && self.indexer.can_index_file(path) {
                        self.forget(path);
                    }
                }
            }
            _ => {}
        }

        new_dirs
    }

    fn reindex(&self, path: &Path) {
        match self.indexer.index_file(path) {
            Ok(FileOutcome::Indexed(count)) => info!("Re-indexed {}: {} symbols", path.display(), count),
            Ok(FileOutcome::Unchanged) => debug!("Unchanged: {}", path.display()),
            Ok(FileOutcome::Unsupported) => {}
            Err(e) => error!("Failed to index {}: {:#}", path.display(), e),
        }
    }

    fn forget(&self, path: &Path) {
        match self.indexer.remove_file(path) {
            Ok(removed) => info!("File removed: {} ({} symbols)", path.display(), removed),
            Err(e) => error!("Failed to remove {} from index: {:#}", path.display(), e),
        }
    }

    fn is_ignored_name(&self, name: &std::ffi::OsStr) -> bool {
        name.to_str()
            .map(|n| n.starts_with('.') || self.indexer.is_excluded_dir(n))
            .unwrap_or(true)
    }

    /// True when any directory between the root and `path` is ignored
    fn is_ignored(&self, path: &Path) -> bool {
        let relative = path.strip_prefix(self.indexer.root()).unwrap_or(path);
        let mut components: Vec<_> = relative.components().collect();
        // The file name itself may start with a dot and still be indexed
        components.pop();
        components.iter().any(|c| self.is_ignored_name(c.as_os_str()))
    }
}

/// Run a watcher in the background; setup failures are logged, not fatal
pub fn spawn_watcher(indexer: Arc<Indexer>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let watcher = FileWatcher::new(indexer);
        if let Err(e) = watcher.watch(cancel).await {
            error!("File watcher failed: {:#}", e);
        }
    })
}
