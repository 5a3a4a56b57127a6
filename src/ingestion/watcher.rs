//! Polling filesystem watcher.
//!
//! Each pass walks the managed root, compares size and modification time
//! against the previous pass and turns the differences into [`FsEvent`]s.

use super::events::FsEvent;
use super::pipeline::IngestHandle;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

/// Directory names never descended into, besides dot-directories.
const IGNORED_DIR_NAMES: &[&str] = &["node_modules"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub size: u64,
    pub modified: Option<SystemTime>,
}

pub struct PollingWatcher {
    root: PathBuf,
    system_dir: PathBuf,
    interval: Duration,
    /// `None` marks a path known from the index but not yet seen on disk.
    snapshot: HashMap<PathBuf, Option<FileStamp>>,
}

fn is_ignored(entry: &DirEntry, system_dir: &Path) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    if entry.path() == system_dir {
        return true;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || (entry.file_type().is_dir() && IGNORED_DIR_NAMES.contains(&&*name))
}

/// Walks `root` and stamps every regular file outside ignored directories.
pub fn scan_tree(root: &Path, system_dir: &Path) -> HashMap<PathBuf, FileStamp> {
    let mut files = HashMap::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_ignored(e, system_dir));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!("Skipping unreadable entry: {}", err);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        match entry.metadata() {
            Ok(metadata) => {
                files.insert(
                    entry.into_path(),
                    FileStamp {
                        size: metadata.len(),
                        modified: metadata.modified().ok(),
                    },
                );
            }
            Err(err) => debug!("Skipping {:?}: {}", entry.path(), err),
        }
    }
    files
}

impl PollingWatcher {
    pub fn new(root: PathBuf, system_dir: PathBuf, interval: Duration) -> Self {
        Self {
            root,
            system_dir,
            interval,
            snapshot: HashMap::new(),
        }
    }

    /// Registers paths the index already knows about, so the first pass
    /// reports the ones that disappeared while the node was down.
    pub fn seed_known<I: IntoIterator<Item = PathBuf>>(&mut self, paths: I) {
        for path in paths {
            self.snapshot.entry(path).or_insert(None);
        }
    }

    /// Replaces the snapshot with `current` and returns what changed.
    /// Removals come first, then additions and changes ordered by path.
    pub fn diff(&mut self, current: HashMap<PathBuf, FileStamp>) -> Vec<FsEvent> {
        let mut removed: Vec<PathBuf> = self
            .snapshot
            .keys()
            .filter(|path| !current.contains_key(*path))
            .cloned()
            .collect();
        removed.sort();

        let mut touched: Vec<FsEvent> = current
            .iter()
            .filter_map(|(path, stamp)| match self.snapshot.get(path) {
                None => Some(FsEvent::Added(path.clone())),
                Some(None) => Some(FsEvent::Changed(path.clone())),
                Some(Some(previous)) if previous != stamp => Some(FsEvent::Changed(path.clone())),
                Some(Some(_)) => None,
            })
            .collect();
        touched.sort_by(|a, b| a.path().cmp(b.path()));

        self.snapshot = current.into_iter().map(|(p, s)| (p, Some(s))).collect();

        removed
            .into_iter()
            .map(FsEvent::Removed)
            .chain(touched)
            .collect()
    }

    pub async fn poll_once(&mut self) -> io::Result<Vec<FsEvent>> {
        let root = self.root.clone();
        let system_dir = self.system_dir.clone();
        let current = tokio::task::spawn_blocking(move || scan_tree(&root, &system_dir))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(self.diff(current))
    }

    /// Polls until `shutdown` fires, feeding every event to `ingest`.
    pub async fn run(mut self, ingest: IngestHandle, shutdown: CancellationToken) {
        info!(
            "Watching {:?} every {}ms",
            self.root,
            self.interval.as_millis()
        );
        loop {
            match self.poll_once().await {
                Ok(events) => {
                    if !events.is_empty() {
                        debug!("Watcher found {} changes", events.len());
                    }
                    for event in events {
                        if ingest.submit(event).await.is_err() {
                            warn!("Ingest queue closed, stopping watcher");
                            return;
                        }
                    }
                }
                Err(err) => warn!("Watcher pass failed: {}", err),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("Watcher stopped");
    }
}
