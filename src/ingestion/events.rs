use std::path::{Path, PathBuf};

/// A change observed under the managed root. Paths are absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    Added(PathBuf),
    Changed(PathBuf),
    Removed(PathBuf),
}

impl FsEvent {
    pub fn path(&self) -> &Path {
        match self {
            FsEvent::Added(p) | FsEvent::Changed(p) | FsEvent::Removed(p) => p,
        }
    }
}
