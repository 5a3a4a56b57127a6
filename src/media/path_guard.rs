//! Gate between client supplied path strings and the filesystem.

use std::io;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
    system_dir: PathBuf,
}

impl PathGuard {
    /// `root` must exist. `system_dir_name` is the directory under the root
    /// that is never served.
    pub fn new<P: AsRef<Path>>(root: P, system_dir_name: &str) -> io::Result<Self> {
        let root = root.as_ref().canonicalize()?;
        let system_dir = root.join(system_dir_name);
        Ok(Self { root, system_dir })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn system_dir(&self) -> &Path {
        &self.system_dir
    }

    /// Resolves `requested` against the root. Returns `None` if it is empty,
    /// contains a NUL byte, escapes the root (lexically or through a
    /// symlink), points into the system directory or does not exist.
    pub fn resolve(&self, requested: &str) -> Option<PathBuf> {
        if requested.is_empty() || requested.contains('\0') {
            return None;
        }

        let lexical = normalize(&self.root.join(requested));
        if !self.is_allowed(&lexical) {
            return None;
        }

        let canonical = lexical.canonicalize().ok()?;
        if !self.is_allowed(&canonical) {
            return None;
        }
        Some(canonical)
    }

    fn is_allowed(&self, path: &Path) -> bool {
        path.starts_with(&self.root) && !path.starts_with(&self.system_dir)
    }

    /// Root-relative form of `path`, `/`-separated, as stored in the index.
    pub fn relative(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Option<_>>()?;
        if parts.is_empty() {
            return None;
        }
        Some(parts.join("/"))
    }

    /// Absolute form of an index path. No existence or containment checks.
    pub fn absolute(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }
}

/// Collapses `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
