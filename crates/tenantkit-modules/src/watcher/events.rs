//! Filtering and classification of raw filesystem events.

use std::path::{Component, Path, PathBuf};

use notify::event::{CreateKind, EventKind};

/// Directories whose contents never trigger a reload.
pub const IGNORED_DIRS: [&str; 6] = ["target", "dist", "build", "node_modules", "coverage", "vendor"];

/// Kind of change a raw event reports for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

impl ChangeKind {
    /// Map a notify event kind. Reads, directory creation and backend
    /// housekeeping yield `None`.
    pub fn from_event(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Create(CreateKind::Folder) => None,
            EventKind::Create(_) => Some(ChangeKind::Created),
            EventKind::Modify(_) | EventKind::Any => Some(ChangeKind::Modified),
            EventKind::Remove(_) => Some(ChangeKind::Removed),
            EventKind::Access(_) | EventKind::Other => None,
        }
    }
}

/// Whether a path relative to the watched root should be skipped.
///
/// Dotfiles and dot-directories, build output, dependency directories and
/// test files (`*.spec.*`, `*.test.*`) are ignored.
pub fn is_ignored(relative: &Path) -> bool {
    let components: Vec<&str> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect();

    let Some((file_name, parents)) = components.split_last() else {
        return false;
    };
    if parents
        .iter()
        .any(|dir| dir.starts_with('.') || IGNORED_DIRS.contains(dir))
    {
        return true;
    }
    if file_name.starts_with('.') || IGNORED_DIRS.contains(file_name) {
        return true;
    }
    // `name.spec.ext` / `name.test.ext`; the marker is never the stem or extension.
    let parts: Vec<&str> = file_name.split('.').collect();
    parts.len() >= 3
        && parts[1..parts.len() - 1]
            .iter()
            .any(|part| *part == "spec" || *part == "test")
}

/// Where a watched module lives. Backends may report canonical paths, so
/// both spellings of the root are accepted.
#[derive(Debug, Clone)]
pub struct WatchRoot {
    root: PathBuf,
    canonical: Option<PathBuf>,
}

impl WatchRoot {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            canonical: root.canonicalize().ok(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// The event path re-rooted under the watched path, unless it lies
    /// outside the root or is ignored.
    pub fn relevant(&self, path: &Path) -> Option<PathBuf> {
        let relative = path
            .strip_prefix(&self.root)
            .ok()
            .or_else(|| {
                self.canonical
                    .as_deref()
                    .and_then(|canonical| path.strip_prefix(canonical).ok())
            })?;
        if relative.as_os_str().is_empty() || is_ignored(relative) {
            return None;
        }
        Some(self.root.join(relative))
    }
}
