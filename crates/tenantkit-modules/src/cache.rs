//! Local module cache.
//!
//! Fetched module trees are stored as plain directories keyed by
//! `${name}-${version}`. There is no index file: the presence of the
//! directory is the cache hit.
//!
//! Layout:
//! ```text
//! <cache_root>/
//!   auth-1.0.0/
//!     module.json
//!     src/...
//!   crm-0.3.0/
//!   crm-0.4.0.partial-<uuid>/   (fetch in progress)
//! ```

use std::path::{Path, PathBuf};

use crate::error::{ModuleError, Result};

/// Infix of staging directories that hold a fetch in progress.
pub const PARTIAL_MARKER: &str = ".partial-";

/// A module cache backed by the filesystem.
#[derive(Debug, Clone)]
pub struct ModuleCache {
    root: PathBuf,
}

/// One cached module tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Directory name, `${name}-${version}`.
    pub key: String,
    pub path: PathBuf,
}

impl ModuleCache {
    pub fn new(root: PathBuf) -> Self {
        ModuleCache { root }
    }

    /// Cache at the default location (`<config dir>/tenantkit/modules`).
    pub fn default_location() -> Option<Self> {
        dirs::config_dir().map(|dir| ModuleCache::new(dir.join("tenantkit").join("modules")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cache key for a module version.
    pub fn key(name: &str, version: &str) -> String {
        format!("{name}-{version}")
    }

    /// Directory a module version is (or would be) cached in.
    pub fn entry_dir(&self, name: &str, version: &str) -> PathBuf {
        self.root.join(Self::key(name, version))
    }

    /// Fresh staging directory for a fetch of a module version. It only
    /// becomes a cache entry once renamed to [`ModuleCache::entry_dir`].
    pub fn staging_dir(&self, name: &str, version: &str) -> PathBuf {
        self.root.join(format!(
            "{}{PARTIAL_MARKER}{}",
            Self::key(name, version),
            uuid::Uuid::new_v4().simple()
        ))
    }

    pub fn contains(&self, name: &str, version: &str) -> bool {
        self.entry_dir(name, version).is_dir()
    }

    /// Remove a cached entry by key. Returns false if nothing was cached.
    pub fn remove(&self, key: &str) -> Result<bool> {
        if key.is_empty() || key == "." || key == ".." || key.contains(['/', '\\']) {
            return Ok(false);
        }
        let dir = self.root.join(key);
        if dir.is_dir() {
            std::fs::remove_dir_all(&dir).map_err(|e| cache_error(&dir, "removing entry", e))?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// List cached entries sorted by key. Staging directories are skipped.
    pub fn list_entries(&self) -> Result<Vec<CacheEntry>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&self.root)
            .map_err(|e| cache_error(&self.root, "listing entries", e))?
        {
            let entry = entry.map_err(|e| cache_error(&self.root, "reading entry", e))?;
            let path = entry.path();
            if path.is_dir() {
                if let Some(key) = entry
                    .file_name()
                    .to_str()
                    .filter(|key| !key.contains(PARTIAL_MARKER))
                {
                    entries.push(CacheEntry {
                        key: key.to_string(),
                        path,
                    });
                }
            }
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    /// Remove every cached entry. Returns the number removed.
    pub fn clear(&self) -> Result<usize> {
        let entries = self.list_entries()?;
        for entry in &entries {
            self.remove(&entry.key)?;
        }
        Ok(entries.len())
    }
}

fn cache_error(path: &Path, action: &str, e: std::io::Error) -> ModuleError {
    ModuleError::Io(std::io::Error::new(
        e.kind(),
        format!("{action} in cache {}: {e}", path.display()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_dir_uses_name_version_key() {
        let cache = ModuleCache::new(PathBuf::from("/cache"));
        assert_eq!(
            cache.entry_dir("auth", "1.0.0"),
            PathBuf::from("/cache/auth-1.0.0")
        );
    }

    #[test]
    fn presence_of_directory_is_a_hit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ModuleCache::new(dir.path().to_path_buf());
        assert!(!cache.contains("auth", "1.0.0"));

        std::fs::create_dir_all(cache.entry_dir("auth", "1.0.0")).unwrap();
        assert!(cache.contains("auth", "1.0.0"));
    }

    #[test]
    fn list_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ModuleCache::new(dir.path().to_path_buf());
        std::fs::create_dir_all(cache.entry_dir("crm", "0.3.0")).unwrap();
        std::fs::create_dir_all(cache.entry_dir("auth", "1.0.0")).unwrap();
        std::fs::write(dir.path().join("stray.txt"), b"x").unwrap();

        let keys: Vec<_> = cache
            .list_entries()
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(keys, vec!["auth-1.0.0", "crm-0.3.0"]);

        assert!(cache.remove("auth-1.0.0").unwrap());
        assert!(!cache.remove("auth-1.0.0").unwrap());
        assert_eq!(cache.clear().unwrap(), 1);
        assert!(cache.list_entries().unwrap().is_empty());
    }

    #[test]
    fn staging_dirs_are_not_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ModuleCache::new(dir.path().to_path_buf());
        let staging = cache.staging_dir("auth", "1.0.0");
        assert_ne!(staging, cache.staging_dir("auth", "1.0.0"));
        std::fs::create_dir_all(&staging).unwrap();

        assert!(!cache.contains("auth", "1.0.0"));
        assert!(cache.list_entries().unwrap().is_empty());
    }

    #[test]
    fn missing_root_lists_nothing() {
        let cache = ModuleCache::new(PathBuf::from("/definitely/not/here"));
        assert!(cache.list_entries().unwrap().is_empty());
    }
}
