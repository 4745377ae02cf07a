//! Project manifest (`tenantkit.json`) recording installed modules.
//!
//! The manifest is read whole, mutated in memory and written back whole.
//! Writes go through a temp file in the same directory followed by a rename,
//! so a concurrent reader never observes a partial document.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ModuleError, Result};
use crate::module_manifest::ModuleDependencies;

/// File name of the project manifest at the project root.
pub const PROJECT_MANIFEST_FILE: &str = "tenantkit.json";

/// A module installed into the project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledModuleRecord {
    pub name: String,
    pub version: String,
    pub install_path: PathBuf,
    #[serde(default)]
    pub dependencies: ModuleDependencies,
}

/// Database initialization flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseState {
    pub initialized: bool,
    #[serde(default)]
    pub initialized_at: Option<DateTime<Utc>>,
}

/// The project manifest document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectManifest {
    /// Installed module names, in install order.
    #[serde(default)]
    pub modules: Vec<String>,
    /// Full records keyed by module name.
    #[serde(default)]
    pub installed: BTreeMap<String, InstalledModuleRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseState>,
}

impl ProjectManifest {
    /// Search upward from `start_dir` for a directory containing `tenantkit.json`.
    pub fn find_root(start_dir: &Path) -> Option<PathBuf> {
        let mut dir = start_dir.to_path_buf();
        loop {
            if dir.join(PROJECT_MANIFEST_FILE).is_file() {
                return Some(dir);
            }
            if !dir.pop() {
                return None;
            }
        }
    }

    /// Load the manifest from a project root.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let path = project_dir.join(PROJECT_MANIFEST_FILE);
        let content = std::fs::read_to_string(&path)?;
        serde_json::from_str(&content).map_err(|e| ModuleError::InvalidManifest {
            path,
            detail: e.to_string(),
        })
    }

    /// Load the manifest, or start an empty one if the project has none yet.
    pub fn load_or_default(project_dir: &Path) -> Result<Self> {
        if project_dir.join(PROJECT_MANIFEST_FILE).is_file() {
            Self::load(project_dir)
        } else {
            Ok(Self::default())
        }
    }

    /// Atomically replace the manifest at the project root.
    pub fn save(&self, project_dir: &Path) -> Result<()> {
        let target = project_dir.join(PROJECT_MANIFEST_FILE);
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');

        let mut tmp = tempfile::NamedTempFile::new_in(project_dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target).map_err(|e| ModuleError::Io(e.error))?;
        Ok(())
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.modules.iter().any(|m| m == name)
    }

    pub fn record(&self, name: &str) -> Option<&InstalledModuleRecord> {
        self.installed.get(name)
    }

    /// Names of installed modules.
    pub fn installed_names(&self) -> impl Iterator<Item = &str> {
        self.modules.iter().map(String::as_str)
    }

    /// Record an installed module, replacing any earlier record of it.
    pub fn add(&mut self, record: InstalledModuleRecord) {
        if !self.is_installed(&record.name) {
            self.modules.push(record.name.clone());
        }
        self.installed.insert(record.name.clone(), record);
    }

    /// Drop a module's record. Returns the removed record if it had one.
    pub fn remove(&mut self, name: &str) -> Option<InstalledModuleRecord> {
        self.modules.retain(|m| m != name);
        self.installed.remove(name)
    }

    pub fn database_initialized(&self) -> bool {
        self.database.as_ref().is_some_and(|db| db.initialized)
    }

    pub fn mark_database_initialized(&mut self, at: DateTime<Utc>) {
        self.database = Some(DatabaseState {
            initialized: true,
            initialized_at: Some(at),
        });
    }
}
