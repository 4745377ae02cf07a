//! Per-module metadata (`module.json`).
//!
//! Every module carries a `module.json` at its root naming the module, its
//! version, and what it needs from the host application:
//!
//! ```json
//! {
//!   "name": "crm",
//!   "version": "1.2.0",
//!   "dependencies": { "system": ["database"], "modules": ["auth"] }
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ModuleError, Result};

/// File name of the per-module metadata document.
pub const MODULE_MANIFEST_FILE: &str = "module.json";

/// Declared requirements of a module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDependencies {
    /// System capability tags (e.g. `database`, `redis`).
    #[serde(default)]
    pub system: Vec<String>,
    /// Names of other modules that must be installed first.
    #[serde(default)]
    pub modules: Vec<String>,
}

impl ModuleDependencies {
    pub fn is_empty(&self) -> bool {
        self.system.is_empty() && self.modules.is_empty()
    }
}

/// Parsed `module.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleManifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub dependencies: ModuleDependencies,
}

impl ModuleManifest {
    /// Parse a module manifest from a JSON string.
    pub fn parse(input: &str, origin: &Path) -> Result<Self> {
        let manifest: ModuleManifest =
            serde_json::from_str(input).map_err(|e| ModuleError::InvalidManifest {
                path: origin.to_path_buf(),
                detail: e.to_string(),
            })?;

        if manifest.name.is_empty() {
            return Err(ModuleError::InvalidManifest {
                path: origin.to_path_buf(),
                detail: "name is required".to_string(),
            });
        }

        semver::Version::parse(&manifest.version).map_err(|e| ModuleError::InvalidManifest {
            path: origin.to_path_buf(),
            detail: format!("version '{}': {e}", manifest.version),
        })?;

        Ok(manifest)
    }

    /// Load `module.json` from a module directory.
    pub fn load(module_dir: &Path) -> Result<Self> {
        let path = module_dir.join(MODULE_MANIFEST_FILE);
        let content = std::fs::read_to_string(&path)?;
        Self::parse(&content, &path)
    }

    /// Load `module.json` if the module directory has one.
    pub fn load_optional(module_dir: &Path) -> Result<Option<Self>> {
        if module_dir.join(MODULE_MANIFEST_FILE).is_file() {
            Self::load(module_dir).map(Some)
        } else {
            Ok(None)
        }
    }
}
