//! Module registry reader.
//!
//! The registry is a JSON catalog of every module a project can install and
//! where to fetch it from:
//!
//! ```json
//! {
//!   "modules": {
//!     "auth": { "version": "1.0.0", "repository": "https://git.example.com/auth.git" },
//!     "crm":  { "version": "0.3.0", "path": "../modules/crm",
//!               "dependencies": { "modules": ["auth"] } }
//!   }
//! }
//! ```
//!
//! The file is re-read on every call; nothing is cached between reads.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ModuleError, Result};
use crate::module_manifest::ModuleDependencies;

/// Registry contents keyed by module name.
pub type RegistryMap = BTreeMap<String, RegistryEntry>;

/// One module in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Module name. Filled from the map key when omitted.
    #[serde(default)]
    pub name: String,
    /// Default version fetched when none is requested.
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Git repository URL.
    #[serde(default)]
    pub repository: Option<String>,
    /// Local source tree. Relative paths are resolved against the registry file.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub dependencies: ModuleDependencies,
    /// Package-level dependencies the module adds to the host application.
    #[serde(default)]
    pub packages: BTreeMap<String, String>,
}

/// Where a module's source comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSource {
    Git { url: String },
    Local { path: PathBuf },
}

impl RegistryEntry {
    /// Resolve the source kind. Git repositories win over local paths.
    pub fn source(&self) -> Option<ModuleSource> {
        if let Some(url) = self.repository.as_deref().filter(|u| is_git_url(u)) {
            return Some(ModuleSource::Git {
                url: url.to_string(),
            });
        }
        self.path
            .as_ref()
            .map(|path| ModuleSource::Local { path: path.clone() })
    }
}

/// Whether a repository string names something `git clone` understands.
pub fn is_git_url(repository: &str) -> bool {
    const PREFIXES: [&str; 7] = [
        "git@", "git://", "git+", "ssh://", "https://", "http://", "file://",
    ];
    PREFIXES.iter().any(|p| repository.starts_with(p))
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    modules: BTreeMap<String, RegistryEntry>,
}

/// Reads the registry file backing a project.
#[derive(Debug, Clone)]
pub struct ModuleRegistry {
    path: PathBuf,
}

impl ModuleRegistry {
    pub fn new(path: PathBuf) -> Self {
        ModuleRegistry { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and validate the whole registry.
    pub fn fetch_registry(&self) -> Result<RegistryMap> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ModuleError::RegistryNotFound {
                    path: self.path.clone(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let base = self.path.parent().unwrap_or_else(|| Path::new("."));
        parse_registry(&content, base)
    }

    /// Look up a single module.
    pub fn module_info(&self, name: &str) -> Result<Option<RegistryEntry>> {
        Ok(self.fetch_registry()?.remove(name))
    }

    /// Names of all registered modules, sorted.
    pub fn list_available_modules(&self) -> Result<Vec<String>> {
        Ok(self.fetch_registry()?.into_keys().collect())
    }
}

/// Parse a registry document. `base` anchors relative local paths.
pub fn parse_registry(input: &str, base: &Path) -> Result<RegistryMap> {
    let file: RegistryFile = serde_json::from_str(input)?;
    let mut modules = RegistryMap::new();

    for (key, mut entry) in file.modules {
        if entry.name.is_empty() {
            entry.name = key.clone();
        } else if entry.name != key {
            return Err(ModuleError::InvalidRegistry {
                detail: format!("entry '{key}' declares mismatched name '{}'", entry.name),
            });
        }

        semver::Version::parse(&entry.version).map_err(|e| ModuleError::InvalidRegistry {
            detail: format!("module '{key}' has invalid version '{}': {e}", entry.version),
        })?;

        if let Some(path) = entry.path.take() {
            entry.path = Some(if path.is_relative() {
                base.join(path)
            } else {
                path
            });
        }

        modules.insert(key, entry);
    }

    Ok(modules)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "modules": {
            "auth": {
                "name": "auth",
                "version": "1.0.0",
                "description": "Authentication",
                "repository": "https://git.example.com/auth.git"
            },
            "crm": {
                "version": "0.3.0",
                "path": "modules/crm",
                "dependencies": { "system": ["database"], "modules": ["auth"] },
                "packages": { "uuid": "1" }
            }
        }
    }"#;

    #[test]
    fn parse_fills_names_and_resolves_paths() {
        let registry = parse_registry(SAMPLE, Path::new("/srv/reg")).unwrap();
        assert_eq!(registry.len(), 2);

        let crm = &registry["crm"];
        assert_eq!(crm.name, "crm");
        assert_eq!(crm.path.as_deref(), Some(Path::new("/srv/reg/modules/crm")));
        assert_eq!(crm.dependencies.modules, vec!["auth"]);
        assert_eq!(crm.packages.get("uuid").map(String::as_str), Some("1"));
    }

    #[test]
    fn source_kind_resolution() {
        let registry = parse_registry(SAMPLE, Path::new("/srv/reg")).unwrap();
        assert_eq!(
            registry["auth"].source(),
            Some(ModuleSource::Git {
                url: "https://git.example.com/auth.git".to_string()
            })
        );
        assert_eq!(
            registry["crm"].source(),
            Some(ModuleSource::Local {
                path: PathBuf::from("/srv/reg/modules/crm")
            })
        );
    }

    #[test]
    fn unsupported_source_is_none() {
        let input = r#"{ "modules": { "x": { "version": "1.0.0", "repository": "svn:foo" } } }"#;
        let registry = parse_registry(input, Path::new("/")).unwrap();
        assert!(registry["x"].source().is_none());
    }

    #[test]
    fn reject_mismatched_name() {
        let input = r#"{ "modules": { "a": { "name": "b", "version": "1.0.0" } } }"#;
        assert!(matches!(
            parse_registry(input, Path::new("/")),
            Err(ModuleError::InvalidRegistry { .. })
        ));
    }

    #[test]
    fn reject_non_semver_version() {
        let input = r#"{ "modules": { "a": { "version": "one" } } }"#;
        assert!(parse_registry(input, Path::new("/")).is_err());
    }

    #[test]
    fn missing_file_is_registry_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModuleRegistry::new(dir.path().join("registry.json"));
        assert!(matches!(
            registry.fetch_registry(),
            Err(ModuleError::RegistryNotFound { .. })
        ));
    }

    #[test]
    fn reads_fresh_on_every_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, r#"{ "modules": { "a": { "version": "1.0.0" } } }"#).unwrap();
        let registry = ModuleRegistry::new(path.clone());
        assert_eq!(registry.list_available_modules().unwrap(), vec!["a"]);

        std::fs::write(
            &path,
            r#"{ "modules": { "a": { "version": "1.0.0" }, "b": { "version": "2.0.0" } } }"#,
        )
        .unwrap();
        assert_eq!(registry.list_available_modules().unwrap(), vec!["a", "b"]);
        assert_eq!(
            registry.module_info("b").unwrap().map(|e| e.version),
            Some("2.0.0".to_string())
        );
        assert!(registry.module_info("zzz").unwrap().is_none());
    }
}
