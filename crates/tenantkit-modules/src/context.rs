//! Explicitly constructed module context.
//!
//! A [`ModuleContext`] bundles everything one CLI invocation needs to work
//! on a project: configuration, registry reader, fetcher, loader and
//! watcher. Nothing in the subsystem is global; callers build a context and
//! pass it around.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ToolConfig;
use crate::dependency::{DependencyChecker, DependencyReport, TransitiveDependencies};
use crate::error::{ModuleError, Result};
use crate::fetch::{copy_tree, GitTransport, ModuleFetcher, Transport};
use crate::loader::{DylibActivator, ModuleActivator, ModuleHandle, ModuleLoader};
use crate::module_manifest::ModuleManifest;
use crate::project_manifest::{InstalledModuleRecord, ProjectManifest};
use crate::registry::{ModuleRegistry, RegistryMap};
use crate::watcher::{CacheInvalidator, HotReloadWatcher};

/// Directory, relative to the project root, that installed modules live in.
pub const MODULES_DIR: &str = "src/modules";

/// A registry module annotated with its install status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleListing {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub installed: bool,
}

pub struct ModuleContext {
    project_root: PathBuf,
    config: ToolConfig,
    registry: ModuleRegistry,
    fetcher: ModuleFetcher,
    loader: Arc<Mutex<ModuleLoader>>,
    watcher: HotReloadWatcher,
}

impl ModuleContext {
    /// Context for `project_root` using `tenantkit.toml`, environment
    /// overrides, git transport and native module loading.
    pub fn open(project_root: &Path) -> Result<Self> {
        let config = ToolConfig::discover(project_root)?;
        let activator = DylibActivator::in_temp_dir().with_compile_timeout(config.compile_timeout());
        Self::new(project_root, config, Arc::new(GitTransport), Box::new(activator))
    }

    pub fn new(
        project_root: &Path,
        config: ToolConfig,
        transport: Arc<dyn Transport>,
        activator: Box<dyn ModuleActivator>,
    ) -> Result<Self> {
        let registry = ModuleRegistry::new(config.registry_path(project_root));
        let fetcher = ModuleFetcher::new(config.module_cache()?, transport, config.fetch_timeout());
        let loader = Arc::new(Mutex::new(ModuleLoader::new(activator)));
        let invalidator: Arc<dyn CacheInvalidator> = loader.clone();
        let watcher = HotReloadWatcher::new(config.watch_options()).with_invalidator(invalidator);

        debug!(
            root = %project_root.display(),
            registry = %registry.path().display(),
            cache = %fetcher.cache().root().display(),
            "module context ready"
        );

        Ok(Self {
            project_root: project_root.to_path_buf(),
            config,
            registry,
            fetcher,
            loader,
            watcher,
        })
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn fetcher(&self) -> &ModuleFetcher {
        &self.fetcher
    }

    pub fn loader(&self) -> Arc<Mutex<ModuleLoader>> {
        Arc::clone(&self.loader)
    }

    pub fn watcher(&self) -> &HotReloadWatcher {
        &self.watcher
    }

    pub fn watcher_mut(&mut self) -> &mut HotReloadWatcher {
        &mut self.watcher
    }

    pub fn manifest(&self) -> Result<ProjectManifest> {
        ProjectManifest::load_or_default(&self.project_root)
    }

    /// Where module `name` is (or would be) installed.
    pub fn install_dir(&self, name: &str) -> PathBuf {
        self.project_root.join(MODULES_DIR).join(name)
    }

    /// Absolute install path of a recorded module.
    pub fn resolve_install_path(&self, record: &InstalledModuleRecord) -> PathBuf {
        if record.install_path.is_absolute() {
            record.install_path.clone()
        } else {
            self.project_root.join(&record.install_path)
        }
    }

    pub fn check_dependencies(&self, name: &str) -> Result<DependencyReport> {
        let registry = self.registry.fetch_registry()?;
        let manifest = self.manifest()?;
        Ok(DependencyChecker::new(&registry, manifest.installed_names()).check(name))
    }

    pub fn all_dependencies(&self, name: &str) -> Result<TransitiveDependencies> {
        let registry = self.registry.fetch_registry()?;
        let manifest = self.manifest()?;
        DependencyChecker::new(&registry, manifest.installed_names()).all_dependencies(name)
    }

    /// Fetch a registry module into the cache without installing it.
    pub async fn fetch_module(&self, name: &str, version: Option<&str>) -> Result<PathBuf> {
        let entry = self
            .registry
            .module_info(name)?
            .ok_or_else(|| ModuleError::ModuleNotFound {
                name: name.to_string(),
            })?;
        self.fetcher.fetch_module(&entry, version).await
    }

    /// Every registry module, sorted by name, flagged if installed.
    pub fn list_modules(&self) -> Result<Vec<ModuleListing>> {
        let registry = self.registry.fetch_registry()?;
        let manifest = self.manifest()?;
        Ok(registry
            .into_values()
            .map(|entry| ModuleListing {
                installed: manifest.is_installed(&entry.name),
                name: entry.name,
                version: entry.version,
                description: entry.description,
            })
            .collect())
    }

    /// Check, fetch and install a module into the project.
    ///
    /// Dependency problems abort before anything is fetched. The module's
    /// own `module.json`, when present, overrides the registry's dependency
    /// declaration and is re-checked after the fetch.
    pub async fn install_module(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<InstalledModuleRecord> {
        let mut manifest = self.manifest()?;
        if manifest.is_installed(name) {
            return Err(ModuleError::AlreadyInstalled {
                name: name.to_string(),
            });
        }

        let registry = self.registry.fetch_registry()?;
        let entry = registry
            .get(name)
            .cloned()
            .ok_or_else(|| ModuleError::ModuleNotFound {
                name: name.to_string(),
            })?;
        DependencyChecker::new(&registry, manifest.installed_names())
            .check(name)
            .into_result()?;

        let cached = self.fetcher.fetch_module(&entry, version).await?;
        let module_manifest = ModuleManifest::load_optional(&cached)?;
        let dependencies = match &module_manifest {
            Some(m) => m.dependencies.clone(),
            None => entry.dependencies.clone(),
        };
        let missing: Vec<String> = dependencies
            .modules
            .iter()
            .filter(|dep| !manifest.is_installed(dep))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ModuleError::MissingDependencies {
                name: name.to_string(),
                missing,
            });
        }

        let target = self.install_dir(name);
        if target.exists() {
            warn!(module = %name, path = %target.display(), "replacing unrecorded install directory");
            tokio::fs::remove_dir_all(&target).await?;
        }
        let source = cached.clone();
        let copy_target = target.clone();
        let copied = tokio::task::spawn_blocking(move || copy_tree(&source, &copy_target))
            .await
            .map_err(|e| ModuleError::Io(std::io::Error::other(e)))??;

        let record = InstalledModuleRecord {
            name: name.to_string(),
            version: version.unwrap_or(&entry.version).to_string(),
            install_path: Path::new(MODULES_DIR).join(name),
            dependencies,
        };
        manifest.add(record.clone());
        manifest.save(&self.project_root)?;

        info!(module = %name, version = %record.version, files = copied, "module installed");
        Ok(record)
    }

    /// Remove an installed module unless another installed module needs it.
    pub fn remove_module(&mut self, name: &str) -> Result<InstalledModuleRecord> {
        let mut manifest = self.manifest()?;
        if !manifest.is_installed(name) {
            return Err(ModuleError::NotInstalled {
                name: name.to_string(),
            });
        }

        // The registry is only consulted for modules installed without a record.
        let registry = if manifest
            .installed_names()
            .any(|m| m != name && manifest.record(m).is_none())
        {
            self.registry.fetch_registry()?
        } else {
            RegistryMap::new()
        };
        let dependents = DependencyChecker::new(&registry, manifest.installed_names())
            .dependents_of(name, &manifest.installed);
        if !dependents.is_empty() {
            return Err(ModuleError::RequiredBy {
                name: name.to_string(),
                dependents,
            });
        }

        self.watcher.stop_watching(name);
        self.loader.lock().unload_module(name);

        let record = manifest.remove(name);
        let dir = record
            .as_ref()
            .map(|r| self.resolve_install_path(r))
            .unwrap_or_else(|| self.install_dir(name));
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        manifest.save(&self.project_root)?;

        info!(module = %name, "module removed");
        Ok(record.unwrap_or_else(|| InstalledModuleRecord {
            name: name.to_string(),
            version: String::new(),
            install_path: Path::new(MODULES_DIR).join(name),
            dependencies: Default::default(),
        }))
    }

    /// Load an installed module through the shared loader.
    pub fn load_installed(&self, name: &str) -> Result<ModuleHandle> {
        let manifest = self.manifest()?;
        let record = manifest.record(name).ok_or_else(|| ModuleError::NotInstalled {
            name: name.to_string(),
        })?;
        let path = self.resolve_install_path(record);
        self.loader.lock().load_module(name, &path)
    }

    /// Watch an installed module and reload it through the loader whenever
    /// its files change.
    pub fn enable_hot_reload(&mut self, name: &str) -> Result<()> {
        let manifest = self.manifest()?;
        let record = manifest.record(name).ok_or_else(|| ModuleError::NotInstalled {
            name: name.to_string(),
        })?;
        let path = self.resolve_install_path(record);

        let loader = Arc::clone(&self.loader);
        self.watcher.register_reload_callback(name, move |event| {
            match loader.lock().reload_module(&event.module)? {
                true => info!(module = %event.module, "module hot reloaded"),
                false => debug!(module = %event.module, "module not loaded, nothing to reload"),
            }
            Ok(())
        });
        self.watcher.watch_module(&path, name)
    }

    /// Record that the host's database dependencies have been initialized.
    pub fn initialize_database(&self) -> Result<ProjectManifest> {
        let mut manifest = self.manifest()?;
        manifest.mark_database_initialized(Utc::now());
        manifest.save(&self.project_root)?;
        info!(root = %self.project_root.display(), "database marked initialized");
        Ok(manifest)
    }

    /// Registry contents, for rendering and diagnostics.
    pub fn registry_map(&self) -> Result<RegistryMap> {
        self.registry.fetch_registry()
    }
}
