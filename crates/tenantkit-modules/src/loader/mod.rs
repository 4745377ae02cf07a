//! Dynamic module loading.
//!
//! The [`ModuleLoader`] owns every live module instance and the prepared
//! artifact behind it. A replacement is prepared, activated and initialized
//! next to the live instance; only then are the two swapped and the old
//! artifact released. Activation is delegated to a [`ModuleActivator`] so
//! the loader's bookkeeping is independent of how code actually gets mapped
//! into the process.

pub mod dylib;
pub mod scan;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{ModuleError, Result};

pub use dylib::{DylibActivator, MODULE_ENTRY_SYMBOL};

/// Error type returned by module lifecycle hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Contract implemented by every loadable module.
///
/// Native modules must be built with the same compiler and the same
/// `tenantkit-modules` version as the host, since the trait object crosses
/// the library boundary as-is.
pub trait AppModule: Send + Sync {
    fn name(&self) -> &str;

    /// Called once after activation. An error aborts the load.
    fn init(&self) -> std::result::Result<(), BoxError> {
        Ok(())
    }

    /// Called when the instance is dropped by the loader.
    fn shutdown(&self) {}
}

/// A live module instance, plus the library keeping its code mapped.
pub struct ActiveModule {
    // Drop order matters: the module must go before its library.
    module: Box<dyn AppModule>,
    _library: Option<libloading::Library>,
}

impl ActiveModule {
    /// Wrap an in-process module.
    pub fn new(module: Box<dyn AppModule>) -> Self {
        Self {
            module,
            _library: None,
        }
    }

    pub(crate) fn with_library(module: Box<dyn AppModule>, library: libloading::Library) -> Self {
        Self {
            module,
            _library: Some(library),
        }
    }
}

impl Deref for ActiveModule {
    type Target = dyn AppModule;

    fn deref(&self) -> &Self::Target {
        self.module.as_ref()
    }
}

impl Drop for ActiveModule {
    fn drop(&mut self) {
        self.module.shutdown();
    }
}

impl fmt::Debug for ActiveModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveModule")
            .field("name", &self.module.name())
            .field("native", &self._library.is_some())
            .finish()
    }
}

/// Shared handle to a loaded module.
pub type ModuleHandle = Arc<ActiveModule>;

/// Turns entry files into live modules.
pub trait ModuleActivator: Send {
    /// Entry file extensions, most preferred first.
    fn extensions(&self) -> Vec<String>;

    /// Produce a fresh loadable artifact for `entry`, compiling if needed.
    fn prepare(&mut self, name: &str, module_root: &Path, entry: &Path) -> Result<PathBuf>;

    /// Instantiate the module contained in a prepared artifact.
    fn activate(&mut self, name: &str, artifact: &Path) -> Result<ActiveModule>;

    /// Release a prepared artifact that will not be activated again.
    fn discard(&mut self, _artifact: &Path) {}
}

/// Lifecycle position of a module name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loading,
    Loaded,
    Reloading,
}

/// Metadata about a loaded module.
#[derive(Debug, Clone)]
pub struct LoadedModule {
    pub name: String,
    /// Module root the load was requested with.
    pub source_path: PathBuf,
    /// Entry file chosen by discovery.
    pub entry_path: PathBuf,
    /// Prepared artifact the instance was activated from.
    pub artifact: PathBuf,
    pub loaded_at: DateTime<Utc>,
    /// External crates imported by the module's source.
    pub dependencies: Vec<String>,
    handle: ModuleHandle,
}

impl LoadedModule {
    pub fn handle(&self) -> ModuleHandle {
        Arc::clone(&self.handle)
    }
}

/// Registry of live modules keyed by name.
pub struct ModuleLoader {
    activator: Box<dyn ModuleActivator>,
    modules: BTreeMap<String, LoadedModule>,
    /// Names whose artifact was invalidated since it was activated.
    stale: HashSet<String>,
    states: HashMap<String, LoadState>,
}

impl ModuleLoader {
    pub fn new(activator: Box<dyn ModuleActivator>) -> Self {
        Self {
            activator,
            modules: BTreeMap::new(),
            stale: HashSet::new(),
            states: HashMap::new(),
        }
    }

    /// Load (or replace) the module `name` from the directory `path`.
    ///
    /// A fresh artifact is always prepared from the files on disk. On
    /// failure the previously loaded instance and its artifact stay in place.
    pub fn load_module(&mut self, name: &str, path: &Path) -> Result<ModuleHandle> {
        let previous = self.state(name);
        let transitional = if previous == LoadState::Loaded {
            LoadState::Reloading
        } else {
            LoadState::Loading
        };
        self.states.insert(name.to_string(), transitional);

        match self.activate_from(name, path) {
            Ok(loaded) => {
                let handle = loaded.handle();
                let was_stale = self.stale.remove(name);
                info!(
                    module = %name,
                    entry = %loaded.entry_path.display(),
                    dependencies = loaded.dependencies.len(),
                    replaced_stale = was_stale,
                    "module loaded"
                );
                if let Some(replaced) = self.modules.insert(name.to_string(), loaded) {
                    self.release(replaced);
                }
                self.states.insert(name.to_string(), LoadState::Loaded);
                Ok(handle)
            }
            Err(e) => {
                warn!(module = %name, error = %e, "module load failed");
                if previous == LoadState::Unloaded {
                    self.states.remove(name);
                } else {
                    self.states.insert(name.to_string(), previous);
                }
                Err(e)
            }
        }
    }

    fn activate_from(&mut self, name: &str, path: &Path) -> Result<LoadedModule> {
        let extensions = self.activator.extensions();
        let entry =
            scan::find_entry(name, path, &extensions).ok_or_else(|| ModuleError::EntryNotFound {
                name: name.to_string(),
                path: path.to_path_buf(),
            })?;

        let artifact = self.activator.prepare(name, path, &entry)?;
        let active = match self.activator.activate(name, &artifact) {
            Ok(active) => active,
            Err(e) => {
                self.activator.discard(&artifact);
                return Err(e);
            }
        };
        if let Err(e) = active.init() {
            drop(active);
            self.activator.discard(&artifact);
            return Err(ModuleError::LoadFailed {
                name: name.to_string(),
                detail: format!("init failed: {e}"),
            });
        }

        let dependencies = match scan::scan_source(&entry, path) {
            Some(source) => match std::fs::read_to_string(&source) {
                Ok(text) => scan::external_imports(&text),
                Err(e) => {
                    debug!(source = %source.display(), error = %e, "import scan skipped");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        Ok(LoadedModule {
            name: name.to_string(),
            source_path: path.to_path_buf(),
            entry_path: entry,
            artifact,
            loaded_at: Utc::now(),
            dependencies,
            handle: Arc::new(active),
        })
    }

    /// Reload a module from its recorded source path.
    ///
    /// Returns `Ok(false)` without side effects if `name` was never loaded.
    pub fn reload_module(&mut self, name: &str) -> Result<bool> {
        let Some(path) = self.modules.get(name).map(|m| m.source_path.clone()) else {
            return Ok(false);
        };
        self.load_module(name, &path).map(|_| true)
    }

    /// Drop the module instance and its prepared artifact.
    ///
    /// Returns `false` if nothing was loaded under `name`.
    pub fn unload_module(&mut self, name: &str) -> bool {
        let Some(removed) = self.modules.remove(name) else {
            return false;
        };
        self.states.remove(name);
        self.stale.remove(name);
        self.release(removed);
        info!(module = %name, "module unloaded");
        true
    }

    /// Drop a replaced or unloaded instance, then its artifact.
    fn release(&mut self, module: LoadedModule) {
        let artifact = module.artifact.clone();
        // Outstanding handles keep the code mapped until they are dropped.
        drop(module);
        self.activator.discard(&artifact);
    }

    /// Mark the artifact behind `name` as stale because its sources changed.
    ///
    /// The live instance keeps running on it until a reload succeeds or the
    /// module is unloaded, at which point the artifact is released. Returns
    /// `false` if `name` is not loaded or was already marked.
    pub fn invalidate(&mut self, name: &str) -> bool {
        let Some(loaded) = self.modules.get(name) else {
            return false;
        };
        if !self.stale.insert(name.to_string()) {
            return false;
        }
        debug!(module = %name, artifact = %loaded.artifact.display(), "artifact invalidated");
        true
    }

    /// Loaded modules, ordered by name.
    pub fn loaded_modules(&self) -> Vec<&LoadedModule> {
        self.modules.values().collect()
    }

    pub fn module(&self, name: &str) -> Option<ModuleHandle> {
        self.modules.get(name).map(LoadedModule::handle)
    }

    pub fn metadata(&self, name: &str) -> Option<&LoadedModule> {
        self.modules.get(name)
    }

    pub fn state(&self, name: &str) -> LoadState {
        self.states
            .get(name)
            .copied()
            .unwrap_or(LoadState::Unloaded)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }
}
