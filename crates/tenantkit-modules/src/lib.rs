//! Module dependency and lifecycle subsystem for tenantkit projects.
//!
//! Installable feature modules are described by a registry, checked for
//! missing and circular dependencies, fetched into a local cache, installed
//! into the project tree and, during development, loaded into the running
//! process and hot-reloaded when their sources change.
//!
//! # Architecture
//!
//! Components, leaf to root:
//! - **Registry** reads the module catalog (name, version, source, dependencies)
//! - **Dependency checker** walks the declared module graph
//! - **Fetcher** clones or copies module sources into the cache
//! - **Loader** activates modules as native libraries and tracks them by name
//! - **Watcher** follows filesystem events in module directories and drives debounced reloads
//!
//! [`ModuleContext`] ties them together for one project.

pub mod cache;
pub mod config;
pub mod context;
pub mod dependency;
pub mod doctor;
pub mod error;
pub mod fetch;
pub mod loader;
pub mod module_manifest;
pub mod project_manifest;
pub mod registry;
pub mod tree;
pub mod watcher;

// Re-exports for convenience.
pub use cache::{CacheEntry, ModuleCache};
pub use config::ToolConfig;
pub use context::{ModuleContext, ModuleListing};
pub use dependency::{DependencyChecker, DependencyReport, TransitiveDependencies};
pub use doctor::{diagnose, DoctorReport, Finding, Severity};
pub use error::{ErrorKind, ModuleError, Result};
pub use fetch::{GitTransport, ModuleFetcher, Transport};
pub use loader::{
    ActiveModule, AppModule, DylibActivator, LoadState, LoadedModule, ModuleActivator,
    ModuleHandle, ModuleLoader,
};
pub use module_manifest::{ModuleDependencies, ModuleManifest};
pub use project_manifest::{InstalledModuleRecord, ProjectManifest};
pub use registry::{ModuleRegistry, ModuleSource, RegistryEntry, RegistryMap};
pub use tree::format_tree;
pub use watcher::{HotReloadWatcher, ModuleReloaded, WatchOptions, WatchStatus};
