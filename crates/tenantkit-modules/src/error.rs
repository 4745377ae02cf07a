//! Module subsystem error types.

use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur while resolving, fetching, loading or watching modules.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    /// Registry file is absent.
    #[error("module registry not found at {}", path.display())]
    RegistryNotFound { path: PathBuf },

    /// Module absent from the registry.
    #[error("module not found in registry: {name}")]
    ModuleNotFound { name: String },

    /// Local source path declared by the registry does not exist.
    #[error("source path for module '{name}' does not exist: {}", path.display())]
    SourceNotFound { name: String, path: PathBuf },

    /// Registry document is structurally invalid.
    #[error("invalid module registry: {detail}")]
    InvalidRegistry { detail: String },

    /// Project manifest or `module.json` is invalid.
    #[error("invalid manifest at {}: {detail}", path.display())]
    InvalidManifest { path: PathBuf, detail: String },

    /// One or more declared module dependencies are not installed.
    #[error("module '{name}' is missing dependencies: {}", missing.join(", "))]
    MissingDependencies { name: String, missing: Vec<String> },

    /// A dependency cycle was found while checking a module.
    #[error("circular dependency for module '{name}': {}", chain.join(" -> "))]
    CircularDependency { name: String, chain: Vec<String> },

    /// Installed modules still depend on the module being removed.
    #[error("module '{name}' is required by: {}", dependents.join(", "))]
    RequiredBy { name: String, dependents: Vec<String> },

    /// Module is already recorded in the project manifest.
    #[error("module '{name}' is already installed")]
    AlreadyInstalled { name: String },

    /// Module is not recorded in the project manifest.
    #[error("module '{name}' is not installed")]
    NotInstalled { name: String },

    /// Registry entry declares neither a git repository nor a local path.
    #[error("module '{name}' has no supported source (expected git repository or local path)")]
    UnsupportedSource { name: String },

    /// Clone or copy failed. Partial cache artifacts have been removed.
    #[error("failed to fetch module '{name}': {detail}")]
    FetchFailed { name: String, detail: String },

    /// Fetch exceeded its time budget. Partial cache artifacts have been removed.
    #[error("fetching module '{name}' timed out after {timeout:?}")]
    FetchTimeout { name: String, timeout: Duration },

    /// No entry file matched the naming conventions.
    #[error("no entry point found for module '{name}' under {}", path.display())]
    EntryNotFound { name: String, path: PathBuf },

    /// The loaded artifact does not export the module entry symbol.
    #[error("'{}' does not export a tenantkit module (module '{name}')", entry.display())]
    MarkerMissing { name: String, entry: PathBuf },

    /// Compilation, activation or initialization failed.
    #[error("failed to load module '{name}': {detail}")]
    LoadFailed { name: String, detail: String },

    /// Filesystem watcher failure for one module.
    #[error("watch error for module '{name}': {detail}")]
    Watch { name: String, detail: String },

    /// Tool configuration error.
    #[error("configuration error: {detail}")]
    Config { detail: String },

    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Semver parse error.
    #[error("invalid version: {0}")]
    SemverVersion(#[from] semver::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Dependency,
    Fetch,
    Load,
    Watch,
    Config,
    Io,
}

impl ModuleError {
    /// Classify this error into the subsystem taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ModuleError::RegistryNotFound { .. }
            | ModuleError::ModuleNotFound { .. }
            | ModuleError::SourceNotFound { .. }
            | ModuleError::NotInstalled { .. } => ErrorKind::NotFound,
            ModuleError::MissingDependencies { .. }
            | ModuleError::CircularDependency { .. }
            | ModuleError::RequiredBy { .. }
            | ModuleError::AlreadyInstalled { .. } => ErrorKind::Dependency,
            ModuleError::UnsupportedSource { .. }
            | ModuleError::FetchFailed { .. }
            | ModuleError::FetchTimeout { .. } => ErrorKind::Fetch,
            ModuleError::EntryNotFound { .. }
            | ModuleError::MarkerMissing { .. }
            | ModuleError::LoadFailed { .. } => ErrorKind::Load,
            ModuleError::Watch { .. } => ErrorKind::Watch,
            ModuleError::InvalidRegistry { .. }
            | ModuleError::InvalidManifest { .. }
            | ModuleError::Config { .. }
            | ModuleError::Toml(_)
            | ModuleError::Json(_)
            | ModuleError::SemverVersion(_) => ErrorKind::Config,
            ModuleError::Io(_) => ErrorKind::Io,
        }
    }
}

/// Result type alias for module operations.
pub type Result<T> = std::result::Result<T, ModuleError>;
