//! Tool configuration (`tenantkit.toml`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::ModuleCache;
use crate::error::{ModuleError, Result};
use crate::fetch::DEFAULT_FETCH_TIMEOUT;
use crate::loader::dylib::DEFAULT_COMPILE_TIMEOUT;
use crate::watcher::{WatchOptions, DEFAULT_DEBOUNCE};

pub const CONFIG_FILE: &str = "tenantkit.toml";
pub const DEFAULT_REGISTRY_FILE: &str = "registry.json";

pub const ENV_REGISTRY: &str = "TENANTKIT_REGISTRY";
pub const ENV_CACHE_DIR: &str = "TENANTKIT_CACHE_DIR";
pub const ENV_FETCH_TIMEOUT: &str = "TENANTKIT_FETCH_TIMEOUT_SECS";
pub const ENV_COMPILE_TIMEOUT: &str = "TENANTKIT_COMPILE_TIMEOUT_SECS";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolConfig {
    pub registry: RegistryConfig,
    pub cache: CacheConfig,
    pub fetch: FetchConfig,
    pub loader: LoaderConfig,
    pub watch: WatchConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    /// Registry file, relative to the project root unless absolute.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_FETCH_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    /// Upper bound on `cargo build` for modules shipped as source.
    pub compile_timeout_secs: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            compile_timeout_secs: DEFAULT_COMPILE_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchConfig {
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// `tracing` filter directive, e.g. `tenantkit_modules=debug`.
    pub filter: Option<String>,
}

impl ToolConfig {
    pub fn parse(input: &str) -> Result<Self> {
        let config: ToolConfig = toml::from_str(input).map_err(|e| ModuleError::Config {
            detail: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read `tenantkit.toml` from the project root. A missing file yields
    /// the defaults.
    pub fn load(project_root: &Path) -> Result<Self> {
        let path = project_root.join(CONFIG_FILE);
        if !path.is_file() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(&path)?;
        Self::parse(&contents).map_err(|e| match e {
            ModuleError::Config { detail } => ModuleError::Config {
                detail: format!("{}: {detail}", path.display()),
            },
            other => other,
        })
    }

    /// Load from disk, then apply environment overrides.
    pub fn discover(project_root: &Path) -> Result<Self> {
        let mut config = Self::load(project_root)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `TENANTKIT_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(registry) = lookup(ENV_REGISTRY).filter(|v| !v.is_empty()) {
            self.registry.path = Some(PathBuf::from(registry));
        }
        if let Some(dir) = lookup(ENV_CACHE_DIR).filter(|v| !v.is_empty()) {
            self.cache.dir = Some(PathBuf::from(dir));
        }
        if let Some(timeout) = lookup(ENV_FETCH_TIMEOUT).filter(|v| !v.is_empty()) {
            self.fetch.timeout_secs = parse_secs(ENV_FETCH_TIMEOUT, &timeout)?;
        }
        if let Some(timeout) = lookup(ENV_COMPILE_TIMEOUT).filter(|v| !v.is_empty()) {
            self.loader.compile_timeout_secs = parse_secs(ENV_COMPILE_TIMEOUT, &timeout)?;
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.fetch.timeout_secs == 0 {
            return Err(ModuleError::Config {
                detail: "fetch.timeout_secs must be greater than zero".to_string(),
            });
        }
        if self.loader.compile_timeout_secs == 0 {
            return Err(ModuleError::Config {
                detail: "loader.compile_timeout_secs must be greater than zero".to_string(),
            });
        }
        if self.watch.debounce_ms == 0 {
            return Err(ModuleError::Config {
                detail: "watch.debounce_ms must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn registry_path(&self, project_root: &Path) -> PathBuf {
        match &self.registry.path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => project_root.join(path),
            None => project_root.join(DEFAULT_REGISTRY_FILE),
        }
    }

    /// Configured cache, else the per-user default.
    pub fn module_cache(&self) -> Result<ModuleCache> {
        match &self.cache.dir {
            Some(dir) => Ok(ModuleCache::new(dir.clone())),
            None => ModuleCache::default_location().ok_or_else(|| ModuleError::Config {
                detail: format!("no user config directory; set [cache] dir or {ENV_CACHE_DIR}"),
            }),
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.timeout_secs)
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.loader.compile_timeout_secs)
    }

    pub fn watch_options(&self) -> WatchOptions {
        WatchOptions {
            debounce: Duration::from_millis(self.watch.debounce_ms),
        }
    }

    /// Render as TOML, for `tenantkit init`.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ModuleError::Config {
            detail: e.to_string(),
        })
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| ModuleError::Config {
        detail: format!("{key} must be a whole number of seconds, got '{value}'"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = ToolConfig::load(dir.path()).unwrap();
        assert_eq!(config, ToolConfig::default());
        assert_eq!(config.fetch_timeout(), Duration::from_secs(300));
        assert_eq!(config.compile_timeout(), Duration::from_secs(600));
        assert_eq!(config.watch_options(), WatchOptions::default());
        assert_eq!(
            config.registry_path(dir.path()),
            dir.path().join("registry.json")
        );
    }

    #[test]
    fn parses_all_sections() {
        let config = ToolConfig::parse(
            r#"
[registry]
path = "modules/registry.json"

[cache]
dir = "/var/cache/tenantkit"

[fetch]
timeout_secs = 45

[loader]
compile_timeout_secs = 120

[watch]
debounce_ms = 500

[log]
filter = "tenantkit_modules=debug"
"#,
        )
        .unwrap();

        let root = Path::new("/srv/app");
        assert_eq!(
            config.registry_path(root),
            PathBuf::from("/srv/app/modules/registry.json")
        );
        assert_eq!(
            config.module_cache().unwrap().root(),
            Path::new("/var/cache/tenantkit")
        );
        assert_eq!(config.fetch_timeout(), Duration::from_secs(45));
        assert_eq!(config.watch_options().debounce, Duration::from_millis(500));
        assert_eq!(config.compile_timeout(), Duration::from_secs(120));
        assert_eq!(config.log.filter.as_deref(), Some("tenantkit_modules=debug"));
    }

    #[test]
    fn unknown_keys_rejected() {
        let err = ToolConfig::parse("[fetch]\ntimeout = 10\n").unwrap_err();
        assert!(matches!(err, ModuleError::Config { .. }));
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn zero_timeout_rejected() {
        assert!(ToolConfig::parse("[fetch]\ntimeout_secs = 0\n").is_err());
        assert!(ToolConfig::parse("[loader]\ncompile_timeout_secs = 0\n").is_err());
        assert!(ToolConfig::parse("[watch]\ndebounce_ms = 0\n").is_err());
    }

    #[test]
    fn env_overrides_file_values() {
        let vars: HashMap<&str, &str> = [
            (ENV_REGISTRY, "/etc/tenantkit/registry.json"),
            (ENV_CACHE_DIR, "/tmp/tk-cache"),
            (ENV_FETCH_TIMEOUT, "12"),
            (ENV_COMPILE_TIMEOUT, "900"),
        ]
        .into_iter()
        .collect();

        let mut config = ToolConfig::parse("[fetch]\ntimeout_secs = 90\n").unwrap();
        config
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(
            config.registry_path(Path::new("/srv/app")),
            PathBuf::from("/etc/tenantkit/registry.json")
        );
        assert_eq!(config.module_cache().unwrap().root(), Path::new("/tmp/tk-cache"));
        assert_eq!(config.fetch_timeout(), Duration::from_secs(12));
        assert_eq!(config.compile_timeout(), Duration::from_secs(900));
    }

    #[test]
    fn bad_env_timeout_is_config_error() {
        let mut config = ToolConfig::default();
        let err = config
            .apply_env(|key| (key == ENV_FETCH_TIMEOUT).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ModuleError::Config { .. }));
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let rendered = ToolConfig::default().to_toml().unwrap();
        assert_eq!(ToolConfig::parse(&rendered).unwrap(), ToolConfig::default());
    }
}
