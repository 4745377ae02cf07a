//! Native module activation through `libloading`.
//!
//! A module crate is built as a `cdylib` and exports a constructor with
//! [`export_module!`](crate::export_module). Each activation loads a fresh
//! shadow copy of the library so the original can be rebuilt while the
//! previous version is still mapped.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use libloading::{Library, Symbol};
use tracing::{debug, info};
use uuid::Uuid;

use super::{ActiveModule, AppModule, ModuleActivator};
use crate::error::{ModuleError, Result};

/// Symbol every module library must export.
pub const MODULE_ENTRY_SYMBOL: &[u8] = b"tenantkit_module_entry\0";

/// Default upper bound on `cargo build` for a source entry.
pub const DEFAULT_COMPILE_TIMEOUT: Duration = Duration::from_secs(600);

type ModuleEntryFn = unsafe extern "C" fn() -> *mut dyn AppModule;

/// Declare the constructor for a module library.
///
/// ```ignore
/// use tenantkit_modules::{export_module, AppModule};
///
/// #[derive(Default)]
/// struct Crm;
///
/// impl AppModule for Crm {
///     fn name(&self) -> &str { "crm" }
/// }
///
/// export_module!(Crm, Crm::default);
/// ```
#[macro_export]
macro_rules! export_module {
    ($module_type:ty, $constructor:path) => {
        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn tenantkit_module_entry() -> *mut dyn $crate::AppModule {
            let module: $module_type = $constructor();
            let boxed: Box<dyn $crate::AppModule> = Box::new(module);
            Box::into_raw(boxed)
        }
    };
}

/// Activates modules shipped as native dynamic libraries.
pub struct DylibActivator {
    shadow_dir: PathBuf,
    compile_timeout: Duration,
}

impl DylibActivator {
    pub fn new(shadow_dir: impl Into<PathBuf>) -> Self {
        Self {
            shadow_dir: shadow_dir.into(),
            compile_timeout: DEFAULT_COMPILE_TIMEOUT,
        }
    }

    /// Shadow copies under the system temp directory.
    pub fn in_temp_dir() -> Self {
        Self::new(std::env::temp_dir().join("tenantkit-shadow"))
    }

    /// Bound `cargo build` for `.rs` entries by `timeout`.
    pub fn with_compile_timeout(mut self, timeout: Duration) -> Self {
        self.compile_timeout = timeout;
        self
    }

    pub fn compile_timeout(&self) -> Duration {
        self.compile_timeout
    }

    pub fn shadow_dir(&self) -> &Path {
        &self.shadow_dir
    }

    /// Build the crate owning `entry` and return the produced library.
    fn compile(&self, name: &str, module_root: &Path, entry: &Path) -> Result<PathBuf> {
        let manifest = find_crate_manifest(module_root, entry).ok_or_else(|| {
            ModuleError::LoadFailed {
                name: name.to_string(),
                detail: format!("no Cargo.toml found for {}", entry.display()),
            }
        })?;
        let crate_root = manifest.parent().unwrap_or(module_root).to_path_buf();
        let lib_name = library_name(&manifest)?;
        let target_dir = crate_root.join("target");

        info!(module = %name, manifest = %manifest.display(), "compiling module");
        let mut child = Command::new("cargo")
            .args(["build", "--release", "--lib", "--quiet", "--manifest-path"])
            .arg(&manifest)
            .arg("--target-dir")
            .arg(&target_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ModuleError::LoadFailed {
                name: name.to_string(),
                detail: format!("failed to run cargo: {e}"),
            })?;

        // Drain stderr on a helper thread so a chatty build cannot fill the pipe.
        let stderr = child.stderr.take();
        let reader = std::thread::spawn(move || {
            let mut buf = String::new();
            if let Some(mut stream) = stderr {
                let _ = stream.read_to_string(&mut buf);
            }
            buf
        });

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= self.compile_timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ModuleError::LoadFailed {
                    name: name.to_string(),
                    detail: format!("compilation timed out after {:?}", self.compile_timeout),
                });
            }
            std::thread::sleep(Duration::from_millis(50));
        };

        let stderr = reader.join().unwrap_or_default();
        if !status.success() {
            return Err(ModuleError::LoadFailed {
                name: name.to_string(),
                detail: format!("cargo build failed: {}", stderr.trim()),
            });
        }

        let artifact = target_dir
            .join("release")
            .join(libloading::library_filename(&lib_name));
        if !artifact.is_file() {
            return Err(ModuleError::LoadFailed {
                name: name.to_string(),
                detail: format!(
                    "build produced no library at {} (is crate-type = [\"cdylib\"] set?)",
                    artifact.display()
                ),
            });
        }
        Ok(artifact)
    }
}

impl ModuleActivator for DylibActivator {
    fn extensions(&self) -> Vec<String> {
        vec![std::env::consts::DLL_EXTENSION.to_string(), "rs".to_string()]
    }

    fn prepare(&mut self, name: &str, module_root: &Path, entry: &Path) -> Result<PathBuf> {
        let built = if entry.extension().is_some_and(|e| e == "rs") {
            self.compile(name, module_root, entry)?
        } else {
            entry.to_path_buf()
        };

        fs::create_dir_all(&self.shadow_dir)?;
        let shadow = self.shadow_dir.join(format!(
            "{}-{}.{}",
            name,
            Uuid::new_v4().simple(),
            std::env::consts::DLL_EXTENSION
        ));
        fs::copy(&built, &shadow)?;
        debug!(module = %name, shadow = %shadow.display(), "prepared shadow copy");
        Ok(shadow)
    }

    fn activate(&mut self, name: &str, artifact: &Path) -> Result<ActiveModule> {
        // SAFETY: module libraries are trusted code built against this crate;
        // their initializers run with the host's privileges.
        let library = unsafe { Library::new(artifact) }.map_err(|e| ModuleError::LoadFailed {
            name: name.to_string(),
            detail: e.to_string(),
        })?;

        let raw = {
            // SAFETY: the symbol type matches the signature emitted by export_module!.
            let constructor: Symbol<ModuleEntryFn> = unsafe { library.get(MODULE_ENTRY_SYMBOL) }
                .map_err(|_| ModuleError::MarkerMissing {
                    name: name.to_string(),
                    entry: artifact.to_path_buf(),
                })?;
            // SAFETY: the constructor hands over ownership of a boxed module.
            unsafe { constructor() }
        };
        if raw.is_null() {
            return Err(ModuleError::LoadFailed {
                name: name.to_string(),
                detail: "module constructor returned null".to_string(),
            });
        }
        // SAFETY: raw came from Box::into_raw in the module's constructor.
        let module = unsafe { Box::from_raw(raw) };
        Ok(ActiveModule::with_library(module, library))
    }

    fn discard(&mut self, artifact: &Path) {
        if let Err(e) = fs::remove_file(artifact) {
            debug!(artifact = %artifact.display(), error = %e, "could not remove shadow copy");
        }
    }
}

/// Walk up from the entry to the module root looking for `Cargo.toml`.
fn find_crate_manifest(module_root: &Path, entry: &Path) -> Option<PathBuf> {
    let mut dir = entry.parent();
    while let Some(current) = dir {
        let candidate = current.join("Cargo.toml");
        if candidate.is_file() {
            return Some(candidate);
        }
        if current == module_root {
            break;
        }
        dir = current.parent();
    }
    None
}

/// Library target name: `[lib] name`, else the package name with dashes
/// replaced.
fn library_name(manifest: &Path) -> Result<String> {
    let contents = fs::read_to_string(manifest)?;
    let value: toml::Table = toml::from_str(&contents)?;
    let lib_name = value
        .get("lib")
        .and_then(|lib| lib.get("name"))
        .and_then(|n| n.as_str());
    let package_name = value
        .get("package")
        .and_then(|pkg| pkg.get("name"))
        .and_then(|n| n.as_str());
    lib_name
        .or(package_name)
        .map(|n| n.replace('-', "_"))
        .ok_or_else(|| ModuleError::InvalidManifest {
            path: manifest.to_path_buf(),
            detail: "missing [package] name".to_string(),
        })
}
