//! Installed-module diagnostics.

use std::fmt;

use serde::Serialize;

use crate::context::ModuleContext;
use crate::dependency::DependencyChecker;
use crate::error::{ModuleError, Result};
use crate::module_manifest::ModuleManifest;
use crate::project_manifest::InstalledModuleRecord;
use crate::registry::RegistryMap;

/// System capability that needs `database.initialized` in the manifest.
pub const DATABASE_CAPABILITY: &str = "database";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub module: String,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DoctorReport {
    /// Modules that were examined, in manifest order.
    pub checked: Vec<String>,
    pub findings: Vec<Finding>,
}

impl DoctorReport {
    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(|f| f.severity == Severity::Error)
    }

    pub fn for_module<'a>(&'a self, module: &'a str) -> impl Iterator<Item = &'a Finding> + 'a {
        self.findings.iter().filter(move |f| f.module == module)
    }

    fn push(&mut self, module: &str, severity: Severity, message: impl Into<String>) {
        self.findings.push(Finding {
            module: module.to_string(),
            severity,
            message: message.into(),
        });
    }
}

/// Diagnose one installed module, or every installed module when `name`
/// is `None`.
///
/// An unreadable registry is reported as a warning on each module rather
/// than failing the run, so the installed tree can still be inspected.
pub fn diagnose(ctx: &ModuleContext, name: Option<&str>) -> Result<DoctorReport> {
    let manifest = ctx.manifest()?;
    let targets: Vec<String> = match name {
        Some(name) => {
            if !manifest.is_installed(name) {
                return Err(ModuleError::NotInstalled {
                    name: name.to_string(),
                });
            }
            vec![name.to_string()]
        }
        None => manifest.modules.clone(),
    };

    let registry = ctx.registry_map();
    let mut report = DoctorReport::default();

    for module in &targets {
        report.checked.push(module.clone());
        let Some(record) = manifest.record(module) else {
            report.push(module, Severity::Error, "listed in modules but has no install record");
            continue;
        };

        check_install_tree(ctx, record, &mut report);

        for dep in &record.dependencies.modules {
            if !manifest.is_installed(dep) {
                report.push(module, Severity::Error, format!("dependency '{dep}' is not installed"));
            }
        }

        if record
            .dependencies
            .system
            .iter()
            .any(|s| s == DATABASE_CAPABILITY)
            && !manifest.database_initialized()
        {
            report.push(
                module,
                Severity::Warning,
                "requires the database but it has not been initialized (run `tenantkit database init`)",
            );
        }

        match &registry {
            Ok(registry) => check_registry(registry, record, manifest.installed_names(), &mut report),
            Err(e) => report.push(module, Severity::Warning, format!("registry unavailable: {e}")),
        }
    }

    Ok(report)
}

fn check_install_tree(ctx: &ModuleContext, record: &InstalledModuleRecord, report: &mut DoctorReport) {
    let module = record.name.as_str();
    let path = ctx.resolve_install_path(record);
    if !path.is_dir() {
        report.push(
            module,
            Severity::Error,
            format!("install directory {} is missing", path.display()),
        );
        return;
    }
    match ModuleManifest::load_optional(&path) {
        Ok(Some(found)) if found.name != module => report.push(
            module,
            Severity::Error,
            format!("module.json names '{}' instead of '{module}'", found.name),
        ),
        Ok(Some(_)) => {}
        Ok(None) => report.push(module, Severity::Warning, "module.json is missing"),
        Err(e) => report.push(module, Severity::Error, e.to_string()),
    }
}

fn check_registry<'a>(
    registry: &RegistryMap,
    record: &InstalledModuleRecord,
    installed: impl Iterator<Item = &'a str>,
    report: &mut DoctorReport,
) {
    let module = record.name.as_str();
    let Some(entry) = registry.get(module) else {
        report.push(module, Severity::Warning, "no longer listed in the registry");
        return;
    };

    if let (Ok(current), Ok(latest)) = (
        semver::Version::parse(&record.version),
        semver::Version::parse(&entry.version),
    ) {
        if latest > current {
            report.push(
                module,
                Severity::Warning,
                format!("newer version available: {current} -> {latest}"),
            );
        }
    }

    let checker = DependencyChecker::new(registry, installed);
    let check = checker.check(module);
    if check.circular_dependency {
        report.push(
            module,
            Severity::Error,
            format!("circular dependency: {}", check.dependency_chain.join(" -> ")),
        );
    }
}
