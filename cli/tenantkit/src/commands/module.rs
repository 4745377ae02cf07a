//! `tenantkit module`: add, remove, list and inspect modules.

use anyhow::{bail, Context, Result};
use tenantkit_modules::{format_tree, DependencyReport, ModuleContext};

/// Run `tenantkit module add <name> [--version <v>]`.
pub async fn add(ctx: &ModuleContext, name: &str, version: Option<&str>) -> Result<()> {
    if let Some(version) = version {
        semver::Version::parse(version)
            .with_context(|| format!("invalid version: {version}"))?;
    }

    let record = ctx
        .install_module(name, version)
        .await
        .with_context(|| format!("installing module '{name}'"))?;

    println!("Installed {} v{}", record.name, record.version);
    println!("  {}", record.install_path.display());
    if !record.dependencies.system.is_empty() {
        println!(
            "  requires system capabilities: {}",
            record.dependencies.system.join(", ")
        );
    }
    Ok(())
}

/// Run `tenantkit module remove <name>`.
pub fn remove(ctx: &mut ModuleContext, name: &str) -> Result<()> {
    let record = ctx
        .remove_module(name)
        .with_context(|| format!("removing module '{name}'"))?;
    println!("Removed {}", record.name);
    Ok(())
}

/// Run `tenantkit module list [--installed] [--json]`.
pub fn list(ctx: &ModuleContext, installed_only: bool, json: bool) -> Result<()> {
    let modules: Vec<_> = ctx
        .list_modules()?
        .into_iter()
        .filter(|m| !installed_only || m.installed)
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&modules)?);
        return Ok(());
    }

    if modules.is_empty() {
        println!(
            "{}",
            if installed_only {
                "No modules installed."
            } else {
                "Registry has no modules."
            }
        );
        return Ok(());
    }

    let width = modules.iter().map(|m| m.name.len()).max().unwrap_or(0);
    for module in &modules {
        let marker = if module.installed { "*" } else { " " };
        let description = module.description.as_deref().unwrap_or("");
        println!(
            "{marker} {:<width$}  v{:<8}  {description}",
            module.name, module.version
        );
    }
    if !installed_only {
        println!("\n* installed");
    }
    Ok(())
}

fn print_report(report: &DependencyReport) {
    println!("Module: {}", report.module);
    if !report.found {
        println!("  not found in registry");
        return;
    }
    println!("  valid: {}", report.valid);
    if report.missing_modules.is_empty() {
        println!("  missing modules: none");
    } else {
        println!("  missing modules: {}", report.missing_modules.join(", "));
    }
    if report.circular_dependency {
        println!(
            "  circular dependency: {}",
            report.dependency_chain.join(" -> ")
        );
    }
}

/// Run `tenantkit module check <name>`. Fails unless the module is installable.
pub fn check(ctx: &ModuleContext, name: &str) -> Result<()> {
    let report = ctx.check_dependencies(name)?;
    print_report(&report);
    if !report.valid {
        bail!("module '{name}' cannot be installed yet");
    }
    Ok(())
}

/// Run `tenantkit module deps <name>`.
pub fn deps(ctx: &ModuleContext, name: &str) -> Result<()> {
    let registry = ctx.registry_map()?;
    let manifest = ctx.manifest()?;
    print!("{}", format_tree(name, &registry, &manifest.modules)?);

    let closure = ctx.all_dependencies(name)?;
    if !closure.packages.is_empty() {
        println!("\nPackages:");
        for (package, version) in &closure.packages {
            println!("  {package} = \"{version}\"");
        }
    }
    Ok(())
}
