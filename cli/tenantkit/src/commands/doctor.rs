//! `tenantkit module:doctor`: diagnose installed modules.

use anyhow::{bail, Result};
use tenantkit_modules::{diagnose, ModuleContext, Severity};

/// Print diagnostics for one module or all installed modules.
pub fn run(ctx: &ModuleContext, name: Option<&str>, json: bool) -> Result<()> {
    let report = diagnose(ctx, name)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("=== Module Doctor ===");
        println!();
        if report.checked.is_empty() {
            println!("No modules installed.");
        }
        for module in &report.checked {
            let findings: Vec<_> = report.for_module(module).collect();
            if findings.is_empty() {
                println!("  {module}: ok");
                continue;
            }
            println!("  {module}:");
            for finding in findings {
                println!("    {}: {}", finding.severity, finding.message);
            }
        }
        let errors = report
            .findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
            .count();
        let warnings = report.findings.len() - errors;
        println!();
        println!("{errors} error(s), {warnings} warning(s)");
    }

    if report.has_errors() {
        bail!("module doctor found problems");
    }
    Ok(())
}
