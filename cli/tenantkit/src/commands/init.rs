//! `tenantkit init`: start tracking modules in a project.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tenantkit_modules::config::CONFIG_FILE;
use tenantkit_modules::context::MODULES_DIR;
use tenantkit_modules::project_manifest::PROJECT_MANIFEST_FILE;
use tenantkit_modules::{ProjectManifest, ToolConfig};

/// Create `tenantkit.json`, a default `tenantkit.toml` and the modules
/// directory in `project_dir`.
pub fn run(project_dir: &Path) -> Result<()> {
    if project_dir.join(PROJECT_MANIFEST_FILE).exists() {
        bail!(
            "{} already has a {PROJECT_MANIFEST_FILE}",
            project_dir.display()
        );
    }

    fs::create_dir_all(project_dir.join(MODULES_DIR))
        .with_context(|| format!("creating {MODULES_DIR}/"))?;

    ProjectManifest::default()
        .save(project_dir)
        .with_context(|| format!("writing {PROJECT_MANIFEST_FILE}"))?;

    let config_path = project_dir.join(CONFIG_FILE);
    let wrote_config = if config_path.exists() {
        false
    } else {
        let rendered = ToolConfig::default().to_toml()?;
        fs::write(&config_path, rendered).with_context(|| format!("writing {CONFIG_FILE}"))?;
        true
    };

    println!("Initialized tenantkit project in {}", project_dir.display());
    println!("  {PROJECT_MANIFEST_FILE}");
    if wrote_config {
        println!("  {CONFIG_FILE}");
    }
    println!("  {MODULES_DIR}/");
    Ok(())
}
