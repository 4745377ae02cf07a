//! `tenantkit cache`: inspect and prune the module cache.

use anyhow::{bail, Result};
use tenantkit_modules::ModuleCache;

/// Print every cached module tree.
pub fn list(cache: &ModuleCache) -> Result<()> {
    let entries = cache.list_entries()?;
    if entries.is_empty() {
        println!("Module cache is empty ({})", cache.root().display());
        return Ok(());
    }
    println!("Module cache: {}", cache.root().display());
    for entry in &entries {
        println!("  {}", entry.key);
    }
    println!("\n{} cached module(s)", entries.len());
    Ok(())
}

/// Remove one cache entry, or everything when `key` is `None`.
pub fn clean(cache: &ModuleCache, key: Option<&str>) -> Result<()> {
    match key {
        Some(key) => {
            if !cache.remove(key)? {
                bail!("no cache entry named '{key}'");
            }
            println!("Removed {key}");
        }
        None => {
            let removed = cache.clear()?;
            if removed == 0 {
                println!("Already clean: {}", cache.root().display());
            } else {
                println!("Removed {removed} cached module(s)");
            }
        }
    }
    Ok(())
}
