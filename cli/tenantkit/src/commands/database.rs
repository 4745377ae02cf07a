//! `tenantkit database init`: record that database dependencies are set up.

use anyhow::Result;
use tenantkit_modules::ModuleContext;

pub fn init(ctx: &ModuleContext) -> Result<()> {
    let manifest = ctx.initialize_database()?;
    let at = manifest
        .database
        .and_then(|db| db.initialized_at)
        .map(|at| at.to_rfc3339())
        .unwrap_or_default();
    println!("Database marked initialized ({at})");
    Ok(())
}
