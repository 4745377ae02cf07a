//! `tenantkit dev`: load installed modules and hot reload them on change.

use anyhow::{bail, Result};
use tenantkit_modules::ModuleContext;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

/// Load and watch `modules` (all installed when empty) until Ctrl-C.
pub async fn run(ctx: &mut ModuleContext, modules: &[String]) -> Result<()> {
    let names = if modules.is_empty() {
        ctx.manifest()?.modules
    } else {
        modules.to_vec()
    };
    if names.is_empty() {
        bail!("no modules installed (run `tenantkit module add <name>` first)");
    }

    let mut events = ctx.watcher().subscribe();
    for name in &names {
        // A module that fails to load is still watched so a fix gets picked up.
        match ctx.load_installed(name) {
            Ok(handle) => println!("loaded {}", handle.name()),
            Err(e) => {
                warn!(module = %name, error = %e, "initial load failed");
                eprintln!("warning: {e}");
            }
        }
        ctx.enable_hot_reload(name)?;
    }

    let status = ctx.watcher().status();
    println!(
        "watching {} module(s): {} (Ctrl-C to stop)",
        status.total,
        status.active.join(", ")
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => println!(
                    "[{}] {} changed ({} file(s))",
                    event.at.format("%H:%M:%S"),
                    event.module,
                    event.paths.len()
                ),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "missed reload notifications"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    ctx.watcher_mut().stop_all();
    let loader = ctx.loader();
    let mut loader = loader.lock();
    for name in &names {
        loader.unload_module(name);
    }
    println!("stopped");
    Ok(())
}
