//! tenantkit CLI: install, check and hot-reload application modules.

mod commands;
mod logging;

use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tenantkit_modules::{ModuleContext, ProjectManifest};

#[derive(Parser)]
#[command(
    name = "tenantkit",
    version,
    about = "Install, check and hot-reload tenantkit application modules"
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Project directory (default: search upward from the current directory)
    #[arg(short = 'C', long, global = true)]
    project: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start tracking modules in a project (creates tenantkit.json)
    Init,
    /// Manage installed modules
    Module {
        #[command(subcommand)]
        action: ModuleAction,
    },
    /// Diagnose installed modules
    #[command(name = "module:doctor")]
    ModuleDoctor {
        /// Check a single module
        name: Option<String>,
        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Load installed modules and hot reload them on change
    Dev {
        /// Module to watch (repeatable; default: all installed)
        #[arg(long = "module")]
        modules: Vec<String>,
    },
    /// Inspect or prune the module cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Database setup bookkeeping
    Database {
        #[command(subcommand)]
        action: DatabaseAction,
    },
}

#[derive(Subcommand)]
enum ModuleAction {
    /// Fetch and install a module from the registry
    Add {
        /// Module name
        name: String,
        /// Exact version to fetch (default: the registry version)
        #[arg(long)]
        version: Option<String>,
    },
    /// Remove an installed module
    Remove {
        /// Module name
        name: String,
    },
    /// List registry modules
    List {
        /// Only show installed modules
        #[arg(long)]
        installed: bool,
        /// Emit JSON
        #[arg(long)]
        json: bool,
    },
    /// Check whether a module's dependencies are satisfied
    Check {
        /// Module name
        name: String,
    },
    /// Show a module's transitive dependency tree
    Deps {
        /// Module name
        name: String,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached module trees
    List,
    /// Remove one cache entry (`name-version`) or the whole cache
    Clean {
        /// Cache key, e.g. auth-1.0.0
        key: Option<String>,
    },
}

#[derive(Subcommand)]
enum DatabaseAction {
    /// Mark the project's database as initialized
    Init,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let result = run(cli).await;
    if let Err(e) = result {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let start = match cli.project {
        Some(dir) if dir.is_absolute() => dir,
        Some(dir) => cwd.join(dir),
        None => cwd,
    };
    let verbose = cli.verbose;

    match cli.command {
        Commands::Init => {
            logging::init(None, verbose);
            commands::init::run(&start)
        }

        Commands::Module { action } => {
            let mut ctx = open_project(&start, verbose)?;
            match action {
                ModuleAction::Add { name, version } => {
                    commands::module::add(&ctx, &name, version.as_deref()).await
                }
                ModuleAction::Remove { name } => commands::module::remove(&mut ctx, &name),
                ModuleAction::List { installed, json } => {
                    commands::module::list(&ctx, installed, json)
                }
                ModuleAction::Check { name } => commands::module::check(&ctx, &name),
                ModuleAction::Deps { name } => commands::module::deps(&ctx, &name),
            }
        }

        Commands::ModuleDoctor { name, json } => {
            let ctx = open_project(&start, verbose)?;
            commands::doctor::run(&ctx, name.as_deref(), json)
        }

        Commands::Dev { modules } => {
            let mut ctx = open_project(&start, verbose)?;
            commands::dev::run(&mut ctx, &modules).await
        }

        Commands::Cache { action } => {
            let ctx = open_project(&start, verbose)?;
            let cache = ctx.fetcher().cache();
            match action {
                CacheAction::List => commands::cache::list(cache),
                CacheAction::Clean { key } => commands::cache::clean(cache, key.as_deref()),
            }
        }

        Commands::Database { action } => {
            let ctx = open_project(&start, verbose)?;
            match action {
                DatabaseAction::Init => commands::database::init(&ctx),
            }
        }
    }
}

/// Open the project enclosing `start` and set up logging from its config.
fn open_project(start: &Path, verbose: bool) -> Result<ModuleContext> {
    let project_dir = find_project(start)?;
    let ctx = ModuleContext::open(&project_dir)?;
    logging::init(ctx.config().log.filter.as_deref(), verbose);
    Ok(ctx)
}

/// Locate the project root from `start` upward.
fn find_project(start: &Path) -> Result<PathBuf> {
    match ProjectManifest::find_root(start) {
        Some(dir) => Ok(dir),
        None => bail!("no tenantkit.json found (run `tenantkit init` first)"),
    }
}
