//! Development hot reload.
//!
//! [`HotReloadWatcher`] subscribes to raw `notify` events for each watched
//! module directory and handles them on a per-module tokio task. Relevant
//! paths are debounced by [`Debouncer`]; once a batch is stable the task runs
//! the reload sequence for that module: invalidate the loader's artifact,
//! invoke the registered callback, then broadcast [`ModuleReloaded`].

pub mod debounce;
pub mod events;

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{ModuleError, Result};
use crate::loader::{BoxError, ModuleLoader};

pub use debounce::Debouncer;
pub use events::{is_ignored, ChangeKind};

use events::WatchRoot;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    /// Quiet period a path must observe before it triggers a reload.
    pub debounce: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

/// Broadcast after a module's reload sequence has run.
#[derive(Debug, Clone)]
pub struct ModuleReloaded {
    pub module: String,
    /// Changed files, sorted.
    pub paths: Vec<PathBuf>,
    pub at: DateTime<Utc>,
}

pub type ReloadCallback = Arc<dyn Fn(&ModuleReloaded) -> std::result::Result<(), BoxError> + Send + Sync>;

/// Drops whatever the process cached for a module before it is reloaded.
pub trait CacheInvalidator: Send + Sync {
    fn invalidate(&self, module: &str);
}

impl CacheInvalidator for Mutex<ModuleLoader> {
    fn invalidate(&self, module: &str) {
        self.lock().invalidate(module);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchStatus {
    pub active: Vec<String>,
    pub total: usize,
}

struct WatchHandle {
    path: PathBuf,
    // Dropping the backend closes the event channel, which ends the task.
    _backend: RecommendedWatcher,
    task: JoinHandle<()>,
}

/// State shared between the watcher and its per-module tasks.
#[derive(Clone)]
struct Shared {
    callbacks: Arc<RwLock<HashMap<String, ReloadCallback>>>,
    invalidator: Option<Arc<dyn CacheInvalidator>>,
    events: broadcast::Sender<ModuleReloaded>,
}

impl Shared {
    fn reload(&self, module: &str, paths: Vec<PathBuf>) {
        info!(module = %module, changed = paths.len(), "change detected, reloading");

        if let Some(invalidator) = &self.invalidator {
            invalidator.invalidate(module);
        }

        let event = ModuleReloaded {
            module: module.to_string(),
            paths,
            at: Utc::now(),
        };

        let callback = self.callbacks.read().get(module).cloned();
        match callback {
            Some(callback) => match std::panic::catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(module = %module, error = %e, "reload callback failed"),
                Err(_) => error!(module = %module, "reload callback panicked"),
            },
            None => debug!(module = %module, "no reload callback registered"),
        }

        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Watches module directories and drives hot reloads.
pub struct HotReloadWatcher {
    options: WatchOptions,
    watches: HashMap<String, WatchHandle>,
    shared: Shared,
}

impl HotReloadWatcher {
    pub fn new(options: WatchOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            options,
            watches: HashMap::new(),
            shared: Shared {
                callbacks: Arc::new(RwLock::new(HashMap::new())),
                invalidator: None,
                events,
            },
        }
    }

    /// Invalidate through `invalidator` at the start of every reload.
    pub fn with_invalidator(mut self, invalidator: Arc<dyn CacheInvalidator>) -> Self {
        self.shared.invalidator = Some(invalidator);
        self
    }

    pub fn options(&self) -> WatchOptions {
        self.options
    }

    /// Start watching `path` as module `name`, replacing any existing watch
    /// for that name. Must be called inside a tokio runtime.
    pub fn watch_module(&mut self, path: &Path, name: &str) -> Result<()> {
        if !path.is_dir() {
            return Err(ModuleError::Watch {
                name: name.to_string(),
                detail: format!("{} is not a directory", path.display()),
            });
        }
        self.stop_watching(name);

        let watch_error = |e: notify::Error| ModuleError::Watch {
            name: name.to_string(),
            detail: e.to_string(),
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let mut backend = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
            // The receiver is gone once the watch stops.
            let _ = tx.send(event);
        })
        .map_err(watch_error)?;
        backend
            .watch(path, RecursiveMode::Recursive)
            .map_err(watch_error)?;

        let task = tokio::spawn(watch_loop(
            name.to_string(),
            WatchRoot::new(path),
            rx,
            self.options,
            self.shared.clone(),
        ));
        self.watches.insert(
            name.to_string(),
            WatchHandle {
                path: path.to_path_buf(),
                _backend: backend,
                task,
            },
        );
        info!(module = %name, path = %path.display(), "watching module");
        Ok(())
    }

    /// Returns `false` if `name` was not being watched.
    pub fn stop_watching(&mut self, name: &str) -> bool {
        match self.watches.remove(name) {
            Some(handle) => {
                handle.task.abort();
                info!(module = %name, path = %handle.path.display(), "stopped watching module");
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&mut self) {
        let names: Vec<String> = self.watches.keys().cloned().collect();
        for name in names {
            self.stop_watching(&name);
        }
    }

    /// Register the callback run when `name` reloads. Replaces any earlier one.
    pub fn register_reload_callback<F>(&self, name: &str, callback: F)
    where
        F: Fn(&ModuleReloaded) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.shared
            .callbacks
            .write()
            .insert(name.to_string(), Arc::new(callback));
    }

    pub fn status(&self) -> WatchStatus {
        let mut active: Vec<String> = self.watches.keys().cloned().collect();
        active.sort();
        WatchStatus {
            total: active.len(),
            active,
        }
    }

    pub fn watched_path(&self, name: &str) -> Option<&Path> {
        self.watches.get(name).map(|h| h.path.as_path())
    }

    /// Process-wide stream of completed reloads.
    pub fn subscribe(&self) -> broadcast::Receiver<ModuleReloaded> {
        self.shared.events.subscribe()
    }
}

impl Drop for HotReloadWatcher {
    fn drop(&mut self) {
        for handle in self.watches.values() {
            handle.task.abort();
        }
    }
}

async fn watch_loop(
    name: String,
    root: WatchRoot,
    mut events: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
    options: WatchOptions,
    shared: Shared,
) {
    let mut debouncer = Debouncer::new(options.debounce);

    loop {
        let deadline = debouncer.next_deadline();
        tokio::select! {
            received = events.recv() => match received {
                Some(Ok(event)) => record_event(&name, &root, &event, &mut debouncer),
                Some(Err(e)) => {
                    warn!(module = %name, path = %root.path().display(), error = %e, "watch backend error");
                }
                None => break,
            },
            _ = wait_until(deadline) => {}
        }

        let due = debouncer.take_due(Instant::now());
        if !due.is_empty() {
            let paths: Vec<PathBuf> = due.into_iter().map(|(path, _)| path).collect();
            // Callbacks may compile and map code; keep them off the async workers.
            let reloader = shared.clone();
            let module = name.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || reloader.reload(&module, paths)).await {
                warn!(module = %name, error = %e, "reload task failed");
            }
        }
    }
    debug!(module = %name, "watch task finished");
}

fn record_event(name: &str, root: &WatchRoot, event: &notify::Event, debouncer: &mut Debouncer) {
    let Some(kind) = ChangeKind::from_event(&event.kind) else {
        return;
    };
    let now = Instant::now();
    for path in event.paths.iter().filter_map(|p| root.relevant(p)) {
        debug!(module = %name, path = %path.display(), ?kind, "file change");
        debouncer.record(path, kind, now);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
