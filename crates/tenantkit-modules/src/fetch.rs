//! Module fetcher: resolves a registry entry into a cached source tree.
//!
//! Resolution order:
//! 1. `${name}-${version}` already in the cache: return it as is.
//! 2. Git repository: clone (shallow when no version is requested, otherwise
//!    full clone followed by a checkout of the version), then drop `.git`.
//! 3. Local path: copy the tree, skipping dependency, VCS and build output
//!    directories.
//!
//! Transports write into a staging directory next to the cache entry, which
//! is renamed into place only after the transfer succeeds. A failed or
//! timed-out transfer is cancelled, awaited and its staging tree removed, so
//! the entry key never names a partial tree.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::ModuleCache;
use crate::error::{ModuleError, Result};
use crate::registry::{ModuleSource, RegistryEntry};

/// Default upper bound for a single clone or copy.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(300);

/// Directory names never copied out of a local module source.
pub const EXCLUDED_DIRS: [&str; 7] = ["node_modules", ".git", ".hg", ".svn", "target", "dist", "build"];

/// Moves module sources into a target directory.
///
/// Implementations must stop writing to `target` and return promptly once
/// `cancel` fires; the fetcher removes `target` right after.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Clone `url` into `target`, checking out `reference` when given.
    async fn clone_repository(
        &self,
        url: &str,
        reference: Option<&str>,
        target: &Path,
        cancel: &CancellationToken,
    ) -> io::Result<()>;

    /// Copy a local source tree into `target`.
    async fn copy_local(&self, source: &Path, target: &Path, cancel: &CancellationToken) -> io::Result<()>;
}

/// Transport backed by the `git` executable and the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct GitTransport;

#[async_trait]
impl Transport for GitTransport {
    async fn clone_repository(
        &self,
        url: &str,
        reference: Option<&str>,
        target: &Path,
        cancel: &CancellationToken,
    ) -> io::Result<()> {
        let mut clone = Command::new("git");
        clone.arg("clone").arg("--quiet");
        if reference.is_none() {
            clone.args(["--depth", "1"]);
        }
        clone.arg(url).arg(target);
        run_git(clone, cancel).await?;

        if let Some(reference) = reference {
            let mut checkout = Command::new("git");
            checkout
                .arg("-C")
                .arg(target)
                .args(["checkout", "--quiet", reference]);
            run_git(checkout, cancel).await?;
        }

        let git_dir = target.join(".git");
        if git_dir.exists() {
            tokio::fs::remove_dir_all(&git_dir).await?;
        }
        Ok(())
    }

    async fn copy_local(&self, source: &Path, target: &Path, cancel: &CancellationToken) -> io::Result<()> {
        let source = source.to_path_buf();
        let target = target.to_path_buf();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || copy_tree_until(&source, &target, &cancel).map(|_| ()))
            .await
            .map_err(io::Error::other)?
    }
}

/// Run a git command to completion, killing it if `cancel` fires first.
async fn run_git(mut command: Command, cancel: &CancellationToken) -> io::Result<()> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stderr = child.stderr.take();
    let drain = tokio::spawn(async move {
        let mut buf = String::new();
        if let Some(mut stderr) = stderr {
            let _ = stderr.read_to_string(&mut buf).await;
        }
        buf
    });

    let status = tokio::select! {
        status = child.wait() => status?,
        _ = cancel.cancelled() => {
            // `kill` also reaps, so the tree is no longer written once it returns.
            child.kill().await?;
            drain.abort();
            return Err(cancelled("git"));
        }
    };

    if status.success() {
        Ok(())
    } else {
        let stderr = drain.await.unwrap_or_default();
        Err(io::Error::other(format!(
            "git exited with {status}: {}",
            stderr.trim()
        )))
    }
}

fn cancelled(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, format!("{what} cancelled"))
}

/// Recursively copy `source` into `target`, skipping [`EXCLUDED_DIRS`].
///
/// Returns the number of files copied.
pub fn copy_tree(source: &Path, target: &Path) -> io::Result<u64> {
    copy_tree_until(source, target, &CancellationToken::new())
}

/// [`copy_tree`] that checks `cancel` before every entry.
pub fn copy_tree_until(source: &Path, target: &Path, cancel: &CancellationToken) -> io::Result<u64> {
    let mut copied = 0;
    let walker = walkdir::WalkDir::new(source)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !(e.file_type().is_dir()
                    && e.file_name()
                        .to_str()
                        .is_some_and(|n| EXCLUDED_DIRS.contains(&n)))
        });

    for entry in walker {
        if cancel.is_cancelled() {
            return Err(cancelled("copy"));
        }
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(io::Error::other)?;
        let dest = target.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &dest)?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Fetches modules into a [`ModuleCache`].
pub struct ModuleFetcher {
    cache: ModuleCache,
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl ModuleFetcher {
    pub fn new(cache: ModuleCache, transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        ModuleFetcher {
            cache,
            transport,
            timeout,
        }
    }

    pub fn cache(&self) -> &ModuleCache {
        &self.cache
    }

    /// Fetch `entry` at `version` (or the registry default) and return its cache path.
    pub async fn fetch_module(&self, entry: &RegistryEntry, version: Option<&str>) -> Result<PathBuf> {
        let name = entry.name.as_str();
        let resolved_version = version.unwrap_or(&entry.version);
        let target = self.cache.entry_dir(name, resolved_version);

        if target.is_dir() {
            debug!(module = %name, path = %target.display(), "module cache hit");
            return Ok(target);
        }

        let source = entry.source().ok_or_else(|| ModuleError::UnsupportedSource {
            name: name.to_string(),
        })?;
        if let ModuleSource::Local { path } = &source {
            if !path.is_dir() {
                return Err(ModuleError::SourceNotFound {
                    name: name.to_string(),
                    path: path.clone(),
                });
            }
        }

        tokio::fs::create_dir_all(self.cache.root()).await?;
        let staging = self.cache.staging_dir(name, resolved_version);
        let cancel = CancellationToken::new();

        let transfer = async {
            match &source {
                ModuleSource::Git { url } => {
                    info!(module = %name, %url, "cloning module");
                    self.transport
                        .clone_repository(url, version, &staging, &cancel)
                        .await
                }
                ModuleSource::Local { path } => {
                    info!(module = %name, source = %path.display(), "copying module");
                    self.transport.copy_local(path, &staging, &cancel).await
                }
            }
        };
        tokio::pin!(transfer);

        let outcome = match tokio::time::timeout(self.timeout, &mut transfer).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ModuleError::FetchFailed {
                name: name.to_string(),
                detail: e.to_string(),
            }),
            Err(_) => {
                warn!(module = %name, timeout = ?self.timeout, "fetch timed out, cancelling");
                cancel.cancel();
                let _ = transfer.await;
                Err(ModuleError::FetchTimeout {
                    name: name.to_string(),
                    timeout: self.timeout,
                })
            }
        };

        if let Err(e) = outcome {
            remove_partial(&staging).await;
            return Err(e);
        }

        match tokio::fs::rename(&staging, &target).await {
            Ok(()) => Ok(target),
            // Another fetch of the same version finished first.
            Err(_) if target.is_dir() => {
                remove_partial(&staging).await;
                Ok(target)
            }
            Err(e) => {
                remove_partial(&staging).await;
                Err(ModuleError::FetchFailed {
                    name: name.to_string(),
                    detail: format!("moving fetched tree into the cache: {e}"),
                })
            }
        }
    }
}

async fn remove_partial(staging: &Path) {
    match tokio::fs::remove_dir_all(staging).await {
        Ok(()) => debug!(path = %staging.display(), "removed partial fetch"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %staging.display(), error = %e, "failed to remove partial fetch"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::process::Command as StdCommand;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::module_manifest::ModuleDependencies;

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeed,
        FailMidway,
        Hang,
    }

    struct FakeTransport {
        calls: AtomicUsize,
        behavior: Behavior,
    }

    impl FakeTransport {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(FakeTransport {
                calls: AtomicUsize::new(0),
                behavior,
            })
        }

        fn populate(&self, target: &Path) -> io::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::fs::create_dir_all(target)?;
            std::fs::write(target.join("module.json"), br#"{"name":"m","version":"1.0.0"}"#)?;
            match self.behavior {
                Behavior::Succeed | Behavior::Hang => Ok(()),
                Behavior::FailMidway => Err(io::Error::other("connection reset")),
            }
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn clone_repository(
            &self,
            _url: &str,
            _reference: Option<&str>,
            target: &Path,
            cancel: &CancellationToken,
        ) -> io::Result<()> {
            self.populate(target)?;
            if let Behavior::Hang = self.behavior {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(3600)) => {}
                    _ = cancel.cancelled() => return Err(cancelled("clone")),
                }
            }
            Ok(())
        }

        async fn copy_local(&self, _source: &Path, target: &Path, _cancel: &CancellationToken) -> io::Result<()> {
            self.populate(target)
        }
    }

    fn git_entry(name: &str) -> RegistryEntry {
        RegistryEntry {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            description: None,
            repository: Some(format!("https://git.example.com/{name}.git")),
            path: None,
            dependencies: ModuleDependencies::default(),
            packages: BTreeMap::new(),
        }
    }

    fn local_entry(name: &str, path: &Path) -> RegistryEntry {
        let mut entry = git_entry(name);
        entry.repository = None;
        entry.path = Some(path.to_path_buf());
        entry
    }

    fn fetcher(root: &Path, transport: Arc<FakeTransport>) -> ModuleFetcher {
        ModuleFetcher::new(
            ModuleCache::new(root.to_path_buf()),
            transport,
            Duration::from_secs(5),
        )
    }

    fn git_fetcher(root: &Path, timeout: Duration) -> ModuleFetcher {
        ModuleFetcher::new(ModuleCache::new(root.to_path_buf()), Arc::new(GitTransport), timeout)
    }

    fn cache_dir_names(root: &Path) -> Vec<String> {
        match std::fs::read_dir(root) {
            Ok(entries) => entries
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = StdCommand::new("git")
            .arg("-C")
            .arg(dir)
            .args(["-c", "user.name=tenantkit", "-c", "user.email=tenantkit@example.com"])
            .args(["-c", "commit.gpgsign=false", "-c", "tag.gpgsign=false"])
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .unwrap();
        assert!(status.success(), "git {args:?} failed");
    }

    /// Repository with `module.json` at version 1.0.0 tagged `v1`, then a
    /// second commit bumping it to 2.0.0.
    fn tagged_repository() -> tempfile::TempDir {
        let repo = tempfile::tempdir().unwrap();
        git(repo.path(), &["init", "--quiet"]);
        std::fs::write(repo.path().join("module.json"), r#"{"name":"crm","version":"1.0.0"}"#).unwrap();
        git(repo.path(), &["add", "."]);
        git(repo.path(), &["commit", "--quiet", "-m", "v1"]);
        git(repo.path(), &["tag", "v1"]);
        std::fs::write(repo.path().join("module.json"), r#"{"name":"crm","version":"2.0.0"}"#).unwrap();
        git(repo.path(), &["commit", "--quiet", "-am", "v2"]);
        repo
    }

    fn file_url_entry(repo: &Path) -> RegistryEntry {
        let mut entry = git_entry("crm");
        entry.repository = Some(format!("file://{}", repo.display()));
        entry
    }

    #[tokio::test]
    async fn second_fetch_is_a_cache_hit() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new(Behavior::Succeed);
        let fetcher = fetcher(dir.path(), transport.clone());
        let entry = git_entry("m");

        let first = fetcher.fetch_module(&entry, Some("1.0.0")).await.unwrap();
        let second = fetcher.fetch_module(&entry, Some("1.0.0")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, dir.path().join("m-1.0.0"));
        assert!(first.join("module.json").is_file());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache_dir_names(dir.path()), vec!["m-1.0.0"]);
    }

    #[tokio::test]
    async fn default_version_comes_from_registry() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(dir.path(), FakeTransport::new(Behavior::Succeed));
        let path = fetcher.fetch_module(&git_entry("auth"), None).await.unwrap();
        assert_eq!(path, dir.path().join("auth-1.0.0"));
    }

    #[tokio::test]
    async fn failed_clone_leaves_no_cache_entry() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new(Behavior::FailMidway);
        let fetcher = fetcher(dir.path(), transport.clone());

        let err = fetcher
            .fetch_module(&git_entry("m"), Some("1.0.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::FetchFailed { .. }));
        assert!(cache_dir_names(dir.path()).is_empty());

        // A retry goes back to the transport instead of trusting a partial tree.
        let _ = fetcher.fetch_module(&git_entry("m"), Some("1.0.0")).await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_clone_is_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(dir.path(), FakeTransport::new(Behavior::Hang));

        let err = fetcher
            .fetch_module(&git_entry("slow"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::FetchTimeout { .. }));
        assert!(cache_dir_names(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn timed_out_local_copy_stops_and_leaves_nothing() {
        let src = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        const FILES: usize = 20_000;
        for i in 0..FILES {
            let dir = src.path().join(format!("d{:03}", i % 200));
            if i < 200 {
                std::fs::create_dir_all(&dir).unwrap();
            }
            std::fs::write(dir.join(format!("f{i}.rs")), b"// generated").unwrap();
        }
        let entry = local_entry("big", src.path());

        let err = git_fetcher(cache.path(), Duration::from_millis(20))
            .fetch_module(&entry, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::FetchTimeout { .. }));
        assert!(cache_dir_names(cache.path()).is_empty());

        // The copy was stopped, not orphaned: nothing reappears later.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(cache_dir_names(cache.path()).is_empty());

        let path = git_fetcher(cache.path(), DEFAULT_FETCH_TIMEOUT)
            .fetch_module(&entry, None)
            .await
            .unwrap();
        let copied = walkdir::WalkDir::new(&path)
            .into_iter()
            .filter(|e| e.as_ref().unwrap().file_type().is_file())
            .count();
        assert_eq!(copied, FILES);
    }

    #[test]
    fn cancelled_copy_writes_nothing() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("lib.rs"), b"").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = copy_tree_until(src.path(), &dst.path().join("out"), &cancel).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
        assert!(!dst.path().join("out").exists());
    }

    #[tokio::test]
    async fn git_fetch_at_tag_checks_out_that_version_without_metadata() {
        let repo = tagged_repository();
        let cache = tempfile::tempdir().unwrap();

        let path = git_fetcher(cache.path(), DEFAULT_FETCH_TIMEOUT)
            .fetch_module(&file_url_entry(repo.path()), Some("v1"))
            .await
            .unwrap();
        assert_eq!(path, cache.path().join("crm-v1"));
        assert!(!path.join(".git").exists());
        let manifest = std::fs::read_to_string(path.join("module.json")).unwrap();
        assert!(manifest.contains("1.0.0"));
    }

    #[tokio::test]
    async fn git_fetch_without_version_takes_the_default_branch() {
        let repo = tagged_repository();
        let cache = tempfile::tempdir().unwrap();

        let path = git_fetcher(cache.path(), DEFAULT_FETCH_TIMEOUT)
            .fetch_module(&file_url_entry(repo.path()), None)
            .await
            .unwrap();
        assert_eq!(path, cache.path().join("crm-1.0.0"));
        assert!(!path.join(".git").exists());
        let manifest = std::fs::read_to_string(path.join("module.json")).unwrap();
        assert!(manifest.contains("2.0.0"));
    }

    #[tokio::test]
    async fn git_failure_leaves_no_cache_directory() {
        let missing = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let entry = file_url_entry(&missing.path().join("no-such-repo"));

        let err = git_fetcher(cache.path(), DEFAULT_FETCH_TIMEOUT)
            .fetch_module(&entry, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::FetchFailed { .. }));
        assert!(err.to_string().contains("git exited"));
        assert!(cache_dir_names(cache.path()).is_empty());
    }

    #[tokio::test]
    async fn unknown_reference_leaves_no_cache_directory() {
        let repo = tagged_repository();
        let cache = tempfile::tempdir().unwrap();

        let err = git_fetcher(cache.path(), DEFAULT_FETCH_TIMEOUT)
            .fetch_module(&file_url_entry(repo.path()), Some("v9"))
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::FetchFailed { .. }));
        assert!(cache_dir_names(cache.path()).is_empty());
    }

    #[tokio::test]
    async fn entry_without_source_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new(Behavior::Succeed);
        let fetcher = fetcher(dir.path(), transport.clone());
        let mut entry = git_entry("bare");
        entry.repository = None;

        let err = fetcher.fetch_module(&entry, None).await.unwrap_err();
        assert!(matches!(err, ModuleError::UnsupportedSource { .. }));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_local_source_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(dir.path(), FakeTransport::new(Behavior::Succeed));
        let entry = local_entry("local", &dir.path().join("does-not-exist"));

        let err = fetcher.fetch_module(&entry, None).await.unwrap_err();
        assert!(matches!(err, ModuleError::SourceNotFound { .. }));
    }

    #[tokio::test]
    async fn local_copy_skips_excluded_directories() {
        let src = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("src")).unwrap();
        std::fs::create_dir_all(src.path().join("node_modules/dep")).unwrap();
        std::fs::create_dir_all(src.path().join("target/release")).unwrap();
        std::fs::write(src.path().join("module.json"), b"{}").unwrap();
        std::fs::write(src.path().join("src/lib.rs"), b"// lib").unwrap();
        std::fs::write(src.path().join("node_modules/dep/index.js"), b"x").unwrap();
        std::fs::write(src.path().join("target/release/libm.so"), b"x").unwrap();

        let path = git_fetcher(cache.path(), DEFAULT_FETCH_TIMEOUT)
            .fetch_module(&local_entry("local", src.path()), None)
            .await
            .unwrap();
        assert!(path.join("module.json").is_file());
        assert!(path.join("src/lib.rs").is_file());
        assert!(!path.join("node_modules").exists());
        assert!(!path.join("target").exists());
    }
}
