//! Entry-file discovery and static import scanning.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

/// Crates that belong to the host framework and are never reported as
/// module dependencies.
pub const FRAMEWORK_CRATES: [&str; 2] = ["tenantkit_modules", "tenantkit"];

const BUILTIN_ROOTS: [&str; 6] = ["crate", "self", "super", "std", "core", "alloc"];

static USE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?use\s+(?:::)?([A-Za-z_][A-Za-z0-9_]*)")
        .expect("static regex")
});
static EXTERN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*extern\s+crate\s+([A-Za-z_][A-Za-z0-9_]*)").expect("static regex")
});
static MOD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?mod\s+([A-Za-z_][A-Za-z0-9_]*)")
        .expect("static regex")
});

/// Entry file stems tried, in order, for a module called `name`.
pub fn entry_stems(name: &str) -> [String; 3] {
    [
        format!("{name}.module"),
        "index".to_string(),
        "module".to_string(),
    ]
}

/// Locate a module's entry file.
///
/// Each stem is tried under the module root and then under `src/`, with
/// every extension in preference order. The first existing file wins.
pub fn find_entry(name: &str, root: &Path, extensions: &[String]) -> Option<PathBuf> {
    let dirs = [root.to_path_buf(), root.join("src")];
    for stem in entry_stems(name) {
        for dir in &dirs {
            for ext in extensions {
                let candidate = dir.join(format!("{stem}.{ext}"));
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
    }
    None
}

/// Pick the Rust source to scan for an entry. Compiled entries fall back to
/// the crate's `src/lib.rs`.
pub fn scan_source(entry: &Path, root: &Path) -> Option<PathBuf> {
    if entry.extension().is_some_and(|e| e == "rs") {
        return Some(entry.to_path_buf());
    }
    [root.join("src").join("lib.rs"), root.join("lib.rs")]
        .into_iter()
        .find(|p| p.is_file())
}

/// External crates named by `use` and `extern crate` statements.
///
/// Builtin roots, framework crates and modules declared in the same file
/// (`mod foo;`) are excluded. Order follows first appearance.
pub fn external_imports(source: &str) -> Vec<String> {
    let local: Vec<&str> = MOD_RE
        .captures_iter(source)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();

    let mut found: Vec<(usize, String)> = USE_RE
        .captures_iter(source)
        .chain(EXTERN_RE.captures_iter(source))
        .filter_map(|c| c.get(1).map(|m| (m.start(), m.as_str().to_string())))
        .collect();
    found.sort_by_key(|(pos, _)| *pos);

    let mut imports = Vec::new();
    for (_, name) in found {
        if BUILTIN_ROOTS.contains(&name.as_str())
            || FRAMEWORK_CRATES.contains(&name.as_str())
            || local.contains(&name.as_str())
            || imports.contains(&name)
        {
            continue;
        }
        imports.push(name);
    }
    imports
}
