//! Dependency tree display.
//!
//! Renders a module's transitive module dependencies as an ASCII tree:
//! ```text
//! billing v2.1.0
//! └── crm v0.3.0
//!     ├── auth v1.0.0 (installed)
//!     └── audit (not in registry)
//! ```
//! A module reached a second time is printed once more with `(shared)` and
//! not expanded again. An edge back into the current path is `(cycle)`.

use std::collections::HashSet;

use crate::error::{ModuleError, Result};
use crate::registry::RegistryMap;

/// Format the dependency tree rooted at `name`.
pub fn format_tree(name: &str, registry: &RegistryMap, installed: &[String]) -> Result<String> {
    let root = registry.get(name).ok_or_else(|| ModuleError::ModuleNotFound {
        name: name.to_string(),
    })?;

    let mut out = format!("{} v{}{}\n", root.name, root.version, installed_marker(name, installed));
    let mut walk = Walk {
        registry,
        installed,
        path: vec![name.to_string()],
        seen: HashSet::new(),
        total: 0,
    };

    let children = &root.dependencies.modules;
    for (i, child) in children.iter().enumerate() {
        walk.format_dep(&mut out, child, "", i == children.len() - 1);
    }

    out.push_str(&format!(
        "\n{} dependencies ({} unique)\n",
        walk.total,
        walk.seen.len()
    ));
    Ok(out)
}

fn installed_marker(name: &str, installed: &[String]) -> &'static str {
    if installed.iter().any(|m| m == name) {
        " (installed)"
    } else {
        ""
    }
}

struct Walk<'a> {
    registry: &'a RegistryMap,
    installed: &'a [String],
    path: Vec<String>,
    seen: HashSet<String>,
    total: usize,
}

impl Walk<'_> {
    fn format_dep(&mut self, out: &mut String, name: &str, prefix: &str, is_last: bool) {
        let connector = if is_last { "└── " } else { "├── " };
        self.total += 1;

        if self.path.iter().any(|p| p == name) {
            out.push_str(&format!("{prefix}{connector}{name} (cycle)\n"));
            return;
        }

        let Some(entry) = self.registry.get(name) else {
            self.seen.insert(name.to_string());
            out.push_str(&format!("{prefix}{connector}{name} (not in registry)\n"));
            return;
        };

        let first_visit = self.seen.insert(name.to_string());
        let marker = installed_marker(name, self.installed);
        let shared = if first_visit { "" } else { " (shared)" };
        out.push_str(&format!(
            "{prefix}{connector}{name} v{}{marker}{shared}\n",
            entry.version
        ));
        if !first_visit {
            return;
        }

        let child_prefix = if is_last {
            format!("{prefix}    ")
        } else {
            format!("{prefix}│   ")
        };

        self.path.push(name.to_string());
        let children = &entry.dependencies.modules;
        for (i, child) in children.iter().enumerate() {
            self.format_dep(out, child, &child_prefix, i == children.len() - 1);
        }
        self.path.pop();
    }
}
