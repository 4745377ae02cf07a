//! Dependency graph checks over registered modules.
//!
//! The graph is read lazily from the registry: an edge `a -> b` exists when
//! `a` lists `b` in `dependencies.modules`. Names that the registry does not
//! know are treated as leaves.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::error::{ModuleError, Result};
use crate::project_manifest::InstalledModuleRecord;
use crate::registry::RegistryMap;

/// Outcome of checking whether a module can be installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyReport {
    pub module: String,
    /// False when the module is absent from the registry.
    pub found: bool,
    pub valid: bool,
    /// Direct dependencies that are not installed, in declaration order.
    pub missing_modules: Vec<String>,
    pub circular_dependency: bool,
    /// Members of the first cycle reached from the module, starting at the
    /// node that closes it. A self-dependency yields a chain of one.
    pub dependency_chain: Vec<String>,
}

impl DependencyReport {
    /// Convert a failing report into the matching error.
    pub fn into_result(self) -> Result<DependencyReport> {
        if !self.found {
            return Err(ModuleError::ModuleNotFound { name: self.module });
        }
        if self.circular_dependency {
            return Err(ModuleError::CircularDependency {
                name: self.module,
                chain: self.dependency_chain,
            });
        }
        if !self.missing_modules.is_empty() {
            return Err(ModuleError::MissingDependencies {
                name: self.module,
                missing: self.missing_modules,
            });
        }
        Ok(self)
    }
}

/// Transitive closure of a module's requirements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitiveDependencies {
    /// Every module required directly or indirectly, dependencies first.
    pub modules: Vec<String>,
    /// Union of package requirements across the closure, the root included.
    pub packages: BTreeMap<String, String>,
}

/// Checks module installability against a registry and an installed set.
pub struct DependencyChecker<'a> {
    registry: &'a RegistryMap,
    installed: BTreeSet<String>,
}

impl<'a> DependencyChecker<'a> {
    pub fn new<I, S>(registry: &'a RegistryMap, installed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DependencyChecker {
            registry,
            installed: installed.into_iter().map(Into::into).collect(),
        }
    }

    /// Check missing direct dependencies and cycles for `name`.
    pub fn check(&self, name: &str) -> DependencyReport {
        let Some(entry) = self.registry.get(name) else {
            return DependencyReport {
                module: name.to_string(),
                found: false,
                valid: false,
                missing_modules: Vec::new(),
                circular_dependency: false,
                dependency_chain: Vec::new(),
            };
        };

        let mut missing_modules = Vec::new();
        for dep in &entry.dependencies.modules {
            if !self.installed.contains(dep) && !missing_modules.contains(dep) {
                missing_modules.push(dep.clone());
            }
        }

        let dependency_chain = self.find_cycle(name).unwrap_or_default();
        let circular_dependency = !dependency_chain.is_empty();

        DependencyReport {
            module: name.to_string(),
            found: true,
            valid: missing_modules.is_empty() && !circular_dependency,
            missing_modules,
            circular_dependency,
            dependency_chain,
        }
    }

    /// Depth-first search for a cycle reachable from `start`.
    fn find_cycle(&self, start: &str) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut path = Vec::new();

        fn dfs<'g>(
            registry: &'g RegistryMap,
            node: &'g str,
            visited: &mut HashSet<&'g str>,
            path: &mut Vec<&'g str>,
        ) -> Option<Vec<String>> {
            if let Some(pos) = path.iter().position(|n| *n == node) {
                return Some(path[pos..].iter().map(|n| n.to_string()).collect());
            }
            if !visited.insert(node) {
                return None;
            }

            path.push(node);
            if let Some(entry) = registry.get(node) {
                for dep in &entry.dependencies.modules {
                    if let Some(chain) = dfs(registry, dep, visited, path) {
                        return Some(chain);
                    }
                }
            }
            path.pop();
            None
        }

        let start = self.registry.get_key_value(start)?.0.as_str();
        dfs(self.registry, start, &mut visited, &mut path)
    }

    /// Collect every module `name` requires, directly or transitively.
    pub fn all_dependencies(&self, name: &str) -> Result<TransitiveDependencies> {
        let entry = self
            .registry
            .get(name)
            .ok_or_else(|| ModuleError::ModuleNotFound {
                name: name.to_string(),
            })?;

        let mut visited = HashSet::new();
        visited.insert(name.to_string());
        let mut result = TransitiveDependencies {
            modules: Vec::new(),
            packages: entry.packages.clone(),
        };

        for dep in &entry.dependencies.modules {
            self.collect(dep, &mut visited, &mut result);
        }
        Ok(result)
    }

    fn collect(&self, name: &str, visited: &mut HashSet<String>, out: &mut TransitiveDependencies) {
        if !visited.insert(name.to_string()) {
            return;
        }
        if let Some(entry) = self.registry.get(name) {
            for dep in &entry.dependencies.modules {
                self.collect(dep, visited, out);
            }
            out.packages
                .extend(entry.packages.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        out.modules.push(name.to_string());
    }

    /// Installed modules that list `name` as a module dependency.
    ///
    /// A module's install record decides what it depends on. Modules listed
    /// as installed without a record fall back to their registry entry.
    pub fn dependents_of(
        &self,
        name: &str,
        records: &BTreeMap<String, InstalledModuleRecord>,
    ) -> Vec<String> {
        self.installed
            .iter()
            .filter(|installed| installed.as_str() != name)
            .filter(|installed| {
                let declared = match records.get(installed.as_str()) {
                    Some(record) => Some(&record.dependencies.modules),
                    None => self
                        .registry
                        .get(installed.as_str())
                        .map(|e| &e.dependencies.modules),
                };
                declared.is_some_and(|modules| modules.iter().any(|d| d == name))
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module_manifest::ModuleDependencies;
    use crate::registry::RegistryEntry;

    fn entry(name: &str, deps: &[&str]) -> RegistryEntry {
        RegistryEntry {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            description: None,
            repository: None,
            path: None,
            dependencies: ModuleDependencies {
                system: Vec::new(),
                modules: deps.iter().map(|d| d.to_string()).collect(),
            },
            packages: BTreeMap::new(),
        }
    }

    fn registry(entries: &[(&str, &[&str])]) -> RegistryMap {
        entries
            .iter()
            .map(|(name, deps)| (name.to_string(), entry(name, deps)))
            .collect()
    }

    #[test]
    fn crm_requires_auth_until_installed() {
        let reg = registry(&[("auth", &[]), ("crm", &["auth"])]);

        let report = DependencyChecker::new(&reg, Vec::<String>::new()).check("crm");
        assert!(!report.valid);
        assert_eq!(report.missing_modules, vec!["auth"]);
        assert!(!report.circular_dependency);

        let report = DependencyChecker::new(&reg, ["auth"]).check("crm");
        assert!(report.valid);
        assert!(report.missing_modules.is_empty());
        assert!(!report.circular_dependency);
    }

    #[test]
    fn only_uninstalled_dependencies_are_missing() {
        let reg = registry(&[("x", &[]), ("y", &[]), ("m", &["x", "y"])]);
        let report = DependencyChecker::new(&reg, ["x"]).check("m");
        assert_eq!(report.missing_modules, vec!["y"]);
    }

    #[test]
    fn dag_has_no_cycle_from_any_module() {
        let reg = registry(&[
            ("base", &[]),
            ("auth", &["base"]),
            ("crm", &["auth", "base"]),
            ("billing", &["crm", "auth"]),
        ]);
        let checker = DependencyChecker::new(&reg, ["base", "auth", "crm", "billing"]);
        for name in reg.keys() {
            let report = checker.check(name);
            assert!(!report.circular_dependency, "{name} reported a cycle");
            assert!(report.valid);
        }
    }

    #[test]
    fn two_node_cycle_reports_both_members() {
        let reg = registry(&[("a", &["b"]), ("b", &["a"])]);
        let report = DependencyChecker::new(&reg, ["a", "b"]).check("a");
        assert!(report.circular_dependency);
        assert!(!report.valid);
        assert!(report.dependency_chain.contains(&"a".to_string()));
        assert!(report.dependency_chain.contains(&"b".to_string()));
    }

    #[test]
    fn cycle_downstream_of_module_is_reported() {
        let reg = registry(&[("top", &["b"]), ("b", &["c"]), ("c", &["b"])]);
        let report = DependencyChecker::new(&reg, ["b", "c"]).check("top");
        assert!(report.circular_dependency);
        assert_eq!(report.dependency_chain, vec!["b", "c"]);
    }

    #[test]
    fn self_dependency_is_cycle_of_one() {
        let reg = registry(&[("loop", &["loop"])]);
        let report = DependencyChecker::new(&reg, Vec::<String>::new()).check("loop");
        assert!(report.circular_dependency);
        assert_eq!(report.dependency_chain, vec!["loop"]);
    }

    #[test]
    fn unknown_module_is_not_found() {
        let reg = registry(&[("auth", &[])]);
        let report = DependencyChecker::new(&reg, Vec::<String>::new()).check("ghost");
        assert!(!report.found);
        assert!(!report.valid);
        assert!(report.missing_modules.is_empty());
        assert!(matches!(
            report.into_result(),
            Err(ModuleError::ModuleNotFound { .. })
        ));
    }

    #[test]
    fn into_result_prefers_cycle_over_missing() {
        let reg = registry(&[("a", &["b"]), ("b", &["a"])]);
        let report = DependencyChecker::new(&reg, Vec::<String>::new()).check("a");
        assert!(matches!(
            report.into_result(),
            Err(ModuleError::CircularDependency { .. })
        ));
    }

    #[test]
    fn transitive_closure_lists_dependencies_first() {
        let mut reg = registry(&[
            ("base", &[]),
            ("auth", &["base"]),
            ("crm", &["auth", "base"]),
        ]);
        reg.get_mut("base")
            .unwrap()
            .packages
            .insert("uuid".to_string(), "1".to_string());
        reg.get_mut("crm")
            .unwrap()
            .packages
            .insert("serde".to_string(), "1".to_string());

        let deps = DependencyChecker::new(&reg, Vec::<String>::new())
            .all_dependencies("crm")
            .unwrap();
        assert_eq!(deps.modules, vec!["base", "auth"]);
        assert_eq!(deps.packages.len(), 2);
    }

    #[test]
    fn transitive_closure_terminates_on_cycles() {
        let reg = registry(&[("a", &["b"]), ("b", &["a"])]);
        let deps = DependencyChecker::new(&reg, Vec::<String>::new())
            .all_dependencies("a")
            .unwrap();
        assert_eq!(deps.modules, vec!["b"]);
    }

    #[test]
    fn dependents_only_counts_installed_modules() {
        let reg = registry(&[("auth", &[]), ("crm", &["auth"]), ("billing", &["auth"])]);
        let checker = DependencyChecker::new(&reg, ["auth", "crm"]);
        let records = BTreeMap::new();
        assert_eq!(checker.dependents_of("auth", &records), vec!["crm"]);
        assert!(checker.dependents_of("crm", &records).is_empty());
    }

    #[test]
    fn install_records_take_precedence_over_registry() {
        // The registry no longer says crm needs auth, but the installed copy does.
        let reg = registry(&[("auth", &[]), ("crm", &[]), ("billing", &["auth"])]);
        let mut records = BTreeMap::new();
        records.insert(
            "crm".to_string(),
            InstalledModuleRecord {
                name: "crm".to_string(),
                version: "0.3.0".to_string(),
                install_path: "src/modules/crm".into(),
                dependencies: ModuleDependencies {
                    system: Vec::new(),
                    modules: vec!["auth".to_string()],
                },
            },
        );
        let checker = DependencyChecker::new(&reg, ["auth", "crm", "billing"]);
        assert_eq!(checker.dependents_of("auth", &records), vec!["billing", "crm"]);
    }
}
