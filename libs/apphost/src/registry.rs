//! Module registry: collection, validation and dependency ordering of modules.
//!
//! Modules reach the registry either by explicit injection (`RegistryBuilder::register`,
//! declaration order preserved) or through `inventory`-submitted [`Registrator`]s
//! (`ModuleRegistry::discover_and_build`, ordered by module name).

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::sync::Arc;

use thiserror::Error;
use tracing::Level;

use crate::contracts::Module;
use crate::logging::EarlyLogBuffer;
use crate::runtime_objects::TypeKey;

/// A registered module with its resolved metadata.
#[derive(Clone)]
pub struct ModuleEntry {
    pub(crate) name: &'static str,
    pub(crate) deps: &'static [&'static str],
    pub(crate) module: Arc<dyn Module>,
}

impl ModuleEntry {
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn deps(&self) -> &'static [&'static str] {
        self.deps
    }

    #[must_use]
    pub fn module(&self) -> &Arc<dyn Module> {
        &self.module
    }
}

impl std::fmt::Debug for ModuleEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleEntry")
            .field("name", &self.name)
            .field("deps", &self.deps)
            .finish_non_exhaustive()
    }
}

/// The function type submitted by plugin crates via `inventory::submit!`.
pub struct Registrator(pub fn(&mut RegistryBuilder));

inventory::collect!(Registrator);

/// The final, topo-sorted registry.
pub struct ModuleRegistry {
    modules: Vec<ModuleEntry>, // topo-sorted
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&'static str> = self.modules.iter().map(|m| m.name).collect();
        f.debug_struct("ModuleRegistry")
            .field("modules", &names)
            .finish()
    }
}

impl ModuleRegistry {
    /// Modules in start order.
    #[must_use]
    pub fn modules(&self) -> &[ModuleEntry] {
        &self.modules
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.modules.iter().map(|m| m.name).collect()
    }

    /// Discover via inventory, have registrators fill the builder, then build & topo-sort.
    ///
    /// # Errors
    /// Returns `RegistryError` if module discovery or dependency resolution fails.
    pub fn discover_and_build() -> Result<Self, RegistryError> {
        let mut b = RegistryBuilder::default();
        for r in ::inventory::iter::<Registrator> {
            r.0(&mut b);
        }
        // Link order is not stable across builds; names are.
        b.modules.sort_by_key(|(name, _)| *name);
        let registry = b.build_topo_sorted()?;

        // No subscriber exists yet; the logging module replays this once it starts.
        EarlyLogBuffer::global().log(
            Level::INFO,
            "apphost::registry",
            format!(
                "module dependency order resolved: {}",
                registry.names().join(", ")
            ),
        );
        Ok(registry)
    }

    #[must_use]
    pub fn get_module(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.modules
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.module.clone())
    }
}

/// Collects modules; uniqueness and graph validity are enforced at build time.
#[derive(Default)]
pub struct RegistryBuilder {
    modules: Vec<(&'static str, Arc<dyn Module>)>,
    errors: Vec<String>,
}

/// Names, adjacency list (dependency -> dependent).
type DependencyGraph = (Vec<&'static str>, Vec<Vec<usize>>);

impl RegistryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module; declaration order breaks ties in the start order.
    pub fn register(&mut self, module: Arc<dyn Module>) -> &mut Self {
        let name = module.name();
        if self.modules.iter().any(|(n, _)| *n == name) {
            self.errors
                .push(format!("module '{name}' is already registered"));
        } else {
            self.modules.push((name, module));
        }
        self
    }

    /// Builder-style `register` for explicit wiring.
    #[must_use]
    pub fn with(mut self, module: Arc<dyn Module>) -> Self {
        self.register(module);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// A dependency cycle among the modules Kahn's pass left unplaced.
    ///
    /// An unplaced module still waits on an unplaced dependency, so following those
    /// dependencies from any of them has to come back to a module already on the path.
    /// The result reads `a -> b -> a`: `a` depends on `b`, which depends on `a`.
    fn cycle_among_unplaced(
        names: &[&'static str],
        adj: &[Vec<usize>],
        placed: &[bool],
    ) -> Vec<&'static str> {
        let mut waits_on = vec![None; names.len()];
        for (dep, dependents) in adj.iter().enumerate() {
            if placed[dep] {
                continue;
            }
            for &module in dependents {
                waits_on[module].get_or_insert(dep);
            }
        }

        let mut path: Vec<usize> = Vec::new();
        let mut current = placed.iter().position(|p| !p);
        while let Some(node) = current {
            if let Some(at) = path.iter().position(|&n| n == node) {
                let mut cycle: Vec<&'static str> = path[at..].iter().map(|&i| names[i]).collect();
                cycle.push(names[node]);
                return cycle;
            }
            path.push(node);
            current = waits_on[node];
        }
        path.into_iter().map(|i| names[i]).collect()
    }

    /// No capability type may be declared by two modules.
    fn validate_capabilities(&self) -> Result<(), RegistryError> {
        let mut providers: BTreeMap<TypeKey, &'static str> = BTreeMap::new();
        for &(name, ref module) in &self.modules {
            for key in module.exposed_types() {
                if let Some(&first) = providers.get(&key) {
                    if first == name {
                        continue;
                    }
                    return Err(RegistryError::DuplicateCapability {
                        type_key: key,
                        first,
                        second: name,
                    });
                }
                providers.insert(key, name);
            }
        }
        Ok(())
    }

    fn build_dependency_graph(&self) -> Result<DependencyGraph, RegistryError> {
        let names: Vec<&'static str> = self.modules.iter().map(|(n, _)| *n).collect();
        let idx: HashMap<&'static str, usize> =
            names.iter().enumerate().map(|(i, &n)| (n, i)).collect();

        let mut adj = vec![Vec::<usize>::new(); names.len()];
        for (u, (name, module)) in self.modules.iter().enumerate() {
            for &d in module.dependencies() {
                let v = *idx.get(d).ok_or_else(|| RegistryError::UnknownDependency {
                    module: (*name).to_owned(),
                    depends_on: d.to_owned(),
                })?;
                if v == u {
                    return Err(RegistryError::CycleDetected {
                        path: vec![*name, *name],
                    });
                }
                // edge d -> n (dep before module)
                adj[v].push(u);
            }
        }
        Ok((names, adj))
    }

    /// Finalize & topo-sort.
    ///
    /// Ties (modules ready at the same time) are broken by declaration order, so the same
    /// input always yields the same start order.
    ///
    /// # Errors
    /// Returns `RegistryError` on duplicate names, unknown dependencies, dependency cycles
    /// or duplicate capability declarations.
    pub fn build_topo_sorted(self) -> Result<ModuleRegistry, RegistryError> {
        if !self.errors.is_empty() {
            return Err(RegistryError::InvalidRegistryConfiguration {
                errors: self.errors,
            });
        }

        let (names, adj) = self.build_dependency_graph()?;

        // Kahn's algorithm; min-heap on declaration index for deterministic ties.
        let mut indeg = vec![0usize; names.len()];
        for adj_list in &adj {
            for &target in adj_list {
                indeg[target] += 1;
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = indeg
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(names.len());
        let mut placed = vec![false; names.len()];
        while let Some(Reverse(u)) = ready.pop() {
            order.push(u);
            placed[u] = true;
            for &w in &adj[u] {
                indeg[w] -= 1;
                if indeg[w] == 0 {
                    ready.push(Reverse(w));
                }
            }
        }

        if order.len() < names.len() {
            return Err(RegistryError::CycleDetected {
                path: Self::cycle_among_unplaced(&names, &adj, &placed),
            });
        }

        self.validate_capabilities()?;

        let entries: Vec<ModuleEntry> = order
            .into_iter()
            .map(|i| {
                let (name, module) = &self.modules[i];
                ModuleEntry {
                    name: *name,
                    deps: module.dependencies(),
                    module: module.clone(),
                }
            })
            .collect();

        Ok(ModuleRegistry { modules: entries })
    }
}

/// Configuration errors of the module set, all detected before any module starts.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("module '{module}' depends on unknown '{depends_on}'")]
    UnknownDependency { module: String, depends_on: String },
    #[error("cyclic dependency detected: {}", path.join(" -> "))]
    CycleDetected { path: Vec<&'static str> },
    #[error("capability '{type_key}' is exposed by both '{first}' and '{second}'")]
    DuplicateCapability {
        type_key: TypeKey,
        first: &'static str,
        second: &'static str,
    },
    #[error("invalid registry configuration:\n{errors:#?}")]
    InvalidRegistryConfiguration { errors: Vec<String> },
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::system::{ConfigModule, LoggingModule};
    use crate::testing::{ProbeModule, journal};

    trait Marker: Send + Sync {}
    struct Impl;
    impl Marker for Impl {}

    fn builder(mods: &[(&'static str, &'static [&'static str])]) -> RegistryBuilder {
        let j = journal();
        let mut b = RegistryBuilder::default();
        for &(name, deps) in mods {
            b.register(Arc::new(ProbeModule::new(name, deps, &j)));
        }
        b
    }

    #[test]
    fn topo_sort_happy_path() {
        let reg = builder(&[("core_b", &["core_a"]), ("core_a", &[])])
            .build_topo_sorted()
            .unwrap();
        assert_eq!(reg.names(), vec!["core_a", "core_b"]);
    }

    #[test]
    fn ties_follow_declaration_order() {
        let reg = builder(&[
            ("web", &["config"]),
            ("logging", &[]),
            ("config", &["logging"]),
            ("cdi", &["config"]),
            ("metrics", &[]),
        ])
        .build_topo_sorted()
        .unwrap();
        assert_eq!(
            reg.names(),
            vec!["logging", "config", "web", "cdi", "metrics"]
        );
    }

    #[test]
    fn unknown_dependency_error() {
        let err = builder(&[("core_a", &["missing_dep"])])
            .build_topo_sorted()
            .unwrap_err();
        match err {
            RegistryError::UnknownDependency { module, depends_on } => {
                assert_eq!(module, "core_a");
                assert_eq!(depends_on, "missing_dep");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn cyclic_dependency_detected() {
        let err = builder(&[("a", &["b"]), ("b", &["a"])])
            .build_topo_sorted()
            .unwrap_err();
        match err {
            RegistryError::CycleDetected { path } => {
                assert!(path.contains(&"a"));
                assert!(path.contains(&"b"));
                assert!(path.len() >= 3);
                assert_eq!(path.first(), path.last());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn complex_cycle_detection_with_path() {
        let err = builder(&[
            ("root", &[]),
            ("x", &["root", "z"]),
            ("y", &["x"]),
            ("z", &["y"]),
        ])
        .build_topo_sorted()
        .unwrap_err();
        let RegistryError::CycleDetected { path } = err else {
            panic!("expected cycle");
        };
        for m in ["x", "y", "z"] {
            assert!(path.contains(&m), "{m} missing from {path:?}");
        }
        assert!(!path.contains(&"root"));
        assert!(err_text(&path).contains(" -> "));
    }

    fn err_text(path: &[&'static str]) -> String {
        RegistryError::CycleDetected {
            path: path.to_vec(),
        }
        .to_string()
    }

    #[test]
    fn cycle_path_leaves_out_modules_waiting_behind_it() {
        let err = builder(&[
            ("app", &["b"]),
            ("a", &["b"]),
            ("b", &["c"]),
            ("c", &["a"]),
        ])
        .build_topo_sorted()
        .unwrap_err();
        let RegistryError::CycleDetected { path } = err else {
            panic!("expected cycle");
        };
        assert_eq!(path, vec!["b", "c", "a", "b"]);
    }

    #[test]
    fn logging_starts_before_the_modules_that_log() {
        let mut b = RegistryBuilder::default();
        b.register(Arc::new(ConfigModule::new()));
        b.register(Arc::new(LoggingModule::new().without_subscriber()));
        let reg = b.build_topo_sorted().unwrap();
        assert_eq!(reg.names(), vec!["logging", "config"]);
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let err = builder(&[("a", &["a"])]).build_topo_sorted().unwrap_err();
        assert!(matches!(err, RegistryError::CycleDetected { .. }));
    }

    #[test]
    fn duplicate_module_reported_in_configuration_errors() {
        let err = builder(&[("a", &[]), ("a", &[])])
            .build_topo_sorted()
            .unwrap_err();
        match err {
            RegistryError::InvalidRegistryConfiguration { errors } => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].contains("'a'"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn duplicate_capability_declaration_rejected() {
        let j = journal();
        let mut b = RegistryBuilder::default();
        b.register(Arc::new(
            ProbeModule::new("first", &[], &j).exposing::<dyn Marker>(Arc::new(Impl)),
        ));
        b.register(Arc::new(
            ProbeModule::new("second", &[], &j).exposing::<dyn Marker>(Arc::new(Impl)),
        ));

        match b.build_topo_sorted().unwrap_err() {
            RegistryError::DuplicateCapability {
                type_key,
                first,
                second,
            } => {
                assert_eq!(type_key, TypeKey::of::<dyn Marker>());
                assert_eq!(first, "first");
                assert_eq!(second, "second");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn module_entry_getters_work() {
        let reg = builder(&[("a", &[]), ("b", &["a"])])
            .build_topo_sorted()
            .unwrap();
        let b = &reg.modules()[1];
        assert_eq!(b.name(), "b");
        assert_eq!(b.deps(), &["a"]);
        assert_eq!(b.module().name(), "b");
        assert!(reg.get_module("a").is_some());
        assert!(reg.get_module("zzz").is_none());
    }
}
