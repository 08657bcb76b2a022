//! Module dependency graph.
//!
//! Modules live in an arena addressed by [`ModuleId`]; edges are index pairs. The graph
//! is rebuilt on every build. Parsed modules are reused across builds through the
//! [`ModuleStore`].

mod asyncness;
mod builder;
mod init;
mod scc;
mod store;

pub use asyncness::classify_async;
pub use builder::GraphBuilder;
pub use init::{InitPlan, InitWrapper, WrapperKind};
pub use scc::{strongly_connected_components, Components};
pub use store::{ModuleStore, StoreStats};

use crate::parse::{ImportKind, ModuleSyntax, ParsedModule};
use rustc_hash::FxHashMap as HashMap;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Unique identifier for a module in the graph.
pub type ModuleId = usize;

/// How a module exposes its exports to importers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportKind {
    Esm,
    Cjs,
    /// CommonJS module proven to forward another module's exports.
    CjsProvenReexport,
}

/// Whether an edge is part of synchronous initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Static,
    /// `import()`: a load-time boundary.
    Dynamic,
}

impl From<ImportKind> for EdgeKind {
    fn from(kind: ImportKind) -> Self {
        if kind.is_static() {
            Self::Static
        } else {
            Self::Dynamic
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    pub importer: ModuleId,
    pub importee: ModuleId,
    pub specifier: String,
    pub kind: EdgeKind,
}

/// Where one import record of a module ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportTarget {
    Module(ModuleId),
    External(String),
    /// Only reachable under a branch condition that is statically false.
    Dropped,
}

/// A module in the dependency graph.
#[derive(Debug, Clone)]
pub struct ModuleRecord {
    pub id: ModuleId,
    /// Absolute path to the module.
    pub path: PathBuf,
    pub parsed: Arc<ParsedModule>,
    pub export_kind: ExportKind,
    /// Source byte length.
    pub size: u64,
    pub is_css: bool,
    /// Contains a top-level await.
    pub is_async: bool,
    /// Async itself or through a static dependency, cycles included.
    pub transitively_async: bool,
    /// One target per entry of `parsed.imports`, same order.
    pub targets: Vec<ImportTarget>,
    /// Static dependencies, deduplicated, in import order.
    pub dependencies: Vec<ModuleId>,
    /// Dynamically imported modules (load-time boundaries).
    pub dynamic_dependencies: Vec<ModuleId>,
    /// Set while computing the evaluation order: the initializer has started.
    pub evaluated: bool,
}

impl ModuleRecord {
    #[must_use]
    pub fn display_path(&self) -> String {
        self.path.display().to_string()
    }

    /// Target of the first import record with this specifier and kind.
    #[must_use]
    pub fn target_of(&self, specifier: &str, kind: ImportKind) -> Option<&ImportTarget> {
        self.parsed
            .imports
            .iter()
            .zip(&self.targets)
            .find(|(record, _)| record.specifier == specifier && record.kind == kind)
            .map(|(_, target)| target)
    }

    /// Module a specifier resolved to, whatever the import kind.
    #[must_use]
    pub fn resolved_module(&self, specifier: &str) -> Option<ModuleId> {
        self.parsed
            .imports
            .iter()
            .zip(&self.targets)
            .find_map(|(record, target)| match target {
                ImportTarget::Module(id) if record.specifier == specifier => Some(*id),
                _ => None,
            })
    }
}

/// The module dependency graph.
#[derive(Debug, Default)]
pub struct ModuleGraph {
    modules: Vec<ModuleRecord>,
    path_to_id: HashMap<PathBuf, ModuleId>,
    edges: Vec<DependencyEdge>,
    entries: Vec<ModuleId>,
}

impl ModuleGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module, returning its ID. `targets` and dependency lists are filled in by
    /// [`ModuleGraph::connect`].
    pub fn add(&mut self, path: PathBuf, parsed: Arc<ParsedModule>) -> ModuleId {
        let id = self.modules.len();
        let is_css = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("css"));
        let export_kind = match parsed.module_syntax {
            ModuleSyntax::Esm => ExportKind::Esm,
            ModuleSyntax::CommonJs | ModuleSyntax::None => ExportKind::Cjs,
        };
        self.path_to_id.insert(path.clone(), id);
        self.modules.push(ModuleRecord {
            id,
            size: parsed.tree.byte_len(),
            is_async: parsed.has_top_level_await,
            transitively_async: false,
            targets: Vec::new(),
            dependencies: Vec::new(),
            dynamic_dependencies: Vec::new(),
            evaluated: false,
            export_kind,
            is_css,
            path,
            parsed,
        });
        id
    }

    /// Record where each import of `id` points and derive its edges.
    pub fn connect(&mut self, id: ModuleId, targets: Vec<ImportTarget>) {
        let module = &mut self.modules[id];
        for (record, target) in module.parsed.imports.iter().zip(&targets) {
            let ImportTarget::Module(importee) = *target else {
                continue;
            };
            let kind = EdgeKind::from(record.kind);
            let list = match kind {
                EdgeKind::Static => &mut module.dependencies,
                EdgeKind::Dynamic => &mut module.dynamic_dependencies,
            };
            if !list.contains(&importee) {
                list.push(importee);
            }
            self.edges.push(DependencyEdge {
                importer: id,
                importee,
                specifier: record.specifier.clone(),
                kind,
            });
        }
        module.targets = targets;
    }

    pub fn set_entries(&mut self, entries: Vec<ModuleId>) {
        self.entries = entries;
    }

    /// Entry modules in entrypoint order.
    #[must_use]
    pub fn entries(&self) -> &[ModuleId] {
        &self.entries
    }

    #[must_use]
    pub fn get(&self, id: ModuleId) -> Option<&ModuleRecord> {
        self.modules.get(id)
    }

    pub fn get_mut(&mut self, id: ModuleId) -> Option<&mut ModuleRecord> {
        self.modules.get_mut(id)
    }

    /// Panics on an id from another graph.
    #[must_use]
    pub fn module(&self, id: ModuleId) -> &ModuleRecord {
        &self.modules[id]
    }

    #[must_use]
    pub fn id_by_path(&self, path: &Path) -> Option<ModuleId> {
        self.path_to_id.get(path).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModuleRecord> {
        self.modules.iter()
    }

    #[must_use]
    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    /// Strongly connected components of the static edge graph that form a cycle:
    /// more than one member, or a module importing itself. Members are sorted by id.
    #[must_use]
    pub fn cycles(&self) -> Vec<Vec<ModuleId>> {
        let components = strongly_connected_components(self);
        components
            .iter()
            .filter(|members| {
                members.len() > 1 || self.modules[members[0]].dependencies.contains(&members[0])
            })
            .map(|members| {
                let mut sorted = members.to_vec();
                sorted.sort_unstable();
                sorted
            })
            .collect()
    }

    /// Order in which module initializers finish: static dependencies first, in import
    /// order, depth-first from each entry, then from dynamic import targets.
    ///
    /// Sets [`ModuleRecord::evaluated`] on every module it reaches; a static edge to a
    /// module that is evaluated but not yet finished is a cyclic back reference.
    pub fn evaluation_order(&mut self) -> Vec<ModuleId> {
        for module in &mut self.modules {
            module.evaluated = false;
        }

        let mut order = Vec::with_capacity(self.modules.len());
        let mut roots: Vec<ModuleId> = self.entries.clone();
        let mut next_root = 0;

        while next_root < roots.len() {
            let root = roots[next_root];
            next_root += 1;
            if self.modules[root].evaluated {
                continue;
            }

            // (module, next dependency index)
            let mut stack = vec![(root, 0usize)];
            self.modules[root].evaluated = true;
            while let Some(frame) = stack.last_mut() {
                let (id, cursor) = *frame;
                if let Some(&dep) = self.modules[id].dependencies.get(cursor) {
                    frame.1 += 1;
                    if !self.modules[dep].evaluated {
                        self.modules[dep].evaluated = true;
                        stack.push((dep, 0));
                    }
                } else {
                    stack.pop();
                    order.push(id);
                    for &lazy in &self.modules[id].dynamic_dependencies {
                        if !roots.contains(&lazy) {
                            roots.push(lazy);
                        }
                    }
                }
            }
        }

        // Unreachable leftovers keep a stable position.
        for id in 0..self.modules.len() {
            if !self.modules[id].evaluated {
                self.modules[id].evaluated = true;
                order.push(id);
            }
        }
        order
    }
}
