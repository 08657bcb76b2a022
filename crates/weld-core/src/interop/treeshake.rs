//! Export usage analysis.
//!
//! Entry modules keep their whole export surface. Every other export is kept only if
//! some import asks for it by name, directly or through a chain of re-exports. Anything
//! that reads a module as an object (`import * as`, `require`, `import()`) keeps all
//! of it, as does every CommonJS module, whose exports object is dynamic.

use super::InteropAnalysis;
use crate::graph::{ImportTarget, ModuleGraph, ModuleId};
use crate::parse::{ExportBinding, ImportKind, ModuleSyntax};
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use serde::Serialize;
use std::collections::VecDeque;
use tracing::debug;

#[derive(Debug, Clone)]
enum Demand {
    All,
    Name(String),
}

/// Which exports of each module are used.
#[derive(Debug, Default)]
pub struct UsedExports {
    /// `None`: every export is used.
    used: HashMap<ModuleId, Option<HashSet<String>>>,
}

/// Exports of one module that nothing uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnusedExports {
    pub module: String,
    pub exports: Vec<String>,
}

impl UsedExports {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Propagate demands from the entries through every import of the graph.
    #[must_use]
    pub fn analyze(graph: &ModuleGraph, interop: &InteropAnalysis) -> Self {
        let mut used = Self::new();
        let mut queue: VecDeque<(ModuleId, Demand)> = VecDeque::new();

        for &entry in graph.entries() {
            queue.push_back((interop.canonical(entry), Demand::All));
        }
        for module in graph.iter() {
            for (record, target) in module.parsed.imports.iter().zip(&module.targets) {
                let ImportTarget::Module(target) = *target else {
                    continue;
                };
                let target = interop.canonical(target);
                match record.kind {
                    // Followed when the re-exported name is demanded.
                    ImportKind::ReExport | ImportKind::CssImport => {}
                    ImportKind::Dynamic | ImportKind::Require => {
                        queue.push_back((target, Demand::All));
                    }
                    ImportKind::Static if record.namespace => {
                        queue.push_back((target, Demand::All));
                    }
                    ImportKind::Static => {
                        for name in &record.names {
                            queue.push_back((target, Demand::Name(name.imported.clone())));
                        }
                    }
                }
            }
        }

        while let Some((module, demand)) = queue.pop_front() {
            let Some(record) = graph.get(module) else {
                continue;
            };
            if record.parsed.module_syntax != ModuleSyntax::Esm {
                used.mark_all_used(module);
                continue;
            }
            match demand {
                Demand::All => {
                    if !used.mark_all_used(module) {
                        continue;
                    }
                    for export in &record.parsed.exports {
                        forward(graph, interop, module, export, None, &mut queue);
                    }
                }
                Demand::Name(name) => {
                    if !used.mark_used(module, &name) {
                        continue;
                    }
                    let mut found = false;
                    for export in &record.parsed.exports {
                        if export.name() == Some(name.as_str()) {
                            found = true;
                            forward(graph, interop, module, export, None, &mut queue);
                        }
                    }
                    if !found && name != "default" {
                        for export in &record.parsed.exports {
                            if matches!(export, ExportBinding::Star { .. }) {
                                forward(graph, interop, module, export, Some(&name), &mut queue);
                            }
                        }
                    }
                }
            }
        }

        debug!(modules = used.used.len(), "analyzed export usage");
        used
    }

    /// Returns false if everything was already used.
    pub fn mark_all_used(&mut self, module: ModuleId) -> bool {
        !matches!(self.used.insert(module, None), Some(None))
    }

    /// Returns false if the name was already used.
    pub fn mark_used(&mut self, module: ModuleId, name: &str) -> bool {
        match self
            .used
            .entry(module)
            .or_insert_with(|| Some(HashSet::default()))
        {
            Some(names) => names.insert(name.to_string()),
            None => false,
        }
    }

    #[must_use]
    pub fn is_used(&self, module: ModuleId, name: &str) -> bool {
        match self.used.get(&module) {
            Some(None) => true,
            Some(Some(names)) => names.contains(name),
            None => false,
        }
    }

    /// Named exports of ESM modules that nothing uses, in module order.
    #[must_use]
    pub fn unused(&self, graph: &ModuleGraph) -> Vec<UnusedExports> {
        graph
            .iter()
            .filter(|module| module.parsed.module_syntax == ModuleSyntax::Esm)
            .filter_map(|module| {
                let mut exports: Vec<String> = module
                    .parsed
                    .exports
                    .iter()
                    .filter_map(ExportBinding::name)
                    .filter(|name| !self.is_used(module.id, name))
                    .map(str::to_string)
                    .collect();
                exports.dedup();
                (!exports.is_empty()).then(|| UnusedExports {
                    module: module.display_path(),
                    exports,
                })
            })
            .collect()
    }
}

/// Queue the demand a used export places on the module it comes from.
fn forward(
    graph: &ModuleGraph,
    interop: &InteropAnalysis,
    module: ModuleId,
    export: &ExportBinding,
    star_name: Option<&str>,
    queue: &mut VecDeque<(ModuleId, Demand)>,
) {
    let record = graph.module(module);
    match export {
        ExportBinding::Local { .. } => {}
        ExportBinding::ReExport {
            imported,
            specifier,
            ..
        } => {
            if let Some(source) = record.resolved_module(specifier) {
                let demand = if imported == "*" {
                    Demand::All
                } else {
                    Demand::Name(imported.clone())
                };
                queue.push_back((interop.canonical(source), demand));
            }
        }
        ExportBinding::Star { specifier } => {
            if let Some(source) = record.resolved_module(specifier) {
                let demand = star_name.map_or(Demand::All, |name| Demand::Name(name.to_string()));
                queue.push_back((interop.canonical(source), demand));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFileSystem;
    use crate::graph::{GraphBuilder, ModuleStore};
    use crate::interop::{analyze, Defines};
    use crate::parse::ScanParser;
    use crate::resolver::{Resolver, ResolverConfig};
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    fn shake(files: &[(&str, &str)]) -> (ModuleGraph, UsedExports) {
        let fs = Arc::new(MemoryFileSystem::new());
        for (path, source) in files {
            fs.write_file(path, source);
        }
        let resolver = Resolver::new(fs, ResolverConfig::default());
        let store = ModuleStore::new();
        let defines = Defines::new(&BTreeMap::new());
        let graph = GraphBuilder::new(&resolver, &store, &ScanParser, &defines, &[])
            .build(&[PathBuf::from(files[0].0)])
            .unwrap();
        let interop = analyze(&graph, &defines);
        let used = UsedExports::analyze(&graph, &interop);
        (graph, used)
    }

    fn id(graph: &ModuleGraph, path: &str) -> ModuleId {
        graph.id_by_path(Path::new(path)).unwrap()
    }

    #[test]
    fn test_unimported_export_is_unused() {
        let (graph, used) = shake(&[
            ("/app/main.js", "import { a } from './lib.js';\nexport const entry = a;"),
            ("/app/lib.js", "export const a = 1;\nexport const b = 2;"),
        ]);
        let lib = id(&graph, "/app/lib.js");
        assert!(used.is_used(lib, "a"));
        assert!(!used.is_used(lib, "b"));
        assert!(used.is_used(id(&graph, "/app/main.js"), "entry"));
        assert_eq!(
            used.unused(&graph),
            vec![UnusedExports {
                module: "/app/lib.js".into(),
                exports: vec!["b".into()]
            }]
        );
    }

    #[test]
    fn test_reexport_traced_to_source() {
        let (graph, used) = shake(&[
            ("/app/main.js", "import { x } from './barrel.js';"),
            ("/app/barrel.js", "export { x, y } from './impl.js';\nexport * from './star.js';"),
            ("/app/impl.js", "export const x = 1;\nexport const y = 2;"),
            ("/app/star.js", "export const z = 3;"),
        ]);
        let imp = id(&graph, "/app/impl.js");
        assert!(used.is_used(imp, "x"));
        assert!(!used.is_used(imp, "y"));
        assert!(!used.is_used(id(&graph, "/app/star.js"), "z"));
    }

    #[test]
    fn test_name_found_through_star() {
        let (graph, used) = shake(&[
            ("/app/main.js", "import { z } from './barrel.js';"),
            ("/app/barrel.js", "export * from './star.js';"),
            ("/app/star.js", "export const z = 3;\nexport const w = 4;"),
        ]);
        let star = id(&graph, "/app/star.js");
        assert!(used.is_used(star, "z"));
        assert!(!used.is_used(star, "w"));
    }

    #[test]
    fn test_namespace_and_dynamic_keep_everything() {
        let (graph, used) = shake(&[
            (
                "/app/main.js",
                "import * as ns from './ns.js';\nconst lazy = import('./lazy.js');",
            ),
            ("/app/ns.js", "export const a = 1;\nexport const b = 2;"),
            ("/app/lazy.js", "export const c = 1;"),
        ]);
        assert!(used.is_used(id(&graph, "/app/ns.js"), "b"));
        assert!(used.is_used(id(&graph, "/app/lazy.js"), "c"));
        assert!(used.unused(&graph).is_empty());
    }

    #[test]
    fn test_commonjs_modules_are_kept_whole() {
        let (graph, used) = shake(&[
            ("/app/main.js", "import { a } from './cjs.js';"),
            ("/app/cjs.js", "exports.a = 1;\nexports.b = 2;"),
        ]);
        assert!(used.is_used(id(&graph, "/app/cjs.js"), "b"));
        assert!(used.unused(&graph).is_empty());
    }

    #[test]
    fn test_proven_reexport_forwards_named_demand() {
        let (graph, used) = shake(&[
            ("/app/main.js", "import { a } from './wrapper.js';"),
            ("/app/wrapper.js", "module.exports = require('./impl.js');"),
            ("/app/impl.js", "export const a = 1;\nexport const b = 2;"),
        ]);
        // The wrapper's own require reads the whole target.
        assert!(used.is_used(id(&graph, "/app/impl.js"), "b"));
    }
}
