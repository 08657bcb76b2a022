//! Export shapes and import bindings.
//!
//! A CommonJS module whose whole body is `module.exports = require('x')` is a proven
//! re-export of `x`: importers link straight to `x` (or to the end of a chain of such
//! modules). Branches whose condition the defines decide are pruned first; when more
//! than one candidate survives the module stays a wrapper and every candidate stays
//! reachable.
//!
//! Named imports from ESM bind directly to the exporting module. Named imports from
//! CommonJS go through a live getter on the exports object, so later mutation of
//! `module.exports` stays visible.

use super::Defines;
use crate::graph::{ExportKind, ImportTarget, ModuleGraph, ModuleId, ModuleRecord};
use crate::parse::{CommonJsForm, ExportBinding, ImportKind, ModuleSyntax};
use serde::Serialize;
use tracing::debug;

/// Whether a CommonJS module forwards another module's exports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "targets", rename_all = "snake_case")]
pub enum CjsReexport {
    None,
    /// Statically exactly one target.
    Proven(ModuleId),
    /// Depends on a runtime condition; all candidates stay reachable.
    Ambiguous(Vec<ModuleId>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportShape {
    /// Static export names, plus the modules of `export * from`.
    Esm {
        names: Vec<String>,
        star_from: Vec<ModuleId>,
    },
    /// A dynamic exports object. `names` are the properties assigned statically.
    CommonJs { names: Vec<String> },
    /// Replaced by the final target of a proven re-export chain.
    ProvenReexport { target: ModuleId },
}

/// What a named import is linked to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    Direct { module: ModuleId, export: String },
    /// Property read through the CommonJS exports object on every access.
    LiveGetter { module: ModuleId, export: String },
    Namespace { module: ModuleId },
    External { specifier: String, export: String },
}

#[derive(Debug, Clone, Default)]
pub struct InteropAnalysis {
    reexports: Vec<CjsReexport>,
    canonical: Vec<ModuleId>,
    shapes: Vec<ExportShape>,
}

/// Classify every module of `graph`.
#[must_use]
pub fn analyze(graph: &ModuleGraph, defines: &Defines) -> InteropAnalysis {
    let reexports: Vec<CjsReexport> = graph
        .iter()
        .map(|module| classify_reexport(module, defines))
        .collect();
    let canonical: Vec<ModuleId> = (0..graph.len())
        .map(|id| collapse_chain(&reexports, id))
        .collect();
    let shapes = graph
        .iter()
        .map(|module| match reexports[module.id] {
            CjsReexport::Proven(_) if canonical[module.id] != module.id => {
                ExportShape::ProvenReexport {
                    target: canonical[module.id],
                }
            }
            _ => shape_of(module),
        })
        .collect();

    let proven = reexports
        .iter()
        .filter(|r| matches!(r, CjsReexport::Proven(_)))
        .count();
    if proven > 0 {
        debug!(proven, "collapsed CommonJS re-exports");
    }

    InteropAnalysis {
        reexports,
        canonical,
        shapes,
    }
}

fn classify_reexport(module: &ModuleRecord, defines: &Defines) -> CjsReexport {
    if module.parsed.module_syntax != ModuleSyntax::CommonJs {
        return CjsReexport::None;
    }
    let mut specifiers = Vec::new();
    let mut opaque = false;
    live_branches(&module.parsed.commonjs, defines, &mut specifiers, &mut opaque);

    let mut candidates: Vec<ModuleId> = Vec::new();
    for specifier in &specifiers {
        match module.target_of(specifier, ImportKind::Require) {
            Some(ImportTarget::Module(target)) if *target != module.id => {
                if !candidates.contains(target) {
                    candidates.push(*target);
                }
            }
            // Externals and self references cannot be linked through.
            _ => opaque = true,
        }
    }

    match candidates.as_slice() {
        [] => CjsReexport::None,
        [single] if !opaque => CjsReexport::Proven(*single),
        _ => CjsReexport::Ambiguous(candidates),
    }
}

/// Collect the forwarded specifiers of the branches that can run.
fn live_branches(form: &CommonJsForm, defines: &Defines, out: &mut Vec<String>, opaque: &mut bool) {
    match form {
        CommonJsForm::Opaque => *opaque = true,
        CommonJsForm::Reexport { specifier } => out.push(specifier.clone()),
        CommonJsForm::Conditional {
            condition,
            consequent,
            alternate,
        } => match defines.evaluate(condition) {
            Some(true) => live_branches(consequent, defines, out, opaque),
            Some(false) => live_branches(alternate, defines, out, opaque),
            None => {
                live_branches(consequent, defines, out, opaque);
                live_branches(alternate, defines, out, opaque);
            }
        },
    }
}

/// Final target of a proven chain; a module on a proven cycle is its own target.
fn collapse_chain(reexports: &[CjsReexport], start: ModuleId) -> ModuleId {
    let mut current = start;
    for _ in 0..reexports.len() {
        match reexports[current] {
            CjsReexport::Proven(next) if next == start => return start,
            CjsReexport::Proven(next) => current = next,
            _ => return current,
        }
    }
    start
}

fn shape_of(module: &ModuleRecord) -> ExportShape {
    let mut names: Vec<String> = Vec::new();
    for name in module.parsed.exports.iter().filter_map(ExportBinding::name) {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    match module.parsed.module_syntax {
        ModuleSyntax::Esm => {
            let star_from = module
                .parsed
                .exports
                .iter()
                .filter_map(|export| match export {
                    ExportBinding::Star { specifier } => module.resolved_module(specifier),
                    _ => None,
                })
                .collect();
            ExportShape::Esm { names, star_from }
        }
        ModuleSyntax::CommonJs | ModuleSyntax::None => ExportShape::CommonJs { names },
    }
}

impl InteropAnalysis {
    #[must_use]
    pub fn reexport(&self, module: ModuleId) -> &CjsReexport {
        &self.reexports[module]
    }

    #[must_use]
    pub fn shape(&self, module: ModuleId) -> &ExportShape {
        &self.shapes[module]
    }

    /// The module importers of `module` are linked to.
    #[must_use]
    pub fn canonical(&self, module: ModuleId) -> ModuleId {
        self.canonical[module]
    }

    /// A proven reexport that resolves back to itself (a reexport cycle) is plain CJS.
    #[must_use]
    pub fn export_kind(&self, graph: &ModuleGraph, module: ModuleId) -> ExportKind {
        match (&self.reexports[module], graph.module(module).parsed.module_syntax) {
            (CjsReexport::Proven(_), _) if self.canonical(module) != module => {
                ExportKind::CjsProvenReexport
            }
            (_, ModuleSyntax::Esm) => ExportKind::Esm,
            _ => ExportKind::Cjs,
        }
    }

    /// Record the export kinds on the graph.
    pub fn apply(&self, graph: &mut ModuleGraph) {
        for id in 0..graph.len() {
            let kind = self.export_kind(graph, id);
            if let Some(module) = graph.get_mut(id) {
                module.export_kind = kind;
            }
        }
    }

    /// Binding for `imported` through the `record`-th import of `importer`.
    /// `None` for imports dropped as dead.
    #[must_use]
    pub fn bind(
        &self,
        graph: &ModuleGraph,
        importer: ModuleId,
        record: usize,
        imported: &str,
    ) -> Option<Binding> {
        let module = graph.module(importer);
        match module.targets.get(record)? {
            ImportTarget::Module(target) => {
                Some(self.bind_export(graph, *target, imported, &mut Vec::new()))
            }
            ImportTarget::External(specifier) => Some(Binding::External {
                specifier: specifier.clone(),
                export: imported.to_string(),
            }),
            ImportTarget::Dropped => None,
        }
    }

    fn bind_export(
        &self,
        graph: &ModuleGraph,
        target: ModuleId,
        name: &str,
        visited: &mut Vec<(ModuleId, String)>,
    ) -> Binding {
        let module_id = self.canonical(target);
        if name == "*" {
            return Binding::Namespace { module: module_id };
        }
        let module = graph.module(module_id);
        if module.parsed.module_syntax != ModuleSyntax::Esm {
            return Binding::LiveGetter {
                module: module_id,
                export: name.to_string(),
            };
        }
        let direct = Binding::Direct {
            module: module_id,
            export: name.to_string(),
        };
        if visited.iter().any(|(m, n)| *m == module_id && n == name) {
            return direct;
        }
        visited.push((module_id, name.to_string()));
        self.find_export(graph, module, name, visited)
            .unwrap_or(direct)
    }

    fn find_export(
        &self,
        graph: &ModuleGraph,
        module: &ModuleRecord,
        name: &str,
        visited: &mut Vec<(ModuleId, String)>,
    ) -> Option<Binding> {
        for export in &module.parsed.exports {
            match export {
                ExportBinding::Local { name: exported, .. } if exported == name => {
                    return Some(Binding::Direct {
                        module: module.id,
                        export: name.to_string(),
                    });
                }
                ExportBinding::ReExport {
                    name: exported,
                    imported,
                    specifier,
                } if exported == name => {
                    return Some(match module.resolved_module(specifier) {
                        Some(source) => self.bind_export(graph, source, imported, visited),
                        None => Binding::External {
                            specifier: specifier.clone(),
                            export: imported.clone(),
                        },
                    });
                }
                _ => {}
            }
        }

        // `export *` never forwards `default`.
        if name == "default" {
            return None;
        }
        let mut dynamic = None;
        for export in &module.parsed.exports {
            let ExportBinding::Star { specifier } = export else {
                continue;
            };
            let Some(source) = module.resolved_module(specifier) else {
                continue;
            };
            let source = self.canonical(source);
            let source_module = graph.module(source);
            if source_module.parsed.module_syntax != ModuleSyntax::Esm {
                dynamic.get_or_insert(Binding::LiveGetter {
                    module: source,
                    export: name.to_string(),
                });
                continue;
            }
            if visited.iter().any(|(m, n)| *m == source && n == name) {
                continue;
            }
            visited.push((source, name.to_string()));
            if let Some(binding) = self.find_export(graph, source_module, name, visited) {
                return Some(binding);
            }
        }
        dynamic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFileSystem;
    use crate::graph::{GraphBuilder, ModuleStore};
    use crate::parse::ScanParser;
    use crate::resolver::{Resolver, ResolverConfig};
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    fn build(files: &[(&str, &str)], define: &[(&str, &str)]) -> (ModuleGraph, InteropAnalysis) {
        let fs = Arc::new(MemoryFileSystem::new());
        for (path, source) in files {
            fs.write_file(path, source);
        }
        let resolver = Resolver::new(fs, ResolverConfig::default());
        let store = ModuleStore::new();
        let raw: BTreeMap<String, String> = define
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let defines = Defines::new(&raw);
        let mut graph = GraphBuilder::new(&resolver, &store, &ScanParser, &defines, &[])
            .build(&[PathBuf::from(files[0].0)])
            .unwrap();
        let analysis = analyze(&graph, &defines);
        analysis.apply(&mut graph);
        (graph, analysis)
    }

    fn id(graph: &ModuleGraph, path: &str) -> ModuleId {
        graph.id_by_path(Path::new(path)).unwrap()
    }

    #[test]
    fn test_proven_reexport_links_to_target() {
        let (graph, analysis) = build(
            &[
                ("/app/main.js", "import { foo } from './wrapper.js';"),
                ("/app/wrapper.js", "module.exports = require('./impl.js');"),
                ("/app/impl.js", "export const foo = 1;"),
            ],
            &[],
        );
        let (main, wrapper, imp) = (
            id(&graph, "/app/main.js"),
            id(&graph, "/app/wrapper.js"),
            id(&graph, "/app/impl.js"),
        );
        assert_eq!(analysis.reexport(wrapper), &CjsReexport::Proven(imp));
        assert_eq!(graph.module(wrapper).export_kind, ExportKind::CjsProvenReexport);
        assert_eq!(
            analysis.bind(&graph, main, 0, "foo"),
            Some(Binding::Direct {
                module: imp,
                export: "foo".into()
            })
        );
    }

    #[test]
    fn test_proven_chain_collapses_to_last_module() {
        let (graph, analysis) = build(
            &[
                ("/app/main.js", "const x = require('./a.js');"),
                ("/app/a.js", "module.exports = require('./b.js');"),
                ("/app/b.js", "'use strict';\nmodule.exports = require('./c.js');"),
                ("/app/c.js", "exports.value = 42;"),
            ],
            &[],
        );
        let (a, c) = (id(&graph, "/app/a.js"), id(&graph, "/app/c.js"));
        assert_eq!(analysis.canonical(a), c);
        assert_eq!(analysis.shape(a), &ExportShape::ProvenReexport { target: c });
        assert_eq!(
            analysis.bind(&graph, id(&graph, "/app/main.js"), 0, "value"),
            Some(Binding::LiveGetter {
                module: c,
                export: "value".into()
            })
        );
    }

    #[test]
    fn test_unknown_condition_is_ambiguous() {
        let files = [
            ("/app/main.js", "import { version } from './react.js';"),
            (
                "/app/react.js",
                "if (process.env.NODE_ENV === 'production') {\n  module.exports = require('./prod.js');\n} else {\n  module.exports = require('./dev.js');\n}",
            ),
            ("/app/prod.js", "exports.version = 'prod';"),
            ("/app/dev.js", "exports.version = 'dev';"),
        ];
        let (graph, analysis) = build(&files, &[]);
        let react = id(&graph, "/app/react.js");
        assert_eq!(
            analysis.reexport(react),
            &CjsReexport::Ambiguous(vec![id(&graph, "/app/prod.js"), id(&graph, "/app/dev.js")])
        );
        assert_eq!(graph.module(react).export_kind, ExportKind::Cjs);
        assert_eq!(graph.len(), 4);
        assert_eq!(
            analysis.bind(&graph, id(&graph, "/app/main.js"), 0, "version"),
            Some(Binding::LiveGetter {
                module: react,
                export: "version".into()
            })
        );
    }

    #[test]
    fn test_defined_condition_is_proven() {
        let files = [
            ("/app/main.js", "import { version } from './react.js';"),
            (
                "/app/react.js",
                "module.exports = process.env.NODE_ENV === 'production' ? require('./prod.js') : require('./dev.js');",
            ),
            ("/app/prod.js", "exports.version = 'prod';"),
            ("/app/dev.js", "exports.version = 'dev';"),
        ];
        let (graph, analysis) = build(&files, &[("process.env.NODE_ENV", "'production'")]);
        let prod = id(&graph, "/app/prod.js");
        assert_eq!(
            analysis.reexport(id(&graph, "/app/react.js")),
            &CjsReexport::Proven(prod)
        );
        assert!(graph.id_by_path(Path::new("/app/dev.js")).is_none());
    }

    #[test]
    fn test_if_without_else_is_not_proven() {
        let (graph, analysis) = build(
            &[
                ("/app/main.js", "require('./maybe.js');"),
                ("/app/maybe.js", "if (flag) module.exports = require('./x.js');"),
                ("/app/x.js", "exports.x = 1;"),
            ],
            &[],
        );
        assert_eq!(
            analysis.reexport(id(&graph, "/app/maybe.js")),
            &CjsReexport::Ambiguous(vec![id(&graph, "/app/x.js")])
        );
    }

    #[test]
    fn test_esm_reexport_chain_binds_to_origin() {
        let (graph, analysis) = build(
            &[
                ("/app/main.js", "import { helper, other } from './index.js';"),
                ("/app/index.js", "export { helper } from './lib.js';\nexport * from './more.js';"),
                ("/app/lib.js", "export function helper() {}"),
                ("/app/more.js", "export const other = 1;"),
            ],
            &[],
        );
        let main = id(&graph, "/app/main.js");
        assert_eq!(
            analysis.bind(&graph, main, 0, "helper"),
            Some(Binding::Direct {
                module: id(&graph, "/app/lib.js"),
                export: "helper".into()
            })
        );
        assert_eq!(
            analysis.bind(&graph, main, 0, "other"),
            Some(Binding::Direct {
                module: id(&graph, "/app/more.js"),
                export: "other".into()
            })
        );
        match analysis.shape(id(&graph, "/app/index.js")) {
            ExportShape::Esm { names, star_from } => {
                assert_eq!(names, &vec!["helper".to_string()]);
                assert_eq!(star_from, &vec![id(&graph, "/app/more.js")]);
            }
            other => panic!("unexpected shape {other:?}"),
        }
    }

    #[test]
    fn test_proven_cycle_does_not_collapse() {
        let (graph, analysis) = build(
            &[
                ("/app/main.js", "require('./a.js');"),
                ("/app/a.js", "module.exports = require('./b.js');"),
                ("/app/b.js", "module.exports = require('./a.js');"),
            ],
            &[],
        );
        let a = id(&graph, "/app/a.js");
        let b = id(&graph, "/app/b.js");
        assert_eq!(analysis.canonical(a), a);
        assert_eq!(analysis.export_kind(&graph, a), ExportKind::Cjs);
        assert_eq!(analysis.export_kind(&graph, b), ExportKind::Cjs);
    }
}
