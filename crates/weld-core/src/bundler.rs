//! Build entry point.
//!
//! A [`Bundler`] owns the resolver cache and the parsed-module store, both of which
//! persist across [`Bundler::build`] calls. Everything else (graph, init plan, chunks)
//! is recomputed from scratch on every build.
//!
//! ```ignore
//! let bundler = Bundler::new(Arc::new(OsFileSystem), ResolverConfig::default());
//! let output = bundler.build(&BuildOptions::new(["src/index.ts"]).with_splitting(true))?;
//! for chunk in &output.chunks {
//!     println!("{} {} bytes", chunk.file, chunk.size);
//! }
//! ```

use crate::chunks::{ChunkGraph, ChunkInfo, ChunkOptions};
use crate::config::{BuildOptions, SplitSettings};
use crate::error::Result;
use crate::fs::FileSystemRef;
use crate::graph::{
    classify_async, ExportKind, GraphBuilder, ImportTarget, InitPlan, ModuleGraph, ModuleStore,
    StoreStats,
};
use crate::interop::{analyze, Binding, CjsReexport, Defines, UnusedExports, UsedExports};
use crate::parse::{ScanParser, SourceParser};
use crate::resolver::{CacheStats, Resolver, ResolverConfig};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Everything one build produced.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOutput {
    /// Chunks in output order.
    pub chunks: Vec<ChunkInfo>,
    /// Modules in id (path) order.
    pub modules: Vec<ModuleSummary>,
    /// Static import cycles, as module paths.
    pub cycles: Vec<Vec<String>>,
    pub init_plan: InitPlan,
    /// Empty unless tree shaking is enabled.
    pub unused_exports: Vec<UnusedExports>,
    /// External specifiers, sorted.
    pub externals: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(skip)]
    pub graph: ModuleGraph,
    #[serde(skip)]
    pub chunk_graph: ChunkGraph,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSummary {
    pub path: String,
    pub export_kind: ExportKind,
    pub size: u64,
    pub is_async: bool,
    pub transitively_async: bool,
    /// Target a proven CommonJS re-export links to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reexport_of: Option<String>,
    pub bindings: Vec<BindingSummary>,
}

/// Where one named import ends up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingSummary {
    pub specifier: String,
    pub local: String,
    pub imported: String,
    /// `direct`, `live-getter`, `namespace` or `external`.
    pub kind: &'static str,
    /// Module path, or the specifier for externals.
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export: Option<String>,
}

impl BindingSummary {
    fn new(graph: &ModuleGraph, specifier: &str, local: &str, imported: &str, binding: Binding) -> Self {
        let (kind, target, export) = match binding {
            Binding::Direct { module, export } => {
                ("direct", graph.module(module).display_path(), Some(export))
            }
            Binding::LiveGetter { module, export } => {
                ("live-getter", graph.module(module).display_path(), Some(export))
            }
            Binding::Namespace { module } => ("namespace", graph.module(module).display_path(), None),
            Binding::External { specifier, export } => ("external", specifier, Some(export)),
        };
        Self {
            specifier: specifier.to_string(),
            local: local.to_string(),
            imported: imported.to_string(),
            kind,
            target,
            export,
        }
    }
}

/// Process-lifetime bundler.
#[derive(Debug)]
pub struct Bundler {
    resolver: Resolver,
    store: ModuleStore,
    parser: Box<dyn SourceParser>,
}

impl Bundler {
    #[must_use]
    pub fn new(fs: FileSystemRef, config: ResolverConfig) -> Self {
        Self {
            resolver: Resolver::new(fs, config),
            store: ModuleStore::new(),
            parser: Box::new(ScanParser),
        }
    }

    /// Replace the built-in import scanner.
    #[must_use]
    pub fn with_parser(mut self, parser: impl SourceParser + 'static) -> Self {
        self.parser = Box::new(parser);
        self
    }

    #[must_use]
    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    #[must_use]
    pub fn resolver_stats(&self) -> CacheStats {
        self.resolver.stats()
    }

    #[must_use]
    pub fn store_stats(&self) -> StoreStats {
        self.store.stats()
    }

    /// Drop cached resolutions and parses for a changed file or directory.
    pub fn invalidate(&self, path: &Path) -> usize {
        self.resolver.invalidate(path) + self.store.invalidate(path)
    }

    /// Release all caches. Later builds still work, uncached.
    pub fn shutdown(&self) {
        self.resolver.shutdown();
        self.store.shutdown();
    }

    /// Run one build.
    ///
    /// Configuration errors are reported before the file system is touched. Any
    /// unresolvable import fails the whole build.
    pub fn build(&self, options: &BuildOptions) -> Result<BuildOutput> {
        let started = Instant::now();
        let mut settings = options.validate()?;
        let mut warnings = Vec::new();
        if !options.splitting && options.advanced_chunks.is_some() {
            let message = "advancedChunks is ignored because splitting is disabled".to_string();
            warn!("{message}");
            warnings.push(message);
            settings = SplitSettings::default();
        }

        let defines = Defines::new(&options.define);
        let entrypoints = options.absolute_entrypoints();
        let mut graph = GraphBuilder::new(
            &self.resolver,
            &self.store,
            self.parser.as_ref(),
            &defines,
            &options.external,
        )
        .build(&entrypoints)?;

        classify_async(&mut graph)?;
        let interop = analyze(&graph, &defines);
        interop.apply(&mut graph);

        let order = graph.evaluation_order();
        let init_plan = InitPlan::build(&graph, &order);
        init_plan.verify()?;

        let unused_exports = if options.tree_shaking {
            UsedExports::analyze(&graph, &interop).unused(&graph)
        } else {
            Vec::new()
        };

        let chunk_graph = ChunkGraph::build(
            &graph,
            &order,
            &ChunkOptions {
                splitting: options.splitting,
                css_chunking: options.css_chunking,
                settings: &settings,
            },
        );

        let mut modules = Vec::with_capacity(graph.len());
        let mut externals = BTreeSet::new();
        for module in graph.iter() {
            let mut bindings = Vec::new();
            for (index, (record, target)) in module.parsed.imports.iter().zip(&module.targets).enumerate() {
                if let ImportTarget::External(specifier) = target {
                    externals.insert(specifier.clone());
                }
                for name in &record.names {
                    if let Some(binding) = interop.bind(&graph, module.id, index, &name.imported) {
                        bindings.push(BindingSummary::new(
                            &graph,
                            &record.specifier,
                            &name.local,
                            &name.imported,
                            binding,
                        ));
                    }
                }
            }
            let reexport_of = match interop.reexport(module.id) {
                CjsReexport::Proven(_) if interop.canonical(module.id) != module.id => {
                    Some(graph.module(interop.canonical(module.id)).display_path())
                }
                _ => None,
            };
            modules.push(ModuleSummary {
                path: module.display_path(),
                export_kind: module.export_kind,
                size: module.size,
                is_async: module.is_async,
                transitively_async: module.transitively_async,
                reexport_of,
                bindings,
            });
        }

        let cycles: Vec<Vec<String>> = graph
            .cycles()
            .into_iter()
            .map(|members| {
                members
                    .into_iter()
                    .map(|id| graph.module(id).display_path())
                    .collect()
            })
            .collect();
        if !cycles.is_empty() {
            debug!(cycles = cycles.len(), "static import cycles");
        }

        let chunks = chunk_graph.manifest(&graph).chunks;
        info!(
            modules = graph.len(),
            chunks = chunks.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "build complete"
        );

        Ok(BuildOutput {
            chunks,
            modules,
            cycles,
            init_plan,
            unused_exports,
            externals: externals.into_iter().collect(),
            warnings,
            graph,
            chunk_graph,
        })
    }
}
