//! Graph construction.
//!
//! Discovery proceeds level by level. Every module of the current frontier is loaded,
//! parsed and has its imports resolved in parallel; the results are joined and the
//! next frontier is the set of newly seen paths, sorted. Module ids are assigned after
//! discovery by sorting all paths, so the graph does not depend on discovery order.

use super::store::is_vanished;
use super::{ImportTarget, ModuleGraph, ModuleStore};
use crate::error::{Error, Result};
use crate::fs::normalize_path;
use crate::interop::Defines;
use crate::parse::{ParsedModule, SourceParser};
use crate::resolver::{Resolution, ResolutionKind, Resolver};
use rayon::prelude::*;
use rustc_hash::FxHashMap as HashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

/// Import target before ids are assigned.
#[derive(Debug, Clone)]
enum PendingTarget {
    Path(PathBuf),
    External(String),
    Dropped,
}

#[derive(Debug)]
struct Discovered {
    parsed: Arc<ParsedModule>,
    targets: Vec<PendingTarget>,
}

/// The first import that led to a path; re-resolved if the file vanishes.
#[derive(Debug, Clone)]
struct Origin {
    importer: PathBuf,
    specifier: String,
    kind: ResolutionKind,
}

pub struct GraphBuilder<'a> {
    resolver: &'a Resolver,
    store: &'a ModuleStore,
    parser: &'a dyn SourceParser,
    defines: &'a Defines,
    external: &'a [String],
}

impl<'a> GraphBuilder<'a> {
    #[must_use]
    pub fn new(
        resolver: &'a Resolver,
        store: &'a ModuleStore,
        parser: &'a dyn SourceParser,
        defines: &'a Defines,
        external: &'a [String],
    ) -> Self {
        Self {
            resolver,
            store,
            parser,
            defines,
            external,
        }
    }

    /// Build the closed module set reachable from `entrypoints` (absolute paths).
    ///
    /// Any unresolvable import fails the whole build.
    pub fn build(&self, entrypoints: &[PathBuf]) -> Result<ModuleGraph> {
        let mut entry_paths = Vec::with_capacity(entrypoints.len());
        for entry in entrypoints {
            entry_paths.push(self.resolve_entry(entry)?);
        }

        let mut discovered: BTreeMap<PathBuf, Discovered> = BTreeMap::new();
        let mut origins: HashMap<PathBuf, Origin> = HashMap::default();
        let mut redirects: HashMap<PathBuf, PathBuf> = HashMap::default();
        let mut seen: BTreeSet<PathBuf> = entry_paths.iter().cloned().collect();
        let mut frontier: Vec<PathBuf> = seen.iter().cloned().collect();
        let mut level = 0usize;

        while !frontier.is_empty() {
            trace!(level, modules = frontier.len(), "discovering");
            let results: Vec<Result<Discovered>> = frontier
                .par_iter()
                .map(|path| self.discover(path))
                .collect();

            let mut next = BTreeSet::new();
            for (path, result) in frontier.iter().zip(results) {
                let found = match result {
                    Ok(module) => Some((path.clone(), module)),
                    Err(err) if is_vanished(&err) => {
                        self.rediscover(path, origins.get(path), &seen, &mut redirects)?
                    }
                    Err(err) => return Err(err),
                };
                let Some((path, module)) = found else {
                    continue;
                };
                seen.insert(path.clone());

                for (record, target) in module.parsed.imports.iter().zip(&module.targets) {
                    let PendingTarget::Path(target) = target else {
                        continue;
                    };
                    if seen.insert(target.clone()) {
                        origins.insert(
                            target.clone(),
                            Origin {
                                importer: path.clone(),
                                specifier: record.specifier.clone(),
                                kind: record.kind.resolution_kind(),
                            },
                        );
                        next.insert(target.clone());
                    }
                }
                discovered.insert(path, module);
            }
            frontier = next.into_iter().collect();
            level += 1;
        }

        debug!(modules = discovered.len(), levels = level, "module graph discovered");
        assemble(discovered, &entry_paths, &redirects)
    }

    fn resolve_entry(&self, entry: &Path) -> Result<PathBuf> {
        let entry = normalize_path(entry);
        let specifier = entry.to_string_lossy().into_owned();
        let reason = match self
            .resolver
            .resolve(&entry, &specifier, ResolutionKind::Import)
        {
            Resolution::Module(path) => return Ok(path),
            Resolution::External(_) => "entry point cannot be external".to_string(),
            Resolution::NotFound { reason, .. } => reason.to_string(),
        };
        Err(Error::Resolution {
            importer: entry,
            specifier,
            reason,
        })
    }

    fn is_external(&self, specifier: &str) -> bool {
        self.external
            .iter()
            .any(|prefix| specifier.starts_with(prefix.as_str()))
    }

    /// Load one module and resolve all of its imports.
    fn discover(&self, path: &Path) -> Result<Discovered> {
        let parsed = self.store.load(self.resolver.fs(), self.parser, path)?;
        let targets = parsed
            .imports
            .iter()
            .map(|record| {
                if !self.defines.is_empty() && self.defines.is_dead(&record.guards) {
                    trace!(
                        specifier = %record.specifier,
                        from = %path.display(),
                        "dropping import in dead branch"
                    );
                    return Ok(PendingTarget::Dropped);
                }
                if self.is_external(&record.specifier) {
                    return Ok(PendingTarget::External(record.specifier.clone()));
                }
                match self
                    .resolver
                    .resolve(path, &record.specifier, record.kind.resolution_kind())
                {
                    Resolution::Module(target) => Ok(PendingTarget::Path(target)),
                    Resolution::External(specifier) => Ok(PendingTarget::External(specifier)),
                    Resolution::NotFound { reason, .. } => Err(Error::Resolution {
                        importer: path.to_path_buf(),
                        specifier: record.specifier.clone(),
                        reason: reason.to_string(),
                    }),
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Discovered { parsed, targets })
    }

    /// Retry a module whose file disappeared between resolution and read: forget what
    /// the caches know about it, resolve the import that found it again and load the
    /// new answer once. Returns `None` when the new answer is already being discovered.
    fn rediscover(
        &self,
        path: &Path,
        origin: Option<&Origin>,
        seen: &BTreeSet<PathBuf>,
        redirects: &mut HashMap<PathBuf, PathBuf>,
    ) -> Result<Option<(PathBuf, Discovered)>> {
        debug!(path = %path.display(), "module vanished, re-resolving");
        self.resolver.invalidate(path);
        self.store.invalidate(path);

        let Some(origin) = origin else {
            let entry = self.resolve_entry(path)?;
            return self.discover(&entry).map(|module| Some((entry, module)));
        };

        let reason = match self
            .resolver
            .resolve(&origin.importer, &origin.specifier, origin.kind)
        {
            Resolution::Module(target) => {
                if target != path {
                    redirects.insert(path.to_path_buf(), target.clone());
                    if seen.contains(&target) {
                        return Ok(None);
                    }
                }
                return self.discover(&target).map(|module| Some((target, module)));
            }
            Resolution::External(_) => "now resolves to an external module".to_string(),
            Resolution::NotFound { reason, .. } => reason.to_string(),
        };
        Err(Error::Resolution {
            importer: origin.importer.clone(),
            specifier: origin.specifier.clone(),
            reason,
        })
    }
}

fn follow<'p>(redirects: &'p HashMap<PathBuf, PathBuf>, mut path: &'p Path) -> &'p Path {
    for _ in 0..redirects.len() {
        match redirects.get(path) {
            Some(next) => path = next,
            None => break,
        }
    }
    path
}

/// Assign ids in path order and connect edges.
fn assemble(
    discovered: BTreeMap<PathBuf, Discovered>,
    entry_paths: &[PathBuf],
    redirects: &HashMap<PathBuf, PathBuf>,
) -> Result<ModuleGraph> {
    let mut graph = ModuleGraph::new();
    let mut pending = Vec::with_capacity(discovered.len());
    for (path, module) in discovered {
        graph.add(path, module.parsed);
        pending.push(module.targets);
    }

    let lookup = |graph: &ModuleGraph, path: &Path| {
        let path = follow(redirects, path);
        graph.id_by_path(path).ok_or_else(|| Error::Read {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotFound, "module vanished during the build"),
        })
    };

    for (id, targets) in pending.into_iter().enumerate() {
        let targets = targets
            .into_iter()
            .map(|target| match target {
                PendingTarget::Path(path) => lookup(&graph, &path).map(ImportTarget::Module),
                PendingTarget::External(specifier) => Ok(ImportTarget::External(specifier)),
                PendingTarget::Dropped => Ok(ImportTarget::Dropped),
            })
            .collect::<Result<Vec<_>>>()?;
        graph.connect(id, targets);
    }

    let mut entries = Vec::with_capacity(entry_paths.len());
    for path in entry_paths {
        let id = lookup(&graph, path)?;
        if !entries.contains(&id) {
            entries.push(id);
        }
    }
    graph.set_entries(entries);
    Ok(graph)
}
