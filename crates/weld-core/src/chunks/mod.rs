//! Chunk assignment and splitting.
//!
//! Every entry gets a default chunk. With splitting enabled, configured groups claim
//! matching modules first (highest priority first), then modules shared by enough
//! entries move into auto-generated shared chunks keyed by the set of entries that
//! reach them. Whatever is left is duplicated into the default chunk of each entry
//! that reaches it, so no entry ever loads another entry's default chunk. Chunks over
//! their size limit are split again along import boundaries.
//!
//! Stylesheets go through a separate lane, see [`css`].

mod css;
mod share;
mod splitter;

use crate::config::SplitSettings;
use crate::graph::{ModuleGraph, ModuleId};
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use serde::Serialize;
use share::{claim_groups, extract_shared, Reach};
use splitter::split_by_size;
use tracing::debug;

/// Unique identifier for a chunk.
pub type ChunkId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    /// Default chunk of one entry point.
    Entry,
    /// Claimed by a configured chunk group.
    Group,
    /// Generated for modules several entries share.
    Shared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Javascript,
    Css,
}

impl ChunkType {
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Javascript => "js",
            Self::Css => "css",
        }
    }
}

/// A group of modules emitted together.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: ChunkId,
    pub name: String,
    pub kind: ChunkKind,
    pub chunk_type: ChunkType,
    /// Modules in evaluation order.
    pub modules: Vec<ModuleId>,
    /// Entry modules this chunk is loaded for.
    pub entries: Vec<ModuleId>,
    /// Sum of module source sizes.
    pub size: u64,
    /// Chunks of the same type that hold static imports of this chunk's modules.
    pub imports: Vec<ChunkId>,
}

/// Chunk before naming and size splitting.
#[derive(Debug)]
pub(crate) struct PendingChunk {
    pub(crate) name: String,
    pub(crate) kind: ChunkKind,
    /// Sorted entry indices.
    pub(crate) entries: Vec<usize>,
    pub(crate) modules: Vec<ModuleId>,
    pub(crate) max_size: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkOptions<'a> {
    pub splitting: bool,
    pub css_chunking: bool,
    pub settings: &'a SplitSettings,
}

/// Result of chunk assignment.
#[derive(Debug, Default)]
pub struct ChunkGraph {
    chunks: Vec<Chunk>,
    module_to_chunks: HashMap<ModuleId, Vec<ChunkId>>,
    /// Per entry, the chunk holding the entry module.
    entry_chunks: Vec<ChunkId>,
}

#[derive(Debug, Default)]
struct NameTable {
    used: HashSet<String>,
}

impl NameTable {
    fn unique(&mut self, base: &str) -> String {
        if self.used.insert(base.to_string()) {
            return base.to_string();
        }
        (2..)
            .map(|n| format!("{base}~{n}"))
            .find(|candidate| self.used.insert(candidate.clone()))
            .unwrap_or_else(|| base.to_string())
    }
}

/// Chunk name for an entry module: its file stem.
pub(crate) fn entry_name(graph: &ModuleGraph, entry: ModuleId) -> String {
    graph
        .module(entry)
        .path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("chunk")
        .to_string()
}

/// JavaScript lane: entry chunks, then group chunks, then shared chunks by name.
fn assign_javascript(
    graph: &ModuleGraph,
    reach: &Reach,
    order: &[ModuleId],
    options: &ChunkOptions<'_>,
) -> Vec<PendingChunk> {
    let entries = graph.entries();
    let lane: Vec<ModuleId> = order
        .iter()
        .copied()
        .filter(|&m| !graph.module(m).is_css && reach.is_reached(m) && !entries.contains(&m))
        .collect();

    let mut claimed = vec![false; graph.len()];
    let (groups, shared) = if options.splitting {
        let groups = claim_groups(graph, reach, &lane, options.settings, &mut claimed);
        let shared = extract_shared(graph, reach, &lane, options.settings, &mut claimed);
        (groups, shared)
    } else {
        (Vec::new(), Vec::new())
    };

    let mut chunks = Vec::with_capacity(entries.len() + groups.len() + shared.len());
    for (index, &entry) in entries.iter().enumerate() {
        if graph.module(entry).is_css {
            continue;
        }
        let modules = order
            .iter()
            .copied()
            .filter(|&m| {
                !graph.module(m).is_css && !claimed[m] && reach.signature(m).contains(&index)
            })
            .collect();
        chunks.push(PendingChunk {
            name: entry_name(graph, entry),
            kind: ChunkKind::Entry,
            entries: vec![index],
            modules,
            max_size: options.settings.max_size,
        });
    }
    chunks.extend(groups);
    chunks.extend(shared);
    chunks
}

impl ChunkGraph {
    /// Partition the modules of `graph` into chunks. `order` is the evaluation order.
    #[must_use]
    pub fn build(graph: &ModuleGraph, order: &[ModuleId], options: &ChunkOptions<'_>) -> Self {
        let reach = Reach::compute(graph);
        let mut chunk_graph = Self::default();

        let javascript = assign_javascript(graph, &reach, order, options);
        chunk_graph.push_lane(graph, javascript, ChunkType::Javascript);
        let stylesheets = css::assign_css(graph, &reach, order, options);
        chunk_graph.push_lane(graph, stylesheets, ChunkType::Css);
        chunk_graph.link(graph);

        chunk_graph.entry_chunks = graph
            .entries()
            .iter()
            .filter_map(|&entry| chunk_graph.chunk_of(entry))
            .collect();

        debug!(
            chunks = chunk_graph.chunks.len(),
            entries = graph.entries().len(),
            "assigned chunks"
        );
        chunk_graph
    }

    fn push_lane(&mut self, graph: &ModuleGraph, pending: Vec<PendingChunk>, chunk_type: ChunkType) {
        let mut names = NameTable::default();
        for chunk in pending {
            if chunk.modules.is_empty() {
                continue;
            }
            let base = names.unique(&chunk.name);
            let pieces = split_by_size(graph, &chunk.modules, chunk.max_size);
            let split = pieces.len() > 1;
            if split {
                debug!(chunk = %base, pieces = pieces.len(), "split oversized chunk");
            }
            let entries: Vec<ModuleId> = chunk.entries.iter().map(|&i| graph.entries()[i]).collect();

            for (k, modules) in pieces.into_iter().enumerate() {
                let name = if split {
                    names.unique(&format!("{base}-{}", k + 1))
                } else {
                    base.clone()
                };
                let id = self.chunks.len();
                for &m in &modules {
                    self.module_to_chunks.entry(m).or_default().push(id);
                }
                self.chunks.push(Chunk {
                    id,
                    name,
                    kind: chunk.kind,
                    chunk_type,
                    size: modules.iter().map(|&m| graph.module(m).size).sum(),
                    modules,
                    entries: entries.clone(),
                    imports: Vec::new(),
                });
            }
        }
    }

    /// Fill in [`Chunk::imports`].
    fn link(&mut self, graph: &ModuleGraph) {
        for id in 0..self.chunks.len() {
            let chunk = &self.chunks[id];
            let members: HashSet<ModuleId> = chunk.modules.iter().copied().collect();
            let mut imports = Vec::new();
            for &m in &chunk.modules {
                for dep in &graph.module(m).dependencies {
                    if members.contains(dep) {
                        continue;
                    }
                    let holder = self.chunks_of(*dep).iter().copied().find(|&h| {
                        let other = &self.chunks[h];
                        other.chunk_type == chunk.chunk_type
                            && (other.kind != ChunkKind::Entry
                                || other.entries.iter().any(|e| chunk.entries.contains(e)))
                    });
                    if let Some(holder) = holder {
                        if holder != id && !imports.contains(&holder) {
                            imports.push(holder);
                        }
                    }
                }
            }
            self.chunks[id].imports = imports;
        }
    }

    #[must_use]
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    #[must_use]
    pub fn get(&self, id: ChunkId) -> Option<&Chunk> {
        self.chunks.get(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Per entry point, the chunk holding the entry module.
    #[must_use]
    pub fn entry_chunks(&self) -> &[ChunkId] {
        &self.entry_chunks
    }

    /// Every chunk containing `module`. More than one when it is duplicated into
    /// several entry chunks.
    #[must_use]
    pub fn chunks_of(&self, module: ModuleId) -> &[ChunkId] {
        self.module_to_chunks
            .get(&module)
            .map_or(&[], Vec::as_slice)
    }

    /// First chunk containing `module`.
    #[must_use]
    pub fn chunk_of(&self, module: ModuleId) -> Option<ChunkId> {
        self.chunks_of(module).first().copied()
    }

    /// Chunks of one type, in output order.
    pub fn of_type(&self, chunk_type: ChunkType) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter().filter(move |c| c.chunk_type == chunk_type)
    }

    #[must_use]
    pub fn manifest(&self, graph: &ModuleGraph) -> ChunkManifest {
        let paths = |ids: &[ModuleId]| -> Vec<String> {
            ids.iter()
                .filter_map(|&id| graph.get(id).map(|m| m.display_path()))
                .collect()
        };
        ChunkManifest {
            chunks: self
                .chunks
                .iter()
                .map(|chunk| ChunkInfo {
                    id: chunk.id,
                    name: chunk.name.clone(),
                    file: format!("{}.{}", chunk.name, chunk.chunk_type.extension()),
                    kind: chunk.kind,
                    chunk_type: chunk.chunk_type,
                    entries: paths(&chunk.entries),
                    modules: paths(&chunk.modules),
                    size: chunk.size,
                    imports: chunk.imports.clone(),
                })
                .collect(),
        }
    }
}

/// Serializable chunk listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkManifest {
    pub chunks: Vec<ChunkInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkInfo {
    pub id: ChunkId,
    pub name: String,
    /// Output file name.
    pub file: String,
    pub kind: ChunkKind,
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
    pub entries: Vec<String>,
    pub modules: Vec<String>,
    pub size: u64,
    pub imports: Vec<ChunkId>,
}

impl ChunkManifest {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdvancedChunksConfig, ChunkGroupConfig};
    use crate::graph::tests::graph_of;

    fn chunk_graph(graph: &mut ModuleGraph, splitting: bool, settings: &SplitSettings) -> ChunkGraph {
        let order = graph.evaluation_order();
        ChunkGraph::build(
            graph,
            &order,
            &ChunkOptions {
                splitting,
                css_chunking: false,
                settings,
            },
        )
    }

    fn names(chunks: &ChunkGraph) -> Vec<&str> {
        chunks.chunks().iter().map(|c| c.name.as_str()).collect()
    }

    /// Two entries sharing `/shared.js`, each with a private module.
    fn two_entries() -> ModuleGraph {
        let mut graph = graph_of(&[
            ("/src/a.js", &[2, 4], &[], false),
            ("/src/b.js", &[3, 4], &[], false),
            ("/src/only_a.js", &[], &[], false),
            ("/src/only_b.js", &[], &[], false),
            ("/src/shared.js", &[], &[], false),
        ]);
        graph.set_entries(vec![0, 1]);
        graph
    }

    #[test]
    fn test_single_entry_single_chunk() {
        let mut graph = graph_of(&[
            ("/index.ts", &[1], &[2], false),
            ("/dep.ts", &[], &[], false),
            ("/lazy.ts", &[], &[], false),
        ]);
        let chunks = chunk_graph(&mut graph, true, &SplitSettings::default());
        assert_eq!(chunks.len(), 1);
        let main = &chunks.chunks()[0];
        assert_eq!(main.name, "index");
        assert_eq!(main.kind, ChunkKind::Entry);
        assert_eq!(main.modules, vec![1, 0, 2]);
        assert_eq!(chunks.entry_chunks(), &[0]);
    }

    #[test]
    fn test_shared_module_is_extracted() {
        let mut graph = two_entries();
        let chunks = chunk_graph(&mut graph, true, &SplitSettings::default());
        assert_eq!(chunks.len(), 3);
        let shared = &chunks.chunks()[2];
        assert_eq!(shared.kind, ChunkKind::Shared);
        assert!(shared.name.starts_with("shared-"));
        assert_eq!(shared.modules, vec![4]);
        assert_eq!(shared.entries, vec![0, 1]);
        assert_eq!(chunks.chunks_of(4), &[2]);
        assert_eq!(chunks.chunks()[0].modules, vec![2, 0]);
        assert_eq!(chunks.chunks()[0].imports, vec![2]);
        assert_eq!(chunks.chunks()[1].imports, vec![2]);
    }

    #[test]
    fn test_without_splitting_shared_module_is_duplicated() {
        let mut graph = two_entries();
        let chunks = chunk_graph(&mut graph, false, &SplitSettings::default());
        assert_eq!(names(&chunks), vec!["a", "b"]);
        assert_eq!(chunks.chunks_of(4), &[0, 1]);
        assert!(chunks.chunks().iter().all(|c| c.imports.is_empty()));
    }

    #[test]
    fn test_min_share_count_keeps_module_duplicated() {
        let mut graph = two_entries();
        let settings = SplitSettings::from_config(&AdvancedChunksConfig {
            min_share_count: Some(3),
            ..Default::default()
        })
        .unwrap();
        let chunks = chunk_graph(&mut graph, true, &settings);
        assert_eq!(names(&chunks), vec!["a", "b"]);
        assert_eq!(chunks.chunks_of(4).len(), 2);
    }

    #[test]
    fn test_enforced_group_ignores_thresholds() {
        let settings_for = |enforce: bool| {
            SplitSettings::from_config(&AdvancedChunksConfig {
                groups: vec![ChunkGroupConfig::named("vendor")
                    .test("node_modules")
                    .enforce(enforce)
                    .size_range(Some(10_000), None)],
                ..Default::default()
            })
            .unwrap()
        };
        let build = |enforce: bool| {
            let mut graph = graph_of(&[
                ("/src/main.js", &[1], &[], false),
                ("/node_modules/lib/index.js", &[], &[], false),
            ]);
            chunk_graph(&mut graph, true, &settings_for(enforce))
        };

        let enforced = build(true);
        assert_eq!(names(&enforced), vec!["main", "vendor"]);
        assert_eq!(enforced.chunks()[1].kind, ChunkKind::Group);
        assert_eq!(enforced.chunks()[1].modules, vec![1]);
        assert_eq!(enforced.chunks()[0].imports, vec![1]);

        let fallback = build(false);
        assert_eq!(names(&fallback), vec!["main"]);
        assert_eq!(fallback.chunks()[0].modules, vec![1, 0]);
    }

    #[test]
    fn test_higher_priority_group_wins() {
        let settings = SplitSettings::from_config(&AdvancedChunksConfig {
            groups: vec![
                ChunkGroupConfig::named("libs").test("node_modules"),
                ChunkGroupConfig::named("react").test("react").priority(10),
            ],
            ..Default::default()
        })
        .unwrap();
        let mut graph = graph_of(&[
            ("/src/main.js", &[1, 2], &[], false),
            ("/node_modules/react/index.js", &[], &[], false),
            ("/node_modules/lodash/index.js", &[], &[], false),
        ]);
        let chunks = chunk_graph(&mut graph, true, &settings);
        assert_eq!(names(&chunks), vec!["main", "react", "libs"]);
        assert_eq!(chunks.chunks()[1].modules, vec![1]);
        assert_eq!(chunks.chunks()[2].modules, vec![2]);
    }

    #[test]
    fn test_group_matching_nothing_is_a_no_op() {
        let settings = SplitSettings::from_config(&AdvancedChunksConfig {
            groups: vec![ChunkGroupConfig::named("vendor").test("node_modules")],
            ..Default::default()
        })
        .unwrap();
        let mut graph = graph_of(&[("/src/main.js", &[], &[], false)]);
        let chunks = chunk_graph(&mut graph, true, &settings);
        assert_eq!(names(&chunks), vec!["main"]);
    }

    #[test]
    fn test_oversized_entry_chunk_is_split() {
        let mut graph = graph_of(&[
            ("/src/main.js", &[1, 2], &[], false),
            ("/src/left.js", &[], &[], false),
            ("/src/right.js", &[], &[], false),
        ]);
        for (id, size) in [(0, 10), (1, 80), (2, 80)] {
            graph.get_mut(id).unwrap().size = size;
        }
        let settings = SplitSettings::from_config(&AdvancedChunksConfig {
            max_size: Some(100),
            ..Default::default()
        })
        .unwrap();
        let chunks = chunk_graph(&mut graph, true, &settings);
        assert_eq!(names(&chunks), vec!["main-1", "main-2"]);
        assert!(chunks.chunks().iter().all(|c| c.size <= 100));
        // The entry module lives in the last piece.
        assert_eq!(chunks.entry_chunks(), &[1]);
        assert_eq!(chunks.chunks()[1].imports, vec![0]);
    }

    #[test]
    fn test_duplicate_entry_stems_get_suffixes() {
        let mut graph = graph_of(&[
            ("/a/index.js", &[], &[], false),
            ("/b/index.js", &[], &[], false),
        ]);
        graph.set_entries(vec![0, 1]);
        let chunks = chunk_graph(&mut graph, true, &SplitSettings::default());
        assert_eq!(names(&chunks), vec!["index", "index~2"]);
    }

    #[test]
    fn test_every_reached_module_is_placed() {
        let mut graph = two_entries();
        let chunks = chunk_graph(&mut graph, true, &SplitSettings::default());
        for id in 0..graph.len() {
            assert!(!chunks.chunks_of(id).is_empty(), "module {id} unplaced");
        }
        let manifest = chunks.manifest(&graph);
        assert_eq!(manifest.chunks[0].file, "a.js");
        assert_eq!(manifest.chunks[2].entries, vec!["/src/a.js", "/src/b.js"]);
        assert!(manifest.to_json().unwrap().contains("\"type\": \"javascript\""));
    }
}
