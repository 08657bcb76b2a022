//! Stylesheet lane.
//!
//! Each entry's CSS set is every stylesheet it reaches, through JS imports and
//! `@import`, in evaluation order. Without CSS chunking every entry with a non-empty
//! set gets its own chunk. With it, groups may claim stylesheets first and entries
//! whose remaining sets are identical, paths and bytes, share a single chunk.

use super::share::{claim_groups, Reach};
use super::{entry_name, ChunkKind, ChunkOptions, PendingChunk};
use crate::graph::{ModuleGraph, ModuleId};
use rustc_hash::FxHashMap as HashMap;
use tracing::debug;
use weld_util::hash::blake3_parts;

/// Identity of an ordered stylesheet set: each member's path and source bytes.
fn content_key(graph: &ModuleGraph, modules: &[ModuleId]) -> String {
    blake3_parts(modules.iter().flat_map(|&m| {
        let module = graph.module(m);
        [
            module.display_path().into_bytes(),
            module.parsed.tree.source().as_bytes().to_vec(),
        ]
    }))
}

pub(crate) fn assign_css(
    graph: &ModuleGraph,
    reach: &Reach,
    order: &[ModuleId],
    options: &ChunkOptions<'_>,
) -> Vec<PendingChunk> {
    let entries = graph.entries();
    let settings = options.settings;
    let mut claimed = vec![false; graph.len()];

    let groups = if options.css_chunking && options.splitting {
        let lane: Vec<ModuleId> = order
            .iter()
            .copied()
            .filter(|&m| graph.module(m).is_css && reach.is_reached(m) && !entries.contains(&m))
            .collect();
        claim_groups(graph, reach, &lane, settings, &mut claimed)
    } else {
        Vec::new()
    };

    let sets: Vec<Vec<ModuleId>> = (0..entries.len())
        .map(|index| {
            order
                .iter()
                .copied()
                .filter(|&m| {
                    graph.module(m).is_css && !claimed[m] && reach.signature(m).contains(&index)
                })
                .collect()
        })
        .collect();

    if !options.css_chunking {
        return sets
            .into_iter()
            .enumerate()
            .filter(|(_, set)| !set.is_empty())
            .map(|(index, modules)| PendingChunk {
                name: entry_name(graph, entries[index]),
                kind: ChunkKind::Entry,
                entries: vec![index],
                modules,
                max_size: settings.max_size,
            })
            .collect();
    }

    // (key, entry indices, modules), in order of first entry.
    let mut distinct: Vec<(String, Vec<usize>, Vec<ModuleId>)> = Vec::new();
    let mut slots: HashMap<String, usize> = HashMap::default();
    for (index, modules) in sets.into_iter().enumerate() {
        if modules.is_empty() {
            continue;
        }
        let key = content_key(graph, &modules);
        if let Some(&slot) = slots.get(&key) {
            distinct[slot].1.push(index);
        } else {
            slots.insert(key.clone(), distinct.len());
            distinct.push((key, vec![index], modules));
        }
    }
    debug!(
        entries = entries.len(),
        distinct = distinct.len(),
        "deduplicated stylesheet sets"
    );

    let mut chunks = Vec::with_capacity(distinct.len() + groups.len());
    let mut shared = Vec::new();
    for (key, served, modules) in distinct {
        if let [index] = served.as_slice() {
            chunks.push(PendingChunk {
                name: entry_name(graph, entries[*index]),
                kind: ChunkKind::Entry,
                entries: served,
                modules,
                max_size: settings.max_size,
            });
        } else {
            shared.push(PendingChunk {
                name: format!("shared-{}", &key[..8]),
                kind: ChunkKind::Shared,
                entries: served,
                modules,
                max_size: settings.max_size,
            });
        }
    }
    shared.sort_by(|a, b| a.name.cmp(&b.name));
    chunks.extend(groups);
    chunks.extend(shared);
    chunks
}

#[cfg(test)]
mod tests {
    use super::super::{ChunkGraph, ChunkType};
    use super::*;
    use crate::config::{AdvancedChunksConfig, ChunkGroupConfig, SplitSettings};
    use crate::graph::tests::graph_of;

    fn css_chunks(
        graph: &mut ModuleGraph,
        css_chunking: bool,
        settings: &SplitSettings,
    ) -> Vec<(String, ChunkKind, Vec<ModuleId>)> {
        let order = graph.evaluation_order();
        let chunks = ChunkGraph::build(
            graph,
            &order,
            &ChunkOptions {
                splitting: true,
                css_chunking,
                settings,
            },
        );
        chunks
            .of_type(ChunkType::Css)
            .map(|c| (c.name.clone(), c.kind, c.modules.clone()))
            .collect()
    }

    /// Entries `a` and `b` importing the given stylesheets; `/base.css` is
    /// `@import`ed by `/theme.css`.
    fn entries_with(a: &[usize], b: &[usize]) -> ModuleGraph {
        let mut graph = graph_of(&[
            ("/src/a.js", a, &[], false),
            ("/src/b.js", b, &[], false),
            ("/src/theme.css", &[3], &[], false),
            ("/src/base.css", &[], &[], false),
            ("/src/extra.css", &[], &[], false),
        ]);
        graph.set_entries(vec![0, 1]);
        graph
    }

    #[test]
    fn test_identical_sets_collapse_with_css_chunking() {
        let mut graph = entries_with(&[2], &[2]);
        let chunks = css_chunks(&mut graph, true, &SplitSettings::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].1, ChunkKind::Shared);
        assert_eq!(chunks[0].2, vec![3, 2]);
    }

    #[test]
    fn test_one_chunk_per_entry_without_css_chunking() {
        let mut graph = entries_with(&[2], &[2]);
        let chunks = css_chunks(&mut graph, false, &SplitSettings::default());
        let names: Vec<&str> = chunks.iter().map(|c| c.0.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_differing_sets_stay_separate() {
        let mut graph = entries_with(&[2], &[2, 4]);
        let chunks = css_chunks(&mut graph, true, &SplitSettings::default());
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.1 == ChunkKind::Entry));
    }

    #[test]
    fn test_group_claims_common_subset() {
        let settings = SplitSettings::from_config(&AdvancedChunksConfig {
            groups: vec![ChunkGroupConfig::named("theme").test(r"theme\.css|base\.css")],
            ..Default::default()
        })
        .unwrap();
        let mut graph = entries_with(&[2], &[2, 4]);
        let chunks = css_chunks(&mut graph, true, &settings);
        let names: Vec<&str> = chunks.iter().map(|c| c.0.as_str()).collect();
        assert_eq!(names, vec!["b", "theme"]);
        assert_eq!(chunks[1].2, vec![3, 2]);
    }

    #[test]
    fn test_entry_without_stylesheets_gets_no_css_chunk() {
        let mut graph = entries_with(&[], &[4]);
        let chunks = css_chunks(&mut graph, true, &SplitSettings::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].0, "b");
    }
}
