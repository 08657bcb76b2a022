//! Share counts and module extraction into group and shared chunks.

use super::{ChunkKind, PendingChunk};
use crate::config::SplitSettings;
use crate::graph::{ModuleGraph, ModuleId};
use std::collections::BTreeMap;
use tracing::debug;
use weld_util::hash::short_hash;

/// Which entries reach each module, over static and dynamic edges.
#[derive(Debug)]
pub(crate) struct Reach {
    /// Sorted entry indices per module.
    signatures: Vec<Vec<usize>>,
}

impl Reach {
    pub(crate) fn compute(graph: &ModuleGraph) -> Self {
        let mut signatures = vec![Vec::new(); graph.len()];
        let mut seen = vec![usize::MAX; graph.len()];

        for (index, &entry) in graph.entries().iter().enumerate() {
            let mut stack = vec![entry];
            seen[entry] = index;
            while let Some(id) = stack.pop() {
                signatures[id].push(index);
                let module = graph.module(id);
                for &dep in module.dependencies.iter().chain(&module.dynamic_dependencies) {
                    if seen[dep] != index {
                        seen[dep] = index;
                        stack.push(dep);
                    }
                }
            }
        }
        Self { signatures }
    }

    pub(crate) fn signature(&self, module: ModuleId) -> &[usize] {
        &self.signatures[module]
    }

    /// Number of distinct entries that reach `module`.
    pub(crate) fn share_count(&self, module: ModuleId) -> usize {
        self.signatures[module].len()
    }

    pub(crate) fn is_reached(&self, module: ModuleId) -> bool {
        !self.signatures[module].is_empty()
    }

    /// Sorted union of the signatures of `modules`.
    pub(crate) fn union(&self, modules: &[ModuleId]) -> Vec<usize> {
        let mut entries: Vec<usize> = modules
            .iter()
            .flat_map(|&m| self.signatures[m].iter().copied())
            .collect();
        entries.sort_unstable();
        entries.dedup();
        entries
    }
}

fn total_size(graph: &ModuleGraph, modules: &[ModuleId]) -> u64 {
    modules.iter().map(|&m| graph.module(m).size).sum()
}

/// Let every configured group claim its modules from `lane`, highest priority first.
///
/// `lane` is in evaluation order and never contains entry modules. A group that fails
/// its thresholds claims nothing and its modules fall through to later groups.
pub(crate) fn claim_groups(
    graph: &ModuleGraph,
    reach: &Reach,
    lane: &[ModuleId],
    settings: &SplitSettings,
    claimed: &mut [bool],
) -> Vec<PendingChunk> {
    let mut chunks = Vec::new();

    for group in &settings.groups {
        let candidates: Vec<ModuleId> = lane
            .iter()
            .copied()
            .filter(|&m| !claimed[m] && group.matches(&graph.module(m).display_path()))
            .collect();
        if candidates.is_empty() {
            continue;
        }

        let members = if group.enforce {
            candidates
        } else {
            let eligible: Vec<ModuleId> = candidates
                .into_iter()
                .filter(|&m| {
                    let shares = reach.share_count(m);
                    shares >= group.min_chunks
                        && shares <= group.max_chunks
                        && settings.module_size_eligible(graph.module(m).size)
                })
                .collect();
            let size = total_size(graph, &eligible);
            if eligible.is_empty() || size < group.min_size || size > group.max_size {
                debug!(
                    group = %group.name,
                    size,
                    modules = eligible.len(),
                    "group thresholds not met"
                );
                continue;
            }
            eligible
        };

        for &m in &members {
            claimed[m] = true;
        }
        debug!(group = %group.name, modules = members.len(), "group claimed modules");
        chunks.push(PendingChunk {
            name: group.name.clone(),
            kind: ChunkKind::Group,
            entries: reach.union(&members),
            modules: members,
            max_size: group.max_size,
        });
    }
    chunks
}

/// Move unclaimed modules shared by enough entries into one chunk per entry
/// signature. Chunks come back sorted by name.
pub(crate) fn extract_shared(
    graph: &ModuleGraph,
    reach: &Reach,
    lane: &[ModuleId],
    settings: &SplitSettings,
    claimed: &mut [bool],
) -> Vec<PendingChunk> {
    let threshold = settings.auto_share_threshold();
    let mut by_signature: BTreeMap<&[usize], Vec<ModuleId>> = BTreeMap::new();
    for &m in lane {
        if !claimed[m]
            && reach.share_count(m) >= threshold
            && settings.module_size_eligible(graph.module(m).size)
        {
            by_signature.entry(reach.signature(m)).or_default().push(m);
        }
    }

    let mut chunks = Vec::new();
    for (signature, modules) in by_signature {
        let size = total_size(graph, &modules);
        if size < settings.min_size || size > settings.max_size {
            debug!(size, modules = modules.len(), "shared set outside size range");
            continue;
        }
        let mut paths: Vec<String> = modules
            .iter()
            .map(|&m| graph.module(m).display_path())
            .collect();
        paths.sort();
        for &m in &modules {
            claimed[m] = true;
        }
        chunks.push(PendingChunk {
            name: format!("shared-{}", short_hash(&paths, 8)),
            kind: ChunkKind::Shared,
            entries: signature.to_vec(),
            modules,
            max_size: settings.max_size,
        });
    }
    chunks.sort_by(|a, b| a.name.cmp(&b.name));
    chunks
}
