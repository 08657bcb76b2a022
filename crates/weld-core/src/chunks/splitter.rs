//! Size-based splitting of oversized chunks.
//!
//! Members are grouped into components connected by static imports between members,
//! ignoring imports made by the chunk's roots (members no other member imports). Whole
//! components are packed into pieces in evaluation order; a component that alone
//! exceeds the limit is cut between modules. A module is never cut.

use crate::graph::{ModuleGraph, ModuleId};
use rustc_hash::FxHashMap as HashMap;

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        if a != b {
            // Lower index wins so roots follow member order.
            let (keep, merge) = if a < b { (a, b) } else { (b, a) };
            self.parent[merge] = keep;
        }
    }
}

/// Split `modules` (evaluation order) into pieces of at most `max_size` bytes each,
/// except pieces made of a single module larger than the limit.
pub(crate) fn split_by_size(
    graph: &ModuleGraph,
    modules: &[ModuleId],
    max_size: u64,
) -> Vec<Vec<ModuleId>> {
    let size = |m: ModuleId| graph.module(m).size;
    let total: u64 = modules.iter().map(|&m| size(m)).sum();
    if total <= max_size || modules.len() < 2 {
        return vec![modules.to_vec()];
    }

    let index: HashMap<ModuleId, usize> = modules.iter().enumerate().map(|(i, &m)| (m, i)).collect();
    let mut imported = vec![false; modules.len()];
    for &m in modules {
        for dep in &graph.module(m).dependencies {
            if let Some(&i) = index.get(dep) {
                if *dep != m {
                    imported[i] = true;
                }
            }
        }
    }

    let mut sets = DisjointSet::new(modules.len());
    for (i, &m) in modules.iter().enumerate() {
        if !imported[i] {
            continue;
        }
        for dep in &graph.module(m).dependencies {
            if let Some(&j) = index.get(dep) {
                sets.union(i, j);
            }
        }
    }

    // Components ordered by their first member.
    let mut components: Vec<Vec<usize>> = Vec::new();
    let mut slot: HashMap<usize, usize> = HashMap::default();
    for i in 0..modules.len() {
        let root = sets.find(i);
        let at = *slot.entry(root).or_insert_with(|| {
            components.push(Vec::new());
            components.len() - 1
        });
        components[at].push(i);
    }

    let mut pieces: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut current_size = 0u64;
    for component in components {
        let component_size: u64 = component.iter().map(|&i| size(modules[i])).sum();
        if component_size > max_size {
            for i in component {
                let s = size(modules[i]);
                if !current.is_empty() && current_size + s > max_size {
                    pieces.push(std::mem::take(&mut current));
                    current_size = 0;
                }
                current.push(i);
                current_size += s;
            }
            continue;
        }
        if !current.is_empty() && current_size + component_size > max_size {
            pieces.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current.extend(component);
        current_size += component_size;
    }
    if !current.is_empty() {
        pieces.push(current);
    }

    pieces
        .into_iter()
        .map(|mut piece| {
            piece.sort_unstable();
            piece.into_iter().map(|i| modules[i]).collect()
        })
        .collect()
}
