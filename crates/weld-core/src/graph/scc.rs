//! Strongly connected components of the static import graph (Tarjan).
//!
//! Iterative so deep import chains cannot overflow the stack. Components come out
//! dependencies-first: every component is emitted after all components it imports.

use super::{ModuleGraph, ModuleId};

/// SCCs in dependency-first order, plus a module -> component index.
#[derive(Debug, Clone, Default)]
pub struct Components {
    members: Vec<Vec<ModuleId>>,
    component_of: Vec<usize>,
}

impl Components {
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[ModuleId]> {
        self.members.iter().map(Vec::as_slice)
    }

    #[must_use]
    pub fn members(&self, component: usize) -> &[ModuleId] {
        &self.members[component]
    }

    #[must_use]
    pub fn component_of(&self, module: ModuleId) -> usize {
        self.component_of[module]
    }
}

const UNVISITED: usize = usize::MAX;

#[must_use]
pub fn strongly_connected_components(graph: &ModuleGraph) -> Components {
    let n = graph.len();
    let mut index = vec![UNVISITED; n];
    let mut low_link = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<ModuleId> = Vec::new();
    let mut next_index = 0usize;
    let mut components = Components {
        members: Vec::new(),
        component_of: vec![0; n],
    };

    for root in 0..n {
        if index[root] != UNVISITED {
            continue;
        }
        // (module, next dependency index)
        let mut work: Vec<(ModuleId, usize)> = vec![(root, 0)];
        index[root] = next_index;
        low_link[root] = next_index;
        next_index += 1;
        stack.push(root);
        on_stack[root] = true;

        while let Some(frame) = work.last_mut() {
            let (module, cursor) = *frame;
            if let Some(&dep) = graph.module(module).dependencies.get(cursor) {
                frame.1 += 1;
                if index[dep] == UNVISITED {
                    index[dep] = next_index;
                    low_link[dep] = next_index;
                    next_index += 1;
                    stack.push(dep);
                    on_stack[dep] = true;
                    work.push((dep, 0));
                } else if on_stack[dep] {
                    low_link[module] = low_link[module].min(index[dep]);
                }
                continue;
            }

            work.pop();
            if let Some(&(parent, _)) = work.last() {
                low_link[parent] = low_link[parent].min(low_link[module]);
            }
            if low_link[module] == index[module] {
                let component = components.members.len();
                let mut members = Vec::new();
                while let Some(member) = stack.pop() {
                    on_stack[member] = false;
                    components.component_of[member] = component;
                    members.push(member);
                    if member == module {
                        break;
                    }
                }
                members.reverse();
                components.members.push(members);
            }
        }
    }

    components
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::graph_of;

    #[test]
    fn test_acyclic_components_are_dependency_first() {
        // a -> b -> c
        let graph = graph_of(&[
            ("/a.js", &[1], &[], false),
            ("/b.js", &[2], &[], false),
            ("/c.js", &[], &[], false),
        ]);
        let components = strongly_connected_components(&graph);
        let order: Vec<_> = components.iter().map(<[usize]>::to_vec).collect();
        assert_eq!(order, vec![vec![2], vec![1], vec![0]]);
    }

    #[test]
    fn test_cycle_is_one_component() {
        // a -> b -> c -> b, c -> d
        let graph = graph_of(&[
            ("/a.js", &[1], &[], false),
            ("/b.js", &[2], &[], false),
            ("/c.js", &[1, 3], &[], false),
            ("/d.js", &[], &[], false),
        ]);
        let components = strongly_connected_components(&graph);
        assert_eq!(components.len(), 3);
        assert_eq!(components.component_of(1), components.component_of(2));
        assert!(components.component_of(3) < components.component_of(1));
        assert!(components.component_of(1) < components.component_of(0));
        let mut cycle = components.members(components.component_of(1)).to_vec();
        cycle.sort_unstable();
        assert_eq!(cycle, vec![1, 2]);
    }

    #[test]
    fn test_dynamic_edges_do_not_join_components() {
        // a -> b, b -> import(a)
        let graph = graph_of(&[("/a.js", &[1], &[], false), ("/b.js", &[], &[0], false)]);
        let components = strongly_connected_components(&graph);
        assert_eq!(components.len(), 2);
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        let paths: Vec<String> = (0..20_000).map(|i| format!("/m{i}.js")).collect();
        let deps: Vec<Vec<usize>> = (0..20_000)
            .map(|i| if i + 1 < 20_000 { vec![i + 1] } else { vec![] })
            .collect();
        let table: Vec<(&str, &[usize], &[usize], bool)> = paths
            .iter()
            .zip(&deps)
            .map(|(p, d)| (p.as_str(), d.as_slice(), &[][..], false))
            .collect();
        let graph = graph_of(&table);
        let components = strongly_connected_components(&graph);
        assert_eq!(components.len(), 20_000);
        assert_eq!(components.members(0), &[19_999]);
    }
}
