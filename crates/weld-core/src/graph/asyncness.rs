//! Transitive async classification.
//!
//! A module is transitively async if it awaits at its top level or statically imports a
//! transitively async module. Components are classified as a whole, in dependency-first
//! order, so a module importing into a cycle only sees fully classified components.
//! Dynamic imports never make the importer async.

use super::{strongly_connected_components, Components, ModuleGraph};
use crate::error::{Error, Result};
use tracing::debug;

/// Set [`super::ModuleRecord::transitively_async`] on every module, then check the
/// result is a fixed point.
pub fn classify_async(graph: &mut ModuleGraph) -> Result<Components> {
    let components = strongly_connected_components(graph);

    for members in components.iter() {
        let is_async = members.iter().any(|&id| {
            let module = graph.module(id);
            module.is_async
                || module
                    .dependencies
                    .iter()
                    .any(|&dep| graph.module(dep).transitively_async)
        });
        if is_async && members.len() > 1 {
            debug!(members = members.len(), "async cycle");
        }
        for &id in members {
            if let Some(module) = graph.get_mut(id) {
                module.transitively_async = is_async;
            }
        }
    }

    verify(graph)?;
    Ok(components)
}

/// Every static edge must respect the classification.
fn verify(graph: &ModuleGraph) -> Result<()> {
    for module in graph.iter() {
        if module.is_async && !module.transitively_async {
            return Err(Error::cycle_classification(format!(
                "{} awaits at top level but is classified sync",
                module.display_path()
            )));
        }
        if module.transitively_async {
            continue;
        }
        if let Some(&dep) = module
            .dependencies
            .iter()
            .find(|&&dep| graph.module(dep).transitively_async)
        {
            return Err(Error::cycle_classification(format!(
                "{} is classified sync but imports async {}",
                module.display_path(),
                graph.module(dep).display_path()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::graph_of;

    fn async_flags(graph: &ModuleGraph) -> Vec<bool> {
        graph.iter().map(|m| m.transitively_async).collect()
    }

    #[test]
    fn test_propagates_to_importers_only() {
        // a -> b -> c(tla), d -> b, e independent
        let mut graph = graph_of(&[
            ("/a.js", &[1], &[], false),
            ("/b.js", &[2], &[], false),
            ("/c.js", &[], &[], true),
            ("/d.js", &[1], &[], false),
            ("/e.js", &[], &[], false),
        ]);
        classify_async(&mut graph).unwrap();
        assert_eq!(async_flags(&graph), vec![true, true, true, true, false]);
    }

    #[test]
    fn test_propagates_through_cycle_from_innermost_module() {
        // entry -> a -> b -> c -> a, c -> inner(tla); side -> a
        let mut graph = graph_of(&[
            ("/entry.js", &[1], &[], false),
            ("/a.js", &[2], &[], false),
            ("/b.js", &[3], &[], false),
            ("/c.js", &[1, 4], &[], false),
            ("/inner.js", &[], &[], true),
            ("/side.js", &[1], &[], false),
            ("/leaf.js", &[], &[], false),
        ]);
        let components = classify_async(&mut graph).unwrap();
        assert_eq!(
            async_flags(&graph),
            vec![true, true, true, true, true, true, false]
        );
        assert_eq!(components.component_of(1), components.component_of(3));
    }

    #[test]
    fn test_cycle_member_async_makes_whole_cycle_async() {
        // a <-> b, b has tla; a was reached first
        let mut graph = graph_of(&[("/a.js", &[1], &[], false), ("/b.js", &[0], &[], true)]);
        classify_async(&mut graph).unwrap();
        assert_eq!(async_flags(&graph), vec![true, true]);
    }

    #[test]
    fn test_dynamic_import_does_not_propagate() {
        let mut graph = graph_of(&[("/a.js", &[], &[1], false), ("/b.js", &[], &[], true)]);
        classify_async(&mut graph).unwrap();
        assert_eq!(async_flags(&graph), vec![false, true]);
    }

    #[test]
    fn test_verify_rejects_inconsistent_classification() {
        let mut graph = graph_of(&[("/a.js", &[1], &[], false), ("/b.js", &[], &[], true)]);
        classify_async(&mut graph).unwrap();
        graph.get_mut(0).unwrap().transitively_async = false;
        let err = verify(&graph).unwrap_err();
        assert_eq!(err.code(), crate::error::codes::BUILD_CYCLE_CLASSIFICATION);
    }
}
