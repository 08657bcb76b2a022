//! Module initialization plan.
//!
//! Every module gets a wrapper initializer. A wrapper first calls the initializers of
//! its sync dependencies in import order, then awaits all async dependencies together
//! (a single `Promise.all`), then runs the module body. Static edges that close a cycle
//! are not called: the target has already started, its exports are declared, and the
//! references resolve late.

use super::{ModuleGraph, ModuleId};
use crate::error::{Error, Result};
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use serde::Serialize;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WrapperKind {
    Sync,
    Async,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitWrapper {
    #[serde(skip)]
    pub module: ModuleId,
    pub path: String,
    /// Initializer function name, unique within the build.
    pub name: String,
    pub kind: WrapperKind,
    /// Called in order before the body.
    pub sync_deps: Vec<ModuleId>,
    /// Awaited concurrently before the body.
    pub async_deps: Vec<ModuleId>,
    /// Cyclic back references; bound late, never called.
    pub deferred: Vec<ModuleId>,
}

/// Wrappers in evaluation order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InitPlan {
    wrappers: Vec<InitWrapper>,
    #[serde(skip)]
    position: HashMap<ModuleId, usize>,
}

impl InitPlan {
    /// Plan initializers for `order` (from [`ModuleGraph::evaluation_order`]).
    #[must_use]
    pub fn build(graph: &ModuleGraph, order: &[ModuleId]) -> Self {
        let names = initializer_names(graph);
        let mut finished = vec![false; graph.len()];
        let mut plan = Self::default();

        for &id in order {
            let module = graph.module(id);
            let mut wrapper = InitWrapper {
                module: id,
                path: module.display_path(),
                name: names[id].clone(),
                kind: if module.transitively_async {
                    WrapperKind::Async
                } else {
                    WrapperKind::Sync
                },
                sync_deps: Vec::new(),
                async_deps: Vec::new(),
                deferred: Vec::new(),
            };
            for &dep in &module.dependencies {
                if !finished[dep] {
                    wrapper.deferred.push(dep);
                } else if graph.module(dep).transitively_async {
                    wrapper.async_deps.push(dep);
                } else {
                    wrapper.sync_deps.push(dep);
                }
            }
            finished[id] = true;
            plan.position.insert(id, plan.wrappers.len());
            plan.wrappers.push(wrapper);
        }
        plan
    }

    #[must_use]
    pub fn wrappers(&self) -> &[InitWrapper] {
        &self.wrappers
    }

    #[must_use]
    pub fn get(&self, module: ModuleId) -> Option<&InitWrapper> {
        self.position.get(&module).map(|&i| &self.wrappers[i])
    }

    /// Check the plan honours the initialization ordering invariant: no sync wrapper
    /// awaits, and every called dependency starts before its importer.
    pub fn verify(&self) -> Result<()> {
        for (index, wrapper) in self.wrappers.iter().enumerate() {
            if wrapper.kind == WrapperKind::Sync {
                let rendered = self.render(wrapper);
                if !wrapper.async_deps.is_empty() || rendered.contains("await ") {
                    return Err(Error::cycle_classification(format!(
                        "sync initializer {} awaits an async dependency",
                        wrapper.name
                    )));
                }
            }
            for dep in wrapper.sync_deps.iter().chain(&wrapper.async_deps) {
                let starts_before = self.position.get(dep).is_some_and(|&p| p < index);
                if !starts_before {
                    return Err(Error::cycle_classification(format!(
                        "{} runs before its dependency {}",
                        wrapper.name,
                        self.name_of(*dep)
                    )));
                }
            }
        }
        Ok(())
    }

    fn name_of(&self, module: ModuleId) -> &str {
        self.get(module).map_or("<unknown>", |w| w.name.as_str())
    }

    /// Wrapper stub text:
    ///
    /// ```text
    /// var init_a = __esm(async () => {
    ///   init_b();
    ///   await Promise.all([init_c(), init_d()]);
    /// });
    /// ```
    #[must_use]
    pub fn render(&self, wrapper: &InitWrapper) -> String {
        let mut out = String::new();
        let arrow = match wrapper.kind {
            WrapperKind::Sync => "() =>",
            WrapperKind::Async => "async () =>",
        };
        let _ = writeln!(out, "var {} = __esm({arrow} {{", wrapper.name);
        for dep in &wrapper.sync_deps {
            let _ = writeln!(out, "  {}();", self.name_of(*dep));
        }
        match wrapper.async_deps.as_slice() {
            [] => {}
            [single] => {
                let _ = writeln!(out, "  await {}();", self.name_of(*single));
            }
            many => {
                let calls: Vec<String> = many
                    .iter()
                    .map(|dep| format!("{}()", self.name_of(*dep)))
                    .collect();
                let _ = writeln!(out, "  await Promise.all([{}]);", calls.join(", "));
            }
        }
        for dep in &wrapper.deferred {
            let _ = writeln!(out, "  // late-bound: {}", self.name_of(*dep));
        }
        out.push_str("});\n");
        out
    }

    /// Render every wrapper in evaluation order.
    #[must_use]
    pub fn render_all(&self) -> String {
        self.wrappers.iter().map(|w| self.render(w)).collect()
    }
}

/// `init_<file stem>`, made identifier-safe and unique in module id order.
///
/// A stem seen before gets the lowest numeric suffix not already taken, including by a
/// module whose own stem ends in digits.
fn initializer_names(graph: &ModuleGraph) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::default();
    let mut next_suffix: HashMap<String, usize> = HashMap::default();
    graph
        .iter()
        .map(|module| {
            let stem = module
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mut base: String = stem
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect();
            if base.is_empty() {
                base.push_str("module");
            }
            let mut name = format!("init_{base}");
            if taken.contains(&name) {
                let suffix = next_suffix.entry(base.clone()).or_insert(2);
                loop {
                    name = format!("init_{base}{suffix}");
                    *suffix += 1;
                    if !taken.contains(&name) {
                        break;
                    }
                }
            }
            taken.insert(name.clone());
            name
        })
        .collect()
}
