//! `tsconfig.json` / `jsconfig.json` path mapping.
//!
//! The nearest config above the importer is loaded together with every config it
//! references (transitively, each at most once). `paths` entries are merged with the
//! nearest config winning on key collision; `baseUrl` comes from the nearest config.

use super::pkg_json::JsonCache;
use crate::fs::{FileSystem, Fingerprint};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

/// One `compilerOptions.paths` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapping {
    pub pattern: String,
    pub targets: Vec<String>,
    /// Directory the targets are relative to.
    pub base: PathBuf,
}

/// Merged path mapping for one importer.
#[derive(Debug, Clone, Default)]
pub struct PathMappings {
    pub base_url: Option<PathBuf>,
    pub paths: Vec<PathMapping>,
    /// Every config file that contributed, with the fingerprint it was read under.
    pub sources: Vec<(PathBuf, Fingerprint)>,
}

impl PathMappings {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.base_url.is_none() && self.paths.is_empty()
    }

    /// Candidate paths for a bare specifier, most specific mapping first.
    ///
    /// An exact key beats any pattern; among patterns the longest prefix wins. The
    /// winning mapping's targets are returned in declaration order.
    #[must_use]
    pub fn candidates(&self, specifier: &str) -> Vec<PathBuf> {
        let mut best: Option<(&PathMapping, &str, usize)> = None;
        for mapping in &self.paths {
            let Some((star, rank)) = match_key(&mapping.pattern, specifier) else {
                continue;
            };
            if best.map_or(true, |(_, _, current)| rank > current) {
                best = Some((mapping, star, rank));
            }
        }

        let Some((mapping, star, _)) = best else {
            return Vec::new();
        };
        mapping
            .targets
            .iter()
            .map(|target| mapping.base.join(target.replacen('*', star, 1)))
            .collect()
    }
}

/// Returns the `*` capture and a rank (exact keys rank above every pattern).
fn match_key<'s>(pattern: &str, specifier: &'s str) -> Option<(&'s str, usize)> {
    match pattern.find('*') {
        None => (pattern == specifier).then_some(("", usize::MAX)),
        Some(star) => {
            let (prefix, suffix) = (&pattern[..star], &pattern[star + 1..]);
            if specifier.len() >= prefix.len() + suffix.len()
                && specifier.starts_with(prefix)
                && specifier.ends_with(suffix)
            {
                Some((&specifier[prefix.len()..specifier.len() - suffix.len()], prefix.len()))
            } else {
                None
            }
        }
    }
}

/// Walk up from `dir` to the first directory holding one of `names`.
///
/// `is_file` sees every candidate in order, including the ones that turn out missing.
pub fn find_nearest(
    dir: &Path,
    names: &[String],
    mut is_file: impl FnMut(&Path) -> bool,
) -> Option<PathBuf> {
    let mut current = Some(dir);
    while let Some(d) = current {
        for name in names {
            let candidate = d.join(name);
            if is_file(&candidate) {
                return Some(candidate);
            }
        }
        current = d.parent();
    }
    None
}

/// Load the mappings rooted at `config_path`.
pub fn load_mappings(fs: &dyn FileSystem, cache: &JsonCache, config_path: &Path) -> PathMappings {
    let mut mappings = PathMappings::default();
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([config_path.to_path_buf()]);
    let mut nearest = true;

    while let Some(path) = queue.pop_front() {
        if !seen.insert(path.clone()) {
            continue;
        }
        let loaded = cache.load(fs, &path, true);
        mappings.sources.push((path.clone(), loaded.stamp));
        let Some(config) = loaded.value else {
            if loaded.stamp.exists() {
                tracing::warn!(path = %path.display(), "unreadable tsconfig ignored");
            }
            nearest = false;
            continue;
        };
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

        let options = config.get("compilerOptions");
        let base_url = options
            .and_then(|o| o.get("baseUrl"))
            .and_then(Value::as_str)
            .map(|b| crate::fs::normalize_path(&dir.join(b)));
        if nearest {
            mappings.base_url.clone_from(&base_url);
        }

        if let Some(paths) = options.and_then(|o| o.get("paths")).and_then(Value::as_object) {
            let base = base_url.clone().unwrap_or_else(|| dir.clone());
            for (pattern, targets) in paths {
                if mappings.paths.iter().any(|m| &m.pattern == pattern) {
                    continue;
                }
                let targets: Vec<String> = targets
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                if targets.is_empty() {
                    continue;
                }
                mappings.paths.push(PathMapping {
                    pattern: pattern.clone(),
                    targets,
                    base: base.clone(),
                });
            }
        }

        if let Some(references) = config.get("references").and_then(Value::as_array) {
            for reference in references {
                let Some(rel) = reference.get("path").and_then(Value::as_str) else {
                    continue;
                };
                let target = crate::fs::normalize_path(&dir.join(rel));
                let target = if fs.is_dir(&target) {
                    target.join("tsconfig.json")
                } else {
                    target
                };
                queue.push_back(target);
            }
        }
        nearest = false;
    }

    mappings
}
