//! `package.json` `exports` / `imports` evaluation.
//!
//! Supports:
//! - Root exports (`"exports": "./index.js"`, `{ ".": ... }`, root condition objects)
//! - Subpath exports (`"./feature"`)
//! - Pattern exports with a single `*` (`"./*"`, `"./features/*.js"`)
//! - Condition objects, nested to any depth, and fallback arrays
//! - `#`-prefixed `imports` entries, exact and pattern keys
//!
//! Conditions are matched by preference: the first condition in the caller's list that
//! the target object defines wins. `default` is always accepted last.

use serde_json::{Map, Value};

/// How the importing statement loads the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub enum ResolutionKind {
    /// `import`, `export ... from`, `import()`
    #[default]
    Import,
    /// `require()`
    Require,
}

impl ResolutionKind {
    /// The kind-specific export condition.
    #[must_use]
    pub fn condition(self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::Require => "require",
        }
    }
}

impl std::fmt::Display for ResolutionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.condition())
    }
}

const MAX_CONDITION_DEPTH: usize = 8;

/// Resolve `subpath` (`"."` for the package root) against the `exports` field.
///
/// Returns the target (starting with `./`) or `None` if the field does not map it.
#[must_use]
pub fn resolve_exports(pkg_json: &Value, subpath: &str, conditions: &[&str]) -> Option<String> {
    let exports = pkg_json.get("exports")?;

    // String, array, or a condition object apply to "." only.
    let is_subpath_map = exports
        .as_object()
        .is_some_and(|obj| obj.keys().any(|k| k.starts_with('.')));
    if !is_subpath_map {
        return if subpath == "." {
            resolve_target(exports, conditions, None, 0)
        } else {
            None
        };
    }

    let obj = exports.as_object()?;
    resolve_in_map(obj, subpath, conditions)
}

/// Resolve a `#`-prefixed specifier against the `imports` field.
#[must_use]
pub fn resolve_imports(pkg_json: &Value, specifier: &str, conditions: &[&str]) -> Option<String> {
    if !specifier.starts_with('#') {
        return None;
    }
    let imports = pkg_json.get("imports")?.as_object()?;
    resolve_in_map(imports, specifier, conditions)
}

/// Whether the package declares an `exports` field at all.
#[must_use]
pub fn has_exports(pkg_json: &Value) -> bool {
    pkg_json.get("exports").is_some_and(|v| !v.is_null())
}

fn resolve_in_map(map: &Map<String, Value>, key: &str, conditions: &[&str]) -> Option<String> {
    // Exact keys beat patterns.
    if let Some(target) = map.get(key) {
        if !key.contains('*') {
            return resolve_target(target, conditions, None, 0);
        }
    }

    let mut best: Option<(&str, &Value, &str)> = None;
    for (pattern, target) in map {
        let Some(star) = match_pattern(pattern, key) else {
            continue;
        };
        let better = match best {
            None => true,
            Some((current, _, _)) => pattern_key_compare(pattern, current).is_lt(),
        };
        if better {
            best = Some((pattern.as_str(), target, star));
        }
    }

    let (_, target, star) = best?;
    resolve_target(target, conditions, Some(star), 0)
}

/// Order pattern keys from most to least specific: longer prefix before the `*` first,
/// then longer key, then lexicographic.
fn pattern_key_compare(a: &str, b: &str) -> std::cmp::Ordering {
    let prefix = |k: &str| k.find('*').unwrap_or(k.len());
    prefix(b)
        .cmp(&prefix(a))
        .then_with(|| b.len().cmp(&a.len()))
        .then_with(|| a.cmp(b))
}

/// Match `key` against a pattern with exactly one `*`, returning the substituted part.
fn match_pattern<'k>(pattern: &str, key: &'k str) -> Option<&'k str> {
    let star = pattern.find('*')?;
    if pattern[star + 1..].contains('*') {
        return None;
    }
    let (prefix, suffix) = (&pattern[..star], &pattern[star + 1..]);
    if key.len() < prefix.len() + suffix.len() {
        return None;
    }
    if !key.starts_with(prefix) || !key.ends_with(suffix) {
        return None;
    }
    let value = &key[prefix.len()..key.len() - suffix.len()];
    (!value.is_empty()).then_some(value)
}

fn resolve_target(
    target: &Value,
    conditions: &[&str],
    star: Option<&str>,
    depth: usize,
) -> Option<String> {
    if depth > MAX_CONDITION_DEPTH {
        return None;
    }
    match target {
        Value::String(s) => substitute(s, star),
        Value::Array(items) => items
            .iter()
            .find_map(|item| resolve_target(item, conditions, star, depth + 1)),
        Value::Object(obj) => conditions
            .iter()
            .copied()
            .chain(std::iter::once("default"))
            .find_map(|cond| obj.get(cond))
            .and_then(|next| resolve_target(next, conditions, star, depth + 1)),
        _ => None,
    }
}

/// Validate a target and substitute the pattern match.
///
/// Targets must be package-relative (`./`) and may not climb out of the package.
fn substitute(target: &str, star: Option<&str>) -> Option<String> {
    if !target.starts_with("./") {
        return None;
    }
    let result = match star {
        Some(value) => target.replace('*', value),
        None => target.to_string(),
    };
    if result.split('/').any(|segment| segment == "..") {
        return None;
    }
    Some(result)
}
