//! Module resolver for JavaScript/TypeScript/CSS imports.
//!
//! Supports:
//! - Relative and absolute specifiers with extension probing and `index.<ext>`
//! - Bare specifiers through `tsconfig` `paths`, then `baseUrl`, then `node_modules`
//! - `package.json` `exports` (root, subpath, pattern, conditions), then `main_fields`
//! - `#`-prefixed specifiers through the nearest `package.json` `imports`
//! - `node:` builtins and URLs, reported as externals
//!
//! Every answer, found or not, is cached in a [`ResolveCache`] together with the
//! fingerprints of the paths that decided it.

mod cache;
pub mod exports;
pub mod pkg_json;
pub mod tsconfig;

pub use cache::{
    CacheStats, Lookup, ResolveCache, ResolveCacheEntry, ResolveKey, SpecifierKind, Witness,
};
pub use exports::ResolutionKind;

use crate::fs::{normalize_path, EntryKind, FileSystem, FileSystemRef, Fingerprint};
use pkg_json::JsonCache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::trace;

/// Maximum number of tried paths to record.
const MAX_TRIED_PATHS: usize = 20;

/// Node builtins that may be imported without the `node:` prefix.
const NODE_BUILTINS: &[&str] = &[
    "assert", "buffer", "child_process", "crypto", "events", "fs", "http", "https", "net",
    "os", "path", "process", "querystring", "readline", "stream", "string_decoder", "timers",
    "tty", "url", "util", "worker_threads", "zlib",
];

/// Resolver configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolverConfig {
    /// Extensions to try, in order.
    pub extensions: Vec<String>,
    /// `package.json` fields consulted when `exports` is absent.
    pub main_fields: Vec<String>,
    /// Extra `exports` conditions, tried after `import`/`require`.
    pub conditions: Vec<String>,
    /// Path-mapping config file names, in preference order.
    pub tsconfig_names: Vec<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| (*s).to_string()).collect();
        Self {
            extensions: strings(&[".ts", ".tsx", ".js", ".jsx", ".mjs", ".cjs", ".json", ".css"]),
            main_fields: strings(&["module", "main"]),
            conditions: Vec::new(),
            tsconfig_names: strings(&["tsconfig.json", "jsconfig.json"]),
        }
    }
}

/// Reason codes for unresolved imports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolveReasonCode {
    SpecifierInvalid,
    UnsupportedScheme,
    NotFound,
    IsDirectory,
    NodeModulesNotFound,
    PackageMainNotFound,
    /// `exports` exists but maps nothing for the subpath.
    ExportsNotFound,
    /// `exports` names a target file that does not exist.
    ExportsTargetNotFound,
    ImportsNotFound,
}

impl std::fmt::Display for ResolveReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SpecifierInvalid => "SPECIFIER_INVALID",
            Self::UnsupportedScheme => "UNSUPPORTED_SCHEME",
            Self::NotFound => "NOT_FOUND",
            Self::IsDirectory => "IS_DIRECTORY",
            Self::NodeModulesNotFound => "NODE_MODULES_NOT_FOUND",
            Self::PackageMainNotFound => "PACKAGE_MAIN_NOT_FOUND",
            Self::ExportsNotFound => "EXPORTS_NOT_FOUND",
            Self::ExportsTargetNotFound => "EXPORTS_TARGET_NOT_FOUND",
            Self::ImportsNotFound => "IMPORTS_NOT_FOUND",
        };
        write!(f, "{s}")
    }
}

/// Outcome of resolving one specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A file to bundle.
    Module(PathBuf),
    /// Left to the runtime (`node:` builtins, URLs, configured externals).
    External(String),
    NotFound {
        reason: ResolveReasonCode,
        /// Candidate paths tried (capped).
        tried: Vec<PathBuf>,
    },
}

impl Resolution {
    #[must_use]
    pub fn not_found(reason: ResolveReasonCode, tried: Vec<PathBuf>) -> Self {
        Self::NotFound { reason, tried }
    }

    #[must_use]
    pub fn is_found(&self) -> bool {
        !matches!(self, Self::NotFound { .. })
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Module(path) => Some(path),
            _ => None,
        }
    }
}

/// Caching resolver. One instance lives for the whole process and is shared by every
/// build; file-system changes are picked up through fingerprint validation.
#[derive(Debug)]
pub struct Resolver {
    fs: FileSystemRef,
    config: ResolverConfig,
    cache: ResolveCache,
    manifests: JsonCache,
}

impl Resolver {
    #[must_use]
    pub fn new(fs: FileSystemRef, config: ResolverConfig) -> Self {
        Self {
            fs,
            config,
            cache: ResolveCache::new(),
            manifests: JsonCache::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    #[must_use]
    pub fn fs(&self) -> &dyn FileSystem {
        self.fs.as_ref()
    }

    /// Resolve `specifier` imported from the file `from`.
    pub fn resolve(&self, from: &Path, specifier: &str, mode: ResolutionKind) -> Resolution {
        if specifier.is_empty() {
            return Resolution::not_found(ResolveReasonCode::SpecifierInvalid, Vec::new());
        }
        if specifier.starts_with("node:")
            || specifier.starts_with("data:")
            || specifier.contains("://")
        {
            return Resolution::External(specifier.to_string());
        }

        let key = ResolveKey::new(from, specifier, mode);
        let previous = match self.cache.lookup(self.fs(), &key) {
            Lookup::Hit(resolution) => {
                trace!(specifier, from = %from.display(), "resolve cache hit");
                return resolution;
            }
            Lookup::Miss { previous } => previous,
        };

        let mut search = Search::new(self, mode);
        let resolution = search.resolve(&key);
        self.cache
            .insert(key, resolution.clone(), search.witnesses, previous);
        resolution
    }

    /// Forget everything cached about `path` (a file or a directory subtree).
    pub fn invalidate(&self, path: &Path) -> usize {
        self.manifests.invalidate(path);
        self.cache.invalidate(path)
    }

    /// Clear all caches and stop caching. Resolution keeps working uncached.
    pub fn shutdown(&self) {
        self.cache.shutdown();
        self.manifests.clear();
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

/// Split `lodash/fp` into (`lodash`, `Some("fp")`), `@scope/pkg/sub` into
/// (`@scope/pkg`, `Some("sub")`).
#[must_use]
pub fn parse_bare_specifier(spec: &str) -> (&str, Option<&str>) {
    let name_end = if spec.starts_with('@') {
        spec.match_indices('/').nth(1).map(|(i, _)| i)
    } else {
        spec.find('/')
    };
    match name_end {
        Some(i) => (&spec[..i], Some(&spec[i + 1..]).filter(|s| !s.is_empty())),
        None => (spec, None),
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = OsString::from(path.as_os_str());
    s.push(suffix);
    PathBuf::from(s)
}

/// One uncached resolution: records tried candidates and decisive fingerprints.
struct Search<'r> {
    resolver: &'r Resolver,
    mode: ResolutionKind,
    tried: Vec<PathBuf>,
    witnesses: Vec<Witness>,
}

type Step = Result<PathBuf, ResolveReasonCode>;

impl<'r> Search<'r> {
    fn new(resolver: &'r Resolver, mode: ResolutionKind) -> Self {
        Self {
            resolver,
            mode,
            tried: Vec::new(),
            witnesses: Vec::new(),
        }
    }

    fn fs(&self) -> &'r dyn FileSystem {
        self.resolver.fs.as_ref()
    }

    fn stat(&self, path: &Path) -> Fingerprint {
        Fingerprint::of(self.fs(), path)
    }

    fn witness(&mut self, path: &Path) -> Fingerprint {
        if let Some(w) = self.witnesses.iter().find(|w| w.path == path) {
            return w.stamp;
        }
        let stamp = self.stat(path);
        self.witnesses.push(Witness {
            path: path.to_path_buf(),
            stamp,
        });
        stamp
    }

    /// Record the nearest existing directory at or above `path`'s parent.
    fn witness_container(&mut self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if self.witness(dir).kind == EntryKind::Directory {
                return;
            }
            current = dir.parent();
        }
    }

    fn add_tried(&mut self, path: &Path) {
        if self.tried.len() < MAX_TRIED_PATHS {
            self.tried.push(path.to_path_buf());
        }
    }

    fn is_file(&mut self, path: &Path) -> bool {
        self.add_tried(path);
        self.stat(path).kind == EntryKind::File
    }

    fn found(&mut self, path: &Path) -> Step {
        self.witness(path);
        let canonical = self
            .fs()
            .canonicalize(path)
            .unwrap_or_else(|_| path.to_path_buf());
        Ok(canonical)
    }

    fn conditions(&self) -> Vec<&'r str> {
        std::iter::once(self.mode.condition())
            .chain(self.resolver.config.conditions.iter().map(String::as_str))
            .collect()
    }

    fn load_manifest(&mut self, path: &Path) -> Option<Arc<Value>> {
        let loaded = self.resolver.manifests.load(self.fs(), path, false);
        if !self.witnesses.iter().any(|w| w.path == path) {
            self.witnesses.push(Witness {
                path: path.to_path_buf(),
                stamp: loaded.stamp,
            });
        }
        loaded.value
    }

    fn resolve(&mut self, key: &ResolveKey) -> Resolution {
        let from_dir = key
            .from
            .parent()
            .map_or_else(|| PathBuf::from("/"), Path::to_path_buf);
        let step = match key.kind {
            SpecifierKind::Relative => self.resolve_path(&from_dir.join(&key.specifier)),
            SpecifierKind::Absolute => self.resolve_path(Path::new(&key.specifier)),
            SpecifierKind::Imports => self.resolve_imports(&from_dir, &key.specifier),
            SpecifierKind::Bare => match self.resolve_bare(&from_dir, &key.specifier) {
                Err(reason) if NODE_BUILTINS.contains(&parse_bare_specifier(&key.specifier).0) => {
                    trace!(specifier = %key.specifier, %reason, "unresolved builtin is external");
                    return Resolution::External(key.specifier.clone());
                }
                other => other,
            },
        };
        match step {
            Ok(path) => Resolution::Module(path),
            Err(reason) => Resolution::not_found(reason, std::mem::take(&mut self.tried)),
        }
    }

    /// Exact file, then extensions, then directory.
    fn resolve_path(&mut self, base: &Path) -> Step {
        let base = normalize_path(base);
        self.witness_container(&base);

        if self.is_file(&base) {
            return self.found(&base);
        }
        if let Some(path) = self.try_extensions(&base) {
            return self.found(&path);
        }
        if self.witness(&base).kind == EntryKind::Directory {
            return self.resolve_directory(&base);
        }
        Err(ResolveReasonCode::NotFound)
    }

    fn try_extensions(&mut self, base: &Path) -> Option<PathBuf> {
        let resolver = self.resolver;
        for ext in &resolver.config.extensions {
            let candidate = with_suffix(base, ext);
            if self.is_file(&candidate) {
                return Some(candidate);
            }
        }

        // `./x.js` written in TypeScript sources refers to `./x.ts`.
        let ts_alternatives: &[&str] = match base.extension().and_then(|e| e.to_str()) {
            Some("js") => &["ts", "tsx"],
            Some("jsx") => &["tsx"],
            Some("mjs") => &["mts"],
            Some("cjs") => &["cts"],
            _ => &[],
        };
        for ext in ts_alternatives {
            let candidate = base.with_extension(ext);
            if self.is_file(&candidate) {
                return Some(candidate);
            }
        }
        None
    }

    fn try_index(&mut self, dir: &Path) -> Option<PathBuf> {
        let resolver = self.resolver;
        for ext in &resolver.config.extensions {
            let candidate = dir.join(format!("index{ext}"));
            if self.is_file(&candidate) {
                return Some(candidate);
            }
        }
        None
    }

    /// `package.json` main fields, then `index.<ext>`.
    fn resolve_directory(&mut self, dir: &Path) -> Step {
        let pkg_path = dir.join("package.json");
        let mut declared_main = false;
        if let Some(pkg) = self.load_manifest(&pkg_path) {
            let resolver = self.resolver;
            for field in &resolver.config.main_fields {
                let Some(main) = pkg.get(field).and_then(Value::as_str) else {
                    continue;
                };
                declared_main = true;
                let target = normalize_path(&dir.join(main));
                if self.is_file(&target) {
                    return self.found(&target);
                }
                if let Some(path) = self.try_extensions(&target) {
                    return self.found(&path);
                }
                if self.stat(&target).kind == EntryKind::Directory {
                    self.witness(&target);
                    if let Some(path) = self.try_index(&target) {
                        return self.found(&path);
                    }
                }
            }
        }

        if let Some(path) = self.try_index(dir) {
            return self.found(&path);
        }
        if declared_main {
            Err(ResolveReasonCode::PackageMainNotFound)
        } else {
            Err(ResolveReasonCode::IsDirectory)
        }
    }

    fn resolve_bare(&mut self, from_dir: &Path, spec: &str) -> Step {
        if let Some(found) = self.resolve_mapped(from_dir, spec) {
            return Ok(found);
        }

        let (name, subpath) = parse_bare_specifier(spec);
        let mut found_node_modules = false;
        let mut current = Some(from_dir.to_path_buf());

        while let Some(dir) = current {
            let node_modules = dir.join("node_modules");
            if self.witness(&node_modules).kind == EntryKind::Directory {
                found_node_modules = true;
                let pkg_dir = node_modules.join(name);
                self.add_tried(&pkg_dir);
                if self.witness(&pkg_dir).kind == EntryKind::Directory {
                    match self.resolve_package(&pkg_dir, subpath) {
                        Ok(path) => return Ok(path),
                        // An `exports` map is authoritative; do not keep walking.
                        Err(
                            reason @ (ResolveReasonCode::ExportsNotFound
                            | ResolveReasonCode::ExportsTargetNotFound),
                        ) => return Err(reason),
                        Err(_) => {}
                    }
                }
            }
            current = dir.parent().map(Path::to_path_buf);
        }

        if found_node_modules {
            Err(ResolveReasonCode::NotFound)
        } else {
            Err(ResolveReasonCode::NodeModulesNotFound)
        }
    }

    /// `tsconfig` `paths`, then `baseUrl`.
    fn resolve_mapped(&mut self, from_dir: &Path, spec: &str) -> Option<PathBuf> {
        let resolver = self.resolver;
        // Every missing candidate is witnessed so a tsconfig created nearer later is seen.
        let config_path =
            tsconfig::find_nearest(from_dir, &resolver.config.tsconfig_names, |candidate| {
                self.witness(candidate).kind == EntryKind::File
            })?;
        let mappings = tsconfig::load_mappings(self.fs(), &resolver.manifests, &config_path);
        for (path, stamp) in &mappings.sources {
            if !self.witnesses.iter().any(|w| &w.path == path) {
                self.witnesses.push(Witness {
                    path: path.clone(),
                    stamp: *stamp,
                });
            }
        }

        for candidate in mappings.candidates(spec) {
            if let Ok(path) = self.resolve_path(&candidate) {
                trace!(specifier = spec, path = %path.display(), "resolved through tsconfig paths");
                return Some(path);
            }
        }
        let base_url = mappings.base_url.as_ref()?;
        self.resolve_path(&base_url.join(spec)).ok()
    }

    fn resolve_package(&mut self, pkg_dir: &Path, subpath: Option<&str>) -> Step {
        let pkg = self.load_manifest(&pkg_dir.join("package.json"));
        if let Some(pkg) = pkg.filter(|p| exports::has_exports(p)) {
            let key = subpath.map_or_else(|| ".".to_string(), |s| format!("./{s}"));
            let conditions = self.conditions();
            let Some(target) = exports::resolve_exports(&pkg, &key, &conditions) else {
                return Err(ResolveReasonCode::ExportsNotFound);
            };
            return self
                .resolve_path(&pkg_dir.join(&target))
                .map_err(|_| ResolveReasonCode::ExportsTargetNotFound);
        }

        match subpath {
            Some(sub) => self.resolve_path(&pkg_dir.join(sub)),
            None => self.resolve_directory(pkg_dir),
        }
    }

    fn resolve_imports(&mut self, from_dir: &Path, spec: &str) -> Step {
        let mut current = Some(from_dir.to_path_buf());
        while let Some(dir) = current {
            let pkg_path = dir.join("package.json");
            if self.witness(&pkg_path).kind == EntryKind::File {
                let pkg = self.load_manifest(&pkg_path);
                let conditions = self.conditions();
                let target = pkg.and_then(|p| exports::resolve_imports(&p, spec, &conditions));
                return match target {
                    Some(target) => self
                        .resolve_path(&dir.join(target))
                        .map_err(|_| ResolveReasonCode::ImportsNotFound),
                    None => Err(ResolveReasonCode::ImportsNotFound),
                };
            }
            current = dir.parent().map(Path::to_path_buf);
        }
        Err(ResolveReasonCode::ImportsNotFound)
    }
}
