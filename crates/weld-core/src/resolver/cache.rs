//! Generation-stamped resolution cache.
//!
//! An entry is trusted only while both hold:
//! - its generation equals the cache's current generation, and
//! - every witness (the directories and files whose state decided the answer) still has
//!   the fingerprint recorded when the entry was created.
//!
//! A stale entry is evicted and the key is resolved again. When the fresh answer flips
//! between found and not-found relative to the evicted one, the generation is bumped,
//! which retires every other entry at once. An explicit [`ResolveCache::invalidate`]
//! bumps it as well. Generation and entries live behind a single
//! lock so readers never see one updated without the other.

use super::exports::ResolutionKind;
use super::Resolution;
use crate::fs::{FileSystem, Fingerprint};
use rustc_hash::FxHashMap as HashMap;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// Syntactic class of a specifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecifierKind {
    /// `./x`, `../x`, `.`, `..`
    Relative,
    /// `/abs/x`, `C:\x`
    Absolute,
    /// `pkg`, `@scope/pkg/sub`, path-mapped aliases
    Bare,
    /// `#internal` through `package.json` `imports`
    Imports,
}

impl SpecifierKind {
    #[must_use]
    pub fn of(specifier: &str) -> Self {
        if specifier.starts_with('#') {
            Self::Imports
        } else if specifier == "."
            || specifier == ".."
            || specifier.starts_with("./")
            || specifier.starts_with("../")
        {
            Self::Relative
        } else if is_absolute_specifier(specifier) {
            Self::Absolute
        } else {
            Self::Bare
        }
    }
}

fn is_absolute_specifier(spec: &str) -> bool {
    if spec.starts_with('/') || spec.starts_with("\\\\") {
        return true;
    }
    let bytes = spec.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/')
}

/// Cache key: importing file, raw specifier, specifier class and import mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolveKey {
    pub from: PathBuf,
    pub specifier: String,
    pub kind: SpecifierKind,
    pub mode: ResolutionKind,
}

impl ResolveKey {
    #[must_use]
    pub fn new(from: impl Into<PathBuf>, specifier: impl Into<String>, mode: ResolutionKind) -> Self {
        let specifier = specifier.into();
        Self {
            from: from.into(),
            kind: SpecifierKind::of(&specifier),
            specifier,
            mode,
        }
    }
}

/// A path whose fingerprint decided part of an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Witness {
    pub path: PathBuf,
    pub stamp: Fingerprint,
}

#[derive(Debug, Clone)]
pub struct ResolveCacheEntry {
    pub resolution: Resolution,
    pub generation: u64,
    pub witnesses: Vec<Witness>,
}

impl ResolveCacheEntry {
    fn is_current(&self, fs: &dyn FileSystem) -> bool {
        self.witnesses
            .iter()
            .all(|w| Fingerprint::of(fs, &w.path) == w.stamp)
    }

    fn mentions(&self, path: &Path) -> bool {
        self.resolution
            .path()
            .is_some_and(|resolved| resolved.starts_with(path))
            || self.witnesses.iter().any(|w| w.path.starts_with(path))
    }
}

/// Outcome of a cache lookup.
#[derive(Debug)]
pub enum Lookup {
    Hit(Resolution),
    /// `previous` is whether an evicted entry for this key had found a file.
    Miss { previous: Option<bool> },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub generation: u64,
}

#[derive(Debug)]
struct Inner {
    entries: HashMap<ResolveKey, ResolveCacheEntry>,
    generation: u64,
    enabled: bool,
}

#[derive(Debug)]
pub struct ResolveCache {
    inner: RwLock<Inner>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl Default for ResolveCache {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: HashMap::default(),
                generation: 0,
                enabled: true,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }
}

impl ResolveCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `key`, validating generation and witnesses.
    pub fn lookup(&self, fs: &dyn FileSystem, key: &ResolveKey) -> Lookup {
        let (entry, generation) = {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            if !inner.enabled {
                return Lookup::Miss { previous: None };
            }
            (inner.entries.get(key).cloned(), inner.generation)
        };

        let Some(entry) = entry else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Lookup::Miss { previous: None };
        };

        if entry.generation == generation && entry.is_current(fs) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Lookup::Hit(entry.resolution);
        }

        debug!(
            from = %key.from.display(),
            specifier = %key.specifier,
            stale_generation = entry.generation != generation,
            "evicting stale resolution"
        );
        {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            // Only evict what we validated; a concurrent writer may have replaced it.
            let unchanged = inner.entries.get(key).is_some_and(|current| {
                current.generation == entry.generation && current.witnesses == entry.witnesses
            });
            if unchanged {
                inner.entries.remove(key);
            }
        }
        self.evictions.fetch_add(1, Ordering::Relaxed);
        self.misses.fetch_add(1, Ordering::Relaxed);
        Lookup::Miss {
            previous: Some(entry.resolution.is_found()),
        }
    }

    /// Store a fresh answer. Bumps the generation when it flips relative to `previous`.
    pub fn insert(
        &self,
        key: ResolveKey,
        resolution: Resolution,
        witnesses: Vec<Witness>,
        previous: Option<bool>,
    ) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if !inner.enabled {
            return;
        }
        if previous.is_some_and(|found| found != resolution.is_found()) {
            inner.generation += 1;
            debug!(
                generation = inner.generation,
                specifier = %key.specifier,
                found = resolution.is_found(),
                "resolution flipped, bumping cache generation"
            );
        }
        let generation = inner.generation;
        inner.entries.insert(
            key,
            ResolveCacheEntry {
                resolution,
                generation,
                witnesses,
            },
        );
    }

    /// Evict every entry whose answer or witnesses lie at or under `path`, then bump the
    /// generation so entries whose witnesses missed the change are retired too.
    ///
    /// Returns the number of evicted entries.
    pub fn invalidate(&self, path: &Path) -> usize {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let before = inner.entries.len();
        inner
            .entries
            .retain(|key, entry| key.from != path && !entry.mentions(path));
        let count = before - inner.entries.len();
        inner.generation += 1;
        debug!(
            path = %path.display(),
            count,
            generation = inner.generation,
            "invalidated resolutions"
        );
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    /// Drop every entry and stop caching.
    pub fn shutdown(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.entries.clear();
        inner.enabled = false;
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        CacheStats {
            entries: inner.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            generation: inner.generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFileSystem;

    fn witness(fs: &MemoryFileSystem, path: &str) -> Witness {
        Witness {
            path: PathBuf::from(path),
            stamp: Fingerprint::of(fs, Path::new(path)),
        }
    }

    fn key(spec: &str) -> ResolveKey {
        ResolveKey::new("/src/index.js", spec, ResolutionKind::Import)
    }

    #[test]
    fn test_specifier_kind() {
        assert_eq!(SpecifierKind::of("./a"), SpecifierKind::Relative);
        assert_eq!(SpecifierKind::of(".."), SpecifierKind::Relative);
        assert_eq!(SpecifierKind::of("/abs/a"), SpecifierKind::Absolute);
        assert_eq!(SpecifierKind::of("C:\\a"), SpecifierKind::Absolute);
        assert_eq!(SpecifierKind::of("#int"), SpecifierKind::Imports);
        assert_eq!(SpecifierKind::of("@scope/pkg"), SpecifierKind::Bare);
        assert_eq!(SpecifierKind::of(".hidden"), SpecifierKind::Bare);
    }

    #[test]
    fn test_hit_then_evict_on_fingerprint_change() {
        let fs = MemoryFileSystem::new();
        fs.write_file("/src/a.js", "a");
        let cache = ResolveCache::new();
        let k = key("./a");

        cache.insert(
            k.clone(),
            Resolution::Module(PathBuf::from("/src/a.js")),
            vec![witness(&fs, "/src/a.js")],
            None,
        );
        assert!(matches!(cache.lookup(&fs, &k), Lookup::Hit(_)));

        fs.write_file("/src/a.js", "changed");
        match cache.lookup(&fs, &k) {
            Lookup::Miss { previous } => assert_eq!(previous, Some(true)),
            Lookup::Hit(_) => panic!("stale entry was trusted"),
        }
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.entries, 0);
    }

    #[test]
    fn test_flip_bumps_generation_and_retires_other_entries() {
        let fs = MemoryFileSystem::new();
        fs.write_file("/src/a.js", "a");
        fs.write_file("/src/b.js", "b");
        let cache = ResolveCache::new();

        cache.insert(
            key("./b"),
            Resolution::Module(PathBuf::from("/src/b.js")),
            vec![witness(&fs, "/src/b.js")],
            None,
        );
        cache.insert(
            key("./a"),
            Resolution::not_found(crate::resolver::ResolveReasonCode::NotFound, Vec::new()),
            Vec::new(),
            Some(true),
        );
        assert_eq!(cache.stats().generation, 1);
        // "./b" was stamped with generation 0.
        assert!(matches!(cache.lookup(&fs, &key("./b")), Lookup::Miss { .. }));
        assert!(matches!(cache.lookup(&fs, &key("./a")), Lookup::Hit(_)));
    }

    #[test]
    fn test_invalidate_by_path_prefix() {
        let fs = MemoryFileSystem::new();
        fs.write_file("/lib/x/index.js", "x");
        let cache = ResolveCache::new();
        cache.insert(
            key("../lib/x"),
            Resolution::Module(PathBuf::from("/lib/x/index.js")),
            vec![witness(&fs, "/lib/x")],
            None,
        );
        cache.insert(
            key("./other"),
            Resolution::Module(PathBuf::from("/src/other.js")),
            Vec::new(),
            None,
        );
        assert_eq!(cache.invalidate(Path::new("/lib")), 1);
        assert_eq!(cache.stats().entries, 1);
        assert_eq!(cache.stats().generation, 1);
        // The survivor was stamped before the bump.
        assert!(matches!(cache.lookup(&fs, &key("./other")), Lookup::Miss { .. }));

        assert_eq!(cache.invalidate(Path::new("/nothing")), 0);
        assert_eq!(cache.stats().generation, 2);
    }

    #[test]
    fn test_shutdown_disables_cache() {
        let fs = MemoryFileSystem::new();
        let cache = ResolveCache::new();
        cache.insert(key("./a"), Resolution::Module(PathBuf::from("/a.js")), Vec::new(), None);
        cache.shutdown();
        assert_eq!(cache.stats().entries, 0);
        cache.insert(key("./a"), Resolution::Module(PathBuf::from("/a.js")), Vec::new(), None);
        assert!(matches!(cache.lookup(&fs, &key("./a")), Lookup::Miss { previous: None }));
        assert_eq!(cache.stats().entries, 0);
    }
}
