//! Parsed module cache shared by every build of a [`crate::Bundler`].
//!
//! Entries are keyed by absolute path and stamped with the file's fingerprint at read
//! time. A changed stamp means the file is read and parsed again. After
//! [`ModuleStore::shutdown`] every load parses afresh and nothing is kept.

use crate::error::{Error, Result};
use crate::fs::{FileSystem, Fingerprint};
use crate::parse::{ParsedModule, SourceParser};
use rustc_hash::FxHashMap as HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, trace};

#[derive(Debug)]
struct StoredModule {
    stamp: Fingerprint,
    parsed: Arc<ParsedModule>,
}

/// Store statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StoreStats {
    pub entries: usize,
    pub hits: u64,
    pub parses: u64,
}

#[derive(Debug, Default)]
pub struct ModuleStore {
    entries: RwLock<HashMap<PathBuf, StoredModule>>,
    hits: AtomicU64,
    parses: AtomicU64,
    shut_down: AtomicBool,
}

impl ModuleStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `path`, reusing the cached parse if the file is unchanged.
    ///
    /// A file that vanished is reported as [`Error::Read`] with
    /// [`io::ErrorKind::NotFound`]; see [`is_vanished`].
    pub fn load(
        &self,
        fs: &dyn FileSystem,
        parser: &dyn SourceParser,
        path: &Path,
    ) -> Result<Arc<ParsedModule>> {
        let stamp = Fingerprint::of(fs, path);
        if !stamp.exists() {
            self.forget(path);
            return Err(Error::Read {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::NotFound, "file disappeared"),
            });
        }

        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(stored) = entries.get(path) {
                if stored.stamp == stamp {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    trace!(path = %path.display(), "module store hit");
                    return Ok(Arc::clone(&stored.parsed));
                }
            }
        }

        let source = fs.read_to_string(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let parsed = parser
            .parse(path, &source)
            .map_err(|message| Error::Parse {
                path: path.to_path_buf(),
                message,
            })?;
        let parsed = Arc::new(parsed);
        self.parses.fetch_add(1, Ordering::Relaxed);
        debug!(path = %path.display(), "parsed module");

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if self.shut_down.load(Ordering::Acquire) {
            return Ok(parsed);
        }
        entries.insert(
            path.to_path_buf(),
            StoredModule {
                stamp,
                parsed: Arc::clone(&parsed),
            },
        );
        Ok(parsed)
    }

    /// Drop every cached module at or under `path`.
    pub fn invalidate(&self, path: &Path) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|cached, _| !cached.starts_with(path));
        before - entries.len()
    }

    /// Drop every entry and stop caching.
    pub fn shutdown(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        self.shut_down.store(true, Ordering::Release);
        entries.clear();
    }

    fn forget(&self, path: &Path) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
    }

    #[must_use]
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            entries: self
                .entries
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
            hits: self.hits.load(Ordering::Relaxed),
            parses: self.parses.load(Ordering::Relaxed),
        }
    }
}

/// Whether a load failed because the file no longer exists.
#[must_use]
pub fn is_vanished(err: &Error) -> bool {
    matches!(err, Error::Read { source, .. } if source.kind() == io::ErrorKind::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFileSystem;
    use crate::parse::ScanParser;

    #[test]
    fn test_reuses_unchanged_module() {
        let fs = MemoryFileSystem::new();
        fs.write_file("/src/a.js", "export const a = 1;");
        let store = ModuleStore::new();

        let first = store.load(&fs, &ScanParser, Path::new("/src/a.js")).unwrap();
        let second = store.load(&fs, &ScanParser, Path::new("/src/a.js")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.stats().parses, 1);
        assert_eq!(store.stats().hits, 1);
    }

    #[test]
    fn test_reparses_changed_module() {
        let fs = MemoryFileSystem::new();
        fs.write_file("/src/a.js", "export const a = 1;");
        let store = ModuleStore::new();
        store.load(&fs, &ScanParser, Path::new("/src/a.js")).unwrap();

        fs.write_file("/src/a.js", "export const b = 2;");
        let parsed = store.load(&fs, &ScanParser, Path::new("/src/a.js")).unwrap();
        assert_eq!(parsed.exports[0].name(), Some("b"));
        assert_eq!(store.stats().parses, 2);
    }

    #[test]
    fn test_missing_file_is_vanished() {
        let fs = MemoryFileSystem::new();
        let store = ModuleStore::new();
        let err = store
            .load(&fs, &ScanParser, Path::new("/src/gone.js"))
            .unwrap_err();
        assert!(is_vanished(&err));
        assert_eq!(err.code(), crate::error::codes::BUILD_READ_ERROR);
    }

    #[test]
    fn test_parse_error_names_path() {
        let fs = MemoryFileSystem::new();
        fs.write_file("/src/bad.js", "const s = 'unterminated");
        let store = ModuleStore::new();
        let err = store
            .load(&fs, &ScanParser, Path::new("/src/bad.js"))
            .unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
        assert!(err.to_string().contains("/src/bad.js"));
    }

    #[test]
    fn test_shutdown_stops_caching() {
        let fs = MemoryFileSystem::new();
        fs.write_file("/src/a.js", "export const a = 1;");
        let store = ModuleStore::new();
        store.load(&fs, &ScanParser, Path::new("/src/a.js")).unwrap();
        assert_eq!(store.stats().entries, 1);

        store.shutdown();
        assert_eq!(store.stats().entries, 0);
        let parsed = store.load(&fs, &ScanParser, Path::new("/src/a.js")).unwrap();
        assert_eq!(parsed.exports[0].name(), Some("a"));
        store.load(&fs, &ScanParser, Path::new("/src/a.js")).unwrap();
        assert_eq!(store.stats().entries, 0);
        assert_eq!(store.stats().parses, 3);
    }

    #[test]
    fn test_invalidate_subtree() {
        let fs = MemoryFileSystem::new();
        fs.write_file("/src/a.js", "1");
        fs.write_file("/src/lib/b.js", "2");
        let store = ModuleStore::new();
        store.load(&fs, &ScanParser, Path::new("/src/a.js")).unwrap();
        store.load(&fs, &ScanParser, Path::new("/src/lib/b.js")).unwrap();
        assert_eq!(store.invalidate(Path::new("/src/lib")), 1);
        assert_eq!(store.stats().entries, 1);
    }
}
