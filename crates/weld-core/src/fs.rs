//! File-system abstraction.
//!
//! The resolver and graph builder only touch the disk through [`FileSystem`], so the
//! same build can run against the real file system ([`OsFileSystem`]) or an
//! in-memory tree ([`MemoryFileSystem`]) that embedders and tests mutate directly.
//!
//! [`Fingerprint`] is the cheap validity signal used by every cache in this crate:
//! existence, entry kind, modification stamp, size and inode.

use serde::Serialize;
use std::collections::BTreeMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Shared handle to a file system implementation.
pub type FileSystemRef = Arc<dyn FileSystem>;

/// Kind of a file-system entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Missing,
    File,
    Directory,
}

/// Result of a `stat` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub kind: EntryKind,
    /// Modification time in nanoseconds since the epoch (or a logical clock).
    pub mtime_ns: u64,
    pub size: u64,
    pub inode: u64,
}

impl Metadata {
    #[must_use]
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Lightweight validity stamp for a path.
///
/// Two fingerprints of the same path compare equal only if nothing observable about
/// the entry changed in between: a deleted and recreated file gets a new inode and
/// modification stamp even when its content is identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub kind: EntryKind,
    pub mtime_ns: u64,
    pub size: u64,
    pub inode: u64,
}

impl Fingerprint {
    /// Fingerprint of a path that does not exist.
    pub const MISSING: Self = Self {
        kind: EntryKind::Missing,
        mtime_ns: 0,
        size: 0,
        inode: 0,
    };

    /// Stat `path` and fingerprint it. Any stat failure counts as missing.
    #[must_use]
    pub fn of(fs: &dyn FileSystem, path: &Path) -> Self {
        fs.stat(path).map_or(Self::MISSING, Self::from)
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.kind != EntryKind::Missing
    }
}

impl From<Metadata> for Fingerprint {
    fn from(meta: Metadata) -> Self {
        Self {
            kind: meta.kind,
            mtime_ns: meta.mtime_ns,
            size: meta.size,
            inode: meta.inode,
        }
    }
}

/// File-system operations needed by the resolver and graph builder.
///
/// "Not found" must be reported as [`io::ErrorKind::NotFound`] so callers can tell a
/// missing file from other failures.
pub trait FileSystem: Send + Sync + std::fmt::Debug {
    fn stat(&self, path: &Path) -> io::Result<Metadata>;

    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// List the entries of a directory, sorted by path.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;

    fn is_file(&self, path: &Path) -> bool {
        self.stat(path).is_ok_and(|m| m.is_file())
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.stat(path).is_ok_and(|m| m.is_dir())
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.read(path).map(weld_util::fs::decode_lossy)
    }
}

/// Lexically normalize a path: drop `.` segments and fold `..` into the parent.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// [`FileSystem`] backed by `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFileSystem;

impl OsFileSystem {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for OsFileSystem {
    #[allow(clippy::cast_possible_truncation)]
    fn stat(&self, path: &Path) -> io::Result<Metadata> {
        let meta = std::fs::metadata(path)?;
        let kind = if meta.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        let mtime_ns = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_nanos() as u64);

        #[cfg(unix)]
        let inode = std::os::unix::fs::MetadataExt::ino(&meta);
        #[cfg(not(unix))]
        let inode = 0;

        Ok(Metadata {
            kind,
            mtime_ns,
            size: meta.len(),
            inode,
        })
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut entries = std::fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<io::Result<Vec<_>>>()?;
        entries.sort();
        Ok(entries)
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        dunce::canonicalize(path)
    }
}

#[derive(Debug, Clone)]
enum MemoryEntry {
    File {
        contents: Arc<[u8]>,
        stamp: u64,
        inode: u64,
    },
    Directory {
        stamp: u64,
        inode: u64,
    },
}

/// In-memory [`FileSystem`].
///
/// Every mutation advances a logical clock, which serves as the modification stamp,
/// and every created entry gets a fresh inode number. Creating or removing an entry
/// also touches its parent directory, mirroring POSIX directory mtimes.
#[derive(Debug)]
pub struct MemoryFileSystem {
    entries: RwLock<BTreeMap<PathBuf, MemoryEntry>>,
    clock: AtomicU64,
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            PathBuf::from("/"),
            MemoryEntry::Directory { stamp: 0, inode: 1 },
        );
        Self {
            entries: RwLock::new(entries),
            clock: AtomicU64::new(1),
        }
    }
}

impl MemoryFileSystem {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn key(path: &Path) -> PathBuf {
        normalize_path(&Path::new("/").join(path))
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Create a directory and all missing ancestors.
    pub fn create_dir_all(&self, path: impl AsRef<Path>) {
        let path = Self::key(path.as_ref());
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        self.create_dirs_locked(&mut entries, &path);
    }

    fn create_dirs_locked(&self, entries: &mut BTreeMap<PathBuf, MemoryEntry>, path: &Path) {
        let mut missing = Vec::new();
        let mut current = Some(path);
        while let Some(dir) = current {
            if entries.contains_key(dir) {
                break;
            }
            missing.push(dir.to_path_buf());
            current = dir.parent();
        }
        for dir in missing.into_iter().rev() {
            let stamp = self.tick();
            entries.insert(dir.clone(), MemoryEntry::Directory { stamp, inode: stamp });
            self.touch_parent_locked(entries, &dir);
        }
    }

    fn touch_parent_locked(&self, entries: &mut BTreeMap<PathBuf, MemoryEntry>, path: &Path) {
        if let Some(parent) = path.parent() {
            let next = self.tick();
            if let Some(MemoryEntry::Directory { stamp, .. }) = entries.get_mut(parent) {
                *stamp = next;
            }
        }
    }

    /// Write a file, creating parent directories as needed.
    pub fn write_file(&self, path: impl AsRef<Path>, contents: impl AsRef<[u8]>) {
        let path = Self::key(path.as_ref());
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(parent) = path.parent() {
            self.create_dirs_locked(&mut entries, parent);
        }
        let stamp = self.tick();
        let existed = entries.contains_key(&path);
        let inode = match entries.get(&path) {
            Some(MemoryEntry::File { inode, .. }) => *inode,
            _ => stamp,
        };
        entries.insert(
            path.clone(),
            MemoryEntry::File {
                contents: Arc::from(contents.as_ref()),
                stamp,
                inode,
            },
        );
        if !existed {
            self.touch_parent_locked(&mut entries, &path);
        }
    }

    /// Remove a single file. Returns false if nothing was removed.
    pub fn remove_file(&self, path: impl AsRef<Path>) -> bool {
        let path = Self::key(path.as_ref());
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if matches!(entries.get(&path), Some(MemoryEntry::File { .. })) {
            entries.remove(&path);
            self.touch_parent_locked(&mut entries, &path);
            true
        } else {
            false
        }
    }

    /// Remove a directory and everything below it. Returns false if it did not exist.
    pub fn remove_dir_all(&self, path: impl AsRef<Path>) -> bool {
        let path = Self::key(path.as_ref());
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if !entries.contains_key(&path) {
            return false;
        }
        entries.retain(|p, _| !p.starts_with(&path));
        self.touch_parent_locked(&mut entries, &path);
        true
    }
}

impl FileSystem for MemoryFileSystem {
    fn stat(&self, path: &Path) -> io::Result<Metadata> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match entries.get(&Self::key(path)) {
            Some(MemoryEntry::File {
                contents,
                stamp,
                inode,
            }) => Ok(Metadata {
                kind: EntryKind::File,
                mtime_ns: *stamp,
                size: contents.len() as u64,
                inode: *inode,
            }),
            Some(MemoryEntry::Directory { stamp, inode }) => Ok(Metadata {
                kind: EntryKind::Directory,
                mtime_ns: *stamp,
                size: 0,
                inode: *inode,
            }),
            None => Err(io::Error::new(io::ErrorKind::NotFound, "File not found")),
        }
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match entries.get(&Self::key(path)) {
            Some(MemoryEntry::File { contents, .. }) => Ok(contents.to_vec()),
            Some(MemoryEntry::Directory { .. }) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Path is a directory",
            )),
            None => Err(io::Error::new(io::ErrorKind::NotFound, "File not found")),
        }
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let dir = Self::key(path);
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match entries.get(&dir) {
            Some(MemoryEntry::Directory { .. }) => Ok(entries
                .keys()
                .filter(|p| p.parent() == Some(dir.as_path()))
                .cloned()
                .collect()),
            Some(MemoryEntry::File { .. }) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Path is not a directory",
            )),
            None => Err(io::Error::new(io::ErrorKind::NotFound, "Directory not found")),
        }
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        let key = Self::key(path);
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&key) {
            Ok(key)
        } else {
            Err(io::Error::new(io::ErrorKind::NotFound, "File not found"))
        }
    }
}
