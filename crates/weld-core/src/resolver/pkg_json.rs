//! Parsed JSON manifest cache (`package.json`, `tsconfig.json`).
//!
//! Each entry carries the [`Fingerprint`] of the file it was parsed from; a lookup whose
//! fresh stat differs re-reads and re-parses the file.

use crate::fs::{FileSystem, Fingerprint};
use rustc_hash::FxHashMap as HashMap;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

/// Result of loading a manifest: the parsed value (if the file exists and parses) and
/// the fingerprint it was read under.
#[derive(Debug, Clone)]
pub struct LoadedJson {
    pub value: Option<Arc<Value>>,
    pub stamp: Fingerprint,
}

#[derive(Debug, Default)]
pub struct JsonCache {
    entries: RwLock<HashMap<PathBuf, LoadedJson>>,
}

impl JsonCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `path`, reusing the cached parse while its fingerprint is unchanged.
    ///
    /// With `jsonc` set, comments and trailing commas are accepted (tsconfig syntax).
    pub fn load(&self, fs: &dyn FileSystem, path: &Path, jsonc: bool) -> LoadedJson {
        let stamp = Fingerprint::of(fs, path);
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(cached) = entries.get(path) {
                if cached.stamp == stamp {
                    return cached.clone();
                }
            }
        }

        let value = if stamp.kind == crate::fs::EntryKind::File {
            parse_file(fs, path, jsonc).map(Arc::new)
        } else {
            None
        };
        let loaded = LoadedJson { value, stamp };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf(), loaded.clone());
        loaded
    }

    pub fn invalidate(&self, path: &Path) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|p, _| !p.starts_with(path));
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn parse_file(fs: &dyn FileSystem, path: &Path, jsonc: bool) -> Option<Value> {
    let text = match fs.read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read manifest");
            return None;
        }
    };
    let parsed = if jsonc {
        serde_json5::from_str::<Value>(&text).map_err(|e| e.to_string())
    } else {
        serde_json::from_str::<Value>(&text).map_err(|e| e.to_string())
    };
    match parsed {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring invalid JSON manifest");
            None
        }
    }
}
