//! Build configuration.
//!
//! [`BuildOptions`] is the single input of [`crate::Bundler::build`]. The
//! `advancedChunks` block is deserialized as-is from the orchestrator's JSON and then
//! validated into [`SplitSettings`] before any graph work starts.

use crate::error::{Error, Result};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

/// Options for one build.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildOptions {
    /// Entry files. Relative paths are joined onto `cwd`.
    pub entrypoints: Vec<PathBuf>,
    /// Working directory for relative entrypoints.
    pub cwd: PathBuf,
    /// Extract shared and group chunks instead of duplicating into entry chunks.
    pub splitting: bool,
    /// Deduplicate CSS chunks by content and apply groups to the CSS graph.
    pub css_chunking: bool,
    pub advanced_chunks: Option<AdvancedChunksConfig>,
    /// Report statically unused exports. Off means every export is retained.
    pub tree_shaking: bool,
    /// Constant substitutions applied before CommonJS branch analysis,
    /// e.g. `process.env.NODE_ENV` -> `"production"`.
    pub define: BTreeMap<String, String>,
    /// Specifier prefixes that are never bundled.
    pub external: Vec<String>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            entrypoints: Vec::new(),
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
            splitting: false,
            css_chunking: false,
            advanced_chunks: None,
            tree_shaking: false,
            define: BTreeMap::new(),
            external: Vec::new(),
        }
    }
}

impl BuildOptions {
    /// Create options for the given entry points.
    #[must_use]
    pub fn new<I, P>(entrypoints: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            entrypoints: entrypoints.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    #[must_use]
    pub fn with_splitting(mut self, splitting: bool) -> Self {
        self.splitting = splitting;
        self
    }

    #[must_use]
    pub fn with_css_chunking(mut self, css_chunking: bool) -> Self {
        self.css_chunking = css_chunking;
        self
    }

    #[must_use]
    pub fn with_tree_shaking(mut self, tree_shaking: bool) -> Self {
        self.tree_shaking = tree_shaking;
        self
    }

    #[must_use]
    pub fn with_advanced_chunks(mut self, advanced: AdvancedChunksConfig) -> Self {
        self.advanced_chunks = Some(advanced);
        self
    }

    #[must_use]
    pub fn with_define(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.define.insert(key.into(), value.into());
        self
    }

    /// Entry points joined onto `cwd`.
    #[must_use]
    pub fn absolute_entrypoints(&self) -> Vec<PathBuf> {
        self.entrypoints
            .iter()
            .map(|p| {
                if p.is_absolute() {
                    p.clone()
                } else {
                    self.cwd.join(p)
                }
            })
            .collect()
    }

    /// Check everything that can be checked without touching the file system.
    pub fn validate(&self) -> Result<SplitSettings> {
        if self.entrypoints.is_empty() {
            return Err(Error::config("entrypoints", "at least one entry point is required"));
        }
        match &self.advanced_chunks {
            Some(advanced) => SplitSettings::from_config(advanced),
            None => Ok(SplitSettings::default()),
        }
    }
}

/// `advancedChunks` block as supplied by the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdvancedChunksConfig {
    pub min_share_count: Option<usize>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub min_module_size: Option<u64>,
    pub max_module_size: Option<u64>,
    pub groups: Vec<ChunkGroupConfig>,
}

/// One named group inside `advancedChunks.groups`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChunkGroupConfig {
    /// Required. Missing names are a configuration error.
    pub name: Option<String>,
    /// Regular expression over absolute module paths. Absent matches every module.
    pub test: Option<String>,
    pub priority: i32,
    /// Claim matching modules regardless of size and share-count thresholds.
    pub enforce: bool,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub min_chunks: Option<usize>,
    pub max_chunks: Option<usize>,
}

impl ChunkGroupConfig {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn test(mut self, pattern: impl Into<String>) -> Self {
        self.test = Some(pattern.into());
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn enforce(mut self, enforce: bool) -> Self {
        self.enforce = enforce;
        self
    }

    #[must_use]
    pub fn size_range(mut self, min: Option<u64>, max: Option<u64>) -> Self {
        self.min_size = min;
        self.max_size = max;
        self
    }

    #[must_use]
    pub fn min_chunks(mut self, min_chunks: usize) -> Self {
        self.min_chunks = Some(min_chunks);
        self
    }
}

/// Validated splitting thresholds.
#[derive(Debug, Clone)]
pub struct SplitSettings {
    pub min_share_count: usize,
    pub min_size: u64,
    pub max_size: u64,
    pub min_module_size: u64,
    pub max_module_size: u64,
    /// Groups in evaluation order: descending priority, then declaration order.
    pub groups: Vec<ChunkGroup>,
}

impl Default for SplitSettings {
    fn default() -> Self {
        Self {
            min_share_count: 1,
            min_size: 0,
            max_size: u64::MAX,
            min_module_size: 0,
            max_module_size: u64::MAX,
            groups: Vec::new(),
        }
    }
}

/// A validated chunk group.
#[derive(Debug, Clone)]
pub struct ChunkGroup {
    pub name: String,
    pub test: Option<Regex>,
    pub priority: i32,
    pub enforce: bool,
    pub min_size: u64,
    pub max_size: u64,
    pub min_chunks: usize,
    pub max_chunks: usize,
    /// Position in the original `groups` array.
    pub declaration_index: usize,
}

impl ChunkGroup {
    /// Whether the group's `test` accepts a module path.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.test.as_ref().map_or(true, |re| re.is_match(path))
    }
}

fn check_range(field: &str, min: u64, max: u64) -> Result<()> {
    if min > max {
        return Err(Error::config(
            field,
            format!("minSize ({min}) is greater than maxSize ({max})"),
        ));
    }
    Ok(())
}

impl SplitSettings {
    /// Validate an `advancedChunks` block.
    pub fn from_config(config: &AdvancedChunksConfig) -> Result<Self> {
        let defaults = Self::default();
        let min_share_count = config.min_share_count.unwrap_or(defaults.min_share_count);
        if min_share_count == 0 {
            return Err(Error::config(
                "advancedChunks.minShareCount",
                "must be at least 1",
            ));
        }
        let min_size = config.min_size.unwrap_or(defaults.min_size);
        let max_size = config.max_size.unwrap_or(defaults.max_size);
        check_range("advancedChunks.minSize", min_size, max_size)?;
        let min_module_size = config.min_module_size.unwrap_or(defaults.min_module_size);
        let max_module_size = config.max_module_size.unwrap_or(defaults.max_module_size);
        check_range(
            "advancedChunks.minModuleSize",
            min_module_size,
            max_module_size,
        )?;

        let mut seen = HashSet::new();
        let mut groups = Vec::with_capacity(config.groups.len());
        for (index, group) in config.groups.iter().enumerate() {
            let field = |name: &str| format!("advancedChunks.groups[{index}].{name}");

            let name = match group.name.as_deref().map(str::trim) {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => return Err(Error::config(field("name"), "group name is required")),
            };
            if !seen.insert(name.clone()) {
                return Err(Error::config(
                    field("name"),
                    format!("duplicate group name '{name}'"),
                ));
            }

            let test = group
                .test
                .as_deref()
                .map(|pattern| {
                    Regex::new(pattern).map_err(|e| {
                        Error::config(field("test"), format!("invalid pattern '{pattern}': {e}"))
                    })
                })
                .transpose()?;

            let group_min = group.min_size.unwrap_or(min_size);
            let group_max = group.max_size.unwrap_or(max_size);
            check_range(&field("minSize"), group_min, group_max)?;

            let min_chunks = group.min_chunks.unwrap_or(min_share_count).max(1);
            let max_chunks = group.max_chunks.unwrap_or(usize::MAX);
            if max_chunks < min_chunks {
                return Err(Error::config(
                    field("maxChunks"),
                    format!("maxChunks ({max_chunks}) is less than minChunks ({min_chunks})"),
                ));
            }

            groups.push(ChunkGroup {
                name,
                test,
                priority: group.priority,
                enforce: group.enforce,
                min_size: group_min,
                max_size: group_max,
                min_chunks,
                max_chunks,
                declaration_index: index,
            });
        }

        // Stable sort keeps declaration order among equal priorities.
        groups.sort_by(|a, b| b.priority.cmp(&a.priority));

        Ok(Self {
            min_share_count,
            min_size,
            max_size,
            min_module_size,
            max_module_size,
            groups,
        })
    }

    /// Share count a module needs before it can go into an auto-generated shared chunk.
    ///
    /// A module reached by a single entry is never "shared".
    #[must_use]
    pub fn auto_share_threshold(&self) -> usize {
        self.min_share_count.max(2)
    }

    /// Whether a module of this size may be moved out of entry chunks.
    #[must_use]
    pub fn module_size_eligible(&self, size: u64) -> bool {
        size >= self.min_module_size && size <= self.max_module_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advanced(groups: Vec<ChunkGroupConfig>) -> AdvancedChunksConfig {
        AdvancedChunksConfig {
            groups,
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_entrypoints_is_config_error() {
        let err = BuildOptions::default().validate().unwrap_err();
        assert!(matches!(err, Error::Config { ref field, .. } if field == "entrypoints"));
    }

    #[test]
    fn test_group_without_name_is_config_error() {
        let config = advanced(vec![
            ChunkGroupConfig::named("vendor"),
            ChunkGroupConfig {
                test: Some("lib".to_string()),
                ..Default::default()
            },
        ]);
        let err = SplitSettings::from_config(&config).unwrap_err();
        match err {
            Error::Config { field, .. } => assert_eq!(field, "advancedChunks.groups[1].name"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_blank_group_name_is_config_error() {
        let config = advanced(vec![ChunkGroupConfig::named("  ")]);
        assert!(SplitSettings::from_config(&config).is_err());
    }

    #[test]
    fn test_duplicate_group_name() {
        let config = advanced(vec![
            ChunkGroupConfig::named("vendor"),
            ChunkGroupConfig::named("vendor"),
        ]);
        let err = SplitSettings::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("duplicate group name"));
    }

    #[test]
    fn test_invalid_test_pattern() {
        let config = advanced(vec![ChunkGroupConfig::named("bad").test("([a-z")]);
        let err = SplitSettings::from_config(&config).unwrap_err();
        match err {
            Error::Config { field, .. } => assert_eq!(field, "advancedChunks.groups[0].test"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_min_greater_than_max() {
        let config = AdvancedChunksConfig {
            min_size: Some(100),
            max_size: Some(10),
            ..Default::default()
        };
        assert!(SplitSettings::from_config(&config).is_err());
    }

    #[test]
    fn test_groups_sorted_by_priority_then_declaration() {
        let config = advanced(vec![
            ChunkGroupConfig::named("a").priority(1),
            ChunkGroupConfig::named("b").priority(5),
            ChunkGroupConfig::named("c").priority(1),
            ChunkGroupConfig::named("d").priority(5),
        ]);
        let settings = SplitSettings::from_config(&config).unwrap();
        let names: Vec<&str> = settings.groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn test_group_inherits_thresholds() {
        let config = AdvancedChunksConfig {
            min_share_count: Some(3),
            min_size: Some(10),
            max_size: Some(1000),
            groups: vec![ChunkGroupConfig::named("g")],
            ..Default::default()
        };
        let settings = SplitSettings::from_config(&config).unwrap();
        let g = &settings.groups[0];
        assert_eq!(g.min_chunks, 3);
        assert_eq!(g.min_size, 10);
        assert_eq!(g.max_size, 1000);
        assert_eq!(settings.auto_share_threshold(), 3);
    }

    #[test]
    fn test_group_without_test_matches_everything() {
        let settings =
            SplitSettings::from_config(&advanced(vec![ChunkGroupConfig::named("all")])).unwrap();
        assert!(settings.groups[0].matches("/any/path.js"));
    }

    #[test]
    fn test_deserialize_camel_case() {
        let json = r#"{
            "entrypoints": ["src/a.js"],
            "splitting": true,
            "cssChunking": true,
            "advancedChunks": {
                "minShareCount": 2,
                "maxSize": 5000,
                "groups": [{ "name": "vendor", "test": "node_modules", "priority": 10, "enforce": true, "minChunks": 1 }]
            }
        }"#;
        let options: BuildOptions = serde_json::from_str(json).unwrap();
        assert!(options.splitting);
        assert!(options.css_chunking);
        let advanced = options.advanced_chunks.as_ref().unwrap();
        assert_eq!(advanced.max_size, Some(5000));
        assert_eq!(advanced.groups[0].min_chunks, Some(1));
        assert!(advanced.groups[0].enforce);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_absolute_entrypoints() {
        let options = BuildOptions::new(["src/a.js", "/abs/b.js"]).with_cwd("/project");
        assert_eq!(
            options.absolute_entrypoints(),
            vec![PathBuf::from("/project/src/a.js"), PathBuf::from("/abs/b.js")]
        );
    }
}
