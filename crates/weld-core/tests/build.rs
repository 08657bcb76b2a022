//! End-to-end builds against the real file system.

use serial_test::serial;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};
use weld_core::{
    AdvancedChunksConfig, BuildOptions, Bundler, ChunkGroupConfig, ChunkKind, ChunkType, Error,
    ExportKind, OsFileSystem, ResolverConfig,
};

struct Project {
    _dir: TempDir,
    root: PathBuf,
}

impl Project {
    fn new(files: &[(&str, &str)]) -> Self {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        let project = Self { _dir: dir, root };
        for (path, contents) in files {
            project.write(path, contents);
        }
        project
    }

    fn write(&self, path: &str, contents: &str) {
        let full = self.root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, contents).unwrap();
    }

    fn options(&self, entries: &[&str]) -> BuildOptions {
        BuildOptions::new(entries.iter().copied()).with_cwd(&self.root)
    }
}

fn bundler() -> Bundler {
    Bundler::new(Arc::new(OsFileSystem), ResolverConfig::default())
}

fn file_name(path: &str) -> &str {
    Path::new(path).file_name().unwrap().to_str().unwrap()
}

fn module_names(output: &weld_core::BuildOutput) -> Vec<&str> {
    let mut names: Vec<&str> = output.modules.iter().map(|m| file_name(&m.path)).collect();
    names.sort_unstable();
    names
}

#[test]
#[serial]
fn test_rebuild_picks_up_changed_imports() {
    let project = Project::new(&[
        ("src/main.js", "import { a } from './a.js';\nconsole.log(a);\n"),
        ("src/a.js", "export const a = 1;\n"),
    ]);
    let bundler = bundler();
    let first = bundler.build(&project.options(&["src/main.js"])).unwrap();
    assert_eq!(module_names(&first), vec!["a.js", "main.js"]);

    project.write(
        "src/a.js",
        "import { b } from './b.js';\nexport const a = b + 1;\n",
    );
    project.write("src/b.js", "export const b = 41;\n");
    let second = bundler.build(&project.options(&["src/main.js"])).unwrap();
    assert_eq!(module_names(&second), vec!["a.js", "b.js", "main.js"]);
}

#[test]
#[serial]
fn test_missing_file_resolves_once_created() {
    let project = Project::new(&[("src/main.js", "import './later.js';\n")]);
    let bundler = bundler();

    let err = bundler
        .build(&project.options(&["src/main.js"]))
        .unwrap_err();
    match &err {
        Error::Resolution { specifier, .. } => assert_eq!(specifier, "./later.js"),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(err.is_user_facing());

    project.write("src/later.js", "export {};\n");
    let output = bundler.build(&project.options(&["src/main.js"])).unwrap();
    assert_eq!(module_names(&output), vec!["later.js", "main.js"]);
}

#[test]
#[serial]
fn test_deleted_directory_index_fails_then_recovers() {
    let project = Project::new(&[
        ("src/main.js", "import { v } from './lib/deep/util';\nconsole.log(v);\n"),
        ("src/lib/deep/util/index.js", "export const v = 1;\n"),
    ]);
    let bundler = bundler();
    let first = bundler.build(&project.options(&["src/main.js"])).unwrap();
    assert_eq!(module_names(&first), vec!["index.js", "main.js"]);

    fs::remove_dir_all(project.root.join("src/lib")).unwrap();
    let err = bundler
        .build(&project.options(&["src/main.js"]))
        .unwrap_err();
    assert!(matches!(err, Error::Resolution { .. }));

    project.write(
        "src/lib/deep/util/index.js",
        "import './helpers.js';\nexport const v = 2;\n",
    );
    project.write("src/lib/deep/util/helpers.js", "export {};\n");
    let third = bundler.build(&project.options(&["src/main.js"])).unwrap();
    assert_eq!(module_names(&third), vec!["helpers.js", "index.js", "main.js"]);
}

fn module_paths(output: &weld_core::BuildOutput) -> Vec<String> {
    let mut paths: Vec<String> = output.modules.iter().map(|m| m.path.clone()).collect();
    paths.sort_unstable();
    paths
}

#[test]
#[serial]
fn test_tsconfig_paths_map_through_build() {
    let project = Project::new(&[
        (
            "tsconfig.json",
            r#"{
                // aliases
                "compilerOptions": {
                    "baseUrl": ".",
                    "paths": { "@/*": ["src/*"], },
                },
            }"#,
        ),
        ("src/main.ts", "import { util } from '@/lib/util';\nconsole.log(util);\n"),
        ("src/lib/util.ts", "export const util = 1;\n"),
    ]);
    let output = bundler().build(&project.options(&["src/main.ts"])).unwrap();
    assert_eq!(module_names(&output), vec!["main.ts", "util.ts"]);
    let util = Path::new("src").join("lib").join("util.ts");
    assert!(module_paths(&output)
        .iter()
        .any(|p| Path::new(p).ends_with(&util)));
}

#[test]
#[serial]
fn test_nearest_tsconfig_beats_referenced_alias() {
    let project = Project::new(&[
        (
            "app/tsconfig.json",
            r#"{
                "compilerOptions": { "paths": { "@shared/*": ["src/shared/*"] } },
                "references": [{ "path": "../lib" }]
            }"#,
        ),
        (
            "lib/tsconfig.json",
            r#"{ "compilerOptions": { "paths": { "@shared/*": ["wrong/*"], "@lib/*": ["src/*"] } } }"#,
        ),
        (
            "app/src/main.ts",
            "import { x } from '@shared/x';\nimport { y } from '@lib/y';\nconsole.log(x, y);\n",
        ),
        ("app/src/shared/x.ts", "export const x = 'app';\n"),
        ("lib/wrong/x.ts", "export const x = 'lib';\n"),
        ("lib/src/y.ts", "export const y = 1;\n"),
    ]);
    let output = bundler().build(&project.options(&["app/src/main.ts"])).unwrap();
    let paths = module_paths(&output);
    assert_eq!(paths.len(), 3);
    let shared = Path::new("app").join("src").join("shared").join("x.ts");
    let referenced = Path::new("lib").join("src").join("y.ts");
    assert!(paths.iter().any(|p| Path::new(p).ends_with(&shared)));
    assert!(paths.iter().any(|p| Path::new(p).ends_with(&referenced)));
    assert!(!paths.iter().any(|p| p.contains("wrong")));
}

#[test]
#[serial]
fn test_tsconfig_created_then_edited_between_builds() {
    let project = Project::new(&[
        ("src/main.ts", "import { util } from '@/util';\nconsole.log(util);\n"),
        ("src/util.ts", "export const util = 'src';\n"),
        ("shared/util.ts", "export const util = 'shared';\n"),
    ]);
    let bundler = bundler();

    let err = bundler
        .build(&project.options(&["src/main.ts"]))
        .unwrap_err();
    assert!(matches!(err, Error::Resolution { .. }));

    project.write(
        "tsconfig.json",
        r#"{ "compilerOptions": { "paths": { "@/*": ["src/*"] } } }"#,
    );
    let created = bundler.build(&project.options(&["src/main.ts"])).unwrap();
    let src_util = Path::new("src").join("util.ts");
    assert!(module_paths(&created)
        .iter()
        .any(|p| Path::new(p).ends_with(&src_util)));

    project.write(
        "tsconfig.json",
        r#"{ "compilerOptions": { "paths": { "@/*": ["shared/*", "src/*"] } } }"#,
    );
    let edited = bundler.build(&project.options(&["src/main.ts"])).unwrap();
    let shared_util = Path::new("shared").join("util.ts");
    let paths = module_paths(&edited);
    assert!(paths.iter().any(|p| Path::new(p).ends_with(&shared_util)));
    assert!(!paths.iter().any(|p| Path::new(p).ends_with(&src_util)));
}

#[test]
fn test_partition_is_deterministic() {
    let project = Project::new(&[
        ("src/a.js", "import './shared.js';\nimport './only_a.js';\n"),
        ("src/b.js", "import './only_b.js';\nimport './shared.js';\n"),
        ("src/shared.js", "import './deep.js';\nexport const s = 1;\n"),
        ("src/deep.js", "export const d = 1;\n"),
        ("src/only_a.js", "export {};\n"),
        ("src/only_b.js", "export {};\n"),
    ]);

    let partition = |entries: &[&str]| {
        let output = bundler()
            .build(&project.options(entries).with_splitting(true))
            .unwrap();
        let mut chunks: Vec<Vec<String>> = output
            .chunks
            .iter()
            .map(|c| {
                let mut modules = c.modules.clone();
                modules.sort();
                modules
            })
            .collect();
        chunks.sort();
        chunks
    };

    let forward = partition(&["src/a.js", "src/b.js"]);
    assert_eq!(forward, partition(&["src/a.js", "src/b.js"]));
    assert_eq!(forward, partition(&["src/b.js", "src/a.js"]));
    assert_eq!(forward.len(), 3);
}

#[test]
fn test_css_content_dedup_counts() {
    let project = Project::new(&[
        ("src/a.js", "import './theme.css';\n"),
        ("src/b.js", "import './theme.css';\n"),
        ("src/c.js", "import './theme.css';\nimport './extra.css';\n"),
        ("src/theme.css", "@import './base.css';\nbody { color: red; }\n"),
        ("src/base.css", "html { margin: 0; }\n"),
        ("src/extra.css", ".x { color: blue; }\n"),
    ]);
    let css_outputs = |entries: &[&str], css_chunking: bool| {
        let output = bundler()
            .build(&project.options(entries).with_css_chunking(css_chunking))
            .unwrap();
        output
            .chunk_graph
            .of_type(ChunkType::Css)
            .map(|c| c.kind)
            .collect::<Vec<_>>()
    };

    assert_eq!(css_outputs(&["src/a.js", "src/b.js"], true), vec![ChunkKind::Shared]);
    assert_eq!(css_outputs(&["src/a.js", "src/b.js"], false).len(), 2);
    // {a, b} share one set, c has its own.
    assert_eq!(css_outputs(&["src/a.js", "src/b.js", "src/c.js"], true).len(), 2);
    assert_eq!(css_outputs(&["src/a.js", "src/c.js"], true).len(), 2);
}

#[test]
fn test_async_propagates_through_cycle() {
    let project = Project::new(&[
        ("src/main.js", "import { a } from './a.js';\nconsole.log(a);\n"),
        ("src/a.js", "import { b } from './b.js';\nexport const a = () => b;\n"),
        (
            "src/b.js",
            "import { a } from './a.js';\nimport { config } from './config.js';\nexport const b = () => a;\n",
        ),
        (
            "src/config.js",
            "export const config = await Promise.resolve({ debug: false });\n",
        ),
        ("src/sync.js", "export const unrelated = 1;\n"),
    ]);
    let output = bundler().build(&project.options(&["src/main.js"])).unwrap();

    for module in &output.modules {
        assert!(
            module.transitively_async,
            "{} should be async",
            module.path
        );
    }
    assert_eq!(output.cycles.len(), 1);
    let cycle: Vec<&str> = output.cycles[0].iter().map(|p| file_name(p)).collect();
    assert_eq!(cycle, vec!["a.js", "b.js"]);

    let rendered = output.init_plan.render_all();
    assert!(rendered.contains("var init_main = __esm(async () => {"));
    assert!(rendered.contains("await init_config();"));
    assert!(rendered.contains("// late-bound: init_a"));
}

#[test]
fn test_commonjs_reexport_collapses_under_define() {
    let project = Project::new(&[
        ("src/main.js", "import { version } from 'react';\nconsole.log(version);\n"),
        (
            "node_modules/react/package.json",
            r#"{ "name": "react", "main": "index.js" }"#,
        ),
        (
            "node_modules/react/index.js",
            "'use strict';\nif (process.env.NODE_ENV === 'production') {\n  module.exports = require('./cjs/react.production.js');\n} else {\n  module.exports = require('./cjs/react.development.js');\n}\n",
        ),
        ("node_modules/react/cjs/react.production.js", "exports.version = 'prod';\n"),
        ("node_modules/react/cjs/react.development.js", "exports.version = 'dev';\n"),
    ]);

    let ambiguous = bundler().build(&project.options(&["src/main.js"])).unwrap();
    assert_eq!(ambiguous.modules.len(), 4);
    let index = ambiguous
        .modules
        .iter()
        .find(|m| file_name(&m.path) == "index.js")
        .unwrap();
    assert_eq!(index.export_kind, ExportKind::Cjs);

    let proven = bundler()
        .build(
            &project
                .options(&["src/main.js"])
                .with_define("process.env.NODE_ENV", "\"production\""),
        )
        .unwrap();
    assert_eq!(proven.modules.len(), 3);
    let index = proven
        .modules
        .iter()
        .find(|m| file_name(&m.path) == "index.js")
        .unwrap();
    assert_eq!(index.export_kind, ExportKind::CjsProvenReexport);
    assert!(index
        .reexport_of
        .as_deref()
        .is_some_and(|p| p.ends_with("react.production.js")));

    let main = proven
        .modules
        .iter()
        .find(|m| file_name(&m.path) == "main.js")
        .unwrap();
    assert_eq!(main.bindings[0].kind, "live-getter");
    assert!(main.bindings[0].target.ends_with("react.production.js"));
}

#[test]
fn test_group_enforcement() {
    let project = Project::new(&[
        ("src/main.js", "import 'tiny';\n"),
        ("node_modules/tiny/package.json", r#"{ "name": "tiny" }"#),
        ("node_modules/tiny/index.js", "export default 1;\n"),
    ]);
    let options = |enforce: bool| {
        project
            .options(&["src/main.js"])
            .with_splitting(true)
            .with_advanced_chunks(AdvancedChunksConfig {
                groups: vec![ChunkGroupConfig::named("vendor")
                    .test("node_modules")
                    .enforce(enforce)
                    .size_range(Some(1_000_000), None)],
                ..Default::default()
            })
    };

    let enforced = bundler().build(&options(true)).unwrap();
    let names: Vec<&str> = enforced.chunks.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["main", "vendor"]);
    assert!(enforced.chunks[1].modules[0].ends_with("index.js"));

    let fallback = bundler().build(&options(false)).unwrap();
    assert_eq!(fallback.chunks.len(), 1);
    assert_eq!(fallback.chunks[0].modules.len(), 2);
}

#[test]
fn test_group_without_name_is_config_error() {
    let project = Project::new(&[("src/main.js", "export {};\n")]);
    let err = bundler()
        .build(
            &project
                .options(&["src/main.js"])
                .with_splitting(true)
                .with_advanced_chunks(AdvancedChunksConfig {
                    groups: vec![ChunkGroupConfig::default()],
                    ..Default::default()
                }),
        )
        .unwrap_err();
    assert!(err.to_string().contains("advancedChunks.groups[0].name"));
}
