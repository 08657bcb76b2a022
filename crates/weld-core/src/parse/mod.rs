//! Parser boundary.
//!
//! The graph builder only needs a per-file summary: import records, export bindings,
//! whether the file awaits at its top level, and which CommonJS export form it uses.
//! [`SourceParser`] is the seam for plugging in a full parser; [`ScanParser`] is the
//! built-in implementation: a comment/string-aware token scanner for scripts and
//! lightningcss for stylesheets.

mod css;
mod lexer;
mod scan;

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Opaque handle to a parsed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxTree {
    source: Arc<str>,
}

impl SyntaxTree {
    #[must_use]
    pub fn new(source: impl Into<Arc<str>>) -> Self {
        Self {
            source: source.into(),
        }
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn byte_len(&self) -> u64 {
        self.source.len() as u64
    }
}

/// How an import is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportKind {
    /// `import ... from 'x'`, `import 'x'`
    Static,
    /// `export ... from 'x'`
    ReExport,
    /// `import('x')`
    Dynamic,
    /// `require('x')`
    Require,
    /// CSS `@import`
    CssImport,
}

impl ImportKind {
    /// Static edges take part in synchronous initialization ordering.
    #[must_use]
    pub fn is_static(self) -> bool {
        !matches!(self, Self::Dynamic)
    }

    #[must_use]
    pub fn resolution_kind(self) -> crate::resolver::ResolutionKind {
        match self {
            Self::Require => crate::resolver::ResolutionKind::Require,
            _ => crate::resolver::ResolutionKind::Import,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportedName {
    /// Name in the exporting module (`default` for default imports).
    pub imported: String,
    /// Name bound in the importing module.
    pub local: String,
}

/// Branch condition an import sits under: the import is only reachable when
/// `condition` evaluates to `expect`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Guard {
    pub condition: String,
    pub expect: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportRecord {
    pub specifier: String,
    pub kind: ImportKind,
    pub names: Vec<ImportedName>,
    /// The whole module object is used (`import * as`, `require`, `import()`).
    pub namespace: bool,
    /// `export * from`
    pub star: bool,
    pub guards: Vec<Guard>,
    /// 1-indexed.
    pub line: u32,
}

impl ImportRecord {
    #[must_use]
    pub fn new(specifier: impl Into<String>, kind: ImportKind, line: u32) -> Self {
        Self {
            specifier: specifier.into(),
            kind,
            names: Vec::new(),
            namespace: false,
            star: false,
            guards: Vec::new(),
            line,
        }
    }
}

/// One name a module exports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExportBinding {
    /// Declared in this module. `local` is the binding it exports.
    Local { name: String, local: String },
    /// `export { imported as name } from 'specifier'`; `imported` is `*` for
    /// `export * as name from`.
    ReExport {
        name: String,
        imported: String,
        specifier: String,
    },
    /// `export * from 'specifier'`
    Star { specifier: String },
}

impl ExportBinding {
    #[must_use]
    pub fn local(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::Local {
            local: name.clone(),
            name,
        }
    }

    /// Exported name; `None` for `export *`.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Local { name, .. } | Self::ReExport { name, .. } => Some(name),
            Self::Star { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleSyntax {
    Esm,
    CommonJs,
    /// No module syntax at all (plain script, stylesheet).
    None,
}

/// Shape of a CommonJS module body, as far as re-exporting is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommonJsForm {
    /// Anything other than the forms below.
    Opaque,
    /// The body is exactly `module.exports = require('specifier')`.
    Reexport { specifier: String },
    /// `if (condition) A else B`, or `module.exports = condition ? A : B`.
    Conditional {
        condition: String,
        consequent: Box<CommonJsForm>,
        alternate: Box<CommonJsForm>,
    },
}

impl CommonJsForm {
    /// Every specifier this form can forward to, each with the guards under which it
    /// is the forwarded one.
    #[must_use]
    pub fn targets(&self) -> Vec<(String, Vec<Guard>)> {
        let mut out = Vec::new();
        self.collect_targets(&mut Vec::new(), &mut out);
        out
    }

    fn collect_targets(&self, guards: &mut Vec<Guard>, out: &mut Vec<(String, Vec<Guard>)>) {
        match self {
            Self::Opaque => {}
            Self::Reexport { specifier } => out.push((specifier.clone(), guards.clone())),
            Self::Conditional {
                condition,
                consequent,
                alternate,
            } => {
                for (branch, expect) in [(consequent, true), (alternate, false)] {
                    guards.push(Guard {
                        condition: condition.clone(),
                        expect,
                    });
                    branch.collect_targets(guards, out);
                    guards.pop();
                }
            }
        }
    }
}

/// Per-file parse result.
#[derive(Debug, Clone)]
pub struct ParsedModule {
    pub tree: SyntaxTree,
    pub imports: Vec<ImportRecord>,
    pub exports: Vec<ExportBinding>,
    pub has_top_level_await: bool,
    pub module_syntax: ModuleSyntax,
    pub commonjs: CommonJsForm,
}

impl ParsedModule {
    fn empty(source: &str, module_syntax: ModuleSyntax) -> Self {
        Self {
            tree: SyntaxTree::new(source),
            imports: Vec::new(),
            exports: Vec::new(),
            has_top_level_await: false,
            module_syntax,
            commonjs: CommonJsForm::Opaque,
        }
    }
}

/// Turns a file's text into a [`ParsedModule`]. Errors are plain messages; the caller
/// attaches the path.
pub trait SourceParser: Send + Sync + std::fmt::Debug {
    fn parse(&self, path: &Path, source: &str) -> Result<ParsedModule, String>;
}

/// Built-in token-scanning parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanParser;

impl SourceParser for ScanParser {
    fn parse(&self, path: &Path, source: &str) -> Result<ParsedModule, String> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "css" => css::parse_stylesheet(path, source),
            "json" => {
                serde_json::from_str::<serde_json::Value>(source)
                    .map_err(|e| format!("invalid JSON: {e}"))?;
                let mut parsed = ParsedModule::empty(source, ModuleSyntax::CommonJs);
                parsed.exports.push(ExportBinding::local("default"));
                Ok(parsed)
            }
            "jsx" | "tsx" => scan::scan_script(source, true),
            _ => scan::scan_script(source, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_by_extension() {
        let css = ScanParser
            .parse(Path::new("/a.css"), "@import './b.css';")
            .unwrap();
        assert_eq!(css.imports[0].kind, ImportKind::CssImport);

        let json = ScanParser.parse(Path::new("/a.json"), "{\"a\":1}").unwrap();
        assert_eq!(json.module_syntax, ModuleSyntax::CommonJs);
        assert!(ScanParser.parse(Path::new("/bad.json"), "{").is_err());

        let jsx = ScanParser
            .parse(Path::new("/a.jsx"), "import x from './x';\nconst el = <p>Don't</p>;")
            .unwrap();
        assert_eq!(jsx.imports.len(), 1);
    }

    #[test]
    fn test_commonjs_form_targets() {
        let form = CommonJsForm::Conditional {
            condition: "a".into(),
            consequent: Box::new(CommonJsForm::Reexport {
                specifier: "./prod".into(),
            }),
            alternate: Box::new(CommonJsForm::Reexport {
                specifier: "./dev".into(),
            }),
        };
        let targets = form.targets();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].0, "./prod");
        assert!(targets[0].1[0].expect);
        assert!(!targets[1].1[0].expect);
    }

    #[test]
    fn test_syntax_tree_len() {
        let tree = SyntaxTree::new("héllo");
        assert_eq!(tree.byte_len(), 6);
        assert_eq!(tree.source(), "héllo");
    }
}
