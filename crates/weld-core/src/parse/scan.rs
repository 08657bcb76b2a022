//! Statement-level scanner for JavaScript/TypeScript.
//!
//! Walks the token stream once, tracking brace/paren nesting to know:
//! - whether an `await` sits at module top level (outside every function body),
//! - which `if`/`else` branch conditions guard each `require()`/`import()`,
//! - the import and export statements of the module.
//!
//! A second pass over the top-level statements recognises CommonJS modules whose whole
//! body forwards to another module (`module.exports = require('x')`), possibly behind
//! `if`/`else` or a ternary.

use super::lexer::{tokenize, Tok, Token};
use super::{
    CommonJsForm, ExportBinding, Guard, ImportKind, ImportRecord, ImportedName, ModuleSyntax,
    ParsedModule, SyntaxTree,
};

/// Identifiers that start a new statement after a line break.
const STATEMENT_KEYWORDS: &[&str] = &[
    "export", "import", "const", "let", "var", "function", "class", "if", "for", "while",
    "return", "module", "exports",
];

/// `(` preceded by these is not a parameter list.
const CONTROL_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "with", "return", "typeof", "await", "yield",
    "void", "delete", "in", "of", "new", "case", "throw",
];

pub(crate) fn scan_script(source: &str, lenient: bool) -> Result<ParsedModule, String> {
    let chars: Vec<char> = source.chars().collect();
    let tokens =
        tokenize(&chars, lenient).map_err(|e| format!("line {}: {}", e.line, e.message))?;

    let mut walker = Walker::new(&tokens, &chars);
    walker.run();

    let commonjs = detect_commonjs_form(&tokens, &chars);
    let mut imports = walker.imports;
    apply_form_guards(&commonjs, &mut imports);

    let module_syntax = if walker.esm {
        ModuleSyntax::Esm
    } else if walker.commonjs {
        ModuleSyntax::CommonJs
    } else {
        ModuleSyntax::None
    };

    Ok(ParsedModule {
        tree: SyntaxTree::new(source),
        imports,
        exports: walker.exports,
        has_top_level_await: walker.top_level_await,
        module_syntax,
        commonjs,
    })
}

fn text(chars: &[char], start: usize, end: usize) -> String {
    chars[start..end.max(start)]
        .iter()
        .collect::<String>()
        .trim()
        .to_string()
}

/// Index of the bracket closing the one at `open`.
fn matching_close(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (k, t) in tokens.iter().enumerate().skip(open) {
        match t.tok {
            Tok::Punct("(" | "[" | "{") => depth += 1,
            Tok::Punct(")" | "]" | "}") => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(k);
                }
            }
            _ => {}
        }
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BraceKind {
    Block,
    /// Function body, method body, or class body.
    Function,
}

#[derive(Debug)]
struct Brace {
    kind: BraceKind,
    guards_added: usize,
    /// Conditions of the `if`/`else if` chain this block is the consequent of.
    if_chain: Option<Vec<String>>,
}

#[derive(Debug)]
struct PendingGuard {
    at: usize,
    guards: Vec<Guard>,
    if_chain: Option<Vec<String>>,
}

/// Nesting depths at which an expression-bodied arrow started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ArrowBody {
    paren: usize,
    bracket: usize,
    brace: usize,
}

struct Walker<'a> {
    tokens: &'a [Token],
    chars: &'a [char],
    braces: Vec<Brace>,
    /// One entry per open `(`: whether it opens a parameter list or call.
    parens: Vec<bool>,
    brackets: usize,
    last_closed_paren_callish: bool,
    pending_function: Option<usize>,
    pending_class: Option<usize>,
    pending_guard: Option<PendingGuard>,
    after_if: Option<Vec<String>>,
    else_chain: Option<Vec<String>>,
    guards: Vec<Guard>,
    arrows: Vec<ArrowBody>,

    imports: Vec<ImportRecord>,
    exports: Vec<ExportBinding>,
    top_level_await: bool,
    esm: bool,
    commonjs: bool,
}

impl<'a> Walker<'a> {
    fn new(tokens: &'a [Token], chars: &'a [char]) -> Self {
        Self {
            tokens,
            chars,
            braces: Vec::new(),
            parens: Vec::new(),
            brackets: 0,
            last_closed_paren_callish: false,
            pending_function: None,
            pending_class: None,
            pending_guard: None,
            after_if: None,
            else_chain: None,
            guards: Vec::new(),
            arrows: Vec::new(),
            imports: Vec::new(),
            exports: Vec::new(),
            top_level_await: false,
            esm: false,
            commonjs: false,
        }
    }

    fn tok(&self, i: usize) -> Option<&'a Token> {
        self.tokens.get(i)
    }

    fn is_punct(&self, i: usize, p: &str) -> bool {
        self.tok(i).is_some_and(|t| t.is_punct(p))
    }

    fn is_ident(&self, i: usize, name: &str) -> bool {
        self.tok(i).is_some_and(|t| t.is_ident(name))
    }

    fn string_at(&self, i: usize) -> Option<&'a str> {
        self.tok(i).and_then(Token::string)
    }

    fn function_depth(&self) -> usize {
        self.braces
            .iter()
            .filter(|b| b.kind == BraceKind::Function)
            .count()
    }

    fn depths(&self) -> ArrowBody {
        ArrowBody {
            paren: self.parens.len(),
            bracket: self.brackets,
            brace: self.braces.len(),
        }
    }

    fn trim_arrows(&mut self) {
        let now = self.depths();
        self.arrows.retain(|a| {
            a.paren <= now.paren && a.bracket <= now.bracket && a.brace <= now.brace
        });
    }

    fn is_statement_start(&self, i: usize) -> bool {
        i == 0
            || self.tokens[i].newline_before
            || self.tokens[i - 1].is_punct(";")
            || self.tokens[i - 1].is_punct("}")
            || self.tokens[i - 1].is_punct("{")
    }

    fn record(&mut self, mut record: ImportRecord) {
        record.guards.clone_from(&self.guards);
        self.imports.push(record);
    }

    fn run(&mut self) {
        let mut i = 0;
        while i < self.tokens.len() {
            let after_if = self.after_if.take();
            if let Some(chain) = after_if {
                if self.is_ident(i, "else") {
                    if self.is_punct(i + 1, "{") {
                        self.pending_guard = Some(PendingGuard {
                            at: i + 1,
                            guards: negate(&chain),
                            if_chain: None,
                        });
                    } else if self.is_ident(i + 1, "if") {
                        self.else_chain = Some(chain);
                    }
                }
            }

            let tokens = self.tokens;
            let token = &tokens[i];
            let member = i > 0 && (tokens[i - 1].is_punct(".") || tokens[i - 1].is_punct("?."));
            match &token.tok {
                Tok::Punct("{") => self.open_brace(i),
                Tok::Punct("}") => self.close_brace(),
                Tok::Punct("(") => {
                    let callish = i > 0
                        && match &tokens[i - 1].tok {
                            Tok::Ident(name) => !CONTROL_KEYWORDS.contains(&name.as_str()),
                            Tok::Punct(p) => matches!(*p, "*" | ">"),
                            _ => false,
                        };
                    self.parens.push(callish);
                }
                Tok::Punct(")") => {
                    self.last_closed_paren_callish = self.parens.pop().unwrap_or(false);
                    self.trim_arrows();
                }
                Tok::Punct("[") => self.brackets += 1,
                Tok::Punct("]") => {
                    self.brackets = self.brackets.saturating_sub(1);
                    self.trim_arrows();
                }
                Tok::Punct(";") => {
                    let brace = self.braces.len();
                    self.arrows.retain(|a| a.brace < brace);
                }
                Tok::Punct(",") => {
                    let now = self.depths();
                    self.arrows.retain(|a| *a != now);
                }
                Tok::Punct("=>") => {
                    if !self.is_punct(i + 1, "{") {
                        self.arrows.push(self.depths());
                    }
                }
                Tok::Ident(name) if !member => {
                    if let Some(next) = self.ident(i, name) {
                        i = next;
                        continue;
                    }
                }
                _ => {}
            }
            i += 1;
        }
    }

    /// Handle an identifier; returns the next index when a whole statement was consumed.
    fn ident(&mut self, i: usize, name: &str) -> Option<usize> {
        match name {
            "import" => {
                if self.is_punct(i + 1, "(") {
                    self.scan_dynamic_import(i);
                    None
                } else if self.is_statement_start(i) && !self.is_punct(i + 1, ".") {
                    self.scan_import(i)
                } else {
                    None
                }
            }
            "export" if self.is_statement_start(i) => self.scan_export(i),
            "require" => {
                self.scan_require(i);
                None
            }
            "await" => {
                if self.function_depth() == 0 && self.arrows.is_empty() {
                    self.top_level_await = true;
                }
                None
            }
            "function" => {
                self.pending_function = Some(self.parens.len());
                None
            }
            "class" => {
                self.pending_class = Some(self.parens.len());
                None
            }
            "if" => {
                self.scan_if(i);
                None
            }
            "module" | "exports" | "Object" => {
                self.scan_commonjs_marker(i, name);
                None
            }
            _ => None,
        }
    }

    fn open_brace(&mut self, i: usize) {
        let depth = self.parens.len();
        let tokens = self.tokens;
        let prev = i.checked_sub(1).map(|p| &tokens[p]);
        let kind = if self.pending_class == Some(depth) {
            self.pending_class = None;
            BraceKind::Function
        } else if self.pending_function == Some(depth) {
            self.pending_function = None;
            BraceKind::Function
        } else if prev.is_some_and(|t| t.is_punct("=>")) {
            BraceKind::Function
        } else if prev.is_some_and(|t| t.is_punct(")")) && self.last_closed_paren_callish {
            BraceKind::Function
        } else {
            BraceKind::Block
        };

        let (guards, if_chain) = match self.pending_guard.take() {
            Some(pending) if pending.at == i => (pending.guards, pending.if_chain),
            other => {
                self.pending_guard = other;
                (Vec::new(), None)
            }
        };
        self.braces.push(Brace {
            kind,
            guards_added: guards.len(),
            if_chain,
        });
        self.guards.extend(guards);
    }

    fn close_brace(&mut self) {
        if let Some(brace) = self.braces.pop() {
            let keep = self.guards.len().saturating_sub(brace.guards_added);
            self.guards.truncate(keep);
            if brace.if_chain.is_some() {
                self.after_if = brace.if_chain;
            }
        }
        self.trim_arrows();
    }

    fn scan_if(&mut self, i: usize) {
        let prefix = self.else_chain.take().unwrap_or_default();
        if !self.is_punct(i + 1, "(") {
            return;
        }
        let Some(close) = matching_close(self.tokens, i + 1) else {
            return;
        };
        let condition = text(self.chars, self.tokens[i + 1].end, self.tokens[close].start);
        if !self.is_punct(close + 1, "{") {
            return;
        }
        let mut guards = negate(&prefix);
        guards.push(Guard {
            condition: condition.clone(),
            expect: true,
        });
        let mut chain = prefix;
        chain.push(condition);
        self.pending_guard = Some(PendingGuard {
            at: close + 1,
            guards,
            if_chain: Some(chain),
        });
    }

    fn scan_require(&mut self, i: usize) {
        if i > 0 && self.tokens[i - 1].is_ident("function") {
            return;
        }
        if !self.is_punct(i + 1, "(") || !self.is_punct(i + 3, ")") {
            return;
        }
        let Some(specifier) = self.string_at(i + 2) else {
            return;
        };
        let mut record = ImportRecord::new(specifier, ImportKind::Require, self.tokens[i].line);
        record.namespace = true;
        self.record(record);
        self.commonjs = true;
    }

    fn scan_dynamic_import(&mut self, i: usize) {
        let Some(specifier) = self.string_at(i + 2) else {
            return;
        };
        if !(self.is_punct(i + 3, ")") || self.is_punct(i + 3, ",")) {
            return;
        }
        let mut record = ImportRecord::new(specifier, ImportKind::Dynamic, self.tokens[i].line);
        record.namespace = true;
        self.record(record);
    }

    /// Skip `with { type: 'json' }` / `assert { ... }` after a module specifier.
    fn skip_attributes(&self, j: usize) -> usize {
        if (self.is_ident(j, "with") || self.is_ident(j, "assert")) && self.is_punct(j + 1, "{") {
            if let Some(close) = matching_close(self.tokens, j + 1) {
                return close + 1;
            }
        }
        j
    }

    fn scan_import(&mut self, i: usize) -> Option<usize> {
        let line = self.tokens[i].line;
        let mut j = i + 1;

        if let Some(specifier) = self.string_at(j) {
            self.esm = true;
            self.record(ImportRecord::new(specifier, ImportKind::Static, line));
            return Some(self.skip_attributes(j + 1));
        }

        // `import type { A } from './a'` has no runtime effect.
        if self.is_ident(j, "type") && !self.is_ident(j + 1, "from") && !self.is_punct(j + 1, ",") {
            let from = (j..self.tokens.len()).find(|&k| self.is_ident(k, "from"))?;
            self.string_at(from + 1)?;
            self.esm = true;
            return Some(self.skip_attributes(from + 2));
        }

        let mut names = Vec::new();
        let mut namespace = false;
        loop {
            let token = self.tok(j)?;
            if token.is_ident("from") && self.string_at(j + 1).is_some() {
                break;
            }
            if token.is_punct(",") {
                j += 1;
            } else if token.is_punct("*") {
                if !self.is_ident(j + 1, "as") {
                    return None;
                }
                namespace = true;
                j += 3;
            } else if token.is_punct("{") {
                let close = matching_close(self.tokens, j)?;
                names.extend(self.named_list(j + 1, close).into_iter().map(|(imported, local)| {
                    ImportedName { imported, local }
                }));
                j = close + 1;
            } else if let Some(local) = token.ident() {
                names.push(ImportedName {
                    imported: "default".to_string(),
                    local: local.to_string(),
                });
                j += 1;
            } else {
                return None;
            }
        }

        let specifier = self.string_at(j + 1)?;
        let mut record = ImportRecord::new(specifier, ImportKind::Static, line);
        record.names = names;
        record.namespace = namespace;
        self.esm = true;
        self.record(record);
        Some(self.skip_attributes(j + 2))
    }

    /// Parse `a, b as c, type T, "str" as d` between braces into (source, alias) pairs.
    fn named_list(&self, start: usize, end: usize) -> Vec<(String, String)> {
        let mut out = Vec::new();
        let mut k = start;
        while k < end {
            let token = &self.tokens[k];
            if token.is_punct(",") {
                k += 1;
                continue;
            }
            let is_type_only = token.is_ident("type")
                && k + 1 < end
                && !self.is_punct(k + 1, ",")
                && !self.is_ident(k + 1, "as");
            if is_type_only {
                // Skip to the next comma.
                while k < end && !self.tokens[k].is_punct(",") {
                    k += 1;
                }
                continue;
            }
            let source = token
                .ident()
                .map(str::to_string)
                .or_else(|| token.string().map(str::to_string));
            let Some(source) = source else {
                k += 1;
                continue;
            };
            let alias = if self.is_ident(k + 1, "as") {
                let alias_token = self.tok(k + 2);
                k += 3;
                alias_token
                    .and_then(|t| t.ident().or_else(|| t.string()))
                    .map_or_else(|| source.clone(), str::to_string)
            } else {
                k += 1;
                source.clone()
            };
            out.push((source, alias));
        }
        out
    }

    fn scan_export(&mut self, i: usize) -> Option<usize> {
        let line = self.tokens[i].line;
        let j = i + 1;
        let token = self.tok(j)?;

        if token.is_punct("*") {
            let (name, from) = if self.is_ident(j + 1, "as") {
                let alias = self.tok(j + 2)?;
                let alias = alias.ident().or_else(|| alias.string())?.to_string();
                (Some(alias), j + 3)
            } else {
                (None, j + 1)
            };
            if !self.is_ident(from, "from") {
                return None;
            }
            let specifier = self.string_at(from + 1)?.to_string();
            let mut record = ImportRecord::new(specifier.clone(), ImportKind::ReExport, line);
            match name {
                Some(name) => {
                    record.namespace = true;
                    self.exports.push(ExportBinding::ReExport {
                        name,
                        imported: "*".to_string(),
                        specifier,
                    });
                }
                None => {
                    record.star = true;
                    self.exports.push(ExportBinding::Star { specifier });
                }
            }
            self.esm = true;
            self.record(record);
            return Some(self.skip_attributes(from + 2));
        }

        if token.is_ident("type") && self.is_punct(j + 1, "{") {
            let close = matching_close(self.tokens, j + 1)?;
            self.esm = true;
            let after = if self.is_ident(close + 1, "from") {
                close + 3
            } else {
                close + 1
            };
            return Some(after);
        }

        if token.is_punct("{") {
            let close = matching_close(self.tokens, j)?;
            let pairs = self.named_list(j + 1, close);
            self.esm = true;
            if self.is_ident(close + 1, "from") {
                let specifier = self.string_at(close + 2)?.to_string();
                let mut record = ImportRecord::new(specifier.clone(), ImportKind::ReExport, line);
                for (imported, name) in pairs {
                    record.names.push(ImportedName {
                        imported: imported.clone(),
                        local: name.clone(),
                    });
                    self.exports.push(ExportBinding::ReExport {
                        name,
                        imported,
                        specifier: specifier.clone(),
                    });
                }
                self.record(record);
                return Some(self.skip_attributes(close + 3));
            }
            for (local, name) in pairs {
                self.exports.push(ExportBinding::Local { name, local });
            }
            return Some(close + 1);
        }

        let keyword = token.ident()?;
        self.esm = true;
        match keyword {
            "default" => {
                self.exports.push(ExportBinding::local("default"));
                Some(j + 1)
            }
            "const" | "let" | "var" => {
                if self.is_ident(j + 1, "enum") {
                    if let Some(name) = self.tok(j + 2).and_then(Token::ident) {
                        self.exports.push(ExportBinding::local(name));
                    }
                } else {
                    for name in self.declarator_names(j + 1) {
                        self.exports.push(ExportBinding::local(name));
                    }
                }
                Some(j)
            }
            "function" | "class" | "enum" | "namespace" => {
                let mut k = j + 1;
                if self.is_punct(k, "*") {
                    k += 1;
                }
                if let Some(name) = self.tok(k).and_then(Token::ident) {
                    self.exports.push(ExportBinding::local(name));
                }
                Some(j)
            }
            "async" | "abstract" => {
                let mut k = j + 2;
                if self.is_punct(k, "*") {
                    k += 1;
                }
                if let Some(name) = self.tok(k).and_then(Token::ident) {
                    self.exports.push(ExportBinding::local(name));
                }
                Some(j)
            }
            // Type-level declarations.
            "type" | "interface" | "declare" => Some(j),
            _ => None,
        }
    }

    /// Binding names of `a = 1, { b, c: d } = o, [e, ...f] = arr`.
    fn declarator_names(&self, start: usize) -> Vec<String> {
        let mut names = Vec::new();
        let mut k = start;
        loop {
            let Some(token) = self.tok(k) else {
                return names;
            };
            if let Some(name) = token.ident() {
                names.push(name.to_string());
                k += 1;
            } else if token.is_punct("{") || token.is_punct("[") {
                let Some(close) = matching_close(self.tokens, k) else {
                    return names;
                };
                names.extend(self.pattern_names(k + 1, close));
                k = close + 1;
            } else {
                return names;
            }

            // Skip the type annotation and initializer.
            let mut depth = 0usize;
            loop {
                let Some(t) = self.tok(k) else {
                    return names;
                };
                if depth == 0 {
                    if t.is_punct(";") {
                        return names;
                    }
                    if t.is_punct(",") {
                        k += 1;
                        break;
                    }
                    if t.newline_before
                        && t.ident().is_some_and(|n| STATEMENT_KEYWORDS.contains(&n))
                    {
                        return names;
                    }
                }
                match t.tok {
                    Tok::Punct("(" | "[" | "{") => depth += 1,
                    Tok::Punct(")" | "]" | "}") => {
                        if depth == 0 {
                            return names;
                        }
                        depth -= 1;
                    }
                    _ => {}
                }
                k += 1;
            }
        }
    }

    fn pattern_names(&self, start: usize, end: usize) -> Vec<String> {
        let mut names = Vec::new();
        let mut depth = 0usize;
        let mut default_depth: Option<usize> = None;
        for k in start..end {
            let t = &self.tokens[k];
            match &t.tok {
                Tok::Punct("(" | "[" | "{") => depth += 1,
                Tok::Punct(")" | "]" | "}") => {
                    depth = depth.saturating_sub(1);
                    if default_depth.is_some_and(|d| depth < d) {
                        default_depth = None;
                    }
                }
                Tok::Punct(",") => {
                    if default_depth == Some(depth) {
                        default_depth = None;
                    }
                }
                Tok::Punct("=") => default_depth = Some(depth),
                Tok::Ident(name) if default_depth.is_none() => {
                    let next_is_key = self.is_punct(k + 1, ":") || self.is_punct(k + 1, "(");
                    if !next_is_key {
                        names.push(name.clone());
                    }
                }
                _ => {}
            }
        }
        names
    }

    /// `module.exports`, `exports.x =`, `Object.defineProperty(exports, 'x', ...)`.
    fn scan_commonjs_marker(&mut self, i: usize, name: &str) {
        let exports_at = match name {
            "module" if self.is_punct(i + 1, ".") && self.is_ident(i + 2, "exports") => i + 2,
            "exports" => i,
            "Object"
                if self.is_punct(i + 1, ".")
                    && self.is_ident(i + 2, "defineProperty")
                    && self.is_punct(i + 3, "(")
                    && self.is_ident(i + 4, "exports")
                    && self.is_punct(i + 5, ",") =>
            {
                self.commonjs = true;
                if let Some(prop) = self.string_at(i + 6) {
                    self.exports.push(ExportBinding::local(prop));
                }
                return;
            }
            _ => return,
        };

        let k = exports_at + 1;
        if self.is_punct(k, ".") && self.is_punct(k + 2, "=") {
            self.commonjs = true;
            if let Some(prop) = self.tok(k + 1).and_then(Token::ident) {
                self.exports.push(ExportBinding::local(prop));
            }
        } else if self.is_punct(k, "[") && self.is_punct(k + 2, "]") && self.is_punct(k + 3, "=") {
            self.commonjs = true;
            if let Some(prop) = self.string_at(k + 1) {
                self.exports.push(ExportBinding::local(prop));
            }
        } else if name == "module" && self.is_punct(k, "=") {
            self.commonjs = true;
            if self.is_punct(k + 1, "{") {
                self.object_literal_keys(k + 1);
            }
        }
    }

    fn object_literal_keys(&mut self, open: usize) {
        let Some(close) = matching_close(self.tokens, open) else {
            return;
        };
        let mut depth = 0usize;
        for k in open + 1..close {
            let t = &self.tokens[k];
            match t.tok {
                Tok::Punct("(" | "[" | "{") => depth += 1,
                Tok::Punct(")" | "]" | "}") => depth = depth.saturating_sub(1),
                _ => {}
            }
            if depth != 0 {
                continue;
            }
            let key = t.ident().or_else(|| t.string());
            let at_key_position =
                k == open + 1 || self.tokens[k - 1].is_punct(",") || self.tokens[k - 1].is_punct("...");
            let followed = self.is_punct(k + 1, ":")
                || self.is_punct(k + 1, ",")
                || self.is_punct(k + 1, "(")
                || k + 1 == close;
            if let (Some(key), true, true) = (key, at_key_position, followed) {
                if !self.tokens[k - 1].is_punct("...") {
                    self.exports.push(ExportBinding::local(key));
                }
            }
        }
    }
}

fn negate(conditions: &[String]) -> Vec<Guard> {
    conditions
        .iter()
        .map(|c| Guard {
            condition: c.clone(),
            expect: false,
        })
        .collect()
}

/// Give each forwarded `require` the guards of the branch it sits in.
fn apply_form_guards(form: &CommonJsForm, imports: &mut [ImportRecord]) {
    if !matches!(form, CommonJsForm::Conditional { .. }) {
        return;
    }
    let targets = form.targets();
    for record in imports.iter_mut().filter(|r| r.kind == ImportKind::Require) {
        let mut matching = targets.iter().filter(|(spec, _)| *spec == record.specifier);
        let Some((_, guards)) = matching.next() else {
            continue;
        };
        // Reachable from more than one branch: unconditional.
        record.guards = if matching.next().is_some() {
            Vec::new()
        } else {
            guards.clone()
        };
    }
}

/// Recognise a body that only forwards `module.exports` to another module.
fn detect_commonjs_form(tokens: &[Token], chars: &[char]) -> CommonJsForm {
    let mut i = 0;
    // Directive prologue.
    while tokens.get(i).is_some_and(|t| matches!(t.tok, Tok::Str(_))) {
        i += 1;
        if tokens.get(i).is_some_and(|t| t.is_punct(";")) {
            i += 1;
        }
    }
    let Some((form, mut end)) = parse_statement(tokens, chars, i) else {
        return CommonJsForm::Opaque;
    };
    while tokens.get(end).is_some_and(|t| t.is_punct(";")) {
        end += 1;
    }
    if end == tokens.len() {
        form
    } else {
        CommonJsForm::Opaque
    }
}

fn skip_semicolons(tokens: &[Token], mut i: usize) -> usize {
    while tokens.get(i).is_some_and(|t| t.is_punct(";")) {
        i += 1;
    }
    i
}

fn parse_statement(tokens: &[Token], chars: &[char], i: usize) -> Option<(CommonJsForm, usize)> {
    let t = tokens.get(i)?;

    if t.is_punct("{") {
        let (form, j) = parse_statement(tokens, chars, i + 1)?;
        let j = skip_semicolons(tokens, j);
        return tokens
            .get(j)
            .is_some_and(|t| t.is_punct("}"))
            .then_some((form, j + 1));
    }

    if t.is_ident("if") {
        if !tokens.get(i + 1)?.is_punct("(") {
            return None;
        }
        let close = matching_close(tokens, i + 1)?;
        let condition = text(chars, tokens[i + 1].end, tokens[close].start);
        let (consequent, j) = parse_statement(tokens, chars, close + 1)?;
        let mut j = skip_semicolons(tokens, j);
        let alternate = if tokens.get(j).is_some_and(|t| t.is_ident("else")) {
            let (alternate, k) = parse_statement(tokens, chars, j + 1)?;
            j = k;
            alternate
        } else {
            CommonJsForm::Opaque
        };
        return Some((
            CommonJsForm::Conditional {
                condition,
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
            },
            j,
        ));
    }

    let is_assignment = t.is_ident("module")
        && tokens.get(i + 1)?.is_punct(".")
        && tokens.get(i + 2)?.is_ident("exports")
        && tokens.get(i + 3)?.is_punct("=");
    if !is_assignment {
        return None;
    }
    let end = expression_end(tokens, i + 4);
    let form = parse_expression(tokens, chars, i + 4, end)?;
    let next = if tokens.get(end).is_some_and(|t| t.is_punct(";")) {
        end + 1
    } else {
        end
    };
    Some((form, next))
}

/// End of an assignment's right-hand side: `;`, an unbalanced closer, `else`, or EOF.
fn expression_end(tokens: &[Token], start: usize) -> usize {
    let mut depth = 0usize;
    for (k, t) in tokens.iter().enumerate().skip(start) {
        match t.tok {
            Tok::Punct("(" | "[" | "{") => depth += 1,
            Tok::Punct(")" | "]" | "}") => {
                if depth == 0 {
                    return k;
                }
                depth -= 1;
            }
            Tok::Punct(";") if depth == 0 => return k,
            Tok::Ident(ref name) if depth == 0 && name == "else" => return k,
            _ => {}
        }
    }
    tokens.len()
}

/// `require('x')`, `(expr)`, or `cond ? expr : expr`.
fn parse_expression(
    tokens: &[Token],
    chars: &[char],
    start: usize,
    end: usize,
) -> Option<CommonJsForm> {
    if start >= end {
        return None;
    }
    if tokens[start].is_punct("(") && matching_close(tokens, start) == Some(end - 1) {
        return parse_expression(tokens, chars, start + 1, end - 1);
    }
    if end - start == 4
        && tokens[start].is_ident("require")
        && tokens[start + 1].is_punct("(")
        && tokens[start + 3].is_punct(")")
    {
        let specifier = tokens[start + 2].string()?;
        return Some(CommonJsForm::Reexport {
            specifier: specifier.to_string(),
        });
    }

    let mut depth = 0usize;
    let mut question = None;
    let mut nested = 0usize;
    let mut colon = None;
    for k in start..end {
        match tokens[k].tok {
            Tok::Punct("(" | "[" | "{") => depth += 1,
            Tok::Punct(")" | "]" | "}") => depth = depth.saturating_sub(1),
            Tok::Punct("?") if depth == 0 => {
                if question.is_none() {
                    question = Some(k);
                } else {
                    nested += 1;
                }
            }
            Tok::Punct(":") if depth == 0 && question.is_some() => {
                if nested == 0 {
                    colon = Some(k);
                    break;
                }
                nested -= 1;
            }
            _ => {}
        }
    }
    let (question, colon) = (question?, colon?);
    if question == start {
        return None;
    }
    let condition = text(chars, tokens[start].start, tokens[question - 1].end);
    let consequent = parse_expression(tokens, chars, question + 1, colon)?;
    let alternate = parse_expression(tokens, chars, colon + 1, end)?;
    Some(CommonJsForm::Conditional {
        condition,
        consequent: Box::new(consequent),
        alternate: Box::new(alternate),
    })
}
