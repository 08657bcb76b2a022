//! `@import` discovery for stylesheets.
//!
//! The sheet is parsed with lightningcss and the top-level import rules are read off the
//! rule list. Imports that follow other rules are invalid CSS and are dropped during
//! error recovery, the same as a browser would.

use super::{ImportKind, ImportRecord, ModuleSyntax, ParsedModule};
use lightningcss::rules::CssRule;
use lightningcss::stylesheet::{ParserOptions, StyleSheet};
use std::path::Path;

pub(crate) fn parse_stylesheet(path: &Path, source: &str) -> Result<ParsedModule, String> {
    let options = ParserOptions {
        filename: path.display().to_string(),
        error_recovery: true,
        ..ParserOptions::default()
    };
    let sheet = StyleSheet::parse(source, options).map_err(|e| format!("invalid CSS: {e}"))?;

    let imports = sheet
        .rules
        .0
        .iter()
        .filter_map(|rule| match rule {
            CssRule::Import(import) => {
                let url: &str = &import.url;
                // lightningcss lines are zero-based.
                (!url.is_empty())
                    .then(|| ImportRecord::new(url, ImportKind::CssImport, import.loc.line + 1))
            }
            _ => None,
        })
        .collect();

    let mut parsed = ParsedModule::empty(source, ModuleSyntax::None);
    parsed.imports = imports;
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(src: &str) -> Vec<String> {
        parse_stylesheet(Path::new("/styles/app.css"), src)
            .unwrap()
            .imports
            .into_iter()
            .map(|i| i.specifier)
            .collect()
    }

    #[test]
    fn test_import_forms() {
        let src = r#"
            @import "./a.css";
            @import './b.css' screen;
            @import url(./c.css);
            @import url("./d.css") layer(base) supports(display: grid) screen and (min-width: 40em);
        "#;
        assert_eq!(specs(src), vec!["./a.css", "./b.css", "./c.css", "./d.css"]);
    }

    #[test]
    fn test_escaped_quote_in_url() {
        assert_eq!(specs(r#"@import "./it\"s.css";"#), vec!["./it\"s.css"]);
    }

    #[test]
    fn test_ignores_comments_and_strings() {
        let src = r#"
            /* @import "./hidden.css"; */
            @import "./real.css";
            .a::before { content: "@import './nope.css'"; }
        "#;
        assert_eq!(specs(src), vec!["./real.css"]);
    }

    #[test]
    fn test_import_after_rules_is_dropped() {
        assert_eq!(specs(".a { color: red; }\n@import './late.css';"), Vec::<String>::new());
    }

    #[test]
    fn test_line_numbers() {
        let parsed =
            parse_stylesheet(Path::new("/x.css"), "/* header */\n\n@import './x.css';").unwrap();
        assert_eq!(parsed.imports[0].line, 3);
    }

    #[test]
    fn test_unknown_at_rule_is_not_an_import() {
        assert!(specs("@importance { }").is_empty());
    }
}
