//! Character-level tokenizer for the import scanner.
//!
//! Produces just enough structure for statement-level pattern matching: identifiers,
//! string literals, punctuators, and placeholders for numbers, regexes and templates.
//! Comments are dropped. Positions are char offsets into the source.

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Tok {
    Ident(String),
    Str(String),
    /// Template literal. `text` is only meaningful when `simple` (no `${`).
    Template { text: String, simple: bool },
    Num,
    Regex,
    Punct(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token {
    pub tok: Tok,
    pub start: usize,
    pub end: usize,
    pub line: u32,
    /// A line break separates this token from the previous one.
    pub newline_before: bool,
}

impl Token {
    pub fn is_punct(&self, p: &str) -> bool {
        matches!(self.tok, Tok::Punct(q) if q == p)
    }

    pub fn is_ident(&self, name: &str) -> bool {
        matches!(&self.tok, Tok::Ident(n) if n == name)
    }

    pub fn ident(&self) -> Option<&str> {
        match &self.tok {
            Tok::Ident(n) => Some(n),
            _ => None,
        }
    }

    /// String value of a string literal or a template without substitutions.
    pub fn string(&self) -> Option<&str> {
        match &self.tok {
            Tok::Str(s) => Some(s),
            Tok::Template { text, simple: true } => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LexError {
    pub line: u32,
    pub message: String,
}

/// Longest first.
const PUNCTUATORS: &[&str] = &[
    ">>>=", "...", "===", "!==", "**=", "<<=", ">>=", ">>>", "&&=", "||=", "??=", "=>", "==",
    "!=", "<=", ">=", "&&", "||", "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=",
    "|=", "^=", "**", "<<", ">>", "{", "}", "(", ")", "[", "]", ";", ",", "<", ">", "+", "-",
    "*", "/", "%", "&", "|", "^", "!", "~", "?", ":", "=", ".", "@", "#",
];

/// Keywords after which a `/` starts a regular expression.
const REGEX_PREFIX_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case",
    "do", "else", "yield", "await",
];

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

struct Lexer<'a> {
    chars: &'a [char],
    /// JSX text may contain stray quotes; skip them instead of failing.
    lenient: bool,
    pos: usize,
    line: u32,
    tokens: Vec<Token>,
    newline_before: bool,
}

pub(crate) fn tokenize(chars: &[char], lenient: bool) -> Result<Vec<Token>, LexError> {
    let mut lexer = Lexer {
        chars,
        lenient,
        pos: 0,
        line: 1,
        tokens: Vec::new(),
        newline_before: false,
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl Lexer<'_> {
    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn error(&self, message: impl Into<String>) -> LexError {
        LexError {
            line: self.line,
            message: message.into(),
        }
    }

    fn push(&mut self, tok: Tok, start: usize, line: u32) {
        self.tokens.push(Token {
            tok,
            start,
            end: self.pos,
            line,
            newline_before: std::mem::take(&mut self.newline_before),
        });
    }

    fn regex_allowed(&self) -> bool {
        match self.tokens.last().map(|t| &t.tok) {
            None => true,
            Some(Tok::Punct(p)) => !matches!(*p, ")" | "]"),
            Some(Tok::Ident(name)) => REGEX_PREFIX_KEYWORDS.contains(&name.as_str()),
            Some(_) => false,
        }
    }

    fn run(&mut self) -> Result<(), LexError> {
        while let Some(c) = self.peek(0) {
            let start = self.pos;
            let line = self.line;

            if c == '\n' {
                self.line += 1;
                self.newline_before = true;
                self.pos += 1;
            } else if c.is_whitespace() {
                self.pos += 1;
            } else if c == '/' && self.peek(1) == Some('/') {
                while self.peek(0).is_some_and(|c| c != '\n') {
                    self.pos += 1;
                }
            } else if c == '/' && self.peek(1) == Some('*') {
                self.skip_block_comment()?;
            } else if c == '#' && start == 0 && self.peek(1) == Some('!') {
                // Hashbang.
                while self.peek(0).is_some_and(|c| c != '\n') {
                    self.pos += 1;
                }
            } else if c == '"' || c == '\'' {
                match self.read_string(c) {
                    Ok(text) => self.push(Tok::Str(text), start, line),
                    Err(e) => self.recover(e, start, line)?,
                }
            } else if c == '`' {
                match self.read_template() {
                    Ok((text, simple)) => self.push(Tok::Template { text, simple }, start, line),
                    Err(e) => self.recover(e, start, line)?,
                }
            } else if c.is_ascii_digit()
                || (c == '.' && self.peek(1).is_some_and(|d| d.is_ascii_digit()))
            {
                while self
                    .peek(0)
                    .is_some_and(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
                {
                    self.pos += 1;
                }
                self.push(Tok::Num, start, line);
            } else if is_ident_start(c) || c == '\\' {
                while self.peek(0).is_some_and(|c| is_ident_part(c) || c == '\\') {
                    self.pos += 1;
                }
                let name: String = self.chars[start..self.pos].iter().collect();
                self.push(Tok::Ident(name), start, line);
            } else if c == '/' && self.regex_allowed() {
                match self.read_regex() {
                    Ok(()) => self.push(Tok::Regex, start, line),
                    Err(e) => self.recover(e, start, line)?,
                }
            } else {
                let punct = PUNCTUATORS
                    .iter()
                    .find(|p| {
                        p.chars()
                            .enumerate()
                            .all(|(i, pc)| self.peek(i) == Some(pc))
                    })
                    .copied();
                match punct {
                    Some(p) => {
                        self.pos += p.chars().count();
                        self.push(Tok::Punct(p), start, line);
                    }
                    // Unknown characters (e.g. stray unicode) are skipped.
                    None => self.pos += 1,
                }
            }
        }
        Ok(())
    }

    fn recover(&mut self, error: LexError, start: usize, line: u32) -> Result<(), LexError> {
        if !self.lenient {
            return Err(error);
        }
        self.pos = start + 1;
        self.line = line;
        Ok(())
    }

    fn skip_block_comment(&mut self) -> Result<(), LexError> {
        let line = self.line;
        self.pos += 2;
        loop {
            match self.peek(0) {
                None => {
                    return Err(LexError {
                        line,
                        message: "unterminated block comment".to_string(),
                    })
                }
                Some('*') if self.peek(1) == Some('/') => {
                    self.pos += 2;
                    return Ok(());
                }
                Some('\n') => {
                    self.line += 1;
                    self.newline_before = true;
                    self.pos += 1;
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    fn read_string(&mut self, quote: char) -> Result<String, LexError> {
        self.pos += 1;
        let mut text = String::new();
        loop {
            match self.peek(0) {
                None | Some('\n') => return Err(self.error("unterminated string literal")),
                Some('\\') => {
                    match self.peek(1) {
                        Some('\n') => self.line += 1,
                        Some('n') => text.push('\n'),
                        Some('t') => text.push('\t'),
                        Some(other) => text.push(other),
                        None => return Err(self.error("unterminated string literal")),
                    }
                    self.pos += 2;
                }
                Some(c) if c == quote => {
                    self.pos += 1;
                    return Ok(text);
                }
                Some(c) => {
                    text.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn read_template(&mut self) -> Result<(String, bool), LexError> {
        let line = self.line;
        self.pos += 1;
        let mut text = String::new();
        let mut simple = true;
        loop {
            match self.peek(0) {
                None => {
                    return Err(LexError {
                        line,
                        message: "unterminated template literal".to_string(),
                    })
                }
                Some('`') => {
                    self.pos += 1;
                    return Ok((text, simple));
                }
                Some('\\') => {
                    if let Some(c) = self.peek(1) {
                        text.push(c);
                    }
                    self.pos += 2;
                }
                Some('$') if self.peek(1) == Some('{') => {
                    simple = false;
                    self.pos += 2;
                    self.skip_substitution()?;
                }
                Some(c) => {
                    if c == '\n' {
                        self.line += 1;
                    }
                    text.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    /// Skip a `${ ... }` body, honouring nested braces, strings and templates.
    fn skip_substitution(&mut self) -> Result<(), LexError> {
        let mut depth = 1usize;
        while let Some(c) = self.peek(0) {
            match c {
                '{' => {
                    depth += 1;
                    self.pos += 1;
                }
                '}' => {
                    depth -= 1;
                    self.pos += 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                '"' | '\'' => {
                    self.read_string(c)?;
                }
                '`' => {
                    self.read_template()?;
                }
                '\n' => {
                    self.line += 1;
                    self.pos += 1;
                }
                _ => self.pos += 1,
            }
        }
        Err(self.error("unterminated template substitution"))
    }

    fn read_regex(&mut self) -> Result<(), LexError> {
        self.pos += 1;
        let mut in_class = false;
        loop {
            match self.peek(0) {
                None | Some('\n') => return Err(self.error("unterminated regular expression")),
                Some('\\') => self.pos += 2,
                Some('[') => {
                    in_class = true;
                    self.pos += 1;
                }
                Some(']') => {
                    in_class = false;
                    self.pos += 1;
                }
                Some('/') if !in_class => {
                    self.pos += 1;
                    while self.peek(0).is_some_and(is_ident_part) {
                        self.pos += 1;
                    }
                    return Ok(());
                }
                Some(_) => self.pos += 1,
            }
        }
    }
}
