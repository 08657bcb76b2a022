//! Static evaluation of branch conditions against `define` substitutions.
//!
//! Supported: string/number/boolean/`null`/`undefined` literals, identifiers and
//! member paths (`process.env.NODE_ENV`) looked up in the defines, `!`, `===`, `!==`,
//! `==`, `!=`, `&&`, `||` and parentheses. Anything else, or an identifier without a
//! define, makes the condition runtime-unknown.

use crate::parse::Guard;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Num(f64),
    Bool(bool),
    Null,
    Undefined,
}

impl Value {
    fn truthy(&self) -> bool {
        match self {
            Self::Str(s) => !s.is_empty(),
            Self::Num(n) => *n != 0.0 && !n.is_nan(),
            Self::Bool(b) => *b,
            Self::Null | Self::Undefined => false,
        }
    }

    fn to_number(&self) -> Option<f64> {
        match self {
            Self::Num(n) => Some(*n),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Str(s) if s.trim().is_empty() => Some(0.0),
            Self::Str(s) => s.trim().parse().ok(),
            Self::Null => Some(0.0),
            Self::Undefined => None,
        }
    }

    #[allow(clippy::float_cmp)]
    fn strict_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Num(a), Self::Num(b)) => a == b,
            _ => self == other,
        }
    }

    #[allow(clippy::float_cmp)]
    fn loose_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null | Self::Undefined, Self::Null | Self::Undefined) => true,
            (Self::Null | Self::Undefined, _) | (_, Self::Null | Self::Undefined) => false,
            (Self::Str(a), Self::Str(b)) => a == b,
            _ => match (self.to_number(), other.to_number()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// Parse a define value: a JS literal, or any other text as a plain string.
    fn from_define(raw: &str) -> Self {
        let raw = raw.trim();
        match parse_expression(raw) {
            Some(Expr::Lit(value)) => value,
            _ => Self::Str(raw.to_string()),
        }
    }
}

/// Constant substitutions for one build.
#[derive(Debug, Clone, Default)]
pub struct Defines {
    values: BTreeMap<String, Value>,
}

impl Defines {
    #[must_use]
    pub fn new(raw: &BTreeMap<String, String>) -> Self {
        Self {
            values: raw
                .iter()
                .map(|(key, value)| (key.trim().to_string(), Value::from_define(value)))
                .collect(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Truthiness of `condition`, or `None` if it is not statically known.
    #[must_use]
    pub fn evaluate(&self, condition: &str) -> Option<bool> {
        let expr = parse_expression(condition)?;
        match self.eval(&expr) {
            Known::Value(value) => Some(value.truthy()),
            Known::Truthiness(truthy) => Some(truthy),
            Known::Unknown => None,
        }
    }

    /// Whether some guard is statically known to fail.
    #[must_use]
    pub fn is_dead(&self, guards: &[Guard]) -> bool {
        guards
            .iter()
            .any(|guard| self.evaluate(&guard.condition) == Some(!guard.expect))
    }

    fn eval(&self, expr: &Expr) -> Known {
        match expr {
            Expr::Lit(value) => Known::Value(value.clone()),
            Expr::Path(path) => self
                .values
                .get(path)
                .cloned()
                .map_or(Known::Unknown, Known::Value),
            Expr::Not(inner) => match self.eval(inner).truthiness() {
                Some(truthy) => Known::Value(Value::Bool(!truthy)),
                None => Known::Unknown,
            },
            Expr::Binary(op, left, right) => {
                let left = self.eval(left);
                match op {
                    Op::And => match left.truthiness() {
                        Some(false) => left,
                        Some(true) => self.eval(right),
                        None => match self.eval(right).truthiness() {
                            Some(false) => Known::Truthiness(false),
                            _ => Known::Unknown,
                        },
                    },
                    Op::Or => match left.truthiness() {
                        Some(true) => left,
                        Some(false) => self.eval(right),
                        None => match self.eval(right).truthiness() {
                            Some(true) => Known::Truthiness(true),
                            _ => Known::Unknown,
                        },
                    },
                    Op::StrictEq | Op::StrictNe | Op::LooseEq | Op::LooseNe => {
                        let (Known::Value(a), Known::Value(b)) = (left, self.eval(right)) else {
                            return Known::Unknown;
                        };
                        let result = match op {
                            Op::StrictEq => a.strict_eq(&b),
                            Op::StrictNe => !a.strict_eq(&b),
                            Op::LooseEq => a.loose_eq(&b),
                            _ => !a.loose_eq(&b),
                        };
                        Known::Value(Value::Bool(result))
                    }
                }
            }
        }
    }
}

#[derive(Debug)]
enum Known {
    Value(Value),
    /// Truthiness is known but not the exact value.
    Truthiness(bool),
    Unknown,
}

impl Known {
    fn truthiness(&self) -> Option<bool> {
        match self {
            Self::Value(value) => Some(value.truthy()),
            Self::Truthiness(truthy) => Some(*truthy),
            Self::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    And,
    Or,
    StrictEq,
    StrictNe,
    LooseEq,
    LooseNe,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Lit(Value),
    Path(String),
    Not(Box<Expr>),
    Binary(Op, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Str(String),
    Num(f64),
    Path(String),
    Punct(&'static str),
}

const PUNCT: &[&str] = &["===", "!==", "==", "!=", "&&", "||", "!", "(", ")"];

fn tokenize(src: &str) -> Option<Vec<Token>> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '"' || c == '\'' || c == '`' {
            let mut value = String::new();
            i += 1;
            loop {
                let ch = *chars.get(i)?;
                i += 1;
                if ch == c {
                    break;
                }
                if ch == '\\' {
                    value.push(*chars.get(i)?);
                    i += 1;
                } else if c == '`' && ch == '$' && chars.get(i) == Some(&'{') {
                    return None;
                } else {
                    value.push(ch);
                }
            }
            tokens.push(Token::Str(value));
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            tokens.push(Token::Num(text.parse().ok()?));
        } else if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '$' | '.'))
            {
                i += 1;
            }
            let path: String = chars[start..i].iter().collect();
            if path.ends_with('.') || path.contains("..") {
                return None;
            }
            tokens.push(Token::Path(path));
        } else {
            let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
            let punct: &'static str = PUNCT.iter().copied().find(|p| rest.starts_with(*p))?;
            i += punct.chars().count();
            tokens.push(Token::Punct(punct));
        }
    }
    Some(tokens)
}

/// Precedence climbing over `||` < `&&` < equality < unary `!`.
fn parse_expression(src: &str) -> Option<Expr> {
    let tokens = tokenize(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or()?;
    (parser.pos == parser.tokens.len()).then_some(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn eat(&mut self, punct: &str) -> bool {
        if matches!(self.tokens.get(self.pos), Some(Token::Punct(p)) if *p == punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or(&mut self) -> Option<Expr> {
        let mut left = self.and()?;
        while self.eat("||") {
            left = Expr::Binary(Op::Or, Box::new(left), Box::new(self.and()?));
        }
        Some(left)
    }

    fn and(&mut self) -> Option<Expr> {
        let mut left = self.equality()?;
        while self.eat("&&") {
            left = Expr::Binary(Op::And, Box::new(left), Box::new(self.equality()?));
        }
        Some(left)
    }

    fn equality(&mut self) -> Option<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = if self.eat("===") {
                Op::StrictEq
            } else if self.eat("!==") {
                Op::StrictNe
            } else if self.eat("==") {
                Op::LooseEq
            } else if self.eat("!=") {
                Op::LooseNe
            } else {
                return Some(left);
            };
            left = Expr::Binary(op, Box::new(left), Box::new(self.unary()?));
        }
    }

    fn unary(&mut self) -> Option<Expr> {
        if self.eat("!") {
            return Some(Expr::Not(Box::new(self.unary()?)));
        }
        if self.eat("(") {
            let inner = self.or()?;
            return self.eat(")").then_some(inner);
        }
        let token = self.tokens.get(self.pos)?.clone();
        self.pos += 1;
        Some(match token {
            Token::Str(s) => Expr::Lit(Value::Str(s)),
            Token::Num(n) => Expr::Lit(Value::Num(n)),
            Token::Path(path) => match path.as_str() {
                "true" => Expr::Lit(Value::Bool(true)),
                "false" => Expr::Lit(Value::Bool(false)),
                "null" => Expr::Lit(Value::Null),
                "undefined" => Expr::Lit(Value::Undefined),
                _ => Expr::Path(path),
            },
            Token::Punct(_) => return None,
        })
    }
}
