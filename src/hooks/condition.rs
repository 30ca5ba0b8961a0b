//! Hook conditions: a small, pure expression language over record payloads.
//!
//! The payload of the record being dispatched is bound to the root
//! identifier `cage`:
//!
//! ```text
//! cage.total > 100 && cage.status == "paid"
//! has(cage.customer.email) and cage.customer.email endsWith "@example.com"
//! cage.tags[0] in ["urgent", "vip"] || len(cage.items) >= 10
//! lower(cage.region) matches "^eu-"
//! ```
//!
//! Conditions are compiled once when configuration is loaded. Syntax
//! errors, unknown identifiers or functions, bad regex literals, and
//! expressions that can statically never yield a boolean are rejected at
//! that point. Everything else is checked during evaluation: reading a
//! field that is not present is an error unless the read is wrapped in
//! `has(...)`, and so is any operator applied to values of the wrong type.

use crate::core::store::{Payload, json_kind};
use regex::Regex;
use serde_json::Value;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Name the payload is bound to inside expressions.
pub const ROOT_IDENT: &str = "cage";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConditionError {
    #[error("syntax error at offset {position}: {message}")]
    Syntax { position: usize, message: String },
    #[error("unknown identifier '{0}' (record fields are available as `cage.<field>`)")]
    UnknownIdentifier(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("{function}() takes {expected} argument(s), got {found}")]
    Arity {
        function: String,
        expected: usize,
        found: usize,
    },
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),
    #[error("condition yields a {0}, not a boolean")]
    NotBoolean(&'static str),
    #[error("field `{0}` is not present")]
    MissingField(String),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("arithmetic result is not a finite number")]
    NumericOverflow,
    #[error("index {index} is out of range for `{path}`")]
    IndexOutOfRange { path: String, index: String },
}

/// A compiled hook condition.
#[derive(Debug, Clone)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    pub fn compile(source: &str) -> Result<Self, ConditionError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        parser.expect_end()?;
        check(&expr)?;
        match static_kind(&expr) {
            Some(Kind::Bool) | None => {}
            Some(kind) => return Err(ConditionError::NotBoolean(kind.name())),
        }
        Ok(Condition {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, data: &Payload) -> Result<bool, ConditionError> {
        match eval(&self.expr, data)?.as_ref() {
            Value::Bool(b) => Ok(*b),
            other => Err(ConditionError::NotBoolean(json_kind(other))),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

// ---------------------------------------------------------------------------
// Lexing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64),
    Str(String),
    Ident(String),
    Sym(Sym),
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sym {
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Bang,
    AndAnd,
    OrOr,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
}

impl Sym {
    fn text(&self) -> &'static str {
        match self {
            Sym::LParen => "(",
            Sym::RParen => ")",
            Sym::LBracket => "[",
            Sym::RBracket => "]",
            Sym::Comma => ",",
            Sym::Dot => ".",
            Sym::Bang => "!",
            Sym::AndAnd => "&&",
            Sym::OrOr => "||",
            Sym::EqEq => "==",
            Sym::NotEq => "!=",
            Sym::Lt => "<",
            Sym::Le => "<=",
            Sym::Gt => ">",
            Sym::Ge => ">=",
            Sym::Plus => "+",
            Sym::Minus => "-",
            Sym::Star => "*",
            Sym::Slash => "/",
            Sym::Percent => "%",
        }
    }
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tok::Num(n) => write!(f, "number {}", n),
            Tok::Str(s) => write!(f, "string {:?}", s),
            Tok::Ident(i) => write!(f, "'{}'", i),
            Tok::Sym(s) => write!(f, "'{}'", s.text()),
            Tok::End => f.write_str("end of input"),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    pos: usize,
}

fn syntax(position: usize, message: impl Into<String>) -> ConditionError {
    ConditionError::Syntax {
        position,
        message: message.into(),
    }
}

fn tokenize(src: &str) -> Result<Vec<Token>, ConditionError> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let at = |i: usize| chars.get(i).map(|(_, c)| *c);
    let mut out = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            while at(i).is_some_and(|c| c.is_ascii_digit()) {
                i += 1;
            }
            if at(i) == Some('.') && at(i + 1).is_some_and(|c| c.is_ascii_digit()) {
                i += 1;
                while at(i).is_some_and(|c| c.is_ascii_digit()) {
                    i += 1;
                }
            }
            if matches!(at(i), Some('e') | Some('E')) {
                let mut j = i + 1;
                if matches!(at(j), Some('+') | Some('-')) {
                    j += 1;
                }
                if at(j).is_some_and(|c| c.is_ascii_digit()) {
                    i = j;
                    while at(i).is_some_and(|c| c.is_ascii_digit()) {
                        i += 1;
                    }
                }
            }
            let end = chars.get(i).map(|(p, _)| *p).unwrap_or(src.len());
            let text = &src[chars[start].0..end];
            let n = text
                .parse::<f64>()
                .map_err(|_| syntax(pos, format!("invalid number '{}'", text)))?;
            if !n.is_finite() {
                return Err(syntax(pos, format!("number '{}' is out of range", text)));
            }
            out.push(Token { tok: Tok::Num(n), pos });
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(c) = at(i).filter(|c| c.is_alphanumeric() || *c == '_') {
                ident.push(c);
                i += 1;
            }
            out.push(Token {
                tok: Tok::Ident(ident),
                pos,
            });
            continue;
        }

        if c == '"' || c == '\'' {
            let quote = c;
            let mut value = String::new();
            i += 1;
            loop {
                match at(i) {
                    None => return Err(syntax(pos, "unterminated string literal")),
                    Some(c) if c == quote => {
                        i += 1;
                        break;
                    }
                    Some('\\') => {
                        match at(i + 1) {
                            Some('n') => value.push('\n'),
                            Some('t') => value.push('\t'),
                            Some('r') => value.push('\r'),
                            Some('\\') => value.push('\\'),
                            Some('"') => value.push('"'),
                            Some('\'') => value.push('\''),
                            // Kept verbatim so regex classes like `\d` survive.
                            Some(other) => {
                                value.push('\\');
                                value.push(other);
                            }
                            None => return Err(syntax(pos, "unterminated string literal")),
                        }
                        i += 2;
                    }
                    Some(c) => {
                        value.push(c);
                        i += 1;
                    }
                }
            }
            out.push(Token {
                tok: Tok::Str(value),
                pos,
            });
            continue;
        }

        let next = at(i + 1);
        let (sym, width) = match (c, next) {
            ('&', Some('&')) => (Sym::AndAnd, 2),
            ('|', Some('|')) => (Sym::OrOr, 2),
            ('=', Some('=')) => (Sym::EqEq, 2),
            ('!', Some('=')) => (Sym::NotEq, 2),
            ('<', Some('=')) => (Sym::Le, 2),
            ('>', Some('=')) => (Sym::Ge, 2),
            ('(', _) => (Sym::LParen, 1),
            (')', _) => (Sym::RParen, 1),
            ('[', _) => (Sym::LBracket, 1),
            (']', _) => (Sym::RBracket, 1),
            (',', _) => (Sym::Comma, 1),
            ('.', _) => (Sym::Dot, 1),
            ('!', _) => (Sym::Bang, 1),
            ('<', _) => (Sym::Lt, 1),
            ('>', _) => (Sym::Gt, 1),
            ('+', _) => (Sym::Plus, 1),
            ('-', _) => (Sym::Minus, 1),
            ('*', _) => (Sym::Star, 1),
            ('/', _) => (Sym::Slash, 1),
            ('%', _) => (Sym::Percent, 1),
            ('=', _) => return Err(syntax(pos, "unexpected '=' (use '==' to compare)")),
            (other, _) => return Err(syntax(pos, format!("unexpected character '{}'", other))),
        };
        out.push(Token {
            tok: Tok::Sym(sym),
            pos,
        });
        i += width;
    }

    out.push(Token {
        tok: Tok::End,
        pos: src.len(),
    });
    Ok(out)
}

// ---------------------------------------------------------------------------
// Syntax tree and parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Contains,
    StartsWith,
    EndsWith,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    fn text(&self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::In => "in",
            BinaryOp::Contains => "contains",
            BinaryOp::StartsWith => "startsWith",
            BinaryOp::EndsWith => "endsWith",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Has,
    Len,
    Lower,
    Upper,
}

impl Func {
    fn lookup(name: &str) -> Option<Func> {
        match name {
            "has" => Some(Func::Has),
            "len" => Some(Func::Len),
            "lower" => Some(Func::Lower),
            "upper" => Some(Func::Upper),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Func::Has => "has",
            Func::Len => "len",
            Func::Lower => "lower",
            Func::Upper => "upper",
        }
    }
}

#[derive(Debug, Clone)]
enum Pattern {
    Static(Regex),
    Dynamic(Box<Expr>),
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Array(Vec<Expr>),
    Root,
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Matches(Box<Expr>, Pattern),
    Call(Func, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn eat_sym(&mut self, sym: Sym) -> bool {
        if self.peek().tok == Tok::Sym(sym) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if matches!(&self.peek().tok, Tok::Ident(i) if i == word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_sym(&mut self, sym: Sym) -> Result<(), ConditionError> {
        if self.eat_sym(sym) {
            return Ok(());
        }
        let token = self.peek();
        Err(syntax(
            token.pos,
            format!("expected '{}', found {}", sym.text(), token.tok),
        ))
    }

    fn expect_end(&mut self) -> Result<(), ConditionError> {
        let token = self.peek();
        if token.tok == Tok::End {
            Ok(())
        } else {
            Err(syntax(token.pos, format!("unexpected {}", token.tok)))
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.parse_and()?;
        while self.eat_sym(Sym::OrOr) || self.eat_word("or") {
            let right = self.parse_and()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.parse_equality()?;
        while self.eat_sym(Sym::AndAnd) || self.eat_word("and") {
            let right = self.parse_equality()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = if self.eat_sym(Sym::EqEq) {
                BinaryOp::Eq
            } else if self.eat_sym(Sym::NotEq) {
                BinaryOp::Ne
            } else {
                return Ok(left);
            };
            let right = self.parse_comparison()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.parse_additive()?;
        loop {
            // `None` stands for `matches`, which gets its own node.
            let op = match &self.peek().tok {
                Tok::Sym(Sym::Lt) => Some(BinaryOp::Lt),
                Tok::Sym(Sym::Le) => Some(BinaryOp::Le),
                Tok::Sym(Sym::Gt) => Some(BinaryOp::Gt),
                Tok::Sym(Sym::Ge) => Some(BinaryOp::Ge),
                Tok::Ident(w) if w == "in" => Some(BinaryOp::In),
                Tok::Ident(w) if w == "contains" => Some(BinaryOp::Contains),
                Tok::Ident(w) if w == "startsWith" => Some(BinaryOp::StartsWith),
                Tok::Ident(w) if w == "endsWith" => Some(BinaryOp::EndsWith),
                Tok::Ident(w) if w == "matches" => None,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_additive()?;
            left = match op {
                Some(op) => Expr::Binary(op, Box::new(left), Box::new(right)),
                None => {
                    let pattern = match right {
                        Expr::Literal(Value::String(p)) => Pattern::Static(
                            Regex::new(&p)
                                .map_err(|e| ConditionError::InvalidPattern(e.to_string()))?,
                        ),
                        other => Pattern::Dynamic(Box::new(other)),
                    };
                    Expr::Matches(Box::new(left), pattern)
                }
            };
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = if self.eat_sym(Sym::Plus) {
                BinaryOp::Add
            } else if self.eat_sym(Sym::Minus) {
                BinaryOp::Sub
            } else {
                return Ok(left);
            };
            let right = self.parse_multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.eat_sym(Sym::Star) {
                BinaryOp::Mul
            } else if self.eat_sym(Sym::Slash) {
                BinaryOp::Div
            } else if self.eat_sym(Sym::Percent) {
                BinaryOp::Rem
            } else {
                return Ok(left);
            };
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ConditionError> {
        if self.eat_sym(Sym::Bang) || self.eat_word("not") {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        if self.eat_sym(Sym::Minus) {
            let operand = self.parse_unary()?;
            return Ok(match operand {
                Expr::Literal(Value::Number(n)) => {
                    Expr::Literal(number(-n.as_f64().unwrap_or_default())?)
                }
                other => Expr::Unary(UnaryOp::Neg, Box::new(other)),
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ConditionError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat_sym(Sym::Dot) {
                let token = self.advance();
                match token.tok {
                    Tok::Ident(name) => expr = Expr::Member(Box::new(expr), name),
                    other => {
                        return Err(syntax(
                            token.pos,
                            format!("expected field name after '.', found {}", other),
                        ));
                    }
                }
            } else if self.eat_sym(Sym::LBracket) {
                let index = self.parse_or()?;
                self.expect_sym(Sym::RBracket)?;
                expr = match index {
                    Expr::Literal(Value::String(key)) => Expr::Member(Box::new(expr), key),
                    other => Expr::Index(Box::new(expr), Box::new(other)),
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ConditionError> {
        let token = self.advance();
        match token.tok {
            Tok::Num(n) => Ok(Expr::Literal(number(n)?)),
            Tok::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Tok::Sym(Sym::LParen) => {
                let inner = self.parse_or()?;
                self.expect_sym(Sym::RParen)?;
                Ok(inner)
            }
            Tok::Sym(Sym::LBracket) => {
                let mut items = Vec::new();
                if !self.eat_sym(Sym::RBracket) {
                    loop {
                        items.push(self.parse_or()?);
                        if self.eat_sym(Sym::RBracket) {
                            break;
                        }
                        self.expect_sym(Sym::Comma)?;
                    }
                }
                Ok(array_expr(items))
            }
            Tok::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" | "nil" => Ok(Expr::Literal(Value::Null)),
                ROOT_IDENT => Ok(Expr::Root),
                "and" | "or" | "not" | "in" | "matches" | "contains" | "startsWith"
                | "endsWith" => Err(syntax(token.pos, format!("unexpected keyword '{}'", name))),
                _ if self.peek().tok == Tok::Sym(Sym::LParen) => self.parse_call(name),
                _ => Err(ConditionError::UnknownIdentifier(name)),
            },
            other => Err(syntax(token.pos, format!("unexpected {}", other))),
        }
    }

    fn parse_call(&mut self, name: String) -> Result<Expr, ConditionError> {
        let func = Func::lookup(&name).ok_or(ConditionError::UnknownFunction(name))?;
        self.expect_sym(Sym::LParen)?;
        let mut args = Vec::new();
        if !self.eat_sym(Sym::RParen) {
            loop {
                args.push(self.parse_or()?);
                if self.eat_sym(Sym::RParen) {
                    break;
                }
                self.expect_sym(Sym::Comma)?;
            }
        }
        if args.len() != 1 {
            return Err(ConditionError::Arity {
                function: func.name().to_string(),
                expected: 1,
                found: args.len(),
            });
        }
        let arg = args.remove(0);
        if func == Func::Has && !is_path(&arg) {
            return Err(ConditionError::TypeMismatch(
                "has() expects a field path such as `cage.email`".to_string(),
            ));
        }
        Ok(Expr::Call(func, Box::new(arg)))
    }
}

/// JSON has no infinities or NaN.
fn number(n: f64) -> Result<Value, ConditionError> {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .ok_or(ConditionError::NumericOverflow)
}

/// Array literals made only of literals fold into a single literal value.
fn array_expr(items: Vec<Expr>) -> Expr {
    if items.iter().all(|i| matches!(i, Expr::Literal(_))) {
        let values = items
            .into_iter()
            .filter_map(|i| match i {
                Expr::Literal(v) => Some(v),
                _ => None,
            })
            .collect();
        Expr::Literal(Value::Array(values))
    } else {
        Expr::Array(items)
    }
}

fn is_path(expr: &Expr) -> bool {
    match expr {
        Expr::Root => true,
        Expr::Member(base, _) | Expr::Index(base, _) => is_path(base),
        _ => false,
    }
}

fn path_of(expr: &Expr) -> String {
    match expr {
        Expr::Root => ROOT_IDENT.to_string(),
        Expr::Member(base, key) => {
            let simple = key.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_')
                && key.chars().all(|c| c.is_alphanumeric() || c == '_');
            if simple {
                format!("{}.{}", path_of(base), key)
            } else {
                format!("{}[{:?}]", path_of(base), key)
            }
        }
        Expr::Index(base, index) => match index.as_ref() {
            Expr::Literal(v) => format!("{}[{}]", path_of(base), v),
            _ => format!("{}[...]", path_of(base)),
        },
        Expr::Call(func, arg) => format!("{}({})", func.name(), path_of(arg)),
        _ => "<expression>".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Static checks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Bool,
    Number,
    String,
    Null,
    Array,
}

impl Kind {
    fn name(&self) -> &'static str {
        match self {
            Kind::Bool => "boolean",
            Kind::Number => "number",
            Kind::String => "string",
            Kind::Null => "null",
            Kind::Array => "array",
        }
    }
}

/// Result type when it is known without looking at a payload.
fn static_kind(expr: &Expr) -> Option<Kind> {
    match expr {
        Expr::Literal(v) => match v {
            Value::Bool(_) => Some(Kind::Bool),
            Value::Number(_) => Some(Kind::Number),
            Value::String(_) => Some(Kind::String),
            Value::Null => Some(Kind::Null),
            Value::Array(_) => Some(Kind::Array),
            Value::Object(_) => None,
        },
        Expr::Array(_) => Some(Kind::Array),
        Expr::Root | Expr::Member(..) | Expr::Index(..) => None,
        Expr::Unary(UnaryOp::Not, _) => Some(Kind::Bool),
        Expr::Unary(UnaryOp::Neg, _) => Some(Kind::Number),
        Expr::Matches(..) => Some(Kind::Bool),
        Expr::Binary(op, left, right) => match op {
            BinaryOp::Add => match (static_kind(left), static_kind(right)) {
                (Some(Kind::Number), Some(Kind::Number)) => Some(Kind::Number),
                (Some(Kind::String), _) | (_, Some(Kind::String)) => Some(Kind::String),
                _ => None,
            },
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => Some(Kind::Number),
            _ => Some(Kind::Bool),
        },
        Expr::Call(func, _) => match func {
            Func::Has => Some(Kind::Bool),
            Func::Len => Some(Kind::Number),
            Func::Lower | Func::Upper => Some(Kind::String),
        },
    }
}

fn expect_kind(expr: &Expr, wanted: &[Kind], context: &str) -> Result<(), ConditionError> {
    match static_kind(expr) {
        Some(kind) if !wanted.contains(&kind) => Err(ConditionError::TypeMismatch(format!(
            "{} cannot be applied to a {}",
            context,
            kind.name()
        ))),
        _ => Ok(()),
    }
}

fn check(expr: &Expr) -> Result<(), ConditionError> {
    match expr {
        Expr::Literal(_) | Expr::Root => Ok(()),
        Expr::Array(items) => items.iter().try_for_each(check),
        Expr::Member(base, _) => check(base),
        Expr::Index(base, index) => {
            check(base)?;
            check(index)
        }
        Expr::Unary(op, operand) => {
            check(operand)?;
            match op {
                UnaryOp::Not => expect_kind(operand, &[Kind::Bool], "'!'"),
                UnaryOp::Neg => expect_kind(operand, &[Kind::Number], "unary '-'"),
            }
        }
        Expr::Binary(op, left, right) => {
            check(left)?;
            check(right)?;
            let context = format!("'{}'", op.text());
            match op {
                BinaryOp::And | BinaryOp::Or => {
                    expect_kind(left, &[Kind::Bool], &context)?;
                    expect_kind(right, &[Kind::Bool], &context)
                }
                BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
                    expect_kind(left, &[Kind::Number], &context)?;
                    expect_kind(right, &[Kind::Number], &context)
                }
                BinaryOp::StartsWith | BinaryOp::EndsWith => {
                    expect_kind(left, &[Kind::String], &context)?;
                    expect_kind(right, &[Kind::String], &context)
                }
                _ => Ok(()),
            }
        }
        Expr::Matches(left, pattern) => {
            check(left)?;
            expect_kind(left, &[Kind::String], "'matches'")?;
            if let Pattern::Dynamic(p) = pattern {
                check(p)?;
                expect_kind(p, &[Kind::String], "'matches'")?;
            }
            Ok(())
        }
        Expr::Call(func, arg) => {
            check(arg)?;
            match func {
                Func::Has => Ok(()),
                Func::Len => expect_kind(arg, &[Kind::String, Kind::Array], "len()"),
                Func::Lower | Func::Upper => {
                    expect_kind(arg, &[Kind::String], &format!("{}()", func.name()))
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn mismatch(message: String) -> ConditionError {
    ConditionError::TypeMismatch(message)
}

fn take_key<'a>(base: Cow<'a, Value>, key: &str) -> Option<Cow<'a, Value>> {
    match base {
        Cow::Borrowed(Value::Object(map)) => map.get(key).map(Cow::Borrowed),
        Cow::Owned(Value::Object(mut map)) => map.remove(key).map(Cow::Owned),
        _ => None,
    }
}

fn take_index<'a>(base: Cow<'a, Value>, index: &Value) -> Option<Cow<'a, Value>> {
    match index {
        Value::String(key) => take_key(base, key),
        Value::Number(n) => {
            let i = n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0)? as usize;
            match base {
                Cow::Borrowed(Value::Array(items)) => items.get(i).map(Cow::Borrowed),
                Cow::Owned(Value::Array(mut items)) if i < items.len() => {
                    Some(Cow::Owned(items.swap_remove(i)))
                }
                _ => None,
            }
        }
        _ => None,
    }
}

/// Reads a top-level payload field without materializing the whole payload.
fn root_field<'a>(root: &'a Payload, key: &str) -> Option<Cow<'a, Value>> {
    root.get(key).map(Cow::Borrowed)
}

/// Resolves a path, yielding `None` instead of an error for anything absent.
fn lookup<'a>(expr: &'a Expr, root: &'a Payload) -> Result<Option<Cow<'a, Value>>, ConditionError> {
    match expr {
        Expr::Root => Ok(Some(Cow::Owned(Value::Object(root.clone())))),
        Expr::Member(base, key) if matches!(base.as_ref(), Expr::Root) => Ok(root_field(root, key)),
        Expr::Member(base, key) => Ok(lookup(base, root)?.and_then(|b| take_key(b, key))),
        Expr::Index(base, index) => {
            let Some(b) = lookup(base, root)? else {
                return Ok(None);
            };
            let index = eval(index, root)?;
            Ok(take_index(b, &index))
        }
        other => eval(other, root).map(Some),
    }
}

fn eval<'a>(expr: &'a Expr, root: &'a Payload) -> Result<Cow<'a, Value>, ConditionError> {
    match expr {
        Expr::Literal(v) => Ok(Cow::Borrowed(v)),
        Expr::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(eval(item, root)?.into_owned());
            }
            Ok(Cow::Owned(Value::Array(values)))
        }
        Expr::Root => Ok(Cow::Owned(Value::Object(root.clone()))),
        Expr::Member(base, key) if matches!(base.as_ref(), Expr::Root) => {
            root_field(root, key).ok_or_else(|| ConditionError::MissingField(path_of(expr)))
        }
        Expr::Member(base, key) => {
            let b = eval(base, root)?;
            if !b.is_object() {
                return Err(mismatch(format!(
                    "cannot read field '{}' of `{}`, which is a {}",
                    key,
                    path_of(base),
                    json_kind(&b)
                )));
            }
            take_key(b, key).ok_or_else(|| ConditionError::MissingField(path_of(expr)))
        }
        Expr::Index(base, index) => {
            let b = eval(base, root)?;
            let i = eval(index, root)?;
            match (b.as_ref(), i.as_ref()) {
                (Value::Array(_), Value::Number(_)) | (Value::Object(_), Value::String(_)) => {}
                (b, i) => {
                    return Err(mismatch(format!(
                        "cannot index a {} with a {}",
                        json_kind(b),
                        json_kind(i)
                    )));
                }
            }
            let is_object = b.is_object();
            take_index(b, &i).ok_or_else(|| {
                if is_object {
                    ConditionError::MissingField(path_of(expr))
                } else {
                    ConditionError::IndexOutOfRange {
                        path: path_of(base),
                        index: i.to_string(),
                    }
                }
            })
        }
        Expr::Unary(op, operand) => {
            let v = eval(operand, root)?;
            match (op, v.as_ref()) {
                (UnaryOp::Not, Value::Bool(b)) => Ok(Cow::Owned(Value::Bool(!b))),
                (UnaryOp::Neg, Value::Number(n)) => {
                    Ok(Cow::Owned(number(-n.as_f64().unwrap_or_default())?))
                }
                (UnaryOp::Not, other) => Err(mismatch(format!(
                    "'!' expects a boolean, `{}` is a {}",
                    path_of(operand),
                    json_kind(other)
                ))),
                (UnaryOp::Neg, other) => Err(mismatch(format!(
                    "unary '-' expects a number, `{}` is a {}",
                    path_of(operand),
                    json_kind(other)
                ))),
            }
        }
        Expr::Binary(op @ (BinaryOp::And | BinaryOp::Or), left, right) => {
            let l = eval_bool(left, root, *op)?;
            match (op, l) {
                (BinaryOp::And, false) => Ok(Cow::Owned(Value::Bool(false))),
                (BinaryOp::Or, true) => Ok(Cow::Owned(Value::Bool(true))),
                _ => Ok(Cow::Owned(Value::Bool(eval_bool(right, root, *op)?))),
            }
        }
        Expr::Binary(op, left, right) => {
            let l = eval(left, root)?;
            let r = eval(right, root)?;
            binary(*op, &l, &r).map(Cow::Owned)
        }
        Expr::Matches(left, pattern) => {
            let l = eval(left, root)?;
            let Value::String(text) = l.as_ref() else {
                return Err(mismatch(format!(
                    "'matches' expects a string, `{}` is a {}",
                    path_of(left),
                    json_kind(&l)
                )));
            };
            let matched = match pattern {
                Pattern::Static(re) => re.is_match(text),
                Pattern::Dynamic(p) => {
                    let p = eval(p, root)?;
                    let Value::String(p) = p.as_ref() else {
                        return Err(mismatch(format!(
                            "'matches' pattern must be a string, got a {}",
                            json_kind(&p)
                        )));
                    };
                    Regex::new(p)
                        .map_err(|e| ConditionError::InvalidPattern(e.to_string()))?
                        .is_match(text)
                }
            };
            Ok(Cow::Owned(Value::Bool(matched)))
        }
        Expr::Call(Func::Has, arg) => Ok(Cow::Owned(Value::Bool(lookup(arg, root)?.is_some()))),
        Expr::Call(func, arg) => {
            let v = eval(arg, root)?;
            let result = match (func, v.as_ref()) {
                (Func::Len, Value::String(s)) => number(s.chars().count() as f64)?,
                (Func::Len, Value::Array(a)) => number(a.len() as f64)?,
                (Func::Len, Value::Object(o)) => number(o.len() as f64)?,
                (Func::Lower, Value::String(s)) => Value::String(s.to_lowercase()),
                (Func::Upper, Value::String(s)) => Value::String(s.to_uppercase()),
                (func, other) => {
                    return Err(mismatch(format!(
                        "{}() cannot be applied to `{}`, which is a {}",
                        func.name(),
                        path_of(arg),
                        json_kind(other)
                    )));
                }
            };
            Ok(Cow::Owned(result))
        }
    }
}

fn eval_bool(expr: &Expr, root: &Payload, op: BinaryOp) -> Result<bool, ConditionError> {
    match eval(expr, root)?.as_ref() {
        Value::Bool(b) => Ok(*b),
        other => Err(mismatch(format!(
            "'{}' expects booleans, `{}` is a {}",
            op.text(),
            path_of(expr),
            json_kind(other)
        ))),
    }
}

fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| json_eq(x, y))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| json_eq(v, other)))
        }
        _ => a == b,
    }
}

fn compare(op: BinaryOp, l: &Value, r: &Value) -> Result<Ordering, ConditionError> {
    match (l, r) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
            x.partial_cmp(&y)
                .ok_or_else(|| mismatch(format!("cannot order {} and {}", x, y)))
        }
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => Err(mismatch(format!(
            "'{}' compares two numbers or two strings, got a {} and a {}",
            op.text(),
            json_kind(l),
            json_kind(r)
        ))),
    }
}

fn numbers(op: BinaryOp, l: &Value, r: &Value) -> Result<(f64, f64), ConditionError> {
    match (l.as_f64(), r.as_f64()) {
        (Some(x), Some(y)) if l.is_number() && r.is_number() => Ok((x, y)),
        _ => Err(mismatch(format!(
            "'{}' expects numbers, got a {} and a {}",
            op.text(),
            json_kind(l),
            json_kind(r)
        ))),
    }
}

fn binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, ConditionError> {
    let result = match op {
        BinaryOp::Eq => Value::Bool(json_eq(l, r)),
        BinaryOp::Ne => Value::Bool(!json_eq(l, r)),
        BinaryOp::Lt => Value::Bool(compare(op, l, r)? == Ordering::Less),
        BinaryOp::Le => Value::Bool(compare(op, l, r)? != Ordering::Greater),
        BinaryOp::Gt => Value::Bool(compare(op, l, r)? == Ordering::Greater),
        BinaryOp::Ge => Value::Bool(compare(op, l, r)? != Ordering::Less),
        BinaryOp::In => match (l, r) {
            (_, Value::Array(items)) => Value::Bool(items.iter().any(|i| json_eq(l, i))),
            (Value::String(key), Value::Object(map)) => Value::Bool(map.contains_key(key)),
            (Value::String(needle), Value::String(hay)) => Value::Bool(hay.contains(needle.as_str())),
            _ => {
                return Err(mismatch(format!(
                    "'in' cannot look for a {} in a {}",
                    json_kind(l),
                    json_kind(r)
                )));
            }
        },
        BinaryOp::Contains => match (l, r) {
            (Value::String(hay), Value::String(needle)) => Value::Bool(hay.contains(needle.as_str())),
            (Value::Array(items), _) => Value::Bool(items.iter().any(|i| json_eq(i, r))),
            _ => {
                return Err(mismatch(format!(
                    "'contains' cannot look for a {} in a {}",
                    json_kind(r),
                    json_kind(l)
                )));
            }
        },
        BinaryOp::StartsWith | BinaryOp::EndsWith => match (l, r) {
            (Value::String(s), Value::String(affix)) => Value::Bool(if op == BinaryOp::StartsWith {
                s.starts_with(affix.as_str())
            } else {
                s.ends_with(affix.as_str())
            }),
            _ => {
                return Err(mismatch(format!(
                    "'{}' expects strings, got a {} and a {}",
                    op.text(),
                    json_kind(l),
                    json_kind(r)
                )));
            }
        },
        BinaryOp::Add => match (l, r) {
            (Value::String(x), Value::String(y)) => Value::String(format!("{}{}", x, y)),
            _ => {
                let (x, y) = numbers(op, l, r)?;
                number(x + y)?
            }
        },
        BinaryOp::Sub => {
            let (x, y) = numbers(op, l, r)?;
            number(x - y)?
        }
        BinaryOp::Mul => {
            let (x, y) = numbers(op, l, r)?;
            number(x * y)?
        }
        BinaryOp::Div | BinaryOp::Rem => {
            let (x, y) = numbers(op, l, r)?;
            if y == 0.0 {
                return Err(ConditionError::DivisionByZero);
            }
            number(if op == BinaryOp::Div { x / y } else { x % y })?
        }
        BinaryOp::And | BinaryOp::Or => {
            let (x, y) = match (l, r) {
                (Value::Bool(x), Value::Bool(y)) => (*x, *y),
                _ => {
                    return Err(mismatch(format!(
                        "'{}' expects booleans, got a {} and a {}",
                        op.text(),
                        json_kind(l),
                        json_kind(r)
                    )));
                }
            };
            Value::Bool(if op == BinaryOp::And { x && y } else { x || y })
        }
    };
    Ok(result)
}
