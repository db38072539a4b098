//! Restricted boolean expression grammar for forbid rules.
//!
//! Expressions compile at ruleset load time into a tagged-variant AST and
//! are evaluated by one exhaustive match. The grammar admits comparisons,
//! boolean combinators, field access rooted at `intention` / `proposer` /
//! `referenced_event`, and the builtins `len` and `contains` — nothing
//! else. Evaluation is deterministic, side-effect-free, and never fails on
//! a well-formed expression: ill-typed operations simply evaluate falsy.

use std::fmt;

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRoot {
    Intention,
    Proposer,
    ReferencedEvent,
}

impl FieldRoot {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "intention" => Some(Self::Intention),
            "proposer" => Some(Self::Proposer),
            "referenced_event" => Some(Self::ReferencedEvent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Bool(bool),
    Number(f64),
    Str(String),
    Field {
        root: FieldRoot,
        path: Vec<String>,
    },
    Compare {
        op: CmpOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Len(Box<Expr>),
    Contains {
        haystack: Box<Expr>,
        needle: Box<Expr>,
    },
}

#[derive(Debug)]
pub struct ExprError {
    pub message: String,
}

impl ExprError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ExprError {}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Dot,
    Comma,
    LParen,
    RParen,
    Op(CmpOp),
}

fn tokenize(source: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let chars = source.chars().collect::<Vec<_>>();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Eq));
                    i += 2;
                } else {
                    return Err(ExprError::new("single '=' is not an operator; use '=='"));
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Ne));
                    i += 2;
                } else {
                    return Err(ExprError::new("unexpected '!'; use 'not'"));
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Le));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CmpOp::Lt));
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CmpOp::Gt));
                    i += 1;
                }
            }
            '"' | '\'' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            value.push(ch);
                            i += 1;
                        }
                        None => return Err(ExprError::new("unterminated string literal")),
                    }
                }
                tokens.push(Token::Str(value));
            }
            '0'..='9' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let raw = chars[start..i].iter().collect::<String>();
                let number = raw
                    .parse::<f64>()
                    .map_err(|_| ExprError::new(format!("invalid number literal '{raw}'")))?;
                tokens.push(Token::Number(number));
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(ExprError::new(format!("unexpected character '{other}'"))),
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser (precedence: or < and < not < comparison < primary)
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token, context: &str) -> Result<(), ExprError> {
        match self.advance() {
            Some(ref token) if token == expected => Ok(()),
            other => Err(ExprError::new(format!(
                "expected {expected:?} {context}, found {other:?}"
            ))),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Ident(word)) if word == "or") {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_not()?;
        while matches!(self.peek(), Some(Token::Ident(word)) if word == "and") {
            self.advance();
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ExprError> {
        if matches!(self.peek(), Some(Token::Ident(word)) if word == "not") {
            self.advance();
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExprError> {
        let left = self.parse_primary()?;
        if let Some(Token::Op(op)) = self.peek().cloned() {
            self.advance();
            let right = self.parse_primary()?;
            return Ok(Expr::Compare {
                op,
                lhs: Box::new(left),
                rhs: Box::new(right),
            });
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        match self.advance() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(&Token::RParen, "to close group")?;
                Ok(inner)
            }
            Some(Token::Number(value)) => Ok(Expr::Number(value)),
            Some(Token::Str(value)) => Ok(Expr::Str(value)),
            Some(Token::Ident(word)) => match word.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                // Bare `public` reads naturally in scope comparisons.
                "public" => Ok(Expr::Str("public".to_string())),
                "len" => {
                    self.expect(&Token::LParen, "after len")?;
                    let inner = self.parse_or()?;
                    self.expect(&Token::RParen, "to close len")?;
                    Ok(Expr::Len(Box::new(inner)))
                }
                "contains" => {
                    self.expect(&Token::LParen, "after contains")?;
                    let haystack = self.parse_or()?;
                    self.expect(&Token::Comma, "between contains arguments")?;
                    let needle = self.parse_or()?;
                    self.expect(&Token::RParen, "to close contains")?;
                    Ok(Expr::Contains {
                        haystack: Box::new(haystack),
                        needle: Box::new(needle),
                    })
                }
                other => self.parse_field(other),
            },
            other => Err(ExprError::new(format!("unexpected token {other:?}"))),
        }
    }

    fn parse_field(&mut self, root_name: &str) -> Result<Expr, ExprError> {
        let root = FieldRoot::parse(root_name).ok_or_else(|| {
            ExprError::new(format!(
                "unknown identifier '{root_name}'; field access must start with \
                 intention, proposer, or referenced_event"
            ))
        })?;
        let mut path = Vec::new();
        while self.peek() == Some(&Token::Dot) {
            self.advance();
            match self.advance() {
                Some(Token::Ident(segment)) => path.push(segment),
                other => {
                    return Err(ExprError::new(format!(
                        "expected field name after '.', found {other:?}"
                    )))
                }
            }
        }
        if path.is_empty() {
            return Err(ExprError::new(format!(
                "bare '{root_name}' is not a value; access a field like {root_name}.kind"
            )));
        }
        Ok(Expr::Field { root, path })
    }
}

/// Compile one forbid expression. All grammar violations surface here, at
/// ruleset load time — evaluation never raises.
pub fn parse_expr(source: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(ExprError::new("empty expression"));
    }
    let mut parser = Parser {
        tokens,
        position: 0,
    };
    let expr = parser.parse_or()?;
    if parser.position != parser.tokens.len() {
        return Err(ExprError::new(format!(
            "trailing tokens after expression: {:?}",
            &parser.tokens[parser.position..]
        )));
    }
    Ok(expr)
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// The three declared value roots an expression may read.
pub struct EvalContext<'a> {
    pub intention: &'a Value,
    pub proposer: &'a Value,
    pub referenced_event: &'a Value,
}

fn lookup<'a>(root: &'a Value, path: &[String]) -> &'a Value {
    let mut current = root;
    for segment in path {
        match current {
            Value::Object(map) => match map.get(segment) {
                Some(next) => current = next,
                None => return &Value::Null,
            },
            _ => return &Value::Null,
        }
    }
    current
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => left == right,
    }
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> bool {
    match op {
        CmpOp::Eq => loose_eq(left, right),
        CmpOp::Ne => !loose_eq(left, right),
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            match (left.as_f64(), right.as_f64()) {
                (Some(a), Some(b)) => match op {
                    CmpOp::Lt => a < b,
                    CmpOp::Le => a <= b,
                    CmpOp::Gt => a > b,
                    CmpOp::Ge => a >= b,
                    CmpOp::Eq | CmpOp::Ne => unreachable!(),
                },
                // Ordering on non-numbers is not a match, not an error.
                _ => false,
            }
        }
    }
}

fn eval_value(expr: &Expr, ctx: &EvalContext<'_>) -> Value {
    match expr {
        Expr::Bool(b) => Value::Bool(*b),
        Expr::Number(n) => serde_json::Number::from_f64(*n)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Expr::Str(s) => Value::String(s.clone()),
        Expr::Field { root, path } => {
            let base = match root {
                FieldRoot::Intention => ctx.intention,
                FieldRoot::Proposer => ctx.proposer,
                FieldRoot::ReferencedEvent => ctx.referenced_event,
            };
            lookup(base, path).clone()
        }
        Expr::Compare { op, lhs, rhs } => {
            let left = eval_value(lhs, ctx);
            let right = eval_value(rhs, ctx);
            Value::Bool(compare(*op, &left, &right))
        }
        Expr::And(lhs, rhs) => {
            Value::Bool(truthy(&eval_value(lhs, ctx)) && truthy(&eval_value(rhs, ctx)))
        }
        Expr::Or(lhs, rhs) => {
            Value::Bool(truthy(&eval_value(lhs, ctx)) || truthy(&eval_value(rhs, ctx)))
        }
        Expr::Not(inner) => Value::Bool(!truthy(&eval_value(inner, ctx))),
        Expr::Len(inner) => {
            let length = match eval_value(inner, ctx) {
                Value::Array(items) => Some(items.len()),
                Value::String(s) => Some(s.chars().count()),
                Value::Object(map) => Some(map.len()),
                _ => None,
            };
            length
                .map(|n| Value::Number(serde_json::Number::from(n as u64)))
                .unwrap_or(Value::Null)
        }
        Expr::Contains { haystack, needle } => {
            let hay = eval_value(haystack, ctx);
            let needle = eval_value(needle, ctx);
            let hit = match (&hay, &needle) {
                (Value::Array(items), value) => items.iter().any(|item| loose_eq(item, value)),
                (Value::String(text), Value::String(sub)) => text.contains(sub.as_str()),
                _ => false,
            };
            Value::Bool(hit)
        }
    }
}

/// Evaluate a compiled expression to its boolean outcome.
pub fn eval(expr: &Expr, ctx: &EvalContext<'_>) -> bool {
    truthy(&eval_value(expr, ctx))
}
