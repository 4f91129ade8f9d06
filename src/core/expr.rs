//! JT-002: Expression language: the concrete parser/evaluator behind
//! [`Expression`].
//!
//! Expressions are pure. Supported syntax:
//! - literals: `null`, `true`, `false`, numbers, `"templates ${with} interpolation"`
//! - collections: `[a, b]` (tuple), `{key: value}` or `{key = value}` (object)
//! - traversal: `param.name`, `var.list[0]`, `opt.map["key"]`
//! - operators: `!`, unary `-`, `* / %`, `+ -`, `< <= > >=`, `== !=`, `&&`, `||`, `c ? a : b`
//! - functions: see [`call_function`]
//!
//! In documents, a YAML string is expression source and any other YAML node is
//! a literal value.

use super::context::EvalContext;
use super::value::{Type, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::sync::Arc;

/// Malformed expression source.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub column: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at column {}", self.message, self.column + 1)
    }
}

impl std::error::Error for ParseError {}

/// Evaluation failure (unknown variable, wrong operand kind, bad call).
#[derive(Debug, Clone, PartialEq)]
pub struct EvalError {
    pub message: String,
}

impl EvalError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for EvalError {}

type PResult<T> = Result<T, ParseError>;
type EResult<T> = Result<T, EvalError>;

/// A parsed expression with its source text.
#[derive(Clone)]
pub struct Expression {
    source: String,
    node: Arc<Node>,
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Expression({})", self.source)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Expression {
    /// Parse expression source.
    pub fn parse(source: &str) -> PResult<Self> {
        let node = parse_source(source, 0)?;
        Ok(Self {
            source: source.to_string(),
            node: Arc::new(node),
        })
    }

    /// Wrap a literal value.
    pub fn literal(value: Value) -> Self {
        Self {
            source: value.to_native().to_string(),
            node: Arc::new(Node::Literal(value)),
        }
    }

    /// Build from a YAML node: strings are source, anything else is literal.
    pub fn from_yaml(raw: &serde_yaml_ng::Value) -> PResult<Self> {
        match raw {
            serde_yaml_ng::Value::String(s) => Self::parse(s),
            other => {
                let native = serde_json::to_value(other).map_err(|e| ParseError {
                    column: 0,
                    message: format!("unsupported literal: {}", e),
                })?;
                Ok(Self::literal(Value::from_native(&native)))
            }
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, ctx: &EvalContext) -> EResult<Value> {
        eval(&self.node, ctx)
    }

    /// Interpret this expression as a type constraint.
    pub fn as_type(&self) -> PResult<Type> {
        node_to_type(&self.node).map_err(|message| ParseError { column: 0, message })
    }
}

impl<'de> Deserialize<'de> for Expression {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_yaml_ng::Value::deserialize(deserializer)?;
        Expression::from_yaml(&raw).map_err(serde::de::Error::custom)
    }
}

/// Parse a type-constraint expression such as `list(string)`.
pub fn parse_type(source: &str) -> PResult<Type> {
    Expression::parse(source)?.as_type()
}

// ============================================================================
// AST
// ============================================================================

#[derive(Debug, Clone)]
enum Node {
    Literal(Value),
    Template(Vec<Part>),
    Scope(String),
    Attr(Box<Node>, String),
    Index(Box<Node>, Box<Node>),
    Tuple(Vec<Node>),
    Object(Vec<(String, Node)>),
    Call(String, Vec<Node>),
    Not(Box<Node>),
    Neg(Box<Node>),
    Binary(BinOp, Box<Node>, Box<Node>),
    Cond(Box<Node>, Box<Node>, Box<Node>),
}

#[derive(Debug, Clone)]
enum Part {
    Lit(String),
    Expr(Node),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinOp {
    fn from_punct(p: &str) -> Option<(Self, u8)> {
        Some(match p {
            "||" => (Self::Or, 1),
            "&&" => (Self::And, 2),
            "==" => (Self::Eq, 3),
            "!=" => (Self::Ne, 3),
            "<" => (Self::Lt, 4),
            "<=" => (Self::Le, 4),
            ">" => (Self::Gt, 4),
            ">=" => (Self::Ge, 4),
            "+" => (Self::Add, 5),
            "-" => (Self::Sub, 5),
            "*" => (Self::Mul, 6),
            "/" => (Self::Div, 6),
            "%" => (Self::Mod, 6),
            _ => return None,
        })
    }
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Number(f64),
    Str(Vec<RawPart>),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
enum RawPart {
    Lit(String),
    Interp { source: String, column: usize },
}

const PUNCTS: &[&str] = &[
    "==", "!=", "<=", ">=", "&&", "||", "(", ")", "[", "]", "{", "}", ",", ":", "=", ".", "?",
    "!", "<", ">", "+", "-", "*", "/", "%",
];

fn lex(source: &str, base: usize) -> PResult<Vec<(Tok, usize)>> {
    let chars: Vec<char> = source.chars().collect();
    let mut toks = Vec::new();
    let mut i = 0;
    let err = |i: usize, message: String| ParseError {
        column: base + i,
        message,
    };

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '"' {
            let (parts, next) = lex_string(&chars, i + 1, base)?;
            toks.push((Tok::Str(parts), base + i));
            i = next;
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                // `xs.0.name` style traversal must not swallow the dot
                if chars[i] == '.' && !chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()) {
                    break;
                }
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let n = text
                .parse::<f64>()
                .map_err(|_| err(start, format!("invalid number '{}'", text)))?;
            toks.push((Tok::Number(n), base + start));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            toks.push((Tok::Ident(chars[start..i].iter().collect()), base + start));
        } else {
            let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
            let p = PUNCTS
                .iter()
                .find(|p| rest.starts_with(**p))
                .ok_or_else(|| err(i, format!("unexpected character '{}'", c)))?;
            toks.push((Tok::Punct(*p), base + i));
            i += p.len();
        }
    }
    toks.push((Tok::Eof, base + chars.len()));
    Ok(toks)
}

/// Lex a quoted template starting after the opening quote.
fn lex_string(chars: &[char], mut i: usize, base: usize) -> PResult<(Vec<RawPart>, usize)> {
    let start = i;
    let mut parts = Vec::new();
    let mut lit = String::new();
    while i < chars.len() {
        match chars[i] {
            '"' => {
                if !lit.is_empty() || parts.is_empty() {
                    parts.push(RawPart::Lit(lit));
                }
                return Ok((parts, i + 1));
            }
            '\\' => {
                let esc = chars.get(i + 1).copied().ok_or_else(|| ParseError {
                    column: base + i,
                    message: "unterminated escape".to_string(),
                })?;
                lit.push(match esc {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
                i += 2;
            }
            '$' if chars.get(i + 1) == Some(&'$') && chars.get(i + 2) == Some(&'{') => {
                lit.push_str("${");
                i += 3;
            }
            '$' if chars.get(i + 1) == Some(&'{') => {
                if !lit.is_empty() {
                    parts.push(RawPart::Lit(std::mem::take(&mut lit)));
                }
                let end = find_interp_end(chars, i + 2).ok_or_else(|| ParseError {
                    column: base + i,
                    message: "unclosed interpolation".to_string(),
                })?;
                parts.push(RawPart::Interp {
                    source: chars[i + 2..end].iter().collect(),
                    column: base + i + 2,
                });
                i = end + 1;
            }
            c => {
                lit.push(c);
                i += 1;
            }
        }
    }
    Err(ParseError {
        column: base + start - 1,
        message: "unterminated string".to_string(),
    })
}

/// Find the `}` closing an interpolation, skipping nested braces and strings.
fn find_interp_end(chars: &[char], mut i: usize) -> Option<usize> {
    let mut depth = 0usize;
    while i < chars.len() {
        match chars[i] {
            '{' => depth += 1,
            '}' if depth == 0 => return Some(i),
            '}' => depth -= 1,
            '"' => {
                i += 1;
                while i < chars.len() && chars[i] != '"' {
                    if chars[i] == '\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

// ============================================================================
// Parser
// ============================================================================

fn parse_source(source: &str, base: usize) -> PResult<Node> {
    let toks = lex(source, base)?;
    let mut p = Parser { toks, pos: 0 };
    let node = p.expr()?;
    match p.peek() {
        Tok::Eof => Ok(node),
        other => Err(p.error(format!("unexpected {:?}", other))),
    }
}

struct Parser {
    toks: Vec<(Tok, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        &self.toks[self.pos.min(self.toks.len() - 1)].0
    }

    fn column(&self) -> usize {
        self.toks[self.pos.min(self.toks.len() - 1)].1
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.toks.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn error(&self, message: String) -> ParseError {
        ParseError {
            column: self.column(),
            message,
        }
    }

    fn eat(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Tok::Punct(p) if *p == punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> PResult<()> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", punct)))
        }
    }

    fn expr(&mut self) -> PResult<Node> {
        let cond = self.binary(1)?;
        if self.eat("?") {
            let then = self.expr()?;
            self.expect(":")?;
            let otherwise = self.expr()?;
            return Ok(Node::Cond(Box::new(cond), Box::new(then), Box::new(otherwise)));
        }
        Ok(cond)
    }

    fn binary(&mut self, min_prec: u8) -> PResult<Node> {
        let mut lhs = self.unary()?;
        loop {
            let (op, prec) = match self.peek() {
                Tok::Punct(p) => match BinOp::from_punct(p) {
                    Some(found) => found,
                    None => break,
                },
                _ => break,
            };
            if prec < min_prec {
                break;
            }
            self.advance();
            let rhs = self.binary(prec + 1)?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> PResult<Node> {
        if self.eat("!") {
            return Ok(Node::Not(Box::new(self.unary()?)));
        }
        if self.eat("-") {
            return Ok(Node::Neg(Box::new(self.unary()?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> PResult<Node> {
        let mut node = self.primary()?;
        loop {
            if self.eat(".") {
                node = match self.advance() {
                    Tok::Ident(name) => Node::Attr(Box::new(node), name),
                    Tok::Number(n) => {
                        Node::Index(Box::new(node), Box::new(Node::Literal(Value::Number(n))))
                    }
                    other => return Err(self.error(format!("expected attribute, got {:?}", other))),
                };
            } else if self.eat("[") {
                let index = self.expr()?;
                self.expect("]")?;
                node = Node::Index(Box::new(node), Box::new(index));
            } else {
                return Ok(node);
            }
        }
    }

    fn primary(&mut self) -> PResult<Node> {
        let column = self.column();
        match self.advance() {
            Tok::Number(n) => Ok(Node::Literal(Value::Number(n))),
            Tok::Str(parts) => template_node(parts),
            Tok::Ident(name) => match name.as_str() {
                "true" => Ok(Node::Literal(Value::Bool(true))),
                "false" => Ok(Node::Literal(Value::Bool(false))),
                "null" => Ok(Node::Literal(Value::Null)),
                _ if self.eat("(") => {
                    let args = self.list_items(")")?;
                    Ok(Node::Call(name, args))
                }
                _ => Ok(Node::Scope(name)),
            },
            Tok::Punct("(") => {
                let inner = self.expr()?;
                self.expect(")")?;
                Ok(inner)
            }
            Tok::Punct("[") => Ok(Node::Tuple(self.list_items("]")?)),
            Tok::Punct("{") => self.object(),
            other => Err(ParseError {
                column,
                message: format!("unexpected {:?}", other),
            }),
        }
    }

    fn list_items(&mut self, close: &str) -> PResult<Vec<Node>> {
        let mut items = Vec::new();
        while !self.eat(close) {
            items.push(self.expr()?);
            if !self.eat(",") {
                self.expect(close)?;
                break;
            }
        }
        Ok(items)
    }

    fn object(&mut self) -> PResult<Node> {
        let mut entries = Vec::new();
        while !self.eat("}") {
            let key = match self.advance() {
                Tok::Ident(k) => k,
                Tok::Str(parts) => match parts.as_slice() {
                    [RawPart::Lit(k)] => k.clone(),
                    _ => return Err(self.error("object key must be a plain string".into())),
                },
                other => return Err(self.error(format!("expected object key, got {:?}", other))),
            };
            if !self.eat(":") {
                self.expect("=")?;
            }
            entries.push((key, self.expr()?));
            self.eat(",");
        }
        Ok(Node::Object(entries))
    }
}

fn template_node(parts: Vec<RawPart>) -> PResult<Node> {
    let mut out = Vec::with_capacity(parts.len());
    for part in parts {
        out.push(match part {
            RawPart::Lit(s) => Part::Lit(s),
            RawPart::Interp { source, column } => Part::Expr(parse_source(&source, column)?),
        });
    }
    match out.as_slice() {
        [Part::Lit(s)] => Ok(Node::Literal(Value::string(s.clone()))),
        _ => Ok(Node::Template(out)),
    }
}

fn node_to_type(node: &Node) -> Result<Type, String> {
    match node {
        Node::Scope(name) => match name.as_str() {
            "any" => Ok(Type::Any),
            "string" => Ok(Type::String),
            "number" => Ok(Type::Number),
            "bool" => Ok(Type::Bool),
            other => Err(format!("unknown type '{}'", other)),
        },
        Node::Call(name, args) => match (name.as_str(), args.as_slice()) {
            ("list" | "set", [elem]) => Ok(Type::list(node_to_type(elem)?)),
            ("map", [elem]) => Ok(Type::map(node_to_type(elem)?)),
            ("tuple", [Node::Tuple(items)]) => Ok(Type::Tuple(
                items.iter().map(node_to_type).collect::<Result<_, _>>()?,
            )),
            ("object", [Node::Object(fields)]) => Ok(Type::Object(
                fields
                    .iter()
                    .map(|(k, n)| node_to_type(n).map(|t| (k.clone(), t)))
                    .collect::<Result<_, _>>()?,
            )),
            _ => Err(format!("invalid type constructor '{}'", name)),
        },
        _ => Err("not a type constraint".to_string()),
    }
}

// ============================================================================
// Evaluation
// ============================================================================

fn eval(node: &Node, ctx: &EvalContext) -> EResult<Value> {
    match node {
        Node::Literal(v) => Ok(v.clone()),
        Node::Template(parts) => {
            if let [Part::Expr(only)] = parts.as_slice() {
                return eval(only, ctx);
            }
            let mut out = String::new();
            for part in parts {
                match part {
                    Part::Lit(s) => out.push_str(s),
                    Part::Expr(n) => out.push_str(&eval(n, ctx)?.to_display_string()),
                }
            }
            Ok(Value::String(out))
        }
        Node::Scope(name) => ctx
            .scope(name)
            .cloned()
            .ok_or_else(|| EvalError::new(format!("unknown variable '{}'", name))),
        Node::Attr(base, name) => {
            let base = eval(base, ctx)?;
            match base.as_entries() {
                Some(entries) => entries
                    .get(name)
                    .cloned()
                    .ok_or_else(|| EvalError::new(format!("unsupported attribute '{}'", name))),
                None => Err(EvalError::new(format!(
                    "cannot access '{}' on {}",
                    name,
                    base.type_of()
                ))),
            }
        }
        Node::Index(base, index) => {
            let base = eval(base, ctx)?;
            let index = eval(index, ctx)?;
            index_value(&base, &index)
        }
        Node::Tuple(items) => Ok(Value::Tuple(
            items.iter().map(|n| eval(n, ctx)).collect::<EResult<_>>()?,
        )),
        Node::Object(entries) => {
            let mut fields = IndexMap::new();
            for (k, n) in entries {
                fields.insert(k.clone(), eval(n, ctx)?);
            }
            Ok(Value::Object(fields))
        }
        Node::Call(name, args) => {
            let args = args.iter().map(|n| eval(n, ctx)).collect::<EResult<Vec<_>>>()?;
            call_function(name, &args)
        }
        Node::Not(inner) => Ok(Value::Bool(!expect_bool(&eval(inner, ctx)?, "!")?)),
        Node::Neg(inner) => Ok(Value::Number(-expect_number(&eval(inner, ctx)?, "-")?)),
        Node::Cond(c, a, b) => {
            if expect_bool(&eval(c, ctx)?, "?")? {
                eval(a, ctx)
            } else {
                eval(b, ctx)
            }
        }
        Node::Binary(op, lhs, rhs) => eval_binary(*op, lhs, rhs, ctx),
    }
}

fn eval_binary(op: BinOp, lhs: &Node, rhs: &Node, ctx: &EvalContext) -> EResult<Value> {
    match op {
        BinOp::And => {
            if !expect_bool(&eval(lhs, ctx)?, "&&")? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(expect_bool(&eval(rhs, ctx)?, "&&")?))
        }
        BinOp::Or => {
            if expect_bool(&eval(lhs, ctx)?, "||")? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(expect_bool(&eval(rhs, ctx)?, "||")?))
        }
        _ => {
            let a = eval(lhs, ctx)?;
            let b = eval(rhs, ctx)?;
            match op {
                BinOp::Eq => Ok(Value::Bool(a.to_native() == b.to_native())),
                BinOp::Ne => Ok(Value::Bool(a.to_native() != b.to_native())),
                BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => compare(op, &a, &b),
                _ => arithmetic(op, &a, &b),
            }
        }
    }
}

fn compare(op: BinOp, a: &Value, b: &Value) -> EResult<Value> {
    let ord = match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.partial_cmp(y),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
    .ok_or_else(|| {
        EvalError::new(format!(
            "cannot compare {} with {}",
            a.type_of(),
            b.type_of()
        ))
    })?;
    Ok(Value::Bool(match op {
        BinOp::Lt => ord.is_lt(),
        BinOp::Le => ord.is_le(),
        BinOp::Gt => ord.is_gt(),
        _ => ord.is_ge(),
    }))
}

fn arithmetic(op: BinOp, a: &Value, b: &Value) -> EResult<Value> {
    let x = expect_number(a, "arithmetic")?;
    let y = expect_number(b, "arithmetic")?;
    let n = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div | BinOp::Mod if y == 0.0 => return Err(EvalError::new("division by zero")),
        BinOp::Div => x / y,
        _ => x % y,
    };
    Ok(Value::Number(n))
}

fn index_value(base: &Value, index: &Value) -> EResult<Value> {
    match (base, index) {
        (Value::List(_, items) | Value::Tuple(items), Value::Number(n)) => {
            let i = *n as usize;
            if n.fract() != 0.0 || *n < 0.0 || i >= items.len() {
                return Err(EvalError::new(format!(
                    "index {} out of range for {} items",
                    n,
                    items.len()
                )));
            }
            Ok(items[i].clone())
        }
        (Value::Map(_, e) | Value::Object(e), Value::String(k)) => e
            .get(k)
            .cloned()
            .ok_or_else(|| EvalError::new(format!("key '{}' not found", k))),
        _ => Err(EvalError::new(format!(
            "cannot index {} with {}",
            base.type_of(),
            index.type_of()
        ))),
    }
}

fn expect_bool(v: &Value, op: &str) -> EResult<bool> {
    v.as_bool()
        .ok_or_else(|| EvalError::new(format!("'{}' wants bool, got {}", op, v.type_of())))
}

fn expect_number(v: &Value, op: &str) -> EResult<f64> {
    v.as_f64()
        .ok_or_else(|| EvalError::new(format!("'{}' wants number, got {}", op, v.type_of())))
}

fn expect_str<'a>(v: &'a Value, func: &str) -> EResult<&'a str> {
    v.as_str()
        .ok_or_else(|| EvalError::new(format!("{}() wants string, got {}", func, v.type_of())))
}

fn expect_items<'a>(v: &'a Value, func: &str) -> EResult<&'a [Value]> {
    v.as_items()
        .ok_or_else(|| EvalError::new(format!("{}() wants a list, got {}", func, v.type_of())))
}

fn expect_entries<'a>(v: &'a Value, func: &str) -> EResult<&'a IndexMap<String, Value>> {
    v.as_entries()
        .ok_or_else(|| EvalError::new(format!("{}() wants a map, got {}", func, v.type_of())))
}

/// Built-in pure functions.
///
/// `length`, `upper`, `lower`, `trim`, `join`, `split`, `concat`, `contains`,
/// `keys`, `values`, `merge`, `coalesce`, `tostring`, `tonumber`, `range`.
pub fn call_function(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    let arity = |n: usize| {
        if args.len() == n {
            Ok(())
        } else {
            Err(EvalError::new(format!(
                "{}() takes {} argument(s), got {}",
                name,
                n,
                args.len()
            )))
        }
    };
    match name {
        "length" => {
            arity(1)?;
            args[0]
                .len()
                .map(|n| Value::Number(n as f64))
                .ok_or_else(|| EvalError::new(format!("length() of {}", args[0].type_of())))
        }
        "upper" => {
            arity(1)?;
            Ok(Value::string(expect_str(&args[0], name)?.to_uppercase()))
        }
        "lower" => {
            arity(1)?;
            Ok(Value::string(expect_str(&args[0], name)?.to_lowercase()))
        }
        "trim" => {
            arity(1)?;
            Ok(Value::string(expect_str(&args[0], name)?.trim()))
        }
        "join" => {
            arity(2)?;
            let sep = expect_str(&args[0], name)?;
            let parts: Vec<String> = expect_items(&args[1], name)?
                .iter()
                .map(Value::to_display_string)
                .collect();
            Ok(Value::string(parts.join(sep)))
        }
        "split" => {
            arity(2)?;
            let sep = expect_str(&args[0], name)?;
            let s = expect_str(&args[1], name)?;
            Ok(Value::List(
                Type::String,
                s.split(sep).map(Value::string).collect(),
            ))
        }
        "concat" => {
            let mut out = Vec::new();
            for a in args {
                out.extend(expect_items(a, name)?.iter().cloned());
            }
            Ok(Value::Tuple(out))
        }
        "contains" => {
            arity(2)?;
            let needle = args[1].to_native();
            Ok(Value::Bool(
                expect_items(&args[0], name)?
                    .iter()
                    .any(|v| v.to_native() == needle),
            ))
        }
        "keys" => {
            arity(1)?;
            Ok(Value::List(
                Type::String,
                expect_entries(&args[0], name)?
                    .keys()
                    .map(|k| Value::string(k.clone()))
                    .collect(),
            ))
        }
        "values" => {
            arity(1)?;
            Ok(Value::Tuple(
                expect_entries(&args[0], name)?.values().cloned().collect(),
            ))
        }
        "merge" => {
            let mut out = IndexMap::new();
            for a in args {
                for (k, v) in expect_entries(a, name)? {
                    out.insert(k.clone(), v.clone());
                }
            }
            Ok(Value::Object(out))
        }
        "coalesce" => Ok(args
            .iter()
            .find(|v| !v.is_null() && v.as_str() != Some(""))
            .cloned()
            .unwrap_or(Value::Null)),
        "tostring" => {
            arity(1)?;
            Ok(Value::string(args[0].to_display_string()))
        }
        "tonumber" => {
            arity(1)?;
            match &args[0] {
                Value::Number(n) => Ok(Value::Number(*n)),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Number)
                    .map_err(|_| EvalError::new(format!("tonumber(): '{}' is not a number", s))),
                other => Err(EvalError::new(format!("tonumber() of {}", other.type_of()))),
            }
        }
        "range" => {
            let (start, end) = match args {
                [end] => (0.0, expect_number(end, name)?),
                [start, end] => (expect_number(start, name)?, expect_number(end, name)?),
                _ => return Err(EvalError::new("range() takes 1 or 2 arguments")),
            };
            let mut out = Vec::new();
            let mut n = start;
            while n < end {
                out.push(Value::Number(n));
                n += 1.0;
            }
            Ok(Value::List(Type::Number, out))
        }
        _ => Err(EvalError::new(format!("unknown function '{}'", name))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> EvalContext {
        EvalContext::new()
            .with_scope(
                "param",
                Value::object([
                    ("name", Value::string("world")),
                    ("count", Value::Number(3.0)),
                    (
                        "tags",
                        Value::List(Type::String, vec![Value::string("a"), Value::string("b")]),
                    ),
                ]),
            )
            .with_scope("opt", Value::object([("release", Value::Bool(true))]))
    }

    fn eval_str(src: &str) -> Value {
        Expression::parse(src).unwrap().evaluate(&ctx()).unwrap()
    }

    #[test]
    fn test_jt002_literals() {
        assert_eq!(eval_str("42"), Value::Number(42.0));
        assert_eq!(eval_str("true"), Value::Bool(true));
        assert_eq!(eval_str("null"), Value::Null);
        assert_eq!(eval_str(r#""x""#), Value::string("x"));
    }

    #[test]
    fn test_jt002_template_interpolation() {
        assert_eq!(eval_str(r#""hello ${param.name}!""#), Value::string("hello world!"));
        assert_eq!(eval_str(r#""n=${param.count + 1}""#), Value::string("n=4"));
        assert_eq!(eval_str(r#""$${literal}""#), Value::string("${literal}"));
    }

    #[test]
    fn test_jt002_sole_interpolation_keeps_type() {
        assert_eq!(eval_str(r#""${param.count}""#), Value::Number(3.0));
    }

    #[test]
    fn test_jt002_nested_string_in_interpolation() {
        assert_eq!(
            eval_str(r#""${opt.release ? "rel}" : "dbg"}""#),
            Value::string("rel}")
        );
    }

    #[test]
    fn test_jt002_traversal_and_index() {
        assert_eq!(eval_str("param.tags[1]"), Value::string("b"));
        assert_eq!(eval_str("param.tags.0"), Value::string("a"));
        assert_eq!(eval_str(r#"param["name"]"#), Value::string("world"));
    }

    #[test]
    fn test_jt002_operators_precedence() {
        assert_eq!(eval_str("1 + 2 * 3"), Value::Number(7.0));
        assert_eq!(eval_str("(1 + 2) * 3"), Value::Number(9.0));
        assert_eq!(eval_str("param.count > 2 && !false"), Value::Bool(true));
        assert_eq!(eval_str(r#"param.name == "world" || x"#), Value::Bool(true));
        assert_eq!(eval_str("-param.count"), Value::Number(-3.0));
    }

    #[test]
    fn test_jt002_equality_ignores_list_vs_tuple() {
        assert_eq!(eval_str(r#"param.tags == ["a", "b"]"#), Value::Bool(true));
    }

    #[test]
    fn test_jt002_collections() {
        let v = eval_str(r#"{a: 1, b = [true, "x"]}"#);
        assert_eq!(v.get("a"), Some(&Value::Number(1.0)));
        assert_eq!(v.get("b").and_then(Value::len), Some(2));
    }

    #[test]
    fn test_jt002_functions() {
        assert_eq!(eval_str(r#"join(",", param.tags)"#), Value::string("a,b"));
        assert_eq!(eval_str("length(param.tags)"), Value::Number(2.0));
        assert_eq!(eval_str(r#"upper(param.name)"#), Value::string("WORLD"));
        assert_eq!(eval_str(r#"contains(param.tags, "b")"#), Value::Bool(true));
        assert_eq!(eval_str(r#"coalesce(null, "", "z")"#), Value::string("z"));
        assert_eq!(eval_str("length(range(2, 5))"), Value::Number(3.0));
        assert_eq!(eval_str(r#"tonumber("12")"#), Value::Number(12.0));
    }

    #[test]
    fn test_jt002_unknown_variable() {
        let err = Expression::parse("nope.x").unwrap().evaluate(&ctx()).unwrap_err();
        assert!(err.message.contains("unknown variable 'nope'"));
    }

    #[test]
    fn test_jt002_condition_requires_bool() {
        let err = Expression::parse("param.name && true")
            .unwrap()
            .evaluate(&ctx())
            .unwrap_err();
        assert!(err.message.contains("wants bool"));
    }

    #[test]
    fn test_jt002_parse_errors() {
        assert!(Expression::parse("1 +").is_err());
        assert!(Expression::parse(r#""unterminated"#).is_err());
        assert!(Expression::parse(r#""${open""#).is_err());
        let err = Expression::parse("a $ b").unwrap_err();
        assert_eq!(err.column, 2);
    }

    #[test]
    fn test_jt002_type_constraints() {
        assert_eq!(parse_type("string").unwrap(), Type::String);
        assert_eq!(parse_type("list(number)").unwrap(), Type::list(Type::Number));
        assert_eq!(parse_type("set(string)").unwrap(), Type::list(Type::String));
        assert_eq!(
            parse_type("map(list(bool))").unwrap(),
            Type::map(Type::list(Type::Bool))
        );
        let obj = parse_type("object({name: string, n = number})").unwrap();
        assert_eq!(obj.to_string(), "object({name: string, n: number})");
        assert_eq!(
            parse_type("tuple([string, number])").unwrap(),
            Type::Tuple(vec![Type::String, Type::Number])
        );
        assert!(parse_type("strng").is_err());
        assert!(parse_type("list(1)").is_err());
    }

    #[test]
    fn test_jt002_from_yaml_literal() {
        let yaml: serde_yaml_ng::Value = serde_yaml_ng::from_str("[1, 2]").unwrap();
        let e = Expression::from_yaml(&yaml).unwrap();
        assert_eq!(e.evaluate(&EvalContext::new()).unwrap().len(), Some(2));
        let s: serde_yaml_ng::Value = serde_yaml_ng::from_str(r#"'"x"'"#).unwrap();
        assert_eq!(
            Expression::from_yaml(&s).unwrap().evaluate(&EvalContext::new()).unwrap(),
            Value::string("x")
        );
    }
}
