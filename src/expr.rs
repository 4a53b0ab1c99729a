//! A small boolean expression language for response rules.
//!
//! Expressions are evaluated against a JSON object of named variables:
//!
//! ```text
//! body.name == "William" && len(queryParams["tags"]) > 0
//! headers["X-Tier"] in ["gold", "silver"] || routeParams.id matches "^[0-9]+$"
//! ```

use regex::Regex;
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Errors raised while parsing or evaluating an expression.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExprError {
    #[error("parse error at {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("unknown variable `{0}`")]
    UnknownVariable(String),

    #[error("missing key `{0}`")]
    MissingKey(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("invalid regex `{pattern}`: {message}")]
    Regex { pattern: String, message: String },

    #[error("unknown function `{0}`")]
    UnknownFunction(String),
}

type Result<T> = std::result::Result<T, ExprError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
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
    Matches,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Variable(String),
    Array(Vec<Expr>),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// `matches` against a string literal, compiled at parse time
    Matches(Box<Expr>, Pattern),
    Call(String, Vec<Expr>),
}

/// A compiled regular expression, compared by its source.
#[derive(Debug, Clone)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self> {
        compile_regex(pattern).map(Self)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

fn compile_regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| ExprError::Regex {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

/// Deepest nesting of groups, operators and lookups the parser accepts.
pub const MAX_DEPTH: usize = 100;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
    Eof,
}

const PUNCTUATION: &[&str] = &[
    "==", "!=", "<=", ">=", "&&", "||", "<", ">", "!", "+", "-", "*", "/", "%", "(", ")", "[",
    "]", ",", ".",
];

fn tokenize(src: &str) -> Result<Vec<(usize, Token)>> {
    let mut tokens = Vec::new();
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let mut i = 0;

    while i < chars.len() {
        let (pos, ch) = chars[i];

        if ch.is_whitespace() {
            i += 1;
            continue;
        }

        if ch.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
                // A dot not followed by a digit is member access, not a fraction.
                if chars[i].1 == '.' && !chars.get(i + 1).is_some_and(|c| c.1.is_ascii_digit()) {
                    break;
                }
                i += 1;
            }
            let text: String = chars[start..i].iter().map(|c| c.1).collect();
            let value = text.parse::<f64>().map_err(|e| ExprError::Parse {
                position: pos,
                message: e.to_string(),
            })?;
            tokens.push((pos, Token::Number(value)));
            continue;
        }

        if ch == '"' || ch == '\'' {
            let quote = ch;
            let mut value = String::new();
            i += 1;
            loop {
                let Some(&(_, c)) = chars.get(i) else {
                    return Err(ExprError::Parse {
                        position: pos,
                        message: "unterminated string".to_string(),
                    });
                };
                i += 1;
                match c {
                    c if c == quote => break,
                    '\\' => {
                        let Some(&(_, escaped)) = chars.get(i) else {
                            continue;
                        };
                        i += 1;
                        value.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            'r' => '\r',
                            other => other,
                        });
                    }
                    c => value.push(c),
                }
            }
            tokens.push((pos, Token::Str(value)));
            continue;
        }

        if ch.is_alphabetic() || ch == '_' || ch == '$' {
            let start = i;
            while i < chars.len()
                && (chars[i].1.is_alphanumeric() || chars[i].1 == '_' || chars[i].1 == '$')
            {
                i += 1;
            }
            let ident: String = chars[start..i].iter().map(|c| c.1).collect();
            tokens.push((pos, Token::Ident(ident)));
            continue;
        }

        let rest = &src[pos..];
        match PUNCTUATION.iter().find(|p| rest.starts_with(**p)) {
            Some(punct) => {
                tokens.push((pos, Token::Punct(punct)));
                i += punct.chars().count();
            }
            None => {
                return Err(ExprError::Parse {
                    position: pos,
                    message: format!("unexpected character `{}`", ch),
                })
            }
        }
    }

    tokens.push((src.len(), Token::Eof));
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    depth: usize,
}

type Operand = fn(&mut Parser) -> Result<Expr>;
type Operator = fn(&mut Parser) -> Option<BinaryOp>;

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos].1
    }

    fn position(&self) -> usize {
        self.tokens[self.pos].0
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].1.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T> {
        Err(ExprError::Parse {
            position: self.position(),
            message: message.into(),
        })
    }

    /// One level deeper into the tree. Callers reset `depth` once the
    /// subtree is built; on error the parse is abandoned anyway.
    fn descend(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return self.error(format!("expression nested deeper than {}", MAX_DEPTH));
        }
        Ok(())
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Token::Punct(p) if *p == punct) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Token::Ident(k) if k == keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> Result<()> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            self.error(format!("expected `{}`", punct))
        }
    }

    /// Left-associative chain of `operand (operator operand)*`.
    fn chain(&mut self, operand: Operand, operator: Operator) -> Result<Expr> {
        let depth = self.depth;
        let mut left = operand(self)?;
        while let Some(op) = operator(self) {
            self.descend()?;
            let right = operand(self)?;
            left = binary_node(op, left, right)?;
        }
        self.depth = depth;
        Ok(left)
    }

    /// A full expression inside brackets, parentheses or an argument list.
    fn parse_nested(&mut self) -> Result<Expr> {
        let depth = self.depth;
        self.descend()?;
        let expr = self.parse_or()?;
        self.depth = depth;
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr> {
        self.chain(Self::parse_and, |p| {
            (p.eat_punct("||") || p.eat_keyword("or")).then_some(BinaryOp::Or)
        })
    }

    fn parse_and(&mut self) -> Result<Expr> {
        self.chain(Self::parse_comparison, |p| {
            (p.eat_punct("&&") || p.eat_keyword("and")).then_some(BinaryOp::And)
        })
    }

    fn comparison_op(&mut self) -> Option<BinaryOp> {
        let op = match self.peek() {
            Token::Punct("==") => BinaryOp::Eq,
            Token::Punct("!=") => BinaryOp::Ne,
            Token::Punct("<") => BinaryOp::Lt,
            Token::Punct("<=") => BinaryOp::Le,
            Token::Punct(">") => BinaryOp::Gt,
            Token::Punct(">=") => BinaryOp::Ge,
            Token::Ident(k) => match k.as_str() {
                "in" => BinaryOp::In,
                "contains" => BinaryOp::Contains,
                "startsWith" => BinaryOp::StartsWith,
                "endsWith" => BinaryOp::EndsWith,
                "matches" => BinaryOp::Matches,
                _ => return None,
            },
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        self.chain(Self::parse_additive, Self::comparison_op)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        self.chain(Self::parse_multiplicative, |p| {
            if p.eat_punct("+") {
                Some(BinaryOp::Add)
            } else if p.eat_punct("-") {
                Some(BinaryOp::Sub)
            } else {
                None
            }
        })
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        self.chain(Self::parse_unary, |p| {
            if p.eat_punct("*") {
                Some(BinaryOp::Mul)
            } else if p.eat_punct("/") {
                Some(BinaryOp::Div)
            } else if p.eat_punct("%") {
                Some(BinaryOp::Rem)
            } else {
                None
            }
        })
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let op = if self.eat_punct("!") || self.eat_keyword("not") {
            UnaryOp::Not
        } else if self.eat_punct("-") {
            UnaryOp::Neg
        } else {
            return self.parse_postfix();
        };

        let depth = self.depth;
        self.descend()?;
        let operand = self.parse_unary()?;
        self.depth = depth;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let depth = self.depth;
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat_punct(".") {
                self.descend()?;
                match self.advance() {
                    Token::Ident(name) => expr = Expr::Member(Box::new(expr), name),
                    _ => return self.error("expected field name after `.`"),
                }
            } else if self.eat_punct("[") {
                self.descend()?;
                let index = self.parse_nested()?;
                self.expect_punct("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                self.depth = depth;
                return Ok(expr);
            }
        }
    }

    fn parse_list(&mut self, close: &str) -> Result<Vec<Expr>> {
        let mut items = Vec::new();
        if self.eat_punct(close) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_nested()?);
            if self.eat_punct(close) {
                return Ok(items);
            }
            self.expect_punct(",")?;
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Token::Number(n) => Ok(Expr::Literal(number(n)?)),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Punct("(") => {
                let expr = self.parse_nested()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            Token::Punct("[") => Ok(Expr::Array(self.parse_list("]")?)),
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "nil" | "null" => Ok(Expr::Literal(Value::Null)),
                _ if self.eat_punct("(") => Ok(Expr::Call(name, self.parse_list(")")?)),
                _ => Ok(Expr::Variable(name)),
            },
            Token::Eof => self.error("unexpected end of expression"),
            Token::Punct(p) => self.error(format!("unexpected `{}`", p)),
        }
    }
}

fn binary_node(op: BinaryOp, left: Expr, right: Expr) -> Result<Expr> {
    match (op, right) {
        (BinaryOp::Matches, Expr::Literal(Value::String(pattern))) => {
            Ok(Expr::Matches(Box::new(left), Pattern::new(&pattern)?))
        }
        (op, right) => Ok(Expr::Binary(op, Box::new(left), Box::new(right))),
    }
}

/// Parse an expression.
pub fn parse(src: &str) -> Result<Expr> {
    let mut parser = Parser {
        tokens: tokenize(src)?,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_or()?;
    if *parser.peek() != Token::Eof {
        return parser.error("unexpected trailing input");
    }
    Ok(expr)
}

/// Parse and evaluate `src` against `vars`.
pub fn evaluate(src: &str, vars: &Map<String, Value>) -> Result<Value> {
    parse(src)?.eval(vars)
}

impl Expr {
    /// Evaluate against named variables.
    pub fn eval(&self, vars: &Map<String, Value>) -> Result<Value> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Variable(name) => vars
                .get(name)
                .cloned()
                .ok_or_else(|| ExprError::UnknownVariable(name.clone())),
            Expr::Array(items) => Ok(Value::Array(
                items.iter().map(|e| e.eval(vars)).collect::<Result<_>>()?,
            )),
            Expr::Member(target, field) => match target.eval(vars)? {
                Value::Object(mut map) => map
                    .remove(field)
                    .ok_or_else(|| ExprError::MissingKey(field.clone())),
                other => Err(ExprError::Type(format!(
                    "cannot read `{}` of {}",
                    field,
                    type_name(&other)
                ))),
            },
            Expr::Index(target, index) => {
                let target = target.eval(vars)?;
                let index = index.eval(vars)?;
                lookup_index(target, index)
            }
            Expr::Unary(op, operand) => {
                let value = operand.eval(vars)?;
                match (op, value) {
                    (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (UnaryOp::Neg, Value::Number(n)) => number(-as_f64(&n)),
                    (op, other) => Err(ExprError::Type(format!(
                        "cannot apply {:?} to {}",
                        op,
                        type_name(&other)
                    ))),
                }
            }
            Expr::Binary(BinaryOp::And, left, right) => {
                if expect_bool(left.eval(vars)?)? {
                    Ok(Value::Bool(expect_bool(right.eval(vars)?)?))
                } else {
                    Ok(Value::Bool(false))
                }
            }
            Expr::Binary(BinaryOp::Or, left, right) => {
                if expect_bool(left.eval(vars)?)? {
                    Ok(Value::Bool(true))
                } else {
                    Ok(Value::Bool(expect_bool(right.eval(vars)?)?))
                }
            }
            Expr::Binary(op, left, right) => binary(*op, left.eval(vars)?, right.eval(vars)?),
            Expr::Matches(target, pattern) => match target.eval(vars)? {
                Value::String(text) => Ok(Value::Bool(pattern.is_match(&text))),
                other => Err(mismatch(
                    BinaryOp::Matches,
                    &other,
                    &Value::String(pattern.as_str().to_string()),
                )),
            },
            Expr::Call(name, args) => {
                let args = args.iter().map(|e| e.eval(vars)).collect::<Result<Vec<_>>>()?;
                call(name, args)
            }
        }
    }
}

fn lookup_index(target: Value, index: Value) -> Result<Value> {
    match (target, index) {
        (Value::Object(mut map), Value::String(key)) => {
            map.remove(&key).ok_or(ExprError::MissingKey(key))
        }
        (Value::Array(mut items), Value::Number(n)) => {
            let i = as_f64(&n);
            if i < 0.0 || i.fract() != 0.0 || i as usize >= items.len() {
                return Err(ExprError::MissingKey(n.to_string()));
            }
            Ok(items.swap_remove(i as usize))
        }
        (target, index) => Err(ExprError::Type(format!(
            "cannot index {} with {}",
            type_name(&target),
            type_name(&index)
        ))),
    }
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value> {
    let result = match op {
        BinaryOp::Eq => Value::Bool(values_equal(&left, &right)),
        BinaryOp::Ne => Value::Bool(!values_equal(&left, &right)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (&left, &right) {
                (Value::Number(a), Value::Number(b)) => as_f64(a).partial_cmp(&as_f64(b)),
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            }
            .ok_or_else(|| mismatch(op, &left, &right))?;
            Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
        BinaryOp::In => Value::Bool(contains(&right, &left).ok_or_else(|| mismatch(op, &left, &right))?),
        BinaryOp::Contains => {
            Value::Bool(contains(&left, &right).ok_or_else(|| mismatch(op, &left, &right))?)
        }
        BinaryOp::StartsWith | BinaryOp::EndsWith => match (&left, &right) {
            (Value::String(a), Value::String(b)) => Value::Bool(if op == BinaryOp::StartsWith {
                a.starts_with(b.as_str())
            } else {
                a.ends_with(b.as_str())
            }),
            _ => return Err(mismatch(op, &left, &right)),
        },
        BinaryOp::Matches => match (&left, &right) {
            (Value::String(text), Value::String(pattern)) => {
                Value::Bool(compile_regex(pattern)?.is_match(text))
            }
            _ => return Err(mismatch(op, &left, &right)),
        },
        BinaryOp::Add => match (&left, &right) {
            (Value::Number(a), Value::Number(b)) => number(as_f64(a) + as_f64(b))?,
            (Value::String(a), Value::String(b)) => Value::String(format!("{}{}", a, b)),
            _ => return Err(mismatch(op, &left, &right)),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            let (Value::Number(a), Value::Number(b)) = (&left, &right) else {
                return Err(mismatch(op, &left, &right));
            };
            let (a, b) = (as_f64(a), as_f64(b));
            if matches!(op, BinaryOp::Div | BinaryOp::Rem) && b == 0.0 {
                return Err(ExprError::Type("division by zero".to_string()));
            }
            number(match op {
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                _ => a % b,
            })?
        }
        BinaryOp::And | BinaryOp::Or => {
            Value::Bool(expect_bool(left)? && expect_bool(right)?)
        }
    };
    Ok(result)
}

/// Whether `haystack` contains `needle`; `None` when the types don't allow it.
fn contains(haystack: &Value, needle: &Value) -> Option<bool> {
    match (haystack, needle) {
        (Value::Array(items), needle) => Some(items.iter().any(|item| values_equal(item, needle))),
        (Value::Object(map), Value::String(key)) => Some(map.contains_key(key)),
        (Value::String(text), Value::String(part)) => Some(text.contains(part.as_str())),
        _ => None,
    }
}

fn call(name: &str, args: Vec<Value>) -> Result<Value> {
    let arity = |n: usize| {
        if args.len() == n {
            Ok(())
        } else {
            Err(ExprError::Type(format!(
                "{}() takes {} argument(s), got {}",
                name,
                n,
                args.len()
            )))
        }
    };

    match name {
        "len" => {
            arity(1)?;
            let len = match &args[0] {
                Value::String(s) => s.chars().count(),
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                other => return Err(ExprError::Type(format!("len() of {}", type_name(other)))),
            };
            Ok(Value::from(len))
        }
        "lower" | "upper" | "trim" => {
            arity(1)?;
            let Value::String(s) = &args[0] else {
                return Err(ExprError::Type(format!(
                    "{}() of {}",
                    name,
                    type_name(&args[0])
                )));
            };
            Ok(Value::String(match name {
                "lower" => s.to_lowercase(),
                "upper" => s.to_uppercase(),
                _ => s.trim().to_string(),
            }))
        }
        "int" => {
            arity(1)?;
            match &args[0] {
                Value::Number(n) => Ok(Value::from(as_f64(n).trunc() as i64)),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|e| ExprError::Type(format!("int(\"{}\"): {}", s, e))),
                other => Err(ExprError::Type(format!("int() of {}", type_name(other)))),
            }
        }
        "string" => {
            arity(1)?;
            Ok(Value::String(match &args[0] {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }))
        }
        _ => Err(ExprError::UnknownFunction(name.to_string())),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => as_f64(x) == as_f64(y),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        _ => a == b,
    }
}

fn expect_bool(value: Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(ExprError::Type(format!(
            "expected bool, got {}",
            type_name(&other)
        ))),
    }
}

fn as_f64(n: &Number) -> f64 {
    n.as_f64().unwrap_or(f64::NAN)
}

fn number(n: f64) -> Result<Value> {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        return Ok(Value::from(n as i64));
    }
    Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| ExprError::Type(format!("{} is not a finite number", n)))
}

fn mismatch(op: BinaryOp, left: &Value, right: &Value) -> ExprError {
    ExprError::Type(format!(
        "cannot apply {:?} to {} and {}",
        op,
        type_name(left),
        type_name(right)
    ))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "nil",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "map",
    }
}
