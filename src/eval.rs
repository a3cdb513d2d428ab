//! Inline function evaluation against the lexical environment.
//!
//! `function` states carry a small JSON-valued expression language instead of
//! embedding a general-purpose scripting engine. A program is a `;`-separated
//! list of expressions; it reads the current invocation value through the
//! reserved `params` binding and the surrounding `let` declarations through
//! plain identifiers. Assignments update the environment, and a program whose
//! source ends with `;` produces no value, which tells the conductor to keep
//! the current `params` unchanged.
//!
//! The language is deliberately closed: no function values, no loops, no
//! calls. Control flow belongs to the composition, not to its leaf code.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde_json::{Map, Number, Value};

use crate::error::EvalError;
use crate::fsm::{Exec, Frame, EXEC_KIND_EXPR};

/// Merged view of the lexical bindings visible to a function state.
///
/// Built by walking the stack from the deepest `let` frame to the shallowest,
/// so shallow frames override deeper ones on name collision. Mutations are
/// written back to the topmost frame that declared each name; names no live
/// frame declares are dropped.
#[derive(Debug, Default)]
pub struct Environment {
    values: BTreeMap<String, Value>,
}

impl Environment {
    /// Assemble the environment from a runtime stack (front = newest frame).
    pub fn from_stack(stack: &VecDeque<Frame>) -> Self {
        let mut values = BTreeMap::new();
        for frame in stack.iter().rev() {
            if let Frame::Let { r#let } = frame {
                for (name, value) in r#let {
                    values.insert(name.clone(), value.clone());
                }
            }
        }
        Self { values }
    }

    /// Read a binding.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Create or update a binding.
    pub fn set(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    /// Write mutations back into the stack. Each name lands in the topmost
    /// `let` frame that declares it; deeper declarations of the same name are
    /// left untouched.
    pub fn write_back(&self, stack: &mut VecDeque<Frame>) {
        let mut written: BTreeSet<String> = BTreeSet::new();
        for frame in stack.iter_mut() {
            if let Frame::Let { r#let } = frame {
                let names: Vec<String> = r#let.keys().cloned().collect();
                for name in names {
                    if written.insert(name.clone()) {
                        if let Some(value) = self.values.get(&name) {
                            r#let.insert(name, value.clone());
                        }
                    }
                }
            }
        }
    }
}

/// Evaluate an exec record. Returns `Ok(None)` when the program produces no
/// value (trailing `;`), in which case the caller keeps its current `params`.
///
/// Environment mutations performed before a failure persist, mirroring the
/// by-identity write-back contract.
pub fn evaluate(
    exec: &Exec,
    params: &Value,
    env: &mut Environment,
) -> Result<Option<Value>, EvalError> {
    if exec.kind != EXEC_KIND_EXPR {
        return Err(EvalError::UnsupportedKind(exec.kind.clone()));
    }
    let program = parse(&exec.code)?;
    let mut last = None;
    for expr in &program.stmts {
        last = Some(eval_expr(expr, params, env)?);
    }
    if program.trailing_semi {
        Ok(None)
    } else {
        Ok(last)
    }
}

/// Parse-check source text without evaluating it. The builder calls this so
/// malformed function code is rejected at construction time rather than at
/// run time.
pub fn check(code: &str) -> Result<(), EvalError> {
    parse(code).map(|_| ())
}

#[derive(Debug)]
struct Program {
    stmts: Vec<Expr>,
    trailing_semi: bool,
}

#[derive(Debug)]
enum Expr {
    Literal(Value),
    Ident(String),
    Assign(String, Box<Expr>),
    Field(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Object(Vec<(String, Expr)>),
    Array(Vec<Expr>),
    Block(Vec<Expr>),
}

#[derive(Debug, Clone, Copy)]
enum UnaryOp {
    Not,
    Neg,
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
    Rem,
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Semi,
    Dot,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    Assign,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

fn parse_error(offset: usize, message: impl Into<String>) -> EvalError {
    EvalError::Parse {
        offset,
        message: message.into(),
    }
}

fn lex(source: &str) -> Result<Vec<(Tok, usize)>, EvalError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let start = i;
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '(' => {
                tokens.push((Tok::LParen, start));
                i += 1;
            }
            ')' => {
                tokens.push((Tok::RParen, start));
                i += 1;
            }
            '{' => {
                tokens.push((Tok::LBrace, start));
                i += 1;
            }
            '}' => {
                tokens.push((Tok::RBrace, start));
                i += 1;
            }
            '[' => {
                tokens.push((Tok::LBracket, start));
                i += 1;
            }
            ']' => {
                tokens.push((Tok::RBracket, start));
                i += 1;
            }
            ',' => {
                tokens.push((Tok::Comma, start));
                i += 1;
            }
            ':' => {
                tokens.push((Tok::Colon, start));
                i += 1;
            }
            ';' => {
                tokens.push((Tok::Semi, start));
                i += 1;
            }
            '.' => {
                tokens.push((Tok::Dot, start));
                i += 1;
            }
            '+' => {
                tokens.push((Tok::Plus, start));
                i += 1;
            }
            '-' => {
                tokens.push((Tok::Minus, start));
                i += 1;
            }
            '*' => {
                tokens.push((Tok::Star, start));
                i += 1;
            }
            '/' => {
                tokens.push((Tok::Slash, start));
                i += 1;
            }
            '%' => {
                tokens.push((Tok::Percent, start));
                i += 1;
            }
            '!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push((Tok::Ne, start));
                    i += 2;
                } else {
                    tokens.push((Tok::Bang, start));
                    i += 1;
                }
            }
            '=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push((Tok::Eq, start));
                    i += 2;
                } else {
                    tokens.push((Tok::Assign, start));
                    i += 1;
                }
            }
            '<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push((Tok::Le, start));
                    i += 2;
                } else {
                    tokens.push((Tok::Lt, start));
                    i += 1;
                }
            }
            '>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push((Tok::Ge, start));
                    i += 2;
                } else {
                    tokens.push((Tok::Gt, start));
                    i += 1;
                }
            }
            '&' => {
                if bytes.get(i + 1) == Some(&b'&') {
                    tokens.push((Tok::And, start));
                    i += 2;
                } else {
                    return Err(parse_error(start, "expected '&&'"));
                }
            }
            '|' => {
                if bytes.get(i + 1) == Some(&b'|') {
                    tokens.push((Tok::Or, start));
                    i += 2;
                } else {
                    return Err(parse_error(start, "expected '||'"));
                }
            }
            '"' | '\'' => {
                let quote = c as u8;
                let mut buf: Vec<u8> = Vec::new();
                i += 1;
                loop {
                    match bytes.get(i) {
                        None => return Err(parse_error(start, "unterminated string")),
                        Some(&b) if b == quote => {
                            i += 1;
                            break;
                        }
                        Some(&b'\\') => {
                            let escaped = *bytes
                                .get(i + 1)
                                .ok_or_else(|| parse_error(i, "unterminated escape"))?;
                            match escaped {
                                b'n' => buf.push(b'\n'),
                                b't' => buf.push(b'\t'),
                                b'\\' => buf.push(b'\\'),
                                b'"' => buf.push(b'"'),
                                b'\'' => buf.push(b'\''),
                                other => {
                                    return Err(parse_error(
                                        i,
                                        format!("unknown escape '\\{}'", other as char),
                                    ))
                                }
                            }
                            i += 2;
                        }
                        Some(&b) => {
                            buf.push(b);
                            i += 1;
                        }
                    }
                }
                // Quote and escape delimiters are ASCII, so the collected
                // bytes fall on character boundaries of the source.
                let text = String::from_utf8(buf)
                    .map_err(|_| parse_error(start, "invalid string contents"))?;
                tokens.push((Tok::Str(text), start));
            }
            '0'..='9' => {
                let mut end = i;
                let mut is_float = false;
                while end < bytes.len() {
                    match bytes[end] {
                        b'0'..=b'9' => end += 1,
                        b'.' if !is_float
                            && matches!(bytes.get(end + 1), Some(&(b'0'..=b'9'))) =>
                        {
                            is_float = true;
                            end += 1;
                        }
                        _ => break,
                    }
                }
                let text = &source[i..end];
                if is_float {
                    let value: f64 = text
                        .parse()
                        .map_err(|_| parse_error(start, "invalid number"))?;
                    tokens.push((Tok::Float(value), start));
                } else {
                    let value: i64 = text
                        .parse()
                        .map_err(|_| parse_error(start, "integer out of range"))?;
                    tokens.push((Tok::Int(value), start));
                }
                i = end;
            }
            'a'..='z' | 'A'..='Z' | '_' | '$' => {
                let mut end = i;
                while end < bytes.len()
                    && matches!(bytes[end], b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_' | b'$')
                {
                    end += 1;
                }
                tokens.push((Tok::Ident(source[i..end].to_string()), start));
                i = end;
            }
            other => return Err(parse_error(start, format!("unexpected character '{other}'"))),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Tok, usize)>,
    pos: usize,
    len: usize,
}

fn parse(source: &str) -> Result<Program, EvalError> {
    let tokens = lex(source)?;
    if tokens.is_empty() {
        return Err(parse_error(0, "empty program"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        len: source.len(),
    };
    let (stmts, trailing_semi) = parser.stmt_list()?;
    if let Some((tok, offset)) = parser.peek_with_offset() {
        return Err(parse_error(offset, format!("unexpected token {tok:?}")));
    }
    if stmts.is_empty() {
        return Err(parse_error(0, "empty program"));
    }
    Ok(Program {
        stmts,
        trailing_semi,
    })
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|(tok, _)| tok)
    }

    fn peek_with_offset(&self) -> Option<(&Tok, usize)> {
        self.tokens.get(self.pos).map(|(tok, off)| (tok, *off))
    }

    fn peek_ahead(&self, n: usize) -> Option<&Tok> {
        self.tokens.get(self.pos + n).map(|(tok, _)| tok)
    }

    fn advance(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).map(|(tok, _)| tok.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(_, off)| *off)
            .unwrap_or(self.len)
    }

    fn expect(&mut self, expected: &Tok, what: &str) -> Result<(), EvalError> {
        let offset = self.offset();
        match self.advance() {
            Some(tok) if tok == *expected => Ok(()),
            Some(tok) => Err(parse_error(offset, format!("expected {what}, found {tok:?}"))),
            None => Err(parse_error(offset, format!("expected {what}, found end of input"))),
        }
    }

    /// `expr (';' expr)* (';')?`, returning the statements and whether the
    /// list ended with a semicolon.
    fn stmt_list(&mut self) -> Result<(Vec<Expr>, bool), EvalError> {
        let mut stmts = Vec::new();
        let mut trailing = false;
        loop {
            match self.peek() {
                None | Some(Tok::RParen) => break,
                _ => {}
            }
            stmts.push(self.expr()?);
            if matches!(self.peek(), Some(Tok::Semi)) {
                self.advance();
                trailing = true;
            } else {
                trailing = false;
                break;
            }
        }
        Ok((stmts, trailing))
    }

    fn expr(&mut self) -> Result<Expr, EvalError> {
        // Assignment requires a bare identifier target followed by a single '='.
        if let (Some(Tok::Ident(_)), Some(Tok::Assign)) = (self.peek(), self.peek_ahead(1)) {
            let offset = self.offset();
            let name = match self.advance() {
                Some(Tok::Ident(name)) => name,
                _ => unreachable!("peeked identifier"),
            };
            if matches!(name.as_str(), "true" | "false" | "null") {
                return Err(parse_error(offset, format!("cannot assign to '{name}'")));
            }
            self.advance(); // '='
            let value = self.expr()?;
            return Ok(Expr::Assign(name, Box::new(value)));
        }
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.and_expr()?;
        while matches!(self.peek(), Some(Tok::Or)) {
            self.advance();
            let right = self.and_expr()?;
            left = Expr::Binary(BinOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.equality()?;
        while matches!(self.peek(), Some(Tok::And)) {
            self.advance();
            let right = self.equality()?;
            left = Expr::Binary(BinOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.relational()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Eq) => BinOp::Eq,
                Some(Tok::Ne) => BinOp::Ne,
                _ => break,
            };
            self.advance();
            let right = self.relational()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn relational(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Lt) => BinOp::Lt,
                Some(Tok::Le) => BinOp::Le,
                Some(Tok::Gt) => BinOp::Gt,
                Some(Tok::Ge) => BinOp::Ge,
                _ => break,
            };
            self.advance();
            let right = self.additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn additive(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Plus) => BinOp::Add,
                Some(Tok::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Star) => BinOp::Mul,
                Some(Tok::Slash) => BinOp::Div,
                Some(Tok::Percent) => BinOp::Rem,
                _ => break,
            };
            self.advance();
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, EvalError> {
        match self.peek() {
            Some(Tok::Bang) => {
                self.advance();
                Ok(Expr::Unary(UnaryOp::Not, Box::new(self.unary()?)))
            }
            Some(Tok::Minus) => {
                self.advance();
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?)))
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Some(Tok::Dot) => {
                    self.advance();
                    let offset = self.offset();
                    match self.advance() {
                        Some(Tok::Ident(name)) => {
                            expr = Expr::Field(Box::new(expr), name);
                        }
                        other => {
                            return Err(parse_error(
                                offset,
                                format!("expected field name, found {other:?}"),
                            ))
                        }
                    }
                }
                Some(Tok::LBracket) => {
                    self.advance();
                    let index = self.expr()?;
                    self.expect(&Tok::RBracket, "']'")?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        let offset = self.offset();
        match self.advance() {
            Some(Tok::Int(value)) => Ok(Expr::Literal(Value::from(value))),
            Some(Tok::Float(value)) => Ok(Expr::Literal(Value::from(value))),
            Some(Tok::Str(text)) => Ok(Expr::Literal(Value::String(text))),
            Some(Tok::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                _ => Ok(Expr::Ident(name)),
            },
            Some(Tok::LParen) => {
                let (stmts, _) = self.stmt_list()?;
                self.expect(&Tok::RParen, "')'")?;
                if stmts.is_empty() {
                    return Err(parse_error(offset, "empty parenthesized expression"));
                }
                Ok(Expr::Block(stmts))
            }
            Some(Tok::LBrace) => {
                let mut fields = Vec::new();
                if !matches!(self.peek(), Some(Tok::RBrace)) {
                    loop {
                        let key_offset = self.offset();
                        let key = match self.advance() {
                            Some(Tok::Ident(name)) => name,
                            Some(Tok::Str(text)) => text,
                            other => {
                                return Err(parse_error(
                                    key_offset,
                                    format!("expected object key, found {other:?}"),
                                ))
                            }
                        };
                        self.expect(&Tok::Colon, "':'")?;
                        fields.push((key, self.expr()?));
                        if matches!(self.peek(), Some(Tok::Comma)) {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(&Tok::RBrace, "'}'")?;
                Ok(Expr::Object(fields))
            }
            Some(Tok::LBracket) => {
                let mut items = Vec::new();
                if !matches!(self.peek(), Some(Tok::RBracket)) {
                    loop {
                        items.push(self.expr()?);
                        if matches!(self.peek(), Some(Tok::Comma)) {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(&Tok::RBracket, "']'")?;
                Ok(Expr::Array(items))
            }
            other => Err(parse_error(offset, format!("unexpected token {other:?}"))),
        }
    }
}

fn eval_expr(expr: &Expr, params: &Value, env: &mut Environment) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Ident(name) => {
            if let Some(value) = env.get(name) {
                return Ok(value.clone());
            }
            if name == "params" {
                return Ok(params.clone());
            }
            Err(EvalError::Unbound(name.clone()))
        }
        Expr::Assign(name, value) => {
            let value = eval_expr(value, params, env)?;
            env.set(name, value.clone());
            Ok(value)
        }
        Expr::Field(object, name) => {
            let object = eval_expr(object, params, env)?;
            match object {
                Value::Object(map) => Ok(map.get(name).cloned().unwrap_or(Value::Null)),
                other => Err(EvalError::Type(format!(
                    "cannot read field '{name}' of {}",
                    kind_of(&other)
                ))),
            }
        }
        Expr::Index(object, index) => {
            let object = eval_expr(object, params, env)?;
            let index = eval_expr(index, params, env)?;
            match (&object, &index) {
                (Value::Array(items), Value::Number(n)) => {
                    let i = n
                        .as_u64()
                        .ok_or_else(|| EvalError::Type("array index must be a non-negative integer".into()))?;
                    Ok(items.get(i as usize).cloned().unwrap_or(Value::Null))
                }
                (Value::Object(map), Value::String(key)) => {
                    Ok(map.get(key).cloned().unwrap_or(Value::Null))
                }
                _ => Err(EvalError::Type(format!(
                    "cannot index {} with {}",
                    kind_of(&object),
                    kind_of(&index)
                ))),
            }
        }
        Expr::Unary(op, operand) => {
            let operand = eval_expr(operand, params, env)?;
            match op {
                UnaryOp::Not => match operand {
                    Value::Bool(flag) => Ok(Value::Bool(!flag)),
                    other => Err(EvalError::Type(format!("cannot negate {}", kind_of(&other)))),
                },
                UnaryOp::Neg => match &operand {
                    Value::Number(n) if n.is_i64() => n
                        .as_i64()
                        .and_then(i64::checked_neg)
                        .map(Value::from)
                        .ok_or_else(|| EvalError::Type("integer overflow".into())),
                    Value::Number(n) => number(-n.as_f64().unwrap_or_default()),
                    other => Err(EvalError::Type(format!("cannot negate {}", kind_of(other)))),
                },
            }
        }
        Expr::Binary(op, left, right) => eval_binary(*op, left, right, params, env),
        Expr::Object(fields) => {
            let mut map = Map::new();
            for (key, value) in fields {
                map.insert(key.clone(), eval_expr(value, params, env)?);
            }
            Ok(Value::Object(map))
        }
        Expr::Array(items) => {
            let mut values = Vec::new();
            for item in items {
                values.push(eval_expr(item, params, env)?);
            }
            Ok(Value::Array(values))
        }
        Expr::Block(stmts) => {
            let mut last = Value::Null;
            for stmt in stmts {
                last = eval_expr(stmt, params, env)?;
            }
            Ok(last)
        }
    }
}

fn eval_binary(
    op: BinOp,
    left: &Expr,
    right: &Expr,
    params: &Value,
    env: &mut Environment,
) -> Result<Value, EvalError> {
    if op == BinOp::And || op == BinOp::Or {
        let left = expect_bool(eval_expr(left, params, env)?)?;
        // Short-circuit before touching the right operand.
        if op == BinOp::And && !left {
            return Ok(Value::Bool(false));
        }
        if op == BinOp::Or && left {
            return Ok(Value::Bool(true));
        }
        let right = expect_bool(eval_expr(right, params, env)?)?;
        return Ok(Value::Bool(right));
    }

    let left = eval_expr(left, params, env)?;
    let right = eval_expr(right, params, env)?;
    match op {
        BinOp::Eq => Ok(Value::Bool(values_equal(&left, &right))),
        BinOp::Ne => Ok(Value::Bool(!values_equal(&left, &right))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => compare(op, &left, &right),
        BinOp::Add => match (&left, &right) {
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
            _ => arithmetic(op, &left, &right),
        },
        BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => arithmetic(op, &left, &right),
        BinOp::And | BinOp::Or => unreachable!("handled above"),
    }
}

fn expect_bool(value: Value) -> Result<bool, EvalError> {
    match value {
        Value::Bool(flag) => Ok(flag),
        other => Err(EvalError::Type(format!(
            "logical operator requires booleans, found {}",
            kind_of(&other)
        ))),
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            a.as_f64().unwrap_or(f64::NAN) == b.as_f64().unwrap_or(f64::NAN)
        }
        _ => left == right,
    }
}

fn compare(op: BinOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .unwrap_or(f64::NAN)
            .partial_cmp(&b.as_f64().unwrap_or(f64::NAN)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };
    let ordering = ordering.ok_or_else(|| {
        EvalError::Type(format!(
            "cannot compare {} with {}",
            kind_of(left),
            kind_of(right)
        ))
    })?;
    let result = match op {
        BinOp::Lt => ordering.is_lt(),
        BinOp::Le => ordering.is_le(),
        BinOp::Gt => ordering.is_gt(),
        BinOp::Ge => ordering.is_ge(),
        _ => unreachable!("comparison operator"),
    };
    Ok(Value::Bool(result))
}

fn arithmetic(op: BinOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    let (a, b) = match (left, right) {
        (Value::Number(a), Value::Number(b)) => (a, b),
        _ => {
            return Err(EvalError::Type(format!(
                "arithmetic requires numbers, found {} and {}",
                kind_of(left),
                kind_of(right)
            )))
        }
    };
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        let result = match op {
            BinOp::Add => a.checked_add(b),
            BinOp::Sub => a.checked_sub(b),
            BinOp::Mul => a.checked_mul(b),
            BinOp::Div => {
                if b == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                a.checked_div(b)
            }
            BinOp::Rem => {
                if b == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                a.checked_rem(b)
            }
            _ => unreachable!("arithmetic operator"),
        };
        return result
            .map(Value::from)
            .ok_or_else(|| EvalError::Type("integer overflow".into()));
    }
    let a = a.as_f64().unwrap_or_default();
    let b = b.as_f64().unwrap_or_default();
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            a / b
        }
        BinOp::Rem => {
            if b == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            a % b
        }
        _ => unreachable!("arithmetic operator"),
    };
    number(result)
}

fn number(value: f64) -> Result<Value, EvalError> {
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| EvalError::Type("arithmetic produced a non-finite number".into()))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
