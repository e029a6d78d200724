//! Restricted interpreter for the transform and filter columns.
//!
//! An expression is a formula over a single variable `x` (the row's raw
//! hours). Supported syntax, lowest precedence first:
//!
//! - `cond ? a : b`
//! - `||`, `&&`
//! - `==`, `!=` (`===` and `!==` are accepted as aliases)
//! - `<`, `<=`, `>`, `>=`
//! - `+`, `-`, then `*`, `/`, `%`
//! - unary `-`, `+`, `!`
//! - `**` or `^` (right associative)
//! - numbers, `true`, `false`, `x`, parentheses and the helpers
//!   `r(v, digits = 1)`, `c(v)` and `f(v)`
//!
//! A leading `return` and a trailing `;` are ignored so formulas written
//! as function bodies keep working.

use std::fmt;
use thiserror::Error;
use tracing::debug;

use crate::domain::Transformed;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("empty expression")]
    Empty,
    #[error("unexpected character '{ch}' at offset {pos}")]
    UnexpectedChar { ch: char, pos: usize },
    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected {0}")]
    UnexpectedToken(String),
    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),
    #[error("{name}() takes {expected}, got {got}")]
    Arity {
        name: &'static str,
        expected: &'static str,
        got: usize,
    },
    #[error("expected a number, found a boolean")]
    ExpectedNumber,
    #[error("expected a boolean, found a number")]
    ExpectedBoolean,
    #[error("result is not a finite number")]
    NonFinite,
    #[error("expression nested deeper than {0} levels")]
    TooDeep(usize),
    #[error("expression longer than {0} tokens")]
    TooLong(usize),
}

/// Deepest nesting of parentheses, calls, conditionals and prefix
/// operators the parser accepts.
pub const MAX_NESTING: usize = 128;

/// Bounds the depth of left-leaning operator chains such as `x+x+...+x`.
pub const MAX_TOKENS: usize = 2048;

/// Rounds half up to `digits` decimals, matching the `r()` helper.
pub fn round_to(value: f64, digits: f64) -> f64 {
    let factor = 10f64.powf(digits);
    (value * factor + 0.5).floor() / factor
}

/// Compiles a numeric transform; compile errors are kept, not returned.
pub fn compile_transform(source: &str) -> Transform {
    Transform::compile(source)
}

/// Compiles a row filter; an empty source accepts every row.
pub fn compile_filter(source: &str) -> Filter {
    Filter::compile(source)
}

#[derive(Debug, Clone)]
pub struct Transform {
    source: String,
    compiled: Result<Expr, ExprError>,
}

impl Transform {
    pub fn compile(source: &str) -> Self {
        let compiled = parse(source);
        if let Err(e) = &compiled {
            debug!(source = %source, error = %e, "Transform expression does not compile");
        }
        Self {
            source: source.to_string(),
            compiled,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn error(&self) -> Option<&ExprError> {
        self.compiled.as_ref().err()
    }

    pub fn try_eval(&self, x: f64) -> Result<f64, ExprError> {
        let expr = self.compiled.as_ref().map_err(Clone::clone)?;
        let value = eval(expr, x)?.as_number()?;
        if !value.is_finite() {
            return Err(ExprError::NonFinite);
        }
        Ok(round_to(value, 2.0))
    }

    /// Evaluates against `x`, mapping every failure to [`Transformed::Error`].
    pub fn eval(&self, x: f64) -> Transformed {
        match self.try_eval(x) {
            Ok(v) => Transformed::Value(v),
            Err(_) => Transformed::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOutcome {
    Pass,
    Reject,
    Error,
}

impl FilterOutcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, FilterOutcome::Pass)
    }
}

#[derive(Debug, Clone)]
pub struct Filter {
    source: String,
    // None when the source is blank
    compiled: Option<Result<Expr, ExprError>>,
}

impl Filter {
    pub fn compile(source: &str) -> Self {
        let compiled = if source.trim().is_empty() {
            None
        } else {
            let parsed = parse(source);
            if let Err(e) = &parsed {
                debug!(source = %source, error = %e, "Filter expression does not compile");
            }
            Some(parsed)
        };
        Self {
            source: source.to_string(),
            compiled,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn accepts_all(&self) -> bool {
        self.compiled.is_none()
    }

    pub fn error(&self) -> Option<&ExprError> {
        self.compiled.as_ref().and_then(|c| c.as_ref().err())
    }

    pub fn try_eval(&self, x: f64) -> Result<bool, ExprError> {
        match &self.compiled {
            None => Ok(true),
            Some(compiled) => {
                let expr = compiled.as_ref().map_err(Clone::clone)?;
                eval(expr, x)?.as_bool()
            }
        }
    }

    pub fn eval(&self, x: f64) -> FilterOutcome {
        match self.try_eval(x) {
            Ok(true) => FilterOutcome::Pass,
            Ok(false) => FilterOutcome::Reject,
            Err(_) => FilterOutcome::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Helper {
    Round,
    Ceil,
    Floor,
}

impl Helper {
    fn from_ident(ident: &str) -> Option<Self> {
        match ident {
            "r" => Some(Helper::Round),
            "c" => Some(Helper::Ceil),
            "f" => Some(Helper::Floor),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Helper::Round => "r",
            Helper::Ceil => "c",
            Helper::Floor => "f",
        }
    }

    fn check_arity(&self, got: usize) -> Result<(), ExprError> {
        let (ok, expected) = match self {
            Helper::Round => ((1..=2).contains(&got), "1 or 2 arguments"),
            Helper::Ceil | Helper::Floor => (got == 1, "1 argument"),
        };
        if ok {
            Ok(())
        } else {
            Err(ExprError::Arity {
                name: self.name(),
                expected,
                got,
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnaryOp {
    Neg,
    Plus,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Bool(bool),
    Var,
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(Helper, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Value {
    Number(f64),
    Bool(bool),
}

impl Value {
    fn as_number(self) -> Result<f64, ExprError> {
        match self {
            Value::Number(n) => Ok(n),
            Value::Bool(_) => Err(ExprError::ExpectedNumber),
        }
    }

    fn as_bool(self) -> Result<bool, ExprError> {
        match self {
            Value::Bool(b) => Ok(b),
            Value::Number(_) => Err(ExprError::ExpectedBoolean),
        }
    }
}

fn eval(expr: &Expr, x: f64) -> Result<Value, ExprError> {
    match expr {
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Var => Ok(Value::Number(x)),
        Expr::Unary(op, inner) => {
            let value = eval(inner, x)?;
            match op {
                UnaryOp::Neg => Ok(Value::Number(-value.as_number()?)),
                UnaryOp::Plus => Ok(Value::Number(value.as_number()?)),
                UnaryOp::Not => Ok(Value::Bool(!value.as_bool()?)),
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            let lhs = eval(lhs, x)?;
            let rhs = eval(rhs, x)?;
            match op {
                BinaryOp::Eq => Ok(Value::Bool(lhs == rhs)),
                BinaryOp::Ne => Ok(Value::Bool(lhs != rhs)),
                _ => {
                    let (a, b) = (lhs.as_number()?, rhs.as_number()?);
                    Ok(match op {
                        BinaryOp::Add => Value::Number(a + b),
                        BinaryOp::Sub => Value::Number(a - b),
                        BinaryOp::Mul => Value::Number(a * b),
                        BinaryOp::Div => Value::Number(a / b),
                        BinaryOp::Rem => Value::Number(a % b),
                        BinaryOp::Pow => Value::Number(a.powf(b)),
                        BinaryOp::Lt => Value::Bool(a < b),
                        BinaryOp::Le => Value::Bool(a <= b),
                        BinaryOp::Gt => Value::Bool(a > b),
                        BinaryOp::Ge => Value::Bool(a >= b),
                        BinaryOp::Eq | BinaryOp::Ne => unreachable!("handled above"),
                    })
                }
            }
        }
        Expr::Logical(op, lhs, rhs) => {
            let lhs = eval(lhs, x)?.as_bool()?;
            match (op, lhs) {
                (LogicalOp::And, false) => Ok(Value::Bool(false)),
                (LogicalOp::Or, true) => Ok(Value::Bool(true)),
                _ => Ok(Value::Bool(eval(rhs, x)?.as_bool()?)),
            }
        }
        Expr::Conditional(cond, then, otherwise) => {
            if eval(cond, x)?.as_bool()? {
                eval(then, x)
            } else {
                eval(otherwise, x)
            }
        }
        Expr::Call(helper, args) => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval(arg, x)?.as_number()?);
            }
            let v = values[0];
            Ok(Value::Number(match helper {
                Helper::Round => round_to(v, values.get(1).copied().unwrap_or(1.0)),
                Helper::Ceil => v.ceil(),
                Helper::Floor => v.floor(),
            }))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    LParen,
    RParen,
    Comma,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Pow,
    Not,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Question,
    Colon,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "number {}", n),
            Token::Ident(name) => write!(f, "identifier '{}'", name),
            other => {
                let symbol = match other {
                    Token::LParen => "(",
                    Token::RParen => ")",
                    Token::Comma => ",",
                    Token::Plus => "+",
                    Token::Minus => "-",
                    Token::Star => "*",
                    Token::Slash => "/",
                    Token::Percent => "%",
                    Token::Pow => "**",
                    Token::Not => "!",
                    Token::And => "&&",
                    Token::Or => "||",
                    Token::Eq => "==",
                    Token::Ne => "!=",
                    Token::Lt => "<",
                    Token::Le => "<=",
                    Token::Gt => ">",
                    Token::Ge => ">=",
                    Token::Question => "?",
                    Token::Colon => ":",
                    Token::Number(_) | Token::Ident(_) => unreachable!("handled above"),
                };
                write!(f, "'{}'", symbol)
            }
        }
    }
}

struct Lexer<'a> {
    input: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, c)| *c)
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).map(|(_, c)| *c)
    }

    fn offset(&self) -> usize {
        self.chars
            .get(self.pos)
            .map(|(i, _)| *i)
            .unwrap_or(self.input.len())
    }

    /// Consumes `expected` if it is next, returning whether it was.
    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ExprError> {
        let mut tokens = Vec::new();
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.pos += 1;
                continue;
            }
            if ch.is_ascii_digit() || (ch == '.' && self.peek_at(1).is_some_and(|c| c.is_ascii_digit())) {
                tokens.push(self.number()?);
                continue;
            }
            if ch.is_ascii_alphabetic() || ch == '_' {
                let start = self.offset();
                while self
                    .peek()
                    .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
                {
                    self.pos += 1;
                }
                tokens.push(Token::Ident(self.input[start..self.offset()].to_string()));
                continue;
            }

            let pos = self.offset();
            self.pos += 1;
            let token = match ch {
                '(' => Token::LParen,
                ')' => Token::RParen,
                ',' => Token::Comma,
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' if self.eat('*') => Token::Pow,
                '*' => Token::Star,
                '/' => Token::Slash,
                '%' => Token::Percent,
                '^' => Token::Pow,
                '?' => Token::Question,
                ':' => Token::Colon,
                '&' if self.eat('&') => Token::And,
                '|' if self.eat('|') => Token::Or,
                '=' if self.eat('=') => {
                    self.eat('=');
                    Token::Eq
                }
                '!' if self.eat('=') => {
                    self.eat('=');
                    Token::Ne
                }
                '!' => Token::Not,
                '<' if self.eat('=') => Token::Le,
                '<' => Token::Lt,
                '>' if self.eat('=') => Token::Ge,
                '>' => Token::Gt,
                other => return Err(ExprError::UnexpectedChar { ch: other, pos }),
            };
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn number(&mut self) -> Result<Token, ExprError> {
        let start = self.offset();
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '.') {
            self.pos += 1;
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let signed = matches!(self.peek_at(1), Some('+') | Some('-'));
            let digit_at = if signed { 2 } else { 1 };
            if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                self.pos += digit_at;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }
        let text = &self.input[start..self.offset()];
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| ExprError::InvalidNumber(text.to_string()))
    }
}

fn parse(source: &str) -> Result<Expr, ExprError> {
    let mut body = source.trim();
    if let Some(rest) = body.strip_prefix("return") {
        if rest.starts_with(char::is_whitespace) {
            body = rest.trim_start();
        }
    }
    let body = body.trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    if body.is_empty() {
        return Err(ExprError::Empty);
    }

    let tokens = Lexer::new(body).tokenize()?;
    if tokens.len() > MAX_TOKENS {
        return Err(ExprError::TooLong(MAX_TOKENS));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_conditional()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(ExprError::UnexpectedToken(token.to_string())),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T, ExprError>) -> Result<T, ExprError> {
        if self.depth >= MAX_NESTING {
            return Err(ExprError::TooDeep(MAX_NESTING));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn match_token(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExprError> {
        match self.peek() {
            Some(token) if *token == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(token) => Err(ExprError::UnexpectedToken(token.to_string())),
            None => Err(ExprError::UnexpectedEnd),
        }
    }

    fn parse_conditional(&mut self) -> Result<Expr, ExprError> {
        self.nested(Self::parse_conditional_inner)
    }

    fn parse_conditional_inner(&mut self) -> Result<Expr, ExprError> {
        let cond = self.parse_or()?;
        if self.match_token(&Token::Question) {
            let then = self.parse_conditional()?;
            self.expect(Token::Colon)?;
            let otherwise = self.parse_conditional()?;
            return Ok(Expr::Conditional(
                Box::new(cond),
                Box::new(then),
                Box::new(otherwise),
            ));
        }
        Ok(cond)
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.parse_and()?;
        while self.match_token(&Token::Or) {
            let rhs = self.parse_and()?;
            expr = Expr::Logical(LogicalOp::Or, Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.parse_equality()?;
        while self.match_token(&Token::And) {
            let rhs = self.parse_equality()?;
            expr = Expr::Logical(LogicalOp::And, Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_equality(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.parse_comparison()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinaryOp::Eq,
                Some(Token::Ne) => BinaryOp::Ne,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_comparison()?;
            expr = Expr::Binary(op, Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_additive()?;
            expr = Expr::Binary(op, Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_additive(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_term()?;
            expr = Expr::Binary(op, Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_term(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            expr = Expr::Binary(op, Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        let op = match self.peek() {
            Some(Token::Minus) => UnaryOp::Neg,
            Some(Token::Plus) => UnaryOp::Plus,
            Some(Token::Not) => UnaryOp::Not,
            _ => return self.parse_power(),
        };
        self.pos += 1;
        let inner = self.nested(Self::parse_unary)?;
        Ok(Expr::Unary(op, Box::new(inner)))
    }

    fn parse_power(&mut self) -> Result<Expr, ExprError> {
        let base = self.parse_primary()?;
        if self.match_token(&Token::Pow) {
            let exponent = self.nested(Self::parse_unary)?;
            return Ok(Expr::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        let token = self.peek().cloned().ok_or(ExprError::UnexpectedEnd)?;
        self.pos += 1;
        match token {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::LParen => {
                let inner = self.parse_conditional()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(name) => match name.as_str() {
                "x" => Ok(Expr::Var),
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                _ => {
                    let helper = Helper::from_ident(&name)
                        .ok_or_else(|| ExprError::UnknownIdentifier(name.clone()))?;
                    self.expect(Token::LParen)?;
                    let args = self.parse_arguments()?;
                    helper.check_arity(args.len())?;
                    Ok(Expr::Call(helper, args))
                }
            },
            other => Err(ExprError::UnexpectedToken(other.to_string())),
        }
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, ExprError> {
        let mut args = Vec::new();
        if self.match_token(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_conditional()?);
            if self.match_token(&Token::Comma) {
                continue;
            }
            self.expect(Token::RParen)?;
            return Ok(args);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0.0)]
    #[case(1.5)]
    #[case(7.25)]
    #[case(-3.0)]
    #[case(123.456)]
    fn test_increment_matches_rounded_arithmetic(#[case] x: f64) {
        let transform = compile_transform("x+1");
        assert_eq!(transform.eval(x), Transformed::Value(round_to(x + 1.0, 2.0)));
    }

    #[rstest]
    #[case("x*2", 3.0, 6.0)]
    #[case("x / 3", 1.0, 0.33)]
    #[case("2 + 3 * x", 2.0, 8.0)]
    #[case("(2 + 3) * x", 2.0, 10.0)]
    #[case("x - 1 - 1", 5.0, 3.0)]
    #[case("x % 4", 10.0, 2.0)]
    #[case("2 ** 3 ** 2", 0.0, 512.0)]
    #[case("x ^ 2", 3.0, 9.0)]
    #[case("-x ** 2", 3.0, -9.0)]
    #[case("2 ** -1", 0.0, 0.5)]
    #[case("r(x)", 1.25, 1.3)]
    #[case("r(x, 0)", 2.5, 3.0)]
    #[case("r(x, 2)", 1.23456, 1.23)]
    #[case("c(x)", 1.01, 2.0)]
    #[case("f(x)", 1.99, 1.0)]
    #[case("x > 8 ? 8 : x", 9.5, 8.0)]
    #[case("x > 8 ? 8 : x", 6.0, 6.0)]
    #[case("return x * 1.5;", 2.0, 3.0)]
    #[case(".5 + x", 1.0, 1.5)]
    #[case("1e2 * x", 0.5, 50.0)]
    fn test_transform_values(#[case] source: &str, #[case] x: f64, #[case] expected: f64) {
        assert_eq!(compile_transform(source).eval(x), Transformed::Value(expected));
    }

    #[rstest]
    #[case("not valid js")]
    #[case("")]
    #[case("x +")]
    #[case("y * 2")]
    #[case("x > 1")]
    #[case("(x")]
    #[case("x $ 2")]
    #[case("r()")]
    #[case("c(x, 2)")]
    #[case("x / 0")]
    #[case("true + 1")]
    #[case("1..2")]
    fn test_transform_errors_become_sentinel(#[case] source: &str) {
        assert_eq!(compile_transform(source).eval(2.0), Transformed::Error);
    }

    #[rstest]
    #[case(format!("{}x{}", "(".repeat(1_000), ")".repeat(1_000)))]
    #[case(format!("{}x", "-".repeat(1_000)))]
    #[case(format!("{}x{}", "r(".repeat(600), ")".repeat(600)))]
    #[case(format!("x{}", "^2".repeat(1_000)))]
    #[case(format!("{}x", "x ? 1 : ".repeat(300)))]
    fn test_deep_nesting_becomes_sentinel(#[case] source: String) {
        let transform = compile_transform(&source);
        assert_eq!(transform.error(), Some(&ExprError::TooDeep(MAX_NESTING)));
        assert_eq!(transform.eval(1.0), Transformed::Error);
        assert!(compile_filter(&source).error().is_some());
    }

    #[test]
    fn test_huge_nesting_becomes_sentinel() {
        let source = format!("{}x{}", "(".repeat(100_000), ")".repeat(100_000));
        assert_eq!(compile_transform(&source).eval(1.0), Transformed::Error);
        assert_eq!(compile_filter(&source).eval(1.0), FilterOutcome::Error);
    }

    #[test]
    fn test_long_operator_chain_is_rejected() {
        let source = vec!["x"; 100_000].join("+");
        let transform = compile_transform(&source);
        assert_eq!(transform.error(), Some(&ExprError::TooLong(MAX_TOKENS)));
        assert_eq!(transform.eval(1.0), Transformed::Error);
    }

    #[test]
    fn test_moderate_nesting_still_compiles() {
        let source = format!("{}x{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(compile_transform(&source).eval(1.5), Transformed::Value(1.5));
    }

    #[test]
    fn test_compile_error_is_reported() {
        let transform = compile_transform("not valid js");
        assert_eq!(
            transform.error(),
            Some(&ExprError::UnknownIdentifier("not".to_string()))
        );
        assert_eq!(transform.source(), "not valid js");
        assert!(compile_transform("x * 2").error().is_none());
    }

    #[rstest]
    #[case(-100.0)]
    #[case(0.0)]
    #[case(42.0)]
    fn test_empty_filter_accepts_everything(#[case] x: f64) {
        let filter = compile_filter("");
        assert!(filter.accepts_all());
        assert_eq!(filter.eval(x), FilterOutcome::Pass);
        assert_eq!(compile_filter("   ").eval(x), FilterOutcome::Pass);
    }

    #[rstest]
    #[case("x > 2", 3.0, FilterOutcome::Pass)]
    #[case("x > 2", 2.0, FilterOutcome::Reject)]
    #[case("x >= 2 && x < 4", 2.0, FilterOutcome::Pass)]
    #[case("x < 1 || x > 5", 3.0, FilterOutcome::Reject)]
    #[case("!(x == 3)", 3.0, FilterOutcome::Reject)]
    #[case("x === 3", 3.0, FilterOutcome::Pass)]
    #[case("x !== 3", 3.0, FilterOutcome::Reject)]
    #[case("r(x) != 1", 1.04, FilterOutcome::Reject)]
    #[case("true", 0.0, FilterOutcome::Pass)]
    #[case("x", 1.0, FilterOutcome::Error)]
    #[case("x >", 1.0, FilterOutcome::Error)]
    #[case("x > 1 && x", 2.0, FilterOutcome::Error)]
    fn test_filter_outcomes(#[case] source: &str, #[case] x: f64, #[case] expected: FilterOutcome) {
        assert_eq!(compile_filter(source).eval(x), expected);
    }

    #[test]
    fn test_logical_operators_short_circuit() {
        // the right-hand side would be a type error if evaluated
        assert_eq!(compile_filter("x > 5 && x").eval(1.0), FilterOutcome::Reject);
        assert_eq!(compile_filter("x < 5 || x").eval(1.0), FilterOutcome::Pass);
    }

    #[test]
    fn test_round_to_rounds_half_up() {
        assert_eq!(round_to(2.5, 0.0), 3.0);
        assert_eq!(round_to(-2.5, 0.0), -2.0);
        assert_eq!(round_to(0.125, 2.0), 0.13);
    }
}
