//! The restricted boolean/comparison expression grammar (spec §4.1, §9):
//! literals, dotted-path variable access, comparisons, and short-circuit
//! boolean combinators. No function calls, indexing, or arithmetic beyond
//! comparison — the grammar is intentionally small and should stay that way.

use crate::errors::FactoryError;
use crate::model::Context;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
        }
    }

    fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            other => Value::String(other.to_string()),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    True,
    False,
    Null,
    And,
    Or,
    Not,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
    Dot,
}

fn tokenize(expr: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ne);
                    i += 2;
                } else {
                    tokens.push(Token::Not);
                    i += 1;
                }
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    s.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(format!("unterminated string literal in '{expr}'"));
                }
                i += 1;
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n: f64 = text
                    .parse()
                    .map_err(|_| format!("invalid number literal '{text}' in '{expr}'"))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(format!("unexpected character '{other}' in '{expr}'")),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    ctx: &'a Context,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        self.pos += 1;
        t
    }

    fn or_expr(&mut self) -> Result<Value, String> {
        let mut left = self.and_expr()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            if left.truthy() {
                // short-circuit: still need to consume the right side's tokens
                let _ = self.and_expr()?;
                left = Value::Bool(true);
            } else {
                let right = self.and_expr()?;
                left = Value::Bool(right.truthy());
            }
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Value, String> {
        let mut left = self.unary()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            if !left.truthy() {
                let _ = self.unary()?;
                left = Value::Bool(false);
            } else {
                let right = self.unary()?;
                left = Value::Bool(right.truthy());
            }
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Value, String> {
        if matches!(self.peek(), Some(Token::Not)) {
            self.advance();
            let value = self.unary()?;
            return Ok(Value::Bool(!value.truthy()));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Value, String> {
        let left = self.primary()?;
        let op = match self.peek() {
            Some(Token::Eq) => Some(Token::Eq),
            Some(Token::Ne) => Some(Token::Ne),
            Some(Token::Lt) => Some(Token::Lt),
            Some(Token::Le) => Some(Token::Le),
            Some(Token::Gt) => Some(Token::Gt),
            Some(Token::Ge) => Some(Token::Ge),
            _ => None,
        };
        let Some(op) = op else {
            return Ok(left);
        };
        self.advance();
        let right = self.primary()?;
        Ok(Value::Bool(compare(&op, &left, &right)))
    }

    fn primary(&mut self) -> Result<Value, String> {
        match self.advance().cloned() {
            Some(Token::LParen) => {
                let value = self.or_expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err("expected closing parenthesis".to_string()),
                }
            }
            Some(Token::True) => Ok(Value::Bool(true)),
            Some(Token::False) => Ok(Value::Bool(false)),
            Some(Token::Null) => Ok(Value::Null),
            Some(Token::Number(n)) => Ok(Value::Number(n)),
            Some(Token::Str(s)) => Ok(Value::String(s)),
            Some(Token::Ident(first)) => {
                let mut path = first;
                while matches!(self.peek(), Some(Token::Dot)) {
                    self.advance();
                    match self.advance() {
                        Some(Token::Ident(next)) => {
                            path.push('.');
                            path.push_str(next);
                        }
                        _ => return Err(format!("expected identifier after '.' in path '{path}'")),
                    }
                }
                Ok(self
                    .ctx
                    .resolve_path(&path)
                    .map(Value::from_json)
                    .unwrap_or(Value::Null))
            }
            other => Err(format!("unexpected token {other:?}")),
        }
    }
}

fn compare(op: &Token, left: &Value, right: &Value) -> bool {
    use Token::*;
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match op {
            Eq => a == b,
            Ne => a != b,
            Lt => a < b,
            Le => a <= b,
            Gt => a > b,
            Ge => a >= b,
            _ => false,
        },
        _ => {
            let a = left.to_string();
            let b = right.to_string();
            match op {
                Eq => a == b,
                Ne => a != b,
                Lt => a < b,
                Le => a <= b,
                Gt => a > b,
                Ge => a >= b,
                _ => false,
            }
        }
    }
}

/// **EvaluateExpression(expr, context) → value.**
pub fn evaluate_expression(expr: &str, ctx: &Context) -> Result<Value, FactoryError> {
    let tokens = tokenize(expr).map_err(|reason| FactoryError::BadExpression {
        expr: expr.to_string(),
        reason,
    })?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        ctx,
    };
    let value = parser.or_expr().map_err(|reason| FactoryError::BadExpression {
        expr: expr.to_string(),
        reason,
    })?;
    if parser.pos != tokens.len() {
        return Err(FactoryError::BadExpression {
            expr: expr.to_string(),
            reason: "trailing tokens after expression".to_string(),
        });
    }
    Ok(value)
}

/// Evaluates a condition and degrades gracefully on ill-typed expressions:
/// spec §7 treats `ConditionError` as rare and logs-and-treats-as-false
/// rather than aborting.
pub fn evaluate_condition(expr: &str, ctx: &Context) -> bool {
    match evaluate_expression(expr, ctx) {
        Ok(value) => value.truthy(),
        Err(err) => {
            tracing::warn!(expression = expr, error = %err, "condition ill-typed, treating as false");
            false
        }
    }
}
