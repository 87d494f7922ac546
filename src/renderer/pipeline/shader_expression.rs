//! Integer expressions used inside shader builder directives.
//!
//! ```text
//! expr  := or
//! or    := and ( "||" and )*
//! and   := eq ( "&&" eq )*
//! eq    := cmp ( ( "==" | "!=" ) cmp )*
//! cmp   := add ( ( "<" | "<=" | ">" | ">=" ) add )*
//! add   := mul ( ( "+" | "-" ) mul )*
//! mul   := unary ( ( "*" | "/" | "%" ) unary )*
//! unary := ( "!" | "-" ) unary | primary
//! primary := integer | property-name | "(" expr ")"
//! ```
//!
//! Property names resolve against the builder's working properties; unset
//! properties read as `0`. Booleans are `1` / `0`.

use crate::resources::ShaderProperties;
use crate::utils::StringId;

pub(crate) type ExpressionResult<T> = std::result::Result<T, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Number(i64),
    Identifier(&'a str),
    /// `@name`, a foreach loop variable that was not substituted.
    LoopVariable(&'a str),
    Operator(&'static str),
}

const OPERATORS: [&str; 16] = [
    "||", "&&", "==", "!=", "<=", ">=", "<", ">", "+", "-", "*", "/", "%", "!", "(", ")",
];

#[inline]
pub(crate) fn is_identifier_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

#[inline]
pub(crate) fn is_identifier_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

fn tokenize(expression: &str) -> ExpressionResult<Vec<Token<'_>>> {
    let bytes = expression.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            let literal = &expression[start..i];
            let value = literal
                .parse::<i64>()
                .map_err(|e| format!("invalid integer '{literal}': {e}"))?;
            tokens.push(Token::Number(value));
        } else if is_identifier_start(c) {
            let start = i;
            while i < bytes.len() && is_identifier_char(bytes[i]) {
                i += 1;
            }
            tokens.push(Token::Identifier(&expression[start..i]));
        } else if c == b'@' && i + 1 < bytes.len() && is_identifier_start(bytes[i + 1]) {
            let start = i + 1;
            i += 1;
            while i < bytes.len() && is_identifier_char(bytes[i]) {
                i += 1;
            }
            tokens.push(Token::LoopVariable(&expression[start..i]));
        } else {
            let rest = &expression[i..];
            let operator = OPERATORS
                .iter()
                .find(|op| rest.starts_with(**op))
                .ok_or_else(|| format!("unexpected character '{}' in '{expression}'", c as char))?;
            tokens.push(Token::Operator(*operator));
            i += operator.len();
        }
    }

    Ok(tokens)
}

/// Evaluates `expression` against `properties`.
pub(crate) fn evaluate(expression: &str, properties: &ShaderProperties) -> ExpressionResult<i64> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }

    let mut parser = Parser {
        tokens: &tokens,
        position: 0,
        properties,
        expression,
    };
    let value = parser.or()?;
    if parser.position != tokens.len() {
        return Err(format!("trailing tokens in '{expression}'"));
    }
    Ok(value)
}

/// Property names read by `expression`; loop variables are skipped.
pub(crate) fn referenced_identifiers(expression: &str) -> Vec<&str> {
    tokenize(expression)
        .map(|tokens| {
            tokens
                .into_iter()
                .filter_map(|t| match t {
                    Token::Identifier(name) => Some(name),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Saturating conversion of an evaluated expression to a property value.
#[inline]
pub(crate) fn to_property_value(value: i64) -> i32 {
    i32::try_from(value).unwrap_or(if value < 0 { i32::MIN } else { i32::MAX })
}

struct Parser<'t, 'a> {
    tokens: &'t [Token<'a>],
    position: usize,
    properties: &'t ShaderProperties,
    expression: &'t str,
}

impl Parser<'_, '_> {
    fn peek_operator(&self, candidates: &[&'static str]) -> Option<&'static str> {
        match self.tokens.get(self.position) {
            Some(Token::Operator(op)) if candidates.contains(op) => Some(*op),
            _ => None,
        }
    }

    fn or(&mut self) -> ExpressionResult<i64> {
        let mut lhs = self.and()?;
        while self.peek_operator(&["||"]).is_some() {
            self.position += 1;
            let rhs = self.and()?;
            lhs = i64::from(lhs != 0 || rhs != 0);
        }
        Ok(lhs)
    }

    fn and(&mut self) -> ExpressionResult<i64> {
        let mut lhs = self.equality()?;
        while self.peek_operator(&["&&"]).is_some() {
            self.position += 1;
            let rhs = self.equality()?;
            lhs = i64::from(lhs != 0 && rhs != 0);
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> ExpressionResult<i64> {
        let mut lhs = self.comparison()?;
        while let Some(op) = self.peek_operator(&["==", "!="]) {
            self.position += 1;
            let rhs = self.comparison()?;
            lhs = i64::from(if op == "==" { lhs == rhs } else { lhs != rhs });
        }
        Ok(lhs)
    }

    fn comparison(&mut self) -> ExpressionResult<i64> {
        let mut lhs = self.additive()?;
        while let Some(op) = self.peek_operator(&["<", "<=", ">", ">="]) {
            self.position += 1;
            let rhs = self.additive()?;
            lhs = i64::from(match op {
                "<" => lhs < rhs,
                "<=" => lhs <= rhs,
                ">" => lhs > rhs,
                _ => lhs >= rhs,
            });
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> ExpressionResult<i64> {
        let mut lhs = self.multiplicative()?;
        while let Some(op) = self.peek_operator(&["+", "-"]) {
            self.position += 1;
            let rhs = self.multiplicative()?;
            lhs = if op == "+" {
                lhs.wrapping_add(rhs)
            } else {
                lhs.wrapping_sub(rhs)
            };
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> ExpressionResult<i64> {
        let mut lhs = self.unary()?;
        while let Some(op) = self.peek_operator(&["*", "/", "%"]) {
            self.position += 1;
            let rhs = self.unary()?;
            lhs = match op {
                "*" => lhs.wrapping_mul(rhs),
                _ if rhs == 0 => {
                    return Err(format!("division by zero in '{}'", self.expression));
                }
                "/" => lhs.wrapping_div(rhs),
                _ => lhs.wrapping_rem(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> ExpressionResult<i64> {
        if let Some(op) = self.peek_operator(&["!", "-"]) {
            self.position += 1;
            let value = self.unary()?;
            return Ok(if op == "!" {
                i64::from(value == 0)
            } else {
                value.wrapping_neg()
            });
        }
        self.primary()
    }

    fn primary(&mut self) -> ExpressionResult<i64> {
        let token = self
            .tokens
            .get(self.position)
            .copied()
            .ok_or_else(|| format!("unexpected end of '{}'", self.expression))?;
        self.position += 1;

        match token {
            Token::Number(value) => Ok(value),
            Token::Identifier(name) => Ok(i64::from(
                self.properties
                    .get_property_value_or(StringId::new(name), 0),
            )),
            Token::LoopVariable(name) => Err(format!("'@{name}' used outside of its @foreach")),
            Token::Operator("(") => {
                let value = self.or()?;
                if self.peek_operator(&[")"]).is_none() {
                    return Err(format!("missing ')' in '{}'", self.expression));
                }
                self.position += 1;
                Ok(value)
            }
            Token::Operator(op) => Err(format!("unexpected '{op}' in '{}'", self.expression)),
        }
    }
}
