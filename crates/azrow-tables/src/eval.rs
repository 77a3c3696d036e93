//! Parser and evaluator for the `$filter` subset produced by
//! [`crate::odata::compile`], used by the in-memory store.
//!
//! Grammar:
//!
//! ```text
//! expr    := and ( "or" and )*
//! and     := unary ( "and" unary )*
//! unary   := "not" unary | primary
//! primary := "(" expr ")"
//!          | "startswith" "(" ident "," literal ")"
//!          | ident op literal
//! ```

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::types::{Entity, EntityValue};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Comma,
    Ident(String),
    Str(String),
    Number(String),
    DateTime(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    DateTime(DateTime<Utc>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare {
        column: String,
        op: Comparison,
        value: Literal,
    },
    StartsWith {
        column: String,
        prefix: String,
    },
}

/// Parse failure; the message is what the store reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError(pub String);

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn parse(input: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(ParseError(format!(
            "unexpected token {:?}",
            parser.tokens[parser.pos]
        )));
    }
    Ok(expr)
}

fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '\'' => {
                let (s, next) = read_quoted(&chars, i)?;
                tokens.push(Token::Str(s));
                i = next;
            }
            c if c.is_ascii_digit() || c == '-' => {
                let start = i;
                i += 1;
                while i < chars.len()
                    && (chars[i].is_ascii_digit() || matches!(chars[i], '.' | 'e' | 'E' | '+' | '-'))
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                // `L` marks a 64-bit literal; the value compares the same either way
                if i < chars.len() && chars[i] == 'L' {
                    i += 1;
                }
                tokens.push(Token::Number(text));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                if ident == "datetime" && i < chars.len() && chars[i] == '\'' {
                    let (s, next) = read_quoted(&chars, i)?;
                    tokens.push(Token::DateTime(s));
                    i = next;
                } else {
                    tokens.push(Token::Ident(ident));
                }
            }
            other => return Err(ParseError(format!("unexpected character '{other}'"))),
        }
    }
    Ok(tokens)
}

fn read_quoted(chars: &[char], start: usize) -> Result<(String, usize), ParseError> {
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == '\'' {
            if chars.get(i + 1) == Some(&'\'') {
                out.push('\'');
                i += 2;
                continue;
            }
            return Ok((out, i + 1));
        }
        out.push(chars[i]);
        i += 1;
    }
    Err(ParseError("unterminated string literal".into()))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s == keyword)
    }

    fn expect(&mut self, want: Token) -> Result<(), ParseError> {
        match self.next() {
            Some(t) if t == want => Ok(()),
            other => Err(ParseError(format!("expected {want:?}, found {other:?}"))),
        }
    }

    fn or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.and_expr()?;
        while self.peek_keyword("or") {
            self.pos += 1;
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.unary()?;
        while self.peek_keyword("and") {
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if self.peek_keyword("not") {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        match self.next() {
            Some(Token::LParen) => {
                let expr = self.or_expr()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Some(Token::Ident(name)) if name == "startswith" => {
                self.expect(Token::LParen)?;
                let column = self.ident()?;
                self.expect(Token::Comma)?;
                let prefix = match self.literal()? {
                    Literal::String(s) => s,
                    other => return Err(ParseError(format!("startswith needs a string, got {other:?}"))),
                };
                self.expect(Token::RParen)?;
                Ok(Expr::StartsWith { column, prefix })
            }
            Some(Token::Ident(column)) => {
                let op = match self.next() {
                    Some(Token::Ident(op)) => match op.as_str() {
                        "eq" => Comparison::Eq,
                        "ne" => Comparison::Ne,
                        "gt" => Comparison::Gt,
                        "ge" => Comparison::Ge,
                        "lt" => Comparison::Lt,
                        "le" => Comparison::Le,
                        other => return Err(ParseError(format!("unsupported operator '{other}'"))),
                    },
                    other => return Err(ParseError(format!("expected operator, found {other:?}"))),
                };
                let value = self.literal()?;
                Ok(Expr::Compare { column, op, value })
            }
            other => Err(ParseError(format!("unexpected token {other:?}"))),
        }
    }

    fn ident(&mut self) -> Result<String, ParseError> {
        match self.next() {
            Some(Token::Ident(s)) => Ok(s),
            other => Err(ParseError(format!("expected column name, found {other:?}"))),
        }
    }

    fn literal(&mut self) -> Result<Literal, ParseError> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Literal::String(s)),
            Some(Token::DateTime(s)) => parse_datetime(&s)
                .map(Literal::DateTime)
                .ok_or_else(|| ParseError(format!("invalid datetime '{s}'"))),
            Some(Token::Number(text)) if text == "-" => match self.next() {
                Some(Token::Ident(s)) if s == "INF" => Ok(Literal::Double(f64::NEG_INFINITY)),
                other => Err(ParseError(format!("expected number after '-', found {other:?}"))),
            },
            Some(Token::Number(text)) => {
                if let Ok(n) = text.parse::<i64>() {
                    return Ok(Literal::Int(n));
                }
                text.parse::<f64>()
                    .map(Literal::Double)
                    .map_err(|_| ParseError(format!("invalid number '{text}'")))
            }
            Some(Token::Ident(s)) => match s.as_str() {
                "null" => Ok(Literal::Null),
                "true" => Ok(Literal::Bool(true)),
                "false" => Ok(Literal::Bool(false)),
                "INF" => Ok(Literal::Double(f64::INFINITY)),
                "NaN" => Ok(Literal::Double(f64::NAN)),
                other => Err(ParseError(format!("expected literal, found '{other}'"))),
            },
            other => Err(ParseError(format!("expected literal, found {other:?}"))),
        }
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

// ── Evaluation ──────────────────────────────────────────────────────

/// Look up a column, mapping the system columns onto the identity pair.
fn column_value(entity: &Entity, column: &str) -> Option<EntityValue> {
    match column {
        "PartitionKey" => Some(EntityValue::String(entity.partition_key.clone())),
        "RowKey" => Some(EntityValue::String(entity.row_key.clone())),
        other => entity.get(other).cloned(),
    }
}

pub fn matches(expr: &Expr, entity: &Entity) -> bool {
    match expr {
        Expr::And(a, b) => matches(a, entity) && matches(b, entity),
        Expr::Or(a, b) => matches(a, entity) || matches(b, entity),
        Expr::Not(inner) => !matches(inner, entity),
        Expr::StartsWith { column, prefix } => match column_value(entity, column) {
            Some(EntityValue::String(s)) => s.starts_with(prefix.as_str()),
            _ => false,
        },
        Expr::Compare { column, op, value } => {
            let Some(actual) = column_value(entity, column) else {
                return *value == Literal::Null && *op == Comparison::Eq;
            };
            if *value == Literal::Null {
                return *op == Comparison::Ne;
            }
            match compare(&actual, value) {
                Some(ord) => match op {
                    Comparison::Eq => ord == Ordering::Equal,
                    Comparison::Ne => ord != Ordering::Equal,
                    Comparison::Gt => ord == Ordering::Greater,
                    Comparison::Ge => ord != Ordering::Less,
                    Comparison::Lt => ord == Ordering::Less,
                    Comparison::Le => ord != Ordering::Greater,
                },
                None => false,
            }
        }
    }
}

fn compare(actual: &EntityValue, literal: &Literal) -> Option<Ordering> {
    match (actual, literal) {
        (EntityValue::String(a), Literal::String(b)) => Some(a.as_str().cmp(b.as_str())),
        (EntityValue::Bool(a), Literal::Bool(b)) => Some(a.cmp(b)),
        (EntityValue::DateTime(a), Literal::DateTime(b)) => Some(a.cmp(b)),
        (EntityValue::DateTime(a), Literal::String(b)) => parse_datetime(b).map(|b| a.cmp(&b)),
        (EntityValue::Int32(a), Literal::Int(b)) => Some(i64::from(*a).cmp(b)),
        (EntityValue::Int64(a), Literal::Int(b)) => Some(a.cmp(b)),
        (EntityValue::Int32(a), Literal::Double(b)) => f64::from(*a).partial_cmp(b),
        (EntityValue::Int64(a), Literal::Double(b)) => (*a as f64).partial_cmp(b),
        (EntityValue::Double(a), Literal::Int(b)) => a.partial_cmp(&(*b as f64)),
        (EntityValue::Double(a), Literal::Double(b)) => a.partial_cmp(b),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::odata::{compile, Filter, FilterStatement};

    fn row() -> Entity {
        Entity::new("PK1", "R1")
            .with("name", "O'Brien")
            .with("count", 5)
            .with("big", 5_000_000_000i64)
            .with("ratio", 0.5)
            .with("active", true)
    }

    #[test]
    fn infinite_literals() {
        let below = FilterStatement::single(Filter::lt("ratio", f64::INFINITY));
        assert!(matches(&parse(&compile(&below)).unwrap(), &row()));
        let above = FilterStatement::single(Filter::gt("ratio", f64::NEG_INFINITY));
        assert!(matches(&parse(&compile(&above)).unwrap(), &row()));
        assert!(matches!(
            parse("ratio eq NaN").unwrap(),
            Expr::Compare { value: Literal::Double(n), .. } if n.is_nan()
        ));
        assert!(parse("ratio eq -x").is_err());
    }

    fn eval(filter: &str) -> bool {
        matches(&parse(filter).unwrap(), &row())
    }

    #[test]
    fn compiled_filters_round_trip() {
        let s = FilterStatement::and([
            Filter::eq("partitionKey", "PK1").into(),
            Filter::eq("name", "O'Brien").into(),
            FilterStatement::or([Filter::gt("count", 10).into(), Filter::eq("active", true).into()]).into(),
        ]);
        assert!(matches(&parse(&compile(&s)).unwrap(), &row()));

        let s = FilterStatement::single(Filter::eq("partitionKey", "PK2"));
        assert!(!matches(&parse(&compile(&s)).unwrap(), &row()));
    }

    #[test]
    fn comparisons() {
        assert!(eval("count ge 5"));
        assert!(!eval("count gt 5"));
        assert!(eval("big gt 2147483648L"));
        assert!(eval("ratio lt 1"));
        assert!(eval("RowKey ne 'R2'"));
        assert!(eval("active eq true"));
    }

    #[test]
    fn negation_and_grouping() {
        assert!(eval("not count eq 4"));
        assert!(eval("(not (count eq 4 or count eq 6))"));
        assert!(!eval("(not (count eq 5 or count eq 6))"));
    }

    #[test]
    fn starts_with() {
        assert!(eval("startswith(name, 'O''B')"));
        assert!(eval("not startswith(RowKey, 'X')"));
    }

    #[test]
    fn missing_column() {
        assert!(eval("missing eq null"));
        assert!(!eval("missing eq 'x'"));
        assert!(!eval("missing ne 'x'"));
        assert!(eval("name ne null"));
    }

    #[test]
    fn datetime_literal() {
        let e = Entity::new("P", "R").with(
            "when",
            DateTime::parse_from_rfc3339("2023-01-01T05:00:00Z").unwrap().with_timezone(&Utc),
        );
        assert!(matches(&parse("when eq '2023-01-01T05:00:00.000Z'").unwrap(), &e));
        assert!(matches(&parse("when lt datetime'2024-01-01T00:00:00Z'").unwrap(), &e));
    }

    #[test]
    fn in_operator_is_rejected() {
        assert!(parse("tags in 'a'").is_err());
    }

    #[test]
    fn malformed_input() {
        assert!(parse("name eq").is_err());
        assert!(parse("(name eq 'x'").is_err());
        assert!(parse("name eq 'x").is_err());
        assert!(parse("name eq 'x' 'y'").is_err());
    }
}
