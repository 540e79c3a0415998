//! Comparison operators used by `where` clauses and `join.on` predicates.

use crate::error::{FoliodbError, FoliodbResult};
use crate::value::Value;

/// A parsed `where`/`join.on` predicate, carrying whatever operand shape
/// its operator needs.
#[derive(Debug, Clone)]
pub enum Predicate {
    Eq(Value),
    Neq(Value),
    Lt(Value),
    Lte(Value),
    Gt(Value),
    Gte(Value),
    In(Value),
    NotIn(Value),
    Between(Value, Value),
    NotBetween(Value, Value),
    Like(String),
    NotLike(String),
}

impl Predicate {
    /// Parse an operator token plus its right-hand operand into a
    /// `Predicate`. `in`/`not in` accept either a `Value::List` (membership)
    /// or a `Value::Text` (substring check). `between`/`not between`
    /// require a two-element list.
    pub fn parse(op: &str, value: Value) -> FoliodbResult<Self> {
        let op = op.trim().to_ascii_lowercase();
        match op.as_str() {
            "=" | "eq" | "is" => Ok(Predicate::Eq(value)),
            "!=" | "neq" | "is not" => Ok(Predicate::Neq(value)),
            "<" => Ok(Predicate::Lt(value)),
            "<=" => Ok(Predicate::Lte(value)),
            ">" => Ok(Predicate::Gt(value)),
            ">=" => Ok(Predicate::Gte(value)),
            "in" | "is in" => Ok(Predicate::In(value)),
            "not in" => Ok(Predicate::NotIn(value)),
            "between" => {
                let (lo, hi) = as_pair(value)?;
                Ok(Predicate::Between(lo, hi))
            }
            "not between" => {
                let (lo, hi) = as_pair(value)?;
                Ok(Predicate::NotBetween(lo, hi))
            }
            "like" => Ok(Predicate::Like(text_operand(value)?)),
            "not like" => Ok(Predicate::NotLike(text_operand(value)?)),
            other => Err(FoliodbError::QueryMalformed(format!(
                "unknown comparison operator '{other}'"
            ))),
        }
    }

    /// A deterministic textual rendering of this predicate's operand(s),
    /// used (together with [`Predicate::label`]) to build canonical query
    /// payloads for cache-key hashing.
    pub fn canonical_operand(&self) -> String {
        match self {
            Predicate::Eq(v) | Predicate::Neq(v) | Predicate::Lt(v) | Predicate::Lte(v)
            | Predicate::Gt(v) | Predicate::Gte(v) => v.to_canonical_string(),
            Predicate::In(v) | Predicate::NotIn(v) => match v {
                Value::List(items) => {
                    let mut rendered: Vec<String> =
                        items.iter().map(Value::to_canonical_string).collect();
                    rendered.sort();
                    rendered.join(",")
                }
                other => other.to_canonical_string(),
            },
            Predicate::Between(lo, hi) | Predicate::NotBetween(lo, hi) => {
                format!("{}..{}", lo.to_canonical_string(), hi.to_canonical_string())
            }
            Predicate::Like(p) | Predicate::NotLike(p) => p.clone(),
        }
    }

    /// A stable, order-preserving label used in canonical query payloads.
    pub fn label(&self) -> &'static str {
        match self {
            Predicate::Eq(_) => "eq",
            Predicate::Neq(_) => "neq",
            Predicate::Lt(_) => "lt",
            Predicate::Lte(_) => "lte",
            Predicate::Gt(_) => "gt",
            Predicate::Gte(_) => "gte",
            Predicate::In(_) => "in",
            Predicate::NotIn(_) => "not_in",
            Predicate::Between(_, _) => "between",
            Predicate::NotBetween(_, _) => "not_between",
            Predicate::Like(_) => "like",
            Predicate::NotLike(_) => "not_like",
        }
    }

    /// Evaluate this predicate against a column value. A missing column
    /// (`None`) behaves as `Value::Null`, per spec ("schema-missing columns
    /// compare as null; never raise").
    pub fn matches(&self, lhs: Option<&Value>) -> bool {
        let null = Value::Null;
        let lhs = lhs.unwrap_or(&null);
        match self {
            Predicate::Eq(rhs) => lhs.loosely_eq(rhs),
            Predicate::Neq(rhs) => !lhs.loosely_eq(rhs),
            Predicate::Lt(rhs) => numeric_or_text_cmp(lhs, rhs) == std::cmp::Ordering::Less,
            Predicate::Lte(rhs) => numeric_or_text_cmp(lhs, rhs) != std::cmp::Ordering::Greater,
            Predicate::Gt(rhs) => numeric_or_text_cmp(lhs, rhs) == std::cmp::Ordering::Greater,
            Predicate::Gte(rhs) => numeric_or_text_cmp(lhs, rhs) != std::cmp::Ordering::Less,
            Predicate::In(operand) => membership_or_substring(operand, lhs),
            Predicate::NotIn(operand) => !membership_or_substring(operand, lhs),
            Predicate::Between(lo, hi) => {
                numeric_or_text_cmp(lhs, lo) != std::cmp::Ordering::Less
                    && numeric_or_text_cmp(lhs, hi) != std::cmp::Ordering::Greater
            }
            Predicate::NotBetween(lo, hi) => {
                numeric_or_text_cmp(lhs, lo) == std::cmp::Ordering::Less
                    || numeric_or_text_cmp(lhs, hi) == std::cmp::Ordering::Greater
            }
            Predicate::Like(pattern) => like_match(&lhs.to_string(), pattern),
            Predicate::NotLike(pattern) => !like_match(&lhs.to_string(), pattern),
        }
    }
}

fn numeric_or_text_cmp(lhs: &Value, rhs: &Value) -> std::cmp::Ordering {
    lhs.compare(rhs)
}

/// `in`/`is in` (and their `not` forms) accept two distinct operand shapes:
/// a `Value::List` checks `lhs` for membership; a `Value::Text` checks
/// whether the operand is a substring of `lhs`'s text form. Any other
/// scalar operand falls back to equality against `lhs`.
fn membership_or_substring(operand: &Value, lhs: &Value) -> bool {
    match operand {
        Value::List(items) => items.iter().any(|v| v.loosely_eq(lhs)),
        Value::Text(needle) => lhs.to_string().contains(needle.as_str()),
        other => other.loosely_eq(lhs),
    }
}

fn as_pair(value: Value) -> FoliodbResult<(Value, Value)> {
    match value {
        Value::List(items) if items.len() == 2 => {
            let mut it = items.into_iter();
            Ok((it.next().unwrap(), it.next().unwrap()))
        }
        other => Err(FoliodbError::QueryMalformed(format!(
            "between requires a two-element list, got {other}"
        ))),
    }
}

fn text_operand(value: Value) -> FoliodbResult<String> {
    match value {
        Value::Text(s) => Ok(s),
        other => Err(FoliodbError::QueryMalformed(format!(
            "like requires a text pattern, got {other}"
        ))),
    }
}

/// SQL-style `%`/`_` wildcard match: `%` matches any run of characters,
/// `_` matches exactly one. A backslash escapes the following `%`, `_`, or
/// backslash so it is matched literally. A pattern with neither wildcard
/// present (after escape resolution) degenerates to plain equality.
pub fn like_match(text: &str, pattern: &str) -> bool {
    let tokens = tokenize_pattern(pattern);
    if tokens.iter().all(|t| matches!(t, Token::Literal(_))) {
        let literal: String = tokens
            .into_iter()
            .map(|t| match t {
                Token::Literal(c) => c,
                _ => unreachable!(),
            })
            .collect();
        return text == literal;
    }
    like_match_tokens(&text.chars().collect::<Vec<_>>(), &tokens)
}

enum Token {
    Literal(char),
    AnySeq,
    AnyOne,
}

fn tokenize_pattern(pattern: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    tokens.push(Token::Literal(next));
                }
            }
            '%' => tokens.push(Token::AnySeq),
            '_' => tokens.push(Token::AnyOne),
            other => tokens.push(Token::Literal(other)),
        }
    }
    tokens
}

fn like_match_tokens(text: &[char], tokens: &[Token]) -> bool {
    match tokens.first() {
        None => text.is_empty(),
        Some(Token::Literal(c)) => {
            !text.is_empty() && text[0] == *c && like_match_tokens(&text[1..], &tokens[1..])
        }
        Some(Token::AnyOne) => {
            !text.is_empty() && like_match_tokens(&text[1..], &tokens[1..])
        }
        Some(Token::AnySeq) => {
            (0..=text.len()).any(|split| like_match_tokens(&text[split..], &tokens[1..]))
        }
    }
}
