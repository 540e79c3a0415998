//! Dynamic values and validated identifiers.
//!
//! `Value` is the sum type every column, row, and metadata field is built
//! from; `Identifier` is a newtype that enforces the `[A-Za-z0-9]+` naming
//! rule shared by database names, table names, and row ids at the point of
//! construction rather than at every call site that later uses one.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{FoliodbError, FoliodbResult};

/// A dynamically-typed JSON-compatible value.
///
/// Column values, row payloads, and metadata all flow through this type
/// before crossing the serde boundary into `serde_json::Value` at the
/// storage edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// True if this value is `Value::Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Structural comparison used by `distinct` and equality operators;
    /// numeric values compare across `Int`/`Float` by value.
    pub fn loosely_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            _ => self == other,
        }
    }

    /// Ordering used by `sort`: numeric for `Int`/`Float`/`Bool`,
    /// lexicographic for `Text`, structural (via JSON rendering) otherwise.
    /// `Null` sorts before everything else.
    pub fn compare(&self, other: &Value) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (Value::Int(a), Value::Float(b)) => {
                (*a as f64).partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (Value::Float(a), Value::Int(b)) => {
                a.partial_cmp(&(*b as f64)).unwrap_or(Ordering::Equal)
            }
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            _ => self.to_canonical_string().cmp(&other.to_canonical_string()),
        }
    }

    /// A stable textual rendering used for canonical query identity hashing
    /// and as a structural-comparison fallback.
    pub fn to_canonical_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Coerce to an `f64` for numeric comparisons; non-numeric values yield
    /// `None` rather than a spurious ordering.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Coerce to a display string for `like`/`in`-on-string matching.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(a) => Value::List(a.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(o) => {
                Value::Object(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::from(i),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s),
            Value::List(l) => serde_json::Value::Array(l.into_iter().map(Into::into).collect()),
            Value::Object(o) => {
                serde_json::Value::Object(o.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Text(s) => write!(f, "{s}"),
            other => write!(f, "{}", other.to_canonical_string()),
        }
    }
}

/// A validated identifier: a database name, table name, or row id, all of
/// which must match `[A-Za-z0-9]+`.
///
/// Validation happens once, here, at construction — every other module
/// trusts an `Identifier` it holds without re-checking the pattern.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Validate and wrap a raw name.
    pub fn new(raw: impl Into<String>) -> FoliodbResult<Self> {
        let raw = raw.into();
        if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_alphanumeric()) {
            Ok(Self(raw))
        } else {
            Err(FoliodbError::NameInvalid(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_accepts_alphanumeric() {
        assert!(Identifier::new("users42").is_ok());
    }

    #[test]
    fn identifier_rejects_punctuation() {
        assert!(Identifier::new("user-42").is_err());
        assert!(Identifier::new("user_42").is_err());
        assert!(Identifier::new("").is_err());
    }

    #[test]
    fn value_loose_eq_mixes_int_and_float() {
        assert!(Value::Int(4).loosely_eq(&Value::Float(4.0)));
        assert!(!Value::Int(4).loosely_eq(&Value::Float(4.1)));
    }

    #[test]
    fn value_compare_null_first() {
        assert_eq!(Value::Null.compare(&Value::Int(1)), std::cmp::Ordering::Less);
    }

    #[test]
    fn value_json_round_trip() {
        let v = Value::Object(BTreeMap::from([
            ("a".to_string(), Value::Int(1)),
            ("b".to_string(), Value::List(vec![Value::Bool(true), Value::Null])),
        ]));
        let json: serde_json::Value = v.clone().into();
        let back = Value::from(json);
        assert_eq!(v, back);
    }
}
