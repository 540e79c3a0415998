//! Column type registry and per-column validation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// The closed set of column types. Modeled as a tagged variant rather than
/// dynamic dispatch by string name, per the design notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Bool,
    Int,
    Float,
    Number,
    Text,
    List,
    Object,
    Enum,
}

/// A column's full descriptor: its type, whether it is required, whether it
/// is encrypted at rest, and (for `Enum` columns) the allowed value list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub encrypted: bool,
    /// Allowed values for `Enum` columns; ignored for every other type.
    #[serde(default, rename = "args", skip_serializing_if = "Vec::is_empty")]
    pub type_args: Vec<Value>,
}

impl ColumnDescriptor {
    pub fn new(column_type: ColumnType) -> Self {
        Self {
            column_type,
            required: false,
            encrypted: false,
            type_args: Vec::new(),
        }
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    /// Set the allowed value list for an `Enum` column.
    ///
    /// The source this system is grounded on reads `enum_values` back out
    /// of the descriptor it is still constructing, before the list is ever
    /// written — effectively always empty. This implementation takes the
    /// list directly from the caller instead.
    pub fn enum_values(mut self, values: Vec<Value>) -> Self {
        self.type_args = values;
        self
    }

    /// True if `value` satisfies this column's type (and, for `Enum`,
    /// membership).
    pub fn type_matches(&self, value: &Value) -> bool {
        match self.column_type {
            ColumnType::Bool => matches!(value, Value::Bool(_)),
            ColumnType::Int => matches!(value, Value::Int(_)),
            ColumnType::Float => matches!(value, Value::Float(_)),
            ColumnType::Number => matches!(value, Value::Int(_) | Value::Float(_)),
            ColumnType::Text => matches!(value, Value::Text(_)),
            ColumnType::List => matches!(value, Value::List(_)),
            ColumnType::Object => matches!(value, Value::Object(_)),
            ColumnType::Enum => self.type_args.iter().any(|allowed| allowed.loosely_eq(value)),
        }
    }
}

/// An ordered mapping from column name to descriptor. The reserved name
/// `_id` is never a member — it is a logical attribute, not a column.
///
/// `#[serde(transparent)]` so a table's `.metadata` record holds `"schema":
/// {col: {...}, ...}` directly (per `spec.md` §6) rather than wrapping it
/// under a `columns` key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    columns: BTreeMap<String, ColumnDescriptor>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a column. Silently strips any attempt to name a
    /// column `_id`, since `_id` is never part of the schema.
    pub fn add(&mut self, name: impl Into<String>, descriptor: ColumnDescriptor) {
        let name = name.into();
        if name == "_id" {
            return;
        }
        self.columns.insert(name, descriptor);
    }

    pub fn remove(&mut self, name: &str) {
        self.columns.remove(name);
    }

    pub fn get(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.get(name)
    }

    pub fn has_encrypted_columns(&self) -> bool {
        self.columns.values().any(|c| c.encrypted)
    }

    /// Validate `value` against the descriptor for `column`.
    ///
    /// An unknown column is tolerated (stored without type checks, per
    /// spec); `null` is valid for any column that is not `required`.
    pub fn valid(&self, column: &str, value: &Value) -> bool {
        let descriptor = match self.columns.get(column) {
            Some(d) => d,
            None => return true,
        };
        if value.is_null() {
            return !descriptor.required;
        }
        descriptor.type_matches(value)
    }

    /// Column names in ascending lexical order — the order the row codec
    /// and metadata serialization both rely on.
    pub fn sorted_schema(&self) -> Vec<(&str, &ColumnDescriptor)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v)).collect()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(|k| k.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_columns_are_tolerated() {
        let schema = Schema::new();
        assert!(schema.valid("anything", &Value::Text("x".into())));
    }

    #[test]
    fn required_column_rejects_null() {
        let mut schema = Schema::new();
        schema.add("name", ColumnDescriptor::new(ColumnType::Text).required(true));
        assert!(!schema.valid("name", &Value::Null));
        assert!(schema.valid("name", &Value::Text("a".into())));
    }

    #[test]
    fn optional_column_accepts_null() {
        let mut schema = Schema::new();
        schema.add("nickname", ColumnDescriptor::new(ColumnType::Text));
        assert!(schema.valid("nickname", &Value::Null));
    }

    #[test]
    fn type_mismatch_is_invalid() {
        let mut schema = Schema::new();
        schema.add("age", ColumnDescriptor::new(ColumnType::Int));
        assert!(!schema.valid("age", &Value::Text("old".into())));
    }

    #[test]
    fn enum_checks_membership_from_caller_supplied_values() {
        let mut schema = Schema::new();
        schema.add(
            "status",
            ColumnDescriptor::new(ColumnType::Enum)
                .enum_values(vec![Value::Text("processing".into()), Value::Text("done".into())]),
        );
        assert!(schema.valid("status", &Value::Text("processing".into())));
        assert!(!schema.valid("status", &Value::Text("cancelled".into())));
    }

    #[test]
    fn id_is_never_a_column() {
        let mut schema = Schema::new();
        schema.add("_id", ColumnDescriptor::new(ColumnType::Text));
        assert!(schema.get("_id").is_none());
    }

    #[test]
    fn sorted_schema_is_lexical() {
        let mut schema = Schema::new();
        schema.add("zeta", ColumnDescriptor::new(ColumnType::Bool));
        schema.add("alpha", ColumnDescriptor::new(ColumnType::Bool));
        let names: Vec<&str> = schema.sorted_schema().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn schema_serializes_as_a_flat_column_map() {
        let mut schema = Schema::new();
        schema.add("age", ColumnDescriptor::new(ColumnType::Int).required(true));
        let json = serde_json::to_value(&schema).unwrap();
        assert_eq!(json["age"]["type"], "int");
        assert_eq!(json["age"]["required"], true);
        assert!(json.get("columns").is_none());
    }

    #[test]
    fn has_encrypted_columns_detects_any() {
        let mut schema = Schema::new();
        schema.add("plain", ColumnDescriptor::new(ColumnType::Text));
        assert!(!schema.has_encrypted_columns());
        schema.add("secret", ColumnDescriptor::new(ColumnType::Text).encrypted(true));
        assert!(schema.has_encrypted_columns());
    }
}
