//! Row codec — a row file is a newline-delimited JSON sequence:
//!
//! ```text
//! line 0:   JSON array of column names, sorted, never including `_id`
//! line i+1: JSON-encoded value for column i; encrypted columns hold a
//!           JSON string containing the base64 AEAD blob
//! ```
//!
//! `_id` is a logical attribute carried as the filename stem — it is never
//! written into the row file itself.

use std::collections::BTreeMap;
use std::path::Path;

use crate::crypto::Dek;
use crate::error::{FoliodbError, FoliodbResult};
use crate::io;
use crate::schema::Schema;
use crate::value::{Identifier, Value};

/// An in-memory row: its id plus its column values.
#[derive(Debug, Clone)]
pub struct Row {
    pub id: Identifier,
    pub columns: BTreeMap<String, Value>,
}

impl Row {
    pub fn new(id: Identifier) -> Self {
        Self {
            id,
            columns: BTreeMap::new(),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }
}

/// Encode `row` into the NDJSON wire format, encrypting any column the
/// schema marks `encrypted` under `dek`.
///
/// Requires `dek` whenever the schema has at least one encrypted column;
/// callers are expected to have already resolved that requirement (see
/// `Table::insert`'s `CryptoRequired` check) before calling this.
pub fn encode(row: &Row, schema: &Schema, dek: Option<&Dek>) -> FoliodbResult<String> {
    let mut names: Vec<&str> = row.columns.keys().map(|k| k.as_str()).collect();
    names.sort_unstable();

    let header = serde_json::to_string(&names)?;
    let mut out = String::new();
    out.push_str(&header);
    out.push('\n');

    for name in &names {
        let value = &row.columns[*name];
        let encrypted = schema.get(name).map(|d| d.encrypted).unwrap_or(false);
        let line = if encrypted {
            let dek = dek.ok_or_else(|| {
                FoliodbError::CryptoRequired(format!("column '{name}' is encrypted"))
            })?;
            let blob = dek.encrypt(value)?;
            serde_json::to_string(&blob)?
        } else {
            serde_json::to_string(value)?
        };
        out.push_str(&line);
        out.push('\n');
    }

    Ok(out)
}

/// Decode a full row file.
pub fn decode(
    id: Identifier,
    bytes: &[u8],
    schema: &Schema,
    dek: Option<&Dek>,
) -> FoliodbResult<Row> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| FoliodbError::Internal(format!("row file is not valid UTF-8: {e}")))?;
    let mut lines = text.lines();

    let header = lines
        .next()
        .ok_or_else(|| FoliodbError::Internal("row file missing header line".to_string()))?;
    let names: Vec<String> = serde_json::from_str(header)?;

    let mut row = Row::new(id);
    for name in names {
        let line = lines.next().ok_or_else(|| {
            FoliodbError::Internal(format!("row file missing value line for '{name}'"))
        })?;
        let encrypted = schema.get(&name).map(|d| d.encrypted).unwrap_or(false);
        let value = if encrypted {
            let dek = dek.ok_or_else(|| {
                FoliodbError::CryptoRequired(format!("column '{name}' is encrypted"))
            })?;
            let blob: String = serde_json::from_str(line)?;
            dek.decrypt(&blob)?
        } else {
            let json: serde_json::Value = serde_json::from_str(line)?;
            Value::from(json)
        };
        row.columns.insert(name, value);
    }

    Ok(row)
}

/// Read a single column's value without decoding the whole row file — finds
/// the column's index on the header line, then fetches only that value
/// line.
pub fn read_column(
    path: &Path,
    column: &str,
    schema: &Schema,
    dek: Option<&Dek>,
) -> FoliodbResult<Option<Value>> {
    let header = match io::read_line(path, 0)? {
        Some(h) => h,
        None => return Ok(None),
    };
    let names: Vec<String> = serde_json::from_str(&header)?;
    let index = match names.iter().position(|n| n == column) {
        Some(i) => i,
        None => return Ok(None),
    };
    let line = match io::read_line(path, index + 1)? {
        Some(l) => l,
        None => return Ok(None),
    };

    let encrypted = schema.get(column).map(|d| d.encrypted).unwrap_or(false);
    let value = if encrypted {
        let dek = dek.ok_or_else(|| {
            FoliodbError::CryptoRequired(format!("column '{column}' is encrypted"))
        })?;
        let blob: String = serde_json::from_str(&line)?;
        dek.decrypt(&blob)?
    } else {
        let json: serde_json::Value = serde_json::from_str(&line)?;
        Value::from(json)
    };
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDescriptor, ColumnType};
    use tempfile::tempdir;

    fn sample_row() -> Row {
        let mut row = Row::new(Identifier::new("row1").unwrap());
        row.columns.insert("age".into(), Value::Int(30));
        row.columns.insert("name".into(), Value::Text("Ada".into()));
        row
    }

    #[test]
    fn encode_decode_round_trip_plaintext() {
        let schema = Schema::new();
        let row = sample_row();
        let encoded = encode(&row, &schema, None).unwrap();
        let decoded = decode(row.id.clone(), encoded.as_bytes(), &schema, None).unwrap();
        assert_eq!(decoded.columns, row.columns);
    }

    #[test]
    fn header_line_is_sorted_column_names() {
        let schema = Schema::new();
        let row = sample_row();
        let encoded = encode(&row, &schema, None).unwrap();
        let header = encoded.lines().next().unwrap();
        assert_eq!(header, r#"["age","name"]"#);
    }

    #[test]
    fn encrypted_column_is_not_plaintext_on_disk() {
        let mut schema = Schema::new();
        schema.add("age", ColumnDescriptor::new(ColumnType::Int).encrypted(true));
        let dek = Dek::generate();
        let row = sample_row();

        let encoded = encode(&row, &schema, Some(&dek)).unwrap();
        let lines: Vec<&str> = encoded.lines().collect();
        // age is the first column in sorted order -> line 1
        assert!(!lines[1].contains("30"));

        let decoded = decode(row.id.clone(), encoded.as_bytes(), &schema, Some(&dek)).unwrap();
        assert_eq!(decoded.columns.get("age"), Some(&Value::Int(30)));
    }

    #[test]
    fn encrypted_column_without_dek_fails() {
        let mut schema = Schema::new();
        schema.add("age", ColumnDescriptor::new(ColumnType::Int).encrypted(true));
        let row = sample_row();
        assert!(encode(&row, &schema, None).is_err());
    }

    #[test]
    fn read_column_fetches_single_value_without_full_decode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("row1.ndjson");
        let schema = Schema::new();
        let row = sample_row();
        let encoded = encode(&row, &schema, None).unwrap();
        io::atomic_write(&path, encoded.as_bytes()).unwrap();

        let value = read_column(&path, "name", &schema, None).unwrap();
        assert_eq!(value, Some(Value::Text("Ada".into())));

        let missing = read_column(&path, "nope", &schema, None).unwrap();
        assert_eq!(missing, None);
    }
}
