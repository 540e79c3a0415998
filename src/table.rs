//! Table — row lifecycle, table metadata, and the table's data-encryption
//! key.
//!
//! A table exists iff its directory exists on disk and holds a `.metadata`
//! record. The table owns the KEK→DEK unwrap for its encrypted columns; a
//! `Row` is a lightweight value that goes back through the table for any
//! operation that needs schema or key material (see `Database → Table →
//! Row` context-struct note in the design doc).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::cache::Cache;
use crate::crypto::{self, Dek, Kek};
use crate::error::{FoliodbError, FoliodbResult};
use crate::io;
use crate::query::Query;
use crate::row::{self, Row};
use crate::schema::Schema;
use crate::value::{Identifier, Value};

const ROW_EXTENSION: &str = "ndjson";
const METADATA_FILE: &str = ".metadata";

#[derive(Debug, Serialize, Deserialize)]
struct TableMetadata {
    created: u64,
    schema: Schema,
    #[serde(default)]
    dek: String,
}

/// The outcome of a single row write inside `insert_many`.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Inserted(Identifier),
    Failed(String),
}

/// A table: a directory under a database's storage root holding a
/// `.metadata` record and zero or more row files.
pub struct Table {
    name: Identifier,
    dir: PathBuf,
    kek: Option<Kek>,
}

impl Table {
    pub(crate) fn open(dir: PathBuf, name: Identifier, kek: Option<Kek>) -> FoliodbResult<Self> {
        Ok(Self { name, dir, kek })
    }

    pub fn name(&self) -> &Identifier {
        &self.name
    }

    fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    fn row_path(&self, id: &Identifier) -> PathBuf {
        self.dir.join(format!("{}.{ROW_EXTENSION}", id.as_str()))
    }

    fn metadata(&self) -> FoliodbResult<TableMetadata> {
        io::read_json(&self.metadata_path())
    }

    fn write_metadata(&self, metadata: &TableMetadata) -> FoliodbResult<()> {
        io::write_json(&self.metadata_path(), metadata)
    }

    pub fn schema(&self) -> FoliodbResult<Schema> {
        Ok(self.metadata()?.schema)
    }

    /// Unwrap this table's DEK using the configured KEK. Returns
    /// `CryptoRequired` if no KEK is configured, `CryptoFailed` if the KEK
    /// does not unwrap the stored DEK.
    fn dek(&self) -> FoliodbResult<Dek> {
        let metadata = self.metadata()?;
        if metadata.dek.is_empty() {
            return Err(FoliodbError::CryptoRequired(format!(
                "table '{}' has no wrapped DEK",
                self.name
            )));
        }
        let kek = self.kek.as_ref().ok_or_else(|| {
            FoliodbError::CryptoRequired(format!(
                "table '{}' has encrypted columns but no KEK was supplied",
                self.name
            ))
        })?;
        kek.unwrap_dek(&metadata.dek)
    }

    /// The DEK if the schema has any encrypted column, else `None` — used
    /// so unencrypted tables never require a KEK at all.
    fn dek_if_needed(&self, schema: &Schema) -> FoliodbResult<Option<Dek>> {
        if schema.has_encrypted_columns() {
            Ok(Some(self.dek()?))
        } else {
            Ok(None)
        }
    }

    pub(crate) fn cache(&self) -> Cache {
        Cache::for_table(&self.dir, &self.name)
    }

    /// Insert a row.
    ///
    /// If `columns` supplies an explicit `_id`: the row must already exist
    /// on disk, or this fails `NotFound`; existing columns are merged with
    /// the supplied ones (an update). Without an explicit `_id`, a fresh
    /// unused id is generated.
    ///
    /// Every column is validated against the schema; validation failure is
    /// `SchemaViolation`. If the schema has any encrypted column, a KEK
    /// must be configured and must successfully unwrap the table's DEK.
    /// On success, the table's cache namespace is flushed.
    pub fn insert(&self, columns: BTreeMap<String, Value>) -> FoliodbResult<Identifier> {
        let schema = self.schema()?;
        let mut columns = columns;
        let explicit_id = columns.remove("_id");

        let (id, mut merged) = match explicit_id {
            Some(Value::Text(raw)) => {
                let id = Identifier::new(raw)?;
                let path = self.row_path(&id);
                if !path.exists() {
                    return Err(FoliodbError::NotFound(format!(
                        "row '{id}' does not exist in table '{}'",
                        self.name
                    )));
                }
                let dek = self.dek_if_needed(&schema)?;
                let existing = row::decode(id.clone(), &io::read_all(&path)?, &schema, dek.as_ref())?;
                (id, existing.columns)
            }
            Some(other) => {
                return Err(FoliodbError::SchemaViolation(format!(
                    "_id must be text, got {other}"
                )));
            }
            None => {
                let id = self.fresh_id()?;
                (id, BTreeMap::new())
            }
        };

        for (name, value) in columns.drain() {
            merged.insert(name, value);
        }

        for (name, value) in &merged {
            if !schema.valid(name, value) {
                return Err(FoliodbError::SchemaViolation(format!(
                    "column '{name}' does not satisfy its schema"
                )));
            }
        }

        let dek = self.dek_if_needed(&schema)?;
        let row = Row {
            id: id.clone(),
            columns: merged,
        };
        let encoded = row::encode(&row, &schema, dek.as_ref())?;
        io::atomic_write(&self.row_path(&id), encoded.as_bytes())?;
        self.cache().flush()?;
        tracing::debug!(table = %self.name, row = %id, "row written, cache flushed");
        Ok(id)
    }

    /// Best-effort insert of multiple records; failures in one row do not
    /// abort the rest (§4.5: non-atomic across rows, documented non-goal).
    pub fn insert_many(
        &self,
        records: Vec<BTreeMap<String, Value>>,
    ) -> Vec<InsertOutcome> {
        records
            .into_iter()
            .map(|record| match self.insert(record) {
                Ok(id) => InsertOutcome::Inserted(id),
                Err(e) => InsertOutcome::Failed(e.to_string()),
            })
            .collect()
    }

    fn fresh_id(&self) -> FoliodbResult<Identifier> {
        for _ in 0..64 {
            let candidate = crypto::random_id(12);
            let id = Identifier::new(candidate)?;
            if !self.row_path(&id).exists() {
                return Ok(id);
            }
        }
        Err(FoliodbError::Internal(
            "could not generate an unused row id".to_string(),
        ))
    }

    /// Fetch a single row by id, or `None` if it does not exist.
    pub fn row(&self, id: &Identifier) -> FoliodbResult<Option<Row>> {
        let path = self.row_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let schema = self.schema()?;
        let dek = self.dek_if_needed(&schema)?;
        let row = row::decode(id.clone(), &io::read_all(&path)?, &schema, dek.as_ref())?;
        Ok(Some(row))
    }

    /// Enumerate every row id in this table, excluding any name in
    /// `exclude`.
    pub fn rows(&self, exclude: &[Identifier]) -> FoliodbResult<Vec<Identifier>> {
        let mut ids = Vec::new();
        if !self.dir.exists() {
            return Ok(ids);
        }
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ROW_EXTENSION) {
                continue;
            }
            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(s) => s,
                None => continue,
            };
            if let Ok(id) = Identifier::new(stem) {
                if !exclude.contains(&id) {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Build a `Query` pre-seeded with `=` predicates from `criteria`, cache
    /// disabled, limit 1.
    pub fn find_one(&self, criteria: &[(&str, Value)]) -> FoliodbResult<Option<Row>> {
        let mut query = self.query().no_cache();
        for (col, value) in criteria {
            query = query.r#where(col, "=", value.clone());
        }
        let collection = query.limit(1, 0).run()?;
        Ok(collection.into_rows().into_iter().next())
    }

    /// Build a `Query` pre-seeded with `=` predicates from `criteria`,
    /// cache disabled.
    pub fn find(&self, criteria: &[(&str, Value)]) -> FoliodbResult<Vec<Row>> {
        let mut query = self.query().no_cache();
        for (col, value) in criteria {
            query = query.r#where(col, "=", value.clone());
        }
        Ok(query.run()?.into_rows())
    }

    /// Merge `columns` into the existing row `id` and re-validate and
    /// rewrite. Fails `NotFound` if the row does not exist.
    pub fn update(&self, id: &Identifier, columns: BTreeMap<String, Value>) -> FoliodbResult<()> {
        if self.row(id)?.is_none() {
            return Err(FoliodbError::NotFound(format!(
                "row '{id}' does not exist in table '{}'",
                self.name
            )));
        }
        let mut with_id = columns;
        with_id.insert("_id".to_string(), Value::Text(id.as_str().to_string()));
        self.insert(with_id)?;
        Ok(())
    }

    /// Delete row `id`. A no-op (not an error) if it does not exist.
    pub fn delete_row(&self, id: &Identifier) -> FoliodbResult<()> {
        let path = self.row_path(id);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        self.cache().flush()?;
        Ok(())
    }

    /// Delete this table: rename its directory to a `.deleted_<name>`
    /// tombstone, remove that tombstone tree, then flush its cache
    /// namespace.
    pub fn delete(self) -> FoliodbResult<()> {
        delete(&self.dir, &self.name)
    }

    /// Rewrite the table's schema. `_id` is forcibly stripped from it (it
    /// is never a column). Existing rows are not rewritten; the new schema
    /// applies starting with the next write.
    pub fn alter(&self, mut schema: Schema) -> FoliodbResult<()> {
        schema.remove("_id");
        let mut metadata = self.metadata()?;
        metadata.schema = schema;
        self.write_metadata(&metadata)
    }

    pub fn query(&self) -> Query<'_> {
        Query::new(self)
    }

    pub(crate) fn read_row_for_query(&self, id: &Identifier) -> FoliodbResult<Row> {
        self.row(id)?.ok_or_else(|| {
            FoliodbError::Internal(format!("row '{id}' vanished mid-query"))
        })
    }
}

pub(crate) fn create(
    dir: PathBuf,
    name: Identifier,
    schema: Schema,
    kek: Option<&Kek>,
) -> FoliodbResult<Table> {
    if dir.exists() {
        return Err(FoliodbError::Internal(format!(
            "table directory '{}' already exists",
            dir.display()
        )));
    }
    let result = (|| -> FoliodbResult<()> {
        std::fs::create_dir_all(&dir)?;
        let dek = if schema.has_encrypted_columns() {
            let kek = kek.ok_or_else(|| {
                FoliodbError::CryptoRequired(format!(
                    "table '{name}' has encrypted columns but no KEK was supplied"
                ))
            })?;
            kek.wrap_dek(&Dek::generate())?
        } else {
            String::new()
        };
        let created = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let metadata = TableMetadata {
            created,
            schema,
            dek,
        };
        io::write_json(&dir.join(METADATA_FILE), &metadata)
    })();

    if let Err(e) = result {
        let _ = io::remove_tree(&dir);
        return Err(e);
    }

    Table::open(dir, name, kek.cloned())
}

pub(crate) fn exists(dir: &Path) -> bool {
    dir.join(METADATA_FILE).is_file()
}

pub(crate) fn delete(dir: &Path, name: &Identifier) -> FoliodbResult<()> {
    if !dir.exists() {
        return Ok(());
    }
    let parent = dir.parent().ok_or_else(|| {
        FoliodbError::Internal(format!("table dir '{}' has no parent", dir.display()))
    })?;
    let tombstone = parent.join(format!(".deleted_{name}"));
    std::fs::rename(dir, &tombstone)?;
    io::remove_tree(&tombstone)?;
    Cache::for_table(dir, name).flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDescriptor, ColumnType};
    use tempfile::tempdir;

    fn open_table(dir: &Path, schema: Schema, kek: Option<Kek>) -> Table {
        create(
            dir.join("users"),
            Identifier::new("users").unwrap(),
            schema,
            kek.as_ref(),
        )
        .unwrap()
    }

    #[test]
    fn insert_without_id_generates_one_and_find_one_locates_it() {
        let dir = tempdir().unwrap();
        let table = open_table(dir.path(), Schema::new(), None);
        let mut row = BTreeMap::new();
        row.insert("username".to_string(), Value::Text("johndoe".into()));
        row.insert("user_id".to_string(), Value::Int(101));
        table.insert(row).unwrap();

        let found = table
            .find_one(&[("username", Value::Text("johndoe".into()))])
            .unwrap()
            .unwrap();
        assert_eq!(found.get("user_id"), Some(&Value::Int(101)));
    }

    #[test]
    fn insert_with_unknown_explicit_id_is_not_found() {
        let dir = tempdir().unwrap();
        let table = open_table(dir.path(), Schema::new(), None);
        let mut row = BTreeMap::new();
        row.insert("_id".to_string(), Value::Text("ghost123".into()));
        assert!(matches!(table.insert(row), Err(FoliodbError::NotFound(_))));
    }

    #[test]
    fn insert_with_existing_id_merges_and_updates() {
        let dir = tempdir().unwrap();
        let table = open_table(dir.path(), Schema::new(), None);
        let mut row = BTreeMap::new();
        row.insert("name".to_string(), Value::Text("Ada".into()));
        row.insert("age".to_string(), Value::Int(30));
        let id = table.insert(row).unwrap();

        let mut update = BTreeMap::new();
        update.insert("_id".to_string(), Value::Text(id.as_str().to_string()));
        update.insert("age".to_string(), Value::Int(31));
        table.insert(update).unwrap();

        let row = table.row(&id).unwrap().unwrap();
        assert_eq!(row.get("name"), Some(&Value::Text("Ada".into())));
        assert_eq!(row.get("age"), Some(&Value::Int(31)));
    }

    #[test]
    fn schema_violation_rejects_wrong_type() {
        let dir = tempdir().unwrap();
        let mut schema = Schema::new();
        schema.add("age", ColumnDescriptor::new(ColumnType::Int));
        let table = open_table(dir.path(), schema, None);
        let mut row = BTreeMap::new();
        row.insert("age".to_string(), Value::Text("old".into()));
        assert!(matches!(
            table.insert(row),
            Err(FoliodbError::SchemaViolation(_))
        ));
    }

    #[test]
    fn encrypted_column_requires_kek() {
        let dir = tempdir().unwrap();
        let mut schema = Schema::new();
        schema.add(
            "credit_card",
            ColumnDescriptor::new(ColumnType::Text).encrypted(true),
        );
        let kek = Kek::derive(b"s3cret");
        let table = open_table(dir.path(), schema, Some(kek.clone()));

        let mut row = BTreeMap::new();
        row.insert("credit_card".to_string(), Value::Text("4111-1111".into()));
        let id = table.insert(row).unwrap();

        let path = dir.path().join("users").join(format!("{id}.ndjson"));
        let on_disk = std::fs::read_to_string(&path).unwrap();
        assert!(!on_disk.contains("4111-1111"));

        let found = table.row(&id).unwrap().unwrap();
        assert_eq!(found.get("credit_card"), Some(&Value::Text("4111-1111".into())));

        let wrong_table = Table::open(
            dir.path().join("users"),
            Identifier::new("users").unwrap(),
            Some(Kek::derive(b"wrong")),
        )
        .unwrap();
        assert!(matches!(
            wrong_table.row(&id),
            Err(FoliodbError::CryptoFailed(_))
        ));
    }

    #[test]
    fn delete_row_is_idempotent() {
        let dir = tempdir().unwrap();
        let table = open_table(dir.path(), Schema::new(), None);
        let mut row = BTreeMap::new();
        row.insert("x".to_string(), Value::Int(1));
        let id = table.insert(row).unwrap();
        table.delete_row(&id).unwrap();
        assert!(table.row(&id).unwrap().is_none());
        table.delete_row(&id).unwrap();
    }

    #[test]
    fn delete_whole_table_removes_directory() {
        let dir = tempdir().unwrap();
        let table_dir = dir.path().join("users");
        let table = open_table(dir.path(), Schema::new(), None);
        table.delete().unwrap();
        assert!(!table_dir.exists());
    }

    #[test]
    fn alter_strips_id_and_persists_new_schema() {
        let dir = tempdir().unwrap();
        let table = open_table(dir.path(), Schema::new(), None);
        let mut schema = Schema::new();
        schema.add("_id", ColumnDescriptor::new(ColumnType::Text));
        schema.add("nickname", ColumnDescriptor::new(ColumnType::Text));
        table.alter(schema).unwrap();
        let persisted = table.schema().unwrap();
        assert!(persisted.get("_id").is_none());
        assert!(persisted.get("nickname").is_some());
    }
}
