//! Database — table lifecycle, database metadata, and storage-root
//! management.
//!
//! A `Database` is constructed against a `storage_root` directory and an
//! optional KEK; it owns no in-memory table state beyond the key — every
//! `Table` it hands out re-reads its own metadata on demand.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::crypto::Kek;
use crate::error::{FoliodbError, FoliodbResult};
use crate::io;
use crate::query::Query;
use crate::schema::Schema;
use crate::table::{self, Table};
use crate::value::Identifier;
use tracing::instrument;

const METADATA_FILE: &str = ".metadata";
const VERSION: &str = "foliodb-aead-v1";

#[derive(Debug, Serialize, Deserialize)]
struct DatabaseMetadata {
    created: u64,
    version: String,
}

/// A database: a directory under a storage root holding a `.metadata`
/// record and zero or more table subdirectories.
pub struct Database {
    name: Identifier,
    dir: PathBuf,
    kek: Option<Kek>,
}

impl Database {
    /// Open (constructing if missing) the database `name` under
    /// `storage_root`. Writes `{created, version}` metadata on first
    /// construction. The KEK, if any, is held only for the lifetime of the
    /// returned handle — never logged, cached, or persisted.
    #[instrument(skip(kek))]
    pub fn open(storage_root: &Path, name: &str, kek: Option<Kek>) -> FoliodbResult<Self> {
        let name = Identifier::new(name)?;
        let dir = storage_root.join(name.as_str());
        let metadata_path = dir.join(METADATA_FILE);

        if !metadata_path.is_file() {
            tracing::info!(database = %name, "creating new database");
            std::fs::create_dir_all(&dir)?;
            let created = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            io::write_json(
                &metadata_path,
                &DatabaseMetadata {
                    created,
                    version: VERSION.to_string(),
                },
            )?;
        }

        Ok(Self { name, dir, kek })
    }

    pub fn name(&self) -> &Identifier {
        &self.name
    }

    fn table_dir(&self, name: &Identifier) -> PathBuf {
        self.dir.join(name.as_str())
    }

    /// Create a table with the given schema. A fresh wrapped DEK is
    /// generated iff the schema has any `encrypted` column, which requires
    /// a KEK to have been configured on this database. Rolls back the
    /// partially-created directory on failure.
    pub fn create_table(&self, name: &str, schema: Schema) -> FoliodbResult<Table> {
        let name = Identifier::new(name)?;
        tracing::debug!(database = %self.name, table = %name, "creating table");
        let dir = self.table_dir(&name);
        table::create(dir, name, schema, self.kek.as_ref())
    }

    /// Open an existing table. Fails `NotFound` if its directory or
    /// metadata record is absent.
    pub fn table(&self, name: &str) -> FoliodbResult<Table> {
        let name = Identifier::new(name)?;
        let dir = self.table_dir(&name);
        if !table::exists(&dir) {
            return Err(FoliodbError::NotFound(format!("table '{name}'")));
        }
        Table::open(dir, name, self.kek.clone())
    }

    /// Enumerate table names under this database, excluding any in
    /// `exclude` and any reserved `.`-prefixed directory (`.cache`,
    /// `.deleted_*`).
    pub fn tables(&self, exclude: &[Identifier]) -> FoliodbResult<Vec<Identifier>> {
        let mut names = Vec::new();
        if !self.dir.exists() {
            return Ok(names);
        }
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let stem = match path.file_name().and_then(|n| n.to_str()) {
                Some(s) => s,
                None => continue,
            };
            if let Ok(name) = Identifier::new(stem) {
                if table::exists(&path) && !exclude.contains(&name) {
                    names.push(name);
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Rename table `from` to `to`. Fails `NotFound` if `from` does not
    /// exist; fails `Internal` if `to` already exists.
    pub fn rename_table(&self, from: &str, to: &str) -> FoliodbResult<()> {
        let from = Identifier::new(from)?;
        let to = Identifier::new(to)?;
        let from_dir = self.table_dir(&from);
        let to_dir = self.table_dir(&to);
        if !table::exists(&from_dir) {
            return Err(FoliodbError::NotFound(format!("table '{from}'")));
        }
        if to_dir.exists() {
            return Err(FoliodbError::Internal(format!(
                "table '{to}' already exists"
            )));
        }
        std::fs::rename(&from_dir, &to_dir)?;
        Ok(())
    }

    /// Delete table `name`: tombstone-rename then recursively remove, and
    /// flush its cache namespace. A no-op if the table does not exist.
    pub fn delete_table(&self, name: &str) -> FoliodbResult<()> {
        let name = Identifier::new(name)?;
        tracing::info!(database = %self.name, table = %name, "deleting table");
        let dir = self.table_dir(&name);
        table::delete(&dir, &name)
    }

    /// Rename this database itself to `new_name`, moving its storage
    /// directory (tables, metadata, and cache namespaces all travel with
    /// it) and returning a handle reflecting the new name. Fails
    /// `Internal` if a database already occupies `new_name`.
    pub fn rename(self, new_name: &str) -> FoliodbResult<Self> {
        let new_name = Identifier::new(new_name)?;
        let parent = self.dir.parent().ok_or_else(|| {
            FoliodbError::Internal(format!("database dir '{}' has no parent", self.dir.display()))
        })?;
        let new_dir = parent.join(new_name.as_str());
        if new_dir.exists() {
            return Err(FoliodbError::Internal(format!(
                "database '{new_name}' already exists"
            )));
        }
        std::fs::rename(&self.dir, &new_dir)?;
        Ok(Self {
            name: new_name,
            dir: new_dir,
            kek: self.kek,
        })
    }

    /// Delete this database: tombstone-rename then recursively remove the
    /// whole storage directory.
    pub fn delete(self) -> FoliodbResult<()> {
        if !self.dir.exists() {
            return Ok(());
        }
        let parent = self.dir.parent().ok_or_else(|| {
            FoliodbError::Internal(format!("database dir '{}' has no parent", self.dir.display()))
        })?;
        let tombstone = parent.join(format!(".deleted_{}", self.name));
        std::fs::rename(&self.dir, &tombstone)?;
        io::remove_tree(&tombstone)
    }

    /// Build a query against `table`, equivalent to `self.table(table)?.query()`
    /// but convenient when the caller only needs the query, not the handle.
    pub fn query<'a>(&self, table: &'a Table) -> Query<'a> {
        table.query()
    }

    /// Remove stale `*.wal.*` temp files anywhere under this database older
    /// than `older_than`, left behind by writes interrupted before their
    /// rename. Never invoked automatically; callers opt in explicitly.
    pub fn sweep_stale_writes(&self, older_than: Duration) -> FoliodbResult<usize> {
        io::sweep_stale_writes(&self.dir, older_than)
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }
}
