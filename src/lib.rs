//! # foliodb — embeddable, file-backed document store
//!
//! foliodb organizes data in a three-level hierarchy — database → table →
//! row — where each row is persisted as its own small file on disk. It
//! provides:
//!
//! - **Durable, atomic single-row writes** via write-temp-then-rename, so
//!   no partially-written row is ever observable after a crash.
//! - **Transparent record-level encryption**, with a user-supplied
//!   key-encryption key wrapping a per-table data-encryption key.
//! - **A declarative query engine** — join, map, where, select, distinct,
//!   sort, filter, and pagination — with a fixed evaluation order.
//! - **A query-result cache**, content-addressed and invalidated wholesale
//!   on any write to the table it was computed from.
//!
//! ## Quick start
//!
//! ```rust
//! use foliodb::{Database, Schema, ColumnDescriptor, ColumnType, Value};
//! use std::collections::BTreeMap;
//!
//! # fn main() -> foliodb::FoliodbResult<()> {
//! let root = std::env::temp_dir().join("foliodb-doctest");
//! let db = Database::open(&root, "shop", None)?;
//!
//! let mut schema = Schema::new();
//! schema.add("username", ColumnDescriptor::new(ColumnType::Text).required(true));
//! let users = db.create_table("users", schema)?;
//!
//! let mut row = BTreeMap::new();
//! row.insert("username".to_string(), Value::Text("johndoe".into()));
//! users.insert(row)?;
//!
//! let found = users.find_one(&[("username", Value::Text("johndoe".into()))])?;
//! assert!(found.is_some());
//! # db.delete_table("users")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module structure
//! - [`value`] — the dynamic `Value` type and the validated `Identifier` newtype
//! - [`schema`] — column type registry and per-column validation
//! - [`crypto`] — KEK/DEK key hierarchy and AEAD encrypt/decrypt
//! - [`io`] — atomic write-via-temp+rename and line-addressed reads
//! - [`row`] — row file codec
//! - [`table`] — row lifecycle and table metadata
//! - [`database`] — table lifecycle and database metadata
//! - [`cache`] — content-addressed query-result cache
//! - [`query`] — the declarative query builder and evaluator
//! - [`collection`] — windowed iteration over a materialized result set
//! - [`backup`] — archive/restore of the on-disk layout

pub mod backup;
pub mod cache;
pub mod collection;
pub mod crypto;
pub mod database;
pub mod error;
pub mod io;
pub mod logging;
pub mod query;
pub mod row;
pub mod schema;
pub mod table;
pub mod value;

pub use backup::Backup;
pub use collection::Collection;
pub use crypto::Kek;
pub use database::Database;
pub use error::{FoliodbError, FoliodbResult};
pub use query::{Query, SortOrder};
pub use row::Row;
pub use schema::{ColumnDescriptor, ColumnType, Schema};
pub use table::Table;
pub use value::{Identifier, Value};
