//! Deterministic, content-addressed cache of query results.
//!
//! One file per `(table, canonical query payload)` pair, stored gzip-
//! compressed under `<storage>/<db>/.cache/<table>/<hash>`. Any write to a
//! table flushes its entire cache namespace — there is no fine-grained
//! invalidation, only whole-table invalidation, per the design.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

use crate::error::FoliodbResult;
use crate::io;
use crate::value::Identifier;

/// A handle to one table's cache namespace, or a single entry within it
/// once keyed by a query payload.
pub struct Cache {
    table_dir: PathBuf,
}

impl Cache {
    pub(crate) fn for_table(table_dir: &Path, _table_name: &Identifier) -> Self {
        // The cache lives as a sibling of the table directory: <db>/.cache/<table>/
        let db_dir = table_dir.parent().unwrap_or(table_dir);
        let table_name = table_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("table");
        Self {
            table_dir: db_dir.join(".cache").join(table_name),
        }
    }

    /// Compute the cache key for a canonicalized query payload: the hex
    /// SHA-256 of its canonical JSON representation.
    pub fn key_for_payload(payload: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(payload.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.table_dir.join(key)
    }

    /// True iff a cache entry exists for `key` and (if `expiration` is set)
    /// its mtime is within the window. An expired entry is unlinked as a
    /// side effect and counted as a miss.
    pub fn valid(&self, key: &str, expiration: Option<Duration>) -> FoliodbResult<bool> {
        let path = self.entry_path(key);
        let metadata = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if let Some(window) = expiration {
            let modified = metadata.modified()?;
            let age = std::time::SystemTime::now()
                .duration_since(modified)
                .unwrap_or_default();
            if age >= window {
                let _ = std::fs::remove_file(&path);
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Gzip-compress and atomically write the serialized `data` under
    /// `key`, creating the cache directory tree if needed.
    pub fn put<T: Serialize>(&self, key: &str, data: &T) -> FoliodbResult<()> {
        let json = serde_json::to_vec(data)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json)?;
        let compressed = encoder.finish()?;
        io::atomic_write(&self.entry_path(key), &compressed)
    }

    /// Decompress and deserialize the entry stored under `key`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> FoliodbResult<T> {
        let compressed = io::read_all(&self.entry_path(key))?;
        let decoder = GzDecoder::new(compressed.as_slice());
        let json = io::read_to_end(decoder)?;
        Ok(serde_json::from_slice(&json)?)
    }

    /// Recursively remove this table's cache namespace.
    pub fn flush(&self) -> FoliodbResult<()> {
        io::remove_tree(&self.table_dir)
    }
}
