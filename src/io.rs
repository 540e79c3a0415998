//! Path/IO layer — atomic write-via-temp+rename, line-addressed reads,
//! directory composition, recursive removal.
//!
//! Every write in this crate passes through [`atomic_write`]. Its contract:
//! a reader of `path` observes either the content that was there before the
//! call, or the full new content — never a truncated or interleaved state.
//! This holds given a filesystem with atomic same-directory rename
//! (POSIX-like semantics), which is assumed throughout.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use rand::RngCore;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::FoliodbResult;

/// Join a base directory with a single path segment, rejecting any segment
/// that would escape the base (defense in depth — callers are expected to
/// have already validated the segment as an [`crate::value::Identifier`]).
pub fn join(base: &Path, segment: &str) -> PathBuf {
    base.join(segment)
}

/// Write `bytes` to `path` atomically.
///
/// Writes to `<path>.wal.<random>` in the same directory, acquires an
/// exclusive advisory lock on that temp file, writes the full content,
/// flushes and fsyncs, releases the lock, then renames over `path`. On any
/// failure after the temp file is created, the temp file is removed and the
/// error is returned; `path` is left untouched.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> FoliodbResult<()> {
    let parent = path.parent().ok_or_else(|| {
        crate::error::FoliodbError::IoFailure(format!("{} has no parent directory", path.display()))
    })?;
    fs::create_dir_all(parent)?;

    let mut suffix = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut suffix);
    let temp_name = format!(
        "{}.wal.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("row"),
        hex_encode(&suffix)
    );
    let temp_path = parent.join(temp_name);

    let result = write_via_temp(&temp_path, bytes);
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result?;

    fs::rename(&temp_path, path)?;
    Ok(())
}

fn write_via_temp(temp_path: &Path, bytes: &[u8]) -> FoliodbResult<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(temp_path)?;
    file.lock_exclusive()?;
    file.write_all(bytes)?;
    file.sync_all()?;
    file.unlock()?;
    Ok(())
}

/// Read the full contents of `path`.
pub fn read_all(path: &Path) -> FoliodbResult<Vec<u8>> {
    Ok(fs::read(path)?)
}

/// Read the Nth newline-delimited record of `path` without loading the
/// entire file into memory.
pub fn read_line(path: &Path, index: usize) -> FoliodbResult<Option<String>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    for (i, line) in reader.lines().enumerate() {
        if i == index {
            return Ok(Some(line?));
        }
    }
    Ok(None)
}

/// Read every newline-delimited record of `path`.
pub fn read_lines(path: &Path) -> FoliodbResult<Vec<String>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut lines = Vec::new();
    for line in reader.lines() {
        lines.push(line?);
    }
    Ok(lines)
}

/// Serialize `value` as JSON and write it atomically.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> FoliodbResult<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write(path, &bytes)
}

/// Read and deserialize a JSON file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> FoliodbResult<T> {
    let bytes = read_all(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Recursively remove a directory tree. A no-op (not an error) if the path
/// does not exist.
pub fn remove_tree(path: &Path) -> FoliodbResult<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Sweep stale `*.wal.*` temp files under `dir` older than `older_than`,
/// left behind by a write that was interrupted before its rename. This is
/// never invoked automatically — §5 of the design forbids background
/// tasks — callers opt in explicitly.
pub fn sweep_stale_writes(dir: &Path, older_than: std::time::Duration) -> FoliodbResult<usize> {
    let mut removed = 0;
    if !dir.exists() {
        return Ok(0);
    }
    let now = std::time::SystemTime::now();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            removed += sweep_stale_writes(&path, older_than)?;
            continue;
        }
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => continue,
        };
        if !name.contains(".wal.") {
            continue;
        }
        let metadata = entry.metadata()?;
        let modified = metadata.modified()?;
        if now.duration_since(modified).unwrap_or_default() >= older_than {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Read a byte buffer via a generic reader, used by the cache layer when
/// decompressing gzip payloads.
pub fn read_to_end(mut reader: impl Read) -> FoliodbResult<Vec<u8>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn atomic_write_then_read_all() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("row.ndjson");
        atomic_write(&path, b"hello\nworld\n").unwrap();
        assert_eq!(read_all(&path).unwrap(), b"hello\nworld\n");
    }

    #[test]
    fn atomic_write_overwrites_fully() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("row.ndjson");
        atomic_write(&path, b"line0\nline1\nline2\n").unwrap();
        atomic_write(&path, b"short\n").unwrap();
        assert_eq!(read_all(&path).unwrap(), b"short\n");
    }

    #[test]
    fn no_temp_file_survives_a_successful_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("row.ndjson");
        atomic_write(&path, b"data\n").unwrap();
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".wal."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn read_line_fetches_single_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("row.ndjson");
        atomic_write(&path, b"a\nb\nc\n").unwrap();
        assert_eq!(read_line(&path, 1).unwrap(), Some("b".to_string()));
        assert_eq!(read_line(&path, 5).unwrap(), None);
    }

    #[test]
    fn read_lines_returns_all_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("row.ndjson");
        atomic_write(&path, b"a\nb\nc").unwrap();
        assert_eq!(read_lines(&path).unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn json_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta.json");
        let value = serde_json::json!({"created": 1, "version": "1.0"});
        write_json(&path, &value).unwrap();
        let read: serde_json::Value = read_json(&path).unwrap();
        assert_eq!(read, value);
    }

    #[test]
    fn remove_tree_is_idempotent() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("gone");
        fs::create_dir_all(&sub).unwrap();
        remove_tree(&sub).unwrap();
        assert!(!sub.exists());
        remove_tree(&sub).unwrap();
    }

    #[test]
    fn sweep_removes_only_old_wal_files() {
        let dir = tempdir().unwrap();
        let stale = dir.path().join("row.ndjson.wal.deadbeef");
        fs::write(&stale, b"orphan").unwrap();
        let fresh = dir.path().join("row.ndjson");
        fs::write(&fresh, b"kept").unwrap();

        let removed = sweep_stale_writes(dir.path(), std::time::Duration::from_secs(0)).unwrap();
        assert_eq!(removed, 1);
        assert!(!stale.exists());
        assert!(fresh.exists());
    }
}
