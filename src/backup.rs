//! Archive/restore of the on-disk storage layout.
//!
//! `Backup::dump`/`Backup::load` are static functions over an explicit
//! `Database` rather than instance methods that reach into `self` for it
//! (see the grounding ledger's note on the source's ambiguous
//! `Backup.dump` signature) — the database the backup targets is always an
//! explicit parameter.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::database::Database;
use crate::error::{FoliodbError, FoliodbResult};

/// Archive/restore entry point. Carries no state — both operations take
/// the database(s) they act on explicitly.
pub struct Backup;

impl Backup {
    /// Archive `database`'s `.metadata`, every table's `.metadata`, and
    /// every row file, into a ZIP at `archive_path`. Cache directories
    /// (`.cache/`) are excluded.
    pub fn dump(database: &Database, archive_path: &Path) -> FoliodbResult<()> {
        let file = File::create(archive_path)?;
        let mut writer = ZipWriter::new(file);
        let options = SimpleFileOptions::default();
        let db_name = database.name().as_str();
        let db_dir = database.dir();

        add_file(&mut writer, options, db_dir, db_name, ".metadata")?;

        for table in database.tables(&[])? {
            let table_dir = db_dir.join(table.as_str());
            add_file(
                &mut writer,
                options,
                db_dir,
                db_name,
                &format!("{}/.metadata", table.as_str()),
            )?;
            for entry in std::fs::read_dir(&table_dir)? {
                let entry = entry?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("ndjson") {
                    continue;
                }
                let rel = format!(
                    "{}/{}",
                    table.as_str(),
                    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
                );
                add_file(&mut writer, options, db_dir, db_name, &rel)?;
            }
        }

        writer.finish()?;
        Ok(())
    }

    /// Extract `archive_path` into `target_root`, reproducing the on-disk
    /// layout the archive was built from.
    pub fn load(archive_path: &Path, target_root: &Path) -> FoliodbResult<()> {
        let file = File::open(archive_path)?;
        let mut archive = ZipArchive::new(file)
            .map_err(|e| FoliodbError::IoFailure(format!("invalid backup archive: {e}")))?;

        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .map_err(|e| FoliodbError::IoFailure(format!("corrupt backup entry: {e}")))?;
            let name = entry.name().to_string();
            let dest = target_root.join(&name);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes)?;
            crate::io::atomic_write(&dest, &bytes)?;
        }
        Ok(())
    }
}

fn add_file(
    writer: &mut ZipWriter<File>,
    options: SimpleFileOptions,
    db_dir: &Path,
    db_name: &str,
    relative: &str,
) -> FoliodbResult<()> {
    let path = if relative == ".metadata" {
        db_dir.join(".metadata")
    } else {
        db_dir.join(relative)
    };
    if !path.is_file() {
        return Ok(());
    }
    let bytes = std::fs::read(&path)?;
    let entry_name = format!("{db_name}/{relative}");
    writer
        .start_file(entry_name, options)
        .map_err(|e| FoliodbError::IoFailure(format!("zip write failed: {e}")))?;
    writer.write_all(&bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn dump_then_load_reproduces_rows() {
        let src_root = tempdir().unwrap();
        let dst_root = tempdir().unwrap();
        let archive_dir = tempdir().unwrap();
        let archive_path = archive_dir.path().join("backup.zip");

        let db = Database::open(src_root.path(), "mydb", None).unwrap();
        db.create_table("users", Schema::new()).unwrap();
        let table = db.table("users").unwrap();
        let mut row = BTreeMap::new();
        row.insert("name".to_string(), crate::value::Value::Text("Ada".into()));
        let id = table.insert(row).unwrap();

        Backup::dump(&db, &archive_path).unwrap();
        Backup::load(&archive_path, dst_root.path()).unwrap();

        let restored = Database::open(dst_root.path(), "mydb", None).unwrap();
        let restored_table = restored.table("users").unwrap();
        let restored_row = restored_table.row(&id).unwrap().unwrap();
        assert_eq!(
            restored_row.get("name"),
            Some(&crate::value::Value::Text("Ada".into()))
        );
    }

    #[test]
    fn dump_excludes_cache_directory() {
        let src_root = tempdir().unwrap();
        let archive_dir = tempdir().unwrap();
        let archive_path = archive_dir.path().join("backup.zip");

        let db = Database::open(src_root.path(), "mydb", None).unwrap();
        db.create_table("users", Schema::new()).unwrap();
        let table = db.table("users").unwrap();
        table.query().run().unwrap();

        Backup::dump(&db, &archive_path).unwrap();
        let file = File::open(&archive_path).unwrap();
        let archive = ZipArchive::new(file).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.name_for_index(i).unwrap().to_string())
            .collect();
        assert!(!names.iter().any(|n| n.contains(".cache")));
    }
}
