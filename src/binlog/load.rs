//! LOAD DATA reassembly.
//!
//! A 4.x-and-later LOAD DATA is logged as a first event carrying the
//! statement and the first block of the data file (Create_file or
//! Begin_load_query), any number of Append_block events, and a final
//! Exec_load or Execute_load_query. The dump writes the blocks to a local
//! file as they arrive and rewrites the final statement to load from it.
//!
//! Entries are keyed by the event's file id. Each local file is created
//! exclusively, written, and closed; later blocks reopen it in append mode,
//! so no file handles stay open across events.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::binlog::events::CreateFileEvent;
use crate::binlog::header::EventHeader;
use crate::RplError;

/// Local name stem used for Begin_load_query data.
pub const BEGIN_LOAD_BASE_NAME: &str = "SQL_LOAD_MB";

/// Suffixes tried after `<base>-<file id>` is taken.
const MAX_NAME_VERSIONS: u32 = 1000;

/// A Create_file event kept until its Exec_load arrives. Its `fname` has
/// been replaced by the local file name.
#[derive(Debug, Clone)]
pub struct SavedCreate {
    pub header: EventHeader,
    pub event: CreateFileEvent,
}

/// One in-flight LOAD DATA.
#[derive(Debug, Clone)]
pub struct PendingLoad {
    pub temp_filename: PathBuf,
    pub create: Option<SavedCreate>,
}

/// Result of adding a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// No Create_file/Begin_load_query seen for this id (for example, it was
    /// before the start position).
    UnknownFileId,
}

/// File-id keyed table of LOAD DATA files being rebuilt.
#[derive(Debug)]
pub struct LoadReassembly {
    dir: PathBuf,
    pending: HashMap<u32, PendingLoad>,
}

/// `fname` without its directory part. Both separators are recognised
/// because the name comes from the server's file system.
pub fn base_name(fname: &str) -> &str {
    fname
        .rfind(|c| c == '/' || c == '\\')
        .map(|i| &fname[i + 1..])
        .unwrap_or(fname)
}

/// Rewrite backslashes to forward slashes.
pub fn convert_path_separators(path: &str) -> String {
    path.replace('\\', "/")
}

impl LoadReassembly {
    /// Local files go into `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        LoadReassembly {
            dir: dir.into(),
            pending: HashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of loads still waiting for their execute event.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Start a load: create `<dir>/<base>-<hex id>` (or a numbered variant
    /// if that exists), write `first_block` to it and register it.
    ///
    /// For Create_file events pass the event in `create`; its file name is
    /// pointed at the local file.
    pub fn on_create_or_begin(
        &mut self,
        file_id: u32,
        base: &str,
        first_block: &[u8],
        create: Option<SavedCreate>,
    ) -> Result<PathBuf, RplError> {
        let (path, mut file) = self.create_unique(base, file_id)?;
        file.write_all(first_block)
            .map_err(|e| RplError::Io(format!("Failed writing to file {}: {}", path.display(), e)))?;
        drop(file);

        let create = create.map(|mut saved| {
            saved.event.load.fname = path.to_string_lossy().into_owned();
            saved
        });
        debug!(file_id, path = %path.display(), bytes = first_block.len(), "load started");
        if self
            .pending
            .insert(
                file_id,
                PendingLoad {
                    temp_filename: path.clone(),
                    create,
                },
            )
            .is_some()
        {
            warn!(file_id, "file_id reused before its load finished; the earlier load is dropped");
        }
        Ok(path)
    }

    fn create_unique(&self, base: &str, file_id: u32) -> Result<(PathBuf, File), RplError> {
        let stem = format!("{}-{:x}", base, file_id);
        let candidates = std::iter::once(stem.clone())
            .chain((0..MAX_NAME_VERSIONS).map(|v| format!("{}-{:x}", stem, v)));
        for name in candidates {
            let path = self.dir.join(&name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(RplError::Io(format!(
                        "Could not create local file {}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }
        Err(RplError::Io(format!(
            "Could not construct local filename {}.",
            self.dir.join(base).display()
        )))
    }

    /// Append a block to the file of a pending load.
    pub fn on_append(&mut self, file_id: u32, block: &[u8]) -> Result<AppendOutcome, RplError> {
        let Some(entry) = self.pending.get(&file_id) else {
            return Ok(AppendOutcome::UnknownFileId);
        };
        let path = &entry.temp_filename;
        let mut file = OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(|e| RplError::Io(format!("Failed opening file {}: {}", path.display(), e)))?;
        file.write_all(block)
            .map_err(|e| RplError::Io(format!("Failed writing to file {}: {}", path.display(), e)))?;
        Ok(AppendOutcome::Appended)
    }

    /// Remove and return the entry for `file_id`.
    pub fn take(&mut self, file_id: u32) -> Option<PendingLoad> {
        self.pending.remove(&file_id)
    }

    /// Exec_load: hand back the saved Create_file event.
    pub fn on_execute(&mut self, file_id: u32) -> Option<SavedCreate> {
        self.take(file_id).and_then(|p| p.create)
    }

    /// Execute_load_query: hand back the local file name.
    pub fn on_execute_query(&mut self, file_id: u32) -> Option<PathBuf> {
        self.take(file_id).map(|p| p.temp_filename)
    }

    /// Delete_file: forget the load. Returns whether it was known.
    pub fn on_delete(&mut self, file_id: u32) -> bool {
        self.take(file_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binlog::events::{LoadEvent, SqlEx};
    use std::fs;
    use tempfile::TempDir;

    fn saved_create(fname: &str) -> SavedCreate {
        SavedCreate {
            header: EventHeader::default(),
            event: CreateFileEvent {
                load: LoadEvent {
                    thread_id: 1,
                    exec_time: 0,
                    skip_lines: 0,
                    table_name: "t".into(),
                    db: "test".into(),
                    fname: fname.into(),
                    sql_ex: SqlEx::default(),
                    fields: vec![],
                },
                file_id: 1,
                block: vec![],
            },
        }
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("/var/tmp/data.txt"), "data.txt");
        assert_eq!(base_name("C:\\load\\data.txt"), "data.txt");
        assert_eq!(base_name("plain"), "plain");
        assert_eq!(convert_path_separators("a\\b\\c"), "a/b/c");
    }

    #[test]
    fn test_create_append_execute() {
        let dir = TempDir::new().unwrap();
        let mut table = LoadReassembly::new(dir.path());
        let path = table
            .on_create_or_begin(0x1a, "data.txt", b"1,2\n", Some(saved_create("/srv/data.txt")))
            .unwrap();
        assert_eq!(path, dir.path().join("data.txt-1a"));
        assert_eq!(table.on_append(0x1a, b"3,4\n").unwrap(), AppendOutcome::Appended);
        assert_eq!(fs::read(&path).unwrap(), b"1,2\n3,4\n");

        let saved = table.on_execute(0x1a).unwrap();
        assert_eq!(saved.event.load.fname, path.to_string_lossy());
        assert_eq!(table.pending(), 0);
        assert!(table.on_execute(0x1a).is_none());
    }

    #[test]
    fn test_unknown_file_id() {
        let dir = TempDir::new().unwrap();
        let mut table = LoadReassembly::new(dir.path());
        assert_eq!(table.on_append(9, b"x").unwrap(), AppendOutcome::UnknownFileId);
        assert!(table.on_execute_query(9).is_none());
        assert!(!table.on_delete(9));
    }

    #[test]
    fn test_existing_name_gets_version_suffix() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("SQL_LOAD_MB-5"), b"old").unwrap();
        fs::write(dir.path().join("SQL_LOAD_MB-5-0"), b"old").unwrap();
        let mut table = LoadReassembly::new(dir.path());
        let path = table.on_create_or_begin(5, BEGIN_LOAD_BASE_NAME, b"new", None).unwrap();
        assert_eq!(path, dir.path().join("SQL_LOAD_MB-5-1"));
        assert_eq!(table.on_execute_query(5), Some(path));
    }

    #[test]
    fn test_delete_forgets_entry() {
        let dir = TempDir::new().unwrap();
        let mut table = LoadReassembly::new(dir.path());
        table.on_create_or_begin(3, "f", b"", None).unwrap();
        assert!(table.on_delete(3));
        assert_eq!(table.pending(), 0);
    }
}
