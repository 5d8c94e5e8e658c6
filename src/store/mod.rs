//! Filesystem-backed storage for YAML entity documents.
//!
//! Writes never modify a file in place: content goes to a temporary file in
//! the same directory, is flushed and re-parsed, and is then renamed over the
//! target. A reader (this process or any other) therefore sees either the old
//! or the new document in full.

mod document;

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, Utc};
use tempfile::NamedTempFile;

pub use document::{Document, DEFAULT_HEADER};

use crate::error::{Error, Result};

/// Prefix of the temporary files staged next to a write target.
pub const TEMP_PREFIX: &str = ".worksync-";
const TEMP_SUFFIX: &str = ".tmp";

/// A file modification time as reported by the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModTime(SystemTime);

impl ModTime {
    pub fn new(time: SystemTime) -> Self {
        Self(time)
    }

    /// Modification time of `path`, or `None` when the file does not exist.
    pub fn of(path: &Path) -> Result<Option<Self>> {
        match fs::metadata(path) {
            Ok(metadata) => Self::from_metadata(&metadata)
                .map(Some)
                .map_err(|e| Error::io(path, e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(path, e)),
        }
    }

    pub fn from_metadata(metadata: &fs::Metadata) -> io::Result<Self> {
        metadata.modified().map(Self)
    }

    pub fn as_system_time(&self) -> SystemTime {
        self.0
    }
}

impl fmt::Display for ModTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let time: DateTime<Utc> = self.0.into();
        f.write_str(&time.to_rfc3339_opts(SecondsFormat::Nanos, true))
    }
}

/// A document as read from disk, with the modification time observed on the
/// same open handle the content was read from.
#[derive(Debug, Clone)]
pub struct Stored {
    pub document: Document,
    pub modified: ModTime,
}

/// Reads and atomically replaces YAML documents.
///
/// The store holds one process-wide write lock. The modification-time check
/// and the rename happen under it, so two writers in this process can never
/// both pass the check for the same version of a file.
#[derive(Debug, Default)]
pub struct DocumentStore {
    write_lock: Mutex<()>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self, path: &Path) -> Result<Stored> {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound(path.display().to_string()));
            }
            Err(e) => return Err(Error::io(path, e)),
        };

        let metadata = file.metadata().map_err(|e| Error::io(path, e))?;
        let modified = ModTime::from_metadata(&metadata).map_err(|e| Error::io(path, e))?;

        let mut text = String::new();
        file.read_to_string(&mut text)
            .map_err(|e| Error::io(path, e))?;

        let document = Document::parse(&text).map_err(|source| Error::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Stored { document, modified })
    }

    /// Replace `path` with `document` and return the new modification time.
    ///
    /// `expected` is the modification time the caller read the file at;
    /// `None` means the file is being created and must not exist yet. Any
    /// mismatch fails with [`Error::ConcurrentModification`] and leaves the
    /// target untouched.
    pub fn write(
        &self,
        path: &Path,
        document: &Document,
        expected: Option<ModTime>,
    ) -> Result<ModTime> {
        let text = document.render().map_err(|source| Error::Serialize {
            path: path.to_path_buf(),
            source,
        })?;

        let staged = stage(path, text.as_bytes())?;

        // Validate what actually landed on disk before committing it.
        let written = fs::read_to_string(staged.path()).map_err(|e| Error::io(staged.path(), e))?;
        Document::parse(&written).map_err(|source| Error::Parse {
            path: staged.path().to_path_buf(),
            source,
        })?;

        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let observed = ModTime::of(path)?;
        if observed != expected {
            return Err(Error::ConcurrentModification {
                path: path.to_path_buf(),
                observed,
                expected,
            });
        }

        staged
            .persist(path)
            .map_err(|e| Error::io(path, e.error))?;

        ModTime::of(path)?.ok_or_else(|| Error::NotFound(path.display().to_string()))
    }
}

/// Atomically replace `path` with `contents`, without any version check.
///
/// Used for files the server owns outright: the workspace config and the
/// generated vault.
pub fn replace_file(path: &Path, contents: &[u8]) -> Result<()> {
    let staged = stage(path, contents)?;
    staged
        .persist(path)
        .map_err(|e| Error::io(path, e.error))?;
    Ok(())
}

/// Delete temporary files left in `dir` by writes that never reached their
/// rename (for example because the process was killed). Returns how many
/// were removed.
pub fn remove_stale_temp_files(dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX) {
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "Failed to remove stale temp file")
                }
            }
        }
    }
    removed
}

/// Write `contents` to a synced temporary file next to `path`.
/// The temp file is deleted again if it is dropped without being persisted.
fn stage(path: &Path, contents: &[u8]) -> Result<NamedTempFile> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut temp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(TEMP_SUFFIX)
        .tempfile_in(parent)
        .map_err(|e| Error::io(parent, e))?;

    temp.write_all(contents)
        .map_err(|e| Error::io(temp.path(), e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| Error::io(temp.path(), e))?;

    Ok(temp)
}
