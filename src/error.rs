use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::store::ModTime;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by the document store, the coordinator and the
/// operations built on top of them.
///
/// `NotFound`, `Parse`, `ConcurrentModification` and `Rejected` are always
/// raised before anything is written, so the files are left exactly as they
/// were found.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(String),

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error(
        "{} changed externally (on disk: {}, last seen: {}); refresh and retry",
        .path.display(),
        describe(.observed),
        describe(.expected)
    )]
    ConcurrentModification {
        path: PathBuf,
        observed: Option<ModTime>,
        expected: Option<ModTime>,
    },

    #[error("timed out after {waited:?} waiting for the write lock on project '{project}'")]
    LockTimeout { project: String, waited: Duration },

    #[error("{0}")]
    Rejected(String),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize {}: {source}", .path.display())]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

impl Error {
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Parse { .. } => "parse_error",
            Self::ConcurrentModification { .. } => "concurrent_modification",
            Self::LockTimeout { .. } => "lock_timeout",
            Self::Rejected(_) => "rejected",
            Self::Io { .. } => "io_error",
            Self::Serialize { .. } => "serialize_error",
        }
    }

    /// Whether the error describes a problem with the caller's request
    /// rather than with the server or its storage.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::ConcurrentModification { .. }
                | Self::LockTimeout { .. }
                | Self::Rejected(_)
        )
    }
}

fn describe(time: &Option<ModTime>) -> String {
    match time {
        Some(time) => time.to_string(),
        None => "missing".to_string(),
    }
}
