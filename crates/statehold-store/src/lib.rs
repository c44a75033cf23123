//! Atomic, file-per-record JSON storage on a local filesystem path.
//!
//! Every write goes through a temporary file in the target's directory that is
//! synced before being renamed over the target, so a reader (in this process or
//! any other) observes either the complete previous value or the complete new
//! one.

mod fs_store;

pub use fs_store::{FsStore, StagedRecord, TEMP_SUFFIX, sync_dir};

use std::{io, path::PathBuf};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found at {path:?}")]
    NotFound { path: PathBuf },
    #[error("corrupt record at {path:?}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("storage unavailable at {path:?}: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode record for {path:?}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, StoreError::Corrupt { .. })
    }

    pub fn path(&self) -> &std::path::Path {
        match self {
            StoreError::NotFound { path }
            | StoreError::Corrupt { path, .. }
            | StoreError::Unavailable { path, .. }
            | StoreError::Encode { path, .. } => path,
        }
    }
}

/// Map a read-side I/O error, keeping absence distinct from failure.
pub(crate) fn io_error(path: impl Into<PathBuf>, err: io::Error) -> StoreError {
    let path = path.into();
    if err.kind() == io::ErrorKind::NotFound {
        StoreError::NotFound { path }
    } else {
        StoreError::Unavailable { path, source: err }
    }
}

pub(crate) fn unavailable(path: impl Into<PathBuf>, err: io::Error) -> StoreError {
    StoreError::Unavailable {
        path: path.into(),
        source: err,
    }
}
