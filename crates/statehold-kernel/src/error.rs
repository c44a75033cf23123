use std::path::PathBuf;

use statehold_store::StoreError;
use thiserror::Error;

pub type KernelResult<T> = Result<T, KernelError>;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("session '{0}' not found")]
    SessionNotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("event log I/O at {path:?}: {source}")]
    EventLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode event: {0}")]
    EventEncode(#[source] serde_json::Error),
}

impl KernelError {
    pub fn is_not_found(&self) -> bool {
        match self {
            KernelError::SessionNotFound(_) => true,
            KernelError::Store(err) => err.is_not_found(),
            _ => false,
        }
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, KernelError::Store(err) if err.is_corrupt())
    }
}
