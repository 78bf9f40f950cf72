use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("session '{0}' not found")]
    NotFound(String),
    #[error("{action} '{path}' failed: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to decode session state '{path}': {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode session state '{path}': {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported session state version {version} at '{path}'")]
    UnsupportedVersion { version: u64, path: PathBuf },
    #[error("session state '{path}' belongs to '{found}', expected '{expected}'")]
    IdentityMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },
}

impl SessionStoreError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }
}
