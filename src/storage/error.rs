//! Session storage error types.

use std::fmt;
use std::path::PathBuf;

/// Errors that can occur during session storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// Null/empty identifier, empty filter or payload, out of range packet id
    InvalidArgument(String),
    /// Client has a clean (non-durable) session
    CleanSession(String),
    /// Filesystem operation failed
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// On-disk record could not be decoded
    Malformed(String),
    /// Blocking task failed to complete
    Join(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Whether the failure was raised before any I/O took place
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_) | Self::CleanSession(_))
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(e) => write!(f, "invalid argument: {}", e),
            Self::CleanSession(id) => {
                write!(f, "client '{}' has a clean session, storage disabled", id)
            }
            Self::Io { path, source } => write!(f, "IO error at {}: {}", path.display(), source),
            Self::Malformed(e) => write!(f, "malformed record: {}", e),
            Self::Join(e) => write!(f, "storage task failed: {}", e),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Join(err.to_string())
    }
}

/// Result type for session storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
