//! Error taxonomy shared by all file operations.

use std::io;
use std::path::{Path, PathBuf};

use protocol::{ErrorCode, ErrorMessage};
use thiserror::Error;

use crate::sandbox::SandboxError;

/// Errors that can occur during a file operation.
///
/// Every variant that concerns a specific path carries it, so that failures
/// inside batch operations stay attributable.
#[derive(Debug, Error)]
pub enum FileError {
    /// A required argument is missing or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The path lies outside every allowed directory.
    #[error("path {} is outside of allowed directories", .0.display())]
    OutsideAllowedDirectories(PathBuf),

    /// The path does not exist.
    #[error("path does not exist: {}", .0.display())]
    NotFound(PathBuf),

    /// The path is not a directory.
    #[error("path is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// Read, write or directory creation failed.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Enumeration failed somewhere below the requested directory.
    #[error("failed to read directory {}: {source}", .path.display())]
    Traversal {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,
}

impl FileError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Wrap an enumeration error with the directory it happened on.
    pub fn traversal(path: &Path, source: io::Error) -> Self {
        Self::Traversal {
            path: path.to_path_buf(),
            source,
        }
    }

    /// The offending path, when there is one.
    pub fn path(&self) -> Option<&Path> {
        match self {
            FileError::OutsideAllowedDirectories(path)
            | FileError::NotFound(path)
            | FileError::NotADirectory(path)
            | FileError::Io { path, .. }
            | FileError::Traversal { path, .. } => Some(path.as_path()),
            FileError::InvalidArgument(_) | FileError::Cancelled => None,
        }
    }

    /// Protocol error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            FileError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            FileError::OutsideAllowedDirectories(_) => ErrorCode::OutsideAllowedDirectories,
            FileError::NotFound(_) => ErrorCode::NotFound,
            FileError::NotADirectory(_) => ErrorCode::NotADirectory,
            FileError::Io { .. } => ErrorCode::Io,
            FileError::Traversal { .. } => ErrorCode::Traversal,
            FileError::Cancelled => ErrorCode::Cancelled,
        }
    }

    /// Convert to a protocol error payload.
    pub fn to_error_message(&self) -> ErrorMessage {
        let message = ErrorMessage::new(self.code(), self.to_string());
        match self.path() {
            Some(path) => message.with_path(path.display().to_string()),
            None => message,
        }
    }
}

impl From<SandboxError> for FileError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::OutsideAllowedDirectories(path) => {
                FileError::OutsideAllowedDirectories(path)
            }
            other => FileError::InvalidArgument(other.to_string()),
        }
    }
}
