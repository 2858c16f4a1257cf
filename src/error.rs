// src/error.rs

use std::path::Path;
use thiserror::Error;

/// Core error types for DPMS
#[derive(Error, Debug)]
pub enum Error {
    /// A referenced local path does not exist
    #[error("Invalid source: {0}")]
    InvalidSourceError(String),

    /// Requested compression is not gz or xz
    #[error("Unsupported compression: {0}")]
    UnsupportedCompressionError(String),

    /// Archive is unreadable, of unknown format, or its name cannot be parsed
    #[error("Archive error: {0}")]
    ArchiveError(String),

    /// Connection failure, timeout, or non-success HTTP status
    #[error("Network error: {0}")]
    NetworkError(String),

    /// An external tool failed or could not be found
    #[error("{message}")]
    SubprocessError {
        message: String,
        stdout: Option<String>,
        stderr: Option<String>,
        status: Option<i32>,
    },

    /// Registry file exists but does not hold a JSON array of names
    #[error("Registry at {path} is corrupt: {reason}")]
    CorruptRegistry { path: String, reason: String },

    /// Catch-all for unexpected failures, including local I/O
    #[error("{0}")]
    CoreError(String),
}

impl Error {
    /// Wrap a file-system failure on `path` as a `CoreError`
    pub(crate) fn io(action: &str, path: &Path, e: std::io::Error) -> Self {
        Error::CoreError(format!("Failed to {} {}: {}", action, path.display(), e))
    }
}

/// Result type alias using DPMS's Error type
pub type Result<T> = std::result::Result<T, Error>;
