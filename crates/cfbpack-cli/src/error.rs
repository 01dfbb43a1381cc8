//! Error types for the cfbpack command-line tool.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Sector size other than 512 or 4096
    #[error("Invalid sector size {0}: expected 512 or 4096")]
    InvalidSectorSize(usize),

    /// Option value out of range
    #[error("Invalid {field}: {reason}")]
    InvalidValue {
        /// Option name
        field: &'static str,
        /// Reason for invalidity
        reason: String,
    },

    /// Source path missing or of the wrong kind
    #[error("Invalid source '{path}': {reason}")]
    InvalidSource {
        /// The offending path
        path: PathBuf,
        /// Reason for invalidity
        reason: String,
    },

    /// Destination would overwrite the source
    #[error("Destination '{0}' is the same as the source")]
    DestinationConflict(PathBuf),
}

/// Errors while mapping between the filesystem and a tree.
#[derive(Debug, Error)]
pub enum FsTreeError {
    /// Directory traversal failed
    #[error("Failed to walk directory: {0}")]
    Walk(#[from] walkdir::Error),

    /// Reading a file or its metadata failed
    #[error("Failed to read {path}: {source}")]
    Read {
        /// Path being read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Path component that is not valid UTF-8
    #[error("Name is not valid UTF-8: {0}")]
    NonUtf8Name(PathBuf),
}
