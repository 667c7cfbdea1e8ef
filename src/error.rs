use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors surfaced by the library core.
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O failure at {path:?}: {message}")]
    Io {
        message: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Range not satisfiable for a resource of {size} bytes")]
    RangeNotSatisfiable { size: u64 },

    #[error("No library is open")]
    ConfigMissing,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Thumbnail generation failed for {path:?}: {message}")]
    Thumbnail { path: PathBuf, message: String },
}

impl LibraryError {
    pub fn io(message: impl Into<String>, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn thumbnail(path: &Path, message: impl std::fmt::Display) -> Self {
        Self::Thumbnail {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }
}

pub type Result<T> = std::result::Result<T, LibraryError>;
