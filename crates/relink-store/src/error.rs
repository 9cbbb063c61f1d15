//! Error types for relink-store.

use std::path::PathBuf;

use relink_types::ParseError;

/// Result type for relink-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in relink-store.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A stored record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored identifier is not a valid device identifier.
    #[error("Invalid stored identifier: {0}")]
    Identifier(#[from] ParseError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The database was written by a newer schema.
    #[error("Database schema version {found} is newer than supported version {supported}")]
    UnsupportedSchema { found: u32, supported: u32 },

    /// A thread panicked while holding the connection.
    #[error("Database connection lock poisoned")]
    LockPoisoned,
}

impl From<Error> for relink_core::Error {
    fn from(err: Error) -> Self {
        relink_core::Error::identity(err)
    }
}
