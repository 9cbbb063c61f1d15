//! Error types for relink-core.
//!
//! The connection manager never raises radio or persistence failures to its
//! callers: they are logged and surfaced as notifications. The errors in this
//! module are returned by the collaborator seams ([`crate::Adapter`],
//! [`crate::IdentityStore`]), by configuration validation, and by
//! [`crate::ManagerHandle`] when the manager worker has already shut down.
//!
//! # Error Classification
//!
//! | Error Type | Seen by | Handling |
//! |------------|---------|----------|
//! | [`Error::Bluetooth`] | manager worker | Logged, turned into a connect-failed or ignored |
//! | [`Error::Identity`] | manager worker | Logged, connection lifecycle continues |
//! | [`Error::ManagerShutdown`] | application | Manager is gone, rebuild it |
//! | [`Error::InvalidConfig`] | application | Fix configuration and rebuild |
//! | [`Error::NoAdapter`] | application | No Bluetooth hardware present |

use thiserror::Error;

use relink_types::{AdapterPower, ParseError};

/// Errors that can occur while managing peripheral connections.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// No Bluetooth adapter is present on this host.
    #[error("No Bluetooth adapter available")]
    NoAdapter,

    /// A radio operation was attempted while the adapter cannot perform it.
    #[error("Bluetooth adapter unavailable (power state: {0})")]
    AdapterUnavailable(AdapterPower),

    /// The adapter event stream was already handed to another consumer.
    #[error("Adapter event stream already taken")]
    AdapterEventsTaken,

    /// The identity store failed to read or write.
    #[error("Identity store error: {0}")]
    Identity(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A peripheral identifier could not be parsed.
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(#[from] ParseError),

    /// The manager worker has stopped and no longer accepts commands.
    #[error("Connection manager has shut down")]
    ManagerShutdown,

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap an identity store failure.
    pub fn identity<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Identity(Box::new(err))
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Whether retrying the same operation later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Bluetooth(_) | Error::AdapterUnavailable(_) | Error::Io(_)
        )
    }
}

/// Result type alias using relink-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
