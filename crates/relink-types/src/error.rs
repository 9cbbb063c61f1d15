//! Error types for value parsing in relink-types.

use thiserror::Error;

/// Errors that can occur when parsing identifiers and adapter states.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in relink-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The input could not be interpreted.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// A peripheral identifier was empty or whitespace only.
    #[error("Peripheral identifier must not be empty")]
    EmptyIdentifier,

    /// The name does not correspond to any adapter power state.
    #[error("Unknown adapter power state: {0}")]
    UnknownPowerState(String),
}

/// Result type alias using relink-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
