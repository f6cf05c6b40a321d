//! Error types for tiered caches.

use std::fmt;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for tiered caches.
///
/// Absence of a key is never an error: lookups return `Option`/`bool`.
/// Backend failures are passed through to the caller unchanged; the tier
/// coordinator adds no retries of its own.
#[derive(Debug, Clone)]
pub enum Error {
    /// Chain or driver configuration is invalid.
    ///
    /// Raised when:
    /// - fewer than two tiers are supplied
    /// - the last tier cannot deliver remote notifications
    /// - a driver's option bag does not match its option struct
    ///
    /// **Recovery:** Fix configuration and restart.
    ConfigError(String),

    /// No driver is registered under the requested name.
    DriverNotRegistered(String),

    /// Backend storage error (Redis, shared store, etc).
    ///
    /// Common causes:
    /// - connection refused or lost
    /// - pool wait/create timeout
    /// - backend protocol error (e.g. incrementing a non-numeric value)
    BackendError(String),

    /// Serializing a value into its envelope failed.
    SerializationError(String),

    /// A stored payload is not a valid envelope, or its data does not
    /// match the requested type.
    ///
    /// **Recovery:** Delete the key and write it again.
    DeserializationError(String),

    /// The backend cannot publish or subscribe and no downstream tier can.
    UnsupportedPubSub,

    /// The channel is reserved for cross-process invalidation broadcasts.
    ReservedChannel(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
            Error::DriverNotRegistered(name) => write!(f, "Unregistered driver: {}", name),
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            Error::UnsupportedPubSub => write!(f, "Unsupported Publish/Subscribe messages"),
            Error::ReservedChannel(channel) => {
                write!(f, "Channel {} is reserved for cache invalidation", channel)
            }
        }
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Conversion from the envelope codec
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            Error::BackendError(e.to_string())
        } else if e.is_syntax() || e.is_eof() || e.is_data() {
            Error::DeserializationError(e.to_string())
        } else {
            Error::SerializationError(e.to_string())
        }
    }
}
