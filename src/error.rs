//! Error types for the cache facade.

use std::fmt;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the cache facade.
///
/// Configuration problems surface when a selector or cache is built. Everything
/// else is returned per call; a plain cache miss is `Ok(None)`, never an error.
#[derive(Debug, Clone)]
pub enum Error {
    /// A caller-supplied argument is out of range.
    ///
    /// Raised before any side effect. Common causes:
    /// - Zero `duration_to_store`
    /// - Empty or overlong friendly name
    /// - Recalculation window not shorter than the store duration
    /// - Unknown implementation id passed to `enable`/`disable`
    InvalidArgument(String),

    /// A canonical key string could not be decoded.
    ///
    /// Every decoding failure maps to this variant: wrong field count,
    /// non-numeric duration or ordinal, bad base64, oversize input.
    InvalidKeyFormat(String),

    /// The facade was wired up incorrectly.
    ///
    /// Common causes:
    /// - Selector built with no implementations, or more than the cap
    /// - No selection policy supplied
    /// - None of the implementations is enabled
    /// - A policy names an implementation that was never registered
    /// - Unparsable environment configuration
    ///
    /// **Recovery:** Fix configuration and restart.
    ConfigurationError(String),

    /// No registered implementation is both enabled and able to honour the
    /// requested expiration semantics.
    ///
    /// The operation is abandoned; it is not retried automatically.
    CacheSelectionFailure(String),

    /// Backend storage error (Redis, Memcached, etc).
    ///
    /// Produced by [`CacheBackend`](crate::backend::CacheBackend) implementations.
    /// The [`BackendImplementation`](crate::implementation::BackendImplementation)
    /// adapter logs it and reports failure through its return value instead.
    BackendError(String),

    /// Serialization failed when converting a value to cache bytes.
    SerializationError(String),

    /// Deserialization failed when converting cache bytes to a value.
    ///
    /// **Recovery:** Cache entry should be evicted and recomputed.
    DeserializationError(String),

    /// Invalid cache entry: corrupted envelope or bad magic.
    InvalidCacheEntry(String),

    /// Schema version mismatch between code and cached data.
    VersionMismatch {
        /// Expected schema version (from compiled code)
        expected: u32,
        /// Found schema version (from cached entry)
        found: u32,
    },

    /// Compressing or decompressing a value failed.
    CompressionError(String),

    /// Encrypting or decrypting a value failed.
    ///
    /// Decryption fails when the key differs from the one used to write the
    /// entry, or when the ciphertext was tampered with.
    EncryptionError(String),

    /// A lease provider could not be reached or answered unexpectedly.
    LeaseError(String),

    /// Feature not implemented by this backend (e.g. sliding expiry on Redis).
    NotImplemented(String),

    /// Generic error with custom message.
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::InvalidKeyFormat(msg) => write!(f, "Invalid cache key format: {}", msg),
            Error::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
            Error::CacheSelectionFailure(msg) => write!(f, "Cache selection failure: {}", msg),
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            Error::InvalidCacheEntry(msg) => write!(f, "Invalid cache entry: {}", msg),
            Error::VersionMismatch { expected, found } => {
                write!(
                    f,
                    "Cache version mismatch: expected {}, found {}",
                    expected, found
                )
            }
            Error::CompressionError(msg) => write!(f, "Compression error: {}", msg),
            Error::EncryptionError(msg) => write!(f, "Encryption error: {}", msg),
            Error::LeaseError(msg) => write!(f, "Lease error: {}", msg),
            Error::NotImplemented(msg) => write!(f, "Not implemented: {}", msg),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Stored bytes that cannot be turned back into a value. Recomputing and
    /// overwriting the entry is the way out.
    pub fn is_unreadable_entry(&self) -> bool {
        matches!(
            self,
            Error::DeserializationError(_)
                | Error::InvalidCacheEntry(_)
                | Error::VersionMismatch { .. }
                | Error::CompressionError(_)
                | Error::EncryptionError(_)
        )
    }
}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::BackendError(e.to_string())
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::BackendError(format!("Redis error: {}", e))
    }
}
