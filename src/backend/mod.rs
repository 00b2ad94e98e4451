//! Cache backend implementations.
//!
//! A backend is a plain byte store keyed by the canonical key string. It knows
//! nothing about selection, enablement or value encoding; those live in
//! [`crate::implementation`], which adapts any backend into a
//! [`CacheImplementation`](crate::implementation::CacheImplementation).

use crate::error::{Error, Result};
use crate::key::ExpirationType;
use std::future::Future;
use std::time::Duration;

pub mod inmemory;
#[cfg(feature = "memcached")]
pub mod memcached;
#[cfg(feature = "redis")]
pub mod redis;

pub use inmemory::InMemoryBackend;
#[cfg(feature = "memcached")]
pub use memcached::{MemcachedBackend, MemcachedConfig};
#[cfg(feature = "redis")]
pub use redis::{PoolStats, RedisBackend, RedisConfig};

/// Expiration semantics supported by backends that only expire on a fixed deadline.
pub const ABSOLUTE_ONLY: &[ExpirationType] = &[ExpirationType::Absolute];

/// Trait for cache backend implementations.
///
/// Abstracts storage operations, allowing swappable backends.
///
/// **IMPORTANT:** All methods use `&self` instead of `&mut self` to allow concurrent access.
/// Backend implementations should use interior mutability (DashMap, RwLock, or external storage).
///
/// **ASYNC:** All methods return `Send` futures so adapters can box them.
/// Implementations may simply write `async fn`.
pub trait CacheBackend: Send + Sync + Clone + 'static {
    /// Retrieve value from cache by key.
    ///
    /// # Returns
    /// - `Ok(Some(bytes))` - Value found in cache
    /// - `Ok(None)` - Cache miss (key not found)
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs (connection lost, etc.)
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Store value with an absolute TTL.
    ///
    /// # Arguments
    /// - `key`: Canonical cache key
    /// - `value`: Encoded value bytes
    /// - `ttl`: Time-to-live. None = use backend default or infinite
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Store value with a sliding TTL: every read pushes the deadline out by `ttl`.
    ///
    /// Only backends listing [`ExpirationType::Sliding`] in
    /// [`supported_expirations`](Self::supported_expirations) implement this.
    ///
    /// # Errors
    /// Returns `Error::NotImplemented` by default.
    fn set_sliding(
        &self,
        key: &str,
        _value: Vec<u8>,
        _ttl: Duration,
    ) -> impl Future<Output = Result<()>> + Send {
        async move {
            Err(Error::NotImplemented(format!(
                "sliding expiration not supported by this backend (key {})",
                key
            )))
        }
    }

    /// Remove value from cache. Removing an absent key is not an error.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Check if key exists in cache (optional optimization).
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    fn exists(&self, key: &str) -> impl Future<Output = Result<bool>> + Send {
        async move { Ok(self.get(key).await?.is_some()) }
    }

    /// Number of live entries.
    ///
    /// Backends that cannot count cheaply report 0.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    fn count(&self) -> impl Future<Output = Result<usize>> + Send {
        async { Ok(0) }
    }

    /// Health check - verify backend is accessible.
    ///
    /// # Errors
    /// Returns `Err` if backend is not accessible
    fn health_check(&self) -> impl Future<Output = Result<bool>> + Send {
        async { Ok(true) }
    }

    /// Clear all cache (use with caution).
    ///
    /// # Errors
    /// Returns `Err` if operation is not implemented or fails
    fn clear_all(&self) -> impl Future<Output = Result<()>> + Send {
        async {
            Err(Error::NotImplemented(
                "clear_all not implemented for this backend".to_string(),
            ))
        }
    }

    /// Expiration semantics this backend can honour.
    fn supported_expirations(&self) -> &'static [ExpirationType] {
        ABSOLUTE_ONLY
    }
}
