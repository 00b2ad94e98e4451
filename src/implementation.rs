//! The capability interface the selector routes to.
//!
//! [`CacheImplementation`] is object safe so a selector can hold a mix of
//! engines behind `Arc<dyn CacheImplementation>`. [`BackendImplementation`]
//! adapts any [`CacheBackend`] to it, adding an id and an enabled flag.
//!
//! Backend failures stop at this boundary: they are logged and reported as
//! `false` / `None` / `0`. A flaky Redis must never take the facade down.

use crate::backend::CacheBackend;
use crate::key::{ExpirationType, Key};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};

/// One storage engine as seen by the selector.
#[async_trait]
pub trait CacheImplementation: Send + Sync {
    /// Unique identifier within a selector.
    fn id(&self) -> &str;

    /// Whether the selector may route new operations here.
    fn is_enabled(&self) -> bool;

    fn set_enabled(&self, enabled: bool);

    /// Store bytes under `key` using the key's duration and expiration type.
    ///
    /// Returns `false` when the engine rejected or failed the write.
    async fn add(&self, key: &Key, value: Vec<u8>) -> bool;

    /// Fetch the bytes stored under `key`. Failures read as a miss.
    async fn get(&self, key: &Key) -> Option<Vec<u8>>;

    async fn remove(&self, key: &Key);

    /// Drop every entry this engine holds.
    async fn remove_all(&self);

    /// Live entry count, 0 when the engine cannot count.
    async fn count(&self) -> usize;

    fn supports(&self, expiration: ExpirationType) -> bool;
}

/// Adapts a [`CacheBackend`] into a [`CacheImplementation`].
///
/// # Example
///
/// ```
/// use cache_facade::backend::InMemoryBackend;
/// use cache_facade::implementation::{BackendImplementation, CacheImplementation};
/// use cache_facade::key::ExpirationType;
///
/// let local = BackendImplementation::new("local", InMemoryBackend::new());
/// assert!(local.is_enabled());
/// assert!(local.supports(ExpirationType::Sliding));
/// ```
pub struct BackendImplementation<B: CacheBackend> {
    id: String,
    backend: B,
    enabled: AtomicBool,
}

impl<B: CacheBackend> BackendImplementation<B> {
    /// Wrap `backend`, enabled.
    pub fn new(id: impl Into<String>, backend: B) -> Self {
        BackendImplementation {
            id: id.into(),
            backend,
            enabled: AtomicBool::new(true),
        }
    }

    /// Wrap `backend`, starting out disabled.
    pub fn disabled(id: impl Into<String>, backend: B) -> Self {
        let implementation = Self::new(id, backend);
        implementation.enabled.store(false, Ordering::Release);
        implementation
    }

    /// The wrapped backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Health check of the backend. Errors read as unhealthy.
    pub async fn health_check(&self) -> bool {
        match self.backend.health_check().await {
            Ok(healthy) => healthy,
            Err(e) => {
                warn!("Health check failed for implementation {}: {}", self.id, e);
                false
            }
        }
    }
}

#[async_trait]
impl<B: CacheBackend> CacheImplementation for BackendImplementation<B> {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        info!(
            "Cache implementation {} {}",
            self.id,
            if enabled { "enabled" } else { "disabled" }
        );
    }

    async fn add(&self, key: &Key, value: Vec<u8>) -> bool {
        let canonical = key.encode();
        let ttl = key.duration_to_store();

        let result = match key.expiration_type() {
            ExpirationType::Absolute => self.backend.set(&canonical, value, Some(ttl)).await,
            ExpirationType::Sliding => self.backend.set_sliding(&canonical, value, ttl).await,
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("⚠ [{}] add failed for {}: {}", self.id, canonical, e);
                false
            }
        }
    }

    async fn get(&self, key: &Key) -> Option<Vec<u8>> {
        let canonical = key.encode();
        match self.backend.get(&canonical).await {
            Ok(value) => value,
            Err(e) => {
                warn!("⚠ [{}] get failed for {}: {}", self.id, canonical, e);
                None
            }
        }
    }

    async fn remove(&self, key: &Key) {
        let canonical = key.encode();
        if let Err(e) = self.backend.delete(&canonical).await {
            warn!("⚠ [{}] remove failed for {}: {}", self.id, canonical, e);
        }
    }

    async fn remove_all(&self) {
        if let Err(e) = self.backend.clear_all().await {
            warn!("⚠ [{}] remove_all failed: {}", self.id, e);
        }
    }

    async fn count(&self) -> usize {
        match self.backend.count().await {
            Ok(count) => count,
            Err(e) => {
                warn!("⚠ [{}] count failed: {}", self.id, e);
                0
            }
        }
    }

    fn supports(&self, expiration: ExpirationType) -> bool {
        self.backend.supported_expirations().contains(&expiration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::error::{Error, Result};
    use crate::key::StorageStyle;
    use std::time::Duration;

    #[derive(Clone)]
    struct Unreachable;

    impl CacheBackend for Unreachable {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            Err(Error::BackendError("connection refused".to_string()))
        }

        async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Option<Duration>) -> Result<()> {
            Err(Error::BackendError("connection refused".to_string()))
        }

        async fn delete(&self, _key: &str) -> Result<()> {
            Err(Error::BackendError("connection refused".to_string()))
        }

        async fn count(&self) -> Result<usize> {
            Err(Error::BackendError("connection refused".to_string()))
        }

        async fn health_check(&self) -> Result<bool> {
            Err(Error::BackendError("connection refused".to_string()))
        }
    }

    fn key(expiration: ExpirationType) -> Key {
        Key::new(
            Duration::from_secs(60),
            StorageStyle::Unmodified,
            expiration,
            "implementation-test",
        )
        .expect("valid key")
    }

    #[tokio::test]
    async fn test_add_get_remove_through_backend() {
        let local = BackendImplementation::new("local", InMemoryBackend::new());
        let key = key(ExpirationType::Absolute);

        assert!(local.add(&key, b"payload".to_vec()).await);
        assert_eq!(local.get(&key).await, Some(b"payload".to_vec()));
        assert_eq!(local.backend().len(), 1);

        local.remove(&key).await;
        assert_eq!(local.get(&key).await, None);
    }

    #[tokio::test]
    async fn test_stores_under_canonical_key() {
        let backend = InMemoryBackend::new();
        let local = BackendImplementation::new("local", backend.clone());
        let key = key(ExpirationType::Sliding);

        assert!(local.add(&key, vec![1, 2, 3]).await);
        assert_eq!(
            backend.get(&key.encode()).await.expect("get"),
            Some(vec![1, 2, 3])
        );
    }

    #[tokio::test]
    async fn test_backend_failures_are_swallowed() {
        let broken = BackendImplementation::new("broken", Unreachable);
        let key = key(ExpirationType::Absolute);

        assert!(!broken.add(&key, vec![1]).await);
        assert_eq!(broken.get(&key).await, None);
        broken.remove(&key).await;
        broken.remove_all().await;
        assert_eq!(broken.count().await, 0);
        assert!(!broken.health_check().await);
    }

    #[tokio::test]
    async fn test_sliding_on_absolute_only_backend_fails_softly() {
        let broken = BackendImplementation::new("absolute", Unreachable);
        assert!(!broken.supports(ExpirationType::Sliding));
        assert!(broken.supports(ExpirationType::Absolute));
        assert!(!broken.add(&key(ExpirationType::Sliding), vec![1]).await);
    }

    #[test]
    fn test_enable_disable() {
        let local = BackendImplementation::disabled("local", InMemoryBackend::new());
        assert!(!local.is_enabled());

        local.set_enabled(true);
        assert!(local.is_enabled());
        assert_eq!(local.id(), "local");
    }

    #[tokio::test]
    async fn test_usable_as_trait_object() {
        let implementations: Vec<Box<dyn CacheImplementation>> = vec![
            Box::new(BackendImplementation::new("a", InMemoryBackend::new())),
            Box::new(BackendImplementation::new("b", InMemoryBackend::new())),
        ];

        for implementation in &implementations {
            assert!(implementation.add(&key(ExpirationType::Absolute), vec![7]).await);
            assert_eq!(implementation.count().await, 1);
        }
    }
}
