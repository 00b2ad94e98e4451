//! The public entry point.
//!
//! [`Cache`] turns typed values into bytes per the key's storage style, lets
//! the [`CachingStrategy`] pick a backend, and starts background refresh
//! loops for computations that asked for one.
//!
//! ```ignore
//! use cache_facade::{Cache, Key, StorageStyle, ExpirationType, RecalculationPolicy};
//! use std::time::Duration;
//!
//! let cache = Cache::new(selector);
//! let key = Key::new(
//!     Duration::from_secs(300),
//!     StorageStyle::Compressed,
//!     ExpirationType::Absolute,
//!     "report-42",
//! )?;
//!
//! // Computed once, then kept warm: recomputed 30s before every expiry.
//! let report: Report = cache
//!     .get_or_compute(
//!         &key,
//!         || async { build_report(42).await },
//!         Some(RecalculationPolicy::new(Duration::from_secs(30))),
//!     )
//!     .await?;
//! ```

use crate::config::FacadeConfig;
use crate::encoding::CacheItemEncoder;
use crate::error::Result;
use crate::key::Key;
use crate::lease::{LeaseProvider, LocalLeaseProvider};
use crate::observability::{CacheMetrics, NoOpMetrics};
use crate::recalculation::{
    refresh_step, RecalculationCoordinator, RecalculationOutcome, RecalculationPolicy,
    RefreshTick, DEFAULT_LEASE_NAMESPACE,
};
use crate::selector::ImplementationSelector;
use crate::strategy::CachingStrategy;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Instant;

/// Typed cache over a set of backends.
///
/// Cheap to clone; clones share backends, encoder and refresh loops.
/// Refresh loops hold only a weak handle, so they wind down on their own
/// once the last clone is dropped.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    strategy: CachingStrategy,
    encoder: CacheItemEncoder,
    coordinator: RecalculationCoordinator,
    metrics: Box<dyn CacheMetrics>,
}

impl CacheInner {
    fn encode<T: Serialize + ?Sized>(&self, key: &Key, value: &T) -> Result<Vec<u8>> {
        self.encoder.encode(value, key.storage_style())
    }

    async fn store(&self, key: &Key, bytes: Vec<u8>) -> Result<bool> {
        let timer = Instant::now();
        let stored = self.strategy.add(key, bytes).await?;
        if stored {
            self.metrics.record_set(&key.encode(), timer.elapsed());
        } else {
            self.metrics
                .record_error(&key.encode(), "backend refused the write");
        }
        Ok(stored)
    }
}

impl Cache {
    /// Cache with the default encoder, an in-process lease table and no metrics.
    pub fn new(selector: ImplementationSelector) -> Self {
        CacheBuilder::new(selector).build()
    }

    pub fn builder(selector: ImplementationSelector) -> CacheBuilder {
        CacheBuilder::new(selector)
    }

    /// Store `value` under `key`.
    ///
    /// Returns the backend's success flag; a failing backend is `Ok(false)`.
    ///
    /// # Errors
    /// - `CacheSelectionFailure` / `ConfigurationError` from backend selection
    /// - `SerializationError`, `CompressionError`, `EncryptionError` from encoding
    /// - `ConfigurationError` for an encrypted style on a cache without encryptor
    pub async fn add<T: Serialize + ?Sized>(&self, key: &Key, value: &T) -> Result<bool> {
        let bytes = self.record(key, self.inner.encode(key, value))?;
        let result = self.inner.store(key, bytes).await;
        self.record(key, result)
    }

    /// Fetch and decode the value under `key`. A miss is `Ok(None)`.
    ///
    /// # Errors
    /// Selection errors, and decode errors for entries that were written
    /// with another schema, style or encryption key.
    pub async fn get<T: DeserializeOwned>(&self, key: &Key) -> Result<Option<T>> {
        let timer = Instant::now();
        let canonical = key.encode();

        let found = self.record(key, self.inner.strategy.get(key).await)?;
        match found {
            Some(bytes) => {
                let value = self.record(
                    key,
                    self.inner.encoder.decode(&bytes, key.storage_style()),
                )?;
                self.inner.metrics.record_hit(&canonical, timer.elapsed());
                Ok(Some(value))
            }
            None => {
                self.inner.metrics.record_miss(&canonical, timer.elapsed());
                Ok(None)
            }
        }
    }

    /// [`get`](Self::get) by canonical key string.
    ///
    /// # Errors
    /// `InvalidKeyFormat` for a malformed string, otherwise as `get`.
    pub async fn get_raw<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let key = Key::decode(key)?;
        self.get(&key).await
    }

    /// Remove the entry and stop its refresh loop, if any.
    ///
    /// # Errors
    /// Selection errors only.
    pub async fn remove(&self, key: &Key) -> Result<()> {
        let timer = Instant::now();
        self.inner.coordinator.stop(key).await;

        let result = self.inner.strategy.remove(key).await;
        self.record(key, result)?;
        self.inner
            .metrics
            .record_delete(&key.encode(), timer.elapsed());
        Ok(())
    }

    /// Clear every backend and stop every refresh loop of this cache.
    pub async fn remove_all(&self) {
        let stopped = self.inner.coordinator.stop_all().await;
        if stopped > 0 {
            info!("Stopped {} refresh loop(s)", stopped);
        }
        self.inner.strategy.remove_all().await;
    }

    /// Entries across all registered backends.
    pub async fn count_all(&self) -> usize {
        self.inner.strategy.count_all().await
    }

    /// Cached value, or the result of `routine` stored for next time.
    ///
    /// On a miss `routine` runs once on the calling task. With a
    /// `recalculation` policy the key is then handed to the refresh
    /// coordinator, which re-runs `routine` ahead of every expiry until the
    /// entry is removed or this cache is dropped. At most one loop runs per
    /// key and lease namespace; other callers just get the value.
    ///
    /// An entry that cannot be decoded (older schema, other key) is logged
    /// and recomputed.
    ///
    /// # Errors
    /// - `InvalidArgument` when the recalculation window is not shorter than
    ///   the key's duration, before anything is read or computed
    /// - the routine's own error, unchanged
    /// - selection and encoding errors as for `add` / `get`
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &Key,
        routine: F,
        recalculation: Option<RecalculationPolicy>,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if let Some(policy) = &recalculation {
            policy.interval(key.duration_to_store())?;
        }

        match self.get::<T>(key).await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(e) if e.is_unreadable_entry() => {
                warn!("⚠ Unreadable entry for {}, recomputing: {}", key, e);
            }
            Err(e) => return Err(e),
        }

        let value = routine().await?;
        let bytes = self.record(key, self.inner.encode(key, &value))?;
        let stored = self.record(key, self.inner.store(key, bytes).await)?;
        if !stored {
            debug!("Computed value for {} was not cached", key);
        }

        if let Some(policy) = recalculation {
            self.start_refresh(key, routine, policy).await?;
        }

        Ok(value)
    }

    /// Keep `key` warm by re-running `routine` every
    /// `duration_to_store - time_before_expiry`.
    ///
    /// Call right after storing a fresh value; the first recomputation
    /// happens one interval from now.
    ///
    /// # Errors
    /// `InvalidArgument` for a window not shorter than the key's duration.
    pub async fn start_refresh<T, F, Fut>(
        &self,
        key: &Key,
        routine: F,
        policy: RecalculationPolicy,
    ) -> Result<RecalculationOutcome>
    where
        T: Serialize + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let cache: Weak<CacheInner> = Arc::downgrade(&self.inner);
        let refresh_key = key.clone();
        let routine = Arc::new(routine);

        let step = refresh_step(move || {
            let cache = Weak::clone(&cache);
            let key = refresh_key.clone();
            let routine = Arc::clone(&routine);
            async move {
                if cache.strong_count() == 0 {
                    return Ok(RefreshTick::CacheDropped);
                }

                let timer = Instant::now();
                let value = (*routine)().await?;

                let Some(inner) = cache.upgrade() else {
                    return Ok(RefreshTick::CacheDropped);
                };
                let bytes = inner.encode(&key, &value)?;
                drop(value);
                let stored = inner.store(&key, bytes).await?;
                inner
                    .metrics
                    .record_refresh(&key.encode(), timer.elapsed(), stored);
                Ok(RefreshTick::Stored(stored))
            }
        });

        self.inner
            .coordinator
            .ensure_started(key, policy, step)
            .await
    }

    /// Stop the refresh loop for `key`. Returns whether one was running here.
    pub async fn stop_refresh(&self, key: &Key) -> bool {
        self.inner.coordinator.stop(key).await
    }

    pub fn is_refreshing(&self, key: &Key) -> bool {
        self.inner.coordinator.is_running(key)
    }

    /// Refresh loops owned by this cache.
    pub fn active_refreshes(&self) -> usize {
        self.inner.coordinator.active()
    }

    /// The selector, for enabling and disabling backends at runtime.
    pub fn selector(&self) -> &ImplementationSelector {
        self.inner.strategy.selector()
    }

    fn record<V>(&self, key: &Key, result: Result<V>) -> Result<V> {
        if let Err(e) = &result {
            self.inner.metrics.record_error(&key.encode(), &e.to_string());
        }
        result
    }
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("strategy", &self.inner.strategy)
            .field("encoder", &self.inner.encoder)
            .field("coordinator", &self.inner.coordinator)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Cache`].
pub struct CacheBuilder {
    selector: ImplementationSelector,
    encoder: CacheItemEncoder,
    leases: Option<Arc<dyn LeaseProvider>>,
    lease_namespace: String,
    metrics: Box<dyn CacheMetrics>,
}

impl CacheBuilder {
    pub fn new(selector: ImplementationSelector) -> Self {
        CacheBuilder {
            selector,
            encoder: CacheItemEncoder::default(),
            leases: None,
            lease_namespace: DEFAULT_LEASE_NAMESPACE.to_string(),
            metrics: Box::new(NoOpMetrics),
        }
    }

    /// Value pipeline. Needs an encryptor for the encrypted storage styles.
    pub fn encoder(mut self, encoder: CacheItemEncoder) -> Self {
        self.encoder = encoder;
        self
    }

    /// Where refresh leases live. Defaults to a private [`LocalLeaseProvider`];
    /// caches that must not refresh the same key twice have to share one.
    pub fn lease_provider(mut self, leases: Arc<dyn LeaseProvider>) -> Self {
        self.leases = Some(leases);
        self
    }

    pub fn lease_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.lease_namespace = namespace.into();
        self
    }

    pub fn metrics(mut self, metrics: Box<dyn CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Apply the facade-wide settings that concern the cache itself.
    pub fn config(self, config: &FacadeConfig) -> Self {
        self.lease_namespace(config.lease_namespace.clone())
    }

    pub fn build(self) -> Cache {
        let leases = self
            .leases
            .unwrap_or_else(|| Arc::new(LocalLeaseProvider::new()));

        info!(
            "✓ Cache initialized (lease namespace {:?}, encryption: {})",
            self.lease_namespace,
            self.encoder.has_encryptor()
        );

        Cache {
            inner: Arc::new(CacheInner {
                strategy: CachingStrategy::new(self.selector),
                encoder: self.encoder,
                coordinator: RecalculationCoordinator::new(leases, self.lease_namespace),
                metrics: self.metrics,
            }),
        }
    }
}
