//! Wrap an async function so its results go through the cache.
//!
//! ```ignore
//! use cache_facade::decorate::{CachePolicy, CachedFn};
//! use std::time::Duration;
//!
//! let policy = CachePolicy::new(Duration::from_secs(600))
//!     .with_recalculation(Duration::from_secs(60));
//!
//! let exchange_rate = CachedFn::new(
//!     cache.clone(),
//!     policy,
//!     |pair: &(String, String)| format!("rate:{}:{}", pair.0, pair.1),
//!     |pair| async move { fetch_rate(&pair.0, &pair.1).await },
//! )?;
//!
//! let eur_usd: f64 = exchange_rate.call(("EUR".into(), "USD".into())).await?;
//! ```

use crate::error::{Error, Result};
use crate::facade::Cache;
use crate::key::{ExpirationType, Key, StorageStyle};
use crate::recalculation::RecalculationPolicy;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// Longest store duration a policy accepts.
pub const MAX_POLICY_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// How the results of a wrapped function are cached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CachePolicy {
    pub duration_to_store: Duration,
    pub storage_style: StorageStyle,
    pub expiration_type: ExpirationType,
    /// Keep entries warm by recomputing this long before they expire.
    pub recalculation: Option<RecalculationPolicy>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        CachePolicy {
            duration_to_store: crate::config::DEFAULT_DURATION,
            storage_style: StorageStyle::Unmodified,
            expiration_type: ExpirationType::Sliding,
            recalculation: None,
        }
    }
}

impl CachePolicy {
    pub fn new(duration_to_store: Duration) -> Self {
        CachePolicy {
            duration_to_store,
            ..Default::default()
        }
    }

    pub fn with_storage_style(mut self, storage_style: StorageStyle) -> Self {
        self.storage_style = storage_style;
        self
    }

    pub fn with_expiration_type(mut self, expiration_type: ExpirationType) -> Self {
        self.expiration_type = expiration_type;
        self
    }

    pub fn with_recalculation(mut self, time_before_expiry: Duration) -> Self {
        self.recalculation = Some(RecalculationPolicy::new(time_before_expiry));
        self
    }

    /// # Errors
    /// `InvalidArgument` for a duration outside `(0, 365 days]` or a
    /// recalculation window not shorter than the duration.
    pub fn validate(&self) -> Result<()> {
        if self.duration_to_store.is_zero() || self.duration_to_store > MAX_POLICY_DURATION {
            return Err(Error::InvalidArgument(format!(
                "duration_to_store must be positive and at most {:?}, got {:?}",
                MAX_POLICY_DURATION, self.duration_to_store
            )));
        }
        if let Some(recalculation) = &self.recalculation {
            recalculation.interval(self.duration_to_store)?;
        }
        Ok(())
    }

    /// Key for one call.
    ///
    /// # Errors
    /// `InvalidArgument` for a blank or overlong friendly name.
    pub fn key_for(&self, friendly_name: impl Into<String>) -> Result<Key> {
        Key::new(
            self.duration_to_store,
            self.storage_style,
            self.expiration_type,
            friendly_name,
        )
    }
}

/// An async function whose results are cached per argument.
///
/// `friendly_name` turns the arguments into the cache identity; calls that
/// map to the same name share one entry.
pub struct CachedFn<A, T, N, F> {
    cache: Cache,
    policy: CachePolicy,
    friendly_name: N,
    inner: Arc<F>,
    _marker: PhantomData<fn(A) -> T>,
}

impl<A, T, N, F, Fut> CachedFn<A, T, N, F>
where
    A: Clone + Send + Sync + 'static,
    T: Serialize + DeserializeOwned + Send + 'static,
    N: Fn(&A) -> String,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    /// # Errors
    /// `InvalidArgument` if the policy does not validate.
    pub fn new(cache: Cache, policy: CachePolicy, friendly_name: N, inner: F) -> Result<Self> {
        policy.validate()?;
        Ok(CachedFn {
            cache,
            policy,
            friendly_name,
            inner: Arc::new(inner),
            _marker: PhantomData,
        })
    }

    /// Cached result for `args`, computing it on a miss.
    ///
    /// # Errors
    /// `InvalidArgument` when the name built from `args` is not a valid
    /// friendly name, the wrapped function's own error, or cache errors as
    /// for [`Cache::get_or_compute`].
    pub async fn call(&self, args: A) -> Result<T> {
        let key = self.policy.key_for((self.friendly_name)(&args))?;
        let inner = Arc::clone(&self.inner);

        self.cache
            .get_or_compute(
                &key,
                move || (*inner)(args.clone()),
                self.policy.recalculation,
            )
            .await
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }
}

impl<A, T, N, F> fmt::Debug for CachedFn<A, T, N, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedFn")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
