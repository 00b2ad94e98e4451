//! Per-operation backend selection.
//!
//! An [`ImplementationSelector`] owns a small registry of named
//! [`CacheImplementation`]s and a selection policy. Every cache operation asks
//! it for a backend given the key's duration, storage style and expiration
//! type. Selection is stateless and never retried.
//!
//! [`TieredPolicy`] is the bundled policy: short-lived entries prefer the
//! local engine, long-lived ones prefer the distributed engine, and each falls
//! back to the other when the preferred one is disabled or cannot honour the
//! requested expiration.
//!
//! ```
//! use cache_facade::backend::InMemoryBackend;
//! use cache_facade::implementation::BackendImplementation;
//! use cache_facade::key::{ExpirationType, StorageStyle};
//! use cache_facade::selector::{ImplementationSelector, TieredPolicy};
//! use std::time::Duration;
//!
//! # fn main() -> cache_facade::Result<()> {
//! let selector = ImplementationSelector::builder()
//!     .implementation(BackendImplementation::new("local", InMemoryBackend::new()))
//!     .implementation(BackendImplementation::new("shared", InMemoryBackend::new()))
//!     .tiered(TieredPolicy::new("local", "shared"))
//!     .build()?;
//!
//! let chosen = selector.select(
//!     Duration::from_secs(30),
//!     StorageStyle::Unmodified,
//!     ExpirationType::Absolute,
//! )?;
//! assert_eq!(chosen.id(), "local");
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use crate::implementation::CacheImplementation;
use crate::key::{ExpirationType, StorageStyle};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on implementations per selector.
pub const MAX_IMPLEMENTATIONS: usize = 10;

/// Durations at or above this go to the distributed engine first.
pub const DEFAULT_LONG_TERM_BOUNDARY: Duration = Duration::from_secs(10 * 60);

/// Chooses an implementation for one operation.
pub type SelectionPolicy = Arc<
    dyn Fn(
            Duration,
            StorageStyle,
            ExpirationType,
            &ImplementationRegistry,
        ) -> Result<Arc<dyn CacheImplementation>>
        + Send
        + Sync,
>;

/// Registered implementations in registration order.
pub struct ImplementationRegistry {
    entries: Vec<Arc<dyn CacheImplementation>>,
}

impl ImplementationRegistry {
    pub fn get(&self, id: &str) -> Option<&Arc<dyn CacheImplementation>> {
        self.entries.iter().find(|entry| entry.id() == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.id()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn CacheImplementation>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ImplementationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.entries
                    .iter()
                    .map(|entry| (entry.id(), entry.is_enabled())),
            )
            .finish()
    }
}

/// Registry plus policy. See the module docs.
pub struct ImplementationSelector {
    registry: ImplementationRegistry,
    policy: SelectionPolicy,
}

impl ImplementationSelector {
    pub fn builder() -> ImplementationSelectorBuilder {
        ImplementationSelectorBuilder::default()
    }

    /// Shorthand for the builder with every implementation and a policy.
    ///
    /// # Errors
    /// Same as [`ImplementationSelectorBuilder::build`].
    pub fn new(
        implementations: Vec<Arc<dyn CacheImplementation>>,
        policy: SelectionPolicy,
    ) -> Result<Self> {
        ImplementationSelectorBuilder {
            implementations,
            policy: Some(policy),
            max_implementations: MAX_IMPLEMENTATIONS,
        }
        .build()
    }

    /// Pick the implementation for an operation.
    ///
    /// # Errors
    /// `InvalidArgument` for a zero duration, otherwise whatever the policy
    /// returns (typically `CacheSelectionFailure` or `ConfigurationError`).
    pub fn select(
        &self,
        duration: Duration,
        style: StorageStyle,
        expiration: ExpirationType,
    ) -> Result<Arc<dyn CacheImplementation>> {
        if duration.is_zero() {
            return Err(Error::InvalidArgument(
                "duration to store must be positive".to_string(),
            ));
        }

        let chosen = (self.policy)(duration, style, expiration, &self.registry)?;
        trace!(
            "Selected {} for {:?} {} {}",
            chosen.id(),
            duration,
            style,
            expiration
        );
        Ok(chosen)
    }

    /// # Errors
    /// `InvalidArgument` when `id` was never registered.
    pub fn enable(&self, id: &str) -> Result<()> {
        self.lookup(id)?.set_enabled(true);
        Ok(())
    }

    /// # Errors
    /// `InvalidArgument` when `id` was never registered.
    pub fn disable(&self, id: &str) -> Result<()> {
        self.lookup(id)?.set_enabled(false);
        Ok(())
    }

    pub fn registry(&self) -> &ImplementationRegistry {
        &self.registry
    }

    fn lookup(&self, id: &str) -> Result<&Arc<dyn CacheImplementation>> {
        self.registry.get(id).ok_or_else(|| {
            Error::InvalidArgument(format!("no cache implementation registered as '{}'", id))
        })
    }
}

impl fmt::Debug for ImplementationSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImplementationSelector")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Collects implementations and a policy for an [`ImplementationSelector`].
pub struct ImplementationSelectorBuilder {
    implementations: Vec<Arc<dyn CacheImplementation>>,
    policy: Option<SelectionPolicy>,
    max_implementations: usize,
}

impl Default for ImplementationSelectorBuilder {
    fn default() -> Self {
        ImplementationSelectorBuilder {
            implementations: Vec::new(),
            policy: None,
            max_implementations: MAX_IMPLEMENTATIONS,
        }
    }
}

impl ImplementationSelectorBuilder {
    pub fn implementation(mut self, implementation: impl CacheImplementation + 'static) -> Self {
        self.implementations.push(Arc::new(implementation));
        self
    }

    /// Register an implementation the caller keeps a handle to.
    pub fn shared_implementation(mut self, implementation: Arc<dyn CacheImplementation>) -> Self {
        self.implementations.push(implementation);
        self
    }

    pub fn policy<F>(mut self, policy: F) -> Self
    where
        F: Fn(
                Duration,
                StorageStyle,
                ExpirationType,
                &ImplementationRegistry,
            ) -> Result<Arc<dyn CacheImplementation>>
            + Send
            + Sync
            + 'static,
    {
        self.policy = Some(Arc::new(policy));
        self
    }

    pub fn tiered(self, tiered: TieredPolicy) -> Self {
        self.policy(move |duration, _style, expiration, registry| {
            tiered.select(duration, expiration, registry)
        })
    }

    /// Lower the implementation cap. Values above [`MAX_IMPLEMENTATIONS`] are clamped.
    pub fn max_implementations(mut self, max: usize) -> Self {
        self.max_implementations = max.min(MAX_IMPLEMENTATIONS);
        self
    }

    /// # Errors
    /// `ConfigurationError` when the list is empty or over the cap, no policy
    /// was given, two implementations share an id, or none is enabled.
    pub fn build(self) -> Result<ImplementationSelector> {
        if self.implementations.is_empty() {
            return Err(Error::ConfigurationError(
                "at least one cache implementation is required".to_string(),
            ));
        }

        if self.implementations.len() > self.max_implementations {
            return Err(Error::ConfigurationError(format!(
                "{} cache implementations registered, at most {} allowed",
                self.implementations.len(),
                self.max_implementations
            )));
        }

        let policy = self.policy.ok_or_else(|| {
            Error::ConfigurationError("a selection policy is required".to_string())
        })?;

        for (index, implementation) in self.implementations.iter().enumerate() {
            let duplicate = self.implementations[..index]
                .iter()
                .any(|earlier| earlier.id() == implementation.id());
            if duplicate {
                return Err(Error::ConfigurationError(format!(
                    "duplicate cache implementation id '{}'",
                    implementation.id()
                )));
            }
        }

        if !self.implementations.iter().any(|i| i.is_enabled()) {
            return Err(Error::ConfigurationError(
                "none of the cache implementations is enabled".to_string(),
            ));
        }

        let registry = ImplementationRegistry {
            entries: self.implementations,
        };
        info!("✓ Cache selector initialized with {:?}", registry);

        Ok(ImplementationSelector { registry, policy })
    }
}

/// Local-first for short durations, distributed-first for long ones.
#[derive(Clone, Debug)]
pub struct TieredPolicy {
    pub long_term_boundary: Duration,
    pub local_id: String,
    pub distributed_id: String,
}

impl TieredPolicy {
    pub fn new(local_id: impl Into<String>, distributed_id: impl Into<String>) -> Self {
        TieredPolicy {
            long_term_boundary: DEFAULT_LONG_TERM_BOUNDARY,
            local_id: local_id.into(),
            distributed_id: distributed_id.into(),
        }
    }

    pub fn with_boundary(mut self, long_term_boundary: Duration) -> Self {
        self.long_term_boundary = long_term_boundary;
        self
    }

    /// # Errors
    /// `ConfigurationError` if either id is unregistered;
    /// `CacheSelectionFailure` if neither candidate is enabled and supports `expiration`.
    pub fn select(
        &self,
        duration: Duration,
        expiration: ExpirationType,
        registry: &ImplementationRegistry,
    ) -> Result<Arc<dyn CacheImplementation>> {
        let local = self.named(registry, &self.local_id)?;
        let distributed = self.named(registry, &self.distributed_id)?;

        let preference = if duration >= self.long_term_boundary {
            [distributed, local]
        } else {
            [local, distributed]
        };

        preference
            .into_iter()
            .find(|candidate| candidate.is_enabled() && candidate.supports(expiration))
            .cloned()
            .ok_or_else(|| {
                Error::CacheSelectionFailure(format!(
                    "no enabled cache implementation supports {} expiration for {:?}; registered: [{}]",
                    expiration,
                    duration,
                    registry.ids().join(", ")
                ))
            })
    }

    fn named<'a>(
        &self,
        registry: &'a ImplementationRegistry,
        id: &str,
    ) -> Result<&'a Arc<dyn CacheImplementation>> {
        registry.get(id).ok_or_else(|| {
            Error::ConfigurationError(format!(
                "tiered policy refers to unregistered cache implementation '{}'",
                id
            ))
        })
    }
}
