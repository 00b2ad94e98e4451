//! Facade-wide settings.
//!
//! Backend connection settings stay with their backends
//! ([`RedisConfig`](crate::backend::RedisConfig),
//! [`MemcachedConfig`](crate::backend::MemcachedConfig)); this covers the
//! knobs shared by selection, decoration and refresh.
//!
//! | Variable | Field | Format |
//! |---|---|---|
//! | `CACHE_LONG_TERM_BOUNDARY_SECS` | `long_term_boundary` | whole seconds |
//! | `CACHE_DEFAULT_DURATION_SECS` | `default_duration` | whole seconds |
//! | `CACHE_DEFAULT_EXPIRATION` | `default_expiration_type` | `absolute` / `sliding` |
//! | `CACHE_LEASE_NAMESPACE` | `lease_namespace` | any string |

use crate::decorate::CachePolicy;
use crate::error::{Error, Result};
use crate::key::{ExpirationType, StorageStyle};
use crate::recalculation::DEFAULT_LEASE_NAMESPACE;
use crate::selector::{
    ImplementationSelector, ImplementationSelectorBuilder, TieredPolicy,
    DEFAULT_LONG_TERM_BOUNDARY, MAX_IMPLEMENTATIONS,
};
use std::time::Duration;

pub const LONG_TERM_BOUNDARY_ENV: &str = "CACHE_LONG_TERM_BOUNDARY_SECS";
pub const DEFAULT_DURATION_ENV: &str = "CACHE_DEFAULT_DURATION_SECS";
pub const DEFAULT_EXPIRATION_ENV: &str = "CACHE_DEFAULT_EXPIRATION";
pub const LEASE_NAMESPACE_ENV: &str = "CACHE_LEASE_NAMESPACE";

/// Default store duration for decorated calls.
pub const DEFAULT_DURATION: Duration = Duration::from_secs(5 * 60);

#[derive(Clone, Debug, PartialEq)]
pub struct FacadeConfig {
    /// Durations at or above this prefer the distributed backend.
    pub long_term_boundary: Duration,
    pub default_duration: Duration,
    pub default_expiration_type: ExpirationType,
    /// Prefix of refresh lease names; caches that must not refresh the same
    /// key twice need the same namespace.
    pub lease_namespace: String,
    pub max_implementations: usize,
}

impl Default for FacadeConfig {
    fn default() -> Self {
        FacadeConfig {
            long_term_boundary: DEFAULT_LONG_TERM_BOUNDARY,
            default_duration: DEFAULT_DURATION,
            default_expiration_type: ExpirationType::Sliding,
            lease_namespace: DEFAULT_LEASE_NAMESPACE.to_string(),
            max_implementations: MAX_IMPLEMENTATIONS,
        }
    }
}

impl FacadeConfig {
    /// Defaults overridden by whichever `CACHE_*` variables are set.
    ///
    /// # Errors
    /// `ConfigurationError` for an unparsable or out-of-range value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = FacadeConfig::default();

        if let Some(value) = lookup(LONG_TERM_BOUNDARY_ENV) {
            config.long_term_boundary = parse_secs(LONG_TERM_BOUNDARY_ENV, &value)?;
        }
        if let Some(value) = lookup(DEFAULT_DURATION_ENV) {
            config.default_duration = parse_secs(DEFAULT_DURATION_ENV, &value)?;
        }
        if let Some(value) = lookup(DEFAULT_EXPIRATION_ENV) {
            config.default_expiration_type = value.parse().map_err(|e| {
                Error::ConfigurationError(format!("{}: {}", DEFAULT_EXPIRATION_ENV, e))
            })?;
        }
        if let Some(value) = lookup(LEASE_NAMESPACE_ENV) {
            config.lease_namespace = value;
        }

        config.validate()?;
        debug!("Facade configuration: {:?}", config);
        Ok(config)
    }

    /// # Errors
    /// `ConfigurationError` for zero durations or a cap outside `1..=MAX_IMPLEMENTATIONS`.
    pub fn validate(&self) -> Result<()> {
        if self.long_term_boundary.is_zero() {
            return Err(Error::ConfigurationError(
                "long term boundary must be positive".to_string(),
            ));
        }
        if self.default_duration.is_zero() {
            return Err(Error::ConfigurationError(
                "default duration must be positive".to_string(),
            ));
        }
        if !(1..=MAX_IMPLEMENTATIONS).contains(&self.max_implementations) {
            return Err(Error::ConfigurationError(format!(
                "max implementations must be between 1 and {}, got {}",
                MAX_IMPLEMENTATIONS, self.max_implementations
            )));
        }
        Ok(())
    }

    /// Tiered policy using this boundary.
    pub fn tiered_policy(
        &self,
        local_id: impl Into<String>,
        distributed_id: impl Into<String>,
    ) -> TieredPolicy {
        TieredPolicy::new(local_id, distributed_id).with_boundary(self.long_term_boundary)
    }

    /// Selector builder capped at `max_implementations`.
    pub fn selector_builder(&self) -> ImplementationSelectorBuilder {
        ImplementationSelector::builder().max_implementations(self.max_implementations)
    }

    /// Decoration policy with the configured defaults.
    pub fn cache_policy(&self) -> CachePolicy {
        CachePolicy {
            duration_to_store: self.default_duration,
            storage_style: StorageStyle::Unmodified,
            expiration_type: self.default_expiration_type,
            recalculation: None,
        }
    }
}

fn parse_secs(name: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| Error::ConfigurationError(format!("{}={:?}: {}", name, value, e)))
}
