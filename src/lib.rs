//! # cache-facade
//!
//! A cache facade that routes every operation to one of several backends
//! (in-process, Redis, Memcached) by policy, and can keep expensive entries
//! warm by recomputing them in the background shortly before they expire.
//!
//! ## Features
//!
//! - **Self-describing keys:** a [`Key`] carries its store duration, storage
//!   style and expiration type, and encodes to a canonical string
//! - **Policy routing:** an [`ImplementationSelector`] picks the backend per
//!   call; [`TieredPolicy`] keeps short-lived entries local and long-lived
//!   ones distributed, falling back when a backend is disabled
//! - **Value pipeline:** values are serialized into a versioned envelope,
//!   then optionally compressed and encrypted
//! - **Refresh-ahead:** [`Cache::get_or_compute`] and [`CachedFn`] start one
//!   background refresh loop per key, guarded by a lease
//! - **Failure isolation:** a failing backend reads as a miss and writes as
//!   `false`; it never takes the facade down
//!
//! ## Quick Start
//!
//! ```ignore
//! use cache_facade::{
//!     backend::{InMemoryBackend, RedisBackend},
//!     BackendImplementation, Cache, ExpirationType, ImplementationSelector, Key,
//!     RecalculationPolicy, StorageStyle, TieredPolicy,
//! };
//! use std::time::Duration;
//!
//! // 1. Register backends and a selection policy
//! let selector = ImplementationSelector::builder()
//!     .implementation(BackendImplementation::new("local", InMemoryBackend::new()))
//!     .implementation(BackendImplementation::new(
//!         "shared",
//!         RedisBackend::from_connection_string("redis://localhost:6379").await?,
//!     ))
//!     .tiered(TieredPolicy::new("local", "shared"))
//!     .build()?;
//!
//! // 2. Build the cache (Clone, cheap to share)
//! let cache = Cache::new(selector);
//!
//! // 3. Read through it
//! let key = Key::new(
//!     Duration::from_secs(300),
//!     StorageStyle::Compressed,
//!     ExpirationType::Absolute,
//!     "report-42",
//! )?;
//! let report: Report = cache
//!     .get_or_compute(
//!         &key,
//!         || async { build_report(42).await },
//!         Some(RecalculationPolicy::new(Duration::from_secs(30))),
//!     )
//!     .await?;
//! ```

#[macro_use]
extern crate log;

pub mod backend;
pub mod config;
pub mod decorate;
pub mod encoding;
pub mod error;
pub mod facade;
pub mod implementation;
pub mod key;
pub mod lease;
pub mod observability;
pub mod recalculation;
pub mod selector;
pub mod serialization;
pub mod strategy;

// Re-exports for convenience
pub use backend::CacheBackend;
pub use config::FacadeConfig;
pub use decorate::{CachePolicy, CachedFn};
pub use encoding::CacheItemEncoder;
pub use error::{Error, Result};
pub use facade::{Cache, CacheBuilder};
pub use implementation::{BackendImplementation, CacheImplementation};
pub use key::{ExpirationType, Key, StorageStyle};
pub use lease::{LeaseProvider, LocalLeaseProvider};
pub use recalculation::{RecalculationOutcome, RecalculationPolicy};
pub use selector::{ImplementationSelector, TieredPolicy};
pub use strategy::CachingStrategy;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
