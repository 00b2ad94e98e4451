//! Hooks a [`Cache`](crate::facade::Cache) calls around every operation.
//!
//! Implement [`CacheMetrics`] to export counters and latencies, then install
//! it with [`CacheBuilder::metrics`](crate::facade::CacheBuilder::metrics).
//! Every hook defaults to a `log` line, so an exporter only overrides what it
//! tracks:
//!
//! ```ignore
//! use cache_facade::observability::CacheMetrics;
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use std::time::Duration;
//!
//! #[derive(Default)]
//! struct RefreshCounter(AtomicU64);
//!
//! impl CacheMetrics for RefreshCounter {
//!     fn record_refresh(&self, _key: &str, _took: Duration, stored: bool) {
//!         if stored {
//!             self.0.fetch_add(1, Ordering::Relaxed);
//!         }
//!     }
//! }
//! ```
//!
//! Hooks receive the canonical key string. Caches built without a sink use
//! [`NoOpMetrics`].

use std::time::Duration;

/// Per-operation callbacks. Durations cover encoding plus the backend call.
pub trait CacheMetrics: Send + Sync {
    fn record_hit(&self, key: &str, duration: Duration) {
        debug!("cache hit {} ({:?})", key, duration);
    }

    fn record_miss(&self, key: &str, duration: Duration) {
        debug!("cache miss {} ({:?})", key, duration);
    }

    fn record_set(&self, key: &str, duration: Duration) {
        debug!("cache add {} ({:?})", key, duration);
    }

    fn record_delete(&self, key: &str, duration: Duration) {
        debug!("cache remove {} ({:?})", key, duration);
    }

    /// An operation failed; `error` is the rendered [`Error`](crate::Error).
    fn record_error(&self, key: &str, error: &str) {
        warn!("cache operation on {} failed: {}", key, error);
    }

    /// Record one background recomputation and whether its write landed.
    fn record_refresh(&self, key: &str, duration: Duration, stored: bool) {
        debug!("cache refresh {} ({:?}, stored={})", key, duration, stored);
    }
}

/// Discards every hook.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpMetrics;

impl CacheMetrics for NoOpMetrics {
    fn record_hit(&self, _key: &str, _duration: Duration) {}
    fn record_miss(&self, _key: &str, _duration: Duration) {}
    fn record_set(&self, _key: &str, _duration: Duration) {}
    fn record_delete(&self, _key: &str, _duration: Duration) {}
    fn record_error(&self, _key: &str, _error: &str) {}
    fn record_refresh(&self, _key: &str, _duration: Duration, _stored: bool) {}
}
