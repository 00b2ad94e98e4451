//! Process-local engine.
//!
//! A sharded `DashMap` keyed by encoded cache keys. Expired slots are dropped
//! lazily when a read finds them and in bulk by [`InMemoryBackend::purge_expired`].

use super::CacheBackend;
use crate::error::Result;
use crate::key::ExpirationType;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const LOCAL_EXPIRATIONS: &[ExpirationType] = &[ExpirationType::Absolute, ExpirationType::Sliding];

#[derive(Clone, Copy, Debug)]
enum Expiry {
    Never,
    At(Instant),
    /// Deadline moves to `now + window` on every hit.
    Sliding { deadline: Instant, window: Duration },
}

struct Slot {
    bytes: Vec<u8>,
    expiry: Expiry,
}

impl Slot {
    fn is_stale(&self, now: Instant) -> bool {
        match self.expiry {
            Expiry::Never => false,
            Expiry::At(deadline) | Expiry::Sliding { deadline, .. } => now > deadline,
        }
    }

    fn touch(&mut self, now: Instant) {
        if let Expiry::Sliding { window, .. } = self.expiry {
            self.expiry = Expiry::sliding(now, window);
        }
    }
}

impl Expiry {
    /// A ttl past what the clock can represent never expires.
    fn absolute(now: Instant, ttl: Duration) -> Self {
        match now.checked_add(ttl) {
            Some(deadline) => Expiry::At(deadline),
            None => Expiry::Never,
        }
    }

    fn sliding(now: Instant, window: Duration) -> Self {
        match now.checked_add(window) {
            Some(deadline) => Expiry::Sliding { deadline, window },
            None => Expiry::Never,
        }
    }
}

/// The facade's "local" engine and the only bundled one that honours
/// [`ExpirationType::Sliding`]. Clones share one store.
///
/// Deadlines are measured on tokio's clock, so a test with a paused clock can
/// step past a TTL with `tokio::time::advance`.
///
/// ```no_run
/// use cache_facade::backend::{CacheBackend, InMemoryBackend};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> cache_facade::Result<()> {
/// let local = InMemoryBackend::new();
/// local.set("300:0:0:cmVwb3J0", b"report".to_vec(), Some(Duration::from_secs(300))).await?;
/// local.set_sliding("60:0:1:c2Vzc2lvbg==", b"session".to_vec(), Duration::from_secs(60)).await?;
/// assert!(local.get("300:0:0:cmVwb3J0").await?.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    slots: Arc<DashMap<String, Slot>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored slots, counting stale ones that have not been purged yet.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drops every stale slot and returns how many went.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| !slot.is_stale(now));
        let purged = before.saturating_sub(self.slots.len());
        if purged > 0 {
            debug!("local cache purged {} stale entries", purged);
        }
        purged
    }

    fn put(&self, key: &str, bytes: Vec<u8>, expiry: Expiry) {
        trace!("local cache PUT {} {:?}", key, expiry);
        self.slots.insert(key.to_string(), Slot { bytes, expiry });
    }
}

impl CacheBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        if let Some(mut slot) = self.slots.get_mut(key) {
            if !slot.is_stale(now) {
                slot.touch(now);
                return Ok(Some(slot.bytes.clone()));
            }
        }

        // Re-check under the shard lock; a writer may have replaced the slot
        self.slots.remove_if(key, |_, slot| slot.is_stale(now));
        trace!("local cache MISS {}", key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let expiry = match ttl {
            Some(ttl) => Expiry::absolute(Instant::now(), ttl),
            None => Expiry::Never,
        };
        self.put(key, value, expiry);
        Ok(())
    }

    async fn set_sliding(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.put(key, value, Expiry::sliding(Instant::now(), ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.slots.remove(key);
        trace!("local cache DEL {}", key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .slots
            .get(key)
            .is_some_and(|slot| !slot.is_stale(now)))
    }

    async fn count(&self) -> Result<usize> {
        self.purge_expired();
        Ok(self.slots.len())
    }

    async fn clear_all(&self) -> Result<()> {
        let dropped = self.slots.len();
        self.slots.clear();
        warn!("local cache cleared ({} entries dropped)", dropped);
        Ok(())
    }

    fn supported_expirations(&self) -> &'static [ExpirationType] {
        LOCAL_EXPIRATIONS
    }
}
