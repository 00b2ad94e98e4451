//! Background self-refresh of cache entries.
//!
//! After a miss has been filled by a fresh computation, a caller may ask for
//! the entry to be kept warm: a task recomputes the value `time_before_expiry`
//! ahead of its expiry and writes it back, forever, so later readers never
//! pay for the computation.
//!
//! At most one loop runs per key. Inside a process the task registry
//! guarantees it; across processes a [`LeaseProvider`] lease named after the
//! canonical key does, best effort. The lease has the key's store duration as
//! TTL and is renewed around every recomputation, so a crashed holder frees
//! the key on its own.
//!
//! A loop ends when the routine fails, the lease is lost, the owning cache is
//! dropped, or [`RecalculationCoordinator::stop`] is called. Every exit path
//! gives the lease back and clears the registry entry.

use crate::error::{Error, Result};
use crate::key::Key;
use crate::lease::{Lease, LeaseProvider};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Default prefix for lease names.
pub const DEFAULT_LEASE_NAMESPACE: &str = "cache-facade:refresh:";

/// How far ahead of expiry a refresh runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecalculationPolicy {
    pub time_before_expiry: Duration,
}

impl RecalculationPolicy {
    pub fn new(time_before_expiry: Duration) -> Self {
        RecalculationPolicy { time_before_expiry }
    }

    /// Sleep between two refreshes of an entry stored for `duration_to_store`.
    ///
    /// # Errors
    /// `InvalidArgument` unless `time_before_expiry < duration_to_store`.
    pub fn interval(&self, duration_to_store: Duration) -> Result<Duration> {
        duration_to_store
            .checked_sub(self.time_before_expiry)
            .filter(|interval| !interval.is_zero())
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "time before expiry ({:?}) must be shorter than the store duration ({:?})",
                    self.time_before_expiry, duration_to_store
                ))
            })
    }
}

/// Result of asking for a refresh loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecalculationOutcome {
    /// This caller won the lease and a loop is now running.
    Started,
    /// A loop already runs for the key here or elsewhere, or the lease
    /// provider could not be reached.
    LeaseNotAcquired,
}

/// What one refresh iteration achieved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshTick {
    /// The value was recomputed; `false` if the backend refused the write.
    Stored(bool),
    /// The cache that started the loop is gone.
    CacheDropped,
}

/// One recompute-and-store step. An `Err` ends the loop.
pub type RefreshFn = Arc<dyn Fn() -> BoxFuture<'static, Result<RefreshTick>> + Send + Sync>;

/// Box an async closure into a [`RefreshFn`].
pub fn refresh_step<F, Fut>(step: F) -> RefreshFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<RefreshTick>> + Send + 'static,
{
    Arc::new(move || step().boxed())
}

struct RefreshTask {
    generation: u64,
    lease: Option<Lease>,
    handle: Option<JoinHandle<()>>,
}

/// Per-process registry of refresh loops plus the lease provider guarding them.
pub struct RecalculationCoordinator {
    tasks: Arc<DashMap<String, RefreshTask>>,
    leases: Arc<dyn LeaseProvider>,
    namespace: String,
    generations: AtomicU64,
}

impl RecalculationCoordinator {
    pub fn new(leases: Arc<dyn LeaseProvider>, namespace: impl Into<String>) -> Self {
        RecalculationCoordinator {
            tasks: Arc::new(DashMap::new()),
            leases,
            namespace: namespace.into(),
            generations: AtomicU64::new(0),
        }
    }

    /// Lease name guarding `key`.
    pub fn lease_name(&self, key: &Key) -> String {
        format!("{}{}", self.namespace, key.encode())
    }

    /// Start a refresh loop for `key` unless one already runs.
    ///
    /// The caller is expected to have just stored a fresh value, so the first
    /// recomputation happens one interval from now.
    ///
    /// # Errors
    /// `InvalidArgument` when the policy window is not shorter than the key's
    /// store duration. Lease provider failures are logged and reported as
    /// [`RecalculationOutcome::LeaseNotAcquired`].
    pub async fn ensure_started(
        &self,
        key: &Key,
        policy: RecalculationPolicy,
        step: RefreshFn,
    ) -> Result<RecalculationOutcome> {
        let ttl = key.duration_to_store();
        let interval = policy.interval(ttl)?;
        let canonical = key.encode();
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);

        match self.tasks.entry(canonical.clone()) {
            Entry::Occupied(_) => {
                debug!("Refresh loop already registered for {}", canonical);
                return Ok(RecalculationOutcome::LeaseNotAcquired);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(RefreshTask {
                    generation,
                    lease: None,
                    handle: None,
                });
            }
        }
        // Dropped without disarming (early return, or the caller's future
        // cancelled mid-await) it frees the slot again
        let reservation = Reservation {
            tasks: Arc::clone(&self.tasks),
            canonical: canonical.clone(),
            generation,
            armed: true,
        };

        let lease_name = self.lease_name(key);
        let lease = match self.leases.try_acquire(&lease_name, ttl).await {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                debug!("Lease {} held elsewhere, not starting refresh", lease_name);
                return Ok(RecalculationOutcome::LeaseNotAcquired);
            }
            Err(e) => {
                warn!("⚠ Could not acquire refresh lease {}: {}", lease_name, e);
                return Ok(RecalculationOutcome::LeaseNotAcquired);
            }
        };

        // stop() may have run while the lease was being acquired
        let still_reserved = match self.tasks.get_mut(&canonical) {
            Some(mut task) if task.generation == generation => {
                task.lease = Some(lease.clone());
                true
            }
            _ => false,
        };
        if !still_reserved {
            self.release(&lease).await;
            return Ok(RecalculationOutcome::LeaseNotAcquired);
        }

        let refresh = RefreshLoop {
            canonical: canonical.clone(),
            generation,
            interval,
            ttl,
            lease: lease.clone(),
            leases: Arc::clone(&self.leases),
            tasks: Arc::clone(&self.tasks),
            step,
        };
        let handle = tokio::spawn(refresh.run());

        match self.tasks.get_mut(&canonical) {
            Some(mut task) if task.generation == generation => task.handle = Some(handle),
            // Stopped, or the loop already exited and cleaned up
            _ => handle.abort(),
        }
        // The loop owns the slot now and clears it on exit
        reservation.disarm();

        info!(
            "✓ Refresh loop started for {} (every {:?})",
            canonical, interval
        );
        Ok(RecalculationOutcome::Started)
    }

    /// Stop the loop for `key` and release its lease. Returns whether one was registered.
    pub async fn stop(&self, key: &Key) -> bool {
        self.stop_canonical(&key.encode()).await
    }

    /// Stop every loop this process runs. Returns how many were registered.
    pub async fn stop_all(&self) -> usize {
        let keys: Vec<String> = self.tasks.iter().map(|task| task.key().clone()).collect();

        let mut stopped = 0;
        for canonical in keys {
            if self.stop_canonical(&canonical).await {
                stopped += 1;
            }
        }
        stopped
    }

    pub fn is_running(&self, key: &Key) -> bool {
        self.tasks.contains_key(&key.encode())
    }

    /// Loops currently registered in this process.
    pub fn active(&self) -> usize {
        self.tasks.len()
    }

    async fn stop_canonical(&self, canonical: &str) -> bool {
        let Some((_, task)) = self.tasks.remove(canonical) else {
            return false;
        };

        if let Some(handle) = task.handle {
            handle.abort();
        }
        if let Some(lease) = task.lease {
            self.release(&lease).await;
        }

        info!("Refresh loop stopped for {}", canonical);
        true
    }

    async fn release(&self, lease: &Lease) {
        if let Err(e) = self.leases.release(lease).await {
            warn!("⚠ Could not release refresh lease {}: {}", lease.name(), e);
        }
    }
}

impl fmt::Debug for RecalculationCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecalculationCoordinator")
            .field("namespace", &self.namespace)
            .field("active", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

/// Registry slot taken by `ensure_started` before it has a running loop.
struct Reservation {
    tasks: Arc<DashMap<String, RefreshTask>>,
    canonical: String,
    generation: u64,
    armed: bool,
}

impl Reservation {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.armed {
            let generation = self.generation;
            self.tasks
                .remove_if(&self.canonical, |_, task| task.generation == generation);
        }
    }
}

enum LoopExit {
    RoutineFailed(Error),
    LeaseLost,
    CacheDropped,
}

impl fmt::Display for LoopExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopExit::RoutineFailed(e) => write!(f, "routine failed: {}", e),
            LoopExit::LeaseLost => f.write_str("lease lost"),
            LoopExit::CacheDropped => f.write_str("cache dropped"),
        }
    }
}

struct RefreshLoop {
    canonical: String,
    generation: u64,
    interval: Duration,
    ttl: Duration,
    lease: Lease,
    leases: Arc<dyn LeaseProvider>,
    tasks: Arc<DashMap<String, RefreshTask>>,
    step: RefreshFn,
}

impl RefreshLoop {
    async fn run(self) {
        let exit = self.iterate().await;
        match &exit {
            LoopExit::RoutineFailed(_) => {
                error!("✗ Refresh loop for {} ended: {}", self.canonical, exit)
            }
            LoopExit::LeaseLost => warn!("⚠ Refresh loop for {} ended: {}", self.canonical, exit),
            LoopExit::CacheDropped => {
                debug!("Refresh loop for {} ended: {}", self.canonical, exit)
            }
        }

        if let Err(e) = self.leases.release(&self.lease).await {
            warn!("⚠ Could not release refresh lease {}: {}", self.lease.name(), e);
        }
        let generation = self.generation;
        self.tasks
            .remove_if(&self.canonical, |_, task| task.generation == generation);
    }

    async fn iterate(&self) -> LoopExit {
        loop {
            tokio::time::sleep(self.interval).await;

            if !self.renew().await {
                return LoopExit::LeaseLost;
            }

            match (self.step)().await {
                Ok(RefreshTick::Stored(true)) => {
                    debug!("✓ Refreshed {}", self.canonical);
                }
                Ok(RefreshTick::Stored(false)) => {
                    warn!("⚠ Refreshed {} but the backend refused the write", self.canonical);
                }
                Ok(RefreshTick::CacheDropped) => return LoopExit::CacheDropped,
                Err(e) => return LoopExit::RoutineFailed(e),
            }

            // Covers the sleep that follows, however long the step took
            if !self.renew().await {
                return LoopExit::LeaseLost;
            }
        }
    }

    async fn renew(&self) -> bool {
        match self.leases.renew(&self.lease, self.ttl).await {
            Ok(renewed) => renewed,
            Err(e) => {
                warn!("⚠ Could not renew refresh lease {}: {}", self.lease.name(), e);
                false
            }
        }
    }
}
