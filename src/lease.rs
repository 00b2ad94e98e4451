//! Named leases with a TTL, used to keep one refresh loop per key.
//!
//! A lease is owned through a random token. Only the owner can renew or
//! release it, and an owner that dies simply lets the TTL run out. Two
//! providers ship with the crate:
//!
//! - [`LocalLeaseProvider`]: in-process. Clones share state, so several
//!   [`Cache`](crate::facade::Cache)s in one process coordinate through it.
//! - `RedisLeaseProvider` (feature `redis`): `SET NX PX` plus token-checked
//!   Lua scripts, for coordination across processes.

use crate::error::Result;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Proof of ownership for a named lease.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lease {
    name: String,
    token: String,
}

impl Lease {
    fn new(name: &str) -> Self {
        Lease {
            name: name.to_string(),
            token: Uuid::now_v7().to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Storage for named, expiring leases.
#[async_trait]
pub trait LeaseProvider: Send + Sync {
    /// Take the lease if nobody holds it, or the holder let it expire.
    ///
    /// # Errors
    /// `LeaseError` when the provider cannot be reached.
    async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<Option<Lease>>;

    /// Push the expiry out by `ttl`. `Ok(false)` means the lease was lost.
    ///
    /// # Errors
    /// `LeaseError` when the provider cannot be reached.
    async fn renew(&self, lease: &Lease, ttl: Duration) -> Result<bool>;

    /// Give the lease up. Releasing a lease someone else now holds is a no-op.
    ///
    /// # Errors
    /// `LeaseError` when the provider cannot be reached.
    async fn release(&self, lease: &Lease) -> Result<()>;
}

struct Holder {
    token: String,
    expires_at: Instant,
}

impl Holder {
    fn is_live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Held "forever" when `ttl` runs past what the clock can represent.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

fn deadline(ttl: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(ttl)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// In-process lease table.
#[derive(Clone, Default)]
pub struct LocalLeaseProvider {
    leases: Arc<DashMap<String, Holder>>,
}

impl LocalLeaseProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a live lease exists under `name`.
    pub fn is_held(&self, name: &str) -> bool {
        self.leases.get(name).is_some_and(|holder| holder.is_live())
    }
}

#[async_trait]
impl LeaseProvider for LocalLeaseProvider {
    async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<Option<Lease>> {
        let lease = Lease::new(name);
        let holder = Holder {
            token: lease.token.clone(),
            expires_at: deadline(ttl),
        };

        match self.leases.entry(name.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live() {
                    return Ok(None);
                }
                debug!("Lease {} expired, taking over", name);
                occupied.insert(holder);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(holder);
            }
        }

        Ok(Some(lease))
    }

    async fn renew(&self, lease: &Lease, ttl: Duration) -> Result<bool> {
        let Some(mut holder) = self.leases.get_mut(&lease.name) else {
            return Ok(false);
        };

        if holder.token != lease.token || !holder.is_live() {
            return Ok(false);
        }

        holder.expires_at = deadline(ttl);
        Ok(true)
    }

    async fn release(&self, lease: &Lease) -> Result<()> {
        self.leases
            .remove_if(&lease.name, |_, holder| holder.token == lease.token);
        Ok(())
    }
}

#[cfg(feature = "redis")]
pub use self::distributed::RedisLeaseProvider;

#[cfg(feature = "redis")]
mod distributed {
    use super::{Lease, LeaseProvider};
    use crate::backend::redis::px_millis;
    use crate::backend::{RedisBackend, RedisConfig};
    use crate::error::{Error, Result};
    use async_trait::async_trait;
    use deadpool_redis::redis::cmd;
    use std::time::Duration;

    const RENEW_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

    const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;


    /// Config for the lease pool: same server, the lease database.
    fn lease_config(config: &RedisConfig) -> Result<RedisConfig> {
        if config.lease_database == config.database {
            return Err(Error::ConfigurationError(format!(
                "refresh leases need their own redis database, both use db {}",
                config.database
            )));
        }
        Ok(RedisConfig {
            database: config.lease_database,
            ..config.clone()
        })
    }

    /// Leases stored as plain Redis keys holding the owner token.
    ///
    /// They live outside the cache's database, so a peer's `remove_all`
    /// (`FLUSHDB`) cannot drop them and `count_all` (`DBSIZE`) never counts
    /// them.
    #[derive(Clone)]
    pub struct RedisLeaseProvider {
        store: RedisBackend,
    }

    impl RedisLeaseProvider {
        /// Connect to `config.lease_database` on the cache's server.
        ///
        /// # Errors
        /// `ConfigurationError` when the lease database is the cache database
        /// or the pool cannot be built.
        pub async fn new(config: &RedisConfig) -> Result<Self> {
            let store = RedisBackend::new(lease_config(config)?).await?;
            Ok(RedisLeaseProvider { store })
        }

        /// Connect to a URL reserved for leases. It must not name the
        /// database cache entries are written to.
        pub async fn from_connection_string(conn_str: &str) -> Result<Self> {
            let store = RedisBackend::from_connection_string(conn_str).await?;
            Ok(RedisLeaseProvider { store })
        }
    }

    #[async_trait]
    impl LeaseProvider for RedisLeaseProvider {
        async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<Option<Lease>> {
            let lease = Lease::new(name);
            let mut conn = self
                .store
                .connection()
                .await
                .map_err(|e| Error::LeaseError(e.to_string()))?;

            let reply: Option<String> = cmd("SET")
                .arg(name)
                .arg(lease.token())
                .arg("NX")
                .arg("PX")
                .arg(px_millis(ttl))
                .query_async(&mut *conn)
                .await
                .map_err(|e| Error::LeaseError(format!("SET NX failed for {}: {}", name, e)))?;

            Ok(reply.map(|_| lease))
        }

        async fn renew(&self, lease: &Lease, ttl: Duration) -> Result<bool> {
            let mut conn = self
                .store
                .connection()
                .await
                .map_err(|e| Error::LeaseError(e.to_string()))?;

            let renewed: i64 = cmd("EVAL")
                .arg(RENEW_SCRIPT)
                .arg(1)
                .arg(lease.name())
                .arg(lease.token())
                .arg(px_millis(ttl))
                .query_async(&mut *conn)
                .await
                .map_err(|e| {
                    Error::LeaseError(format!("renew failed for {}: {}", lease.name(), e))
                })?;

            Ok(renewed == 1)
        }

        async fn release(&self, lease: &Lease) -> Result<()> {
            let mut conn = self
                .store
                .connection()
                .await
                .map_err(|e| Error::LeaseError(e.to_string()))?;

            cmd("EVAL")
                .arg(RELEASE_SCRIPT)
                .arg(1)
                .arg(lease.name())
                .arg(lease.token())
                .query_async::<i64>(&mut *conn)
                .await
                .map_err(|e| {
                    Error::LeaseError(format!("release failed for {}: {}", lease.name(), e))
                })?;

            Ok(())
        }
    }

}
