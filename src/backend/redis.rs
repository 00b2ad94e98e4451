//! Redis cache backend implementation.
//!
//! This is the "distributed" engine of the facade. Redis expiry is a fixed
//! deadline set at write time, so only [`ExpirationType::Absolute`] is
//! supported; sliding requests are routed elsewhere by the selection policy.
//!
//! [`ExpirationType::Absolute`]: crate::key::ExpirationType::Absolute

use super::CacheBackend;
use crate::error::{Error, Result};
use deadpool_redis::{redis::AsyncCommands, Config as PoolConfig, Connection, Pool, Runtime};
use std::time::Duration;

/// Snapshot of the connection pool.
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub connections: u32,
    pub idle_connections: u32,
}

/// Pool size used when neither the config nor `REDIS_POOL_SIZE` says otherwise.
const DEFAULT_POOL_SIZE: u32 = 16;

fn pool_size_from_env() -> u32 {
    std::env::var("REDIS_POOL_SIZE")
        .ok()
        .and_then(|raw| raw.parse::<u32>().ok())
        .filter(|size| *size > 0)
        .unwrap_or(DEFAULT_POOL_SIZE)
}

/// Longest `PX` sent to the server; Redis rejects expiries that overflow its
/// millisecond clock.
const MAX_PX_MILLIS: u128 = 100 * 365 * 24 * 60 * 60 * 1000;

/// `ttl` in whole milliseconds, never 0 and never past [`MAX_PX_MILLIS`].
pub(crate) fn px_millis(ttl: Duration) -> u64 {
    ttl.as_millis().clamp(1, MAX_PX_MILLIS) as u64
}

fn command_failed(command: &str, key: &str, err: impl std::fmt::Display) -> Error {
    Error::BackendError(format!("redis {} on {} failed: {}", command, key, err))
}

/// Where the distributed cache lives.
#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: u32,
    /// Database holding refresh leases. Must differ from `database` so
    /// `DBSIZE` and `FLUSHDB` on the cache never touch them.
    pub lease_database: u32,
    pub pool_size: u32,
    pub connection_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        RedisConfig {
            host: "localhost".to_string(),
            port: 6379,
            username: None,
            password: None,
            database: 0,
            lease_database: 1,
            pool_size: pool_size_from_env(),
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl RedisConfig {
    /// `redis://` URL for this config. A password without a username
    /// authenticates as the `default` ACL user.
    pub fn connection_string(&self) -> String {
        let auth = match (&self.username, &self.password) {
            (Some(user), Some(password)) => format!("{}:{}@", user, password),
            (None, Some(password)) => format!("default:{}@", password),
            _ => String::new(),
        };
        format!(
            "redis://{}{}:{}/{}",
            auth, self.host, self.port, self.database
        )
    }
}

/// Pooled Redis engine.
///
/// Clones share one deadpool pool, which
/// [`RedisLeaseProvider`](crate::lease::RedisLeaseProvider) can reuse for
/// refresh leases.
///
/// # Example
///
/// ```no_run
/// # use cache_facade::backend::{RedisBackend, RedisConfig, CacheBackend};
/// # use cache_facade::error::Result;
/// # use std::time::Duration;
/// # async fn example() -> Result<()> {
/// let backend = RedisBackend::new(RedisConfig::default()).await?;
///
/// backend.set("600:0:0:cmVwb3J0", b"value".to_vec(), Some(Duration::from_secs(600))).await?;
/// let value = backend.get("600:0:0:cmVwb3J0").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisBackend {
    pool: Pool,
}

impl RedisBackend {
    /// Connect using an explicit config.
    ///
    /// # Errors
    /// `ConfigurationError` if the pool cannot be built.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let pool = Self::build_pool(&config.connection_string(), config.pool_size)?;
        info!(
            "distributed cache: redis at {}:{} db {} (pool {})",
            config.host, config.port, config.database, config.pool_size
        );
        Ok(RedisBackend { pool })
    }

    /// Connect using a `redis://` URL. The pool size comes from
    /// `REDIS_POOL_SIZE`, falling back to 16.
    ///
    /// # Errors
    /// `ConfigurationError` if the pool cannot be built.
    pub async fn from_connection_string(conn_str: &str) -> Result<Self> {
        let pool_size = pool_size_from_env();
        let pool = Self::build_pool(conn_str, pool_size)?;
        info!("distributed cache: redis from url (pool {})", pool_size);
        Ok(RedisBackend { pool })
    }

    fn build_pool(conn_str: &str, pool_size: u32) -> Result<Pool> {
        let mut cfg = PoolConfig::from_url(conn_str);
        cfg.pool = Some(deadpool_redis::PoolConfig::new(pool_size as usize));
        cfg.create_pool(Some(Runtime::Tokio1))
            .map_err(|e| Error::ConfigurationError(format!("redis pool: {}", e)))
    }

    pub fn pool_stats(&self) -> PoolStats {
        let status = self.pool.status();
        PoolStats {
            connections: status.size as u32,
            idle_connections: status.available as u32,
        }
    }

    pub(crate) async fn connection(&self) -> Result<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::BackendError(format!("redis connection unavailable: {}", e)))
    }
}

impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| command_failed("GET", key, e))?;
        trace!("redis GET {} hit={}", key, value.is_some());
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.connection().await?;
        match ttl {
            Some(ttl) => {
                // PX keeps sub-second key durations intact
                let millis = px_millis(ttl);
                conn.pset_ex::<_, _, ()>(key, value, millis)
                    .await
                    .map_err(|e| command_failed("PSETEX", key, e))?;
                trace!("redis PSETEX {} {}ms", key, millis);
            }
            None => {
                conn.set::<_, _, ()>(key, value)
                    .await
                    .map_err(|e| command_failed("SET", key, e))?;
                trace!("redis SET {}", key);
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| command_failed("DEL", key, e))?;
        trace!("redis DEL {}", key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        conn.exists(key)
            .await
            .map_err(|e| command_failed("EXISTS", key, e))
    }

    async fn count(&self) -> Result<usize> {
        let mut conn = self.connection().await?;
        let size: u64 = deadpool_redis::redis::cmd("DBSIZE")
            .query_async(&mut *conn)
            .await
            .map_err(|e| command_failed("DBSIZE", "*", e))?;
        Ok(size as usize)
    }

    async fn health_check(&self) -> Result<bool> {
        let Ok(mut conn) = self.connection().await else {
            return Ok(false);
        };
        let pong: std::result::Result<String, _> = deadpool_redis::redis::cmd("PING")
            .query_async(&mut *conn)
            .await;
        Ok(pong.is_ok())
    }

    async fn clear_all(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        deadpool_redis::redis::cmd("FLUSHDB")
            .query_async::<()>(&mut *conn)
            .await
            .map_err(|e| command_failed("FLUSHDB", "*", e))?;
        warn!("redis FLUSHDB: distributed cache emptied");
        Ok(())
    }
}
