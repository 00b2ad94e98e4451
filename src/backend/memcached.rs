//! Memcached engine.
//!
//! Memcached expiry is absolute with one-second resolution, so durations are
//! rounded up to the next whole second. The protocol has no cheap key count,
//! so [`CacheBackend::count`] keeps its default of 0.

use super::CacheBackend;
use crate::error::{Error, Result};
use async_memcached::AsciiProtocol;
use deadpool_memcached::{Manager, Pool};
use std::time::Duration;

const DEFAULT_POOL_SIZE: u32 = 16;

/// Relative expiries above 30 days are read by the server as unix timestamps.
const MAX_RELATIVE_EXPIRY_SECS: u64 = 60 * 60 * 24 * 30;

const HEALTH_PROBE_KEY: &str = "cache-facade:health";

fn pool_size_from_env() -> u32 {
    std::env::var("MEMCACHED_POOL_SIZE")
        .ok()
        .and_then(|raw| raw.parse::<u32>().ok())
        .filter(|size| *size > 0)
        .unwrap_or(DEFAULT_POOL_SIZE)
}

fn command_failed(command: &str, key: &str, err: impl std::fmt::Display) -> Error {
    Error::BackendError(format!("memcached {} on {} failed: {}", command, key, err))
}

fn pool_error(err: impl std::fmt::Display) -> Error {
    Error::BackendError(format!("memcached connection unavailable: {}", err))
}

/// Whole seconds for the expiry field. A live entry never rounds down to 0,
/// which memcached reads as "never expire".
fn expiry_secs(ttl: Duration) -> i64 {
    let rounded = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    rounded.clamp(1, MAX_RELATIVE_EXPIRY_SECS) as i64
}

/// Where the memcached tier lives. Only the first address is dialled.
#[derive(Clone, Debug)]
pub struct MemcachedConfig {
    pub servers: Vec<String>,
    pub connection_timeout: Duration,
    pub pool_size: u32,
}

impl Default for MemcachedConfig {
    fn default() -> Self {
        MemcachedConfig {
            servers: vec!["localhost:11211".to_string()],
            connection_timeout: Duration::from_secs(5),
            pool_size: pool_size_from_env(),
        }
    }
}

/// Pooled memcached engine; clones share the pool.
///
/// ```no_run
/// # use cache_facade::backend::{MemcachedBackend, MemcachedConfig, CacheBackend};
/// # use cache_facade::error::Result;
/// # use std::time::Duration;
/// # async fn example() -> Result<()> {
/// let backend = MemcachedBackend::new(MemcachedConfig::default()).await?;
/// backend.set("60:0:0:c2Vzc2lvbg==", b"value".to_vec(), Some(Duration::from_secs(60))).await?;
/// let value = backend.get("60:0:0:c2Vzc2lvbg==").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MemcachedBackend {
    pool: Pool,
}

impl MemcachedBackend {
    /// # Errors
    /// `ConfigurationError` when `servers` is empty or the pool cannot be built.
    pub async fn new(config: MemcachedConfig) -> Result<Self> {
        let Some(addr) = config.servers.first().cloned() else {
            return Err(Error::ConfigurationError(
                "memcached config lists no servers".to_string(),
            ));
        };

        let pool = Pool::builder(Manager::new(addr.clone()))
            .max_size(config.pool_size as usize)
            .build()
            .map_err(|e| Error::ConfigurationError(format!("memcached pool: {}", e)))?;

        info!(
            "distributed cache: memcached at {} (pool {})",
            addr, config.pool_size
        );
        Ok(MemcachedBackend { pool })
    }

    /// Single-server shortcut. The pool size comes from `MEMCACHED_POOL_SIZE`,
    /// falling back to 16.
    pub async fn from_server(addr: String) -> Result<Self> {
        Self::new(MemcachedConfig {
            servers: vec![addr],
            ..Default::default()
        })
        .await
    }
}

impl CacheBackend for MemcachedBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let value = conn
            .get(key)
            .await
            .map_err(|e| command_failed("get", key, e))?;
        trace!("memcached get {} hit={}", key, value.is_some());
        Ok(value.and_then(|v| v.data))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let expiry = ttl.map(expiry_secs);

        conn.set(key, value.as_slice(), expiry, None)
            .await
            .map_err(|e| command_failed("set", key, e))?;
        trace!("memcached set {} expiry={:?}s", key, expiry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        conn.delete(key)
            .await
            .map_err(|e| command_failed("delete", key, e))?;
        trace!("memcached delete {}", key);
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        let Ok(mut conn) = self.pool.get().await else {
            return Ok(false);
        };
        Ok(conn.get(HEALTH_PROBE_KEY).await.is_ok())
    }

    async fn clear_all(&self) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        conn.flush_all()
            .await
            .map_err(|e| command_failed("flush_all", "*", e))?;
        warn!("memcached flush_all: distributed cache emptied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ABSOLUTE_ONLY;

    #[test]
    fn test_default_config_targets_localhost() {
        let config = MemcachedConfig::default();
        assert_eq!(config.servers, vec!["localhost:11211".to_string()]);
        assert!(config.pool_size > 0);
    }

    #[test]
    fn test_expiry_rounds_up_sub_second() {
        assert_eq!(expiry_secs(Duration::from_millis(1)), 1);
        assert_eq!(expiry_secs(Duration::from_millis(500)), 1);
        assert_eq!(expiry_secs(Duration::from_millis(1500)), 2);
        assert_eq!(expiry_secs(Duration::from_secs(300)), 300);
    }

    #[test]
    fn test_expiry_caps_at_thirty_days() {
        let year = Duration::from_secs(365 * 24 * 60 * 60);
        assert_eq!(expiry_secs(year), MAX_RELATIVE_EXPIRY_SECS as i64);
    }

    #[test]
    fn test_command_error_names_command_and_key() {
        let err = command_failed("set", "60:0:0:YQ==", "broken pipe");
        assert!(err.to_string().contains("set on 60:0:0:YQ=="));
    }

    #[tokio::test]
    async fn test_empty_server_list_is_a_configuration_error() {
        let config = MemcachedConfig {
            servers: vec![],
            ..Default::default()
        };
        assert!(matches!(
            MemcachedBackend::new(config).await,
            Err(Error::ConfigurationError(_))
        ));
    }

    // Need a live server: cargo test --features memcached -- --ignored
    #[tokio::test]
    #[ignore]
    async fn test_round_trip_against_server() {
        let backend = MemcachedBackend::from_server("localhost:11211".to_string())
            .await
            .expect("pool");
        let key = "60:0:0:bWVtY2FjaGVk";

        assert_eq!(backend.supported_expirations(), ABSOLUTE_ONLY);
        backend
            .set(key, b"payload".to_vec(), Some(Duration::from_secs(60)))
            .await
            .expect("set");
        assert_eq!(backend.get(key).await.expect("get"), Some(b"payload".to_vec()));

        backend.delete(key).await.expect("delete");
        assert_eq!(backend.get(key).await.expect("get"), None);
    }

    #[tokio::test]
    #[ignore]
    async fn test_one_second_expiry_against_server() {
        let backend = MemcachedBackend::from_server("localhost:11211".to_string())
            .await
            .expect("pool");
        let key = "1:0:0:ZXhwaXJpbmc=";

        backend
            .set(key, b"soon gone".to_vec(), Some(Duration::from_millis(400)))
            .await
            .expect("set");
        assert!(backend.get(key).await.expect("get").is_some());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(backend.get(key).await.expect("get").is_none());
    }
}
