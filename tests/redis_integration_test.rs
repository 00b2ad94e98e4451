//! Redis Backend Integration Tests
//!
//! These tests require a running Redis instance and skip themselves when
//! none answers.
//!
//! ```bash
//! docker run --rm -p 6379:6379 redis:7
//! cargo test --features redis --test redis_integration_test
//! ```
//!
//! ## Environment Variables
//!
//! - `TEST_REDIS_URL`: Redis connection URL for cache entries
//!   (default: "redis://localhost:6379/0")
//! - `TEST_REDIS_LEASE_URL`: Redis connection URL for refresh leases; must name
//!   another database (default: "redis://localhost:6379/1")
//!
//! ## What's Tested
//!
//! 1. Connection and health check
//! 2. Long-lived entries routed to Redis by the tiered policy
//! 3. Sliding entries kept local, since Redis only expires absolutely
//! 4. Refresh leases shared by two caches through Redis
//! 5. Leases kept out of the cache database (count and flush)

#![cfg(feature = "redis")]

use cache_facade::backend::{CacheBackend, InMemoryBackend, RedisBackend};
use cache_facade::lease::{LeaseProvider, RedisLeaseProvider};
use cache_facade::{
    BackendImplementation, Cache, ExpirationType, ImplementationSelector, Key,
    RecalculationOutcome, RecalculationPolicy, StorageStyle, TieredPolicy,
};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn get_redis_url() -> String {
    env::var("TEST_REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379/0".to_string())
}

fn get_lease_url() -> String {
    env::var("TEST_REDIS_LEASE_URL").unwrap_or_else(|_| "redis://localhost:6379/1".to_string())
}

async fn lease_provider() -> RedisLeaseProvider {
    RedisLeaseProvider::from_connection_string(&get_lease_url())
        .await
        .expect("lease pool")
}

async fn connect() -> Option<RedisBackend> {
    let _ = env_logger::builder().is_test(true).try_init();
    let backend = RedisBackend::from_connection_string(&get_redis_url())
        .await
        .ok()?;
    match backend.health_check().await {
        Ok(true) => Some(backend),
        _ => {
            println!("⚠️  Redis not available, skipping test");
            None
        }
    }
}

fn cache_over(redis: RedisBackend, local: InMemoryBackend, leases: RedisLeaseProvider) -> Cache {
    let selector = ImplementationSelector::builder()
        .implementation(BackendImplementation::new("local", local))
        .implementation(BackendImplementation::new("redis", redis.clone()))
        .tiered(TieredPolicy::new("local", "redis"))
        .build()
        .expect("valid selector");

    Cache::builder(selector)
        .lease_provider(Arc::new(leases))
        .build()
}

/// Unique name so parallel runs never collide.
fn name(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::now_v7())
}

#[tokio::test]
async fn test_redis_connection() {
    let Some(backend) = connect().await else {
        return;
    };
    assert!(backend.health_check().await.expect("health check"));
    assert!(backend.pool_stats().connections >= 1);
}

#[tokio::test]
async fn test_long_lived_entry_lands_in_redis() {
    let Some(redis) = connect().await else {
        return;
    };
    let local = InMemoryBackend::new();
    let cache = cache_over(redis.clone(), local.clone(), lease_provider().await);

    let key = Key::new(
        Duration::from_secs(3600),
        StorageStyle::Compressed,
        ExpirationType::Absolute,
        name("long"),
    )
    .expect("valid key");

    assert!(cache.add(&key, &vec![1u32, 2, 3]).await.expect("add"));
    assert!(redis.exists(&key.encode()).await.expect("exists"));
    assert_eq!(local.len(), 0);
    assert_eq!(
        cache.get::<Vec<u32>>(&key).await.expect("get"),
        Some(vec![1, 2, 3])
    );

    cache.remove(&key).await.expect("remove");
    assert!(!redis.exists(&key.encode()).await.expect("exists"));
}

#[tokio::test]
async fn test_sliding_entry_stays_local() {
    let Some(redis) = connect().await else {
        return;
    };
    let local = InMemoryBackend::new();
    let cache = cache_over(redis.clone(), local.clone(), lease_provider().await);

    let key = Key::new(
        Duration::from_secs(3600),
        StorageStyle::Unmodified,
        ExpirationType::Sliding,
        name("sliding"),
    )
    .expect("valid key");

    assert!(cache.add(&key, "session").await.expect("add"));
    assert!(!redis.exists(&key.encode()).await.expect("exists"));
    assert_eq!(local.len(), 1);
}

#[tokio::test]
async fn test_refresh_lease_is_shared_across_caches() {
    let Some(redis) = connect().await else {
        return;
    };
    let first = cache_over(redis.clone(), InMemoryBackend::new(), lease_provider().await);
    let second = cache_over(redis, InMemoryBackend::new(), lease_provider().await);

    let key = Key::new(
        Duration::from_secs(60),
        StorageStyle::Unmodified,
        ExpirationType::Absolute,
        name("leased"),
    )
    .expect("valid key");
    let policy = RecalculationPolicy::new(Duration::from_secs(10));

    let outcome = first
        .start_refresh(&key, || async { Ok(1u8) }, policy)
        .await
        .expect("start");
    assert_eq!(outcome, RecalculationOutcome::Started);

    let outcome = second
        .start_refresh(&key, || async { Ok(2u8) }, policy)
        .await
        .expect("start");
    assert_eq!(outcome, RecalculationOutcome::LeaseNotAcquired);

    assert!(first.stop_refresh(&key).await);
    let outcome = second
        .start_refresh(&key, || async { Ok(2u8) }, policy)
        .await
        .expect("start");
    assert_eq!(outcome, RecalculationOutcome::Started);
    assert!(second.stop_refresh(&key).await);
}

#[tokio::test]
async fn test_leases_stay_out_of_the_cache_database() {
    let Some(redis) = connect().await else {
        return;
    };
    let leases = lease_provider().await;
    let holder = cache_over(redis.clone(), InMemoryBackend::new(), leases.clone());
    let peer = cache_over(redis.clone(), InMemoryBackend::new(), lease_provider().await);

    let key = Key::new(
        Duration::from_secs(60),
        StorageStyle::Unmodified,
        ExpirationType::Absolute,
        name("isolated"),
    )
    .expect("valid key");
    let lease_name = format!("cache-facade:refresh:{}", key.encode());
    let policy = RecalculationPolicy::new(Duration::from_secs(10));

    let outcome = holder
        .start_refresh(&key, || async { Ok(1u8) }, policy)
        .await
        .expect("start");
    assert_eq!(outcome, RecalculationOutcome::Started);

    // Invisible to DBSIZE/FLUSHDB on the cache database
    assert!(!redis.exists(&lease_name).await.expect("exists"));
    assert!(leases
        .try_acquire(&lease_name, Duration::from_secs(1))
        .await
        .expect("lease provider")
        .is_none());

    let outcome = peer
        .start_refresh(&key, || async { Ok(2u8) }, policy)
        .await
        .expect("start");
    assert_eq!(outcome, RecalculationOutcome::LeaseNotAcquired);

    assert!(holder.stop_refresh(&key).await);
}
