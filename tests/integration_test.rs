//! Integration tests for cache-facade
//!
//! End-to-end behaviour through the public API: key encoding, backend
//! selection and fallback, the value pipeline, and failure isolation.

use async_trait::async_trait;
use cache_facade::backend::{CacheBackend, InMemoryBackend};
use cache_facade::encoding::Aes256GcmEncryptor;
use cache_facade::{
    BackendImplementation, Cache, CacheImplementation, CacheItemEncoder, Error, ExpirationType,
    ImplementationSelector, Key, StorageStyle, TieredPolicy,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Report {
    id: u32,
    title: String,
    rows: Vec<(String, f64)>,
}

fn report(id: u32) -> Report {
    Report {
        id,
        title: format!("Quarterly report {}", id),
        rows: vec![("revenue".to_string(), 1200.5), ("costs".to_string(), 800.0)],
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct Deployment {
    local: InMemoryBackend,
    shared: InMemoryBackend,
    cache: Cache,
}

/// Two in-memory engines standing in for a local cache and a shared one.
fn deployment() -> Deployment {
    init_logging();
    let local = InMemoryBackend::new();
    let shared = InMemoryBackend::new();

    let selector = ImplementationSelector::builder()
        .implementation(BackendImplementation::new("local", local.clone()))
        .implementation(BackendImplementation::new("shared", shared.clone()))
        .tiered(TieredPolicy::new("local", "shared"))
        .build()
        .expect("valid selector");

    let cache = Cache::builder(selector)
        .encoder(CacheItemEncoder::new().with_encryptor(Aes256GcmEncryptor::new([42u8; 32])))
        .build();

    Deployment {
        local,
        shared,
        cache,
    }
}

fn key(secs: u64, style: StorageStyle, expiration: ExpirationType, name: &str) -> Key {
    Key::new(Duration::from_secs(secs), style, expiration, name).expect("valid key")
}

#[tokio::test]
async fn test_report_round_trip() {
    let deployment = deployment();
    let key = key(
        300,
        StorageStyle::Unmodified,
        ExpirationType::Absolute,
        "report-42",
    );
    assert_eq!(key.encode(), "300:0:0:cmVwb3J0LTQy");

    assert!(deployment.cache.add(&key, &report(42)).await.expect("add"));

    let by_key: Option<Report> = deployment.cache.get(&key).await.expect("get");
    let by_string: Option<Report> = deployment
        .cache
        .get_raw("300:0:0:cmVwb3J0LTQy")
        .await
        .expect("get_raw");
    assert_eq!(by_key, Some(report(42)));
    assert_eq!(by_string, Some(report(42)));

    // 300s is below the default 10 minute boundary
    assert!(deployment
        .local
        .exists("300:0:0:cmVwb3J0LTQy")
        .await
        .expect("exists"));
    assert_eq!(deployment.shared.len(), 0);
}

#[tokio::test]
async fn test_every_storage_style() {
    let deployment = deployment();

    for (index, style) in [
        StorageStyle::Unmodified,
        StorageStyle::Compressed,
        StorageStyle::Encrypted,
        StorageStyle::CompressedAndEncrypted,
    ]
    .into_iter()
    .enumerate()
    {
        let key = key(
            3600,
            style,
            ExpirationType::Sliding,
            &format!("styled-{}", index),
        );
        assert!(deployment.cache.add(&key, &report(7)).await.expect("add"));
        let found: Option<Report> = deployment.cache.get(&key).await.expect("get");
        assert_eq!(found, Some(report(7)), "{}", style);
    }

    assert_eq!(deployment.cache.count_all().await, 4);
}

#[tokio::test]
async fn test_encrypted_bytes_are_opaque() {
    let deployment = deployment();
    let key = key(
        60,
        StorageStyle::Encrypted,
        ExpirationType::Absolute,
        "secret",
    );
    deployment
        .cache
        .add(&key, &"card 4111-1111-1111-1111".to_string())
        .await
        .expect("add");

    let stored = deployment
        .local
        .get(&key.encode())
        .await
        .expect("get")
        .expect("stored");
    assert!(!stored.windows(4).any(|window| window == b"4111"));
    assert_ne!(&stored[..4], b"CFCD");
}

#[tokio::test]
async fn test_disabled_local_falls_back_to_shared() {
    let deployment = deployment();
    deployment
        .cache
        .selector()
        .disable("local")
        .expect("known id");

    let key = key(
        30,
        StorageStyle::Compressed,
        ExpirationType::Absolute,
        "fallback",
    );
    deployment.cache.add(&key, &report(3)).await.expect("add");
    assert_eq!(deployment.local.len(), 0);
    assert_eq!(deployment.shared.len(), 1);

    deployment
        .cache
        .selector()
        .enable("local")
        .expect("known id");
    let found: Option<Report> = deployment.cache.get(&key).await.expect("get");
    assert_eq!(found, None, "re-enabled local never saw the write");
}

#[tokio::test]
async fn test_remove_all_reaches_disabled_backends() {
    let deployment = deployment();
    let short = key(60, StorageStyle::Unmodified, ExpirationType::Absolute, "a");
    let long = key(7200, StorageStyle::Unmodified, ExpirationType::Absolute, "b");
    deployment.cache.add(&short, &1u8).await.expect("add");
    deployment.cache.add(&long, &2u8).await.expect("add");

    deployment
        .cache
        .selector()
        .disable("shared")
        .expect("known id");
    deployment.cache.remove_all().await;

    assert_eq!(deployment.cache.count_all().await, 0);
}

#[tokio::test]
async fn test_invalid_key_string() {
    let deployment = deployment();

    for raw in ["", "300:0:0", "abc:0:0:eA==", "300:9:0:eA==", "300:0:0:%%%"] {
        assert!(
            matches!(
                deployment.cache.get_raw::<Report>(raw).await,
                Err(Error::InvalidKeyFormat(_))
            ),
            "{:?}",
            raw
        );
    }
}

/// An engine whose every call fails, like a Redis that went away.
#[derive(Clone)]
struct Unreachable;

impl CacheBackend for Unreachable {
    async fn get(&self, _key: &str) -> cache_facade::Result<Option<Vec<u8>>> {
        Err(Error::BackendError("connection refused".to_string()))
    }

    async fn set(
        &self,
        _key: &str,
        _value: Vec<u8>,
        _ttl: Option<Duration>,
    ) -> cache_facade::Result<()> {
        Err(Error::BackendError("connection refused".to_string()))
    }

    async fn delete(&self, _key: &str) -> cache_facade::Result<()> {
        Err(Error::BackendError("connection refused".to_string()))
    }
}

#[tokio::test]
async fn test_backend_failure_is_isolated() {
    init_logging();
    let selector = ImplementationSelector::builder()
        .implementation(BackendImplementation::new("local", InMemoryBackend::new()))
        .implementation(BackendImplementation::new("shared", Unreachable))
        .tiered(TieredPolicy::new("local", "shared"))
        .build()
        .expect("valid selector");
    let cache = Cache::new(selector);

    let long = key(
        86_400,
        StorageStyle::Unmodified,
        ExpirationType::Absolute,
        "daily",
    );
    assert!(!cache.add(&long, &report(1)).await.expect("no error"));
    assert_eq!(cache.get::<Report>(&long).await.expect("no error"), None);
    cache.remove(&long).await.expect("no error");

    let computed: Report = cache
        .get_or_compute(&long, || async { Ok(report(1)) }, None)
        .await
        .expect("value still computed");
    assert_eq!(computed, report(1));
}

#[tokio::test]
async fn test_selection_failure_surfaces() {
    init_logging();
    let selector = ImplementationSelector::builder()
        .implementation(BackendImplementation::new("local", InMemoryBackend::new()))
        .implementation(BackendImplementation::disabled("shared", Unreachable))
        .tiered(TieredPolicy::new("local", "shared"))
        .build()
        .expect("valid selector");
    let cache = Cache::new(selector);
    cache.selector().disable("local").expect("known id");

    let key = key(60, StorageStyle::Unmodified, ExpirationType::Absolute, "x");
    assert!(matches!(
        cache.add(&key, &1u8).await,
        Err(Error::CacheSelectionFailure(_))
    ));
    assert!(matches!(
        cache.get::<u8>(&key).await,
        Err(Error::CacheSelectionFailure(_))
    ));
}

/// A custom engine registered without going through a `CacheBackend`.
struct Blackhole;

#[async_trait]
impl CacheImplementation for Blackhole {
    fn id(&self) -> &str {
        "blackhole"
    }
    fn is_enabled(&self) -> bool {
        true
    }
    fn set_enabled(&self, _enabled: bool) {}
    async fn add(&self, _key: &Key, _value: Vec<u8>) -> bool {
        true
    }
    async fn get(&self, _key: &Key) -> Option<Vec<u8>> {
        None
    }
    async fn remove(&self, _key: &Key) {}
    async fn remove_all(&self) {}
    async fn count(&self) -> usize {
        0
    }
    fn supports(&self, _expiration: ExpirationType) -> bool {
        true
    }
}

#[tokio::test]
async fn test_custom_implementation_and_policy() {
    init_logging();
    let blackhole: Arc<dyn CacheImplementation> = Arc::new(Blackhole);
    let selector = ImplementationSelector::builder()
        .shared_implementation(Arc::clone(&blackhole))
        .policy(
            |_duration: Duration,
             _style: StorageStyle,
             _expiration: ExpirationType,
             registry: &cache_facade::selector::ImplementationRegistry| {
                registry
                    .get("blackhole")
                    .cloned()
                    .ok_or_else(|| Error::ConfigurationError("blackhole missing".to_string()))
            },
        )
        .build()
        .expect("valid selector");
    let cache = Cache::new(selector);

    let key = key(60, StorageStyle::Unmodified, ExpirationType::Sliding, "void");
    assert!(cache.add(&key, &report(5)).await.expect("add"));
    assert_eq!(cache.get::<Report>(&key).await.expect("get"), None);
}

#[tokio::test(start_paused = true)]
async fn test_sliding_entry_survives_while_read() {
    let deployment = deployment();
    let key = key(10, StorageStyle::Unmodified, ExpirationType::Sliding, "hot");
    deployment.cache.add(&key, &1u32).await.expect("add");

    for _ in 0..5 {
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(
            deployment.cache.get::<u32>(&key).await.expect("get"),
            Some(1)
        );
    }

    tokio::time::advance(Duration::from_secs(11)).await;
    assert_eq!(deployment.cache.get::<u32>(&key).await.expect("get"), None);
}
