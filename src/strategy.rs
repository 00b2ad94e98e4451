//! Routing of individual cache operations.
//!
//! [`CachingStrategy`] asks the selector for a backend using the key's
//! metadata and forwards the call. Bulk operations (`remove_all`,
//! `count_all`) fan out to every registered implementation, enabled or not,
//! so disabling a backend never strands entries that a later clear should
//! have reached.

use crate::error::Result;
use crate::implementation::CacheImplementation;
use crate::key::Key;
use crate::selector::ImplementationSelector;
use futures::future::join_all;
use std::sync::Arc;

/// Selects a backend per operation, then delegates to it.
#[derive(Debug)]
pub struct CachingStrategy {
    selector: ImplementationSelector,
}

impl CachingStrategy {
    pub fn new(selector: ImplementationSelector) -> Self {
        CachingStrategy { selector }
    }

    /// Store already-encoded bytes.
    ///
    /// Returns the backend's success flag.
    ///
    /// # Errors
    /// Selection errors only; backend failures come back as `Ok(false)`.
    pub async fn add(&self, key: &Key, value: Vec<u8>) -> Result<bool> {
        let implementation = self.select_for(key)?;
        Ok(implementation.add(key, value).await)
    }

    /// # Errors
    /// Selection errors only; backend failures read as a miss.
    pub async fn get(&self, key: &Key) -> Result<Option<Vec<u8>>> {
        let implementation = self.select_for(key)?;
        Ok(implementation.get(key).await)
    }

    /// Removing an absent key is not an error.
    ///
    /// # Errors
    /// Selection errors only.
    pub async fn remove(&self, key: &Key) -> Result<()> {
        let implementation = self.select_for(key)?;
        implementation.remove(key).await;
        Ok(())
    }

    /// Clear every registered implementation.
    pub async fn remove_all(&self) {
        join_all(self.selector.registry().iter().map(|i| i.remove_all())).await;
        info!(
            "✓ Cleared {} cache implementation(s)",
            self.selector.registry().len()
        );
    }

    /// Sum of entry counts over every registered implementation.
    pub async fn count_all(&self) -> usize {
        join_all(self.selector.registry().iter().map(|i| i.count()))
            .await
            .into_iter()
            .sum()
    }

    /// The selector, for enabling and disabling implementations at runtime.
    pub fn selector(&self) -> &ImplementationSelector {
        &self.selector
    }

    fn select_for(&self, key: &Key) -> Result<Arc<dyn CacheImplementation>> {
        self.selector.select(
            key.duration_to_store(),
            key.storage_style(),
            key.expiration_type(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::error::Error;
    use crate::implementation::BackendImplementation;
    use crate::key::{ExpirationType, StorageStyle};
    use crate::selector::TieredPolicy;
    use std::time::Duration;

    fn strategy() -> CachingStrategy {
        let selector = ImplementationSelector::builder()
            .implementation(BackendImplementation::new("local", InMemoryBackend::new()))
            .implementation(BackendImplementation::new("shared", InMemoryBackend::new()))
            .tiered(TieredPolicy::new("local", "shared"))
            .build()
            .expect("valid selector");
        CachingStrategy::new(selector)
    }

    fn key(secs: u64, name: &str) -> Key {
        Key::new(
            Duration::from_secs(secs),
            StorageStyle::Unmodified,
            ExpirationType::Absolute,
            name,
        )
        .expect("valid key")
    }

    #[tokio::test]
    async fn test_add_get_remove() {
        let strategy = strategy();
        let key = key(60, "strategy");

        assert!(strategy.add(&key, b"bytes".to_vec()).await.expect("add"));
        assert_eq!(
            strategy.get(&key).await.expect("get"),
            Some(b"bytes".to_vec())
        );

        strategy.remove(&key).await.expect("remove");
        assert_eq!(strategy.get(&key).await.expect("get"), None);

        // Absent key
        strategy.remove(&key).await.expect("remove");
    }

    #[tokio::test]
    async fn test_count_and_remove_all_span_backends() {
        let strategy = strategy();

        strategy
            .add(&key(60, "short"), vec![1])
            .await
            .expect("add");
        strategy
            .add(&key(3600, "long"), vec![2])
            .await
            .expect("add");
        assert_eq!(strategy.count_all().await, 2);

        // Disabled implementations are still cleared
        strategy.selector().disable("shared").expect("disable");
        strategy.remove_all().await;
        assert_eq!(strategy.count_all().await, 0);
    }

    #[tokio::test]
    async fn test_selection_failure_surfaces() {
        let strategy = strategy();
        strategy.selector().disable("local").expect("disable");
        strategy.selector().disable("shared").expect("disable");

        let result = strategy.add(&key(60, "nowhere"), vec![1]).await;
        assert!(matches!(result, Err(Error::CacheSelectionFailure(_))));
        assert!(matches!(
            strategy.get(&key(60, "nowhere")).await,
            Err(Error::CacheSelectionFailure(_))
        ));
    }
}
