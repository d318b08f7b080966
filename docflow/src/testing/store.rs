//! A key-value store that can be switched offline.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::errors::{PipelineError, Result};
use crate::store::{InMemoryKeyValueStore, KeyValueStore};

/// Wraps an [`InMemoryKeyValueStore`]; every call fails while offline.
#[derive(Debug, Default)]
pub struct UnavailableStore {
    inner: InMemoryKeyValueStore,
    offline: AtomicBool,
}

impl UnavailableStore {
    /// Creates a store that is reachable.
    #[must_use]
    pub fn online() -> Self {
        Self::default()
    }

    /// Creates a store that rejects every call.
    #[must_use]
    pub fn offline() -> Self {
        let store = Self::default();
        store.set_offline(true);
        store
    }

    /// Switches the store on or off.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// The wrapped store.
    #[must_use]
    pub fn inner(&self) -> &InMemoryKeyValueStore {
        &self.inner
    }

    fn check(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(PipelineError::storage("connection refused"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KeyValueStore for UnavailableStore {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn list_prepend(&self, key: &str, value: String) -> Result<usize> {
        self.check()?;
        self.inner.list_prepend(key, value).await
    }

    async fn list_range(&self, key: &str, start: isize, end: isize) -> Result<Vec<String>> {
        self.check()?;
        self.inner.list_range(key, start, end).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.check()?;
        self.inner.expire(key, ttl).await
    }
}
