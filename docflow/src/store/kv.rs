//! Key-value collaborator with per-key expiry.
//!
//! Checkpoints, progress snapshots and event logs are all stored through
//! [`KeyValueStore`]. Production deployments implement it over an external
//! service; [`InMemoryKeyValueStore`] backs tests and single-process runs.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::errors::{PipelineError, Result};

/// Single-key operations against a TTL-bounded key-value service.
///
/// Every error is reported as [`PipelineError::StorageUnavailable`].
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Sets a string value that expires after `ttl`.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Gets a string value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Pushes a value onto the head of a list, returning the new length.
    async fn list_prepend(&self, key: &str, value: String) -> Result<usize>;

    /// Returns list elements `start..=end`; negative indices count from the tail.
    async fn list_range(&self, key: &str, start: isize, end: isize) -> Result<Vec<String>>;

    /// Sets the expiry of an existing key. Returns false if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;
}

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-memory key-value store with lazy expiry.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyValueStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl InMemoryKeyValueStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    /// Returns true if no live keys remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if `key` holds a live value.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .lock()
            .get(key)
            .is_some_and(|e| !e.is_expired(now))
    }

    /// Returns the remaining lifetime of `key`, if it has one.
    #[must_use]
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .lock()
            .get(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Drops every expired key.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        before - entries.len()
    }

    fn live_entry<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }
}

fn wrong_type(key: &str) -> PipelineError {
    PipelineError::storage(format!("WRONGTYPE operation against key '{key}'"))
}

/// Resolves an inclusive `start..=end` range with tail-relative indices.
fn resolve_range(len: usize, start: isize, end: isize) -> Option<(usize, usize)> {
    let len = isize::try_from(len).ok()?;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let end = if end < 0 { len + end } else { end.min(len - 1) };

    if len == 0 || start > end || start >= len {
        return None;
    }
    Some((usize::try_from(start).ok()?, usize::try_from(end).ok()?))
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: Value::Str(value),
                expires_at: Instant::now().checked_add(ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock();
        match Self::live_entry(&mut entries, key) {
            None => Ok(None),
            Some(Entry { value: Value::Str(s), .. }) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn list_prepend(&self, key: &str, value: String) -> Result<usize> {
        let mut entries = self.entries.lock();
        match Self::live_entry(&mut entries, key) {
            Some(Entry { value: Value::List(list), .. }) => {
                list.push_front(value);
                Ok(list.len())
            }
            Some(_) => Err(wrong_type(key)),
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::List(VecDeque::from([value])),
                        expires_at: None,
                    },
                );
                Ok(1)
            }
        }
    }

    async fn list_range(&self, key: &str, start: isize, end: isize) -> Result<Vec<String>> {
        let mut entries = self.entries.lock();
        match Self::live_entry(&mut entries, key) {
            None => Ok(Vec::new()),
            Some(Entry { value: Value::List(list), .. }) => {
                Ok(resolve_range(list.len(), start, end)
                    .map(|(s, e)| list.range(s..=e).cloned().collect())
                    .unwrap_or_default())
            }
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.lock();
        match Self::live_entry(&mut entries, key) {
            Some(entry) => {
                entry.expires_at = Instant::now().checked_add(ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
