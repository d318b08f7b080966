//! Append-only, TTL-bounded notification log per job.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::KeyValueStore;
use crate::config::StoreConfig;
use crate::core::{JobId, NotificationEvent, Severity};
use crate::errors::Result;

fn log_key(job_id: &JobId) -> String {
    format!("notifications:{job_id}")
}

/// Notification history of every job.
///
/// Only one stage instance is active per job, so appends for a job never race;
/// distinct jobs use distinct keys.
#[derive(Clone)]
pub struct EventLog {
    kv: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl EventLog {
    /// Creates a log over `kv` with the configured retention window.
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>, config: &StoreConfig) -> Self {
        Self {
            kv,
            ttl: config.notification_ttl(),
        }
    }

    /// Appends an event and refreshes the log's lifetime.
    pub async fn append(&self, job_id: &JobId, event: &NotificationEvent) -> Result<()> {
        log_event(event);

        let key = log_key(job_id);
        let raw = serde_json::to_string(event)?;
        self.kv.list_prepend(&key, raw).await?;
        self.kv.expire(&key, self.ttl).await?;
        Ok(())
    }

    /// Returns up to `limit` events, most recent first. `None` returns the whole window.
    pub async fn recent(&self, job_id: &JobId, limit: Option<usize>) -> Result<Vec<NotificationEvent>> {
        let end = match limit {
            Some(0) => return Ok(Vec::new()),
            Some(n) => isize::try_from(n - 1).unwrap_or(isize::MAX),
            None => -1,
        };

        self.kv
            .list_range(&log_key(job_id), 0, end)
            .await?
            .iter()
            .map(|raw| serde_json::from_str(raw).map_err(Into::into))
            .collect()
    }

    /// Returns the number of retained events.
    pub async fn count(&self, job_id: &JobId) -> Result<usize> {
        Ok(self.kv.list_range(&log_key(job_id), 0, -1).await?.len())
    }
}

fn log_event(event: &NotificationEvent) {
    match event.severity {
        Severity::Error => error!(
            job_id = %event.job_id,
            stage = %event.stage,
            tags = ?event.tags,
            "Notification: {}", event.message
        ),
        Severity::Warning => warn!(
            job_id = %event.job_id,
            stage = %event.stage,
            "Notification: {}", event.message
        ),
        Severity::Success => info!(
            job_id = %event.job_id,
            stage = %event.stage,
            "Notification: {}", event.message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryKeyValueStore;

    fn event(job: &JobId, message: &str) -> NotificationEvent {
        NotificationEvent::stage(job.clone(), "extract", Severity::Success, message)
    }

    #[tokio::test]
    async fn test_recent_is_most_recent_first() {
        let log = EventLog::new(Arc::new(InMemoryKeyValueStore::new()), &StoreConfig::default());
        let job = JobId::from("job-1");

        for msg in ["first", "second", "third"] {
            log.append(&job, &event(&job, msg)).await.unwrap();
        }

        let all = log.recent(&job, None).await.unwrap();
        let messages: Vec<_> = all.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["third", "second", "first"]);

        let two = log.recent(&job, Some(2)).await.unwrap();
        assert_eq!(two.len(), 2);
        assert_eq!(two[0].message, "third");

        assert!(log.recent(&job, Some(0)).await.unwrap().is_empty());
        assert_eq!(log.count(&job).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_append_refreshes_ttl() {
        let kv = Arc::new(InMemoryKeyValueStore::new());
        let log = EventLog::new(kv.clone(), &StoreConfig::default());
        let job = JobId::from("job-1");

        log.append(&job, &event(&job, "hello")).await.unwrap();

        let ttl = kv.ttl("notifications:job-1").unwrap();
        assert!(ttl > Duration::from_secs(86000));
    }

    #[tokio::test]
    async fn test_jobs_are_isolated() {
        let log = EventLog::new(Arc::new(InMemoryKeyValueStore::new()), &StoreConfig::default());
        let a = JobId::from("a");
        let b = JobId::from("b");

        log.append(&a, &event(&a, "for a")).await.unwrap();

        assert_eq!(log.count(&a).await.unwrap(), 1);
        assert!(log.recent(&b, None).await.unwrap().is_empty());
    }
}
