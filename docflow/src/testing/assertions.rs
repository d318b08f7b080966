//! Assertions over recorded notifications and job state.

use crate::core::{JobId, JobStatus, Severity};
use crate::store::{CheckpointStore, EventLog};

/// Asserts the number of events attributed to `stage` with `severity`.
///
/// Stage-level and pipeline-level events are both counted.
pub async fn assert_event_count(
    events: &EventLog,
    job_id: &JobId,
    stage: &str,
    severity: Severity,
    expected: usize,
) {
    let recorded = match events.recent(job_id, None).await {
        Ok(recorded) => recorded,
        Err(e) => panic!("Failed to read events for {job_id}: {e}"),
    };
    let actual = recorded
        .iter()
        .filter(|e| e.stage == stage && e.severity == severity)
        .count();
    assert_eq!(
        actual, expected,
        "Expected {expected} {severity} events for stage '{stage}', got {actual}: {recorded:#?}"
    );
}

/// Asserts the number of events carrying `tag`.
pub async fn assert_tagged_count(events: &EventLog, job_id: &JobId, tag: &str, expected: usize) {
    let recorded = match events.recent(job_id, None).await {
        Ok(recorded) => recorded,
        Err(e) => panic!("Failed to read events for {job_id}: {e}"),
    };
    let actual = recorded.iter().filter(|e| e.has_tag(tag)).count();
    assert_eq!(
        actual, expected,
        "Expected {expected} events tagged '{tag}', got {actual}"
    );
}

/// Asserts the stored status of a job.
pub async fn assert_job_status(checkpoints: &CheckpointStore, job_id: &JobId, expected: JobStatus) {
    match checkpoints.get_job(job_id).await {
        Ok(Some(job)) => assert_eq!(
            job.status, expected,
            "Expected job {job_id} to be {expected}, got {}",
            job.status
        ),
        Ok(None) => panic!("Job {job_id} not found"),
        Err(e) => panic!("Failed to read job {job_id}: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::core::NotificationEvent;
    use crate::store::InMemoryKeyValueStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_assert_event_count() {
        let log = EventLog::new(Arc::new(InMemoryKeyValueStore::new()), &StoreConfig::default());
        let job = JobId::from("job-1");
        let event = NotificationEvent::stage(job.clone(), "extract", Severity::Error, "boom").with_tag("timeout");
        log.append(&job, &event).await.unwrap();

        assert_event_count(&log, &job, "extract", Severity::Error, 1).await;
        assert_event_count(&log, &job, "extract", Severity::Success, 0).await;
        assert_tagged_count(&log, &job, "timeout", 1).await;
    }

    #[tokio::test]
    #[should_panic(expected = "Expected 2 error events")]
    async fn test_assert_event_count_fails() {
        let log = EventLog::new(Arc::new(InMemoryKeyValueStore::new()), &StoreConfig::default());
        assert_event_count(&log, &JobId::from("job-1"), "extract", Severity::Error, 2).await;
    }
}
