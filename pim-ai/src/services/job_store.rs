//! Process-wide registry of job records
//!
//! The map lock is held only for the insert/lookup/replace itself. Records are
//! stored as immutable `Arc<JobRecord>` snapshots: the runner works on its own
//! owned copy and publishes a new snapshot after each change, readers clone
//! the `Arc` and never see a record mid-mutation.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::JobRecord;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Stale update for job {job_id}: version {attempted} is not newer than {current}")]
    StaleVersion { job_id: Uuid, current: u64, attempted: u64 },

    #[error("Job {0} already reached a terminal status")]
    AlreadyTerminal(Uuid),

    #[error("Job {0} has not finished yet")]
    NotTerminal(Uuid),
}

#[derive(Debug, Clone, Default)]
pub struct JobStore {
    jobs: Arc<RwLock<HashMap<Uuid, Arc<JobRecord>>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh Pending record under a random v4 id
    ///
    /// Returns the runner's owned working copy.
    pub async fn create(&self, input_reference: impl Into<String>) -> JobRecord {
        let input_reference = input_reference.into();
        let mut jobs = self.jobs.write().await;

        let mut job_id = Uuid::new_v4();
        while jobs.contains_key(&job_id) {
            job_id = Uuid::new_v4();
        }

        let record = JobRecord::new(job_id, input_reference);
        jobs.insert(job_id, Arc::new(record.clone()));
        record
    }

    /// Latest published snapshot
    pub async fn get(&self, job_id: Uuid) -> Option<Arc<JobRecord>> {
        self.jobs.read().await.get(&job_id).cloned()
    }

    /// Replace the stored snapshot with `record`
    ///
    /// `record.version` must be newer than the stored one, and a terminal
    /// snapshot is never replaced.
    pub async fn publish(&self, record: &JobRecord) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let current = jobs
            .get(&record.job_id)
            .ok_or(StoreError::NotFound(record.job_id))?;

        if current.is_terminal() {
            return Err(StoreError::AlreadyTerminal(record.job_id));
        }
        if record.version <= current.version {
            return Err(StoreError::StaleVersion {
                job_id: record.job_id,
                current: current.version,
                attempted: record.version,
            });
        }

        jobs.insert(record.job_id, Arc::new(record.clone()));
        Ok(())
    }

    /// Fail a job whose runner stopped before reaching a terminal status
    ///
    /// Returns the new snapshot, or `None` when the job is unknown or
    /// already terminal.
    pub async fn mark_failed_if_unfinished(&self, job_id: Uuid, error: &str) -> Option<Arc<JobRecord>> {
        let mut jobs = self.jobs.write().await;
        let current = jobs.get(&job_id)?;
        if current.is_terminal() {
            return None;
        }

        let mut record = JobRecord::clone(current);
        record.fail(error).ok()?;
        record.version += 1;

        let snapshot = Arc::new(record);
        jobs.insert(job_id, Arc::clone(&snapshot));
        Some(snapshot)
    }

    /// Drop a finished job from the registry
    pub async fn remove_terminal(&self, job_id: Uuid) -> Result<Arc<JobRecord>, StoreError> {
        let mut jobs = self.jobs.write().await;
        let terminal = jobs
            .get(&job_id)
            .map(|record| record.is_terminal())
            .ok_or(StoreError::NotFound(job_id))?;
        if !terminal {
            return Err(StoreError::NotTerminal(job_id));
        }
        jobs.remove(&job_id).ok_or(StoreError::NotFound(job_id))
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobStatus;
    use std::collections::HashSet;

    #[tokio::test]
    async fn test_create_registers_pending_record() {
        let store = JobStore::new();
        let record = store.create("https://example.com/v").await;

        let stored = store.get(record.job_id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(stored.input_reference, "https://example.com/v");
        assert!(store.get(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_creates_yield_distinct_ids() {
        let store = JobStore::new();
        let handles: Vec<_> = (0..50)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.create(format!("https://example.com/{}", i)).await.job_id })
            })
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap());
        }
        assert_eq!(ids.len(), 50);
        assert_eq!(store.len().await, 50);
    }

    #[tokio::test]
    async fn test_publish_rejects_stale_version() {
        let store = JobStore::new();
        let mut record = store.create("https://example.com/v").await;

        record.transition_to(JobStatus::Running).unwrap();
        record.version += 1;
        store.publish(&record).await.unwrap();

        let err = store.publish(&record).await.unwrap_err();
        assert!(matches!(err, StoreError::StaleVersion { current: 1, attempted: 1, .. }));
    }

    #[tokio::test]
    async fn test_snapshot_unaffected_by_later_mutation() {
        let store = JobStore::new();
        let mut record = store.create("https://example.com/v").await;
        let before = store.get(record.job_id).await.unwrap();

        record.advance_progress(30, "Identifying products...");
        assert_eq!(before.progress_percent, 0);
        assert_eq!(store.get(record.job_id).await.unwrap().progress_percent, 0);
    }

    #[tokio::test]
    async fn test_terminal_snapshot_is_final() {
        let store = JobStore::new();
        let mut record = store.create("https://example.com/v").await;
        record.transition_to(JobStatus::Running).unwrap();
        record.version += 1;
        store.publish(&record).await.unwrap();

        let failed = store
            .mark_failed_if_unfinished(record.job_id, "pipeline task terminated unexpectedly")
            .await
            .unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(store.mark_failed_if_unfinished(record.job_id, "again").await.is_none());

        record.complete("Processing complete!").unwrap();
        record.version += 5;
        assert_eq!(
            store.publish(&record).await,
            Err(StoreError::AlreadyTerminal(record.job_id))
        );
    }

    #[tokio::test]
    async fn test_remove_only_terminal_jobs() {
        let store = JobStore::new();
        let record = store.create("https://example.com/v").await;

        assert_eq!(
            store.remove_terminal(record.job_id).await.unwrap_err(),
            StoreError::NotTerminal(record.job_id)
        );

        store.mark_failed_if_unfinished(record.job_id, "boom").await.unwrap();
        store.remove_terminal(record.job_id).await.unwrap();
        assert!(store.is_empty().await);
        assert_eq!(
            store.remove_terminal(record.job_id).await.unwrap_err(),
            StoreError::NotFound(record.job_id)
        );
    }
}
