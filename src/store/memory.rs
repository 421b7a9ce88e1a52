//! In-process job store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{Result, StoreError};
use crate::job::{Job, JobId, JobStatus};
use crate::store::{ensure_valid, JobStore};

/// Job store kept in memory; jobs do not survive the process.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        ensure_valid(job)?;
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id.to_string()).into());
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: &JobId) -> Result<Option<Job>> {
        Ok(self.jobs.lock().await.get(id).cloned())
    }

    async fn update(&self, job: &mut Job) -> Result<()> {
        ensure_valid(job)?;
        let mut jobs = self.jobs.lock().await;
        let stored = jobs
            .get(&job.id)
            .ok_or_else(|| StoreError::Backend(format!("job {} was never inserted", job.id)))?;
        if stored.version != job.version {
            return Err(StoreError::Conflict {
                id: job.id.to_string(),
                expected: job.version,
            }
            .into());
        }
        job.version += 1;
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn list_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>> {
        let jobs = self.jobs.lock().await;
        let mut found: Vec<Job> = jobs
            .values()
            .filter(|j| statuses.contains(&j.status))
            .cloned()
            .collect();
        found.sort_by_key(|j| j.created_at);
        Ok(found)
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Job>> {
        let jobs = self.jobs.lock().await;
        let mut all: Vec<Job> = jobs.values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        all.truncate(limit);
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = MemoryJobStore::new();
        let job = Job::new("https://example.com/a.mp4", Some(7));
        store.insert(&job).await.unwrap();

        let loaded = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded, job);
        assert!(matches!(
            store.insert(&job).await,
            Err(Error::Store(StoreError::Duplicate(_)))
        ));
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let store = MemoryJobStore::new();
        let job = Job::new("ref", None);
        store.insert(&job).await.unwrap();

        let mut first = job.clone();
        let mut second = job.clone();
        assert_ok!(first.transition(JobStatus::Resolving));
        assert_ok!(store.update(&mut first).await);
        assert_eq!(first.version, 1);

        assert_ok!(second.transition(JobStatus::Cancelled));
        let err = assert_err!(store.update(&mut second).await);
        assert!(matches!(err, Error::Store(StoreError::Conflict { .. })));

        let stored = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Resolving);
    }

    #[tokio::test]
    async fn test_list_by_status() {
        let store = MemoryJobStore::new();
        let pending = Job::new("a", None);
        let mut cancelled = Job::new("b", None);
        store.insert(&pending).await.unwrap();
        store.insert(&cancelled).await.unwrap();
        cancelled.transition(JobStatus::Cancelled).unwrap();
        store.update(&mut cancelled).await.unwrap();

        let active = store.list_by_status(&JobStatus::ACTIVE).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, pending.id);
    }
}
