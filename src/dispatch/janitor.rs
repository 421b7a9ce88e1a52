//! Periodic housekeeping: retained work directories, expired download links
//! and jobs whose owner stopped writing.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dispatch::PipelineDispatcher;
use crate::error::{Error, Result, StoreError};
use crate::fs::{job_dir, remove_dir_if_exists};
use crate::job::{Job, JobStatus};

impl PipelineDispatcher {
    /// Delete the work directories of failed jobs whose retention expired.
    /// Returns how many were removed.
    pub async fn sweep_retained(&self) -> Result<usize> {
        let now = Utc::now();
        let mut removed = 0;

        for mut job in self.store.list_by_status(&[JobStatus::Failed]).await? {
            match job.cleanup_after {
                Some(deadline) if deadline <= now => {}
                _ => continue,
            }

            let dir = job_dir(self.work_dir(), &job.id);
            remove_dir_if_exists(&dir).await?;
            job.cleanup_after = None;
            if !self.write_back(&mut job).await? {
                continue;
            }
            tracing::debug!(job_id = %job.id, dir = %dir.display(), "Removed retained work directory");
            removed += 1;
        }

        if removed > 0 {
            tracing::info!(removed, "Janitor removed retained work directories");
        }
        Ok(removed)
    }

    /// Take down published files past their expiry.
    pub async fn sweep_published(&self) -> Result<usize> {
        let Some(shelf) = &self.shelf else {
            return Ok(0);
        };
        let now = Utc::now();
        let mut removed = 0;

        for mut job in self.store.list_by_status(&[JobStatus::Done]).await? {
            let Some(published) = job.published.clone() else {
                continue;
            };
            if published.expires_at > now {
                continue;
            }

            shelf.remove(&published).await?;
            job.published = None;
            if !self.write_back(&mut job).await? {
                continue;
            }
            tracing::debug!(job_id = %job.id, url = %published.url, "Download link expired");
            removed += 1;
        }

        if removed > 0 {
            tracing::info!(removed, "Janitor removed expired published files");
        }
        Ok(removed)
    }

    /// Re-spawn unfinished jobs nobody has written within the claim lease
    /// and that this instance is not running.
    pub async fn resume_orphans(self: &Arc<Self>) -> Result<usize> {
        let now = Utc::now();
        let lease = self.settings.lease();
        let mut resumed = 0;

        for job in self.store.list_by_status(&JobStatus::ACTIVE).await? {
            if now - job.updated_at < lease || self.running_token(&job.id).is_some() {
                continue;
            }
            tracing::info!(job_id = %job.id, owner = ?job.owner, status = %job.status, "Resuming orphaned job");
            self.spawn(job.id);
            resumed += 1;
        }
        Ok(resumed)
    }

    /// Published jobs of `chat_id` whose link is still live, newest first.
    pub async fn published_for(&self, chat_id: i64) -> Result<Vec<Job>> {
        let now = Utc::now();
        let mut jobs: Vec<Job> = self
            .store
            .list_by_status(&[JobStatus::Done])
            .await?
            .into_iter()
            .filter(|job| job.chat_id == Some(chat_id))
            .filter(|job| job.published.as_ref().is_some_and(|p| p.expires_at > now))
            .collect();
        jobs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(jobs)
    }

    /// One janitor pass; failures are logged and the pass moves on.
    pub async fn sweep(self: &Arc<Self>) {
        if let Err(e) = self.sweep_retained().await {
            tracing::warn!(error = %e, "Janitor sweep of work directories failed");
        }
        if let Err(e) = self.sweep_published().await {
            tracing::warn!(error = %e, "Janitor sweep of published files failed");
        }
        if let Err(e) = self.resume_orphans().await {
            tracing::warn!(error = %e, "Janitor could not resume orphaned jobs");
        }
    }

    /// Sweep every `interval` until `shutdown` fires.
    pub fn spawn_janitor(self: &Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => dispatcher.sweep().await,
                }
            }
        })
    }

    /// Store a housekeeping change. False when someone else touched the job
    /// first; the next sweep sees the new record.
    async fn write_back(&self, job: &mut Job) -> Result<bool> {
        job.touch();
        match self.store.update(job).await {
            Ok(()) => Ok(true),
            Err(Error::Store(StoreError::Conflict { .. })) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
