//! Download coordination.
//!
//! The coordinator turns a job's fetch plan into daemon transfers, bounded
//! by a global ceiling shared by every job and a per-job ceiling. It owns
//! no job state: every change to a unit is reported as a [`UnitUpdate`]
//! and the dispatcher decides what to persist.

pub mod assemble;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::config::{CoordinatorConfig, DaemonConfig, RetryConfig};
use crate::daemon::{
    watch, DaemonEvent, DownloadDaemon, PathMap, TaskId, TaskState, TimeoutDaemon,
    TransferRequest,
};
use crate::error::{Error, Result};
use crate::fs::ensure_dir;
use crate::job::{FetchUnit, JobId, UnitState};
use crate::retry::{retry_delay, IsRetryable};

pub use assemble::{artifact_extension, assemble, unit_path};

/// Change to one unit of a running plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitUpdate {
    /// A daemon transfer was created (or re-created) for the unit.
    Started { index: u32, task_id: TaskId },
    Progress {
        index: u32,
        bytes_done: u64,
        bytes_total: u64,
    },
    /// The unit's file is on disk with exactly `bytes` bytes.
    Completed { index: u32, bytes: u64 },
    /// The transfer failed and the unit waits for another attempt.
    Requeued { index: u32 },
    Failed { index: u32, error: String },
}

/// How one followed transfer ended.
enum Followed {
    Complete(u64),
    Failed(String),
    Missing,
}

pub struct Coordinator {
    daemon: Arc<dyn DownloadDaemon>,
    global: Arc<Semaphore>,
    per_job_limit: usize,
    poll_interval: Duration,
    retry: RetryConfig,
    paths: PathMap,
    events: Option<broadcast::Sender<DaemonEvent>>,
}

impl Coordinator {
    /// Every daemon call made through the coordinator is bounded by
    /// `daemon.rpc_timeout_secs`.
    pub fn new(
        daemon: Arc<dyn DownloadDaemon>,
        limits: &CoordinatorConfig,
        daemon_config: &DaemonConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            daemon: Arc::new(TimeoutDaemon::new(daemon, daemon_config.rpc_timeout())),
            global: Arc::new(Semaphore::new(limits.global_limit.max(1))),
            per_job_limit: limits.per_job_limit.max(1),
            poll_interval: daemon_config.poll_interval(),
            retry,
            paths: PathMap::new(PathBuf::new(), None),
            events: None,
        }
    }

    pub fn with_paths(mut self, paths: PathMap) -> Self {
        self.paths = paths;
        self
    }

    /// Wake status watchers on daemon notifications.
    pub fn with_events(mut self, events: broadcast::Sender<DaemonEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Slots currently free under the global ceiling.
    pub fn available_slots(&self) -> usize {
        self.global.available_permits()
    }

    /// Download every unit of `units` that is not complete into `units_dir`.
    ///
    /// Returns once all units are complete, or with the first unit failure
    /// after every other transfer of the job was stopped. Cancelling
    /// `cancel` stops all transfers and returns `Error::Cancelled`.
    pub async fn run_plan(
        &self,
        job_id: JobId,
        units: &[FetchUnit],
        units_dir: &Path,
        cancel: &CancellationToken,
        updates: mpsc::UnboundedSender<UnitUpdate>,
    ) -> Result<()> {
        let pending: Vec<FetchUnit> = units
            .iter()
            .filter(|u| u.state != UnitState::Complete)
            .cloned()
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        ensure_dir(units_dir).await?;

        tracing::debug!(
            job_id = %job_id,
            pending = pending.len(),
            total = units.len(),
            "Running fetch plan"
        );

        // Cancelled on the first unit failure so the others stop.
        let job_cancel = cancel.child_token();
        let mut results = stream::iter(pending)
            .map(|unit| {
                let token = job_cancel.clone();
                let updates = updates.clone();
                async move { self.fetch_unit(job_id, unit, units_dir, &token, &updates).await }
            })
            .buffer_unordered(self.per_job_limit);

        let mut first_error = None;
        while let Some(result) = results.next().await {
            if let Err(e) = result {
                if first_error.is_none() && !matches!(e, Error::Cancelled) {
                    tracing::warn!(job_id = %job_id, error = %e, "Unit failed, stopping remaining transfers");
                    job_cancel.cancel();
                    first_error = Some(e);
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn fetch_unit(
        &self,
        job_id: JobId,
        unit: FetchUnit,
        units_dir: &Path,
        cancel: &CancellationToken,
        updates: &mpsc::UnboundedSender<UnitUpdate>,
    ) -> Result<()> {
        let index = unit.sequence_index;
        let target = unit_path(units_dir, &unit);
        let request = TransferRequest {
            locator: unit.remote_locator.clone(),
            dir: self.paths.to_daemon(units_dir),
            file_name: target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| Error::InvalidFilename(target.display().to_string()))?,
        };

        let mut resume = match (unit.state, unit.daemon_task_id) {
            (UnitState::Active, Some(task)) => Some(TaskId(task)),
            _ => None,
        };
        let mut retries = 0u32;

        loop {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                permit = self.global.clone().acquire_owned() => permit
                    .map_err(|_| Error::Daemon("coordinator is shut down".into()))?,
            };

            let outcome = self
                .run_transfer(job_id, index, resume.take(), &request, &target, cancel, updates)
                .await;
            drop(permit);

            match outcome {
                Ok(bytes) => {
                    tracing::debug!(job_id = %job_id, unit = index, bytes, "Unit complete");
                    let _ = updates.send(UnitUpdate::Completed { index, bytes });
                    return Ok(());
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) if e.is_retryable() && retries < self.retry.max_attempts => {
                    retries += 1;
                    let delay = retry_delay(&self.retry, retries);
                    tracing::warn!(
                        job_id = %job_id,
                        unit = index,
                        error = %e,
                        attempt = retries,
                        delay_ms = delay.as_millis() as u64,
                        "Transfer failed, retrying"
                    );
                    let _ = updates.send(UnitUpdate::Requeued { index });
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    tracing::error!(job_id = %job_id, unit = index, error = %e, "Unit failed");
                    let _ = updates.send(UnitUpdate::Failed {
                        index,
                        error: e.to_string(),
                    });
                    return Err(e);
                }
            }
        }
    }

    /// Drive one transfer to completion. A task re-attached after a restart
    /// that the daemon no longer knows is created again.
    #[allow(clippy::too_many_arguments)]
    async fn run_transfer(
        &self,
        job_id: JobId,
        index: u32,
        resume: Option<TaskId>,
        request: &TransferRequest,
        target: &Path,
        cancel: &CancellationToken,
        updates: &mpsc::UnboundedSender<UnitUpdate>,
    ) -> Result<u64> {
        let mut reattached = resume.is_some();
        let mut task = match resume {
            Some(task) => {
                tracing::debug!(job_id = %job_id, unit = index, task_id = %task, "Re-attaching to transfer");
                task
            }
            None => self.create(index, request, updates).await?,
        };

        loop {
            match self.follow(&task, index, target, cancel, updates).await {
                Ok(Followed::Complete(bytes)) => return Ok(bytes),
                Ok(Followed::Missing) if reattached => {
                    tracing::info!(job_id = %job_id, unit = index, task_id = %task, "Daemon lost the transfer, creating it again");
                    reattached = false;
                    task = self.create(index, request, updates).await?;
                }
                Ok(Followed::Missing) => {
                    return Err(Error::Daemon(format!("transfer {} disappeared", task)));
                }
                Ok(Followed::Failed(message)) => {
                    self.discard(&task).await;
                    return Err(Error::Daemon(message));
                }
                Err(Error::Cancelled) => {
                    self.discard(&task).await;
                    return Err(Error::Cancelled);
                }
                Err(e) => {
                    self.discard(&task).await;
                    return Err(e);
                }
            }
        }
    }

    async fn create(
        &self,
        index: u32,
        request: &TransferRequest,
        updates: &mpsc::UnboundedSender<UnitUpdate>,
    ) -> Result<TaskId> {
        let task = self.daemon.create_transfer(request).await?;
        let _ = updates.send(UnitUpdate::Started {
            index,
            task_id: task.clone(),
        });
        Ok(task)
    }

    async fn follow(
        &self,
        task: &TaskId,
        index: u32,
        target: &Path,
        cancel: &CancellationToken,
        updates: &mpsc::UnboundedSender<UnitUpdate>,
    ) -> Result<Followed> {
        let events = self.events.as_ref().map(|tx| tx.subscribe());
        let mut statuses = watch(
            self.daemon.clone(),
            task.clone(),
            self.poll_interval,
            events,
            cancel.clone(),
        );

        while let Some(status) = statuses.next().await {
            let status = status?;
            match status.state {
                TaskState::Complete => {
                    if let Err(e) = self.daemon.purge(task).await {
                        tracing::debug!(task_id = %task, error = %e, "Failed to purge finished transfer");
                    }
                    let bytes = match tokio::fs::metadata(target).await {
                        Ok(meta) => meta.len(),
                        Err(_) => {
                            return Ok(Followed::Failed(format!(
                                "transfer {} completed but {} is missing",
                                task,
                                target.display()
                            )))
                        }
                    };
                    return Ok(Followed::Complete(bytes));
                }
                TaskState::Error => {
                    return Ok(Followed::Failed(
                        status
                            .error
                            .unwrap_or_else(|| format!("transfer {} failed", task)),
                    ))
                }
                TaskState::Removed => {
                    return Ok(Followed::Failed(format!("transfer {} was removed", task)))
                }
                TaskState::Missing => return Ok(Followed::Missing),
                TaskState::Waiting | TaskState::Active | TaskState::Paused => {
                    let _ = updates.send(UnitUpdate::Progress {
                        index,
                        bytes_done: status.bytes_done,
                        bytes_total: status.bytes_total,
                    });
                }
            }
        }

        // The watch only ends without a terminal status when cancelled.
        Err(Error::Cancelled)
    }

    /// Stop the daemon transfers still recorded on `units`. Used when a job
    /// is cancelled while no task of this process is following them.
    pub async fn abandon(&self, job_id: JobId, units: &[FetchUnit]) -> usize {
        let mut stopped = 0;
        for unit in units {
            if unit.state == UnitState::Complete {
                continue;
            }
            if let Some(task) = &unit.daemon_task_id {
                tracing::debug!(job_id = %job_id, unit = unit.sequence_index, task_id = %task, "Stopping abandoned transfer");
                self.discard(&TaskId(task.clone())).await;
                stopped += 1;
            }
        }
        stopped
    }

    /// Stop a transfer and drop its record, ignoring failures.
    async fn discard(&self, task: &TaskId) {
        if let Err(e) = self.daemon.cancel(task).await {
            tracing::debug!(task_id = %task, error = %e, "Failed to cancel transfer");
        }
        if let Err(e) = self.daemon.purge(task).await {
            tracing::debug!(task_id = %task, error = %e, "Failed to purge transfer");
        }
    }
}
