//! Pipeline dispatcher.
//!
//! Each job runs as one task that walks the state machine
//! `Pending -> Resolving -> Fetching -> Assembling -> Uploading -> Done`.
//! Every transition is persisted with a compare-and-set before the next
//! stage acts, so a restarted process picks jobs up from their last stored
//! state.

pub mod janitor;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, RetryConfig};
use crate::coordinator::{artifact_extension, assemble, Coordinator, UnitUpdate};
use crate::daemon::{notify, Aria2Client, PathMap};
use crate::error::{Error, Result, StoreError};
use crate::fs::{artifact_file_name, job_dir, remove_dir_if_exists, units_dir};
use crate::job::{
    DeliveryMode, Job, JobEvent, JobId, JobStatus, Outcome, UnitState, UploadCheckpoint,
};
use crate::publish::FileShelf;
use crate::resolve::{Resolver, SourceResolver};
use crate::retry::{retry_delay, with_retry};
use crate::store::JobStore;
use crate::upload::{BotApiTransport, CheckpointSink, SendFile, UploadRelay};

/// Capacity of the job event channel.
const EVENT_CAPACITY: usize = 256;

/// Dispatcher knobs taken from the configuration.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub work_dir: PathBuf,
    pub max_attempts: u32,
    pub progress_flush: Duration,
    pub retain_failed_secs: u64,
    pub keep_uploaded: bool,
    pub default_chat_id: Option<i64>,
    pub storage_chat_id: Option<i64>,
    /// Owner name written into claimed jobs; random when unset.
    pub instance_id: Option<String>,
    /// How long a claim holds after the owner's last write.
    pub claim_lease: Duration,
    /// Backoff for store writes and pipeline retries.
    pub retry: RetryConfig,
}

impl DispatchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            work_dir: config.pipeline.work_dir(),
            max_attempts: config.pipeline.max_attempts.max(1),
            progress_flush: config.pipeline.progress_flush(),
            retain_failed_secs: config.pipeline.retain_failed_secs,
            keep_uploaded: config.pipeline.keep_uploaded,
            default_chat_id: config.bot.default_chat_id,
            storage_chat_id: config.bot.storage_chat_id,
            instance_id: config.pipeline.instance_id.clone(),
            claim_lease: config.pipeline.claim_lease(),
            retry: config.retry.clone(),
        }
    }

    fn lease(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.claim_lease).unwrap_or(chrono::Duration::MAX)
    }
}

pub struct PipelineDispatcher {
    store: Arc<dyn JobStore>,
    resolver: Arc<dyn Resolver>,
    coordinator: Arc<Coordinator>,
    relay: Arc<UploadRelay>,
    shelf: Option<FileShelf>,
    settings: DispatchSettings,
    instance: String,
    running: Mutex<HashMap<JobId, CancellationToken>>,
    events: broadcast::Sender<JobEvent>,
}

impl PipelineDispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        resolver: Arc<dyn Resolver>,
        coordinator: Arc<Coordinator>,
        relay: Arc<UploadRelay>,
        settings: DispatchSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let instance = settings.instance_id.clone().unwrap_or_else(|| {
            let id = uuid::Uuid::new_v4().simple().to_string();
            format!("relay-{}", &id[..8])
        });
        Self {
            store,
            resolver,
            coordinator,
            relay,
            shelf: None,
            settings,
            instance,
            running: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Publish download links on `shelf` for link jobs and oversized files.
    pub fn with_shelf(mut self, shelf: FileShelf) -> Self {
        self.shelf = Some(shelf);
        self
    }

    /// Wire the production components: aria2, the HTTP resolver, the Bot
    /// API and the file shelf. `shutdown` stops the notification listener.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn JobStore>,
        shutdown: &CancellationToken,
    ) -> Result<Self> {
        let mut settings = DispatchSettings::from_config(config);
        if settings.work_dir.is_relative() {
            settings.work_dir = std::env::current_dir()?.join(&settings.work_dir);
        }

        let daemon = Arc::new(Aria2Client::new(&config.daemon)?);
        let mut coordinator = Coordinator::new(
            daemon,
            &config.coordinator,
            &config.daemon,
            config.retry.clone(),
        )
        .with_paths(PathMap::new(
            settings.work_dir.clone(),
            config.daemon.download_dir.clone(),
        ));
        if let Some(ws_url) = &config.daemon.ws_url {
            coordinator = coordinator.with_events(notify::spawn_listener(ws_url.clone(), shutdown.clone()));
        }

        let resolver = Arc::new(SourceResolver::new(&config.resolver)?);
        let transport = Arc::new(BotApiTransport::new(
            &config.bot,
            &config.upload,
            config.upload.spool_dir(&settings.work_dir),
        )?);
        let relay = UploadRelay::new(transport, &config.upload, config.retry.clone());

        let dispatcher = Self::new(
            store,
            resolver,
            Arc::new(coordinator),
            Arc::new(relay),
            settings,
        );
        Ok(match FileShelf::from_config(&config.fileserver) {
            Some(shelf) => dispatcher.with_shelf(shelf),
            None => dispatcher,
        })
    }

    /// Identifier written into `owner` of the jobs this instance runs.
    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Whether link delivery is available.
    pub fn publishes_links(&self) -> bool {
        self.shelf.is_some()
    }

    /// Create and persist a pending job delivered by upload.
    pub async fn submit(&self, reference: &str, chat_id: Option<i64>) -> Result<Job> {
        self.submit_with(reference, chat_id, DeliveryMode::Telegram).await
    }

    /// Create and persist a pending job.
    pub async fn submit_with(&self, reference: &str, chat_id: Option<i64>, delivery: DeliveryMode) -> Result<Job> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(Error::UnresolvableSource("empty reference".into()));
        }
        if delivery == DeliveryMode::Link && self.shelf.is_none() {
            return Err(Error::MissingConfig("fileserver.root for download links".into()));
        }
        let mut job = Job::new(reference, chat_id);
        job.delivery = delivery;
        self.store.insert(&job).await?;
        tracing::info!(job_id = %job.id, reference, "Job submitted");
        self.emit(JobEvent::StatusChanged {
            id: job.id,
            status: job.status,
        });
        Ok(job)
    }

    pub async fn get(&self, id: &JobId) -> Result<Job> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| Error::JobNotFound(id.to_string()))
    }

    pub async fn list_recent(&self, limit: usize) -> Result<Vec<Job>> {
        self.store.list_recent(limit).await
    }

    /// Run a job on its own task.
    pub fn spawn(self: &Arc<Self>, id: JobId) -> JoinHandle<Result<Job>> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            let result = dispatcher.run_job(id).await;
            if let Err(e) = &result {
                tracing::error!(job_id = %id, error = %e, "Job task stopped");
            }
            result
        })
    }

    /// Re-spawn every job left in a non-terminal state, except those another
    /// instance still holds.
    pub async fn resume_all(self: &Arc<Self>) -> Result<Vec<JoinHandle<Result<Job>>>> {
        let now = Utc::now();
        let lease = self.settings.lease();
        let mut jobs = self.store.list_by_status(&JobStatus::ACTIVE).await?;
        jobs.retain(|job| match job.live_owner(&self.instance, lease, now) {
            Some(owner) => {
                tracing::debug!(job_id = %job.id, owner, "Leaving job to its owner");
                false
            }
            None => true,
        });
        if !jobs.is_empty() {
            tracing::info!(count = jobs.len(), "Resuming unfinished jobs");
        }
        Ok(jobs.into_iter().map(|job| self.spawn(job.id)).collect())
    }

    /// Request cancellation. Returns false if the job had already finished.
    pub async fn cancel(&self, id: &JobId) -> Result<bool> {
        for _ in 0..3 {
            if let Some(token) = self.running_token(id) {
                tracing::info!(job_id = %id, "Cancelling running job");
                token.cancel();
                return Ok(true);
            }

            let mut job = self.get(id).await?;
            if job.status.is_terminal() {
                return Ok(false);
            }
            job.transition(JobStatus::Cancelled)?;
            match self.store.update(&mut job).await {
                Ok(()) => {
                    let stopped = self.coordinator.abandon(job.id, &job.fetch_plan).await;
                    if stopped > 0 {
                        tracing::info!(job_id = %id, transfers = stopped, "Stopped recorded transfers");
                    }
                    self.finish_cancelled_cleanup(&job).await;
                    return Ok(true);
                }
                // The job started running in between; go through its token.
                Err(Error::Store(StoreError::Conflict { .. })) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(StoreError::Conflict {
            id: id.to_string(),
            expected: 0,
        }
        .into())
    }

    /// Drive a job until it reaches a terminal state.
    ///
    /// Returns `Ok` with the final record once the job is Done, Failed or
    /// Cancelled. Store failures stop the run with the job left in its last
    /// persisted state.
    pub async fn run_job(&self, id: JobId) -> Result<Job> {
        let Some(cancel) = self.register(id) else {
            tracing::debug!(job_id = %id, "Job is already running");
            return self.get(&id).await;
        };
        let result = self.drive(id, &cancel).await;
        self.unregister(&id);
        result
    }

    async fn drive(&self, id: JobId, cancel: &CancellationToken) -> Result<Job> {
        let mut job = self.get(&id).await?;
        if job.status.is_terminal() {
            return Ok(job);
        }

        // Claim; a conflict means another instance got there first.
        if let Some(owner) = job.live_owner(&self.instance, self.settings.lease(), Utc::now()) {
            tracing::info!(job_id = %id, owner, "Job is held by another instance");
            return Err(StoreError::Claimed {
                id: id.to_string(),
                owner: owner.to_string(),
            }
            .into());
        }
        job.owner = Some(self.instance.clone());
        if let Err(e) = self.persist(&mut job).await {
            tracing::info!(job_id = %id, error = %e, "Could not claim job");
            return Err(e);
        }

        loop {
            if cancel.is_cancelled() {
                return self.finish_cancelled(job).await;
            }

            let step = match job.status {
                JobStatus::Pending => self.advance(&mut job, JobStatus::Resolving).await,
                JobStatus::Resolving => self.resolve_stage(&mut job, cancel).await,
                JobStatus::Fetching => self.fetch_stage(&mut job, cancel).await,
                JobStatus::Assembling => self.assemble_stage(&mut job).await,
                JobStatus::Uploading => self.upload_stage(&mut job, cancel).await,
                JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled => return Ok(job),
            };

            let recovered = match step {
                Ok(()) => Ok(()),
                Err(e @ Error::Store(_)) => Err(e),
                Err(Error::Cancelled) => Err(Error::Cancelled),
                Err(e) => self.recover(&mut job, e, cancel).await,
            };
            match recovered {
                Ok(()) => {}
                Err(Error::Cancelled) => return self.finish_cancelled(job).await,
                Err(e @ Error::Store(StoreError::Conflict { .. })) => {
                    return self.after_conflict(id, e).await;
                }
                Err(e) => {
                    tracing::error!(job_id = %id, status = %job.status, error = %e, "Job run aborted");
                    return Err(e);
                }
            }
        }
    }

    async fn resolve_stage(&self, job: &mut Job, cancel: &CancellationToken) -> Result<()> {
        let resolved = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            resolved = self.resolver.resolve(&job.source_reference) => resolved?,
        };

        tracing::debug!(job_id = %job.id, units = resolved.units.len(), "Source resolved");
        job.set_plan(resolved.units)?;
        if job.title.is_none() {
            job.title = resolved.title;
        }
        self.advance(job, JobStatus::Fetching).await
    }

    async fn fetch_stage(&self, job: &mut Job, cancel: &CancellationToken) -> Result<()> {
        let units_dir = units_dir(&self.settings.work_dir, &job.id);
        let plan = job.fetch_plan.clone();
        let fetch_cancel = cancel.child_token();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let run = self
            .coordinator
            .run_plan(job.id, &plan, &units_dir, &fetch_cancel, tx);
        tokio::pin!(run);

        let flush_every = self.settings.progress_flush;
        // Stalled transfers send no updates; the claim still needs writes.
        let mut heartbeat = tokio::time::interval(flush_every);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_flush = Instant::now();
        let mut store_error = None;
        let result = loop {
            let flush = tokio::select! {
                result = &mut run => break result,
                Some(update) = rx.recv() => {
                    self.apply_update(job, update) || last_flush.elapsed() >= flush_every
                }
                _ = heartbeat.tick() => last_flush.elapsed() >= flush_every,
            };
            if flush && store_error.is_none() {
                if let Err(e) = self.persist(job).await {
                    // Stop the transfers; the run is abandoned.
                    fetch_cancel.cancel();
                    store_error = Some(e);
                }
                last_flush = Instant::now();
            }
        };
        while let Ok(update) = rx.try_recv() {
            self.apply_update(job, update);
        }

        if let Some(e) = store_error {
            return Err(e);
        }
        result?;

        let ext = artifact_extension(&job.fetch_plan);
        let file_name = artifact_file_name(job.title.as_deref(), &job.id, &ext)?;
        job.artifact_path = Some(job_dir(&self.settings.work_dir, &job.id).join(file_name));
        self.advance(job, JobStatus::Assembling).await
    }

    /// Apply a unit update; true when it changed state worth persisting now.
    fn apply_update(&self, job: &mut Job, update: UnitUpdate) -> bool {
        let changed = match update {
            UnitUpdate::Started { index, task_id } => self.with_unit(job, index, |unit| {
                unit.daemon_task_id = Some(task_id.0);
                unit.state = UnitState::Active;
            }),
            UnitUpdate::Progress {
                index,
                bytes_done,
                bytes_total,
            } => {
                self.with_unit(job, index, |unit| unit.record_progress(bytes_done, bytes_total));
                false
            }
            UnitUpdate::Completed { index, bytes } => self.with_unit(job, index, |unit| {
                unit.state = UnitState::Complete;
                unit.bytes_total = bytes;
                unit.bytes_done = bytes;
            }),
            UnitUpdate::Requeued { index } => self.with_unit(job, index, |unit| unit.requeue()),
            UnitUpdate::Failed { index, .. } => self.with_unit(job, index, |unit| {
                unit.state = UnitState::Failed;
            }),
        };

        let (bytes_done, bytes_total) = job.bytes_progress();
        self.emit(JobEvent::FetchProgress {
            id: job.id,
            bytes_done,
            bytes_total,
            units_complete: job.units_complete(),
            units_total: job.fetch_plan.len(),
        });
        changed
    }

    fn with_unit(&self, job: &mut Job, index: u32, f: impl FnOnce(&mut crate::job::FetchUnit)) -> bool {
        match job.fetch_plan.get_mut(index as usize) {
            Some(unit) => {
                f(unit);
                true
            }
            None => {
                tracing::warn!(job_id = %job.id, unit = index, "Update for unknown unit");
                false
            }
        }
    }

    async fn assemble_stage(&self, job: &mut Job) -> Result<()> {
        let artifact = job
            .artifact_path
            .clone()
            .ok_or_else(|| Error::Assembly("no artifact path recorded".into()))?;
        let units_dir = units_dir(&self.settings.work_dir, &job.id);

        let size = assemble(&job.fetch_plan, &units_dir, &artifact).await?;
        tracing::info!(job_id = %job.id, artifact = %artifact.display(), bytes = size, "Artifact assembled");
        if let Err(e) = remove_dir_if_exists(&units_dir).await {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to remove unit files");
        }
        self.advance(job, JobStatus::Uploading).await
    }

    async fn upload_stage(&self, job: &mut Job, cancel: &CancellationToken) -> Result<()> {
        let artifact = job
            .artifact_path
            .clone()
            .ok_or_else(|| Error::Assembly("no artifact path recorded".into()))?;
        if let Some(shelf) = self.link_shelf(job, &artifact).await? {
            return self.publish_stage(job, &artifact, shelf).await;
        }
        let chat_id = self.upload_chat(job)?;
        let file = SendFile::for_path(&artifact, chat_id, job.title.clone());
        let checkpoint = job.upload.clone();

        let handle = {
            let mut sink = StoreSink {
                dispatcher: self,
                job: &mut *job,
            };
            self.relay
                .upload(&artifact, &file, checkpoint, &mut sink, cancel)
                .await?
        };

        job.cleanup_after = None;
        self.advance(job, JobStatus::Done).await?;
        if !self.settings.keep_uploaded {
            self.remove_work_dir(&job.id).await;
        }
        self.emit(JobEvent::Finished {
            id: job.id,
            chat_id: job.chat_id,
            title: job.title.clone(),
            outcome: Outcome::Done(handle),
        });
        Ok(())
    }

    /// The shelf to publish on when the job gets a link instead of an
    /// upload: link jobs, and files the transport cannot take.
    async fn link_shelf(&self, job: &Job, artifact: &Path) -> Result<Option<&FileShelf>> {
        let Some(shelf) = &self.shelf else {
            return Ok(None);
        };
        if job.delivery == DeliveryMode::Link || shelf.holds(&job.id, artifact).await {
            return Ok(Some(shelf));
        }
        let size = tokio::fs::metadata(artifact).await?.len();
        let limit = self.relay.max_file_size();
        if size > limit {
            tracing::info!(job_id = %job.id, bytes = size, limit, "Artifact exceeds the upload limit, publishing a link");
            return Ok(Some(shelf));
        }
        Ok(None)
    }

    async fn publish_stage(&self, job: &mut Job, artifact: &Path, shelf: &FileShelf) -> Result<()> {
        let published = shelf.publish(&job.id, artifact, Utc::now()).await?;
        job.artifact_path = Some(published.path.clone());
        job.published = Some(published.clone());
        job.upload = None;
        job.cleanup_after = None;
        self.advance(job, JobStatus::Done).await?;
        self.remove_work_dir(&job.id).await;
        self.emit(JobEvent::Finished {
            id: job.id,
            chat_id: job.chat_id,
            title: job.title.clone(),
            outcome: Outcome::Published {
                url: published.url,
                expires_at: published.expires_at,
            },
        });
        Ok(())
    }

    /// Chat the artifact is uploaded to: the storage chat when configured,
    /// otherwise the requester.
    fn upload_chat(&self, job: &Job) -> Result<i64> {
        self.settings
            .storage_chat_id
            .or(job.chat_id)
            .or(self.settings.default_chat_id)
            .ok_or_else(|| Error::MissingConfig("a chat to upload to (bot.default_chat_id)".into()))
    }

    /// Turn a stage failure into a retry or a terminal failure.
    async fn recover(&self, job: &mut Job, err: Error, cancel: &CancellationToken) -> Result<()> {
        let retryable = matches!(job.status, JobStatus::Resolving | JobStatus::Fetching);
        if !retryable {
            return self.fail(job, &err).await;
        }

        job.attempt_count += 1;
        if job.attempt_count >= self.settings.max_attempts {
            return self.fail(job, &err).await;
        }

        for unit in job.fetch_plan.iter_mut() {
            if unit.state != UnitState::Complete {
                unit.requeue();
            }
        }
        let delay = retry_delay(&self.settings.retry, job.attempt_count);
        tracing::warn!(
            job_id = %job.id,
            stage = %job.status,
            attempt = job.attempt_count,
            max_attempts = self.settings.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Stage failed, retrying"
        );
        self.advance(job, JobStatus::Resolving).await?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    async fn fail(&self, job: &mut Job, err: &Error) -> Result<()> {
        tracing::error!(job_id = %job.id, stage = %job.status, error = %err, "Job failed");
        job.fail(err)?;
        job.cleanup_after =
            Some(Utc::now() + chrono::Duration::seconds(self.settings.retain_failed_secs as i64));
        self.persist(job).await?;

        // A cached plan may be what broke the job; the next request resolves afresh.
        if let Err(e) = self.resolver.invalidate(&job.source_reference).await {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to drop cached plan");
        }

        self.emit(JobEvent::StatusChanged {
            id: job.id,
            status: JobStatus::Failed,
        });
        self.emit(JobEvent::Finished {
            id: job.id,
            chat_id: job.chat_id,
            title: job.title.clone(),
            outcome: Outcome::Failed(err.failure_kind().user_message().to_string()),
        });
        Ok(())
    }

    async fn finish_cancelled(&self, mut job: Job) -> Result<Job> {
        if job.status.is_terminal() {
            return Ok(job);
        }
        job.transition(JobStatus::Cancelled)?;
        self.persist(&mut job).await?;
        tracing::info!(job_id = %job.id, "Job cancelled");
        self.finish_cancelled_cleanup(&job).await;
        Ok(job)
    }

    /// A write lost its compare-and-set. If the job was cancelled from
    /// outside, clean up after it; otherwise someone else owns it now.
    async fn after_conflict(&self, id: JobId, err: Error) -> Result<Job> {
        let stored = self.get(&id).await?;
        if stored.status == JobStatus::Cancelled {
            tracing::info!(job_id = %id, "Job was cancelled externally");
            self.finish_cancelled_cleanup(&stored).await;
            return Ok(stored);
        }
        tracing::error!(job_id = %id, owner = ?stored.owner, error = %err, "Job run aborted");
        Err(err)
    }

    async fn finish_cancelled_cleanup(&self, job: &Job) {
        self.remove_work_dir(&job.id).await;
        self.emit(JobEvent::StatusChanged {
            id: job.id,
            status: JobStatus::Cancelled,
        });
        self.emit(JobEvent::Finished {
            id: job.id,
            chat_id: job.chat_id,
            title: job.title.clone(),
            outcome: Outcome::Cancelled,
        });
    }

    /// Transition, persist, announce.
    async fn advance(&self, job: &mut Job, next: JobStatus) -> Result<()> {
        job.transition(next)?;
        self.persist(job).await?;
        tracing::info!(job_id = %job.id, status = %next, "Job advanced");
        self.emit(JobEvent::StatusChanged { id: job.id, status: next });
        Ok(())
    }

    /// Compare-and-set write of `job`, retrying transient backend failures.
    async fn persist(&self, job: &mut Job) -> Result<()> {
        job.touch();
        let store = &self.store;
        let snapshot: &Job = job;
        let version = with_retry(&self.settings.retry, "persist job", || {
            let mut attempt = snapshot.clone();
            async move {
                store.update(&mut attempt).await?;
                Ok::<u64, Error>(attempt.version)
            }
        })
        .await?;
        job.version = version;
        Ok(())
    }

    async fn remove_work_dir(&self, id: &JobId) {
        let dir = job_dir(&self.settings.work_dir, id);
        if let Err(e) = remove_dir_if_exists(&dir).await {
            tracing::warn!(job_id = %id, dir = %dir.display(), error = %e, "Failed to remove work directory");
        }
    }

    fn work_dir(&self) -> &Path {
        &self.settings.work_dir
    }

    fn emit(&self, event: JobEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn register(&self, id: JobId) -> Option<CancellationToken> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.contains_key(&id) {
            return None;
        }
        let token = CancellationToken::new();
        running.insert(id, token.clone());
        Some(token)
    }

    fn unregister(&self, id: &JobId) {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }

    fn running_token(&self, id: &JobId) -> Option<CancellationToken> {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    /// Jobs currently driven by this instance.
    pub fn running_count(&self) -> usize {
        self.running.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Persists upload checkpoints onto the job record.
struct StoreSink<'a> {
    dispatcher: &'a PipelineDispatcher,
    job: &'a mut Job,
}

#[async_trait]
impl<'a> CheckpointSink for StoreSink<'a> {
    async fn record(&mut self, checkpoint: &UploadCheckpoint) -> Result<()> {
        self.job.upload = Some(checkpoint.clone());
        self.dispatcher.persist(self.job).await?;
        self.dispatcher.emit(JobEvent::UploadProgress {
            id: self.job.id,
            parts_acked: checkpoint.parts_acked,
            total_parts: checkpoint.total_parts,
        });
        Ok(())
    }
}
