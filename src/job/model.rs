//! Job and fetch unit records.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Opaque job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(JobId)
            .map_err(|_| Error::JobNotFound(s.to_string()))
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Resolving,
    Fetching,
    Assembling,
    Uploading,
    Done,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ACTIVE: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Resolving,
        JobStatus::Fetching,
        JobStatus::Assembling,
        JobStatus::Uploading,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled)
    }

    /// Position along the happy path.
    fn rank(self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Resolving => 1,
            JobStatus::Fetching => 2,
            JobStatus::Assembling => 3,
            JobStatus::Uploading => 4,
            JobStatus::Done => 5,
            JobStatus::Failed | JobStatus::Cancelled => u8::MAX,
        }
    }

    /// Whether a job may move from `self` to `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            JobStatus::Failed | JobStatus::Cancelled => true,
            // Same-stage re-entry for retries.
            JobStatus::Resolving if self == JobStatus::Resolving => true,
            JobStatus::Fetching if self == JobStatus::Fetching => true,
            // Bounded fetch retries go back through resolution.
            JobStatus::Resolving if self == JobStatus::Fetching => true,
            _ => next.rank() == self.rank() + 1,
        }
    }

    /// Whether `artifact_path` must be present in this state.
    pub fn holds_artifact(self) -> bool {
        matches!(
            self,
            JobStatus::Assembling | JobStatus::Uploading | JobStatus::Done
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Pending => "pending",
            JobStatus::Resolving => "resolving",
            JobStatus::Fetching => "fetching",
            JobStatus::Assembling => "assembling",
            JobStatus::Uploading => "uploading",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// State of a single fetch unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitState {
    #[default]
    Queued,
    Active,
    Complete,
    Failed,
}

/// One downloadable piece of a job: a whole file or one HLS segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchUnit {
    pub sequence_index: u32,
    pub remote_locator: String,
    #[serde(default)]
    pub daemon_task_id: Option<String>,
    #[serde(default)]
    pub state: UnitState,
    #[serde(default)]
    pub bytes_total: u64,
    #[serde(default)]
    pub bytes_done: u64,
}

impl FetchUnit {
    pub fn new(sequence_index: u32, remote_locator: impl Into<String>) -> Self {
        Self {
            sequence_index,
            remote_locator: remote_locator.into(),
            daemon_task_id: None,
            state: UnitState::Queued,
            bytes_total: 0,
            bytes_done: 0,
        }
    }

    /// Record daemon-reported progress, never moving the counters backwards.
    pub fn record_progress(&mut self, bytes_done: u64, bytes_total: u64) {
        self.bytes_total = self.bytes_total.max(bytes_total);
        self.bytes_done = self.bytes_done.max(bytes_done);
    }

    /// Put the unit back in the queue, dropping its daemon task.
    pub fn requeue(&mut self) {
        self.daemon_task_id = None;
        self.state = UnitState::Queued;
        self.bytes_done = 0;
    }

    /// File extension of the remote resource, if the URL path has one.
    pub fn extension(&self) -> Option<String> {
        let parsed = url::Url::parse(&self.remote_locator).ok()?;
        let last = parsed.path_segments()?.last()?.to_string();
        let (_, ext) = last.rsplit_once('.')?;
        if ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

/// Coarse category of a job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnresolvableSource,
    Daemon,
    Assembly,
    Upload,
    Store,
    Internal,
}

impl FailureKind {
    /// Reason shown to the requester.
    pub fn user_message(self) -> &'static str {
        match self {
            FailureKind::UnresolvableSource => "the source could not be reached or is not supported",
            FailureKind::Daemon => "downloading the media failed",
            FailureKind::Assembly => "the downloaded parts could not be put together",
            FailureKind::Upload => "uploading to Telegram failed",
            FailureKind::Store => "the job could not be saved",
            FailureKind::Internal => "an internal error occurred",
        }
    }
}

/// Last failure of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: FailureKind,
    pub detail: String,
}

impl From<&Error> for JobError {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.failure_kind(),
            detail: err.to_string(),
        }
    }
}

/// Progress of a chunked upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadCheckpoint {
    /// Client-chosen identifier of the remote file being assembled.
    pub file_id: i64,
    pub total_parts: u32,
    pub parts_acked: u32,
    #[serde(default)]
    pub resume_attempts: u32,
}

/// How a finished artifact reaches the requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Uploaded into the chat.
    #[default]
    Telegram,
    /// Published on the file server; the chat gets a link.
    Link,
}

/// An artifact served for download instead of uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedFile {
    pub url: String,
    pub path: PathBuf,
    pub expires_at: DateTime<Utc>,
}

/// One user-initiated acquisition request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub source_reference: String,
    pub status: JobStatus,
    #[serde(default)]
    pub fetch_plan: Vec<FetchUnit>,
    #[serde(default)]
    pub attempt_count: u32,
    #[serde(default)]
    pub artifact_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub error: Option<JobError>,

    #[serde(default)]
    pub chat_id: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub upload: Option<UploadCheckpoint>,
    #[serde(default)]
    pub cleanup_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub delivery: DeliveryMode,
    #[serde(default)]
    pub published: Option<PublishedFile>,
    #[serde(default)]
    pub version: u64,
}

impl Job {
    /// Create a pending job for a user reference.
    pub fn new(source_reference: impl Into<String>, chat_id: Option<i64>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            source_reference: source_reference.into(),
            status: JobStatus::Pending,
            fetch_plan: Vec::new(),
            attempt_count: 0,
            artifact_path: None,
            created_at: now,
            updated_at: now,
            error: None,
            chat_id,
            title: None,
            upload: None,
            cleanup_after: None,
            owner: None,
            delivery: DeliveryMode::Telegram,
            published: None,
            version: 0,
        }
    }

    /// Owner other than `instance` that wrote the job within `lease`.
    ///
    /// Running jobs are written at least once per progress flush, so a
    /// record untouched for longer than the lease has no live owner.
    pub fn live_owner(&self, instance: &str, lease: chrono::Duration, now: DateTime<Utc>) -> Option<&str> {
        if self.status.is_terminal() {
            return None;
        }
        match self.owner.as_deref() {
            Some(owner) if owner != instance && now - self.updated_at < lease => Some(owner),
            _ => None,
        }
    }

    /// Move to `next`, enforcing the state machine and the artifact invariant.
    pub fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        if next == JobStatus::Fetching && self.fetch_plan.is_empty() {
            return Err(Error::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        if next.holds_artifact() && self.artifact_path.is_none() {
            return Err(Error::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        if !next.holds_artifact() {
            self.artifact_path = None;
        }
        if next != JobStatus::Failed {
            self.error = None;
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    /// Set the fetch plan. Once set, the plan's order and locators never change.
    pub fn set_plan(&mut self, units: Vec<FetchUnit>) -> Result<()> {
        if units.is_empty() {
            return Err(Error::UnresolvableSource("empty fetch plan".into()));
        }
        if self.fetch_plan.is_empty() {
            self.fetch_plan = units;
            return Ok(());
        }
        if !same_plan(&self.fetch_plan, &units) {
            return Err(Error::UnresolvableSource(
                "source resolved to a different plan than before".into(),
            ));
        }
        Ok(())
    }

    /// Record a failure and move to `Failed`.
    pub fn fail(&mut self, err: &Error) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(JobError::from(err));
        Ok(())
    }

    pub fn touch(&mut self) {
        let now = Utc::now();
        // Clocks can step backwards; updated_at must not.
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + chrono::Duration::microseconds(1)
        };
    }

    /// Units that finished downloading.
    pub fn units_complete(&self) -> usize {
        self.fetch_plan
            .iter()
            .filter(|u| u.state == UnitState::Complete)
            .count()
    }

    /// Summed progress across the plan.
    pub fn bytes_progress(&self) -> (u64, u64) {
        self.fetch_plan.iter().fold((0, 0), |(done, total), u| {
            (done + u.bytes_done, total + u.bytes_total)
        })
    }

    /// Check the record invariants; used at the store boundary.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        let needs_plan = matches!(
            self.status,
            JobStatus::Fetching | JobStatus::Assembling | JobStatus::Uploading | JobStatus::Done
        );
        if needs_plan && self.fetch_plan.is_empty() {
            return Err(format!("status {} requires a fetch plan", self.status));
        }
        if self.status.holds_artifact() != self.artifact_path.is_some() {
            return Err(format!(
                "artifact path presence does not match status {}",
                self.status
            ));
        }
        if self.error.is_some() && self.status != JobStatus::Failed {
            return Err(format!("error recorded on a {} job", self.status));
        }
        if self.published.is_some() && self.status != JobStatus::Done {
            return Err(format!("published file recorded on a {} job", self.status));
        }
        for (i, unit) in self.fetch_plan.iter().enumerate() {
            if unit.sequence_index as usize != i {
                return Err(format!("unit {} has sequence index {}", i, unit.sequence_index));
            }
        }
        Ok(())
    }
}

fn same_plan(a: &[FetchUnit], b: &[FetchUnit]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| {
            x.sequence_index == y.sequence_index && x.remote_locator == y.remote_locator
        })
}
