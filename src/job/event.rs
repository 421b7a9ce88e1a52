//! Events published while jobs advance.

use chrono::{DateTime, Utc};

use crate::job::model::{JobId, JobStatus};

/// Handle of the message a finished upload produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHandle {
    pub chat_id: i64,
    pub message_id: i64,
}

/// Terminal result of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done(MessageHandle),
    /// Published on the file server instead of uploaded.
    Published {
        url: String,
        expires_at: DateTime<Utc>,
    },
    /// Carries the human-readable reason, never the raw error.
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone)]
pub enum JobEvent {
    StatusChanged {
        id: JobId,
        status: JobStatus,
    },
    FetchProgress {
        id: JobId,
        bytes_done: u64,
        bytes_total: u64,
        units_complete: usize,
        units_total: usize,
    },
    UploadProgress {
        id: JobId,
        parts_acked: u32,
        total_parts: u32,
    },
    Finished {
        id: JobId,
        chat_id: Option<i64>,
        title: Option<String>,
        outcome: Outcome,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::StatusChanged { id, .. }
            | JobEvent::FetchProgress { id, .. }
            | JobEvent::UploadProgress { id, .. }
            | JobEvent::Finished { id, .. } => *id,
        }
    }
}
