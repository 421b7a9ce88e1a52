//! Job records and the events they emit.
//!
//! This module provides:
//! - The `Job` / `FetchUnit` records persisted by the job store
//! - The job state machine (`JobStatus::can_transition_to`, `Job::transition`)
//! - `JobEvent`s broadcast by the dispatcher

pub mod event;
pub mod model;

pub use event::{JobEvent, MessageHandle, Outcome};
pub use model::{
    DeliveryMode, FailureKind, FetchUnit, Job, JobError, JobId, JobStatus, PublishedFile, UnitState,
    UploadCheckpoint,
};
