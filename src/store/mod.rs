//! Durable job storage.
//!
//! The store is the source of truth across restarts. Every write is a
//! compare-and-set on the job's `version`, so two dispatcher instances can
//! never both advance the same job.

pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::{Result, StoreError};
use crate::job::{Job, JobId, JobStatus};

pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;

/// Persistence of job documents keyed by id.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job. Fails with `StoreError::Duplicate` if the id exists.
    async fn insert(&self, job: &Job) -> Result<()>;

    async fn get(&self, id: &JobId) -> Result<Option<Job>>;

    /// Write `job` if the stored version still equals `job.version`, then
    /// bump `job.version`. A stale version yields `StoreError::Conflict`.
    async fn update(&self, job: &mut Job) -> Result<()>;

    async fn list_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>>;

    /// Most recently updated jobs first.
    async fn list_recent(&self, limit: usize) -> Result<Vec<Job>>;
}

/// Open the store selected by the configuration.
pub async fn open(config: &StoreConfig) -> Result<Arc<dyn JobStore>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryJobStore::new())),
        StoreBackend::Sqlite => {
            let path = config.path();
            tracing::info!(path = %path.display(), "Opening job store");
            Ok(Arc::new(SqliteJobStore::open(&path).await?))
        }
    }
}

/// Reject documents that break the record invariants.
pub(crate) fn ensure_valid(job: &Job) -> Result<()> {
    job.check_invariants().map_err(|reason| {
        StoreError::Corrupt {
            id: job.id.to_string(),
            reason,
        }
        .into()
    })
}
