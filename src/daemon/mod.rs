//! Download daemon interface.
//!
//! This module provides:
//! - The `DownloadDaemon` trait the coordinator drives transfers through
//! - An aria2 JSON-RPC implementation
//! - WebSocket notifications and the per-task status stream
//! - Mapping of local paths onto the daemon's filesystem

pub mod aria2;
pub mod notify;
pub mod watch;

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use aria2::Aria2Client;
pub use notify::{DaemonEvent, NotificationKind};
pub use watch::watch;

/// Daemon-assigned transfer identifier (an aria2 GID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        TaskId(s.to_string())
    }
}

/// State of a transfer as reported by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Waiting,
    Active,
    Paused,
    Complete,
    Error,
    Removed,
    /// The daemon no longer knows the task (restarted, or result purged).
    Missing,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Complete | TaskState::Error | TaskState::Removed | TaskState::Missing
        )
    }

    /// Parse aria2's `status` field.
    pub fn from_aria2(status: &str) -> Option<Self> {
        match status {
            "waiting" => Some(TaskState::Waiting),
            "active" => Some(TaskState::Active),
            "paused" => Some(TaskState::Paused),
            "complete" => Some(TaskState::Complete),
            "error" => Some(TaskState::Error),
            "removed" => Some(TaskState::Removed),
            _ => None,
        }
    }
}

/// Snapshot of one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatus {
    pub state: TaskState,
    pub bytes_done: u64,
    pub bytes_total: u64,
    /// Daemon-reported failure, set when `state` is `Error`.
    pub error: Option<String>,
}

impl TaskStatus {
    pub fn missing() -> Self {
        Self {
            state: TaskState::Missing,
            bytes_done: 0,
            bytes_total: 0,
            error: None,
        }
    }
}

/// A transfer to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub locator: String,
    /// Target directory, already mapped to the daemon's view.
    pub dir: PathBuf,
    pub file_name: String,
}

/// Operations the coordinator needs from a download daemon.
#[async_trait]
pub trait DownloadDaemon: Send + Sync {
    async fn create_transfer(&self, request: &TransferRequest) -> Result<TaskId>;

    /// Current status; a task the daemon does not know is `TaskState::Missing`.
    async fn status(&self, task: &TaskId) -> Result<TaskStatus>;

    /// Stop a transfer. Unknown tasks are not an error.
    async fn cancel(&self, task: &TaskId) -> Result<()>;

    /// Drop the daemon's record of a finished transfer.
    async fn purge(&self, task: &TaskId) -> Result<()>;
}

/// Wraps a daemon so every call fails with `Error::Daemon` after `timeout`.
pub struct TimeoutDaemon {
    inner: Arc<dyn DownloadDaemon>,
    timeout: Duration,
}

impl TimeoutDaemon {
    pub fn new(inner: Arc<dyn DownloadDaemon>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(&self, what: &str, fut: impl Future<Output = Result<T>> + Send) -> Result<T> {
        tokio::time::timeout(self.timeout, fut).await.map_err(|_| {
            Error::Daemon(format!("{} timed out after {:?}", what, self.timeout))
        })?
    }
}

#[async_trait]
impl DownloadDaemon for TimeoutDaemon {
    async fn create_transfer(&self, request: &TransferRequest) -> Result<TaskId> {
        self.bounded("create transfer", self.inner.create_transfer(request))
            .await
    }

    async fn status(&self, task: &TaskId) -> Result<TaskStatus> {
        self.bounded("status", self.inner.status(task)).await
    }

    async fn cancel(&self, task: &TaskId) -> Result<()> {
        self.bounded("cancel", self.inner.cancel(task)).await
    }

    async fn purge(&self, task: &TaskId) -> Result<()> {
        self.bounded("purge", self.inner.purge(task)).await
    }
}

/// Maps local work paths onto the directory the daemon sees.
#[derive(Debug, Clone)]
pub struct PathMap {
    local_root: PathBuf,
    daemon_root: Option<PathBuf>,
}

impl PathMap {
    pub fn new(local_root: impl Into<PathBuf>, daemon_root: Option<PathBuf>) -> Self {
        Self {
            local_root: local_root.into(),
            daemon_root,
        }
    }

    /// `path` as seen by the daemon. Paths outside the local root are passed through.
    pub fn to_daemon(&self, path: &Path) -> PathBuf {
        match (&self.daemon_root, path.strip_prefix(&self.local_root)) {
            (Some(root), Ok(relative)) => root.join(relative),
            _ => path.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_map() {
        let map = PathMap::new("/data/work", Some(PathBuf::from("/downloads")));
        assert_eq!(
            map.to_daemon(Path::new("/data/work/abc/units")),
            PathBuf::from("/downloads/abc/units")
        );
        assert_eq!(map.to_daemon(Path::new("/tmp/x")), PathBuf::from("/tmp/x"));

        let identity = PathMap::new("/data/work", None);
        assert_eq!(
            identity.to_daemon(Path::new("/data/work/abc")),
            PathBuf::from("/data/work/abc")
        );
    }

    struct SlowDaemon;

    #[async_trait]
    impl DownloadDaemon for SlowDaemon {
        async fn create_transfer(&self, _request: &TransferRequest) -> Result<TaskId> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(TaskId::from("never"))
        }

        async fn status(&self, _task: &TaskId) -> Result<TaskStatus> {
            Ok(TaskStatus::missing())
        }

        async fn cancel(&self, _task: &TaskId) -> Result<()> {
            Ok(())
        }

        async fn purge(&self, _task: &TaskId) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_timeout_is_a_daemon_error() {
        let daemon = TimeoutDaemon::new(Arc::new(SlowDaemon), Duration::from_millis(20));
        let request = TransferRequest {
            locator: "https://x/y".into(),
            dir: PathBuf::from("/tmp"),
            file_name: "y".into(),
        };
        let err = daemon.create_transfer(&request).await.unwrap_err();
        assert!(matches!(err, Error::Daemon(_)));
        assert_eq!(
            daemon.status(&TaskId::from("a")).await.unwrap().state,
            TaskState::Missing
        );
    }

    #[test]
    fn test_task_state() {
        assert_eq!(TaskState::from_aria2("complete"), Some(TaskState::Complete));
        assert_eq!(TaskState::from_aria2("bogus"), None);
        assert!(TaskState::Missing.is_terminal());
        assert!(!TaskState::Paused.is_terminal());
    }
}
