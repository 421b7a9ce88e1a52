//! Path and directory management.
//!
//! Layout of a job's work directory:
//!
//! ```text
//! <work_dir>/<job id>/units/unit_00000.ts
//! <work_dir>/<job id>/<title>.ts
//! ```

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::error::Result;
use crate::job::JobId;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "media-relay")
}

/// Per-user data directory, falling back to `./data`.
pub fn default_data_dir() -> PathBuf {
    project_dirs()
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("data"))
}

/// Per-user cache directory, falling back to `./cache`.
pub fn default_cache_dir() -> PathBuf {
    project_dirs()
        .map(|d| d.cache_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("cache"))
}

/// Work directory of one job.
pub fn job_dir(work_root: &Path, id: &JobId) -> PathBuf {
    work_root.join(id.to_string())
}

/// Directory the daemon writes a job's units into.
pub fn units_dir(work_root: &Path, id: &JobId) -> PathBuf {
    job_dir(work_root, id).join("units")
}

/// Ensure a directory exists, creating it if necessary.
pub async fn ensure_dir(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}

/// Remove a directory tree; a missing directory is not an error.
pub async fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_job_layout() {
        let id = JobId::new();
        let root = PathBuf::from("/srv/work");
        assert_eq!(job_dir(&root, &id), root.join(id.to_string()));
        assert_eq!(
            units_dir(&root, &id),
            root.join(id.to_string()).join("units")
        );
    }

    #[tokio::test]
    async fn test_remove_missing_dir_is_ok() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("a/b");
        ensure_dir(&target).await.unwrap();
        assert!(target.exists());
        remove_dir_if_exists(&dir.path().join("a")).await.unwrap();
        assert!(!target.exists());
        remove_dir_if_exists(&dir.path().join("a")).await.unwrap();
    }
}
