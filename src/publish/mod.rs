//! Download links for finished artifacts.
//!
//! Published files live under `<root>/<job id>/<file name>` and are served by
//! a static web server mapping `<root>` to `base_url`. The relay only places
//! and removes files; serving them is left to that server.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::config::FileServerConfig;
use crate::error::{Error, Result};
use crate::fs::{ensure_dir, remove_dir_if_exists};
use crate::job::{JobId, PublishedFile};

/// Directory tree shared with the file server.
#[derive(Debug, Clone)]
pub struct FileShelf {
    root: PathBuf,
    base_url: String,
    retain: chrono::Duration,
}

impl FileShelf {
    pub fn new(root: PathBuf, base_url: &str, retain: std::time::Duration) -> Self {
        Self {
            root,
            base_url: base_url.trim_end_matches('/').to_string(),
            retain: chrono::Duration::from_std(retain).unwrap_or(chrono::Duration::MAX),
        }
    }

    /// The shelf for `config`, if a root is configured.
    pub fn from_config(config: &FileServerConfig) -> Option<Self> {
        let root = config.root.clone()?;
        Some(Self::new(root, &config.base_url, config.retain()))
    }

    fn dir_name(id: &JobId) -> String {
        id.to_string().replace('-', "")
    }

    fn target(&self, id: &JobId, artifact: &Path) -> Option<PathBuf> {
        let name = artifact.file_name()?;
        Some(self.root.join(Self::dir_name(id)).join(name))
    }

    /// Whether `artifact` was already moved onto the shelf for job `id`.
    pub async fn holds(&self, id: &JobId, artifact: &Path) -> bool {
        let Some(target) = self.target(id, artifact) else {
            return false;
        };
        let source_gone = !tokio::fs::try_exists(artifact).await.unwrap_or(true);
        source_gone && tokio::fs::try_exists(&target).await.unwrap_or(false)
    }

    /// Move `artifact` onto the shelf and return where it can be fetched.
    pub async fn publish(&self, id: &JobId, artifact: &Path, now: DateTime<Utc>) -> Result<PublishedFile> {
        let name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::Assembly(format!("{} has no file name", artifact.display())))?;
        let dir_name = Self::dir_name(id);
        let dir = self.root.join(&dir_name);
        ensure_dir(&dir).await?;

        let target = dir.join(&name);
        // A run interrupted after the move finds the file already in place.
        if !self.holds(id, artifact).await {
            move_file(artifact, &target).await?;
        }

        let published = PublishedFile {
            url: format!("{}/{}/{}", self.base_url, dir_name, urlencoding::encode(&name)),
            path: target,
            expires_at: now.checked_add_signed(self.retain).unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        tracing::info!(job_id = %id, url = %published.url, "Artifact published");
        Ok(published)
    }

    /// Delete a published file together with its job directory.
    pub async fn remove(&self, published: &PublishedFile) -> Result<()> {
        match published.path.parent() {
            Some(dir) if dir.starts_with(&self.root) && dir != self.root => remove_dir_if_exists(dir).await,
            _ => match tokio::fs::remove_file(&published.path).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            },
        }
    }
}

/// Rename, or copy and delete when the shelf is on another filesystem.
async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    if let Err(e) = tokio::fs::copy(from, to).await {
        let _ = tokio::fs::remove_file(to).await;
        return Err(e.into());
    }
    tokio::fs::remove_file(from).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn shelf(dir: &TempDir) -> FileShelf {
        FileShelf::new(
            dir.path().join("shelf"),
            "https://files.example/dl/",
            std::time::Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn test_publish_moves_artifact_and_builds_url() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("My Clip #1.mp4");
        tokio::fs::write(&artifact, b"video").await.unwrap();
        let id = JobId::new();
        let now = Utc::now();

        let published = shelf(&dir).publish(&id, &artifact, now).await.unwrap();

        let dir_name = id.to_string().replace('-', "");
        assert_eq!(
            published.url,
            format!("https://files.example/dl/{}/My%20Clip%20%231.mp4", dir_name)
        );
        assert_eq!(published.path, dir.path().join("shelf").join(&dir_name).join("My Clip #1.mp4"));
        assert_eq!(published.expires_at, now + chrono::Duration::seconds(3600));
        assert!(!artifact.exists());
        assert_eq!(std::fs::read(&published.path).unwrap(), b"video");
    }

    #[tokio::test]
    async fn test_remove_deletes_job_directory() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("a.mp4");
        tokio::fs::write(&artifact, b"x").await.unwrap();
        let shelf = shelf(&dir);
        let published = shelf.publish(&JobId::new(), &artifact, Utc::now()).await.unwrap();

        shelf.remove(&published).await.unwrap();
        assert!(!published.path.parent().unwrap().exists());
        assert!(dir.path().join("shelf").exists());
        // Already gone.
        shelf.remove(&published).await.unwrap();
    }

    #[tokio::test]
    async fn test_republish_after_move_reuses_file() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("a.mp4");
        tokio::fs::write(&artifact, b"x").await.unwrap();
        let shelf = shelf(&dir);
        let id = JobId::new();

        let first = shelf.publish(&id, &artifact, Utc::now()).await.unwrap();
        assert!(shelf.holds(&id, &artifact).await);
        let second = shelf.publish(&id, &artifact, Utc::now()).await.unwrap();

        assert_eq!(first.path, second.path);
        assert_eq!(std::fs::read(&second.path).unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_missing_artifact_fails() {
        let dir = TempDir::new().unwrap();
        let err = shelf(&dir)
            .publish(&JobId::new(), &dir.path().join("gone.mp4"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_disabled_without_root() {
        assert!(FileShelf::from_config(&FileServerConfig::default()).is_none());
    }
}
