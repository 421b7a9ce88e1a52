//! On-disk cache of resolved plans, keyed by the MD5 of the reference.
//!
//! Entries expire `ttl` after they were written; resolved locators are often
//! signed URLs that stop working after a while.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use md5::{Digest, Md5};

use crate::error::Result;
use crate::resolve::ResolvedSource;

pub struct PlanCache {
    dir: PathBuf,
    ttl: Duration,
}

impl PlanCache {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }

    fn entry_path(&self, reference: &str) -> PathBuf {
        let hash = Md5::digest(reference.trim().as_bytes());
        self.dir.join(format!("{:x}.json", hash))
    }

    /// Cached plan for `reference`, if one was stored less than `ttl` ago.
    /// Expired entries are removed.
    pub async fn load(&self, reference: &str) -> Result<Option<ResolvedSource>> {
        let path = self.entry_path(reference);
        let written = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.modified()?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let age = SystemTime::now()
            .duration_since(written)
            .unwrap_or(Duration::ZERO);
        if age >= self.ttl {
            tracing::debug!(reference, age_secs = age.as_secs(), "Plan cache entry expired");
            self.forget(reference).await?;
            return Ok(None);
        }

        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    pub async fn store(&self, reference: &str, resolved: &ResolvedSource) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.entry_path(reference);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(resolved)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Drop the entry for `reference`, if any.
    pub async fn forget(&self, reference: &str) -> Result<()> {
        match tokio::fs::remove_file(self.entry_path(reference)).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
