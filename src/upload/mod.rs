//! Chunked upload of artifacts to Telegram.
//!
//! Files are sent as fixed-size parts followed by a final send call that
//! turns the parts into a message. Every acknowledged part is reported to a
//! [`CheckpointSink`], so an interrupted upload resumes from the first
//! unacknowledged part instead of from zero.

pub mod botapi;

use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;

use crate::config::{RetryConfig, UploadConfig};
use crate::error::{Error, Result, UploadFailure};
use crate::job::{MessageHandle, UploadCheckpoint};
use crate::retry::retry_delay;

pub use botapi::BotApiTransport;

/// Final message to create from the uploaded parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendFile {
    pub chat_id: i64,
    pub file_name: String,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

impl SendFile {
    /// Describe `path` for `chat_id`, guessing the MIME type from its extension.
    pub fn for_path(path: &Path, chat_id: i64, caption: Option<String>) -> Self {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Self {
            chat_id,
            file_name,
            mime_type,
            caption,
        }
    }
}

/// Messaging-side upload primitives.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Accept part `part` of the file `file_id`. Parts arrive in order.
    async fn save_part(&self, file_id: i64, part: u32, total_parts: u32, bytes: Vec<u8>) -> Result<()>;

    /// Turn the accepted parts into a message.
    async fn send_file(&self, file_id: i64, total_parts: u32, file: &SendFile) -> Result<MessageHandle>;

    /// Drop whatever was kept for an upload that will not be finished.
    async fn discard(&self, _file_id: i64) -> Result<()> {
        Ok(())
    }

    /// Largest file this transport can deliver.
    fn max_file_size(&self) -> u64 {
        u64::MAX
    }
}

/// Receives upload progress worth persisting.
#[async_trait]
pub trait CheckpointSink: Send {
    async fn record(&mut self, checkpoint: &UploadCheckpoint) -> Result<()>;
}

/// Collects checkpoints in memory.
#[async_trait]
impl CheckpointSink for Vec<UploadCheckpoint> {
    async fn record(&mut self, checkpoint: &UploadCheckpoint) -> Result<()> {
        self.push(checkpoint.clone());
        Ok(())
    }
}

pub struct UploadRelay {
    transport: Arc<dyn UploadTransport>,
    chunk_size: usize,
    chunk_timeout: Duration,
    send_timeout: Duration,
    max_resume_attempts: u32,
    retry: RetryConfig,
}

impl UploadRelay {
    pub fn new(transport: Arc<dyn UploadTransport>, config: &UploadConfig, retry: RetryConfig) -> Self {
        Self {
            transport,
            chunk_size: config.chunk_size.max(1),
            chunk_timeout: config.chunk_timeout(),
            send_timeout: config.send_timeout(),
            max_resume_attempts: config.max_resume_attempts,
            retry,
        }
    }

    pub fn total_parts(&self, size: u64) -> u32 {
        size.div_ceil(self.chunk_size as u64) as u32
    }

    pub fn max_file_size(&self) -> u64 {
        self.transport.max_file_size()
    }

    /// Upload `path` and create the message described by `file`.
    ///
    /// A `checkpoint` matching the file's part count resumes where it left
    /// off; anything else starts a fresh upload. Files above the transport's
    /// size limit fail with `UploadFailure::Quota` before any part is sent.
    pub async fn upload(
        &self,
        path: &Path,
        file: &SendFile,
        checkpoint: Option<UploadCheckpoint>,
        sink: &mut dyn CheckpointSink,
        cancel: &CancellationToken,
    ) -> Result<MessageHandle> {
        let size = tokio::fs::metadata(path).await?.len();
        if size == 0 {
            return Err(Error::Assembly(format!("{} is empty", path.display())));
        }
        let limit = self.max_file_size();
        if size > limit {
            return Err(Error::upload(
                UploadFailure::Quota,
                format!("{} bytes exceeds the {} byte upload limit", size, limit),
            ));
        }
        let total_parts = self.total_parts(size);

        let mut cp = match checkpoint {
            Some(cp) if cp.total_parts == total_parts && cp.parts_acked <= total_parts => {
                tracing::info!(
                    file_id = cp.file_id,
                    parts_acked = cp.parts_acked,
                    total_parts,
                    "Resuming upload"
                );
                cp
            }
            stale => {
                if let Some(stale) = stale {
                    self.discard(stale.file_id).await;
                }
                let cp = UploadCheckpoint {
                    file_id: rand::thread_rng().gen_range(1..i64::MAX),
                    total_parts,
                    parts_acked: 0,
                    resume_attempts: 0,
                };
                sink.record(&cp).await?;
                cp
            }
        };

        let result = self.transfer(path, size, file, &mut cp, sink, cancel).await;
        // Store failures leave the job resumable; everything else ends it.
        if matches!(result, Err(Error::Cancelled) | Err(Error::Upload { .. })) {
            self.discard(cp.file_id).await;
        }
        result
    }

    async fn transfer(
        &self,
        path: &Path,
        size: u64,
        file: &SendFile,
        cp: &mut UploadCheckpoint,
        sink: &mut dyn CheckpointSink,
        cancel: &CancellationToken,
    ) -> Result<MessageHandle> {
        let total_parts = cp.total_parts;
        let mut reader = File::open(path).await?;
        reader
            .seek(SeekFrom::Start(cp.parts_acked as u64 * self.chunk_size as u64))
            .await?;

        while cp.parts_acked < total_parts {
            let part = cp.parts_acked;
            let remaining = size - part as u64 * self.chunk_size as u64;
            let len = remaining.min(self.chunk_size as u64) as usize;
            let mut chunk = vec![0u8; len];
            reader.read_exact(&mut chunk).await?;

            loop {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let sent = self
                    .bounded(
                        &format!("part {}", part),
                        self.chunk_timeout,
                        self.transport.save_part(cp.file_id, part, total_parts, chunk.clone()),
                    )
                    .await;
                match sent {
                    Ok(()) => break,
                    Err(e) => self.recover(e, cp, sink, cancel).await?,
                }
            }

            cp.parts_acked += 1;
            sink.record(cp).await?;
        }

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let sent = self
                .bounded(
                    "send",
                    self.send_timeout,
                    self.transport.send_file(cp.file_id, total_parts, file),
                )
                .await;
            match sent {
                Ok(handle) => {
                    tracing::info!(
                        file_id = cp.file_id,
                        chat_id = handle.chat_id,
                        message_id = handle.message_id,
                        bytes = size,
                        "Upload complete"
                    );
                    return Ok(handle);
                }
                Err(e) => self.recover(e, cp, sink, cancel).await?,
            }
        }
    }

    async fn discard(&self, file_id: i64) {
        if let Err(e) = self.transport.discard(file_id).await {
            tracing::warn!(file_id, error = %e, "Failed to discard staged upload");
        }
    }

    async fn bounded<T>(
        &self,
        what: &str,
        limit: Duration,
        fut: impl std::future::Future<Output = Result<T>> + Send,
    ) -> Result<T> {
        tokio::time::timeout(limit, fut).await.map_err(|_| {
            Error::upload(
                UploadFailure::Transient,
                format!("{} timed out after {:?}", what, limit),
            )
        })?
    }

    /// Count a resume after a transient failure and wait before it.
    /// Permanent failures and exhausted resumes are returned.
    async fn recover(
        &self,
        err: Error,
        cp: &mut UploadCheckpoint,
        sink: &mut dyn CheckpointSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match &err {
            Error::Upload {
                kind: UploadFailure::Transient,
                ..
            } => {}
            Error::Upload { .. } => return Err(err),
            // Connection-level failures from the transport are transient.
            Error::Http(_) | Error::Io(_) => {}
            _ => return Err(err),
        }

        if cp.resume_attempts >= self.max_resume_attempts {
            return Err(Error::upload(
                UploadFailure::Exhausted,
                format!("gave up after {} resumes: {}", cp.resume_attempts, err),
            ));
        }
        cp.resume_attempts += 1;
        sink.record(cp).await?;

        let delay = retry_delay(&self.retry, cp.resume_attempts);
        tracing::warn!(
            file_id = cp.file_id,
            parts_acked = cp.parts_acked,
            resume = cp.resume_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Upload interrupted, resuming"
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTransport;
    use tempfile::TempDir;

    const CHUNK: usize = 1024;

    fn relay(transport: Arc<FakeTransport>, max_resume_attempts: u32) -> UploadRelay {
        let config = UploadConfig {
            chunk_size: CHUNK,
            max_resume_attempts,
            ..UploadConfig::default()
        };
        let retry = RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
            jitter: false,
        };
        UploadRelay::new(transport, &config, retry)
    }

    async fn artifact(dir: &TempDir, len: usize) -> (std::path::PathBuf, Vec<u8>) {
        let bytes: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let path = dir.path().join("video.mp4");
        tokio::fs::write(&path, &bytes).await.unwrap();
        (path, bytes)
    }

    #[tokio::test]
    async fn test_upload_sends_all_parts() {
        let dir = TempDir::new().unwrap();
        let (path, bytes) = artifact(&dir, CHUNK * 3 + 100).await;
        let transport = Arc::new(FakeTransport::new());
        let relay = relay(transport.clone(), 3);
        let file = SendFile::for_path(&path, 42, Some("clip".into()));
        let mut checkpoints: Vec<UploadCheckpoint> = Vec::new();

        let handle = relay
            .upload(&path, &file, None, &mut checkpoints, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(handle.chat_id, 42);
        assert_eq!(transport.accepted_parts(), vec![0, 1, 2, 3]);
        assert_eq!(transport.reassembled(), bytes);
        assert_eq!(checkpoints.last().unwrap().parts_acked, 4);
        assert_eq!(file.mime_type, "video/mp4");

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, 4);
    }

    #[tokio::test]
    async fn test_resume_starts_after_last_acked_part() {
        let dir = TempDir::new().unwrap();
        let (path, bytes) = artifact(&dir, CHUNK * 5).await;
        let transport = Arc::new(FakeTransport::new());
        let relay = relay(transport.clone(), 3);
        let file = SendFile::for_path(&path, 1, None);
        let checkpoint = UploadCheckpoint {
            file_id: 77,
            total_parts: 5,
            parts_acked: 2,
            resume_attempts: 1,
        };
        let mut checkpoints: Vec<UploadCheckpoint> = Vec::new();

        relay
            .upload(&path, &file, Some(checkpoint), &mut checkpoints, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(transport.accepted_parts(), vec![2, 3, 4]);
        assert_eq!(transport.reassembled(), bytes[CHUNK * 2..].to_vec());
        assert_eq!(transport.sent()[0].0, 77);
    }

    #[tokio::test]
    async fn test_mismatched_checkpoint_starts_over() {
        let dir = TempDir::new().unwrap();
        let (path, _) = artifact(&dir, CHUNK * 2).await;
        let transport = Arc::new(FakeTransport::new());
        let relay = relay(transport.clone(), 3);
        let stale = UploadCheckpoint {
            file_id: 5,
            total_parts: 9,
            parts_acked: 4,
            resume_attempts: 0,
        };
        let mut checkpoints: Vec<UploadCheckpoint> = Vec::new();

        relay
            .upload(&path, &SendFile::for_path(&path, 1, None), Some(stale), &mut checkpoints, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(transport.accepted_parts(), vec![0, 1]);
        assert_ne!(checkpoints[0].file_id, 5);
        assert_eq!(transport.discarded(), vec![5]);
    }

    #[tokio::test]
    async fn test_transient_failure_resumes_same_part() {
        let dir = TempDir::new().unwrap();
        let (path, bytes) = artifact(&dir, CHUNK * 3).await;
        let transport = Arc::new(FakeTransport::new().flaky_at(1));
        let relay = relay(transport.clone(), 3);
        let mut checkpoints: Vec<UploadCheckpoint> = Vec::new();

        relay
            .upload(&path, &SendFile::for_path(&path, 1, None), None, &mut checkpoints, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(transport.accepted_parts(), vec![0, 1, 2]);
        assert_eq!(transport.reassembled(), bytes);
        assert_eq!(checkpoints.last().unwrap().resume_attempts, 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let (path, _) = artifact(&dir, CHUNK).await;
        let transport = Arc::new(FakeTransport::new().broken(UploadFailure::Quota));
        let relay = relay(transport.clone(), 3);
        let mut checkpoints: Vec<UploadCheckpoint> = Vec::new();

        let err = relay
            .upload(&path, &SendFile::for_path(&path, 1, None), None, &mut checkpoints, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Upload { kind: UploadFailure::Quota, .. }));
        assert_eq!(checkpoints.last().unwrap().resume_attempts, 0);
        assert_eq!(transport.discarded(), vec![checkpoints[0].file_id]);
    }

    #[tokio::test]
    async fn test_oversized_file_is_refused_up_front() {
        let dir = TempDir::new().unwrap();
        let (path, _) = artifact(&dir, CHUNK * 2 + 1).await;
        let transport = Arc::new(FakeTransport::new().with_max_file_size(CHUNK as u64 * 2));
        let relay = relay(transport.clone(), 3);
        let mut checkpoints: Vec<UploadCheckpoint> = Vec::new();

        let err = relay
            .upload(&path, &SendFile::for_path(&path, 1, None), None, &mut checkpoints, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Upload { kind: UploadFailure::Quota, .. }));
        assert!(checkpoints.is_empty());
        assert!(transport.accepted_parts().is_empty());
    }

    #[tokio::test]
    async fn test_resumes_are_bounded() {
        let dir = TempDir::new().unwrap();
        let (path, _) = artifact(&dir, CHUNK).await;
        let transport = Arc::new(FakeTransport::new().broken(UploadFailure::Transient));
        let relay = relay(transport.clone(), 2);
        let mut checkpoints: Vec<UploadCheckpoint> = Vec::new();

        let err = relay
            .upload(&path, &SendFile::for_path(&path, 1, None), None, &mut checkpoints, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Upload { kind: UploadFailure::Exhausted, .. }));
        assert_eq!(checkpoints.last().unwrap().resume_attempts, 2);
    }

    #[tokio::test]
    async fn test_cancelled_upload_stops() {
        let dir = TempDir::new().unwrap();
        let (path, _) = artifact(&dir, CHUNK * 2).await;
        let transport = Arc::new(FakeTransport::new());
        let relay = relay(transport.clone(), 2);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut checkpoints: Vec<UploadCheckpoint> = Vec::new();

        let err = relay
            .upload(&path, &SendFile::for_path(&path, 1, None), None, &mut checkpoints, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(transport.accepted_parts().is_empty());
    }

    #[test]
    fn test_total_parts() {
        let relay = relay(Arc::new(FakeTransport::new()), 1);
        assert_eq!(relay.total_parts(1), 1);
        assert_eq!(relay.total_parts(CHUNK as u64), 1);
        assert_eq!(relay.total_parts(CHUNK as u64 + 1), 2);
    }
}
