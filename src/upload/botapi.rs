//! Upload transport over the Telegram Bot API.
//!
//! `sendDocument` takes a whole file in one multipart request, so parts are
//! staged into a spool file at their final offsets and the file is sent once
//! every part is in place. A spool that survives a restart is picked up again
//! through the job's upload checkpoint.
//!
//! The public Bot API accepts documents up to 50 MB. A self-hosted
//! `telegram-bot-api --local` server raises that to 2000 MB; point
//! `bot.api_url` at it and raise `upload.max_file_size` to match.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::InputFile;
use teloxide::{ApiError, RequestError};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use crate::config::{BotConfig, UploadConfig};
use crate::error::{Error, Result, UploadFailure};
use crate::job::MessageHandle;
use crate::upload::{SendFile, UploadTransport};

pub struct BotApiTransport {
    bot: Bot,
    spool_dir: PathBuf,
    chunk_size: u64,
    max_file_size: u64,
}

impl BotApiTransport {
    pub fn new(bot: &BotConfig, upload: &UploadConfig, spool_dir: PathBuf) -> Result<Self> {
        Ok(Self {
            bot: crate::bot::client(bot, upload.send_timeout())?,
            spool_dir,
            chunk_size: upload.chunk_size.max(1) as u64,
            max_file_size: upload.max_file_size,
        })
    }

    fn spool_path(&self, file_id: i64) -> PathBuf {
        self.spool_dir.join(format!("{}.part", file_id))
    }
}

/// Map a Bot API failure to an upload failure kind.
fn classify(err: &RequestError) -> UploadFailure {
    match err {
        RequestError::Network(_)
        | RequestError::RetryAfter(_)
        | RequestError::Io(_)
        | RequestError::InvalidJson { .. } => UploadFailure::Transient,
        RequestError::Api(ApiError::RequestEntityTooLarge) => UploadFailure::Quota,
        RequestError::Api(_) | RequestError::MigrateToChatId(_) => UploadFailure::Permission,
    }
}

async fn write_at(path: &Path, offset: u64, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).write(true).truncate(false).open(path).await?;
    // Drops anything a previous attempt wrote past this part.
    file.set_len(offset).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    file.write_all(bytes).await?;
    file.sync_data().await
}

#[async_trait]
impl UploadTransport for BotApiTransport {
    async fn save_part(&self, file_id: i64, part: u32, _total_parts: u32, bytes: Vec<u8>) -> Result<()> {
        tokio::fs::create_dir_all(&self.spool_dir).await?;
        let offset = part as u64 * self.chunk_size;
        write_at(&self.spool_path(file_id), offset, &bytes).await?;
        Ok(())
    }

    async fn send_file(&self, file_id: i64, total_parts: u32, file: &SendFile) -> Result<MessageHandle> {
        let spool = self.spool_path(file_id);
        let document = InputFile::file(spool.clone()).file_name(file.file_name.clone());
        let mut request = self.bot.send_document(ChatId(file.chat_id), document);
        if let Some(caption) = &file.caption {
            request = request.caption(caption.clone());
        }

        let message = request.await.map_err(|e| {
            let kind = classify(&e);
            tracing::debug!(file_id, total_parts, kind = ?kind, "sendDocument failed: {}", e);
            Error::upload(kind, format!("sendDocument: {}", e))
        })?;

        if let Err(e) = tokio::fs::remove_file(&spool).await {
            tracing::warn!(path = %spool.display(), error = %e, "Failed to remove upload spool");
        }
        Ok(MessageHandle {
            chat_id: message.chat.id.0,
            message_id: message.id.0 as i64,
        })
    }

    async fn discard(&self, file_id: i64) -> Result<()> {
        match tokio::fs::remove_file(self.spool_path(file_id)).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn max_file_size(&self) -> u64 {
        self.max_file_size
    }
}
