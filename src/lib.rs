//! Media Relay - a Telegram bot that fetches media through aria2
//!
//! A link sent to the bot becomes a job that is resolved into a fetch plan,
//! downloaded by an aria2 daemon, assembled into one file and uploaded back
//! to Telegram in resumable chunks. Jobs are persisted after every step and
//! survive restarts.
//!
//! # Features
//!
//! - Direct files, HLS playlists and numeric content ids
//! - Bounded transfer concurrency, globally and per job
//! - Resumable chunked uploads through the Bot API, or download links for large files
//! - Durable job store (SQLite) with compare-and-set writes
//! - Retry with exponential backoff and jitter
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use media_relay::{store, Config, PipelineDispatcher};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(Path::new("config.toml"))?;
//!     let store = store::open(&config.store).await?;
//!     let shutdown = CancellationToken::new();
//!     let dispatcher = Arc::new(PipelineDispatcher::from_config(&config, store, &shutdown)?);
//!
//!     let job = dispatcher.submit("https://example.com/video.m3u8", Some(42)).await?;
//!     let finished = dispatcher.run_job(job.id).await?;
//!     println!("{} finished as {}", finished.id, finished.status);
//!     Ok(())
//! }
//! ```

pub mod bot;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod daemon;
pub mod dispatch;
pub mod error;
pub mod fs;
pub mod job;
pub mod output;
pub mod publish;
pub mod resolve;
pub mod retry;
pub mod store;
pub mod upload;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use config::Config;
pub use dispatch::PipelineDispatcher;
pub use error::{Error, Result};
pub use job::{Job, JobEvent, JobId, JobStatus};
pub use store::JobStore;
