//! Error types for the media relay.

use thiserror::Error;

use crate::job::{FailureKind, JobStatus};

/// Main error type for the application.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration value for '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    // Pipeline errors
    #[error("Unresolvable source: {0}")]
    UnresolvableSource(String),

    #[error("Download daemon error: {0}")]
    Daemon(String),

    #[error("Download daemon rejected request (code {code}): {message}")]
    DaemonRpc { code: i64, message: String },

    #[error("Assembly failed: {0}")]
    Assembly(String),

    #[error("Upload failed ({kind}): {message}")]
    Upload { kind: UploadFailure, message: String },

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid job transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Job was cancelled")]
    Cancelled,

    #[error("Job not found: {0}")]
    JobNotFound(String),

    // File system errors
    #[error("Invalid filename (path traversal attempt): {0}")]
    InvalidFilename(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // WebSocket errors (boxed to reduce enum size)
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    #[error("Telegram error: {0}")]
    Telegram(#[from] teloxide::RequestError),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    // URL parsing errors
    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),
}

/// Failures of the job store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The stored version moved on since the job was loaded.
    #[error("version conflict on job {id} (expected version {expected})")]
    Conflict { id: String, expected: u64 },

    #[error("job {0} already exists")]
    Duplicate(String),

    /// Another instance wrote the job within its claim lease.
    #[error("job {id} is held by {owner}")]
    Claimed { id: String, owner: String },

    /// A stored document could not be decoded or breaks a job invariant.
    #[error("corrupt document for job {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("backend failure: {0}")]
    Backend(String),
}

/// Why an upload failed; decides whether the relay may resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadFailure {
    /// Timeouts, connection resets, 5xx and rate limiting.
    Transient,
    Quota,
    Permission,
    /// Resume attempts ran out.
    Exhausted,
}

impl std::fmt::Display for UploadFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadFailure::Transient => write!(f, "transient"),
            UploadFailure::Quota => write!(f, "quota"),
            UploadFailure::Permission => write!(f, "permission"),
            UploadFailure::Exhausted => write!(f, "resume attempts exhausted"),
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(Box::new(err))
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Store(StoreError::Backend(err.to_string()))
    }
}

impl Error {
    /// Shorthand for an upload error.
    pub fn upload(kind: UploadFailure, message: impl Into<String>) -> Self {
        Error::Upload {
            kind,
            message: message.into(),
        }
    }

    /// Map this error onto the failure kind recorded on a job.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Error::UnresolvableSource(_) | Error::UrlParse(_) => FailureKind::UnresolvableSource,
            Error::Daemon(_) | Error::DaemonRpc { .. } | Error::WebSocket(_) => FailureKind::Daemon,
            Error::Assembly(_) => FailureKind::Assembly,
            Error::Upload { .. } | Error::Telegram(_) => FailureKind::Upload,
            Error::Store(_) => FailureKind::Store,
            _ => FailureKind::Internal,
        }
    }
}

/// Exit codes of the CLI.
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const ABORT: i32 = 1;
    pub const PIPELINE_ERROR: i32 = 2;
    pub const CONFIG_ERROR: i32 = 3;
    pub const STORE_ERROR: i32 = 4;
    pub const UNEXPECTED_ERROR: i32 = 5;
    pub const JOB_FAILED: i32 = 6;
}
