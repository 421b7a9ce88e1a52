//! Configuration structures and loading logic.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::modes::{StoreBackend, VariantPreference};
use crate::error::{Error, Result};
use crate::fs::paths::{default_cache_dir, default_data_dir};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bot: BotConfig,

    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub upload: UploadConfig,

    #[serde(default)]
    pub fileserver: FileServerConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// Telegram bot configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotConfig {
    /// Bot API token from @BotFather.
    #[serde(default)]
    pub token: String,

    /// Chat that receives uploads when a job carries no chat of its own.
    #[serde(default)]
    pub default_chat_id: Option<i64>,

    /// Storage chat uploads land in before being copied to the requester.
    #[serde(default)]
    pub storage_chat_id: Option<i64>,

    /// Bot API server; `https://api.telegram.org` when unset. A self-hosted
    /// `telegram-bot-api --local` server raises the upload limit to 2000 MB.
    #[serde(default)]
    pub api_url: Option<String>,
}

/// aria2 daemon connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// JSON-RPC endpoint.
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// `--rpc-secret` of the daemon.
    #[serde(default)]
    pub secret: Option<String>,

    /// WebSocket endpoint for notifications; polling only when unset.
    #[serde(default)]
    pub ws_url: Option<String>,

    /// Timeout of each RPC call.
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,

    /// Interval between status polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// The work directory as seen by the daemon, when it differs.
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            secret: None,
            ws_url: None,
            rpc_timeout_secs: default_rpc_timeout(),
            poll_interval_ms: default_poll_interval(),
            download_dir: None,
        }
    }
}

impl DaemonConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Job store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Database file; defaults to `jobs.db` in the data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    /// Effective database path.
    pub fn path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| default_data_dir().join("jobs.db"))
    }
}

/// Source resolution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Site that numeric content identifiers are looked up on.
    #[serde(default)]
    pub metadata_site: Option<String>,

    /// Lifetime segment of metadata paths; `None` means 86400.
    #[serde(default)]
    pub lifetime: Option<u64>,

    #[serde(default)]
    pub variant: VariantPreference,

    /// Where resolved plans are cached.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Age after which a cached plan is resolved again.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            metadata_site: None,
            lifetime: None,
            variant: VariantPreference::default(),
            cache_dir: None,
            request_timeout_secs: default_request_timeout(),
            user_agent: default_user_agent(),
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

impl ResolverConfig {
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| default_cache_dir().join("plans"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Concurrency ceilings towards the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Transfers in flight across all jobs.
    #[serde(default = "default_global_limit")]
    pub global_limit: usize,

    /// Transfers in flight for one job.
    #[serde(default = "default_per_job_limit")]
    pub per_job_limit: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            global_limit: default_global_limit(),
            per_job_limit: default_per_job_limit(),
        }
    }
}

/// Job lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Root of per-job work directories.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    /// Resolve/fetch attempts before a job fails.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Minimum interval between progress-only store writes.
    #[serde(default = "default_progress_flush")]
    pub progress_flush_secs: u64,

    /// How long failed jobs keep their work directory.
    #[serde(default = "default_retain_failed")]
    pub retain_failed_secs: u64,

    /// Keep artifacts after a successful upload.
    #[serde(default)]
    pub keep_uploaded: bool,

    /// Interval of the work directory janitor.
    #[serde(default = "default_janitor_interval")]
    pub janitor_interval_secs: u64,

    /// Name written into the jobs this process runs; random when unset.
    #[serde(default)]
    pub instance_id: Option<String>,

    /// How long a job stays claimed by an instance that stopped writing it.
    #[serde(default = "default_claim_lease")]
    pub claim_lease_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: None,
            max_attempts: default_max_attempts(),
            progress_flush_secs: default_progress_flush(),
            retain_failed_secs: default_retain_failed(),
            keep_uploaded: false,
            janitor_interval_secs: default_janitor_interval(),
            instance_id: None,
            claim_lease_secs: default_claim_lease(),
        }
    }
}

impl PipelineConfig {
    pub fn work_dir(&self) -> PathBuf {
        self.work_dir
            .clone()
            .unwrap_or_else(|| default_data_dir().join("work"))
    }

    pub fn progress_flush(&self) -> Duration {
        Duration::from_secs(self.progress_flush_secs)
    }

    pub fn claim_lease(&self) -> Duration {
        Duration::from_secs(self.claim_lease_secs)
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_interval_secs)
    }
}

/// Upload configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Part size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_timeout")]
    pub chunk_timeout_secs: u64,

    /// Timeout of the final send, which carries the whole file.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,

    #[serde(default = "default_max_resume_attempts")]
    pub max_resume_attempts: u32,

    /// Largest file the Bot API server accepts.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Where parts are staged; `spool` under the work directory when unset.
    #[serde(default)]
    pub spool_dir: Option<PathBuf>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_timeout_secs: default_chunk_timeout(),
            send_timeout_secs: default_send_timeout(),
            max_resume_attempts: default_max_resume_attempts(),
            max_file_size: default_max_file_size(),
            spool_dir: None,
        }
    }
}

impl UploadConfig {
    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_timeout_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn spool_dir(&self, work_dir: &Path) -> PathBuf {
        self.spool_dir
            .clone()
            .unwrap_or_else(|| work_dir.join("spool"))
    }
}

/// Direct-link delivery. Files are published into `root`, which an
/// ordinary static web server exposes at `base_url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileServerConfig {
    /// Disabled when unset.
    #[serde(default)]
    pub root: Option<PathBuf>,

    #[serde(default = "default_fileserver_url")]
    pub base_url: String,

    /// How long a published file stays available.
    #[serde(default = "default_fileserver_retain")]
    pub retain_secs: u64,
}

impl Default for FileServerConfig {
    fn default() -> Self {
        Self {
            root: None,
            base_url: default_fileserver_url(),
            retain_secs: default_fileserver_retain(),
        }
    }
}

impl FileServerConfig {
    pub fn enabled(&self) -> bool {
        self.root.is_some()
    }

    pub fn retain(&self) -> Duration {
        Duration::from_secs(self.retain_secs)
    }
}

/// Backoff used for daemon transfers and store writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays.
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:6800/jsonrpc".to_string()
}

fn default_rpc_timeout() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_request_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36".to_string()
}

fn default_global_limit() -> usize {
    8
}

fn default_per_job_limit() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_progress_flush() -> u64 {
    5
}

fn default_retain_failed() -> u64 {
    24 * 60 * 60
}

fn default_janitor_interval() -> u64 {
    10 * 60
}

fn default_claim_lease() -> u64 {
    30 * 60
}

fn default_cache_ttl() -> u64 {
    6 * 60 * 60
}

fn default_send_timeout() -> u64 {
    15 * 60
}

fn default_max_file_size() -> u64 {
    50 * 1024 * 1024
}

fn default_fileserver_url() -> String {
    "http://127.0.0.1:8080/files".to_string()
}

fn default_fileserver_retain() -> u64 {
    24 * 60 * 60
}

fn default_chunk_size() -> usize {
    512 * 1024
}

fn default_chunk_timeout() -> u64 {
    60
}

fn default_max_resume_attempts() -> u32 {
    5
}

fn default_retry_attempts() -> u32 {
    4
}

fn default_initial_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    60_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::Config(format!(
                    "Configuration file not found: {}. Create one from config.example.toml",
                    path.display()
                ))
            } else {
                Error::Io(e)
            }
        })?;

        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load the file if it exists, otherwise start from defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "No configuration file, using defaults");
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_uses_defaults() {
        let raw = r#"
            [bot]
            token = "123456:abcdef"

            [coordinator]
            global_limit = 2

            [resolver]
            variant = "lowest"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.bot.token, "123456:abcdef");
        assert_eq!(config.coordinator.global_limit, 2);
        assert_eq!(config.coordinator.per_job_limit, 4);
        assert_eq!(config.resolver.variant, VariantPreference::Lowest);
        assert_eq!(config.upload.chunk_size, 512 * 1024);
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert!(config.retry.jitter);
        assert!(!config.fileserver.enabled());
        assert_eq!(config.pipeline.claim_lease(), Duration::from_secs(1800));
    }

    #[test]
    fn test_fileserver_and_api_url() {
        let raw = r#"
            [bot]
            api_url = "http://127.0.0.1:8081"

            [fileserver]
            root = "/srv/relay"
            base_url = "https://files.example.org/relay"
            retain_secs = 600
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.bot.api_url.as_deref(), Some("http://127.0.0.1:8081"));
        assert!(config.fileserver.enabled());
        assert_eq!(config.fileserver.retain(), Duration::from_secs(600));
        assert_eq!(
            config.upload.spool_dir(Path::new("/w")),
            PathBuf::from("/w/spool")
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.daemon.secret = Some("s3cret".to_string());
        config.pipeline.max_attempts = 7;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.daemon.secret.as_deref(), Some("s3cret"));
        assert_eq!(loaded.pipeline.max_attempts, 7);
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(Config::load(&path), Err(Error::Config(_))));
        assert!(Config::load_or_default(&path).is_ok());
    }

    #[test]
    fn test_explicit_store_path() {
        let store = StoreConfig {
            backend: StoreBackend::Sqlite,
            path: Some(PathBuf::from("/var/lib/relay/jobs.db")),
        };
        assert_eq!(store.path(), PathBuf::from("/var/lib/relay/jobs.db"));
    }
}
