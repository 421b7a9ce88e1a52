//! Command-line argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::{Config, StoreBackend, VariantPreference};

/// Telegram media relay.
#[derive(Parser, Debug)]
#[command(
    name = "media-relay",
    version,
    about = "Fetch media through aria2 and relay it to Telegram",
    long_about = "A Telegram bot that turns links into uploads.\n\n\
                  Direct files, HLS playlists and content ids are downloaded through an aria2 \
                  daemon, assembled locally and uploaded in resumable chunks."
)]
pub struct Args {
    /// Path to configuration file.
    #[arg(short, long, global = true, default_value = "config.toml", env = "MEDIA_RELAY_CONFIG")]
    pub config: PathBuf,

    /// Telegram bot token.
    #[arg(long, global = true, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// aria2 JSON-RPC endpoint.
    #[arg(long = "rpc-url", global = true, env = "ARIA2_RPC_URL")]
    pub rpc_url: Option<String>,

    /// aria2 RPC secret.
    #[arg(long = "rpc-secret", global = true, env = "ARIA2_RPC_SECRET", hide_env_values = true)]
    pub rpc_secret: Option<String>,

    /// Bot API server, e.g. a local telegram-bot-api.
    #[arg(long = "api-url", global = true, env = "TELEGRAM_API_URL")]
    pub api_url: Option<String>,

    /// Directory published files are written to.
    #[arg(long = "fileserver-root", global = true)]
    pub fileserver_root: Option<PathBuf>,

    /// Directory for in-progress downloads.
    #[arg(long = "work-dir", global = true)]
    pub work_dir: Option<PathBuf>,

    /// Job store backend.
    #[arg(long, global = true, value_enum)]
    pub store: Option<StoreBackendArg>,

    /// Job store database file.
    #[arg(long = "store-path", global = true)]
    pub store_path: Option<PathBuf>,

    /// Maximum concurrent transfers across all jobs.
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    /// HLS variant to pick from master playlists.
    #[arg(long, global = true, value_enum)]
    pub variant: Option<VariantArg>,

    /// Enable debug logging.
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the Telegram bot (default).
    Serve,

    /// Run one job in the foreground.
    Fetch {
        /// Link or content id.
        reference: String,

        /// Chat to upload to; defaults to bot.default_chat_id.
        #[arg(long, allow_negative_numbers = true)]
        chat: Option<i64>,

        /// Publish a download link instead of uploading.
        #[arg(long)]
        link: bool,
    },

    /// Resolve a reference and print its fetch plan.
    Plan {
        /// Link or content id.
        reference: String,
    },

    /// Show one stored job.
    Status {
        /// Job id.
        id: String,
    },

    /// List recent jobs.
    Jobs {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Cancel a stored job.
    Cancel {
        /// Job id.
        id: String,
    },
}

/// CLI store backend argument.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StoreBackendArg {
    /// SQLite database file.
    Sqlite,
    /// In-process only; jobs are lost on exit.
    Memory,
}

impl From<StoreBackendArg> for StoreBackend {
    fn from(arg: StoreBackendArg) -> Self {
        match arg {
            StoreBackendArg::Sqlite => StoreBackend::Sqlite,
            StoreBackendArg::Memory => StoreBackend::Memory,
        }
    }
}

/// CLI variant preference argument.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum VariantArg {
    Highest,
    Lowest,
}

impl From<VariantArg> for VariantPreference {
    fn from(arg: VariantArg) -> Self {
        match arg {
            VariantArg::Highest => VariantPreference::Highest,
            VariantArg::Lowest => VariantPreference::Lowest,
        }
    }
}

impl Args {
    /// The subcommand to run, `serve` when none was given.
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }

    /// Merge CLI arguments into an existing config, overriding where specified.
    pub fn merge_into_config(&self, config: &mut Config) {
        if let Some(token) = &self.token {
            config.bot.token = token.clone();
        }

        if let Some(url) = &self.rpc_url {
            config.daemon.rpc_url = url.clone();
        }

        if let Some(secret) = &self.rpc_secret {
            config.daemon.secret = Some(secret.clone());
        }

        if let Some(url) = &self.api_url {
            config.bot.api_url = Some(url.clone());
        }

        if let Some(root) = &self.fileserver_root {
            config.fileserver.root = Some(root.clone());
        }

        if let Some(dir) = &self.work_dir {
            config.pipeline.work_dir = Some(dir.clone());
        }

        if let Some(backend) = self.store {
            config.store.backend = backend.into();
        }

        if let Some(path) = &self.store_path {
            config.store.path = Some(path.clone());
        }

        if let Some(limit) = self.concurrency {
            config.coordinator.global_limit = limit;
        }

        if let Some(variant) = self.variant {
            config.resolver.variant = variant.into();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_serve() {
        let args = Args::try_parse_from(["media-relay"]).unwrap();
        assert_eq!(args.command(), Command::Serve);
        assert_eq!(args.config, PathBuf::from("config.toml"));
    }

    #[test]
    fn test_fetch_with_global_flags_after_subcommand() {
        let args = Args::try_parse_from([
            "media-relay",
            "fetch",
            "https://example.com/v.m3u8",
            "--chat",
            "-100",
            "--concurrency",
            "2",
            "--store",
            "memory",
            "--link",
        ])
        .unwrap();

        assert_eq!(
            args.command(),
            Command::Fetch {
                reference: "https://example.com/v.m3u8".into(),
                chat: Some(-100),
                link: true,
            }
        );

        let mut config = Config::default();
        args.merge_into_config(&mut config);
        assert_eq!(config.coordinator.global_limit, 2);
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn test_merge_overrides_only_given_values() {
        let args = Args::try_parse_from([
            "media-relay",
            "--rpc-url",
            "http://aria2:6800/jsonrpc",
            "--variant",
            "lowest",
            "jobs",
        ])
        .unwrap();
        let mut config = Config::default();
        args.merge_into_config(&mut config);

        assert_eq!(config.daemon.rpc_url, "http://aria2:6800/jsonrpc");
        assert_eq!(config.resolver.variant, VariantPreference::Lowest);
        assert!(config.bot.api_url.is_none());
        assert!(config.fileserver.root.is_none());
        assert_eq!(args.command(), Command::Jobs { limit: 20 });
    }
}
