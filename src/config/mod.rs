//! Configuration module for the media relay.
//!
//! This module handles:
//! - Loading configuration from TOML files
//! - CLI argument parsing and merging
//! - Configuration validation

pub mod loader;
pub mod modes;
pub mod validation;

pub use loader::{
    BotConfig, Config, CoordinatorConfig, DaemonConfig, FileServerConfig, PipelineConfig, ResolverConfig,
    RetryConfig, StoreConfig, UploadConfig,
};
pub use modes::{StoreBackend, VariantPreference};
pub use validation::{validate_bot_token, validate_chunk_size, validate_config};
