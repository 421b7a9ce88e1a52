//! Configuration validation logic.

use regex::Regex;
use url::Url;

use crate::config::loader::Config;
use crate::error::{Error, Result};

/// Upload parts must divide this size evenly.
const MAX_CHUNK_SIZE: usize = 512 * 1024;

/// Upload parts must be a multiple of this size.
const CHUNK_ALIGNMENT: usize = 1024;

/// Validate everything except the bot token.
///
/// The token is only needed when serving; see [`validate_bot_token`].
pub fn validate_config(config: &Config) -> Result<()> {
    validate_url("daemon.rpc_url", &config.daemon.rpc_url, &["http", "https"])?;
    if let Some(ws_url) = &config.daemon.ws_url {
        validate_url("daemon.ws_url", ws_url, &["ws", "wss"])?;
    }
    if let Some(secret) = &config.daemon.secret {
        reject_placeholder("daemon.secret", secret)?;
    }
    if config.daemon.poll_interval_ms == 0 {
        return Err(invalid("daemon.poll_interval_ms", "must be greater than zero"));
    }
    if config.daemon.rpc_timeout_secs == 0 {
        return Err(invalid("daemon.rpc_timeout_secs", "must be greater than zero"));
    }

    if let Some(site) = &config.resolver.metadata_site {
        validate_url("resolver.metadata_site", site, &["http", "https"])?;
    }

    validate_limits(
        config.coordinator.global_limit,
        config.coordinator.per_job_limit,
    )?;

    if config.pipeline.max_attempts == 0 {
        return Err(invalid("pipeline.max_attempts", "must be at least 1"));
    }
    if let Some(instance) = &config.pipeline.instance_id {
        if instance.trim().is_empty() {
            return Err(invalid("pipeline.instance_id", "must not be blank"));
        }
    }
    // Longest stretch a running job may go without a store write.
    let silent = config
        .pipeline
        .progress_flush_secs
        .max(config.upload.chunk_timeout_secs)
        .max(config.upload.send_timeout_secs);
    if config.pipeline.claim_lease_secs <= silent {
        return Err(invalid(
            "pipeline.claim_lease_secs",
            &format!("must exceed the longest write interval ({}s)", silent),
        ));
    }

    if let Some(api_url) = &config.bot.api_url {
        validate_url("bot.api_url", api_url, &["http", "https"])?;
    }
    validate_chunk_size(config.upload.chunk_size)?;
    if config.upload.chunk_timeout_secs == 0 {
        return Err(invalid("upload.chunk_timeout_secs", "must be greater than zero"));
    }
    if config.upload.send_timeout_secs == 0 {
        return Err(invalid("upload.send_timeout_secs", "must be greater than zero"));
    }
    if config.upload.max_file_size == 0 {
        return Err(invalid("upload.max_file_size", "must be greater than zero"));
    }

    if config.fileserver.enabled() {
        validate_url("fileserver.base_url", &config.fileserver.base_url, &["http", "https"])?;
        if config.fileserver.retain_secs == 0 {
            return Err(invalid("fileserver.retain_secs", "must be greater than zero"));
        }
    }

    if config.retry.backoff_multiplier < 1.0 {
        return Err(invalid("retry.backoff_multiplier", "must be at least 1.0"));
    }

    Ok(())
}

/// Validate the Telegram bot token.
pub fn validate_bot_token(token: &str) -> Result<()> {
    if token.is_empty() {
        return Err(Error::MissingConfig("bot.token".to_string()));
    }

    reject_placeholder("bot.token", token)?;

    // <numeric bot id>:<secret>
    let pattern = Regex::new(r"^\d+:[A-Za-z0-9_-]{20,}$")
        .map_err(|e| Error::Config(format!("Invalid token pattern: {}", e)))?;
    if !pattern.is_match(token) {
        return Err(invalid(
            "bot.token",
            "Token must look like '<bot id>:<secret>' as issued by @BotFather",
        ));
    }

    Ok(())
}

/// Validate the concurrency ceilings.
pub fn validate_limits(global: usize, per_job: usize) -> Result<()> {
    if global == 0 {
        return Err(invalid("coordinator.global_limit", "must be at least 1"));
    }
    if per_job == 0 {
        return Err(invalid("coordinator.per_job_limit", "must be at least 1"));
    }
    Ok(())
}

/// Validate the upload part size.
pub fn validate_chunk_size(size: usize) -> Result<()> {
    if size == 0 || size % CHUNK_ALIGNMENT != 0 || MAX_CHUNK_SIZE % size != 0 {
        return Err(invalid(
            "upload.chunk_size",
            &format!(
                "{} is not a multiple of {} that divides {}",
                size, CHUNK_ALIGNMENT, MAX_CHUNK_SIZE
            ),
        ));
    }
    Ok(())
}

fn validate_url(field: &str, value: &str, schemes: &[&str]) -> Result<()> {
    let parsed = Url::parse(value).map_err(|e| invalid(field, &format!("'{}': {}", value, e)))?;
    if !schemes.contains(&parsed.scheme()) {
        return Err(invalid(
            field,
            &format!("scheme must be one of {}", schemes.join(", ")),
        ));
    }
    Ok(())
}

fn reject_placeholder(field: &str, value: &str) -> Result<()> {
    let lower = value.to_lowercase();
    if lower.contains("replaceme") || lower.contains("your_") || lower.contains("changeme") {
        return Err(invalid(
            field,
            "Value appears to be a placeholder. Please provide the real value.",
        ));
    }
    Ok(())
}

fn invalid(field: &str, message: &str) -> Error {
    Error::ConfigValidation {
        field: field.to_string(),
        message: message.to_string(),
    }
}
