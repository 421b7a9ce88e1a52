//! Retry logic with exponential backoff.
//!
//! This module provides:
//! - `IsRetryable`, classifying errors as transient or permanent
//! - `with_retry`, running an async operation until it succeeds, fails
//!   permanently or runs out of attempts
//! - `backoff_delay`, the delay before a given retry

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;
use crate::error::{Error, StoreError, UploadFailure};

/// Errors that can be classified as retryable or not.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried.
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status()
                        .map(|s| s.is_server_error() || s.as_u16() == 429)
                        .unwrap_or(false)
            }
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // Daemon-side failures are retried by re-creating the transfer.
            Error::Daemon(_) | Error::DaemonRpc { .. } | Error::WebSocket(_) => true,
            Error::Upload { kind, .. } => *kind == UploadFailure::Transient,
            Error::Store(StoreError::Backend(_)) => true,
            Error::Store(_) => false,
            Error::Telegram(teloxide::RequestError::Network(_))
            | Error::Telegram(teloxide::RequestError::RetryAfter(_)) => true,
            _ => false,
        }
    }
}

/// Delay before retry number `retry` (1-based), without jitter.
pub fn backoff_delay(config: &RetryConfig, retry: u32) -> Duration {
    let exponent = retry.saturating_sub(1) as i32;
    let secs = config.initial_delay().as_secs_f64() * config.backoff_multiplier.powi(exponent);
    let max = config.max_delay();
    if !secs.is_finite() || secs >= max.as_secs_f64() {
        max
    } else {
        Duration::from_secs_f64(secs)
    }
}

/// Delay before retry number `retry`, jittered when the config asks for it.
pub fn retry_delay(config: &RetryConfig, retry: u32) -> Duration {
    let delay = backoff_delay(config, retry);
    if config.jitter {
        add_jitter(delay)
    } else {
        delay
    }
}

/// Run `operation` until it succeeds, fails permanently, or has been retried
/// `config.max_attempts` times.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, label: &str, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut retry = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if retry > 0 {
                    tracing::info!(operation = label, attempts = retry + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && retry < config.max_attempts => {
                retry += 1;
                let delay = retry_delay(config, retry);

                tracing::warn!(
                    operation = label,
                    error = %e,
                    attempt = retry,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );

                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(operation = label, error = %e, attempts = retry + 1, "Retry attempts exhausted");
                } else {
                    tracing::debug!(operation = label, error = %e, "Non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Add between 0% and 100% of `delay` on top of it.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay_ms: 5,
            max_delay_ms: 20,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_retry_transient_then_succeed() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result = with_retry(&fast_config(3), "test", || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::Daemon("busy".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result: Result<(), Error> = with_retry(&fast_config(2), "test", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Error::Daemon("down".into()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result: Result<(), Error> = with_retry(&fast_config(5), "test", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Error::Store(StoreError::Conflict {
                    id: "x".into(),
                    expected: 1,
                }))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_delay_grows_and_caps() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            backoff_multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(&config, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(&config, 4), Duration::from_millis(800));
        assert_eq!(backoff_delay(&config, 5), Duration::from_millis(1000));
        assert_eq!(backoff_delay(&config, 60), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_bounds() {
        let base = Duration::from_millis(100);
        for _ in 0..50 {
            let d = add_jitter(base);
            assert!(d >= base && d <= base * 2);
        }
    }

    #[test]
    fn test_classification() {
        assert!(Error::upload(UploadFailure::Transient, "timeout").is_retryable());
        assert!(!Error::upload(UploadFailure::Quota, "too big").is_retryable());
        assert!(Error::Store(StoreError::Backend("locked".into())).is_retryable());
        assert!(!Error::UnresolvableSource("404".into()).is_retryable());
        assert!(!Error::Assembly("gap".into()).is_retryable());
    }
}
