//! Retry logic with exponential backoff
//!
//! Two consumers share the same policy:
//! - the engine, which asks [`should_retry`] and [`backoff_delay`] when a task attempt
//!   fails and then schedules the re-enqueue on a timer so no worker is blocked,
//! - collaborators such as the yt-dlp lister, which wrap short operations in [`with_retry`].
//!
//! # Example
//!
//! ```no_run
//! use vidqueue::retry::{IsRetryable, with_retry};
//! use vidqueue::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! let result = with_retry(&config, || async {
//!     Ok::<_, MyError>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::FetchError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Fraction of a delay that jitter may shave off
const JITTER_RATIO: f64 = 0.1;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (throttling, timeouts, connection resets) should return `true`.
/// Permanent failures (removed video, private video, unsupported URL) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transient(_) | FetchError::TimedOut(_) => true,
            FetchError::Permanent(_) | FetchError::Cancelled => false,
        }
    }
}

/// Decide whether a failed attempt gets another go
///
/// `attempt` is the number of retries already performed for the task.
pub fn should_retry(config: &RetryConfig, error: &FetchError, attempt: u32) -> bool {
    if attempt >= config.max_retries {
        return false;
    }
    match error {
        FetchError::Cancelled => false,
        FetchError::Permanent(_) => config.retry_permanent,
        _ => error.is_retryable(),
    }
}

/// Delay before retry number `attempt + 1`
///
/// `initial_delay * backoff_multiplier^attempt`, capped at `max_delay`. With jitter enabled
/// up to 10% is taken off, so the result never exceeds the cap.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let raw = config.initial_delay.as_secs_f64() * config.backoff_multiplier.powi(exponent);
    let capped = if raw.is_finite() && raw < config.max_delay.as_secs_f64() {
        Duration::from_secs_f64(raw)
    } else {
        config.max_delay
    };

    if config.jitter {
        add_jitter(capped)
    } else {
        capped
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// Returns the successful result or the last error after `max_retries` retries.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                let delay = backoff_delay(config, attempt);
                attempt += 1;

                tracing::warn!(
                    error = %e,
                    attempt,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(error = %e, "Operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Take a random slice of up to [`JITTER_RATIO`] off a delay
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=JITTER_RATIO);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 - jitter_factor))
}
