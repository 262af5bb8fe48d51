//! Retry logic with exponential backoff
//!
//! Two layers live here:
//! - [`RetryPolicy`] decides what happens to a job after a failed fetch attempt:
//!   count the failure, wait `base * 2^(n-1)`, put the job back to `pending` for
//!   re-classification, or mark it `failed` once the retries are used up.
//! - [`with_retry`] retries a single transient operation (an engine RPC call)
//!   a few times before giving up.
//!
//! # Example
//!
//! ```no_run
//! use media_dl::retry::{IsRetryable, with_retry};
//! use media_dl::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
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
//! with_retry(&config, || async {
//!     Ok::<_, MyError>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::{Event, JobId, Stage, Status};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, engine errors, stale extraction) return `true`.
/// Permanent failures (size limits, malformed input, cancellation) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Stage failures are worth a fresh attempt: signed URLs expire, engines hiccup
            Error::Extraction(_) | Error::Transfer(_) | Error::Delivery(_) => true,
            Error::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            // Tool failures are retried unless the tool is simply missing
            Error::ExternalTool(msg) => !msg.contains("not found"),
            // A vanished artifact is refetched from scratch
            Error::ArtifactMissing(_) => true,
            Error::SizeLimit { .. }
            | Error::InvalidUrl(_)
            | Error::InsufficientSpace { .. }
            | Error::Cancelled
            | Error::ShuttingDown
            | Error::Config { .. }
            | Error::Database(_)
            | Error::Sqlx(_)
            | Error::Job(_)
            | Error::Serialization(_)
            | Error::NotSupported(_)
            | Error::Other(_) => false,
        }
    }
}

/// What to do with a job after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then make the job eligible again
    Retry {
        /// Failed attempts so far
        attempt: u32,
        /// Wait before the job becomes pending
        delay: Duration,
    },
    /// Mark the job failed
    GiveUp {
        /// Failed attempts so far
        attempt: u32,
    },
}

/// Fetch-stage retry policy
///
/// Failures are counted on the job row. While the count stays below
/// `max_retries` the job waits and goes back to `pending`; the next claim
/// re-runs classification and extraction from scratch.
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    db: Arc<Database>,
    event_tx: tokio::sync::broadcast::Sender<Event>,
}

impl RetryPolicy {
    /// Create a policy writing through `db` and announcing on `event_tx`
    pub fn new(
        config: RetryConfig,
        db: Arc<Database>,
        event_tx: tokio::sync::broadcast::Sender<Event>,
    ) -> Self {
        Self {
            config,
            db,
            event_tx,
        }
    }

    /// Delay before retrying after the `attempt`-th failure (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        backoff_delay(self.config.base_delay, attempt)
    }

    /// Decide the outcome of the `attempt`-th failure without side effects
    pub fn decide(&self, attempt: u32, error: &Error) -> RetryDecision {
        if !error.is_retryable() || attempt >= self.config.max_retries {
            RetryDecision::GiveUp { attempt }
        } else {
            RetryDecision::Retry {
                attempt,
                delay: self.delay_for(attempt),
            }
        }
    }

    /// Handle a failed attempt for `id`
    ///
    /// Returns `Ok(true)` when the job was put back to `pending` and `Ok(false)` when
    /// it was marked `failed`. The wait is cut short when `cancel` fires (user cancel
    /// or shutdown); the job is then requeued immediately, and a user cancel is
    /// preserved because status writes never leave `cancelled`.
    pub async fn on_failure(
        &self,
        id: JobId,
        stage: Stage,
        error: &Error,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let attempt = self.db.increment_retry(id).await?;
        let message = error.to_string();

        match self.decide(attempt, error) {
            RetryDecision::GiveUp { attempt } => {
                tracing::error!(
                    job_id = id.0,
                    attempt,
                    max_retries = self.config.max_retries,
                    retryable = error.is_retryable(),
                    error = %message,
                    "Job failed"
                );
                if self.db.set_status(id, Status::Failed, Some(&message)).await? {
                    let _ = self.event_tx.send(Event::Failed {
                        id,
                        stage,
                        error: message,
                    });
                }
                Ok(false)
            }
            RetryDecision::Retry { attempt, delay } => {
                let delay = if self.config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                tracing::warn!(
                    job_id = id.0,
                    attempt,
                    max_retries = self.config.max_retries,
                    delay_secs = delay.as_secs(),
                    error = %message,
                    "Attempt failed, retrying after backoff"
                );
                let _ = self.event_tx.send(Event::RetryScheduled {
                    id,
                    attempt,
                    delay_secs: delay.as_secs(),
                    error: message.clone(),
                });

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        tracing::debug!(job_id = id.0, "Backoff interrupted");
                    }
                }

                self.db
                    .set_status(id, Status::Pending, Some(&message))
                    .await?;
                Ok(true)
            }
        }
    }
}

/// `base * 2^(attempt - 1)`, saturating
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(20);
    base.saturating_mul(1u32 << exponent)
}

/// Execute an async operation with exponential backoff retry logic
///
/// Retries up to `config.max_attempts` times while the error is retryable, starting
/// at `config.initial_delay` and multiplying by `config.backoff_multiplier` up to
/// `config.max_delay`.
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };
                tokio::time::sleep(jittered_delay).await;

                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::debug!(error = %e, "Operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay
///
/// The result is uniformly distributed between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
