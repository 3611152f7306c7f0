//! Bounded exponential backoff for cloud calls and readiness polling

use crate::error::{Error, ErrorKind, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, warn};

/// Retry configuration for provider operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,

    /// Initial delay between attempts
    pub initial_delay: Duration,

    /// Maximum delay between attempts
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Budget for waiting on VMs and managed clusters to come up
    pub fn readiness() -> Self {
        Self {
            max_attempts: 60,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 1.5,
        }
    }

    /// Delay before attempt `attempt + 1`, capped at `max_delay`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        let delay = self.initial_delay.mul_f64(factor);
        delay.min(self.max_delay)
    }
}

/// Runs fallible or not-yet-ready operations under a [`RetryConfig`]
///
/// Every sleep races the cancellation token; a cancelled waiter fails with
/// [`ErrorKind::ContextCancelled`].
#[derive(Debug, Clone)]
pub struct Waiter {
    config: RetryConfig,
    cancel: CancellationToken,
    span: Span,
}

impl Waiter {
    pub fn new(config: RetryConfig, cancel: CancellationToken, span: Span) -> Self {
        Self {
            config,
            cancel,
            span,
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Retries `op` while it fails with a retryable error
    pub async fn retry<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.until(operation, || {
            let fut = op();
            async move { fut.await.map(Some) }
        })
        .await
    }

    /// Polls `poll` until it yields `Some`
    ///
    /// `Ok(None)` means "not ready yet". Retryable errors count as a failed
    /// attempt; any other error is returned at once. When the attempts run out
    /// the result is [`ErrorKind::TimeOut`] carrying the last error, if any.
    pub async fn until<T, F, Fut>(&self, operation: &str, mut poll: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let mut last_error: Option<Error> = None;

        for attempt in 0..self.config.max_attempts {
            if self.cancel.is_cancelled() {
                return Err(cancelled(operation));
            }

            match poll().await {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {
                    debug!(parent: &self.span, attempt = attempt + 1, "{operation}: not ready yet");
                }
                Err(err) if err.kind().is_retryable() => {
                    warn!(
                        parent: &self.span,
                        attempt = attempt + 1,
                        max_attempts = self.config.max_attempts,
                        error = %err,
                        "{operation}: attempt failed"
                    );
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }

            if attempt + 1 < self.config.max_attempts {
                let delay = self.config.delay_for_attempt(attempt);
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(cancelled(operation)),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        let err = Error::new(
            ErrorKind::TimeOut,
            format!(
                "{operation}: gave up after {} attempts",
                self.config.max_attempts
            ),
        );
        Err(match last_error {
            Some(cause) => err.with_source(cause),
            None => err,
        })
    }
}

fn cancelled(operation: &str) -> Error {
    Error::new(
        ErrorKind::ContextCancelled,
        format!("{operation}: cancelled"),
    )
}
