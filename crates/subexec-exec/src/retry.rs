//! Bounded, sequential retries with exponential backoff.

use std::future::Future;
use std::time::Duration;

use crate::error::ExecError;
use crate::executor::ProcessExecutor;
use crate::log::LogSink;
use crate::types::{Command, ExecutionRequest, ExecutionResult, RetryConfig};

/// Delay inserted before attempt `attempt` (1-based).
///
/// Zero for the first attempt, then `min(initial * multiplier^(attempt - 2), max)`.
#[must_use]
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    if attempt < 2 {
        return Duration::ZERO;
    }
    let exponent = i32::try_from(attempt - 2).unwrap_or(i32::MAX);
    #[allow(clippy::cast_precision_loss)]
    let initial_ns = config.initial_delay.as_nanos() as f64;
    #[allow(clippy::cast_precision_loss)]
    let max_ns = config.max_delay.as_nanos() as f64;
    let delay_ns = initial_ns * config.backoff_multiplier.powi(exponent);

    if !delay_ns.is_finite() || delay_ns >= max_ns {
        return config.max_delay;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Duration::from_nanos(delay_ns.round() as u64)
}

/// Timeouts and spawn failures are never retried; a nonzero exit only when its
/// code is on the configured allow-list.
#[must_use]
pub fn is_retryable(err: &ExecError, config: &RetryConfig) -> bool {
    match err {
        ExecError::Execution { exit_code, .. } => config.is_retryable_exit_code(*exit_code),
        ExecError::Spawn { .. } | ExecError::Timeout { .. } | ExecError::RetriesExhausted { .. } => {
            false
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or attempts run out.
///
/// `op` receives the 1-based attempt number. Attempts never overlap: the next one
/// starts only after the previous future has completed and the backoff elapsed.
///
/// # Errors
///
/// A non-retryable error is returned unchanged. A retryable error on the last
/// attempt is wrapped in `ExecError::RetriesExhausted`.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    sink: &dyn LogSink,
    mut op: F,
) -> Result<T, ExecError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ExecError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !is_retryable(&err, config) {
            return Err(err);
        }

        if attempt >= max_attempts {
            sink.error(
                "retries exhausted",
                &[
                    ("attempts", attempt.to_string()),
                    ("error", err.to_string()),
                ],
            );
            return Err(ExecError::RetriesExhausted {
                attempts: attempt,
                last_error: Box::new(err),
            });
        }

        let delay = backoff_delay(config, attempt + 1);
        sink.warn(
            "transient failure, retrying",
            &[
                ("attempt", format!("{attempt}/{max_attempts}")),
                ("delay_ms", delay.as_millis().to_string()),
                ("error", err.to_string()),
            ],
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Drives [`ProcessExecutor::execute`] under the request's [`RetryConfig`].
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    executor: ProcessExecutor,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(executor: ProcessExecutor) -> Self {
        Self { executor }
    }

    #[must_use]
    pub fn executor(&self) -> &ProcessExecutor {
        &self.executor
    }

    /// # Errors
    ///
    /// See [`retry_with_backoff`]; the underlying errors come from
    /// [`ProcessExecutor::execute`].
    pub async fn execute_with_retry(
        &self,
        command: &Command,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult, ExecError> {
        retry_with_backoff(&request.retry, self.executor.sink().as_ref(), |_| {
            self.executor.execute(command, request)
        })
        .await
    }
}
