use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};

use crate::{AppError, AppResult};

/// Exponential backoff settings for [`retry_operation`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy that retries immediately; handy for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    fn retries(&self) -> usize {
        self.max_attempts.max(1).saturating_sub(1) as usize
    }

    /// Backoff schedule: one delay per retry, growing by `multiplier` and
    /// capped at `max_delay`.
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay)
            .with_factor(self.multiplier.max(1.0))
            .with_max_times(self.retries())
    }
}

/// Run `op` until it succeeds, fails with a caller error, or the policy's
/// attempts are spent. The final error carries an `attempts` context entry.
pub async fn retry_operation<T, F, Fut>(policy: &RetryPolicy, label: &str, op: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempts: u32 = 1;
    let result = op
        .retry(policy.backoff())
        .when(|err: &AppError| !err.is_caller_error())
        .notify(|err: &AppError, delay: Duration| {
            tracing::warn!(
                target: "garagedesk",
                event = "retry_scheduled",
                label = %label,
                attempt = attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                code = %err.code(),
                error = %err
            );
            attempts += 1;
        })
        .await;

    match result {
        Ok(value) => {
            if attempts > 1 {
                tracing::info!(
                    target: "garagedesk",
                    event = "retry_succeeded",
                    label = %label,
                    attempts
                );
            }
            Ok(value)
        }
        Err(err) => {
            tracing::error!(
                target: "garagedesk",
                event = "retry_exhausted",
                label = %label,
                attempts,
                code = %err.code(),
                error = %err
            );
            Err(err.with_context("attempts", attempts.to_string()))
        }
    }
}
