//! Retry with exponential backoff for remote round-trips.

use crate::{remote::RemoteError, SyncError};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Backoff schedule for transient remote failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per round-trip, including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let nanos = self.initial_backoff.as_nanos() as f64 * self.multiplier.powi(exponent);
        let capped = nanos.min(self.max_backoff.as_nanos() as f64).max(0.0);
        Duration::from_nanos(capped.round() as u64)
    }
}

/// Run `operation` until it succeeds, fails fatally, runs out of attempts or
/// `token` is cancelled.
///
/// Cancellation is checked before every attempt and interrupts both the
/// attempt and the backoff sleep.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    name: &'static str,
    mut operation: F,
) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        if token.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(SyncError::Cancelled),
            outcome = operation() => outcome,
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    operation = name,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Remote call failed, retrying"
                );
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(SyncError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(err) => {
                tracing::warn!(operation = name, attempt, error = %err, "Remote call failed");
                return Err(err.into());
            }
        }
    }
}
